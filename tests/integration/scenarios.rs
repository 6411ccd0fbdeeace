//! Build scenarios over small, hand-shaped captures
//!
//! Each test scripts the oracle for one dependency shape and checks both
//! the resulting graph and the generated program.

use tracegraph::capture::{Capture, CapturedRequest, CapturedResponse};
use tracegraph::codegen::{generate, CodegenWarning};
use tracegraph::error::BuildError;
use tracegraph::graph::{
    BuildRequest, BuildSession, BuildWarning, Closure, ConstantReason, Extraction, Fragment,
    RequestNode, Resolution, StepEvent,
};
use tracegraph::oracle::{Decision, ProducerRef, ScriptedOracle};

use super::common::fixtures::{chain, dependency_graph, header_dependency, index, url};

fn node_for<'a>(session: &'a BuildSession, path: &str) -> &'a RequestNode {
    session
        .dag()
        .nodes()
        .find(|n| n.url == url(path))
        .unwrap_or_else(|| panic!("no node for {path}"))
}

#[tokio::test]
async fn header_token_links_consumer_to_producer() {
    let (idx, oracle) = header_dependency();
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert!(outcome.warnings.is_empty());
    assert_eq!(session.dag().len(), 2);

    let producer = node_for(&session, "/b").id.clone();
    let master = session.dag().master_node().unwrap();
    assert_eq!(
        master.dynamic_parts[0].resolution,
        Resolution::Producer(producer.clone())
    );
    let edge = &session.dag().edges()[0];
    assert_eq!(edge.producer, producer);
    assert_eq!(edge.extraction, Some(Extraction::Header("x-token".into())));

    let program = generate(session.dag());
    assert!(program.complete);
    assert_eq!(program.calls.len(), 2);
    assert_eq!(program.calls[0].node, producer);
    let last = program.calls.last().unwrap();
    assert_eq!(Some(&last.node), session.dag().master());
    let (_, token) = last
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("x-token"))
        .unwrap();
    assert_eq!(token.to_string(), "{{v0_x_token}}");
    assert_eq!(last.extraction_slots.len(), 1);
    assert_eq!(last.extraction_slots[0].call_index, 0);
}

#[tokio::test]
async fn advance_reports_every_unit_of_work() {
    let (idx, oracle) = header_dependency();
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), idx).unwrap();
    let master = session.dag().master().cloned().unwrap();

    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::Popped {
            node: master.clone(),
            parts: 1
        }
    );
    assert_eq!(session.in_process().unwrap().pending.len(), 1);
    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::PartResolved {
            node: master.clone(),
            part: 0
        }
    );
    assert_eq!(session.worklist().len(), 1);
    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::NodeResolved(master)
    );

    let producer = session.worklist()[0].clone();
    assert!(matches!(
        session.advance(&oracle).await,
        StepEvent::Popped { parts: 0, .. }
    ));
    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::NodeResolved(producer)
    );
    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::Closed(Closure::Complete)
    );
    // closed sessions stay closed
    assert_eq!(
        session.advance(&oracle).await,
        StepEvent::Closed(Closure::Complete)
    );
    assert_eq!(session.steps(), 2);
}

#[tokio::test]
async fn shared_input_variable_collects_every_binding() {
    let mut capture = Capture::new();
    capture.push(
        CapturedRequest::new("GET", url("/b?session=s-1")),
        CapturedResponse::ok().with_header("X-Token", "t0k"),
    );
    capture.push(
        CapturedRequest::new("GET", url("/a?session=s-1")).with_header("X-Token", "t0k"),
        CapturedResponse::ok(),
    );
    let oracle = ScriptedOracle::new()
        .with_fragments(
            &url("/a?session=s-1"),
            vec![
                Fragment::query("session", "s-1"),
                Fragment::header("x-token", "t0k"),
            ],
        )
        .with_fragments(&url("/b?session=s-1"), vec![Fragment::query("session", "s-1")])
        .with_decision(&url("/a?session=s-1"), "s-1", Decision::input("session_id"))
        .with_decision(&url("/b?session=s-1"), "s-1", Decision::input("session_id"))
        .with_decision(
            &url("/a?session=s-1"),
            "t0k",
            Decision::producer(
                ProducerRef::get(url("/b?session=s-1")),
                Extraction::Header("x-token".into()),
            ),
        );

    let mut session = BuildSession::new(
        BuildRequest::new(url("/a?session=s-1")).with_input("session_id", "s-1"),
        index(capture),
    )
    .unwrap();
    assert!(session.run(&oracle).await.is_complete());

    let input = session.dag().input("session_id").unwrap();
    assert_eq!(input.bindings.len(), 2);
    assert_eq!(input.default_value.as_deref(), Some("s-1"));
    assert_eq!(session.dag().inputs().count(), 1);

    let program = generate(session.dag());
    assert_eq!(program.inputs.len(), 1);
    assert_eq!(program.inputs[0].name, "session_id");
    for call in &program.calls {
        assert_eq!(call.input_slots, vec!["session_id".to_string()]);
        assert!(call.url.to_string().ends_with("?session={{input.session_id}}"));
    }
}

#[tokio::test]
async fn oracle_error_keeps_fragment_constant() {
    let (idx, oracle) = header_dependency();
    let oracle = oracle.failing_resolution(&url("/a"), "t0k");
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert_eq!(outcome.closure, Closure::Complete);
    assert_eq!(session.dag().len(), 1);
    assert_eq!(
        session.dag().master_node().unwrap().dynamic_parts[0].resolution,
        Resolution::Constant(ConstantReason::NoDecision)
    );
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BuildWarning::NoDecision { .. }]
    ));

    let program = generate(session.dag());
    assert_eq!(program.calls.len(), 1);
    assert!(program.calls[0].extraction_slots.is_empty());
}

#[tokio::test]
async fn producer_outside_the_capture_is_reported() {
    let (idx, _) = header_dependency();
    let oracle = ScriptedOracle::new()
        .with_fragments(&url("/a"), vec![Fragment::header("x-token", "t0k")])
        .with_decision(
            &url("/a"),
            "t0k",
            Decision::producer(
                ProducerRef::get(url("/nowhere")),
                Extraction::Header("x-token".into()),
            ),
        );
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert_eq!(session.dag().len(), 1);
    assert_eq!(
        session.dag().master_node().unwrap().dynamic_parts[0].resolution,
        Resolution::Constant(ConstantReason::ProducerMissing)
    );
    match outcome.warnings.as_slice() {
        [BuildWarning::ProducerMissing { target, .. }] => assert!(target.contains("/nowhere")),
        other => panic!("unexpected warnings: {other:?}"),
    }
}

#[tokio::test]
async fn cycle_closing_edge_is_rejected() {
    let mut capture = Capture::new();
    capture.push(
        CapturedRequest::new("GET", url("/b")).with_header("X-Echo", "e-1"),
        CapturedResponse::ok().with_header("X-Token", "t0k"),
    );
    capture.push(
        CapturedRequest::new("GET", url("/a")).with_header("X-Token", "t0k"),
        CapturedResponse::ok().with_header("X-Echo", "e-1"),
    );
    let oracle = ScriptedOracle::new()
        .with_fragments(&url("/a"), vec![Fragment::header("x-token", "t0k")])
        .with_fragments(&url("/b"), vec![Fragment::header("x-echo", "e-1")])
        .with_decision(
            &url("/a"),
            "t0k",
            Decision::producer(
                ProducerRef::get(url("/b")),
                Extraction::Header("x-token".into()),
            ),
        )
        .with_decision(
            &url("/b"),
            "e-1",
            Decision::producer(
                ProducerRef::get(url("/a")),
                Extraction::Header("x-echo".into()),
            ),
        );
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), index(capture)).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert!(!session.dag().has_cycle());
    assert_eq!(session.dag().edges().len(), 1);
    assert_eq!(
        node_for(&session, "/b").dynamic_parts[0].resolution,
        Resolution::Constant(ConstantReason::CycleRejected)
    );
    assert!(outcome
        .warnings
        .iter()
        .any(|w| matches!(w, BuildWarning::CycleRejected { .. })));

    let program = generate(session.dag());
    assert!(program.complete);
    assert_eq!(program.calls.len(), 2);
}

#[tokio::test]
async fn shared_producer_is_created_once() {
    // step3 <- step1, step2; both <- step0
    let (idx, oracle, master) = dependency_graph(&[vec![], vec![0], vec![0], vec![1, 2]]);
    let mut session = BuildSession::new(BuildRequest::new(master), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.steps, 4);
    assert_eq!(session.dag().len(), 4);
    assert_eq!(session.dag().edges().len(), 4);

    let shared = node_for(&session, "/step0").id.clone();
    assert_eq!(session.dag().consumers_of(&shared).count(), 2);
    let classified = oracle
        .calls()
        .iter()
        .filter(|c| matches!(c, tracegraph::oracle::scripted::OracleCall::Classify { .. }))
        .count();
    assert_eq!(classified, 4);

    let program = generate(session.dag());
    assert_eq!(program.calls.len(), 4);
    assert_eq!(program.calls[0].node, shared);
}

#[tokio::test]
async fn step_bound_closes_partial_build() {
    let (idx, oracle, master) = chain(5);
    let mut session =
        BuildSession::new(BuildRequest::new(master).with_max_steps(2), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert_eq!(outcome.closure, Closure::Partial);
    assert_eq!(outcome.steps, 2);
    assert_eq!(outcome.pending, vec![node_for(&session, "/step2").id.clone()]);
    assert!(matches!(
        outcome.warnings.last(),
        Some(BuildWarning::StepBoundReached {
            max_steps: 2,
            pending: 1
        })
    ));

    let program = generate(session.dag());
    assert!(!program.complete);
    assert_eq!(program.excluded, outcome.pending);
    assert_eq!(program.calls.len(), 2);
    assert!(program
        .warnings
        .iter()
        .any(|w| matches!(w, CodegenWarning::ProducerUnavailable { .. })));
    // the step3 header stays literal; the master still extracts from step3
    let first = &program.calls[0];
    assert!(first.headers.iter().all(|(_, v)| v.is_literal()));
    assert_eq!(program.calls[1].extraction_slots.len(), 1);
}

#[tokio::test]
async fn classification_failure_resolves_node_without_parts() {
    let (idx, oracle) = header_dependency();
    let oracle = oracle.failing_classification(&url("/a"));
    let mut session = BuildSession::new(BuildRequest::new(url("/a")), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert_eq!(outcome.steps, 1);
    assert!(session.dag().master_node().unwrap().dynamic_parts.is_empty());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BuildWarning::ClassificationFailed { .. }]
    ));
    assert_eq!(oracle.resolve_count(), 0);
}

#[tokio::test]
async fn uncaptured_target_becomes_literal_master() {
    let (idx, oracle) = header_dependency();
    let mut session = BuildSession::new(BuildRequest::new(url("/missing")), idx).unwrap();

    let outcome = session.run(&oracle).await;
    assert!(outcome.is_complete());
    assert!(matches!(
        outcome.warnings.as_slice(),
        [BuildWarning::MasterNotCaptured { .. }]
    ));
    assert!(oracle.calls().is_empty());

    let program = generate(session.dag());
    assert_eq!(program.calls.len(), 1);
    assert_eq!(program.calls[0].url.to_string(), url("/missing"));
}

#[tokio::test]
async fn query_and_cookie_inputs_keep_matching_literals() {
    let target = url("/v2/list?page=2");
    let mut capture = Capture::new();
    capture.push(
        CapturedRequest::new("GET", target.clone()).with_header("Cookie", "a=1; sid=1"),
        CapturedResponse::ok(),
    );
    let oracle = ScriptedOracle::new()
        .with_fragments(
            &target,
            vec![Fragment::query("page", "2"), Fragment::cookie("sid", "1")],
        )
        .with_decision(&target, "2", Decision::input("page"))
        .with_decision(&target, "1", Decision::input("sid"));
    let mut session = BuildSession::new(BuildRequest::new(target), index(capture)).unwrap();
    assert!(session.run(&oracle).await.is_complete());

    let program = generate(session.dag());
    let call = &program.calls[0];
    assert_eq!(
        call.url.to_string(),
        url("/v2/list?page={{input.page}}")
    );
    let (_, cookie) = call
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("cookie"))
        .unwrap();
    assert_eq!(cookie.to_string(), "a=1; sid={{input.sid}}");
    assert!(program.warnings.is_empty());
}

#[tokio::test]
async fn body_fragment_leaves_headers_alone() {
    let target = url("/cart");
    let mut capture = Capture::new();
    capture.push(
        CapturedRequest::new("POST", target.clone())
            .with_header("X-Cart", "c-42")
            .with_body(r#"{"cart":"c-42","qty":42}"#),
        CapturedResponse::ok(),
    );
    let oracle = ScriptedOracle::new()
        .with_fragments(&target, vec![Fragment::body("c-42")])
        .with_decision(&target, "c-42", Decision::input("cart"));
    let mut session = BuildSession::new(
        BuildRequest::new(target).with_method("POST"),
        index(capture),
    )
    .unwrap();
    session.run(&oracle).await;

    let program = generate(session.dag());
    let call = &program.calls[0];
    assert_eq!(
        call.body.as_ref().unwrap().to_string(),
        r#"{"cart":"{{input.cart}}","qty":42}"#
    );
    assert!(call.headers.iter().all(|(_, value)| value.is_literal()));
}

#[test]
fn invalid_requests_are_rejected_up_front() {
    let (idx, _) = header_dependency();
    assert!(matches!(
        BuildSession::new(BuildRequest::new("ftp://shop.test/a"), idx.clone()),
        Err(BuildError::InvalidTarget(_))
    ));
    assert!(matches!(
        BuildSession::new(BuildRequest::new(url("/a")).with_max_steps(0), idx.clone()),
        Err(BuildError::ZeroStepBound)
    ));
    assert!(matches!(
        BuildSession::new(BuildRequest::new(url("/a")).with_input(" ", "x"), idx),
        Err(BuildError::InvalidInputName(_))
    ));
    assert!(matches!(
        BuildSession::new(BuildRequest::new(url("/a")), index(Capture::new())),
        Err(BuildError::EmptyCapture)
    ));
}
