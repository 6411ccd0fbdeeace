//! End-to-end pipeline from HAR files on disk
//!
//! Loads a recorded checkout flow, builds with the heuristic oracle and
//! renders every output format; decision tapes are recorded and replayed
//! through real files.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracegraph::capture::{Capture, CaptureFilter, CaptureIndex, CookieJar, InMemoryCaptureIndex};
use tracegraph::codegen::{generate, render_plan, render_python, GeneratedProgram};
use tracegraph::graph::{BuildRequest, BuildSession, Dag};
use tracegraph::oracle::tape::{DecisionTape, DecisionTapeEntry, DecisionTapeWriter};
use tracegraph::oracle::{HeuristicOracle, Oracle, RecordingOracle, ReplayOracle};

use super::common::har::HarFixture;

const ORDER: &str = "https://shop.test/api/order/c-7781223344aa55bb";

fn load(fixture: &HarFixture) -> Arc<dyn CaptureIndex> {
    let capture = Capture::from_har_path(&fixture.path, &CaptureFilter::default()).unwrap();
    Arc::new(InMemoryCaptureIndex::new(capture))
}

fn inputs() -> BTreeMap<String, String> {
    BTreeMap::from([("query".to_string(), "trail shoes".to_string())])
}

fn request(cookies: CookieJar) -> BuildRequest {
    let mut request = BuildRequest::new(ORDER)
        .with_method("POST")
        .with_cookies(cookies);
    request.inputs = inputs();
    request
}

async fn build(index: Arc<dyn CaptureIndex>, cookies: CookieJar, oracle: &dyn Oracle) -> Dag {
    let mut session = BuildSession::new(request(cookies), index).unwrap();
    let outcome = session.run(oracle).await;
    assert!(outcome.is_complete(), "warnings: {:?}", outcome.warnings);
    session.into_dag()
}

async fn checkout_program(fixture: &HarFixture) -> GeneratedProgram {
    let jar_path = fixture.write("cookies.json", r#"[{"name": "sid", "value": "ignored"}]"#);
    let cookies = CookieJar::from_path(&jar_path).unwrap();
    let index = load(fixture);
    let oracle = HeuristicOracle::new(index.clone()).with_inputs(inputs());
    let dag = build(index, cookies, &oracle).await;
    generate(&dag)
}

#[test]
fn static_resources_are_skipped_by_default() {
    let fixture = HarFixture::checkout();
    let kept = Capture::from_har_path(&fixture.path, &CaptureFilter::default()).unwrap();
    let all = Capture::from_har_path(&fixture.path, &CaptureFilter::keep_all()).unwrap();

    assert_eq!(all.len(), 5);
    assert_eq!(kept.len(), 3);
    assert!(kept
        .records
        .iter()
        .all(|r| !r.request.url.contains("/static/") && !r.request.url.contains("/img/")));
}

#[tokio::test]
async fn heuristic_build_parameterizes_the_checkout() {
    let fixture = HarFixture::checkout();
    let program = checkout_program(&fixture).await;

    assert!(program.complete, "warnings: {:?}", program.warnings);
    assert_eq!(program.calls.len(), 3);
    assert_eq!(program.cookies, vec!["sid".to_string()]);
    assert_eq!(program.inputs.len(), 1);
    assert_eq!(program.inputs[0].name, "query");

    let cart = &program.calls[0];
    assert!(cart.url.to_string().contains("{{input.query}}"));
    let order = &program.calls[2];
    assert_eq!(order.method, "POST");
    assert_eq!(order.url.to_string(), "https://shop.test/api/order/{{v0_id}}");
    assert_eq!(
        order.body.as_ref().unwrap().to_string(),
        r#"{"cart":"{{v0_id}}","qty":1}"#
    );
    let csrf = order
        .headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("x-csrf-token"))
        .map(|(_, value)| value.to_string());
    assert_eq!(csrf.as_deref(), Some("{{v1_x_csrf_token}}"));
}

#[tokio::test]
async fn every_output_format_renders() {
    let fixture = HarFixture::checkout();
    let program = checkout_program(&fixture).await;

    let python = render_python(&program);
    assert!(python.contains("import requests"));
    assert!(python.contains("v0_id = json_pointer(resp0, \"/cart/id\")"));
    assert!(python.contains("cookies[\"sid\"]"));
    assert!(python.contains("\"--query\""));

    let plan = render_plan(&program);
    assert!(plan.contains("[2] POST https://shop.test/api/order/{{v0_id}}"));
    assert!(!plan.contains("incomplete:"));

    let json: serde_json::Value = serde_json::from_str(&program.to_json().unwrap()).unwrap();
    assert_eq!(json["calls"].as_array().unwrap().len(), 3);
    assert_eq!(json["complete"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn session_cookie_without_jar_is_extracted_from_login() {
    let fixture = HarFixture::checkout();
    let index = load(&fixture);
    let oracle = HeuristicOracle::new(index.clone()).with_inputs(inputs());
    let dag = build(index, CookieJar::new(), &oracle).await;
    let program = generate(&dag);

    assert!(program.cookies.is_empty());
    let python = render_python(&program);
    assert!(python.contains("cookie(resp0, \"sid\")"));
}

#[tokio::test]
async fn recorded_tape_replays_the_same_build() {
    let fixture = HarFixture::checkout();
    let tape_path = fixture.dir.path().join("decisions.jsonl");
    let index = load(&fixture);

    let live: Arc<dyn Oracle> = Arc::new(HeuristicOracle::new(index.clone()).with_inputs(inputs()));
    let writer = Arc::new(DecisionTapeWriter::create(&tape_path, live.name()).unwrap());
    let recording = RecordingOracle::new(live, writer);
    let recorded = build(index.clone(), CookieJar::new(), &recording).await;

    let tape = DecisionTape::read_jsonl_from_path(&tape_path).unwrap();
    assert_eq!(tape.oracle, "heuristic");
    let classifications = tape
        .entries
        .iter()
        .filter(|e| matches!(e, DecisionTapeEntry::Classification { .. }))
        .count();
    assert_eq!(classifications, recorded.len());

    let replay = ReplayOracle::new(&tape);
    let replayed = build(load(&fixture), CookieJar::new(), &replay).await;

    assert_eq!(
        serde_json::to_string(&recorded).unwrap(),
        serde_json::to_string(&replayed).unwrap()
    );
    assert_eq!(generate(&recorded), generate(&replayed));
}
