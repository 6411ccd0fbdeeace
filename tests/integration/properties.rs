//! Property tests over randomly shaped dependency graphs
//!
//! Request `i` depends on a random subset of requests `p < i`; the last
//! request is the master. Whatever the shape, the build must stay acyclic
//! and connected, and the program must emit producers before consumers.

use std::collections::{BTreeSet, HashMap};

use proptest::prelude::*;
use tracegraph::codegen::generate;
use tracegraph::graph::{BuildRequest, BuildSession, Closure};

use super::common::fixtures::dependency_graph;

/// Producer lists where request `i` may depend on any `p < i`.
fn graph_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    prop::collection::vec(any::<u8>(), 1..8).prop_map(|masks| {
        masks
            .iter()
            .enumerate()
            .map(|(i, mask)| (0..i).filter(|p| mask & (1 << p) != 0).collect())
            .collect()
    })
}

/// Number of requests the master transitively depends on, itself included.
fn reachable(producers: &[Vec<usize>]) -> usize {
    let mut seen = BTreeSet::new();
    let mut stack = vec![producers.len() - 1];
    while let Some(i) = stack.pop() {
        if seen.insert(i) {
            stack.extend(producers[i].iter().copied());
        }
    }
    seen.len()
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    #[test]
    fn complete_builds_are_acyclic_and_ordered(producers in graph_strategy()) {
        let expected = reachable(&producers);
        let (idx, oracle, master) = dependency_graph(&producers);
        let mut session = BuildSession::new(BuildRequest::new(master), idx).unwrap();
        let outcome = runtime().block_on(session.run(&oracle));

        prop_assert!(outcome.is_complete());
        prop_assert_eq!(outcome.steps, expected);
        let dag = session.dag();
        prop_assert_eq!(dag.len(), expected);
        prop_assert!(!dag.has_cycle());
        prop_assert!(dag.orphans().is_empty());

        let program = generate(dag);
        prop_assert!(program.complete);
        prop_assert_eq!(program.calls.len(), expected);
        prop_assert_eq!(Some(&program.calls[expected - 1].node), dag.master());
        let position: HashMap<_, _> = program
            .calls
            .iter()
            .map(|c| (c.node.clone(), c.index))
            .collect();
        for edge in dag.edges() {
            prop_assert!(position[&edge.producer] < position[&edge.consumer]);
        }
    }

    #[test]
    fn builds_are_deterministic(producers in graph_strategy()) {
        let run = || {
            let (idx, oracle, master) = dependency_graph(&producers);
            let mut session = BuildSession::new(BuildRequest::new(master), idx).unwrap();
            runtime().block_on(session.run(&oracle));
            let dag = serde_json::to_string(session.dag()).unwrap();
            let program = generate(session.dag()).to_json().unwrap();
            (dag, program)
        };
        prop_assert_eq!(run(), run());
    }

    #[test]
    fn step_bound_below_reachable_closes_partial(
        producers in graph_strategy(),
        cut in 1usize..8,
    ) {
        let expected = reachable(&producers);
        prop_assume!(cut < expected);
        let (idx, oracle, master) = dependency_graph(&producers);
        let mut session =
            BuildSession::new(BuildRequest::new(master).with_max_steps(cut), idx).unwrap();
        let outcome = runtime().block_on(session.run(&oracle));

        prop_assert_eq!(outcome.closure, Closure::Partial);
        prop_assert_eq!(outcome.steps, cut);
        prop_assert!(!outcome.pending.is_empty());
        prop_assert!(!session.dag().has_cycle());

        let program = generate(session.dag());
        prop_assert!(!program.complete);
        prop_assert!(program.calls.len() <= cut);
    }
}
