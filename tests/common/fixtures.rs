//! Capture and oracle fixtures
//!
//! Each fixture pairs a capture with a [`ScriptedOracle`] that knows the
//! intended dependency structure, so tests can assert on the engine alone.

use std::sync::Arc;

use tracegraph::capture::{
    Capture, CaptureIndex, CapturedRequest, CapturedResponse, InMemoryCaptureIndex,
};
use tracegraph::graph::{Extraction, Fragment};
use tracegraph::oracle::{Decision, ProducerRef, ScriptedOracle};

pub const BASE: &str = "https://shop.test";

pub fn url(path: &str) -> String {
    format!("{BASE}{path}")
}

pub fn index(capture: Capture) -> Arc<dyn CaptureIndex> {
    Arc::new(InMemoryCaptureIndex::new(capture))
}

/// `/a` sends header `x-token: t0k`, which `/b` returned in its response.
pub fn header_dependency() -> (Arc<dyn CaptureIndex>, ScriptedOracle) {
    let mut capture = Capture::new();
    capture.push(
        CapturedRequest::new("GET", url("/b")),
        CapturedResponse::ok().with_header("X-Token", "t0k"),
    );
    capture.push(
        CapturedRequest::new("GET", url("/a")).with_header("X-Token", "t0k"),
        CapturedResponse::ok().with_body("ok"),
    );
    let oracle = ScriptedOracle::new()
        .with_fragments(&url("/a"), vec![Fragment::header("x-token", "t0k")])
        .with_decision(
            &url("/a"),
            "t0k",
            Decision::producer(
                ProducerRef::get(url("/b")),
                Extraction::Header("x-token".into()),
            ),
        );
    (index(capture), oracle)
}

/// Linear chain `/step0 <- /step1 <- ... <- /step{n-1}`; the last step is the master.
///
/// Step `k + 1` sends `x-prev-k: tok-k`, returned by step `k` as `x-value`.
pub fn chain(n: usize) -> (Arc<dyn CaptureIndex>, ScriptedOracle, String) {
    let producers: Vec<Vec<usize>> = (0..n)
        .map(|k| k.checked_sub(1).into_iter().collect())
        .collect();
    dependency_graph(&producers)
}

/// Arbitrary dependency graph over `producers.len()` requests.
///
/// `producers[i]` lists the nodes whose responses request `i` needs; every
/// producer index must be smaller than `i`. The last request is the master.
pub fn dependency_graph(producers: &[Vec<usize>]) -> (Arc<dyn CaptureIndex>, ScriptedOracle, String) {
    let mut capture = Capture::new();
    let mut oracle = ScriptedOracle::new();
    for (i, needs) in producers.iter().enumerate() {
        let node_url = url(&format!("/step{i}"));
        let mut request = CapturedRequest::new("GET", node_url.clone());
        let mut fragments = Vec::new();
        for &p in needs {
            let header = format!("x-prev-{p}");
            let value = format!("tok-{p}");
            request = request.with_header(header.clone(), value.clone());
            fragments.push(Fragment::header(header, value.clone()));
            oracle = oracle.with_decision(
                &node_url,
                &value,
                Decision::producer(
                    ProducerRef::get(url(&format!("/step{p}"))),
                    Extraction::Header("x-value".into()),
                ),
            );
        }
        oracle = oracle.with_fragments(&node_url, fragments);
        capture.push(
            request,
            CapturedResponse::ok().with_header("X-Value", format!("tok-{i}")),
        );
    }
    let master = url(&format!("/step{}", producers.len().saturating_sub(1)));
    (index(capture), oracle, master)
}
