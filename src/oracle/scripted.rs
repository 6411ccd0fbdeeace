//! Scripted oracle for deterministic testing
//!
//! Returns pre-configured fragments and decisions keyed by request URL and
//! fragment value, and captures every call for later assertions. Anything
//! not scripted classifies as "no fragments" and resolves as `Constant`.
//!
//! # Example
//! ```
//! use tracegraph::graph::Fragment;
//! use tracegraph::oracle::{Decision, ProducerRef, ScriptedOracle};
//! use tracegraph::graph::Extraction;
//!
//! let oracle = ScriptedOracle::new()
//!     .with_fragments("https://api.test/a", vec![Fragment::header("x-token", "t0k")])
//!     .with_decision(
//!         "https://api.test/a",
//!         "t0k",
//!         Decision::producer(
//!             ProducerRef::get("https://api.test/b"),
//!             Extraction::Header("x-token".into()),
//!         ),
//!     );
//! assert!(oracle.calls().is_empty());
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::capture::normalize_url;
use crate::graph::{Dag, Fragment, RequestNode};

use super::{Decision, Oracle, OracleError};

/// One observed oracle invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleCall {
    Classify { url: String },
    Resolve { url: String, fragment: Fragment },
}

#[derive(Clone, Default)]
pub struct ScriptedOracle {
    fragments: HashMap<String, Vec<Fragment>>,
    decisions: HashMap<(String, String), Decision>,
    failing_classifications: HashSet<String>,
    failing_resolutions: HashSet<(String, String)>,
    calls: Arc<Mutex<Vec<OracleCall>>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments reported for requests to `url`
    pub fn with_fragments(mut self, url: &str, fragments: Vec<Fragment>) -> Self {
        self.fragments.insert(normalize_url(url), fragments);
        self
    }

    /// Decision for the fragment with `value` on requests to `url`
    pub fn with_decision(mut self, url: &str, value: &str, decision: Decision) -> Self {
        self.decisions
            .insert((normalize_url(url), value.to_string()), decision);
        self
    }

    /// Make classification of `url` fail
    pub fn failing_classification(mut self, url: &str) -> Self {
        self.failing_classifications.insert(normalize_url(url));
        self
    }

    /// Make resolution of `value` on `url` fail
    pub fn failing_resolution(mut self, url: &str, value: &str) -> Self {
        self.failing_resolutions
            .insert((normalize_url(url), value.to_string()));
        self
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls.lock().clone()
    }

    /// Number of resolve calls received so far
    pub fn resolve_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, OracleCall::Resolve { .. }))
            .count()
    }

    pub fn reset(&self) {
        self.calls.lock().clear();
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError> {
        let url = normalize_url(&node.url);
        self.calls
            .lock()
            .push(OracleCall::Classify { url: url.clone() });

        if self.failing_classifications.contains(&url) {
            return Err(OracleError::Request("scripted classification failure".into()));
        }
        Ok(self.fragments.get(&url).cloned().unwrap_or_default())
    }

    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        _dag: &Dag,
    ) -> Result<Decision, OracleError> {
        let key = (normalize_url(&node.url), fragment.value.clone());
        self.calls.lock().push(OracleCall::Resolve {
            url: key.0.clone(),
            fragment: fragment.clone(),
        });

        if self.failing_resolutions.contains(&key) {
            return Err(OracleError::Request("scripted resolution failure".into()));
        }
        Ok(self
            .decisions
            .get(&key)
            .cloned()
            .unwrap_or(Decision::Constant))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CookieJar;
    use crate::graph::{NodeRegistry, RequestCandidate};

    #[tokio::test]
    async fn unscripted_requests_fall_back_to_constant() {
        let mut dag = Dag::new(CookieJar::new());
        let (id, _) = NodeRegistry::new(&mut dag)
            .get_or_create(RequestCandidate::literal("GET", "https://t/a"));
        let node = dag.node(&id).unwrap().clone();
        let oracle = ScriptedOracle::new();

        assert!(oracle.classify_dynamic_parts(&node).await.unwrap().is_empty());
        let decision = oracle
            .resolve_fragment(&node, &Fragment::url("x"), &dag)
            .await
            .unwrap();
        assert_eq!(decision, Decision::Constant);
        assert_eq!(oracle.calls().len(), 2);
        assert_eq!(oracle.resolve_count(), 1);
    }

    #[tokio::test]
    async fn scripted_failures_surface_as_errors() {
        let mut dag = Dag::new(CookieJar::new());
        let (id, _) = NodeRegistry::new(&mut dag)
            .get_or_create(RequestCandidate::literal("GET", "https://t/a"));
        let node = dag.node(&id).unwrap().clone();
        let oracle = ScriptedOracle::new()
            .failing_classification("https://t/a")
            .failing_resolution("https://t/a", "v");

        assert!(oracle.classify_dynamic_parts(&node).await.is_err());
        assert!(oracle
            .resolve_fragment(&node, &Fragment::url("v"), &dag)
            .await
            .is_err());
    }
}
