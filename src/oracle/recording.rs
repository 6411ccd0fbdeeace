use std::sync::Arc;

use async_trait::async_trait;

use crate::graph::{Dag, Fragment, RequestNode};

use super::tape::{now_ms, DecisionTapeEntry, DecisionTapeWriter};
use super::{Decision, Oracle, OracleError};

/// Forwards to an inner oracle and appends every answer to a decision tape.
#[derive(Clone)]
pub struct RecordingOracle {
    inner: Arc<dyn Oracle>,
    writer: Arc<DecisionTapeWriter>,
}

impl RecordingOracle {
    pub fn new(inner: Arc<dyn Oracle>, writer: Arc<DecisionTapeWriter>) -> Self {
        Self { inner, writer }
    }

    fn record(&self, entry: DecisionTapeEntry) {
        if let Err(err) = self.writer.append(entry) {
            tracing::debug!(error = %err, "failed to append to decision tape");
        }
    }

    fn record_failure(&self, node: &RequestNode, fragment: Option<&Fragment>, err: &OracleError) {
        self.record(DecisionTapeEntry::Failure {
            seq: self.writer.next_seq(),
            ts_ms: now_ms(),
            node: node.id.clone(),
            fragment: fragment.cloned(),
            error: err.to_string(),
        });
    }
}

#[async_trait]
impl Oracle for RecordingOracle {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError> {
        let result = self.inner.classify_dynamic_parts(node).await;
        match &result {
            Ok(fragments) => self.record(DecisionTapeEntry::Classification {
                seq: self.writer.next_seq(),
                ts_ms: now_ms(),
                node: node.id.clone(),
                request: node.label(),
                fragments: fragments.clone(),
            }),
            Err(err) => self.record_failure(node, None, err),
        }
        result
    }

    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        dag: &Dag,
    ) -> Result<Decision, OracleError> {
        let result = self.inner.resolve_fragment(node, fragment, dag).await;
        match &result {
            Ok(decision) => self.record(DecisionTapeEntry::Decision {
                seq: self.writer.next_seq(),
                ts_ms: now_ms(),
                node: node.id.clone(),
                fragment: fragment.clone(),
                decision: decision.clone(),
            }),
            Err(err) => self.record_failure(node, Some(fragment), err),
        }
        result
    }
}
