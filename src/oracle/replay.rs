use std::collections::HashMap;

use async_trait::async_trait;

use crate::graph::{Dag, Fragment, NodeId, RequestNode};

use super::tape::{DecisionTape, DecisionTapeEntry};
use super::{Decision, Oracle, OracleError};

/// Answers from a recorded decision tape, keyed by node identity and fragment.
///
/// Requests the tape never saw classify as "no fragments" and resolve as
/// `Constant`. Recorded failures are replayed as failures.
pub struct ReplayOracle {
    name: String,
    classifications: HashMap<NodeId, Result<Vec<Fragment>, String>>,
    decisions: HashMap<(NodeId, Fragment), Result<Decision, String>>,
}

impl ReplayOracle {
    pub fn new(tape: &DecisionTape) -> Self {
        let mut classifications = HashMap::new();
        let mut decisions = HashMap::new();
        // Later entries win, matching what the last recorded build saw.
        for entry in &tape.entries {
            match entry {
                DecisionTapeEntry::Classification {
                    node, fragments, ..
                } => {
                    classifications.insert(node.clone(), Ok(fragments.clone()));
                }
                DecisionTapeEntry::Decision {
                    node,
                    fragment,
                    decision,
                    ..
                } => {
                    decisions.insert((node.clone(), fragment.clone()), Ok(decision.clone()));
                }
                DecisionTapeEntry::Failure {
                    node,
                    fragment: Some(fragment),
                    error,
                    ..
                } => {
                    decisions.insert((node.clone(), fragment.clone()), Err(error.clone()));
                }
                DecisionTapeEntry::Failure {
                    node,
                    fragment: None,
                    error,
                    ..
                } => {
                    classifications.insert(node.clone(), Err(error.clone()));
                }
                DecisionTapeEntry::Note { .. } => {}
            }
        }
        Self {
            name: format!("replay:{}", tape.oracle),
            classifications,
            decisions,
        }
    }

    pub fn decision_count(&self) -> usize {
        self.decisions.len()
    }
}

#[async_trait]
impl Oracle for ReplayOracle {
    fn name(&self) -> &str {
        &self.name
    }

    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError> {
        match self.classifications.get(&node.id) {
            Some(Ok(fragments)) => Ok(fragments.clone()),
            Some(Err(error)) => Err(OracleError::Request(error.clone())),
            None => {
                tracing::debug!(node = %node.id, "no recorded classification");
                Ok(Vec::new())
            }
        }
    }

    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        _dag: &Dag,
    ) -> Result<Decision, OracleError> {
        match self.decisions.get(&(node.id.clone(), fragment.clone())) {
            Some(Ok(decision)) => Ok(decision.clone()),
            Some(Err(error)) => Err(OracleError::Request(error.clone())),
            None => Ok(Decision::Constant),
        }
    }
}
