use super::dag::Dag;
use super::identity::candidate_identity;
use super::node::{NodeId, NodeStatus, RequestCandidate, RequestNode};

/// Single point of node creation and lifecycle transitions for a [`Dag`].
pub struct NodeRegistry<'a> {
    dag: &'a mut Dag,
}

impl<'a> NodeRegistry<'a> {
    pub fn new(dag: &'a mut Dag) -> Self {
        Self { dag }
    }

    /// Return the canonical node for `candidate`, inserting it as `queued` if new.
    ///
    /// Compare-and-create keyed by canonical identity: an existing node is
    /// returned untouched with `is_new = false`.
    pub fn get_or_create(&mut self, candidate: RequestCandidate) -> (NodeId, bool) {
        let id = candidate_identity(&candidate);
        if self.dag.contains(&id) {
            return (id, false);
        }
        let seq = self.dag.order.len();
        let node = RequestNode::from_candidate(id.clone(), seq, candidate);
        tracing::debug!(node = %id, seq, request = %node.label(), "registered node");
        self.dag.nodes.insert(id.clone(), node);
        self.dag.order.push(id.clone());
        (id, true)
    }

    /// `queued -> in-process`
    pub fn begin(&mut self, id: &NodeId) {
        self.transition(id, NodeStatus::InProcess);
    }

    /// `in-process -> resolved`
    pub fn finish(&mut self, id: &NodeId) {
        self.transition(id, NodeStatus::Resolved);
    }

    fn transition(&mut self, id: &NodeId, to: NodeStatus) {
        if let Some(node) = self.dag.node_mut(id) {
            tracing::trace!(node = %id, from = %node.status, to = %to, "node status");
            node.status = to;
        }
    }
}
