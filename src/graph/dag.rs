use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::CookieJar;

use super::node::{Extraction, NodeId, NodeStatus, RequestNode};

/// Reference to one dynamic part of one node.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartRef {
    pub node: NodeId,
    pub part: usize,
}

/// `producer -> consumer`: the producer's response supplies `consumer.dynamic_parts[part]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub producer: NodeId,
    pub consumer: NodeId,
    pub part: usize,
    pub extraction: Option<Extraction>,
}

/// A named value supplied by the caller at replay time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputVariable {
    pub name: String,
    /// Value supplied when the build was invoked, if any
    pub default_value: Option<String>,
    pub bindings: Vec<PartRef>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRejected {
    SelfLoop,
    /// The producer already depends on the consumer
    WouldCycle,
    UnknownNode(NodeId),
}

impl fmt::Display for EdgeRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EdgeRejected::SelfLoop => f.write_str("node cannot depend on itself"),
            EdgeRejected::WouldCycle => f.write_str("edge would close a dependency cycle"),
            EdgeRejected::UnknownNode(id) => write!(f, "unknown node {id}"),
        }
    }
}

/// Request nodes, dependency edges and input variables rooted at a master node.
///
/// Nodes are created only through [`NodeRegistry`](super::registry::NodeRegistry);
/// edges only through [`Dag::add_edge`], which refuses cycle-closing edges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Dag {
    pub(crate) nodes: BTreeMap<NodeId, RequestNode>,
    /// Node ids in discovery order
    pub(crate) order: Vec<NodeId>,
    pub(crate) edges: Vec<DependencyEdge>,
    pub(crate) master: Option<NodeId>,
    pub(crate) inputs: BTreeMap<String, InputVariable>,
    pub(crate) cookies: CookieJar,
}

impl Dag {
    pub fn new(cookies: CookieJar) -> Self {
        Self {
            cookies,
            ..Self::default()
        }
    }

    pub fn master(&self) -> Option<&NodeId> {
        self.master.as_ref()
    }

    pub fn master_node(&self) -> Option<&RequestNode> {
        self.master.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub(crate) fn set_master(&mut self, id: NodeId) {
        self.master = Some(id);
    }

    pub fn node(&self, id: &NodeId) -> Option<&RequestNode> {
        self.nodes.get(id)
    }

    pub(crate) fn node_mut(&mut self, id: &NodeId) -> Option<&mut RequestNode> {
        self.nodes.get_mut(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Nodes in discovery order.
    pub fn nodes(&self) -> impl Iterator<Item = &RequestNode> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn inputs(&self) -> impl Iterator<Item = &InputVariable> {
        self.inputs.values()
    }

    pub fn input(&self, name: &str) -> Option<&InputVariable> {
        self.inputs.get(name)
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn nodes_with_status(&self, status: NodeStatus) -> Vec<&NodeId> {
        self.nodes()
            .filter(|n| n.status == status)
            .map(|n| &n.id)
            .collect()
    }

    /// Edges whose consumer is `id`, in insertion order.
    pub fn producers_of<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| &e.consumer == id)
    }

    /// Edges whose producer is `id`, in insertion order.
    pub fn consumers_of<'a>(&'a self, id: &'a NodeId) -> impl Iterator<Item = &'a DependencyEdge> {
        self.edges.iter().filter(move |e| &e.producer == id)
    }

    pub fn edge_for(&self, consumer: &NodeId, part: usize) -> Option<&DependencyEdge> {
        self.edges
            .iter()
            .find(|e| &e.consumer == consumer && e.part == part)
    }

    /// True when `node` transitively depends on `on` through producer edges.
    pub fn depends_on(&self, node: &NodeId, on: &NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen: HashSet<&NodeId> = HashSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            for edge in self.producers_of(current) {
                if &edge.producer == on {
                    return true;
                }
                stack.push(&edge.producer);
            }
        }
        false
    }

    /// Add a dependency edge unless it would make a node depend on itself.
    ///
    /// Returns `Ok(false)` when the identical edge already exists.
    pub fn add_edge(&mut self, edge: DependencyEdge) -> Result<bool, EdgeRejected> {
        for id in [&edge.producer, &edge.consumer] {
            if !self.contains(id) {
                return Err(EdgeRejected::UnknownNode(id.clone()));
            }
        }
        if edge.producer == edge.consumer {
            return Err(EdgeRejected::SelfLoop);
        }
        if self.edges.iter().any(|e| {
            e.producer == edge.producer && e.consumer == edge.consumer && e.part == edge.part
        }) {
            return Ok(false);
        }
        if self.depends_on(&edge.producer, &edge.consumer) {
            return Err(EdgeRejected::WouldCycle);
        }
        self.edges.push(edge);
        Ok(true)
    }

    /// Register a caller-supplied input value.
    pub(crate) fn seed_input(&mut self, name: &str, value: &str) {
        let entry = self.inputs.entry(name.to_string()).or_insert_with(|| InputVariable {
            name: name.to_string(),
            default_value: None,
            bindings: Vec::new(),
        });
        entry.default_value = Some(value.to_string());
    }

    /// Bind a dynamic part to the input variable `name`, creating it on first use.
    pub(crate) fn bind_input(&mut self, name: &str, part: PartRef) {
        let entry = self.inputs.entry(name.to_string()).or_insert_with(|| InputVariable {
            name: name.to_string(),
            default_value: None,
            bindings: Vec::new(),
        });
        if !entry.bindings.contains(&part) {
            entry.bindings.push(part);
        }
    }

    /// Whether any node reaches itself through producer edges.
    pub fn has_cycle(&self) -> bool {
        self.nodes.keys().any(|id| self.depends_on(id, id))
    }

    /// Nodes not reachable backward from the master node.
    pub fn orphans(&self) -> Vec<&NodeId> {
        let Some(master) = &self.master else {
            return self.order.iter().collect();
        };
        let mut reachable: HashSet<&NodeId> = HashSet::new();
        let mut stack = vec![master];
        while let Some(current) = stack.pop() {
            if !reachable.insert(current) {
                continue;
            }
            stack.extend(self.producers_of(current).map(|e| &e.producer));
        }
        self.order
            .iter()
            .filter(|id| !reachable.contains(id))
            .collect()
    }
}
