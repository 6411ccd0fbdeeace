//! Read-only views over a (possibly partial) DAG.

use std::collections::HashSet;
use std::fmt::{self, Write as _};

use serde::Serialize;

use super::builder::{BuildSession, BuildState};
use super::dag::{Dag, DependencyEdge, InputVariable};
use super::node::{NodeId, RequestNode, Resolution};

/// Pre-order walk from the master node toward its producers.
///
/// Producers are visited in edge-insertion order and every node appears
/// once, at the depth it was first reached.
pub fn walk_from_master(dag: &Dag) -> Vec<(usize, NodeId)> {
    let mut out = Vec::new();
    let Some(master) = dag.master() else {
        return out;
    };
    let mut seen: HashSet<&NodeId> = HashSet::new();
    let mut stack: Vec<(usize, &NodeId)> = vec![(0, master)];
    while let Some((depth, id)) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push((depth, id.clone()));
        let producers: Vec<&NodeId> = dag.producers_of(id).map(|e| &e.producer).collect();
        // Reverse so the first producer is popped first.
        for producer in producers.into_iter().rev() {
            if !seen.contains(producer) {
                stack.push((depth + 1, producer));
            }
        }
    }
    out
}

fn describe_part(dag: &Dag, node: &RequestNode, part: usize, resolution: &Resolution) -> String {
    match resolution {
        Resolution::Producer(producer) => {
            let via = dag
                .edge_for(&node.id, part)
                .and_then(|e| e.extraction.as_ref())
                .map(|x| x.to_string())
                .unwrap_or_else(|| "<no extraction>".to_string());
            format!("from {producer} via {via}")
        }
        other => other.to_string(),
    }
}

fn write_node(out: &mut String, dag: &Dag, node: &RequestNode, indent: &str, is_master: bool) {
    let marker = if is_master { "[master] " } else { "" };
    let _ = writeln!(
        out,
        "{indent}{marker}{} [{}] ({})",
        node.label(),
        node.id,
        node.status
    );
    for (i, part) in node.dynamic_parts.iter().enumerate() {
        let _ = writeln!(
            out,
            "{indent}    ? {} -> {}",
            part.fragment,
            describe_part(dag, node, i, &part.resolution)
        );
    }
    for extracted in &node.extracted_parts {
        let via = extracted
            .extraction
            .as_ref()
            .map(|x| x.to_string())
            .unwrap_or_else(|| "<no extraction>".to_string());
        let _ = writeln!(
            out,
            "{indent}    ! supplies {:?} to {} via {via}",
            extracted.value, extracted.consumer
        );
    }
}

/// Human-readable tree of the graph, master first.
pub fn render_tree(dag: &Dag) -> String {
    let mut out = String::new();
    let walk = walk_from_master(dag);
    if walk.is_empty() {
        out.push_str("(empty graph)\n");
    }
    let master = dag.master();
    for (depth, id) in &walk {
        if let Some(node) = dag.node(id) {
            let indent = "  ".repeat(*depth);
            write_node(&mut out, dag, node, &indent, Some(id) == master);
        }
    }

    let reached: HashSet<&NodeId> = walk.iter().map(|(_, id)| id).collect();
    let detached: Vec<&RequestNode> = dag.nodes().filter(|n| !reached.contains(&n.id)).collect();
    if !detached.is_empty() {
        out.push_str("detached:\n");
        for node in detached {
            write_node(&mut out, dag, node, "  ", false);
        }
    }

    if dag.inputs().next().is_some() {
        out.push_str("inputs:\n");
        for input in dag.inputs() {
            let _ = writeln!(
                out,
                "  {} (default: {}, used {}x)",
                input.name,
                input.default_value.as_deref().unwrap_or("-"),
                input.bindings.len()
            );
        }
    }
    out
}

fn dot_escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Graphviz rendering; edges point from producer to consumer.
pub fn render_dot(dag: &Dag) -> String {
    let mut out = String::from("digraph requests {\n  rankdir=LR;\n  node [shape=box];\n");
    for node in dag.nodes() {
        let shape = if Some(&node.id) == dag.master() {
            ", penwidth=2"
        } else {
            ""
        };
        let _ = writeln!(
            out,
            "  \"{}\" [label=\"{}\\n{}\"{}];",
            node.id.short(),
            dot_escape(&node.label()),
            node.status,
            shape
        );
    }
    for edge in dag.edges() {
        let label = edge
            .extraction
            .as_ref()
            .map(|x| dot_escape(&x.to_string()))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "  \"{}\" -> \"{}\" [label=\"{}\"];",
            edge.producer.short(),
            edge.consumer.short(),
            label
        );
    }
    out.push_str("}\n");
    out
}

/// Serializable view of a graph with nodes in discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct DagSnapshot<'a> {
    pub master: Option<&'a NodeId>,
    pub nodes: Vec<&'a RequestNode>,
    pub edges: &'a [DependencyEdge],
    pub inputs: Vec<&'a InputVariable>,
}

impl Dag {
    pub fn snapshot(&self) -> DagSnapshot<'_> {
        DagSnapshot {
            master: self.master(),
            nodes: self.nodes().collect(),
            edges: self.edges(),
            inputs: self.inputs().collect(),
        }
    }
}

/// Point-in-time view of a build session.
#[derive(Debug, Clone, Serialize)]
pub struct BuildProgress {
    pub state: BuildState,
    pub steps: usize,
    pub max_steps: usize,
    pub node_count: usize,
    pub edge_count: usize,
    pub worklist: Vec<NodeId>,
    pub in_process: Option<NodeId>,
    pub pending_parts: usize,
}

impl fmt::Display for BuildProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} | step {}/{} | {} nodes, {} edges | {} queued",
            self.state,
            self.steps,
            self.max_steps,
            self.node_count,
            self.edge_count,
            self.worklist.len()
        )?;
        if let Some(node) = &self.in_process {
            write!(f, " | in-process {node} ({} parts left)", self.pending_parts)?;
        }
        Ok(())
    }
}

impl BuildSession {
    pub fn progress(&self) -> BuildProgress {
        BuildProgress {
            state: self.state(),
            steps: self.steps(),
            max_steps: self.max_steps(),
            node_count: self.dag().len(),
            edge_count: self.dag().edges().len(),
            worklist: self.worklist().iter().cloned().collect(),
            in_process: self.in_process().map(|ip| ip.node.clone()),
            pending_parts: self.in_process().map(|ip| ip.pending.len()).unwrap_or(0),
        }
    }
}
