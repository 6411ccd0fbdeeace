//! Worklist-driven DAG construction.
//!
//! A [`BuildSession`] grows the dependency graph backward from the master
//! node. All state (worklist, in-process node and its pending parts, step
//! counter, terminal state) is explicit so the build can be advanced one
//! unit at a time, inspected between units, or run to closure.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::capture::url::is_http_url;
use crate::capture::{CaptureIndex, CookieJar, RecordId};
use crate::error::BuildError;
use crate::oracle::{Decision, Oracle, ProducerRef};

use super::dag::{Dag, DependencyEdge, PartRef};
use super::node::{
    ConstantReason, DynamicPart, ExtractedPart, Extraction, Fragment, NodeId, RequestCandidate,
    Resolution,
};
use super::registry::NodeRegistry;

pub const DEFAULT_MAX_STEPS: usize = 20;

/// Build invocation: target, capture-independent inputs and the step bound.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub target_url: String,
    pub method: String,
    /// Named values the caller already knows (e.g. a search term)
    pub inputs: BTreeMap<String, String>,
    pub cookies: CookieJar,
    pub max_steps: usize,
}

impl BuildRequest {
    pub fn new(target_url: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            method: "GET".to_string(),
            inputs: BTreeMap::new(),
            cookies: CookieJar::new(),
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_input(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inputs.insert(name.into(), value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: CookieJar) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Closure {
    /// The worklist emptied
    Complete,
    /// The step bound was reached with work left
    Partial,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "closure", rename_all = "snake_case")]
pub enum BuildState {
    Building,
    Closed(Closure),
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildState::Building => f.write_str("building"),
            BuildState::Closed(Closure::Complete) => f.write_str("closed (complete)"),
            BuildState::Closed(Closure::Partial) => f.write_str("closed (partial)"),
        }
    }
}

/// Non-fatal conditions recorded during a build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildWarning {
    /// The target is not in the capture; the master is a literal request
    MasterNotCaptured { url: String },
    ClassificationFailed { node: NodeId, error: String },
    NoDecision {
        node: NodeId,
        fragment: Fragment,
        error: String,
    },
    ProducerMissing {
        node: NodeId,
        fragment: Fragment,
        target: String,
    },
    CycleRejected {
        node: NodeId,
        fragment: Fragment,
        producer: NodeId,
    },
    StepBoundReached { max_steps: usize, pending: usize },
}

impl fmt::Display for BuildWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildWarning::MasterNotCaptured { url } => {
                write!(f, "target {url} not found in capture; using literal request")
            }
            BuildWarning::ClassificationFailed { node, error } => {
                write!(f, "node {node}: classification failed: {error}")
            }
            BuildWarning::NoDecision {
                node,
                fragment,
                error,
            } => write!(f, "node {node}: no decision for {fragment}: {error}"),
            BuildWarning::ProducerMissing {
                node,
                fragment,
                target,
            } => write!(
                f,
                "node {node}: producer {target} for {fragment} not in capture"
            ),
            BuildWarning::CycleRejected {
                node,
                fragment,
                producer,
            } => write!(
                f,
                "node {node}: producer {producer} for {fragment} would create a cycle"
            ),
            BuildWarning::StepBoundReached { max_steps, pending } => write!(
                f,
                "step bound {max_steps} reached with {pending} node(s) unresolved"
            ),
        }
    }
}

/// The node currently being processed and its not-yet-decided parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InProcess {
    pub node: NodeId,
    pub pending: VecDeque<usize>,
}

/// What a single [`BuildSession::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepEvent {
    /// A node was popped off the worklist and classified
    Popped { node: NodeId, parts: usize },
    PartResolved { node: NodeId, part: usize },
    NodeResolved(NodeId),
    Closed(Closure),
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub closure: Closure,
    pub steps: usize,
    pub warnings: Vec<BuildWarning>,
    /// Nodes left queued or in-process
    pub pending: Vec<NodeId>,
}

impl BuildOutcome {
    pub fn is_complete(&self) -> bool {
        self.closure == Closure::Complete
    }
}

/// Explicit build context owned by the builder; the only writer of its [`Dag`].
pub struct BuildSession {
    index: Arc<dyn CaptureIndex>,
    dag: Dag,
    worklist: VecDeque<NodeId>,
    in_process: Option<InProcess>,
    steps: usize,
    max_steps: usize,
    state: BuildState,
    warnings: Vec<BuildWarning>,
    /// Nodes known only literally; they resolve with no dynamic parts
    terminal: HashSet<NodeId>,
}

impl BuildSession {
    /// Validate the request and seed the worklist with the master node.
    pub fn new(request: BuildRequest, index: Arc<dyn CaptureIndex>) -> Result<Self, BuildError> {
        let target = request.target_url.trim().to_string();
        if !is_http_url(&target) {
            return Err(BuildError::InvalidTarget(request.target_url));
        }
        if index.is_empty() {
            return Err(BuildError::EmptyCapture);
        }
        if request.max_steps == 0 {
            return Err(BuildError::ZeroStepBound);
        }
        if let Some(name) = request.inputs.keys().find(|n| n.trim().is_empty()) {
            return Err(BuildError::InvalidInputName(name.clone()));
        }

        let mut dag = Dag::new(request.cookies);
        for (name, value) in &request.inputs {
            dag.seed_input(name.trim(), value);
        }

        let method = match request.method.trim() {
            "" => "GET".to_string(),
            m => m.to_uppercase(),
        };
        let captured = {
            let exact = index.lookup(&method, &target);
            let records = if exact.is_empty() {
                index.lookup_any(&target)
            } else {
                exact
            };
            // The last occurrence has the most preceding exchanges to draw producers from.
            records.last().map(|r| RequestCandidate::from_record(r))
        };

        let mut warnings = Vec::new();
        let mut terminal = HashSet::new();
        let candidate = match captured {
            Some(candidate) => candidate,
            None => {
                tracing::warn!(url = %target, "target not found in capture");
                warnings.push(BuildWarning::MasterNotCaptured {
                    url: target.clone(),
                });
                RequestCandidate::literal(method, target)
            }
        };
        let is_literal = candidate.record.is_none();
        let (master, _) = NodeRegistry::new(&mut dag).get_or_create(candidate);
        if is_literal {
            terminal.insert(master.clone());
        }
        dag.set_master(master.clone());

        tracing::info!(
            master = %master,
            max_steps = request.max_steps,
            records = index.len(),
            "build session started"
        );

        Ok(Self {
            index,
            dag,
            worklist: VecDeque::from([master]),
            in_process: None,
            steps: 0,
            max_steps: request.max_steps,
            state: BuildState::Building,
            warnings,
            terminal,
        })
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn into_dag(self) -> Dag {
        self.dag
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    pub fn worklist(&self) -> &VecDeque<NodeId> {
        &self.worklist
    }

    pub fn in_process(&self) -> Option<&InProcess> {
        self.in_process.as_ref()
    }

    pub fn warnings(&self) -> &[BuildWarning] {
        &self.warnings
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, BuildState::Closed(_))
    }

    /// Outcome of a closed build; `None` while still building.
    pub fn outcome(&self) -> Option<BuildOutcome> {
        match self.state {
            BuildState::Closed(closure) => Some(self.closed_outcome(closure)),
            BuildState::Building => None,
        }
    }

    fn closed_outcome(&self, closure: Closure) -> BuildOutcome {
        BuildOutcome {
            closure,
            steps: self.steps,
            warnings: self.warnings.clone(),
            pending: self
                .dag
                .nodes()
                .filter(|n| !n.is_resolved())
                .map(|n| n.id.clone())
                .collect(),
        }
    }

    /// Run until the worklist empties or the step bound is reached.
    pub async fn run(&mut self, oracle: &dyn Oracle) -> BuildOutcome {
        let closure = loop {
            if let StepEvent::Closed(closure) = self.advance(oracle).await {
                break closure;
            }
        };
        let outcome = self.closed_outcome(closure);
        tracing::info!(
            closure = ?outcome.closure,
            steps = outcome.steps,
            nodes = self.dag.len(),
            warnings = outcome.warnings.len(),
            "build finished"
        );
        outcome
    }

    /// Process one full worklist entry. Returns the resolved node, or `None`
    /// once the session is closed.
    pub async fn step(&mut self, oracle: &dyn Oracle) -> Option<NodeId> {
        loop {
            match self.advance(oracle).await {
                StepEvent::NodeResolved(id) => return Some(id),
                StepEvent::Closed(_) => return None,
                StepEvent::Popped { .. } | StepEvent::PartResolved { .. } => {}
            }
        }
    }

    /// Advance by the smallest unit: finish a pending part, finish the
    /// in-process node, or pop the next node.
    pub async fn advance(&mut self, oracle: &dyn Oracle) -> StepEvent {
        if let BuildState::Closed(closure) = self.state {
            return StepEvent::Closed(closure);
        }

        let current = self
            .in_process
            .as_mut()
            .map(|ip| (ip.node.clone(), ip.pending.pop_front()));
        match current {
            Some((node, Some(part))) => {
                self.resolve_part(oracle, &node, part).await;
                StepEvent::PartResolved { node, part }
            }
            Some((node, None)) => {
                NodeRegistry::new(&mut self.dag).finish(&node);
                self.in_process = None;
                tracing::debug!(node = %node, "node resolved");
                StepEvent::NodeResolved(node)
            }
            None => self.pop_next(oracle).await,
        }
    }

    async fn pop_next(&mut self, oracle: &dyn Oracle) -> StepEvent {
        if self.worklist.is_empty() {
            self.state = BuildState::Closed(Closure::Complete);
            return StepEvent::Closed(Closure::Complete);
        }
        if self.steps >= self.max_steps {
            let pending = self.worklist.len();
            self.warn(BuildWarning::StepBoundReached {
                max_steps: self.max_steps,
                pending,
            });
            self.state = BuildState::Closed(Closure::Partial);
            return StepEvent::Closed(Closure::Partial);
        }
        let Some(id) = self.worklist.pop_front() else {
            return StepEvent::Closed(Closure::Complete);
        };
        self.steps += 1;
        NodeRegistry::new(&mut self.dag).begin(&id);

        let fragments = if self.terminal.contains(&id) {
            Vec::new()
        } else {
            self.classify(oracle, &id).await
        };
        let parts = fragments.len();
        if let Some(node) = self.dag.node_mut(&id) {
            node.dynamic_parts = fragments.into_iter().map(DynamicPart::unresolved).collect();
            tracing::info!(
                step = self.steps,
                node = %id,
                request = %node.label(),
                parts,
                oracle = oracle.name(),
                "processing node"
            );
        }
        self.in_process = Some(InProcess {
            node: id.clone(),
            pending: (0..parts).collect(),
        });
        StepEvent::Popped { node: id, parts }
    }

    async fn classify(&mut self, oracle: &dyn Oracle, id: &NodeId) -> Vec<Fragment> {
        let result = match self.dag.node(id) {
            Some(node) => oracle.classify_dynamic_parts(node).await,
            None => return Vec::new(),
        };
        match result {
            Ok(fragments) => {
                let mut seen = HashSet::new();
                fragments
                    .into_iter()
                    .filter(|f| !f.value.is_empty())
                    .filter(|f| seen.insert(f.clone()))
                    .collect()
            }
            Err(err) => {
                self.warn(BuildWarning::ClassificationFailed {
                    node: id.clone(),
                    error: err.to_string(),
                });
                Vec::new()
            }
        }
    }

    async fn resolve_part(&mut self, oracle: &dyn Oracle, id: &NodeId, part: usize) {
        let Some(node) = self.dag.node(id) else {
            return;
        };
        let Some(fragment) = node.dynamic_parts.get(part).map(|p| p.fragment.clone()) else {
            return;
        };
        let consumer_record = node.record;
        let decision = oracle.resolve_fragment(node, &fragment, &self.dag).await;
        tracing::debug!(node = %id, fragment = %fragment, decision = ?decision, "oracle decision");

        let resolution = match decision {
            Err(err) => {
                self.warn(BuildWarning::NoDecision {
                    node: id.clone(),
                    fragment,
                    error: err.to_string(),
                });
                Resolution::Constant(ConstantReason::NoDecision)
            }
            Ok(Decision::Constant) => Resolution::Constant(ConstantReason::Classified),
            Ok(Decision::InputVariable { name }) => {
                let name = name.trim();
                if name.is_empty() {
                    self.warn(BuildWarning::NoDecision {
                        node: id.clone(),
                        fragment,
                        error: "empty input variable name".to_string(),
                    });
                    Resolution::Constant(ConstantReason::NoDecision)
                } else {
                    self.dag.bind_input(
                        name,
                        PartRef {
                            node: id.clone(),
                            part,
                        },
                    );
                    Resolution::Input(name.to_string())
                }
            }
            Ok(Decision::Producer { target, extraction }) => {
                self.bind_producer(id, part, fragment, target, extraction, consumer_record)
            }
        };

        if let Some(p) = self
            .dag
            .node_mut(id)
            .and_then(|n| n.dynamic_parts.get_mut(part))
        {
            p.resolution = resolution;
        }
    }

    fn bind_producer(
        &mut self,
        consumer: &NodeId,
        part: usize,
        fragment: Fragment,
        target: ProducerRef,
        extraction: Option<Extraction>,
        consumer_record: Option<RecordId>,
    ) -> Resolution {
        let Some(candidate) = self.producer_candidate(&target, consumer_record) else {
            self.warn(BuildWarning::ProducerMissing {
                node: consumer.clone(),
                fragment,
                target: target.to_string(),
            });
            return Resolution::Constant(ConstantReason::ProducerMissing);
        };

        let (producer, is_new) = NodeRegistry::new(&mut self.dag).get_or_create(candidate);
        let edge = DependencyEdge {
            producer: producer.clone(),
            consumer: consumer.clone(),
            part,
            extraction: extraction.clone(),
        };
        match self.dag.add_edge(edge) {
            Ok(_) => {
                if let Some(node) = self.dag.node_mut(&producer) {
                    node.extracted_parts.push(ExtractedPart {
                        value: fragment.value.clone(),
                        consumer: consumer.clone(),
                        part,
                        extraction,
                    });
                }
                if is_new {
                    self.worklist.push_back(producer.clone());
                }
                Resolution::Producer(producer)
            }
            Err(rejected) => {
                tracing::debug!(node = %consumer, producer = %producer, reason = %rejected, "edge rejected");
                self.warn(BuildWarning::CycleRejected {
                    node: consumer.clone(),
                    fragment,
                    producer,
                });
                Resolution::Constant(ConstantReason::CycleRejected)
            }
        }
    }

    /// Capture record for a producer reference. For URL references with
    /// several matches, the latest record preceding the consumer wins.
    fn producer_candidate(
        &self,
        target: &ProducerRef,
        consumer_record: Option<RecordId>,
    ) -> Option<RequestCandidate> {
        match target {
            ProducerRef::Record { id } => self.index.record(*id).map(RequestCandidate::from_record),
            ProducerRef::Url { method, url } => {
                let records = match method {
                    Some(m) => self.index.lookup(m, url),
                    None => self.index.lookup_any(url),
                };
                consumer_record
                    .and_then(|c| records.iter().rev().find(|r| r.id < c).copied())
                    .or_else(|| records.first().copied())
                    .map(RequestCandidate::from_record)
            }
        }
    }

    fn warn(&mut self, warning: BuildWarning) {
        tracing::warn!(warning = %warning, "build warning");
        self.warnings.push(warning);
    }
}
