//! Turning a request DAG into an ordered, parameterized call sequence.
//!
//! [`generate`] produces a [`GeneratedProgram`]; the renderers turn it into
//! a plain-text plan or a Python `requests` script. JSON output is the
//! program's serde form.

pub mod generator;
pub mod plan;
pub mod python;
pub mod template;

use std::fmt;

use serde::Serialize;

use crate::graph::{Extraction, NodeId};

pub use generator::{emission_order, generate};
pub use plan::render_plan;
pub use python::render_python;
pub use template::{form_encode, percent_encode, PairSyntax, Segment, Template};

/// Non-fatal conditions found while emitting code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CodegenWarning {
    /// Node was still queued or in-process when the build closed
    ExcludedUnresolved { node: NodeId },
    /// A producer-bound fragment has no extraction rule; the node is skipped
    MissingExtraction { node: NodeId, fragment: String },
    /// The producer was not emitted; the fragment stays literal
    ProducerUnavailable {
        node: NodeId,
        fragment: String,
        producer: NodeId,
    },
    /// The fragment value does not occur where its location says
    FragmentNotFound { node: NodeId, fragment: String },
    CycleDetected { node: NodeId },
}

impl fmt::Display for CodegenWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodegenWarning::ExcludedUnresolved { node } => {
                write!(f, "node {node} is unresolved and was excluded")
            }
            CodegenWarning::MissingExtraction { node, fragment } => write!(
                f,
                "node {node}: no extraction rule for {fragment}; call skipped"
            ),
            CodegenWarning::ProducerUnavailable {
                node,
                fragment,
                producer,
            } => write!(
                f,
                "node {node}: producer {producer} was not emitted; {fragment} kept literal"
            ),
            CodegenWarning::FragmentNotFound { node, fragment } => {
                write!(f, "node {node}: {fragment} not found in request; kept literal")
            }
            CodegenWarning::CycleDetected { node } => {
                write!(f, "node {node} is part of a dependency cycle and was skipped")
            }
        }
    }
}

/// A value pulled out of an earlier call's response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionSlot {
    pub name: String,
    /// Index of the call whose response supplies the value
    pub call_index: usize,
    pub producer: NodeId,
    pub extraction: Extraction,
}

/// One request of the generated program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSpec {
    pub index: usize,
    pub node: NodeId,
    pub method: String,
    pub url: Template,
    pub headers: Vec<(String, Template)>,
    pub body: Option<Template>,
    /// Input variables referenced by this call
    pub input_slots: Vec<String>,
    /// Slots first needed by this call; they are extracted just before it
    pub extraction_slots: Vec<ExtractionSlot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputSlot {
    pub name: String,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedProgram {
    /// Producers strictly before consumers; the master comes last
    pub calls: Vec<CallSpec>,
    pub inputs: Vec<InputSlot>,
    /// Cookie names read from the caller's jar
    pub cookies: Vec<String>,
    /// Unresolved nodes left out of the program
    pub excluded: Vec<NodeId>,
    /// Resolved nodes whose emission was skipped
    pub skipped: Vec<NodeId>,
    pub warnings: Vec<CodegenWarning>,
    pub complete: bool,
}

impl GeneratedProgram {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
