//! Classification/extraction oracle.
//!
//! The engine only depends on the [`Oracle`] contract; implementations range
//! from fixed scripts (tests) through a deterministic capture-search
//! heuristic to an LLM backend, plus record/replay wrappers.

pub mod error;
pub mod heuristic;
pub mod openai;
pub mod recording;
pub mod replay;
pub mod scripted;
pub mod tape;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capture::RecordId;
use crate::graph::{Dag, Extraction, Fragment, RequestNode};

pub use error::OracleError;
pub use heuristic::HeuristicOracle;
pub use openai::{OpenAiConfig, OpenAiOracle};
pub use recording::RecordingOracle;
pub use replay::ReplayOracle;
pub use scripted::ScriptedOracle;

/// Where a producer's request can be found in the capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProducerRef {
    /// Look up by URL (and method, when known)
    Url { method: Option<String>, url: String },
    /// A specific capture record
    Record { id: RecordId },
}

impl ProducerRef {
    pub fn url(url: impl Into<String>) -> Self {
        ProducerRef::Url {
            method: None,
            url: url.into(),
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        ProducerRef::Url {
            method: Some("GET".to_string()),
            url: url.into(),
        }
    }
}

impl std::fmt::Display for ProducerRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProducerRef::Url {
                method: Some(m),
                url,
            } => write!(f, "{m} {url}"),
            ProducerRef::Url { method: None, url } => f.write_str(url),
            ProducerRef::Record { id } => write!(f, "record {id}"),
        }
    }
}

/// The oracle's verdict for one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// The value comes from another captured exchange's response
    Producer {
        target: ProducerRef,
        extraction: Option<Extraction>,
    },
    /// The value must be supplied by the caller under this name
    InputVariable { name: String },
    /// Emit the captured value literally
    Constant,
}

impl Decision {
    pub fn producer(target: ProducerRef, extraction: Extraction) -> Self {
        Decision::Producer {
            target,
            extraction: Some(extraction),
        }
    }

    pub fn input(name: impl Into<String>) -> Self {
        Decision::InputVariable { name: name.into() }
    }
}

/// Classification/extraction capability consumed by the DAG builder.
///
/// Implementations own their timeout and retry policy. For a fixed
/// fragment they must return the same decision on every call.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &str;

    /// Candidate dynamic fragments of `node`, in a stable order.
    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError>;

    /// Decide where `fragment` of `node` comes from, given the current graph.
    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        dag: &Dag,
    ) -> Result<Decision, OracleError>;
}
