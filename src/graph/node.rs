use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capture::{CaptureRecord, HeaderList, RecordId};

/// Canonical identity of a request node (hex SHA-256 digest).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub(crate) fn from_digest(hex: String) -> Self {
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 hex characters, for logs and listings.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// Node lifecycle: `Queued -> InProcess -> Resolved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeStatus {
    Queued,
    InProcess,
    Resolved,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Queued => "queued",
            NodeStatus::InProcess => "in-process",
            NodeStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where in a request a fragment lives.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum FragmentLocation {
    /// Anywhere in the URL (path segment or raw query text)
    Url,
    /// Value of a named query parameter
    Query(String),
    Header(String),
    Cookie(String),
    Body,
}

impl fmt::Display for FragmentLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FragmentLocation::Url => f.write_str("url"),
            FragmentLocation::Query(name) => write!(f, "query:{name}"),
            FragmentLocation::Header(name) => write!(f, "header:{}", name.to_ascii_lowercase()),
            FragmentLocation::Cookie(name) => write!(f, "cookie:{name}"),
            FragmentLocation::Body => f.write_str("body"),
        }
    }
}

/// A substring of a request flagged as possibly non-constant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fragment {
    pub location: FragmentLocation,
    pub value: String,
}

impl Fragment {
    pub fn new(location: FragmentLocation, value: impl Into<String>) -> Self {
        Self {
            location,
            value: value.into(),
        }
    }

    pub fn header(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FragmentLocation::Header(name.into()), value)
    }

    pub fn query(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FragmentLocation::Query(name.into()), value)
    }

    pub fn cookie(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(FragmentLocation::Cookie(name.into()), value)
    }

    pub fn url(value: impl Into<String>) -> Self {
        Self::new(FragmentLocation::Url, value)
    }

    pub fn body(value: impl Into<String>) -> Self {
        Self::new(FragmentLocation::Body, value)
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={:?}", self.location, self.value)
    }
}

/// How to pull a value out of a producer's response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "expr", rename_all = "snake_case")]
pub enum Extraction {
    /// RFC 6901 pointer into a JSON response body
    JsonPointer(String),
    /// Response header value
    Header(String),
    /// Cookie set by the response
    Cookie(String),
    /// First capture group of a regex over the raw response body
    Regex(String),
}

impl fmt::Display for Extraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extraction::JsonPointer(p) => write!(f, "json{p}"),
            Extraction::Header(h) => write!(f, "header[{h}]"),
            Extraction::Cookie(c) => write!(f, "cookie[{c}]"),
            Extraction::Regex(r) => write!(f, "regex/{r}/"),
        }
    }
}

/// Why a fragment ended up emitted literally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstantReason {
    /// The oracle classified the value as constant
    Classified,
    /// The oracle failed to produce a decision
    NoDecision,
    /// The oracle named a producer that is not in the capture
    ProducerMissing,
    /// Binding the producer would have closed a dependency cycle
    CycleRejected,
}

impl ConstantReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConstantReason::Classified => "constant",
            ConstantReason::NoDecision => "no decision",
            ConstantReason::ProducerMissing => "producer missing",
            ConstantReason::CycleRejected => "cycle rejected",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Resolution {
    Unresolved,
    Producer(NodeId),
    Input(String),
    Constant(ConstantReason),
}

impl Resolution {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Unresolved => f.write_str("unresolved"),
            Resolution::Producer(id) => write!(f, "from {id}"),
            Resolution::Input(name) => write!(f, "input {name}"),
            Resolution::Constant(reason) => write!(f, "literal ({})", reason.as_str()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DynamicPart {
    pub fragment: Fragment,
    pub resolution: Resolution,
}

impl DynamicPart {
    pub fn unresolved(fragment: Fragment) -> Self {
        Self {
            fragment,
            resolution: Resolution::Unresolved,
        }
    }
}

/// A value this node's response supplies to a consumer's dynamic part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPart {
    pub value: String,
    pub consumer: NodeId,
    pub part: usize,
    pub extraction: Option<Extraction>,
}

/// Request fields a node is created from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestCandidate {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<String>,
    pub record: Option<RecordId>,
}

impl RequestCandidate {
    pub fn from_record(record: &CaptureRecord) -> Self {
        Self {
            method: record.request.method.to_uppercase(),
            url: record.request.url.clone(),
            headers: record.request.headers.clone(),
            body: record.request.body.clone(),
            record: Some(record.id),
        }
    }

    /// A request known only by method and URL (not present in the capture).
    pub fn literal(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into().trim().to_string(),
            headers: HeaderList::new(),
            body: None,
            record: None,
        }
    }
}

/// One captured exchange treated as a unit of replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestNode {
    pub id: NodeId,
    /// Discovery order within the DAG
    pub seq: usize,
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<String>,
    pub record: Option<RecordId>,
    pub dynamic_parts: Vec<DynamicPart>,
    pub extracted_parts: Vec<ExtractedPart>,
    pub status: NodeStatus,
}

impl RequestNode {
    pub(crate) fn from_candidate(id: NodeId, seq: usize, candidate: RequestCandidate) -> Self {
        Self {
            id,
            seq,
            method: candidate.method,
            url: candidate.url,
            headers: candidate.headers,
            body: candidate.body,
            record: candidate.record,
            dynamic_parts: Vec::new(),
            extracted_parts: Vec::new(),
            status: NodeStatus::Queued,
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    pub fn is_resolved(&self) -> bool {
        self.status == NodeStatus::Resolved
    }

    pub fn unresolved_parts(&self) -> impl Iterator<Item = (usize, &DynamicPart)> {
        self.dynamic_parts
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.resolution.is_resolved())
    }
}
