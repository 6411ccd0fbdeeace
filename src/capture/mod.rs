//! Recorded HTTP exchanges and the read-only index the engine queries.

pub mod cookies;
pub mod har;
pub mod headers;
pub mod index;
pub mod url;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cookies::CookieJar;
pub use har::CaptureFilter;
pub use headers::HeaderList;
pub use index::{CaptureIndex, InMemoryCaptureIndex};
pub use url::normalize_url;

/// Error loading a capture or cookie file
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid HAR document: {0}")]
    InvalidHar(String),
    #[error("Invalid cookie file: {0}")]
    InvalidCookies(String),
}

/// Position of a record in its capture (capture order is chronological).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub usize);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderList,
    pub body: Option<String>,
}

impl CapturedRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().to_uppercase(),
            url: url.into(),
            headers: HeaderList::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
    pub status: u16,
    pub headers: HeaderList,
    pub body: Option<String>,
    pub mime_type: Option<String>,
}

impl CapturedResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            ..Self::default()
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_json(mut self, value: serde_json::Value) -> Self {
        self.body = Some(value.to_string());
        self.mime_type = Some("application/json".to_string());
        self
    }

    /// Response body parsed as JSON, if it is JSON.
    pub fn json_body(&self) -> Option<serde_json::Value> {
        self.body
            .as_deref()
            .and_then(|b| serde_json::from_str(b.trim()).ok())
    }
}

/// One observed request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRecord {
    pub id: RecordId,
    pub request: CapturedRequest,
    pub response: CapturedResponse,
}

/// An ordered set of recorded exchanges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capture {
    pub records: Vec<CaptureRecord>,
}

impl Capture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an exchange, assigning the next record id.
    pub fn push(&mut self, request: CapturedRequest, response: CapturedResponse) -> RecordId {
        let id = RecordId(self.records.len());
        self.records.push(CaptureRecord {
            id,
            request,
            response,
        });
        id
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
