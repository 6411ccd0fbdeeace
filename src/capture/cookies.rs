use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::CaptureError;

/// Cookie set supplied by the caller; replayed calls read these by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct CookieEntry {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CookieFile {
    List(Vec<CookieEntry>),
    Map(BTreeMap<String, String>),
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.cookies.insert(name.into(), value.into());
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.cookies.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Parse a cookie export: either a list of `{name, value, ...}` objects
    /// (browser extension format) or a flat `name -> value` object.
    ///
    /// When a name repeats (e.g. same cookie on several domains) the last
    /// entry wins.
    pub fn from_json_str(contents: &str) -> Result<Self, CaptureError> {
        let parsed: CookieFile = serde_json::from_str(contents)
            .map_err(|e| CaptureError::InvalidCookies(e.to_string()))?;
        let cookies = match parsed {
            CookieFile::List(entries) => entries.into_iter().map(|c| (c.name, c.value)).collect(),
            CookieFile::Map(map) => map,
        };
        Ok(Self { cookies })
    }

    pub fn from_path(path: &Path) -> Result<Self, CaptureError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}
