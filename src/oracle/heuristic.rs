//! Deterministic oracle that searches the capture itself.
//!
//! Classification flags values that look generated (ids, tokens, hashes)
//! or that equal a caller-supplied input. Resolution looks for the value in
//! the responses of earlier exchanges, newest first.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;

use crate::capture::url::{path_segments, query_pairs};
use crate::capture::{CaptureIndex, CaptureRecord};
use crate::graph::{Dag, Extraction, Fragment, FragmentLocation, RequestNode};

use super::{Decision, Oracle, OracleError, ProducerRef};

/// Header names that carry session or anti-forgery values.
fn is_token_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name == "authorization"
        || name == "x-api-key"
        || name.starts_with("x-csrf")
        || name.starts_with("x-xsrf")
        || (name.starts_with("x-") && name.contains("token"))
        || (name.starts_with("x-") && name.contains("session"))
}

/// Bytes a regex capture group may span when nothing better is known.
const VALUE_CLASS: &str = r#"([^"'&<>\s;,]+)"#;

/// Characters of context kept in front of a raw-body match.
const REGEX_CONTEXT: usize = 16;

pub struct HeuristicOracle {
    index: Arc<dyn CaptureIndex>,
    /// Caller-supplied input values; matching values are always dynamic
    inputs: BTreeMap<String, String>,
    patterns: Vec<Regex>,
}

impl HeuristicOracle {
    pub fn new(index: Arc<dyn CaptureIndex>) -> Self {
        let raw = [
            // uuid
            r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$",
            // numeric ids
            r"^[0-9]{4,}$",
            // hex digests
            r"^[0-9a-fA-F]{16,}$",
            // jwt
            r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+\.[A-Za-z0-9_-]+$",
        ];
        Self {
            index,
            inputs: BTreeMap::new(),
            patterns: raw.into_iter().filter_map(|p| Regex::new(p).ok()).collect(),
        }
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Whether `value` looks generated rather than authored.
    pub fn looks_dynamic(&self, value: &str) -> bool {
        let value = value.trim();
        if value.is_empty() {
            return false;
        }
        if self.inputs.values().any(|v| v == value) {
            return true;
        }
        if self.patterns.iter().any(|re| re.is_match(value)) {
            return true;
        }
        // long opaque tokens: mixed letters and digits, no spaces
        value.len() >= 16
            && value.chars().any(|c| c.is_ascii_digit())
            && value.chars().any(|c| c.is_ascii_alphabetic())
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.=+/%".contains(c))
    }

    fn classify(&self, node: &RequestNode) -> Vec<Fragment> {
        let mut out = Vec::new();

        for segment in path_segments(&node.url) {
            if self.looks_dynamic(&segment) {
                out.push(Fragment::url(segment));
            }
        }
        for (name, value) in query_pairs(&node.url) {
            if self.looks_dynamic(&value) {
                out.push(Fragment::query(name, value));
            }
        }

        for (name, value) in node.headers.iter() {
            if !is_token_header(name) {
                continue;
            }
            let token = match value.split_once(' ') {
                Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
                _ => value.trim(),
            };
            if !token.is_empty() {
                out.push(Fragment::header(name.to_ascii_lowercase(), token));
            }
        }

        for (name, value) in node.headers.request_cookies() {
            if self.looks_dynamic(&value) {
                out.push(Fragment::cookie(name, value));
            }
        }

        if let Some(body) = node.body.as_deref() {
            match serde_json::from_str::<Value>(body) {
                Ok(json) => {
                    for (_, leaf) in json_leaves(&json) {
                        if self.looks_dynamic(&leaf) {
                            out.push(Fragment::body(leaf));
                        }
                    }
                }
                Err(_) if body.contains('=') => {
                    let as_url = format!("http://form.invalid/?{body}");
                    for (_, value) in query_pairs(&as_url) {
                        if self.looks_dynamic(&value) {
                            out.push(Fragment::body(value));
                        }
                    }
                }
                Err(_) => {}
            }
        }
        out
    }

    /// Records strictly before `node`'s own, newest first.
    fn earlier_records<'a>(&'a self, node: &RequestNode) -> impl Iterator<Item = &'a CaptureRecord> {
        let before = node.record;
        self.index
            .records()
            .iter()
            .rev()
            .filter(move |r| before.is_some_and(|b| r.id < b))
    }

    fn find_producer(&self, node: &RequestNode, value: &str) -> Option<Decision> {
        for record in self.earlier_records(node) {
            if let Some(extraction) = locate_in_response(record, value) {
                return Some(Decision::producer(
                    ProducerRef::Record { id: record.id },
                    extraction,
                ));
            }
        }
        None
    }
}

/// `(pointer, scalar)` for every string or number leaf of `value`.
fn json_leaves(value: &Value) -> Vec<(String, String)> {
    fn walk(value: &Value, pointer: String, out: &mut Vec<(String, String)>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    let escaped = key.replace('~', "~0").replace('/', "~1");
                    walk(child, format!("{pointer}/{escaped}"), out);
                }
            }
            Value::Array(items) => {
                for (i, child) in items.iter().enumerate() {
                    walk(child, format!("{pointer}/{i}"), out);
                }
            }
            Value::String(s) => out.push((pointer, s.clone())),
            Value::Number(n) => out.push((pointer, n.to_string())),
            Value::Bool(_) | Value::Null => {}
        }
    }
    let mut out = Vec::new();
    walk(value, String::new(), &mut out);
    out
}

/// Where `value` appears in `record`'s response, as an extraction rule.
fn locate_in_response(record: &CaptureRecord, value: &str) -> Option<Extraction> {
    let response = &record.response;
    for (name, header) in response.headers.iter() {
        if !name.eq_ignore_ascii_case("set-cookie") && header.trim() == value {
            return Some(Extraction::Header(name.to_ascii_lowercase()));
        }
    }
    if let Some((name, _)) = response
        .headers
        .set_cookies()
        .into_iter()
        .find(|(_, v)| v == value)
    {
        return Some(Extraction::Cookie(name));
    }
    if let Some(json) = response.json_body() {
        if let Some((pointer, _)) = json_leaves(&json).into_iter().find(|(_, v)| v == value) {
            return Some(Extraction::JsonPointer(pointer));
        }
    }
    let body = response.body.as_deref()?;
    regex_for(body, value).map(Extraction::Regex)
}

/// A pattern whose first capture group yields `value` on `body`.
fn regex_for(body: &str, value: &str) -> Option<String> {
    let pos = body.find(value)?;
    let mut start = pos.saturating_sub(REGEX_CONTEXT);
    while !body.is_char_boundary(start) {
        start += 1;
    }
    let prefix = regex::escape(&body[start..pos]);
    let end = pos + value.len();
    let mut next = (end + 1).min(body.len());
    while !body.is_char_boundary(next) {
        next += 1;
    }
    let candidates = [
        format!("{prefix}{VALUE_CLASS}"),
        format!("{prefix}(.+?){}", regex::escape(&body[end..next])),
    ];
    candidates.into_iter().find(|pattern| {
        Regex::new(pattern)
            .ok()
            .and_then(|re| re.captures(body))
            .and_then(|c| c.get(1))
            .is_some_and(|m| m.as_str() == value)
    })
}

#[async_trait]
impl Oracle for HeuristicOracle {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError> {
        Ok(self.classify(node))
    }

    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        dag: &Dag,
    ) -> Result<Decision, OracleError> {
        if let FragmentLocation::Cookie(name) = &fragment.location {
            if dag.cookies().contains(name) {
                return Ok(Decision::Constant);
            }
        }
        if let Some(input) = dag
            .inputs()
            .find(|i| i.default_value.as_deref() == Some(fragment.value.as_str()))
        {
            return Ok(Decision::input(input.name.clone()));
        }
        Ok(self
            .find_producer(node, &fragment.value)
            .unwrap_or(Decision::Constant))
    }
}
