//! Chat-completions backed oracle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::capture::{CaptureIndex, CaptureRecord, RecordId};
use crate::graph::{Dag, Extraction, Fragment, FragmentLocation, NodeId, RequestNode};

use super::{Decision, Oracle, OracleError, ProducerRef};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Most recent earlier exchanges listed in a resolution prompt
const MAX_LISTED_RECORDS: usize = 40;
/// Response body characters shown per listed exchange
const BODY_EXCERPT_CHARS: usize = 400;

const CLASSIFY_PROMPT: &str = "You analyse HTTP requests captured from a browser session. \
List the parts of the request whose values were generated at runtime (ids, tokens, \
session values, user-typed search terms) rather than fixed by the application. \
Answer with a JSON object {\"fragments\": [{\"location\": \"url\"|\"query\"|\"header\"|\"cookie\"|\"body\", \
\"name\": string|null, \"value\": string}]}. `value` must be copied verbatim from the request.";

const RESOLVE_PROMPT: &str = "You trace where a dynamic value in an HTTP request came from. \
You are given the request, the value and earlier exchanges from the same session. \
Answer with exactly one JSON object: \
{\"decision\": \"producer\", \"record\": <id of the earlier exchange whose response contains the value>, \
\"extraction\": {\"kind\": \"json_pointer\"|\"header\"|\"cookie\"|\"regex\", \"expr\": string}} \
or {\"decision\": \"input_variable\", \"name\": string} when the user must supply the value \
or {\"decision\": \"constant\"} when the value can be replayed as is.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAiConfig {
    pub model: String,
    /// Tried before `model` until it fails once.
    pub alternate_model: Option<String>,
    pub api_base: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            alternate_model: None,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 60,
            max_retries: 2,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    response_format: serde_json::Value,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireFragments {
    #[serde(default)]
    fragments: Vec<WireFragment>,
}

#[derive(Deserialize)]
struct WireFragment {
    location: String,
    #[serde(default)]
    name: Option<String>,
    value: String,
}

#[derive(Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
enum WireDecision {
    Producer {
        record: usize,
        #[serde(default)]
        extraction: Option<Extraction>,
    },
    InputVariable {
        name: String,
    },
    Constant,
}

/// Which model the next request goes to. Once the alternate model fails the
/// oracle stays on the default one for the rest of the build.
#[derive(Debug)]
struct ModelChoice {
    default: String,
    alternate: Mutex<Option<String>>,
}

impl ModelChoice {
    fn new(config: &OpenAiConfig) -> Self {
        let alternate = config
            .alternate_model
            .clone()
            .filter(|m| !m.trim().is_empty() && *m != config.model);
        Self {
            default: config.model.clone(),
            alternate: Mutex::new(alternate),
        }
    }

    fn active(&self) -> String {
        self.alternate
            .lock()
            .clone()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Returns false when the default model was already in use.
    fn revert_to_default(&self) -> bool {
        match self.alternate.lock().take() {
            Some(alternate) => {
                tracing::warn!(
                    alternate = %alternate,
                    default = %self.default,
                    "alternate model failed; reverting to the default model, results may degrade"
                );
                true
            }
            None => false,
        }
    }
}

pub struct OpenAiOracle {
    config: OpenAiConfig,
    models: ModelChoice,
    api_key: String,
    client: Client,
    index: Arc<dyn CaptureIndex>,
    classifications: Mutex<HashMap<NodeId, Vec<Fragment>>>,
    decisions: Mutex<HashMap<(NodeId, Fragment), Decision>>,
}

impl OpenAiOracle {
    pub fn new(config: OpenAiConfig, index: Arc<dyn CaptureIndex>) -> Result<Self, OracleError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                OracleError::Config(format!("environment variable {} is not set", config.api_key_env))
            })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(|e| OracleError::Config(e.to_string()))?;
        Ok(Self {
            models: ModelChoice::new(&config),
            config,
            api_key,
            client,
            index,
            classifications: Mutex::new(HashMap::new()),
            decisions: Mutex::new(HashMap::new()),
        })
    }

    async fn complete_once(
        &self,
        model: &str,
        system: &str,
        user: String,
    ) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let request = ChatRequest {
            model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.0,
            response_format: json!({ "type": "json_object" }),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    OracleError::Timeout(self.config.timeout_secs * 1000)
                } else {
                    OracleError::from(err)
                }
            })?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(OracleError::Request(format!("{status} - {text}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|err| OracleError::Parse(format!("{err} - {text}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Parse("empty completion".to_string()))
    }

    /// Falls back to the default model once when the alternate one keeps failing.
    async fn complete(&self, system: &str, user: String) -> Result<String, OracleError> {
        loop {
            let model = self.models.active();
            match self.complete_with(&model, system, user.clone()).await {
                Err(err @ (OracleError::Request(_) | OracleError::Timeout(_)))
                    if self.models.revert_to_default() =>
                {
                    tracing::debug!(error = %err, model = %model, "dropping alternate model");
                }
                other => return other,
            }
        }
    }

    /// One completion with retries on transport failures.
    async fn complete_with(
        &self,
        model: &str,
        system: &str,
        user: String,
    ) -> Result<String, OracleError> {
        let mut attempt = 0;
        loop {
            match self.complete_once(model, system, user.clone()).await {
                Err(err @ (OracleError::Request(_) | OracleError::Timeout(_)))
                    if attempt < self.config.max_retries =>
                {
                    attempt += 1;
                    let backoff = Duration::from_millis(500 * 2u64.pow(attempt));
                    tracing::warn!(error = %err, attempt, "oracle request failed; retrying");
                    tokio::time::sleep(backoff).await;
                }
                other => return other,
            }
        }
    }

    fn listing(&self, node: &RequestNode) -> Vec<serde_json::Value> {
        let mut earlier: Vec<&CaptureRecord> = self
            .index
            .records()
            .iter()
            .filter(|r| node.record.is_some_and(|own| r.id < own))
            .collect();
        let skip = earlier.len().saturating_sub(MAX_LISTED_RECORDS);
        earlier.drain(..skip);
        earlier.into_iter().map(record_summary).collect()
    }
}

fn excerpt(text: &str) -> String {
    match text.char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}

fn request_json(node: &RequestNode) -> serde_json::Value {
    json!({
        "method": node.method,
        "url": node.url,
        "headers": node.headers,
        "body": node.body.as_deref().map(excerpt),
    })
}

fn record_summary(record: &CaptureRecord) -> serde_json::Value {
    json!({
        "record": record.id.0,
        "method": record.request.method,
        "url": record.request.url,
        "status": record.response.status,
        "response_headers": record.response.headers,
        "response_body": record.response.body.as_deref().map(excerpt),
    })
}

/// Fragments from a classification reply that actually occur in `node`.
fn parse_fragments(node: &RequestNode, reply: &str) -> Result<Vec<Fragment>, OracleError> {
    let wire: WireFragments =
        serde_json::from_str(reply).map_err(|err| OracleError::Parse(format!("{err} - {reply}")))?;
    let fragments = wire
        .fragments
        .into_iter()
        .filter_map(|f| {
            let name = f.name.unwrap_or_default();
            let location = match f.location.as_str() {
                "url" => FragmentLocation::Url,
                "query" => FragmentLocation::Query(name),
                "header" => FragmentLocation::Header(name.to_ascii_lowercase()),
                "cookie" => FragmentLocation::Cookie(name),
                "body" => FragmentLocation::Body,
                other => {
                    tracing::debug!(location = other, "ignoring unknown fragment location");
                    return None;
                }
            };
            Some(Fragment::new(location, f.value))
        })
        .filter(|f| occurs_in(node, f))
        .collect();
    Ok(fragments)
}

fn occurs_in(node: &RequestNode, fragment: &Fragment) -> bool {
    let value = fragment.value.as_str();
    if value.is_empty() {
        return false;
    }
    match &fragment.location {
        FragmentLocation::Url | FragmentLocation::Query(_) => {
            node.url.contains(value)
                || node.url.contains(&crate::codegen::percent_encode(value))
                || node.url.contains(&crate::codegen::form_encode(value))
        }
        FragmentLocation::Header(name) => node.headers.get(name).is_some_and(|h| h.contains(value)),
        FragmentLocation::Cookie(name) => node
            .headers
            .request_cookies()
            .iter()
            .any(|(n, v)| n == name && v == value),
        FragmentLocation::Body => node.body.as_deref().is_some_and(|b| b.contains(value)),
    }
}

fn parse_decision(reply: &str) -> Result<Decision, OracleError> {
    let wire: WireDecision =
        serde_json::from_str(reply).map_err(|err| OracleError::Parse(format!("{err} - {reply}")))?;
    Ok(match wire {
        WireDecision::Producer { record, extraction } => Decision::Producer {
            target: ProducerRef::Record {
                id: RecordId(record),
            },
            extraction,
        },
        WireDecision::InputVariable { name } => Decision::InputVariable { name },
        WireDecision::Constant => Decision::Constant,
    })
}

#[async_trait]
impl Oracle for OpenAiOracle {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn classify_dynamic_parts(
        &self,
        node: &RequestNode,
    ) -> Result<Vec<Fragment>, OracleError> {
        let cached = self.classifications.lock().get(&node.id).cloned();
        if let Some(fragments) = cached {
            return Ok(fragments);
        }
        let user = json!({ "request": request_json(node) }).to_string();
        let reply = self.complete(CLASSIFY_PROMPT, user).await?;
        let fragments = parse_fragments(node, &reply)?;
        self.classifications
            .lock()
            .insert(node.id.clone(), fragments.clone());
        Ok(fragments)
    }

    async fn resolve_fragment(
        &self,
        node: &RequestNode,
        fragment: &Fragment,
        dag: &Dag,
    ) -> Result<Decision, OracleError> {
        let key = (node.id.clone(), fragment.clone());
        let cached = self.decisions.lock().get(&key).cloned();
        if let Some(decision) = cached {
            return Ok(decision);
        }
        let inputs: Vec<&str> = dag.inputs().map(|i| i.name.as_str()).collect();
        let user = json!({
            "request": request_json(node),
            "fragment": { "location": fragment.location.to_string(), "value": fragment.value },
            "known_inputs": inputs,
            "earlier_exchanges": self.listing(node),
        })
        .to_string();
        let reply = self.complete(RESOLVE_PROMPT, user).await?;
        let decision = parse_decision(&reply)?;
        self.decisions.lock().insert(key, decision.clone());
        Ok(decision)
    }
}
