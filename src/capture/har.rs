//! HAR 1.2 loading.

use std::fs;
use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use super::{Capture, CaptureError, CapturedRequest, CapturedResponse, HeaderList};

const STATIC_MIME_PREFIXES: &[&str] = &[
    "image/",
    "font/",
    "video/",
    "audio/",
    "text/css",
    "text/javascript",
    "application/javascript",
    "application/x-javascript",
    "application/font",
];

const STATIC_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".svg", ".ico", ".webp", ".bmp", ".woff", ".woff2", ".ttf",
    ".otf", ".eot", ".css", ".js", ".mjs", ".map", ".mp4", ".webm", ".mp3", ".wav",
];

/// Which HAR entries to keep when loading a capture
#[derive(Debug, Clone, Copy)]
pub struct CaptureFilter {
    /// Drop images, fonts, stylesheets, scripts and media
    pub skip_static: bool,
}

impl Default for CaptureFilter {
    fn default() -> Self {
        Self { skip_static: true }
    }
}

impl CaptureFilter {
    pub fn keep_all() -> Self {
        Self { skip_static: false }
    }

    fn keeps(&self, url: &str, mime_type: Option<&str>) -> bool {
        let lower = url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return false;
        }
        if !self.skip_static {
            return true;
        }
        if let Some(mime) = mime_type {
            let mime = mime.to_ascii_lowercase();
            if STATIC_MIME_PREFIXES.iter().any(|p| mime.starts_with(p)) {
                return false;
            }
        }
        let path = lower
            .split(['?', '#'])
            .next()
            .unwrap_or(lower.as_str());
        !STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
    }
}

#[derive(Debug, Deserialize)]
struct HarDocument {
    log: HarLog,
}

#[derive(Debug, Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Debug, Deserialize)]
struct HarEntry {
    request: HarRequest,
    response: HarResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    post_data: Option<HarPostData>,
}

#[derive(Debug, Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarPostData {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HarResponse {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    content: HarContent,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarContent {
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

fn to_headers(headers: Vec<HarHeader>) -> HeaderList {
    headers
        .into_iter()
        // HTTP/2 pseudo headers are transport artifacts, not replayable headers
        .filter(|h| !h.name.starts_with(':'))
        .map(|h| (h.name, h.value))
        .collect()
}

fn decode_content(content: HarContent) -> Option<String> {
    let text = content.text?;
    match content.encoding.as_deref() {
        Some(enc) if enc.eq_ignore_ascii_case("base64") => {
            match base64::engine::general_purpose::STANDARD.decode(text.trim()) {
                Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
                Err(e) => {
                    tracing::debug!(error = %e, "failed to decode base64 response body");
                    None
                }
            }
        }
        _ => Some(text),
    }
}

impl Capture {
    /// Parse a HAR document, keeping entries accepted by `filter`.
    pub fn from_har_str(contents: &str, filter: &CaptureFilter) -> Result<Self, CaptureError> {
        let doc: HarDocument =
            serde_json::from_str(contents).map_err(|e| CaptureError::InvalidHar(e.to_string()))?;

        let mut capture = Capture::new();
        let mut skipped = 0usize;
        for entry in doc.log.entries {
            if !filter.keeps(&entry.request.url, entry.response.content.mime_type.as_deref()) {
                skipped += 1;
                continue;
            }
            let request = CapturedRequest {
                method: entry.request.method.to_uppercase(),
                url: entry.request.url,
                headers: to_headers(entry.request.headers),
                body: entry
                    .request
                    .post_data
                    .and_then(|p| p.text)
                    .filter(|t| !t.is_empty()),
            };
            let mime_type = entry.response.content.mime_type.clone();
            let response = CapturedResponse {
                status: entry.response.status,
                headers: to_headers(entry.response.headers),
                body: decode_content(entry.response.content),
                mime_type,
            };
            capture.push(request, response);
        }

        tracing::debug!(kept = capture.len(), skipped, "loaded HAR capture");
        Ok(capture)
    }

    pub fn from_har_path(path: &Path, filter: &CaptureFilter) -> Result<Self, CaptureError> {
        let contents = fs::read_to_string(path)?;
        Self::from_har_str(&contents, filter)
    }
}
