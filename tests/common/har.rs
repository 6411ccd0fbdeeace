//! HAR documents for file-based pipeline tests

use std::path::PathBuf;

use serde_json::{json, Value};
use tempfile::TempDir;

/// One HAR entry with the given request and response parts.
pub fn entry(
    method: &str,
    url: &str,
    request_headers: &[(&str, &str)],
    post_data: Option<&str>,
    response_headers: &[(&str, &str)],
    mime_type: &str,
    body: &str,
) -> Value {
    let headers = |pairs: &[(&str, &str)]| -> Vec<Value> {
        pairs
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect()
    };
    let mut request = json!({
        "method": method,
        "url": url,
        "headers": headers(request_headers),
    });
    if let Some(text) = post_data {
        request["postData"] = json!({ "mimeType": "application/json", "text": text });
    }
    json!({
        "request": request,
        "response": {
            "status": 200,
            "headers": headers(response_headers),
            "content": { "mimeType": mime_type, "text": body },
        },
    })
}

/// A temporary directory holding `capture.har` built from `entries`.
pub struct HarFixture {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl HarFixture {
    pub fn new(entries: Vec<Value>) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("capture.har");
        let doc = json!({ "log": { "version": "1.2", "entries": entries } });
        std::fs::write(&path, serde_json::to_string_pretty(&doc).unwrap()).unwrap();
        Self { dir, path }
    }

    /// Write `contents` next to the HAR and return its path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Checkout flow: a login page sets the session cookie and hands out a
    /// CSRF token, the cart API returns a cart id, and the order POST uses
    /// all three plus the searched item.
    pub fn checkout() -> Self {
        Self::new(vec![
            entry(
                "GET",
                "https://shop.test/static/app.js",
                &[],
                None,
                &[],
                "application/javascript",
                "console.log(1)",
            ),
            entry(
                "GET",
                "https://shop.test/login",
                &[],
                None,
                &[
                    ("Set-Cookie", "sid=5f2b9c7e1a3d4f60b8e2; Path=/; HttpOnly"),
                    ("X-Csrf-Token", "csrf-0a1b2c3d4e5f6a7b8c9d"),
                ],
                "text/html",
                "<html>welcome</html>",
            ),
            entry(
                "GET",
                "https://shop.test/api/cart?q=trail%20shoes",
                &[("Cookie", "sid=5f2b9c7e1a3d4f60b8e2")],
                None,
                &[],
                "application/json",
                r#"{"cart":{"id":"c-7781223344aa55bb"},"items":[]}"#,
            ),
            entry(
                "GET",
                "https://shop.test/img/logo.png",
                &[],
                None,
                &[],
                "image/png",
                "",
            ),
            entry(
                "POST",
                "https://shop.test/api/order/c-7781223344aa55bb",
                &[
                    ("Cookie", "sid=5f2b9c7e1a3d4f60b8e2"),
                    ("X-Csrf-Token", "csrf-0a1b2c3d4e5f6a7b8c9d"),
                    ("Content-Type", "application/json"),
                ],
                Some(r#"{"cart":"c-7781223344aa55bb","qty":1}"#),
                &[],
                "application/json",
                r#"{"order":"o-1"}"#,
            ),
        ])
    }
}
