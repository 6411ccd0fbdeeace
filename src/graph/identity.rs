//! Canonical node identity.
//!
//! A node's id is the SHA-256 of:
//! - the uppercase method,
//! - the normalized URL (lowercase scheme/host, no default port, no fragment,
//!   query pairs sorted),
//! - identity-relevant headers, lowercased and sorted by (name, value),
//! - the body, byte-exact.
//!
//! Excluded from identity: header order, query-parameter order, and
//! browser/transport headers that vary between otherwise identical requests
//! (see [`is_identity_header`]), including `cookie`.
//!
//! Two captures of the same logical request collapse to one node; requests
//! that differ in method, URL, identity headers or body never do.

use sha2::{Digest, Sha256};

use crate::capture::{normalize_url, HeaderList};

use super::node::{NodeId, RequestCandidate};

const EXCLUDED_HEADERS: &[&str] = &[
    "cookie",
    "user-agent",
    "referer",
    "origin",
    "content-length",
    "connection",
    "host",
    "priority",
    "cache-control",
    "pragma",
    "dnt",
    "upgrade-insecure-requests",
    "te",
    "if-none-match",
    "if-modified-since",
];

const EXCLUDED_PREFIXES: &[&str] = &["accept", "sec-", ":"];

/// Whether a header participates in node identity.
pub fn is_identity_header(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !EXCLUDED_HEADERS.contains(&lower.as_str())
        && !EXCLUDED_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Length-prefix every field so adjacent fields cannot run together.
fn update_field(hasher: &mut Sha256, bytes: &[u8]) {
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

pub fn canonical_identity(
    method: &str,
    url: &str,
    headers: &HeaderList,
    body: Option<&str>,
) -> NodeId {
    let mut identity_headers: Vec<(String, &str)> = headers
        .iter()
        .filter(|(name, _)| is_identity_header(name))
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim()))
        .collect();
    identity_headers.sort();

    let mut hasher = Sha256::new();
    update_field(&mut hasher, method.trim().to_ascii_uppercase().as_bytes());
    update_field(&mut hasher, normalize_url(url).as_bytes());
    update_field(&mut hasher, &(identity_headers.len() as u64).to_le_bytes());
    for (name, value) in &identity_headers {
        update_field(&mut hasher, name.as_bytes());
        update_field(&mut hasher, value.as_bytes());
    }
    match body {
        Some(body) => {
            update_field(&mut hasher, b"1");
            update_field(&mut hasher, body.as_bytes());
        }
        None => update_field(&mut hasher, b"0"),
    }

    NodeId::from_digest(format!("{:x}", hasher.finalize()))
}

pub fn candidate_identity(candidate: &RequestCandidate) -> NodeId {
    canonical_identity(
        &candidate.method,
        &candidate.url,
        &candidate.headers,
        candidate.body.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&str, &str)]) -> HeaderList {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn identity_is_deterministic() {
        let h = headers(&[("X-Api-Key", "k")]);
        let a = canonical_identity("get", "https://a.test/x?b=1&a=2", &h, None);
        let b = canonical_identity("GET", "https://A.test/x?a=2&b=1", &h, None);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(a
            .as_str()
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
    }

    #[test]
    fn volatile_headers_and_order_are_ignored() {
        let a = headers(&[
            ("Authorization", "Bearer t"),
            ("User-Agent", "one"),
            ("Cookie", "sid=1"),
            ("Accept", "*/*"),
        ]);
        let b = headers(&[
            ("sec-ch-ua", "\"x\""),
            ("authorization", "Bearer t"),
            ("user-agent", "two"),
        ]);
        assert_eq!(
            canonical_identity("GET", "https://a.test/", &a, None),
            canonical_identity("GET", "https://a.test/", &b, None)
        );
    }

    #[test]
    fn meaningful_differences_change_identity() {
        let none = HeaderList::new();
        let base = canonical_identity("GET", "https://a.test/x", &none, None);
        assert_ne!(base, canonical_identity("POST", "https://a.test/x", &none, None));
        assert_ne!(base, canonical_identity("GET", "https://a.test/y", &none, None));
        assert_ne!(base, canonical_identity("GET", "https://a.test/x", &none, Some("")));
        assert_ne!(
            base,
            canonical_identity(
                "GET",
                "https://a.test/x",
                &headers(&[("X-Csrf-Token", "1")]),
                None
            )
        );
    }

    #[test]
    fn header_classification() {
        assert!(is_identity_header("Authorization"));
        assert!(is_identity_header("X-Requested-With"));
        assert!(!is_identity_header("Accept-Language"));
        assert!(!is_identity_header("Sec-Fetch-Mode"));
        assert!(!is_identity_header(":authority"));
    }
}
