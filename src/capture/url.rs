//! URL normalization shared by the capture index and node identity.

use reqwest::Url;

/// Normalize a URL for lookups and identity.
///
/// Scheme and host are lowercased, default ports and fragments are dropped,
/// and query pairs are sorted so that parameter order does not matter.
/// Strings that do not parse as absolute URLs are returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        url.set_query(None);
    } else {
        pairs.sort();
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    url.to_string()
}

/// True when `raw` is an absolute `http` or `https` URL with a host.
pub fn is_http_url(raw: &str) -> bool {
    match Url::parse(raw.trim()) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.host_str().is_some(),
        Err(_) => false,
    }
}

/// Decoded query pairs of `raw`, in their original order.
pub fn query_pairs(raw: &str) -> Vec<(String, String)> {
    match Url::parse(raw.trim()) {
        Ok(url) => url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Non-empty path segments of `raw`.
pub fn path_segments(raw: &str) -> Vec<String> {
    match Url::parse(raw.trim()) {
        Ok(url) => url
            .path_segments()
            .map(|segments| {
                segments
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}
