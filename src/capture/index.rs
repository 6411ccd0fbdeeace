use std::collections::HashMap;

use super::url::normalize_url;
use super::{Capture, CaptureRecord, RecordId};

/// Read-only lookup over recorded exchanges.
///
/// Results are always returned in capture order.
pub trait CaptureIndex: Send + Sync {
    /// Records observed for `method` + `url` (URL compared normalized).
    fn lookup(&self, method: &str, url: &str) -> Vec<&CaptureRecord>;

    /// Records observed for `url` with any method.
    fn lookup_any(&self, url: &str) -> Vec<&CaptureRecord>;

    fn record(&self, id: RecordId) -> Option<&CaptureRecord>;

    fn records(&self) -> &[CaptureRecord];

    fn len(&self) -> usize {
        self.records().len()
    }

    fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Capture index built once up front and shared immutably.
#[derive(Debug, Clone)]
pub struct InMemoryCaptureIndex {
    capture: Capture,
    by_method_url: HashMap<(String, String), Vec<usize>>,
    by_url: HashMap<String, Vec<usize>>,
}

impl InMemoryCaptureIndex {
    pub fn new(capture: Capture) -> Self {
        let mut by_method_url: HashMap<(String, String), Vec<usize>> = HashMap::new();
        let mut by_url: HashMap<String, Vec<usize>> = HashMap::new();
        for (pos, record) in capture.records.iter().enumerate() {
            let url = normalize_url(&record.request.url);
            by_method_url
                .entry((record.request.method.to_uppercase(), url.clone()))
                .or_default()
                .push(pos);
            by_url.entry(url).or_default().push(pos);
        }
        Self {
            capture,
            by_method_url,
            by_url,
        }
    }

    pub fn capture(&self) -> &Capture {
        &self.capture
    }

    fn resolve(&self, positions: Option<&Vec<usize>>) -> Vec<&CaptureRecord> {
        positions
            .map(|p| p.iter().map(|&i| &self.capture.records[i]).collect())
            .unwrap_or_default()
    }
}

impl CaptureIndex for InMemoryCaptureIndex {
    fn lookup(&self, method: &str, url: &str) -> Vec<&CaptureRecord> {
        let key = (method.to_uppercase(), normalize_url(url));
        self.resolve(self.by_method_url.get(&key))
    }

    fn lookup_any(&self, url: &str) -> Vec<&CaptureRecord> {
        self.resolve(self.by_url.get(&normalize_url(url)))
    }

    fn record(&self, id: RecordId) -> Option<&CaptureRecord> {
        self.capture.records.iter().find(|r| r.id == id)
    }

    fn records(&self) -> &[CaptureRecord] {
        &self.capture.records
    }
}
