//! Diagnostics boundary
//!
//! The model's only user-visible error channel. Every computation of a
//! node's error set ends in one [`DiagnosticSink::publish`] call carrying
//! the full replacement set for that file, so downstream consumers never
//! have to merge (and fixed findings disappear by virtue of the empty
//! list).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::location::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One published finding, anchored in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    pub message: String,
    pub severity: Severity,
    /// Stable machine-readable identifier of the violated rule
    pub code: String,
}

/// Receiver of per-file diagnostic sets. Each call replaces everything
/// previously published for `uri`.
pub trait DiagnosticSink: Send + Sync {
    fn publish(&self, uri: &str, diagnostics: Vec<Diagnostic>);
}

/// In-memory sink used by the CLI driver and tests
#[derive(Default)]
pub struct CollectingSink {
    by_uri: Mutex<HashMap<String, Vec<Diagnostic>>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, uri: &str) -> Vec<Diagnostic> {
        self.by_uri
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .unwrap_or_default()
    }

    /// All uris with at least one diagnostic, sorted for stable output
    pub fn non_empty(&self) -> Vec<(String, Vec<Diagnostic>)> {
        let map = self.by_uri.lock().unwrap();
        let mut entries: Vec<_> = map
            .iter()
            .filter(|(_, d)| !d.is_empty())
            .map(|(uri, d)| (uri.clone(), d.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn count_by_severity(&self, severity: Severity) -> usize {
        self.by_uri
            .lock()
            .unwrap()
            .values()
            .flatten()
            .filter(|d| d.severity == severity)
            .count()
    }
}

impl DiagnosticSink for CollectingSink {
    fn publish(&self, uri: &str, diagnostics: Vec<Diagnostic>) {
        self.by_uri
            .lock()
            .unwrap()
            .insert(uri.to_string(), diagnostics);
    }
}
