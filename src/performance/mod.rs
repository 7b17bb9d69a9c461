// Performance table - observed cost, latency and quality per backend/model
//
// Each key holds an append-only run of aggregate entries. A new observation
// appends the running aggregate of the previous entry and the observation,
// so the latest entry always summarises everything seen for the key, while
// older entries remain available for recency weighting.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Routing target: one model on one backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackendKey {
    pub backend: String,
    pub model: String,
}

impl BackendKey {
    pub fn new(backend: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for BackendKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.model)
    }
}

/// Aggregate performance of a key as of `last_updated`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceHistoryEntry {
    pub avg_cost: f64,
    pub avg_latency_ms: f64,
    pub quality_score: f64,
    pub success_rate: f64,
    pub last_updated: DateTime<Utc>,
    pub sample_count: u64,
    /// Fingerprint of the request that produced this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
}

/// One observed outcome to fold into the table
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PerformanceSample {
    pub cost: f64,
    pub latency_ms: f64,
    pub quality: f64,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

/// Concurrent, bounded performance history keyed by backend/model
pub struct PerformanceTable {
    entries: DashMap<BackendKey, VecDeque<PerformanceHistoryEntry>>,
    max_entries: usize,
}

impl PerformanceTable {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    /// Fold a sample into the key's aggregate and append the result
    pub fn record(
        &self,
        key: &BackendKey,
        sample: PerformanceSample,
        request_hash: Option<String>,
    ) -> PerformanceHistoryEntry {
        let mut history = self.entries.entry(key.clone()).or_default();

        let success = if sample.success { 1.0 } else { 0.0 };
        let entry = match history.back() {
            Some(prev) => {
                let n = prev.sample_count + 1;
                let blend = |old: f64, new: f64| old + (new - old) / n as f64;
                PerformanceHistoryEntry {
                    avg_cost: blend(prev.avg_cost, sanitize(sample.cost)),
                    avg_latency_ms: blend(prev.avg_latency_ms, sanitize(sample.latency_ms)),
                    quality_score: blend(prev.quality_score, sanitize(sample.quality)).clamp(0.0, 1.0),
                    success_rate: blend(prev.success_rate, success).clamp(0.0, 1.0),
                    last_updated: sample.observed_at,
                    sample_count: n,
                    request_hash,
                }
            }
            None => PerformanceHistoryEntry {
                avg_cost: sanitize(sample.cost),
                avg_latency_ms: sanitize(sample.latency_ms),
                quality_score: sanitize(sample.quality).clamp(0.0, 1.0),
                success_rate: success,
                last_updated: sample.observed_at,
                sample_count: 1,
                request_hash,
            },
        };

        history.push_back(entry.clone());
        while history.len() > self.max_entries {
            history.pop_front();
        }
        entry
    }

    /// Append a pre-aggregated entry (warm starts and tests)
    pub fn insert_entry(&self, key: &BackendKey, entry: PerformanceHistoryEntry) {
        let mut history = self.entries.entry(key.clone()).or_default();
        history.push_back(entry);
        while history.len() > self.max_entries {
            history.pop_front();
        }
    }

    /// Entries for a key, oldest first
    pub fn history(&self, key: &BackendKey) -> Vec<PerformanceHistoryEntry> {
        self.entries
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn latest(&self, key: &BackendKey) -> Option<PerformanceHistoryEntry> {
        self.entries.get(key).and_then(|h| h.back().cloned())
    }

    /// Observations aggregated so far for the key
    pub fn sample_count(&self, key: &BackendKey) -> u64 {
        self.entries
            .get(key)
            .and_then(|h| h.back().map(|e| e.sample_count))
            .unwrap_or(0)
    }

    pub fn keys(&self) -> Vec<BackendKey> {
        let mut keys: Vec<BackendKey> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for PerformanceTable {
    fn default() -> Self {
        Self::new(100)
    }
}

fn sanitize(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}
