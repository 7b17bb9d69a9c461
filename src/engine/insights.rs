// Aggregated analytics returned by the insights query

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::experiments::ExperimentSummary;
use crate::features::UserPatternSummary;
use crate::metrics::{AccuracySummary, HealthSnapshot};
use crate::performance::{BackendKey, PerformanceHistoryEntry};

/// Decision counters since start or the last reset
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct DecisionCounts {
    pub total: u64,
    pub predicted: u64,
    pub fallback: u64,
    pub experiment: u64,
}

/// Latest aggregate for one backend/model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyPerformance {
    pub key: BackendKey,
    pub latest: PerformanceHistoryEntry,
    pub history_len: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Insights {
    pub generated_at: DateTime<Utc>,
    pub decisions: DecisionCounts,
    pub outcomes_recorded: u64,
    /// Monitoring events lost to a full or closed queue
    pub dropped_events: u64,
    pub predictions_audited: u64,
    pub accuracy: AccuracySummary,
    pub performance: Vec<KeyPerformance>,
    pub user_patterns: Vec<UserPatternSummary>,
    pub experiments: ExperimentSummary,
    pub health: HealthSnapshot,
    pub unresolved_alerts: usize,
}

impl Insights {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
