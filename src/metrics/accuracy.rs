// Accuracy monitor - audits predictions against observed outcomes
//
// Per backend/model key:
// - bounded buffer of (predicted, actual) pairs
// - a snapshot of averaged accuracy derived after every update
// - a baseline snapshot that later snapshots are compared to for drift

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::alerts::{Alert, AlertKind, AlertLog, AlertSeverity};
use super::stats::{proportion_interval, two_proportion_z, SignificanceTest};
use super::trends::{trend_of, Trend};
use super::types::OutcomeMetrics;
use crate::config::AccuracyConfig;
use crate::performance::BackendKey;

/// Floor for the actual value when computing relative error
const ACCURACY_EPSILON: f64 = 1e-6;

/// Snapshots considered when computing a key's trend
const TREND_WINDOW: usize = 20;

/// Relative accuracy of one predicted metric, in [0, 1]
pub fn metric_accuracy(predicted: f64, actual: f64) -> f64 {
    if !predicted.is_finite() || !actual.is_finite() {
        return 0.0;
    }
    if predicted == 0.0 && actual == 0.0 {
        return 1.0;
    }
    let error = (predicted - actual).abs() / actual.max(ACCURACY_EPSILON);
    (1.0 - error).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PredictionRecord {
    predicted: OutcomeMetrics,
    actual: OutcomeMetrics,
}

impl PredictionRecord {
    fn accuracies(&self) -> (f64, f64, f64) {
        (
            metric_accuracy(self.predicted.cost, self.actual.cost),
            metric_accuracy(self.predicted.latency_ms, self.actual.latency_ms),
            metric_accuracy(self.predicted.quality, self.actual.quality),
        )
    }
}

/// Rolling accuracy of one key at a point in time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracySnapshot {
    pub key: BackendKey,
    pub cost_accuracy: f64,
    pub time_accuracy: f64,
    pub quality_accuracy: f64,
    /// Mean of the three metric accuracies
    pub overall_accuracy: f64,
    pub sample_size: usize,
    /// 95% interval on the overall accuracy
    pub confidence_interval: (f64, f64),
    pub timestamp: DateTime<Utc>,
}

impl AccuracySnapshot {
    /// Build a snapshot from per-metric accuracies
    pub fn new(
        key: BackendKey,
        cost_accuracy: f64,
        time_accuracy: f64,
        quality_accuracy: f64,
        sample_size: usize,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let overall_accuracy = (cost_accuracy + time_accuracy + quality_accuracy) / 3.0;
        Self {
            key,
            cost_accuracy,
            time_accuracy,
            quality_accuracy,
            overall_accuracy,
            sample_size,
            confidence_interval: proportion_interval(overall_accuracy, sample_size),
            timestamp,
        }
    }
}

/// Recommended reaction to a drift magnitude
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftAction {
    None,
    Investigate,
    Alert,
    Fallback,
}

impl DriftAction {
    /// Higher bands supersede lower ones
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude > 0.15 {
            DriftAction::Fallback
        } else if magnitude > 0.1 {
            DriftAction::Alert
        } else if magnitude > 0.05 {
            DriftAction::Investigate
        } else {
            DriftAction::None
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftAction::None => "none",
            DriftAction::Investigate => "investigate",
            DriftAction::Alert => "alert",
            DriftAction::Fallback => "fallback",
        }
    }

    fn severity(&self) -> AlertSeverity {
        match self {
            DriftAction::Fallback => AlertSeverity::Critical,
            DriftAction::Alert => AlertSeverity::Warning,
            DriftAction::Investigate | DriftAction::None => AlertSeverity::Info,
        }
    }
}

/// Result of comparing a key's latest snapshot to its baseline
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DriftReport {
    pub key: BackendKey,
    /// Largest absolute change across cost, time and quality accuracy
    pub magnitude: f64,
    pub action: DriftAction,
    /// Two-sided p-value of the overall accuracy change
    pub p_value: f64,
    pub baseline: AccuracySnapshot,
    pub current: AccuracySnapshot,
    /// Alert raised by this check, if any
    pub alert: Option<Alert>,
}

/// Latest accuracy of one key for the insights query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyAccuracy {
    pub latest: AccuracySnapshot,
    pub trend: Trend,
    pub baseline_overall: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccuracySummary {
    pub keys: Vec<KeyAccuracy>,
    /// Overall accuracy across keys weighted by sample size
    pub overall_accuracy: Option<f64>,
    pub total_predictions: u64,
}

/// Per-key prediction accuracy tracking with drift detection
pub struct AccuracyMonitor {
    config: AccuracyConfig,
    significance: Box<dyn SignificanceTest>,
    predictions: DashMap<BackendKey, VecDeque<PredictionRecord>>,
    snapshots: DashMap<BackendKey, VecDeque<AccuracySnapshot>>,
    baselines: DashMap<BackendKey, AccuracySnapshot>,
    alerts: Arc<AlertLog>,
    total_predictions: AtomicU64,
}

impl AccuracyMonitor {
    pub fn new(config: AccuracyConfig, alerts: Arc<AlertLog>) -> Self {
        let significance = config.significance.build();
        Self {
            config,
            significance,
            predictions: DashMap::new(),
            snapshots: DashMap::new(),
            baselines: DashMap::new(),
            alerts,
            total_predictions: AtomicU64::new(0),
        }
    }

    /// Record a prediction against its outcome and return the new snapshot
    pub fn record(
        &self,
        key: &BackendKey,
        predicted: OutcomeMetrics,
        actual: OutcomeMetrics,
    ) -> AccuracySnapshot {
        self.record_at(key, predicted, actual, Utc::now())
    }

    pub fn record_at(
        &self,
        key: &BackendKey,
        predicted: OutcomeMetrics,
        actual: OutcomeMetrics,
        now: DateTime<Utc>,
    ) -> AccuracySnapshot {
        self.total_predictions.fetch_add(1, Ordering::Relaxed);

        let snapshot = {
            let mut buffer = self.predictions.entry(key.clone()).or_default();
            buffer.push_back(PredictionRecord { predicted, actual });
            while buffer.len() > self.config.max_predictions_per_key.max(1) {
                buffer.pop_front();
            }
            summarize(key, buffer.iter(), now)
        };

        {
            let mut history = self.snapshots.entry(key.clone()).or_default();
            history.push_back(snapshot.clone());
            while history.len() > self.config.max_snapshots_per_key.max(1) {
                history.pop_front();
            }
        }

        if snapshot.sample_size >= self.config.min_samples_for_baseline
            && !self.baselines.contains_key(key)
        {
            tracing::info!(
                key = %key,
                overall = snapshot.overall_accuracy,
                samples = snapshot.sample_size,
                "Accuracy baseline established"
            );
            self.baselines.insert(key.clone(), snapshot.clone());
        }

        snapshot
    }

    /// Replace the drift baseline for a key
    pub fn set_baseline(&self, key: &BackendKey, snapshot: AccuracySnapshot) {
        self.baselines.insert(key.clone(), snapshot);
    }

    pub fn baseline(&self, key: &BackendKey) -> Option<AccuracySnapshot> {
        self.baselines.get(key).map(|b| b.clone())
    }

    pub fn latest(&self, key: &BackendKey) -> Option<AccuracySnapshot> {
        self.snapshots.get(key).and_then(|h| h.back().cloned())
    }

    /// Snapshot history for a key, oldest first
    pub fn snapshots(&self, key: &BackendKey) -> Vec<AccuracySnapshot> {
        self.snapshots
            .get(key)
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Compare the latest snapshot to the baseline, alerting if material
    ///
    /// None when the key has no baseline or no snapshot yet.
    pub fn check_drift(&self, key: &BackendKey) -> Option<DriftReport> {
        let current = self.latest(key)?;
        let baseline = self.baseline(key)?;

        let magnitude = [
            (current.cost_accuracy - baseline.cost_accuracy).abs(),
            (current.time_accuracy - baseline.time_accuracy).abs(),
            (current.quality_accuracy - baseline.quality_accuracy).abs(),
        ]
        .into_iter()
        .fold(0.0, f64::max);
        let action = DriftAction::from_magnitude(magnitude);

        let z = two_proportion_z(
            baseline.overall_accuracy,
            baseline.sample_size,
            current.overall_accuracy,
            current.sample_size,
        );
        let df = (baseline.sample_size + current.sample_size).saturating_sub(2) as f64;
        let p_value = self.significance.p_value(z, df);

        let alert = if magnitude > self.config.drift_threshold {
            self.alerts.raise(Alert::new(
                AlertKind::AccuracyDrift,
                action.severity(),
                key.to_string(),
                format!(
                    "Prediction accuracy drifted by {:.3} for {} (recommended action: {})",
                    magnitude,
                    key,
                    action.as_str()
                ),
                magnitude,
                self.config.drift_threshold,
            ))
        } else {
            None
        };

        Some(DriftReport {
            key: key.clone(),
            magnitude,
            action,
            p_value,
            baseline,
            current,
            alert,
        })
    }

    /// Drift check across every key with a baseline
    pub fn evaluate(&self) -> Vec<DriftReport> {
        let mut keys: Vec<BackendKey> = self.baselines.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys.iter().filter_map(|key| self.check_drift(key)).collect()
    }

    /// Sample-weighted overall accuracy across keys
    pub fn overall_accuracy(&self) -> Option<f64> {
        let (weighted, samples) = self
            .snapshots
            .iter()
            .filter_map(|h| h.back().map(|s| (s.overall_accuracy, s.sample_size)))
            .fold((0.0, 0usize), |(w, n), (acc, size)| (w + acc * size as f64, n + size));
        if samples == 0 {
            None
        } else {
            Some(weighted / samples as f64)
        }
    }

    pub fn total_predictions(&self) -> u64 {
        self.total_predictions.load(Ordering::Relaxed)
    }

    pub fn summary(&self) -> AccuracySummary {
        let mut keys: Vec<KeyAccuracy> = self
            .snapshots
            .iter()
            .filter_map(|entry| {
                let history = entry.value();
                let latest = history.back()?.clone();
                let skip = history.len().saturating_sub(TREND_WINDOW);
                let trend = trend_of(history.iter().skip(skip).map(|s| s.overall_accuracy));
                Some(KeyAccuracy {
                    baseline_overall: self
                        .baselines
                        .get(entry.key())
                        .map(|b| b.overall_accuracy),
                    latest,
                    trend,
                })
            })
            .collect();
        keys.sort_by(|a, b| a.latest.key.cmp(&b.latest.key));

        AccuracySummary {
            keys,
            overall_accuracy: self.overall_accuracy(),
            total_predictions: self.total_predictions(),
        }
    }

    pub fn reset(&self) {
        self.predictions.clear();
        self.snapshots.clear();
        self.baselines.clear();
        self.total_predictions.store(0, Ordering::Relaxed);
    }
}

fn summarize<'a>(
    key: &BackendKey,
    records: impl Iterator<Item = &'a PredictionRecord>,
    now: DateTime<Utc>,
) -> AccuracySnapshot {
    let mut n = 0usize;
    let (mut cost, mut time, mut quality) = (0.0, 0.0, 0.0);
    for record in records {
        let (c, t, q) = record.accuracies();
        cost += c;
        time += t;
        quality += q;
        n += 1;
    }
    if n == 0 {
        return AccuracySnapshot::new(key.clone(), 0.0, 0.0, 0.0, 0, now);
    }
    let n_f = n as f64;
    AccuracySnapshot::new(key.clone(), cost / n_f, time / n_f, quality / n_f, n, now)
}
