// Configuration structs
//
// Every subsystem gets a typed section with its defaults applied once, at
// construction. Unknown keys in a config file are ignored; missing keys fall
// back to the defaults below.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{EngineError, EngineResult};
use crate::metrics::{SamplingStrategy, SignificanceMethod};
use crate::router::Objective;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub router: RouterConfig,
    pub learning: LearningConfig,
    pub accuracy: AccuracyConfig,
    pub experiments: ExperimentsConfig,
    pub health: HealthConfig,
    pub sampling: SamplingConfig,
    pub queue: QueueConfig,
}

impl EngineConfig {
    /// Reject values that would make a subsystem misbehave
    pub fn validate(&self) -> EngineResult<()> {
        fn unit(name: &str, value: f64) -> EngineResult<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(EngineError::Config(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )))
            }
        }

        fn positive(name: &str, value: u64) -> EngineResult<()> {
            if value > 0 {
                Ok(())
            } else {
                Err(EngineError::Config(format!("{} must be greater than zero", name)))
            }
        }

        unit("router.confidence_threshold", self.router.confidence_threshold)?;
        unit("accuracy.drift_threshold", self.accuracy.drift_threshold)?;
        unit("health.max_error_rate", self.health.max_error_rate)?;
        unit("health.min_routing_accuracy", self.health.min_routing_accuracy)?;
        unit("sampling.base_rate", self.sampling.base_rate)?;
        unit("sampling.min_rate", self.sampling.min_rate)?;

        positive("accuracy.snapshot_interval_secs", self.accuracy.snapshot_interval_secs)?;
        positive(
            "experiments.analysis_interval_secs",
            self.experiments.analysis_interval_secs,
        )?;
        positive("health.snapshot_interval_secs", self.health.snapshot_interval_secs)?;
        positive("queue.capacity", self.queue.capacity as u64)?;

        if self.experiments.trim_results_to > self.experiments.max_results {
            return Err(EngineError::Config(
                "experiments.trim_results_to exceeds experiments.max_results".to_string(),
            ));
        }
        if self.health.trim_latency_samples_to > self.health.max_latency_samples {
            return Err(EngineError::Config(
                "health.trim_latency_samples_to exceeds health.max_latency_samples".to_string(),
            ));
        }

        Ok(())
    }
}

/// Predictor and selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Below this many observations a key uses the baseline estimate
    pub min_samples: u64,
    /// History entries older than this are ignored
    pub history_window_days: i64,
    /// Entries aggregating fewer samples than this are ignored
    pub min_entry_samples: u64,
    /// Predictions below this confidence are never selected
    pub confidence_threshold: f64,
    /// Recency confidence reaches zero after this many days
    pub recency_horizon_days: f64,
    /// Alternatives returned alongside the selection
    pub max_alternatives: usize,
    /// Backend used for the fallback when no candidates were supplied
    pub default_backend: String,
    pub default_objective: Objective,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            history_window_days: 7,
            min_entry_samples: 2,
            confidence_threshold: 0.6,
            recency_horizon_days: 14.0,
            max_alternatives: 3,
            default_backend: "openai".to_string(),
            default_objective: Objective::Balanced,
        }
    }
}

/// Outcome learner retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub max_entries_per_key: usize,
    pub max_user_history: usize,
    /// Quality assumed for successful outcomes nobody rated
    pub default_quality: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            max_entries_per_key: 100,
            max_user_history: 50,
            default_quality: 0.8,
        }
    }
}

/// Prediction accuracy auditing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyConfig {
    pub max_predictions_per_key: usize,
    pub max_snapshots_per_key: usize,
    /// Drift below this magnitude never raises an alert
    pub drift_threshold: f64,
    pub alert_cooldown_secs: u64,
    /// Samples a snapshot needs before it becomes the drift baseline
    pub min_samples_for_baseline: usize,
    pub snapshot_interval_secs: u64,
    pub significance: SignificanceMethod,
}

impl AccuracyConfig {
    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }
}

impl Default for AccuracyConfig {
    fn default() -> Self {
        Self {
            max_predictions_per_key: 1_000,
            max_snapshots_per_key: 100,
            drift_threshold: 0.05,
            alert_cooldown_secs: 300,
            min_samples_for_baseline: 10,
            snapshot_interval_secs: 60,
            significance: SignificanceMethod::Normal,
        }
    }
}

/// Experiment framework housekeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentsConfig {
    pub analysis_interval_secs: u64,
    pub max_results: usize,
    pub trim_results_to: usize,
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: 60,
            max_results: 10_000,
            trim_results_to: 8_000,
        }
    }
}

/// Health thresholds and retention
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Average latency above this costs 20 points
    pub max_response_time_ms: f64,
    /// Error rate above this costs 25 points
    pub max_error_rate: f64,
    /// Resident memory above this costs 15 points
    pub max_memory_mb: f64,
    /// Throughput below this costs 10 points; 0 disables the check
    pub min_throughput_rps: f64,
    /// Routing accuracy below this costs 15 points
    pub min_routing_accuracy: f64,
    /// Average routing overhead above this costs 10 points
    pub max_routing_latency_ms: f64,
    /// Requests slower than this are always sampled
    pub slow_request_threshold_ms: f64,
    pub max_latency_samples: usize,
    pub trim_latency_samples_to: usize,
    pub max_metric_log: usize,
    pub snapshot_interval_secs: u64,
    pub snapshot_retention_hours: i64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_response_time_ms: 3_000.0,
            max_error_rate: 0.05,
            max_memory_mb: 2_048.0,
            min_throughput_rps: 0.0,
            min_routing_accuracy: 0.7,
            max_routing_latency_ms: 10.0,
            slow_request_threshold_ms: 5_000.0,
            max_latency_samples: 10_000,
            trim_latency_samples_to: 5_000,
            max_metric_log: 1_000,
            snapshot_interval_secs: 60,
            snapshot_retention_hours: 24 * 7,
        }
    }
}

/// Adaptive sampling of health samples
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub strategy: SamplingStrategy,
    pub base_rate: f64,
    /// Requests per second above which adaptive sampling backs off
    pub high_volume_threshold: f64,
    pub min_rate: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            strategy: SamplingStrategy::Adaptive,
            base_rate: 1.0,
            high_volume_threshold: 100.0,
            min_rate: 0.01,
        }
    }
}

/// Background monitoring queue
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}
