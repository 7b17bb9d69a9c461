// Experiment definitions and lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::analysis::ExperimentAnalysis;
use crate::errors::{EngineError, EngineResult};
use crate::performance::BackendKey;

/// Allowed deviation of the arm weights from 1.0
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// Smallest accepted per-arm sample size
pub const MIN_SAMPLE_SIZE_FLOOR: usize = 10;

/// Which side of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArmId {
    A,
    B,
}

impl ArmId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArmId::A => "a",
            ArmId::B => "b",
        }
    }
}

/// One competing backend/model configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentArm {
    pub backend: String,
    pub model: String,
    /// Share of participating users routed to this arm
    pub weight: f64,
}

impl ExperimentArm {
    pub fn new(backend: impl Into<String>, model: impl Into<String>, weight: f64) -> Self {
        Self {
            backend: backend.into(),
            model: model.into(),
            weight,
        }
    }

    pub fn key(&self) -> BackendKey {
        BackendKey::new(self.backend.clone(), self.model.clone())
    }
}

/// Metric the arms are compared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimaryMetric {
    Cost,
    Latency,
    Quality,
    SuccessRate,
}

impl PrimaryMetric {
    pub fn lower_is_better(&self) -> bool {
        matches!(self, PrimaryMetric::Cost | PrimaryMetric::Latency)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PrimaryMetric::Cost => "cost",
            PrimaryMetric::Latency => "latency",
            PrimaryMetric::Quality => "quality",
            PrimaryMetric::SuccessRate => "success_rate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperimentStatus {
    Draft,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl ExperimentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "draft",
            ExperimentStatus::Running => "running",
            ExperimentStatus::Paused => "paused",
            ExperimentStatus::Completed => "completed",
            ExperimentStatus::Stopped => "stopped",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Stopped)
    }

    /// Lifecycle edges: draft -> running, running <-> paused,
    /// running or paused -> completed or stopped
    pub fn can_transition_to(&self, next: ExperimentStatus) -> bool {
        use ExperimentStatus::*;
        matches!(
            (self, next),
            (Draft, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Stopped)
                | (Paused, Completed)
                | (Paused, Stopped)
        )
    }
}

/// Experiment definition supplied at creation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    pub name: String,
    pub variant_a: ExperimentArm,
    pub variant_b: ExperimentArm,
    /// Fraction of eligible requests that take part
    pub traffic_allocation: f64,
    /// Alpha for the arm comparison
    pub significance_level: f64,
    /// Per-arm samples required before a verdict
    pub min_sample_size: usize,
    /// Running time after which the experiment completes on its own
    #[serde(default)]
    pub max_duration_hours: Option<u64>,
    pub primary_metric: PrimaryMetric,
    /// Complete automatically once a winner is clear
    pub auto_stop: bool,
    /// Confidence (1 - p) required for auto-stop
    pub winner_threshold: f64,
}

impl ExperimentConfig {
    /// Config with the usual defaults: full allocation, alpha 0.05, 100
    /// samples per arm, cost as the primary metric, auto-stop at 95%
    pub fn new(name: impl Into<String>, variant_a: ExperimentArm, variant_b: ExperimentArm) -> Self {
        Self {
            name: name.into(),
            variant_a,
            variant_b,
            traffic_allocation: 1.0,
            significance_level: 0.05,
            min_sample_size: 100,
            max_duration_hours: None,
            primary_metric: PrimaryMetric::Cost,
            auto_stop: true,
            winner_threshold: 0.95,
        }
    }

    pub fn with_traffic_allocation(mut self, allocation: f64) -> Self {
        self.traffic_allocation = allocation;
        self
    }

    pub fn with_significance_level(mut self, level: f64) -> Self {
        self.significance_level = level;
        self
    }

    pub fn with_min_sample_size(mut self, size: usize) -> Self {
        self.min_sample_size = size;
        self
    }

    pub fn with_max_duration_hours(mut self, hours: u64) -> Self {
        self.max_duration_hours = Some(hours);
        self
    }

    pub fn with_primary_metric(mut self, metric: PrimaryMetric) -> Self {
        self.primary_metric = metric;
        self
    }

    pub fn with_auto_stop(mut self, enabled: bool, winner_threshold: f64) -> Self {
        self.auto_stop = enabled;
        self.winner_threshold = winner_threshold;
        self
    }

    /// Reject invalid definitions; nothing is corrected silently
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |msg: String| Err(EngineError::InvalidExperiment(msg));

        if self.name.trim().is_empty() {
            return invalid("name must not be empty".to_string());
        }
        for (label, arm) in [("variant_a", &self.variant_a), ("variant_b", &self.variant_b)] {
            if arm.backend.trim().is_empty() {
                return invalid(format!("{} has an empty backend", label));
            }
            if !arm.weight.is_finite() || arm.weight < 0.0 {
                return invalid(format!("{} weight must be non-negative, got {}", label, arm.weight));
            }
        }

        let weight_sum = self.variant_a.weight + self.variant_b.weight;
        if (weight_sum - 1.0).abs() > WEIGHT_TOLERANCE {
            return invalid(format!("arm weights must sum to 1.0, got {}", weight_sum));
        }
        if !(0.0..=1.0).contains(&self.traffic_allocation) {
            return invalid(format!(
                "traffic allocation must be within [0, 1], got {}",
                self.traffic_allocation
            ));
        }
        if !(0.0..=1.0).contains(&self.significance_level) {
            return invalid(format!(
                "significance level must be within [0, 1], got {}",
                self.significance_level
            ));
        }
        if self.min_sample_size < MIN_SAMPLE_SIZE_FLOOR {
            return invalid(format!(
                "min sample size must be at least {}, got {}",
                MIN_SAMPLE_SIZE_FLOOR, self.min_sample_size
            ));
        }
        if !(0.0..=1.0).contains(&self.winner_threshold) {
            return invalid(format!(
                "winner threshold must be within [0, 1], got {}",
                self.winner_threshold
            ));
        }
        Ok(())
    }
}

/// A registered experiment and its lifecycle state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Experiment {
    pub id: String,
    pub config: ExperimentConfig,
    pub status: ExperimentStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub stop_reason: Option<String>,
    pub winner: Option<ArmId>,
    pub latest_analysis: Option<ExperimentAnalysis>,
}

impl Experiment {
    pub(crate) fn new(id: String, config: ExperimentConfig, now: DateTime<Utc>) -> Self {
        Self {
            id,
            config,
            status: ExperimentStatus::Draft,
            created_at: now,
            started_at: None,
            ended_at: None,
            stop_reason: None,
            winner: None,
            latest_analysis: None,
        }
    }

    pub fn arm(&self, arm: ArmId) -> &ExperimentArm {
        match arm {
            ArmId::A => &self.config.variant_a,
            ArmId::B => &self.config.variant_b,
        }
    }

    /// True once a running experiment has outlived its maximum duration
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.started_at, self.config.max_duration_hours) {
            (Some(started), Some(hours)) => {
                now.signed_duration_since(started) > chrono::Duration::hours(hours as i64)
            }
            _ => false,
        }
    }

    /// Apply a lifecycle transition
    pub(crate) fn transition(
        &mut self,
        next: ExperimentStatus,
        now: DateTime<Utc>,
        reason: Option<String>,
    ) -> EngineResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                id: self.id.clone(),
                from: self.status.as_str().to_string(),
                to: next.as_str().to_string(),
            });
        }

        if next == ExperimentStatus::Running && self.started_at.is_none() {
            self.started_at = Some(now);
        }
        if next.is_finished() {
            self.ended_at = Some(now);
            self.stop_reason = reason;
        }

        tracing::info!(
            experiment = %self.id,
            name = %self.config.name,
            from = self.status.as_str(),
            to = next.as_str(),
            "Experiment status changed"
        );
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(weight_a: f64, weight_b: f64) -> ExperimentConfig {
        ExperimentConfig::new(
            "cost-check",
            ExperimentArm::new("openai", "gpt-4o-mini", weight_a),
            ExperimentArm::new("anthropic", "claude-3-5-haiku", weight_b),
        )
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        assert!(config(0.5, 0.5).validate().is_ok());
        assert!(matches!(
            config(0.7, 0.4).validate(),
            Err(EngineError::InvalidExperiment(_))
        ));
        assert!(config(0.3, 0.7 + 1e-9).validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_fields() {
        assert!(config(0.5, 0.5).with_traffic_allocation(1.2).validate().is_err());
        assert!(config(0.5, 0.5).with_significance_level(-0.1).validate().is_err());
        assert!(config(0.5, 0.5).with_min_sample_size(9).validate().is_err());
        assert!(config(1.5, -0.5).validate().is_err());
    }

    #[test]
    fn test_lifecycle_edges() {
        use ExperimentStatus::*;
        assert!(Draft.can_transition_to(Running));
        assert!(Running.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Running));
        assert!(Running.can_transition_to(Completed));
        assert!(!Draft.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Paused));
    }

    #[test]
    fn test_transition_sets_timestamps() {
        let now = Utc::now();
        let mut experiment = Experiment::new("e1".to_string(), config(0.5, 0.5), now);
        experiment.transition(ExperimentStatus::Running, now, None).unwrap();
        assert_eq!(experiment.started_at, Some(now));

        let err = experiment
            .transition(ExperimentStatus::Draft, now, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        experiment
            .transition(ExperimentStatus::Stopped, now, Some("manual".to_string()))
            .unwrap();
        assert_eq!(experiment.ended_at, Some(now));
        assert_eq!(experiment.stop_reason.as_deref(), Some("manual"));
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let mut experiment =
            Experiment::new("e2".to_string(), config(0.5, 0.5).with_max_duration_hours(1), now);
        assert!(!experiment.is_expired(now + chrono::Duration::hours(2)));
        experiment.transition(ExperimentStatus::Running, now, None).unwrap();
        assert!(!experiment.is_expired(now + chrono::Duration::minutes(30)));
        assert!(experiment.is_expired(now + chrono::Duration::hours(2)));
    }
}
