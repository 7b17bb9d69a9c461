// Outcome learner - folds observed outcomes back into the engine
//
// Runs after the real backend call has completed and been billed, so it
// never fails: bad inputs are neutralised and logged. The performance table,
// user history and health counters are updated inline. Sampled latencies,
// predictions to audit and experiment results are handed to the monitoring
// queue; under load the sampler thins that queue before it fills.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::LearningConfig;
use crate::features::FeatureExtractor;
use crate::metrics::{HealthMonitor, OutcomeMetrics, RequestSample};
use crate::performance::{BackendKey, PerformanceHistoryEntry, PerformanceSample, PerformanceTable};
use crate::providers::CompletionRequest;
use crate::router::PredictionResult;

/// What actually happened when a request was served
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualOutcome {
    pub cost: f64,
    pub latency_ms: f64,
    /// Caller-supplied rating in [0, 1], if any
    #[serde(default)]
    pub quality: Option<f64>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActualOutcome {
    pub fn success(cost: f64, latency_ms: f64) -> Self {
        Self {
            cost,
            latency_ms,
            quality: None,
            success: true,
            error: None,
        }
    }

    pub fn failure(latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            cost: 0.0,
            latency_ms,
            quality: None,
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = Some(quality);
        self
    }
}

/// Outcome bookkeeping handed to the background worker
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeEvent {
    pub key: BackendKey,
    pub user_id: Option<String>,
    /// Present when the caller routed with a prediction
    pub predicted: Option<OutcomeMetrics>,
    /// Experiment whose arm served the request
    pub experiment_id: Option<String>,
    pub actual: OutcomeMetrics,
    pub success: bool,
    /// Latency kept by the health sampler
    pub sampled: bool,
    pub request_hash: String,
    pub recorded_at: DateTime<Utc>,
}

impl OutcomeEvent {
    /// Whether the worker has anything to do with this event
    pub fn needs_processing(&self) -> bool {
        self.sampled || self.predicted.is_some() || self.experiment_id.is_some()
    }
}

/// Work items for the monitoring queue
#[derive(Debug)]
pub enum MonitoringEvent {
    Outcome(OutcomeEvent),
    /// Acknowledged once every earlier event has been processed
    Flush(oneshot::Sender<()>),
}

pub struct OutcomeLearner {
    config: LearningConfig,
    table: Arc<PerformanceTable>,
    extractor: Arc<FeatureExtractor>,
    health: Option<Arc<HealthMonitor>>,
    events: Option<mpsc::Sender<MonitoringEvent>>,
    recorded: AtomicU64,
    dropped: AtomicU64,
}

impl OutcomeLearner {
    pub fn new(
        config: LearningConfig,
        table: Arc<PerformanceTable>,
        extractor: Arc<FeatureExtractor>,
    ) -> Self {
        Self {
            config,
            table,
            extractor,
            health: None,
            events: None,
            recorded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Count requests and errors on this monitor as they are recorded
    pub fn with_health(mut self, health: Arc<HealthMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Forward monitoring work to this queue
    pub fn with_events(mut self, events: mpsc::Sender<MonitoringEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Learn from one served request; returns the updated aggregate
    pub fn record(
        &self,
        request: &CompletionRequest,
        user_id: Option<&str>,
        backend: &str,
        model: &str,
        outcome: &ActualOutcome,
        predicted: Option<&PredictionResult>,
        experiment_id: Option<&str>,
    ) -> PerformanceHistoryEntry {
        let key = BackendKey::new(backend, model);
        let now = Utc::now();
        let request_hash = request.fingerprint();

        if !outcome.cost.is_finite() || !outcome.latency_ms.is_finite() {
            tracing::warn!(
                key = %key,
                cost = outcome.cost,
                latency_ms = outcome.latency_ms,
                "Non-finite outcome values replaced with zero"
            );
        }
        if let Some(error) = &outcome.error {
            tracing::debug!(key = %key, request = %request_hash, "Backend call failed: {}", error);
        }

        let quality = self.resolve_quality(&key, outcome);
        let actual = OutcomeMetrics {
            cost: finite_or_zero(outcome.cost),
            latency_ms: finite_or_zero(outcome.latency_ms),
            quality,
        };

        let entry = self.table.record(
            &key,
            PerformanceSample {
                cost: actual.cost,
                latency_ms: actual.latency_ms,
                quality,
                success: outcome.success,
                observed_at: now,
            },
            Some(request_hash.clone()),
        );

        if let Some(user) = user_id {
            let features = self.extractor.extract_at(request, Some(user), now);
            self.extractor.observe(user, &features);
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            key = %key,
            samples = entry.sample_count,
            avg_cost = entry.avg_cost,
            avg_latency_ms = entry.avg_latency_ms,
            quality = entry.quality_score,
            "Outcome recorded"
        );

        let sampled = match &self.health {
            Some(health) => health.count_request(&RequestSample {
                timestamp: now,
                backend: key.backend.clone(),
                latency_ms: actual.latency_ms,
                success: outcome.success,
                request_hash: Some(request_hash.clone()),
            }),
            None => true,
        };

        let event = OutcomeEvent {
            key,
            user_id: user_id.map(str::to_string),
            predicted: predicted.map(OutcomeMetrics::from),
            experiment_id: experiment_id.map(str::to_string),
            actual,
            success: outcome.success,
            sampled,
            request_hash,
            recorded_at: now,
        };
        if event.needs_processing() {
            self.forward(MonitoringEvent::Outcome(event));
        }

        entry
    }

    /// Rated quality, else 0 for failures, else the key's running quality
    fn resolve_quality(&self, key: &BackendKey, outcome: &ActualOutcome) -> f64 {
        if !outcome.success {
            return 0.0;
        }
        match outcome.quality {
            Some(q) if q.is_finite() => q.clamp(0.0, 1.0),
            Some(q) => {
                tracing::warn!(key = %key, quality = q, "Ignoring non-finite quality rating");
                self.prior_quality(key)
            }
            None => self.prior_quality(key),
        }
    }

    fn prior_quality(&self, key: &BackendKey) -> f64 {
        self.table
            .latest(key)
            .map(|e| e.quality_score)
            .unwrap_or(self.config.default_quality)
    }

    /// Enqueue without waiting; a full queue drops the event
    fn forward(&self, event: MonitoringEvent) {
        let Some(events) = &self.events else {
            return;
        };
        match events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::debug!(dropped, "Monitoring queue full, dropping outcome event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Monitoring queue closed, outcome not forwarded");
            }
        }
    }

    pub fn recorded(&self) -> u64 {
        self.recorded.load(Ordering::Relaxed)
    }

    /// Events lost to a full or closed queue
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.recorded.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}
