// Per-candidate outcome prediction
//
// Strategy:
// - Cold keys (fewer than min_samples observations) use the catalog baseline
// - Warm keys use a recency-weighted average of recent aggregate entries
// - Confidence blends sample-size adequacy with recency

use chrono::{DateTime, Utc};

use super::decision::PredictionResult;
use crate::config::RouterConfig;
use crate::features::RequestFeatures;
use crate::performance::{BackendKey, PerformanceHistoryEntry, PerformanceTable};
use crate::providers::ModelCatalog;

/// Confidence assigned to every baseline estimate
pub const BASELINE_CONFIDENCE: f64 = 0.5;

/// Samples at which sample-size adequacy saturates
const FULL_CONFIDENCE_SAMPLES: f64 = 10.0;

/// Predicts cost, latency and quality for backend/model candidates
#[derive(Debug, Clone)]
pub struct Predictor {
    config: RouterConfig,
    catalog: ModelCatalog,
}

impl Predictor {
    pub fn new(config: RouterConfig, catalog: ModelCatalog) -> Self {
        Self { config, catalog }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Predict the outcome of routing `features` to `key` as of `now`
    pub fn predict(
        &self,
        table: &PerformanceTable,
        features: &RequestFeatures,
        key: &BackendKey,
        now: DateTime<Utc>,
    ) -> PredictionResult {
        let sample_count = table.sample_count(key);
        if sample_count < self.config.min_samples {
            return self.baseline(features, key, sample_count);
        }

        let window = chrono::Duration::days(self.config.history_window_days);
        let recent: Vec<PerformanceHistoryEntry> = table
            .history(key)
            .into_iter()
            .filter(|e| now.signed_duration_since(e.last_updated) <= window)
            .filter(|e| e.sample_count >= self.config.min_entry_samples)
            .collect();

        if recent.is_empty() {
            return self.baseline(features, key, sample_count);
        }

        self.from_history(features, key, &recent, sample_count, now)
    }

    fn baseline(
        &self,
        features: &RequestFeatures,
        key: &BackendKey,
        sample_count: u64,
    ) -> PredictionResult {
        let estimate = self.catalog.estimate(&key.backend, &key.model);
        let scale = 1.0 + features.complexity_score;

        PredictionResult {
            backend: key.backend.clone(),
            model: key.model.clone(),
            predicted_cost: estimate.cost * scale,
            predicted_response_time_ms: estimate.latency_ms * scale,
            predicted_quality: estimate.quality.clamp(0.0, 1.0),
            confidence: BASELINE_CONFIDENCE,
            reasoning: format!(
                "baseline estimate ({} of {} samples required)",
                sample_count, self.config.min_samples
            ),
        }
    }

    fn from_history(
        &self,
        features: &RequestFeatures,
        key: &BackendKey,
        entries: &[PerformanceHistoryEntry],
        sample_count: u64,
        now: DateTime<Utc>,
    ) -> PredictionResult {
        let mut weight_sum = 0.0;
        let mut cost = 0.0;
        let mut latency = 0.0;
        let mut quality = 0.0;
        let mut recency_sum = 0.0;

        for entry in entries {
            let age_days = age_in_days(now, entry.last_updated);
            // Strictly positive for any finite age
            let weight = 1.0 / (1.0 + age_days);

            weight_sum += weight;
            cost += entry.avg_cost * weight;
            latency += entry.avg_latency_ms * weight;
            quality += entry.quality_score * weight;
            recency_sum += self.recency_confidence(age_days);
        }

        let complexity = features.complexity_score;
        let avg_recency = recency_sum / entries.len() as f64;
        let adequacy = (sample_count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
        let confidence = (0.6 * adequacy + 0.4 * avg_recency).clamp(0.0, 1.0);

        PredictionResult {
            backend: key.backend.clone(),
            model: key.model.clone(),
            predicted_cost: cost / weight_sum * (1.0 + 0.3 * complexity),
            predicted_response_time_ms: latency / weight_sum * (1.0 + 0.3 * complexity),
            predicted_quality: (quality / weight_sum * (1.0 + 0.1 * complexity)).clamp(0.0, 1.0),
            confidence,
            reasoning: format!(
                "historical average of {} entries ({} samples, recency {:.2})",
                entries.len(),
                sample_count,
                avg_recency
            ),
        }
    }

    /// Linear decay from 1 (now) to 0 at the recency horizon
    fn recency_confidence(&self, age_days: f64) -> f64 {
        let horizon = self.config.recency_horizon_days.max(f64::EPSILON);
        (1.0 - age_days / horizon).clamp(0.0, 1.0)
    }
}

fn age_in_days(now: DateTime<Utc>, then: DateTime<Utc>) -> f64 {
    let secs = now.signed_duration_since(then).num_milliseconds() as f64 / 1000.0;
    (secs / 86_400.0).max(0.0)
}
