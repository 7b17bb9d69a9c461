// Router module
// Ranks backend/model candidates under an objective and always returns a decision

mod decision;
mod predictor;

pub use decision::{Decision, Objective, ObjectiveWeights, PredictionResult, RoutingConstraints};
pub use predictor::{Predictor, BASELINE_CONFIDENCE};

use chrono::{DateTime, Utc};
use std::panic::{self, AssertUnwindSafe};
use uuid::Uuid;

use crate::config::RouterConfig;
use crate::features::RequestFeatures;
use crate::performance::{BackendKey, PerformanceTable};
use crate::providers::ModelCatalog;

/// Cost at which the normalised cost score reaches zero
const COST_CEILING: f64 = 0.1;

/// Latency (ms) at which the normalised time score reaches zero
const LATENCY_CEILING_MS: f64 = 5_000.0;

/// Reasoning attached to fallback selections
pub const FALLBACK_REASONING: &str = "fallback";

/// Predictive router over the performance table
#[derive(Debug, Clone)]
pub struct Router {
    predictor: Predictor,
    config: RouterConfig,
}

impl Router {
    pub fn new(config: RouterConfig, catalog: ModelCatalog) -> Self {
        Self {
            predictor: Predictor::new(config.clone(), catalog),
            config,
        }
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn catalog(&self) -> &ModelCatalog {
        self.predictor.catalog()
    }

    /// Make a routing decision; never fails
    ///
    /// Any candidate set that leaves nothing selectable, and any internal
    /// panic while predicting, yields the deterministic fallback decision.
    pub fn route(
        &self,
        table: &PerformanceTable,
        features: &RequestFeatures,
        backends: &[String],
        objective: Objective,
        constraints: &RoutingConstraints,
    ) -> Decision {
        let now = Utc::now();
        let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
            self.rank(table, features, backends, objective, constraints, now)
        }));

        match attempt {
            Ok(Some(decision)) => {
                tracing::debug!(
                    backend = %decision.selected.backend,
                    model = %decision.selected.model,
                    score = decision.score,
                    confidence = decision.selected.confidence,
                    objective = objective.as_str(),
                    "Routing decision: PREDICTED"
                );
                decision
            }
            Ok(None) => {
                tracing::debug!(
                    candidates = backends.len(),
                    "Routing decision: FALLBACK (no candidate passed filtering)"
                );
                self.fallback(backends, objective, now)
            }
            Err(_) => {
                tracing::warn!("Prediction panicked, using fallback decision");
                self.fallback(backends, objective, now)
            }
        }
    }

    /// Predictions for every candidate, in declaration order, unfiltered
    pub fn predict_all(
        &self,
        table: &PerformanceTable,
        features: &RequestFeatures,
        backends: &[String],
    ) -> Vec<PredictionResult> {
        let now = Utc::now();
        self.catalog()
            .candidates(backends)
            .into_iter()
            .map(|(backend, model)| {
                self.predictor
                    .predict(table, features, &BackendKey::new(backend, model), now)
            })
            .collect()
    }

    fn rank(
        &self,
        table: &PerformanceTable,
        features: &RequestFeatures,
        backends: &[String],
        objective: Objective,
        constraints: &RoutingConstraints,
        now: DateTime<Utc>,
    ) -> Option<Decision> {
        let mut scored: Vec<(f64, PredictionResult)> = self
            .catalog()
            .candidates(backends)
            .into_iter()
            .map(|(backend, model)| {
                self.predictor
                    .predict(table, features, &BackendKey::new(backend, model), now)
            })
            .filter(|p| constraints.admits(p))
            .filter(|p| p.confidence >= self.config.confidence_threshold)
            .map(|p| (score(&p, objective), p))
            .collect();

        // Stable sort: equal scores keep candidate declaration order
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut ranked = scored.into_iter();
        let (best_score, selected) = ranked.next()?;
        let alternatives = ranked
            .take(self.config.max_alternatives)
            .map(|(_, p)| p)
            .collect();

        Some(Decision {
            decision_id: Uuid::new_v4(),
            selected,
            alternatives,
            objective,
            score: best_score,
            is_fallback: false,
            experiment_id: None,
            decided_at: now,
        })
    }

    /// Deterministic decision used when nothing can be predicted
    pub fn fallback(&self, backends: &[String], objective: Objective, now: DateTime<Utc>) -> Decision {
        let backend = backends
            .first()
            .cloned()
            .unwrap_or_else(|| self.config.default_backend.clone());
        let model = self.catalog().default_model(&backend);

        Decision {
            decision_id: Uuid::new_v4(),
            selected: PredictionResult {
                backend,
                model,
                predicted_cost: 0.01,
                predicted_response_time_ms: 2_000.0,
                predicted_quality: 0.7,
                confidence: BASELINE_CONFIDENCE,
                reasoning: FALLBACK_REASONING.to_string(),
            },
            alternatives: Vec::new(),
            objective,
            score: 0.0,
            is_fallback: true,
            experiment_id: None,
            decided_at: now,
        }
    }
}

/// Objective-weighted score scaled by confidence, in [0, 1]
pub fn score(prediction: &PredictionResult, objective: Objective) -> f64 {
    let weights = objective.weights();
    let cost_score = 1.0 - (prediction.predicted_cost / COST_CEILING).min(1.0);
    let time_score = 1.0 - (prediction.predicted_response_time_ms / LATENCY_CEILING_MS).min(1.0);
    let quality_score = prediction.predicted_quality.clamp(0.0, 1.0);

    let weighted =
        weights.cost * cost_score + weights.time * time_score + weights.quality * quality_score;
    let value = weighted * prediction.confidence;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
