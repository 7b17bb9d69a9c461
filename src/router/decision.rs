// Routing decision types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::performance::BackendKey;

/// What the caller wants the selection to favour
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Objective {
    Cost,
    Speed,
    Quality,
    Balanced,
}

/// Score weights for one objective; each row sums to 1.0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectiveWeights {
    pub cost: f64,
    pub time: f64,
    pub quality: f64,
}

impl Objective {
    pub fn weights(&self) -> ObjectiveWeights {
        match self {
            Objective::Cost => ObjectiveWeights {
                cost: 0.7,
                time: 0.1,
                quality: 0.2,
            },
            Objective::Speed => ObjectiveWeights {
                cost: 0.1,
                time: 0.7,
                quality: 0.2,
            },
            Objective::Quality => ObjectiveWeights {
                cost: 0.1,
                time: 0.2,
                quality: 0.7,
            },
            Objective::Balanced => ObjectiveWeights {
                cost: 0.333,
                time: 0.333,
                quality: 0.333,
            },
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::Cost => "cost",
            Objective::Speed => "speed",
            Objective::Quality => "quality",
            Objective::Balanced => "balanced",
        }
    }
}

impl Default for Objective {
    fn default() -> Self {
        Objective::Balanced
    }
}

/// Hard limits a prediction must satisfy to be selectable
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingConstraints {
    #[serde(default)]
    pub max_cost: Option<f64>,
    #[serde(default)]
    pub min_quality: Option<f64>,
    #[serde(default)]
    pub max_latency_ms: Option<f64>,
}

impl RoutingConstraints {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_max_cost(mut self, max_cost: f64) -> Self {
        self.max_cost = Some(max_cost);
        self
    }

    pub fn with_min_quality(mut self, min_quality: f64) -> Self {
        self.min_quality = Some(min_quality);
        self
    }

    pub fn with_max_latency_ms(mut self, max_latency_ms: f64) -> Self {
        self.max_latency_ms = Some(max_latency_ms);
        self
    }

    /// True when the prediction violates no limit
    pub fn admits(&self, prediction: &PredictionResult) -> bool {
        if let Some(max_cost) = self.max_cost {
            if prediction.predicted_cost > max_cost {
                return false;
            }
        }
        if let Some(min_quality) = self.min_quality {
            if prediction.predicted_quality < min_quality {
                return false;
            }
        }
        if let Some(max_latency) = self.max_latency_ms {
            if prediction.predicted_response_time_ms > max_latency {
                return false;
            }
        }
        true
    }
}

/// Predicted outcome of sending a request to one backend/model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub backend: String,
    pub model: String,
    pub predicted_cost: f64,
    pub predicted_response_time_ms: f64,
    pub predicted_quality: f64,
    /// In [0, 1]
    pub confidence: f64,
    pub reasoning: String,
}

impl PredictionResult {
    pub fn key(&self) -> BackendKey {
        BackendKey::new(self.backend.clone(), self.model.clone())
    }
}

/// Selected backend plus ranked alternatives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: Uuid,
    pub selected: PredictionResult,
    /// Up to three runners-up, best first
    pub alternatives: Vec<PredictionResult>,
    pub objective: Objective,
    /// Optimization score of the selection
    pub score: f64,
    pub is_fallback: bool,
    /// Experiment that chose the selection, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl Decision {
    pub fn backend(&self) -> &str {
        &self.selected.backend
    }

    pub fn model(&self) -> &str {
        &self.selected.model
    }
}
