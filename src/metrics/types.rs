// Metrics data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::PredictionResult;

/// Cost, latency and quality of one request, predicted or observed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMetrics {
    pub cost: f64,
    pub latency_ms: f64,
    pub quality: f64,
}

impl From<&PredictionResult> for OutcomeMetrics {
    fn from(prediction: &PredictionResult) -> Self {
        Self {
            cost: prediction.predicted_cost,
            latency_ms: prediction.predicted_response_time_ms,
            quality: prediction.predicted_quality,
        }
    }
}

/// One completed request as seen by the health monitor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSample {
    pub timestamp: DateTime<Utc>,
    pub backend: String,
    pub latency_ms: f64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_hash: Option<String>,
}

impl RequestSample {
    pub fn new(backend: impl Into<String>, latency_ms: f64, success: bool) -> Self {
        Self {
            timestamp: Utc::now(),
            backend: backend.into(),
            latency_ms,
            success,
            request_hash: None,
        }
    }

    pub fn with_request_hash(mut self, hash: impl Into<String>) -> Self {
        self.request_hash = Some(hash.into());
        self
    }
}
