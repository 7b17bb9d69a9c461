// Feature extraction
//
// Turns a normalized request into the fixed feature record the predictor
// consumes. Extraction never fails: missing fields fall back to defaults.

mod classifier;
mod patterns;

pub use classifier::{classify, complexity_score, RequestType};
pub use patterns::{UserPatternStore, UserPatternSummary, MIN_PATTERN_OBSERVATIONS};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::CompletionRequest;

/// Routing features derived from a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFeatures {
    /// Total characters across all messages
    pub prompt_length: usize,
    pub message_count: usize,
    pub has_system_message: bool,
    /// In [0, 1]
    pub complexity_score: f64,
    pub request_type: RequestType,
    /// `<type>_<complex|simple>` once the user has enough history
    pub user_pattern: Option<String>,
    /// 0-23, UTC
    pub hour_of_day: u32,
    /// 0 = Sunday
    pub day_of_week: u32,
}

impl Default for RequestFeatures {
    fn default() -> Self {
        Self {
            prompt_length: 0,
            message_count: 0,
            has_system_message: false,
            complexity_score: 0.0,
            request_type: RequestType::SimpleChat,
            user_pattern: None,
            hour_of_day: 0,
            day_of_week: 0,
        }
    }
}

/// Extracts request features and owns the per-user history
pub struct FeatureExtractor {
    patterns: UserPatternStore,
}

impl FeatureExtractor {
    pub fn new(max_user_history: usize) -> Self {
        Self {
            patterns: UserPatternStore::new(max_user_history),
        }
    }

    /// Extract features using the current wall clock
    pub fn extract(&self, request: &CompletionRequest, user_id: Option<&str>) -> RequestFeatures {
        self.extract_at(request, user_id, Utc::now())
    }

    /// Extract features as of `now`
    pub fn extract_at(
        &self,
        request: &CompletionRequest,
        user_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> RequestFeatures {
        RequestFeatures {
            prompt_length: request.text_len(),
            message_count: request.messages.len(),
            has_system_message: request.has_system_message(),
            complexity_score: complexity_score(request),
            request_type: classify(&request.text()),
            user_pattern: user_id.and_then(|id| self.patterns.pattern_id(id)),
            hour_of_day: now.hour(),
            day_of_week: now.weekday().num_days_from_sunday(),
        }
    }

    /// Add a completed request to the user's history
    pub fn observe(&self, user_id: &str, features: &RequestFeatures) {
        self.patterns
            .record(user_id, features.request_type, features.complexity_score);
    }

    pub fn patterns(&self) -> &UserPatternStore {
        &self.patterns
    }

    pub fn user_patterns(&self) -> Vec<UserPatternSummary> {
        self.patterns.summaries()
    }

    pub fn reset(&self) {
        self.patterns.clear();
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new(50)
    }
}
