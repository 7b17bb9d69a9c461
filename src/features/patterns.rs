// Per-user request history used to derive user pattern ids

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use super::classifier::RequestType;

/// Observations needed before a user gets a pattern id
pub const MIN_PATTERN_OBSERVATIONS: usize = 3;

/// Trailing window used for the complexity average
const COMPLEXITY_WINDOW: usize = 10;

/// Average complexity above which a user is considered "complex"
const COMPLEX_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone)]
struct Observation {
    request_type: RequestType,
    complexity: f64,
    observed_at: DateTime<Utc>,
}

/// Summary of one user's history for the insights query
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserPatternSummary {
    pub user_id: String,
    pub observations: usize,
    pub dominant_type: RequestType,
    pub average_complexity: f64,
    pub pattern_id: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Concurrent per-user history, bounded per user
pub struct UserPatternStore {
    history: DashMap<String, VecDeque<Observation>>,
    max_history: usize,
}

impl UserPatternStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: DashMap::new(),
            max_history: max_history.max(1),
        }
    }

    /// Append an observation, evicting the oldest beyond the limit
    pub fn record(&self, user_id: &str, request_type: RequestType, complexity: f64) {
        let mut entry = self.history.entry(user_id.to_string()).or_default();
        entry.push_back(Observation {
            request_type,
            complexity: complexity.clamp(0.0, 1.0),
            observed_at: Utc::now(),
        });
        while entry.len() > self.max_history {
            entry.pop_front();
        }
    }

    /// Pattern id for the user, once enough history exists
    pub fn pattern_id(&self, user_id: &str) -> Option<String> {
        let history = self.history.get(user_id)?;
        Self::derive_pattern(&history)
    }

    pub fn observation_count(&self, user_id: &str) -> usize {
        self.history.get(user_id).map_or(0, |h| h.len())
    }

    /// Summaries for every known user, sorted by user id
    pub fn summaries(&self) -> Vec<UserPatternSummary> {
        let mut out: Vec<UserPatternSummary> = self
            .history
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| {
                let history = entry.value();
                UserPatternSummary {
                    user_id: entry.key().clone(),
                    observations: history.len(),
                    dominant_type: Self::dominant_type(history),
                    average_complexity: Self::trailing_complexity(history),
                    pattern_id: Self::derive_pattern(history),
                    last_seen: history.back().map(|o| o.observed_at),
                }
            })
            .collect();
        out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        out
    }

    pub fn user_count(&self) -> usize {
        self.history.len()
    }

    pub fn clear(&self) {
        self.history.clear();
    }

    fn derive_pattern(history: &VecDeque<Observation>) -> Option<String> {
        if history.len() < MIN_PATTERN_OBSERVATIONS {
            return None;
        }
        let level = if Self::trailing_complexity(history) > COMPLEX_THRESHOLD {
            "complex"
        } else {
            "simple"
        };
        Some(format!("{}_{}", Self::dominant_type(history).as_str(), level))
    }

    /// Most frequent type; ties go to the higher classification priority
    fn dominant_type(history: &VecDeque<Observation>) -> RequestType {
        let mut counts: HashMap<RequestType, usize> = HashMap::new();
        for obs in history {
            *counts.entry(obs.request_type).or_insert(0) += 1;
        }
        counts
            .into_iter()
            .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then(tb.priority().cmp(&ta.priority())))
            .map(|(t, _)| t)
            .unwrap_or(RequestType::SimpleChat)
    }

    fn trailing_complexity(history: &VecDeque<Observation>) -> f64 {
        let recent: Vec<f64> = history
            .iter()
            .rev()
            .take(COMPLEXITY_WINDOW)
            .map(|o| o.complexity)
            .collect();
        if recent.is_empty() {
            return 0.0;
        }
        recent.iter().sum::<f64>() / recent.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_pattern_below_three_observations() {
        let store = UserPatternStore::new(50);
        store.record("alice", RequestType::Code, 0.9);
        store.record("alice", RequestType::Code, 0.9);
        assert_eq!(store.pattern_id("alice"), None);

        store.record("alice", RequestType::Code, 0.9);
        assert_eq!(store.pattern_id("alice"), Some("code_complex".to_string()));
    }

    #[test]
    fn test_simple_pattern() {
        let store = UserPatternStore::new(50);
        for _ in 0..4 {
            store.record("bob", RequestType::SimpleChat, 0.1);
        }
        assert_eq!(store.pattern_id("bob"), Some("simple_chat_simple".to_string()));
    }

    #[test]
    fn test_tie_breaks_by_priority() {
        let store = UserPatternStore::new(50);
        store.record("carol", RequestType::SimpleChat, 0.2);
        store.record("carol", RequestType::CreativeWriting, 0.2);
        store.record("carol", RequestType::SimpleChat, 0.2);
        store.record("carol", RequestType::CreativeWriting, 0.2);
        assert_eq!(
            store.pattern_id("carol"),
            Some("creative_writing_simple".to_string())
        );
    }

    #[test]
    fn test_trailing_window_uses_last_ten() {
        let store = UserPatternStore::new(50);
        for _ in 0..20 {
            store.record("dave", RequestType::Code, 1.0);
        }
        for _ in 0..10 {
            store.record("dave", RequestType::Code, 0.1);
        }
        assert_eq!(store.pattern_id("dave"), Some("code_simple".to_string()));
    }

    #[test]
    fn test_history_is_bounded() {
        let store = UserPatternStore::new(5);
        for _ in 0..12 {
            store.record("erin", RequestType::Code, 0.3);
        }
        assert_eq!(store.observation_count("erin"), 5);
    }

    #[test]
    fn test_summaries_sorted() {
        let store = UserPatternStore::new(50);
        store.record("zed", RequestType::Code, 0.3);
        store.record("amy", RequestType::Code, 0.3);
        let users: Vec<String> = store.summaries().into_iter().map(|s| s.user_id).collect();
        assert_eq!(users, vec!["amy".to_string(), "zed".to_string()]);
    }
}
