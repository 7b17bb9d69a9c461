// Request classification and complexity scoring

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::providers::CompletionRequest;

/// Coarse request category used for routing and user patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Code,
    DataProcessing,
    CreativeWriting,
    TechnicalSupport,
    ComplexAnalysis,
    SimpleChat,
}

impl RequestType {
    /// Classification priority, highest first
    pub const PRIORITY: [RequestType; 6] = [
        RequestType::Code,
        RequestType::DataProcessing,
        RequestType::CreativeWriting,
        RequestType::TechnicalSupport,
        RequestType::ComplexAnalysis,
        RequestType::SimpleChat,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Code => "code",
            RequestType::DataProcessing => "data_processing",
            RequestType::CreativeWriting => "creative_writing",
            RequestType::TechnicalSupport => "technical_support",
            RequestType::ComplexAnalysis => "complex_analysis",
            RequestType::SimpleChat => "simple_chat",
        }
    }

    pub(crate) fn priority(&self) -> usize {
        Self::PRIORITY
            .iter()
            .position(|t| t == self)
            .unwrap_or(Self::PRIORITY.len())
    }
}

fn keywords(pattern: &str) -> Regex {
    Regex::new(pattern).expect("Failed to compile keyword regex")
}

static CODE_TYPE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"```|\b(code|function|class|method|compile|implement|refactor|debug|python|javascript|typescript|rust|java|sql|api)\b")
});

static DATA_TYPE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(data|dataset|csv|json|xml|spreadsheet|parse|extract|transform|convert|aggregate|table)\b")
});

static CREATIVE_TYPE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(story|poem|poetry|creative|fiction|novel|lyrics|narrative|screenplay|imagine)\b")
});

static SUPPORT_TYPE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(error|issue|problem|troubleshoot|fix|install|configure|setup|crash|broken)\b|not working")
});

static ANALYSIS_TYPE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(analy[sz]e|analysis|compare|comparison|evaluate|assess|trade-?offs?|implications)\b|pros and cons")
});

static ANALYSIS_CUE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(analy[sz]e|analysis|compare|comparison|contrast|evaluate|versus|vs)\b")
});

static CODE_CUE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"```|\b(code|function|algorithm|implement|program|debug|script)\b")
});

static EXPLANATION_CUE: Lazy<Regex> = Lazy::new(|| {
    keywords(r"\b(explain|why|describe|elaborate|walk me through)\b|how does")
});

/// Classify request text; first matching category in priority order wins
pub fn classify(text: &str) -> RequestType {
    let lower = text.to_lowercase();

    if CODE_TYPE.is_match(&lower) {
        RequestType::Code
    } else if DATA_TYPE.is_match(&lower) {
        RequestType::DataProcessing
    } else if CREATIVE_TYPE.is_match(&lower) {
        RequestType::CreativeWriting
    } else if SUPPORT_TYPE.is_match(&lower) {
        RequestType::TechnicalSupport
    } else if ANALYSIS_TYPE.is_match(&lower) {
        RequestType::ComplexAnalysis
    } else {
        RequestType::SimpleChat
    }
}

/// Complexity score in [0, 1]
pub fn complexity_score(request: &CompletionRequest) -> f64 {
    let text = request.text().to_lowercase();

    let mut score = 0.1 * request.messages.len() as f64;
    score += request.max_tokens.map_or(0.0, |t| t as f64 / 1000.0);
    score += request.tool_count() as f64;

    if ANALYSIS_CUE.is_match(&text) {
        score += 0.3;
    }
    if CODE_CUE.is_match(&text) {
        score += 0.4;
    }
    if EXPLANATION_CUE.is_match(&text) {
        score += 0.2;
    }
    if request.text_len() > 1000 {
        score += 0.3;
    }

    if score.is_finite() {
        score.clamp(0.0, 1.0)
    } else {
        1.0
    }
}
