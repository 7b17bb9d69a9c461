// Test predictive routing end to end through the engine
//
// This test suite verifies that:
// 1. Cold keys never beat the confidence threshold, so routing falls back
// 2. Warm keys are ranked according to the requested objective
// 3. Constraints exclude candidates and can force the fallback
// 4. Complexity saturates at 1.0 for very large requests

use anyhow::Result;
use pathwise::features::{complexity_score, FeatureExtractor, RequestType};
use pathwise::providers::ToolDefinition;
use pathwise::router::FALLBACK_REASONING;
use pathwise::{
    ActualOutcome, CompletionRequest, Engine, EngineConfig, Message, Objective, RoutingConstraints,
};

fn backends() -> Vec<String> {
    vec!["openai".to_string(), "anthropic".to_string()]
}

fn chat() -> CompletionRequest {
    CompletionRequest::new(vec![Message::user("Hello there")])
}

/// Ten rated outcomes for a cheap slow model and an expensive fast one
fn warm_up(engine: &Engine) {
    for _ in 0..10 {
        engine.report_outcome(
            &chat(),
            None,
            "openai",
            "gpt-4o-mini",
            &ActualOutcome::success(0.001, 3_000.0).with_quality(0.7),
            None,
        );
        engine.report_outcome(
            &chat(),
            None,
            "anthropic",
            "claude-3-5-haiku",
            &ActualOutcome::success(0.05, 500.0).with_quality(0.95),
            None,
        );
    }
}

#[tokio::test]
async fn test_cold_start_uses_fallback() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;

    let decision = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Balanced,
        &RoutingConstraints::none(),
    );

    assert!(decision.is_fallback);
    assert_eq!(decision.backend(), "openai");
    assert_eq!(decision.model(), "gpt-4o-mini");
    assert_eq!(decision.selected.reasoning, FALLBACK_REASONING);
    assert_eq!(decision.selected.confidence, 0.5);
    assert!(decision.alternatives.is_empty());
    assert!(decision.experiment_id.is_none());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_empty_backend_list_uses_default_backend() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;

    let decision = engine.route_default(&chat(), Some("u1"), &[]);
    assert!(decision.is_fallback);
    assert_eq!(decision.backend(), "openai");
    assert_eq!(decision.objective, Objective::Balanced);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_objective_changes_selection() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    warm_up(&engine);

    let cheap = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Cost,
        &RoutingConstraints::none(),
    );
    assert!(!cheap.is_fallback);
    assert_eq!(cheap.backend(), "openai");
    assert_eq!(cheap.model(), "gpt-4o-mini");
    // Only warm keys clear the confidence threshold
    assert_eq!(cheap.alternatives.len(), 1);
    assert_eq!(cheap.alternatives[0].backend, "anthropic");

    let fast = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Speed,
        &RoutingConstraints::none(),
    );
    assert_eq!(fast.backend(), "anthropic");

    let best = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Quality,
        &RoutingConstraints::none(),
    );
    assert_eq!(best.backend(), "anthropic");
    assert!(best.score > 0.0 && best.score <= 1.0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_constraints_filter_candidates() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    warm_up(&engine);

    let capped = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Quality,
        &RoutingConstraints::none().with_max_cost(0.01),
    );
    assert!(!capped.is_fallback);
    assert_eq!(capped.backend(), "openai");
    assert!(capped.alternatives.is_empty());

    let impossible = engine.route(
        &chat(),
        None,
        &backends(),
        Objective::Quality,
        &RoutingConstraints::none().with_max_latency_ms(10.0),
    );
    assert!(impossible.is_fallback);

    engine.shutdown().await;
    Ok(())
}

#[test]
fn test_complexity_clamps_for_large_requests() {
    let messages = (0..50)
        .map(|i| Message::user(format!("message number {}", i)))
        .collect();
    let tools = (0..10)
        .map(|i| ToolDefinition::new(format!("tool_{}", i)))
        .collect();
    let request = CompletionRequest::new(messages)
        .with_tools(tools)
        .with_max_tokens(5_000);

    assert_eq!(complexity_score(&request), 1.0);

    let features = FeatureExtractor::default().extract(&request, None);
    assert_eq!(features.complexity_score, 1.0);
    assert_eq!(features.message_count, 50);
    assert_eq!(features.request_type, RequestType::SimpleChat);
}
