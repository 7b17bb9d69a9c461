// Test the engine lifecycle with the background worker running
//
// This test suite verifies that:
// 1. Outcomes reported with a decision reach the accuracy monitor
// 2. Experiment participants are routed to their arm and their outcomes recorded
// 3. Insights aggregate every subsystem and serialize to JSON
// 4. Shutdown drains the queue and later flushes fail cleanly
// 5. Health counters stay exact when the queue overflows or many tasks report

use anyhow::Result;
use pathwise::config::load_config_from;
use pathwise::experiments::{ExperimentArm, ExperimentConfig};
use pathwise::metrics::AlertFilter;
use pathwise::{
    ActualOutcome, CompletionRequest, Engine, EngineConfig, EngineError, Message, Objective,
};
use pathwise::performance::BackendKey;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn backends() -> Vec<String> {
    vec!["openai".to_string(), "anthropic".to_string()]
}

fn request(text: &str) -> CompletionRequest {
    CompletionRequest::new(vec![Message::user(text)])
}

#[tokio::test]
async fn test_outcomes_reach_accuracy_monitor() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;

    for _ in 0..12 {
        let req = request("Write a function that parses dates");
        let decision = engine.route_default(&req, Some("dev"), &backends());
        engine.report_outcome(
            &req,
            Some("dev"),
            decision.backend(),
            decision.model(),
            &ActualOutcome::success(0.002, 1_200.0).with_quality(0.9),
            Some(&decision),
        );
    }
    engine.flush().await?;

    assert_eq!(engine.accuracy().total_predictions(), 12);
    assert!(engine.accuracy().overall_accuracy().is_some());
    assert_eq!(engine.health().snapshot().total_requests, 12);
    // Baseline forms at ten audited predictions
    assert!(engine
        .accuracy()
        .baseline(&pathwise::performance::BackendKey::new("openai", "gpt-4o-mini"))
        .is_some());
    assert_eq!(
        engine.features().patterns().observation_count("dev"),
        12
    );

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_experiment_participants_follow_their_arm() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    let id = engine.experiments().create_test(ExperimentConfig::new(
        "all traffic to haiku",
        ExperimentArm::new("anthropic", "claude-3-5-haiku", 1.0),
        ExperimentArm::new("openai", "gpt-4o-mini", 0.0),
    ))?;
    engine.experiments().start_test(&id)?;

    let req = request("Tell me a story about a lighthouse");
    let decision = engine.route(
        &req,
        Some("reader"),
        &backends(),
        Objective::Balanced,
        &Default::default(),
    );
    assert_eq!(decision.experiment_id.as_deref(), Some(id.as_str()));
    assert_eq!(decision.backend(), "anthropic");
    assert_eq!(decision.model(), "claude-3-5-haiku");
    assert!(decision.selected.reasoning.starts_with("experiment"));

    engine.report_outcome(
        &req,
        Some("reader"),
        decision.backend(),
        decision.model(),
        &ActualOutcome::success(0.003, 1_800.0),
        Some(&decision),
    );
    engine.flush().await?;
    assert_eq!(engine.experiments().results(&id).len(), 1);

    // Anonymous requests and arms that are unavailable bypass the experiment
    let anonymous = engine.route_default(&req, None, &backends());
    assert!(anonymous.experiment_id.is_none());
    let partial = engine.route_default(&req, Some("reader"), &["openai".to_string()]);
    assert!(partial.experiment_id.is_none());

    assert_eq!(engine.decision_counts().experiment, 1);
    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_outcome_credits_the_routing_experiment() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    let older = engine.experiments().create_test(ExperimentConfig::new(
        "haiku first",
        ExperimentArm::new("anthropic", "claude-3-5-haiku", 1.0),
        ExperimentArm::new("openai", "gpt-4o-mini", 0.0),
    ))?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = engine.experiments().create_test(ExperimentConfig::new(
        "haiku against gpt-4o",
        ExperimentArm::new("anthropic", "claude-3-5-haiku", 1.0),
        ExperimentArm::new("openai", "gpt-4o", 0.0),
    ))?;
    engine.experiments().start_test(&older)?;
    engine.experiments().start_test(&newer)?;

    // Enrolled in the newer experiment on the same arm backend
    engine.experiments().assign_variant(&newer, "reader")?;

    let req = request("Tell me a story about a lighthouse");
    let decision = engine.route_default(&req, Some("reader"), &backends());
    assert_eq!(decision.experiment_id.as_deref(), Some(older.as_str()));
    assert_eq!(decision.model(), "claude-3-5-haiku");

    engine.report_outcome(
        &req,
        Some("reader"),
        decision.backend(),
        decision.model(),
        &ActualOutcome::success(0.003, 1_800.0),
        Some(&decision),
    );
    engine.flush().await?;

    assert_eq!(engine.experiments().results(&older).len(), 1);
    assert!(engine.experiments().results(&newer).is_empty());

    // Outcomes outside any experiment decision credit nothing
    engine.report_outcome(
        &req,
        Some("reader"),
        "anthropic",
        "claude-3-5-haiku",
        &ActualOutcome::success(0.003, 1_800.0),
        None,
    );
    engine.flush().await?;
    assert_eq!(engine.experiments().results(&older).len(), 1);
    assert!(engine.experiments().results(&newer).is_empty());

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_errors_counted_when_queue_overflows() -> Result<()> {
    let mut config = EngineConfig::default();
    config.queue.capacity = 8;
    let engine = Engine::start(config)?;

    let req = request("hello");
    for _ in 0..100 {
        engine.report_outcome(
            &req,
            None,
            "openai",
            "gpt-4o-mini",
            &ActualOutcome::failure(250.0, "upstream 503"),
            None,
        );
    }
    engine.flush().await?;

    let health = engine.health().snapshot();
    assert_eq!(health.total_requests, 100);
    assert_eq!(health.total_errors, 100);
    assert_eq!(health.inputs.error_rate, 1.0);
    assert_eq!(engine.insights().outcomes_recorded, 100);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reports_are_all_counted() -> Result<()> {
    let engine = Arc::new(Engine::start(EngineConfig::default())?);
    let openai = vec!["openai".to_string()];

    let mut handles = Vec::new();
    for task in 0..8 {
        let engine = engine.clone();
        let openai = openai.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", task);
            for i in 0..25 {
                let req = request(&format!("Question {} from task {}", i, task));
                let decision = engine.route_default(&req, Some(&user), &openai);
                let outcome = if i % 5 == 0 {
                    ActualOutcome::failure(800.0, "timeout")
                } else {
                    ActualOutcome::success(0.002, 800.0)
                };
                engine.report_outcome(
                    &req,
                    Some(&user),
                    decision.backend(),
                    decision.model(),
                    &outcome,
                    Some(&decision),
                );
                tokio::task::yield_now().await;
            }
        }));
    }
    for handle in handles {
        handle.await?;
    }
    engine.flush().await?;

    let key = BackendKey::new("openai", "gpt-4o-mini");
    assert_eq!(engine.performance().sample_count(&key), 200);
    let latest = engine.performance().latest(&key).unwrap();
    assert!((latest.success_rate - 0.8).abs() < 1e-9);
    assert!((latest.avg_latency_ms - 800.0).abs() < 1e-9);

    let health = engine.health().snapshot();
    assert_eq!(health.total_requests, 200);
    assert_eq!(health.total_errors, 40);
    assert_eq!(engine.decision_counts().total, 200);
    assert_eq!(engine.accuracy().total_predictions(), 200);
    assert_eq!(engine.insights().dropped_events, 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_insights_cover_all_subsystems() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    let req = request("Compare these two approaches");
    let decision = engine.route_default(&req, Some("analyst"), &backends());
    engine.report_outcome(
        &req,
        Some("analyst"),
        decision.backend(),
        decision.model(),
        &ActualOutcome::failure(30_000.0, "timeout"),
        Some(&decision),
    );
    engine.flush().await?;

    let insights = engine.insights();
    assert_eq!(insights.decisions.total, 1);
    assert_eq!(insights.decisions.fallback, 1);
    assert_eq!(insights.outcomes_recorded, 1);
    assert_eq!(insights.dropped_events, 0);
    assert_eq!(insights.predictions_audited, 1);
    assert_eq!(insights.performance.len(), 1);
    assert_eq!(insights.performance[0].latest.success_rate, 0.0);
    assert_eq!(insights.health.total_errors, 1);
    assert_eq!(insights.experiments.total, 0);

    let json = insights.to_json()?;
    assert!(json.contains("\"decisions\""));
    assert!(json.contains("\"health\""));

    engine.health().snapshot();
    assert!(!engine.alerts(AlertFilter::All).is_empty());
    assert!(engine.render_prometheus()?.contains("pathwise_errors_total 1"));

    engine.reset();
    let cleared = engine.insights();
    assert_eq!(cleared.decisions.total, 0);
    assert!(cleared.performance.is_empty());
    assert_eq!(cleared.unresolved_alerts, 0);

    engine.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_shutdown_drains_queue() -> Result<()> {
    let engine = Engine::start(EngineConfig::default())?;
    let req = request("hello");
    for _ in 0..50 {
        engine.report_outcome(
            &req,
            None,
            "openai",
            "gpt-4o-mini",
            &ActualOutcome::success(0.001, 400.0),
            None,
        );
    }

    engine.shutdown().await;
    assert!(engine.is_shut_down());
    assert_eq!(engine.health().snapshot().total_requests, 50);
    assert_eq!(engine.flush().await, Err(EngineError::QueueClosed));

    // Outcomes after shutdown still update the table, monitoring is skipped
    let entry = engine.report_outcome(
        &req,
        None,
        "openai",
        "gpt-4o-mini",
        &ActualOutcome::success(0.001, 400.0),
        None,
    );
    assert_eq!(entry.sample_count, 51);
    assert_eq!(engine.insights().dropped_events, 1);
    Ok(())
}

#[tokio::test]
async fn test_engine_from_config_file() -> Result<()> {
    let dir = TempDir::new()?;
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
[router]
default_objective = "speed"

[queue]
capacity = 16
"#,
    )?;

    let config = load_config_from(&path)?;
    let engine = Engine::start(config)?;
    assert_eq!(engine.config().queue.capacity, 16);

    let decision = engine.route_default(&request("hi"), None, &backends());
    assert_eq!(decision.objective, Objective::Speed);

    engine.shutdown().await;
    Ok(())
}
