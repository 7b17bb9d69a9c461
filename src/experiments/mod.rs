// Experiment framework - two-arm A/B tests between backend/model pairs
//
// Users are assigned to an arm once per experiment and keep it. Results are
// buffered per experiment while it runs and compared on a timer; a clear
// winner completes the experiment when auto-stop is enabled.

mod analysis;
mod config;

pub use analysis::{
    analyze, AnalysisStatus, ArmStats, ExperimentAnalysis, ExperimentResult, PrimaryMetricResults,
};
pub use config::{
    ArmId, Experiment, ExperimentArm, ExperimentConfig, ExperimentStatus, PrimaryMetric,
    MIN_SAMPLE_SIZE_FLOOR, WEIGHT_TOLERANCE,
};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use uuid::Uuid;

use crate::config::ExperimentsConfig;
use crate::errors::{EngineError, EngineResult};
use crate::metrics::{OutcomeMetrics, SignificanceMethod, SignificanceTest};
use crate::providers::CompletionRequest;

/// Running experiment a user is enrolled in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Enrollment {
    pub experiment_id: String,
    pub arm: ArmId,
    pub backend: String,
    pub model: String,
}

/// Arms of a running experiment
#[derive(Debug, Clone, PartialEq)]
pub struct RunningExperiment {
    pub experiment_id: String,
    pub variant_a: ExperimentArm,
    pub variant_b: ExperimentArm,
}

impl RunningExperiment {
    pub fn arm(&self, arm: ArmId) -> &ExperimentArm {
        match arm {
            ArmId::A => &self.variant_a,
            ArmId::B => &self.variant_b,
        }
    }
}

/// Per-experiment line of the summary
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentOverview {
    pub id: String,
    pub name: String,
    pub status: ExperimentStatus,
    pub samples_a: usize,
    pub samples_b: usize,
    pub assigned_users: usize,
    pub latest_status: Option<AnalysisStatus>,
    pub winner: Option<ArmId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentSummary {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
    pub experiments: Vec<ExperimentOverview>,
}

pub struct ExperimentManager {
    config: ExperimentsConfig,
    significance: Box<dyn SignificanceTest>,
    experiments: DashMap<String, Experiment>,
    assignments: DashMap<(String, String), ArmId>,
    results: DashMap<String, VecDeque<ExperimentResult>>,
    /// Experiments with results newer than their last analysis
    pending: DashSet<String>,
}

impl ExperimentManager {
    pub fn new(config: ExperimentsConfig, significance: SignificanceMethod) -> Self {
        Self {
            config,
            significance: significance.build(),
            experiments: DashMap::new(),
            assignments: DashMap::new(),
            results: DashMap::new(),
            pending: DashSet::new(),
        }
    }

    /// Validate and register an experiment in draft status
    pub fn create_test(&self, config: ExperimentConfig) -> EngineResult<String> {
        config.validate()?;
        let id = Uuid::new_v4().to_string();
        tracing::info!(
            experiment = %id,
            name = %config.name,
            arm_a = %config.variant_a.key(),
            arm_b = %config.variant_b.key(),
            "Experiment created"
        );
        self.experiments
            .insert(id.clone(), Experiment::new(id.clone(), config, Utc::now()));
        Ok(id)
    }

    pub fn start_test(&self, id: &str) -> EngineResult<()> {
        self.transition(id, ExperimentStatus::Running, None)
    }

    pub fn pause_test(&self, id: &str) -> EngineResult<()> {
        self.transition(id, ExperimentStatus::Paused, None)
    }

    pub fn resume_test(&self, id: &str) -> EngineResult<()> {
        self.transition(id, ExperimentStatus::Running, None)
    }

    pub fn stop_test(&self, id: &str, reason: Option<String>) -> EngineResult<()> {
        self.transition(id, ExperimentStatus::Stopped, reason)
    }

    fn transition(
        &self,
        id: &str,
        next: ExperimentStatus,
        reason: Option<String>,
    ) -> EngineResult<()> {
        let mut experiment = self
            .experiments
            .get_mut(id)
            .ok_or_else(|| EngineError::ExperimentNotFound(id.to_string()))?;
        experiment.transition(next, Utc::now(), reason)
    }

    pub fn get_test(&self, id: &str) -> Option<Experiment> {
        self.experiments.get(id).map(|e| e.clone())
    }

    /// All experiments ordered by creation time
    pub fn list_tests(&self) -> Vec<Experiment> {
        let mut all: Vec<Experiment> = self.experiments.iter().map(|e| e.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Whether this request from this user takes part in the experiment
    pub fn should_participate(&self, id: &str, user_id: &str, request: &CompletionRequest) -> bool {
        let draw = rand::thread_rng().gen::<f64>();
        self.should_participate_with(id, user_id, request, draw, Utc::now())
    }

    /// As `should_participate` with the allocation draw and clock supplied
    pub fn should_participate_with(
        &self,
        id: &str,
        user_id: &str,
        request: &CompletionRequest,
        draw: f64,
        now: DateTime<Utc>,
    ) -> bool {
        if user_id.is_empty() || request.messages.is_empty() {
            return false;
        }
        let Some(mut experiment) = self.experiments.get_mut(id) else {
            return false;
        };
        if experiment.status != ExperimentStatus::Running {
            return false;
        }
        if experiment.is_expired(now) {
            if let Err(e) = experiment.transition(
                ExperimentStatus::Completed,
                now,
                Some("max duration reached".to_string()),
            ) {
                tracing::warn!(experiment = %id, "Failed to expire experiment: {}", e);
            }
            return false;
        }
        // Users already enrolled stay in regardless of the allocation draw
        if self
            .assignments
            .contains_key(&(id.to_string(), user_id.to_string()))
        {
            return true;
        }
        draw < experiment.config.traffic_allocation
    }

    /// Sticky arm for the user; new users are split by arm weight
    pub fn assign_variant(&self, id: &str, user_id: &str) -> EngineResult<ArmId> {
        let draw = rand::thread_rng().gen::<f64>();
        self.assign_variant_with(id, user_id, draw)
    }

    pub fn assign_variant_with(&self, id: &str, user_id: &str, draw: f64) -> EngineResult<ArmId> {
        let weight_a = self
            .experiments
            .get(id)
            .map(|e| e.config.variant_a.weight)
            .ok_or_else(|| EngineError::ExperimentNotFound(id.to_string()))?;

        let arm = *self
            .assignments
            .entry((id.to_string(), user_id.to_string()))
            .or_insert_with(|| {
                let arm = if draw < weight_a { ArmId::A } else { ArmId::B };
                tracing::debug!(experiment = %id, user = %user_id, arm = arm.as_str(), "Assigned experiment arm");
                arm
            });
        Ok(arm)
    }

    pub fn assignment(&self, id: &str, user_id: &str) -> Option<ArmId> {
        self.assignments
            .get(&(id.to_string(), user_id.to_string()))
            .map(|a| *a)
    }

    /// The user's arm in a running experiment
    pub fn enrollment(&self, id: &str, user_id: &str) -> Option<Enrollment> {
        let arm = self.assignment(id, user_id)?;
        let experiment = self.experiments.get(id)?;
        if experiment.status != ExperimentStatus::Running {
            return None;
        }
        let selected = experiment.arm(arm);
        Some(Enrollment {
            experiment_id: id.to_string(),
            arm,
            backend: selected.backend.clone(),
            model: selected.model.clone(),
        })
    }

    /// Oldest running experiment the user is enrolled in
    pub fn active_experiment_for(&self, user_id: &str) -> Option<Enrollment> {
        self.running_experiments()
            .into_iter()
            .find_map(|running| self.enrollment(&running.experiment_id, user_id))
    }

    /// Arms of every running experiment, oldest first
    pub fn running_experiments(&self) -> Vec<RunningExperiment> {
        let mut running: Vec<(DateTime<Utc>, RunningExperiment)> = self
            .experiments
            .iter()
            .filter(|e| e.status == ExperimentStatus::Running)
            .map(|e| {
                (
                    e.created_at,
                    RunningExperiment {
                        experiment_id: e.id.clone(),
                        variant_a: e.config.variant_a.clone(),
                        variant_b: e.config.variant_b.clone(),
                    },
                )
            })
            .collect();
        running.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.experiment_id.cmp(&b.1.experiment_id))
        });
        running.into_iter().map(|(_, r)| r).collect()
    }

    /// Append a result; ignored unless the experiment is running
    pub fn record_result(
        &self,
        id: &str,
        arm: ArmId,
        user_id: &str,
        outcome: OutcomeMetrics,
        success: bool,
    ) -> bool {
        let running = self
            .experiments
            .get(id)
            .is_some_and(|e| e.status == ExperimentStatus::Running);
        if !running {
            tracing::debug!(experiment = %id, "Ignoring result for experiment that is not running");
            return false;
        }

        let mut buffer = self.results.entry(id.to_string()).or_default();
        buffer.push_back(ExperimentResult {
            arm,
            user_id: user_id.to_string(),
            cost: outcome.cost,
            latency_ms: outcome.latency_ms,
            quality: outcome.quality,
            success,
            recorded_at: Utc::now(),
        });
        if buffer.len() > self.config.max_results {
            let excess = buffer.len() - self.config.trim_results_to;
            buffer.drain(..excess);
        }
        drop(buffer);

        self.pending.insert(id.to_string());
        true
    }

    pub fn results(&self, id: &str) -> Vec<ExperimentResult> {
        self.results
            .get(id)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Analyze one experiment now, applying auto-stop
    pub fn analyze_test(&self, id: &str) -> EngineResult<ExperimentAnalysis> {
        let config = self
            .experiments
            .get(id)
            .map(|e| e.config.clone())
            .ok_or_else(|| EngineError::ExperimentNotFound(id.to_string()))?;

        let results = self.results(id);
        let now = Utc::now();
        let analysis = analyze(id, &config, &results, self.significance.as_ref(), now);
        self.pending.remove(id);

        if let Some(mut experiment) = self.experiments.get_mut(id) {
            experiment.latest_analysis = Some(analysis.clone());

            if experiment.status == ExperimentStatus::Running
                && analysis.warrants_auto_stop(&experiment.config)
            {
                let winner = analysis.status.winner();
                let reason = format!(
                    "{} with confidence {:.3}",
                    analysis.status.as_str(),
                    analysis.primary_metric_results.confidence
                );
                match experiment.transition(ExperimentStatus::Completed, now, Some(reason)) {
                    Ok(()) => {
                        experiment.winner = winner;
                        tracing::info!(
                            experiment = %id,
                            winner = winner.map(|w| w.as_str()).unwrap_or("none"),
                            improvement = analysis.primary_metric_results.improvement,
                            "Experiment auto-stopped"
                        );
                    }
                    Err(e) => tracing::warn!(experiment = %id, "Auto-stop failed: {}", e),
                }
            }
        }

        Ok(analysis)
    }

    /// Analyze every running experiment with results newer than its last
    /// analysis
    pub fn run_analysis(&self) -> Vec<ExperimentAnalysis> {
        let mut due: Vec<String> = self.pending.iter().map(|id| id.key().clone()).collect();
        due.sort();

        due.into_iter()
            .filter(|id| {
                self.experiments
                    .get(id)
                    .is_some_and(|e| e.status == ExperimentStatus::Running)
            })
            .filter_map(|id| match self.analyze_test(&id) {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    tracing::warn!(experiment = %id, "Experiment analysis failed: {}", e);
                    None
                }
            })
            .collect()
    }

    pub fn summary(&self) -> ExperimentSummary {
        let experiments: Vec<ExperimentOverview> = self
            .list_tests()
            .into_iter()
            .map(|e| {
                let (samples_a, samples_b) = self
                    .results
                    .get(&e.id)
                    .map(|r| {
                        let a = r.iter().filter(|x| x.arm == ArmId::A).count();
                        (a, r.len() - a)
                    })
                    .unwrap_or((0, 0));
                ExperimentOverview {
                    assigned_users: self.assignments.iter().filter(|a| a.key().0 == e.id).count(),
                    latest_status: e.latest_analysis.as_ref().map(|a| a.status),
                    winner: e.winner,
                    id: e.id,
                    name: e.config.name,
                    status: e.status,
                    samples_a,
                    samples_b,
                }
            })
            .collect();

        let mut by_status = BTreeMap::new();
        for e in &experiments {
            *by_status.entry(e.status.as_str().to_string()).or_insert(0) += 1;
        }

        ExperimentSummary {
            total: experiments.len(),
            by_status,
            experiments,
        }
    }

    pub fn reset(&self) {
        self.experiments.clear();
        self.assignments.clear();
        self.results.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Message;

    fn manager() -> ExperimentManager {
        ExperimentManager::new(ExperimentsConfig::default(), SignificanceMethod::Normal)
    }

    fn config() -> ExperimentConfig {
        ExperimentConfig::new(
            "haiku-vs-mini",
            ExperimentArm::new("openai", "gpt-4o-mini", 0.5),
            ExperimentArm::new("anthropic", "claude-3-5-haiku", 0.5),
        )
    }

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user("hi")])
    }

    fn outcome(cost: f64) -> OutcomeMetrics {
        OutcomeMetrics {
            cost,
            latency_ms: 800.0,
            quality: 0.8,
        }
    }

    #[test]
    fn test_create_rejects_bad_weights() {
        let bad = ExperimentConfig::new(
            "bad",
            ExperimentArm::new("openai", "gpt-4o-mini", 0.7),
            ExperimentArm::new("anthropic", "claude-3-5-haiku", 0.4),
        );
        assert!(matches!(
            manager().create_test(bad),
            Err(EngineError::InvalidExperiment(_))
        ));
    }

    #[test]
    fn test_lifecycle_through_manager() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        assert_eq!(m.get_test(&id).unwrap().status, ExperimentStatus::Draft);

        assert!(matches!(m.pause_test(&id), Err(EngineError::InvalidTransition { .. })));
        m.start_test(&id).unwrap();
        m.pause_test(&id).unwrap();
        m.resume_test(&id).unwrap();
        m.stop_test(&id, Some("done".to_string())).unwrap();
        assert_eq!(m.get_test(&id).unwrap().status, ExperimentStatus::Stopped);
        assert!(matches!(
            m.start_test("missing"),
            Err(EngineError::ExperimentNotFound(_))
        ));
    }

    #[test]
    fn test_assignment_is_sticky() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        m.start_test(&id).unwrap();

        let first = m.assign_variant_with(&id, "user-1", 0.9).unwrap();
        assert_eq!(first, ArmId::B);
        for draw in [0.0, 0.1, 0.5, 0.99] {
            assert_eq!(m.assign_variant_with(&id, "user-1", draw).unwrap(), first);
        }
        for _ in 0..20 {
            assert_eq!(m.assign_variant(&id, "user-1").unwrap(), first);
        }
        assert_eq!(m.assign_variant_with(&id, "user-2", 0.1).unwrap(), ArmId::A);
    }

    #[test]
    fn test_participation_gates() {
        let m = manager();
        let id = m.create_test(config().with_traffic_allocation(0.3)).unwrap();
        let now = Utc::now();

        // Draft experiments take nobody
        assert!(!m.should_participate_with(&id, "u", &request(), 0.0, now));
        m.start_test(&id).unwrap();
        assert!(m.should_participate_with(&id, "u", &request(), 0.1, now));
        assert!(!m.should_participate_with(&id, "u", &request(), 0.5, now));
        assert!(!m.should_participate_with(&id, "u", &CompletionRequest::default(), 0.1, now));

        // Enrolled users stay in
        m.assign_variant_with(&id, "u", 0.2).unwrap();
        assert!(m.should_participate_with(&id, "u", &request(), 0.9, now));
    }

    #[test]
    fn test_expired_experiment_completes() {
        let m = manager();
        let id = m.create_test(config().with_max_duration_hours(1)).unwrap();
        m.start_test(&id).unwrap();

        let later = Utc::now() + chrono::Duration::hours(2);
        assert!(!m.should_participate_with(&id, "u", &request(), 0.0, later));
        let experiment = m.get_test(&id).unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
        assert_eq!(experiment.stop_reason.as_deref(), Some("max duration reached"));
    }

    #[test]
    fn test_results_only_while_running() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        assert!(!m.record_result(&id, ArmId::A, "u", outcome(0.01), true));
        m.start_test(&id).unwrap();
        assert!(m.record_result(&id, ArmId::A, "u", outcome(0.01), true));
        m.pause_test(&id).unwrap();
        assert!(!m.record_result(&id, ArmId::A, "u", outcome(0.01), true));
        assert_eq!(m.results(&id).len(), 1);
    }

    #[test]
    fn test_result_buffer_trimmed() {
        let m = ExperimentManager::new(
            ExperimentsConfig {
                analysis_interval_secs: 60,
                max_results: 20,
                trim_results_to: 15,
            },
            SignificanceMethod::Normal,
        );
        let id = m.create_test(config()).unwrap();
        m.start_test(&id).unwrap();
        for _ in 0..21 {
            m.record_result(&id, ArmId::A, "u", outcome(0.01), true);
        }
        assert_eq!(m.results(&id).len(), 15);
    }

    #[test]
    fn test_auto_stop_on_clear_winner() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        m.start_test(&id).unwrap();
        for i in 0..100 {
            let user = format!("u{}", i);
            m.record_result(&id, ArmId::A, &user, outcome(0.01), true);
            m.record_result(&id, ArmId::B, &user, outcome(0.015), true);
        }

        let analyses = m.run_analysis();
        assert_eq!(analyses.len(), 1);
        assert_eq!(analyses[0].status, AnalysisStatus::VariantAWins);

        let experiment = m.get_test(&id).unwrap();
        assert_eq!(experiment.status, ExperimentStatus::Completed);
        assert_eq!(experiment.winner, Some(ArmId::A));
        // Nothing new since the last pass
        assert!(m.run_analysis().is_empty());
    }

    #[test]
    fn test_no_auto_stop_without_difference() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        m.start_test(&id).unwrap();
        for _ in 0..100 {
            m.record_result(&id, ArmId::A, "u", outcome(0.01), true);
            m.record_result(&id, ArmId::B, "u", outcome(0.01), true);
        }
        let analysis = m.analyze_test(&id).unwrap();
        assert_eq!(analysis.status, AnalysisStatus::NoSignificantDifference);
        assert_eq!(m.get_test(&id).unwrap().status, ExperimentStatus::Running);
    }

    #[test]
    fn test_active_experiment_and_summary() {
        let m = manager();
        let id = m.create_test(config()).unwrap();
        m.assign_variant_with(&id, "u1", 0.1).unwrap();
        // Draft experiments do not count as active
        assert!(m.active_experiment_for("u1").is_none());

        m.start_test(&id).unwrap();
        let enrollment = m.active_experiment_for("u1").unwrap();
        assert_eq!(enrollment.arm, ArmId::A);
        assert_eq!(enrollment.backend, "openai");
        assert!(m.active_experiment_for("u2").is_none());

        m.record_result(&id, ArmId::A, "u1", outcome(0.01), true);
        let summary = m.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.by_status.get("running"), Some(&1));
        assert_eq!(summary.experiments[0].samples_a, 1);
        assert_eq!(summary.experiments[0].assigned_users, 1);

        m.reset();
        assert_eq!(m.summary().total, 0);
    }

    #[test]
    fn test_running_experiments_oldest_first() {
        let m = manager();
        let first = m.create_test(config()).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = m.create_test(config()).unwrap();
        m.start_test(&second).unwrap();

        let running = m.running_experiments();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].experiment_id, second);
        assert_eq!(running[0].arm(ArmId::A).backend, "openai");

        m.start_test(&first).unwrap();
        let ids: Vec<String> = m
            .running_experiments()
            .into_iter()
            .map(|r| r.experiment_id)
            .collect();
        assert_eq!(ids, vec![first.clone(), second.clone()]);

        m.assign_variant_with(&second, "u1", 0.9).unwrap();
        assert_eq!(m.enrollment(&second, "u1").map(|e| e.arm), Some(ArmId::B));
        assert!(m.enrollment(&first, "u1").is_none());
        m.stop_test(&second, None).unwrap();
        assert!(m.enrollment(&second, "u1").is_none());
    }
}
