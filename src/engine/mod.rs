// Engine - composition root for routing, learning and monitoring
//
// Owns every subsystem. Routing, outcome recording and health counting
// happen on the caller's task; sampled latencies, accuracy audits and
// experiment results are queued for a single background worker. Periodic
// snapshot, drift and experiment passes run on their own timers until
// shutdown.

mod insights;
mod worker;

pub use insights::{DecisionCounts, Insights, KeyPerformance};

use chrono::Utc;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::experiments::ExperimentManager;
use crate::features::{FeatureExtractor, RequestFeatures};
use crate::feedback::{ActualOutcome, MonitoringEvent, OutcomeLearner};
use crate::metrics::{lock, AccuracyMonitor, Alert, AlertFilter, AlertLog, HealthMonitor};
use crate::performance::{BackendKey, PerformanceHistoryEntry, PerformanceTable};
use crate::providers::{CompletionRequest, ModelCatalog};
use crate::router::{self, Decision, Objective, PredictionResult, Router, RoutingConstraints};
use worker::MonitoringWorker;

#[derive(Default)]
struct Counters {
    total: AtomicU64,
    fallback: AtomicU64,
    experiment: AtomicU64,
}

pub struct Engine {
    config: EngineConfig,
    extractor: Arc<FeatureExtractor>,
    table: Arc<PerformanceTable>,
    router: Router,
    learner: OutcomeLearner,
    accuracy: Arc<AccuracyMonitor>,
    experiments: Arc<ExperimentManager>,
    health: Arc<HealthMonitor>,
    alerts: Arc<AlertLog>,
    events: mpsc::Sender<MonitoringEvent>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    counters: Counters,
}

impl Engine {
    /// Build the engine with the builtin model catalog and start its
    /// background worker and timers
    pub fn start(config: EngineConfig) -> EngineResult<Self> {
        Self::start_with_catalog(config, ModelCatalog::builtin())
    }

    pub fn start_with_catalog(config: EngineConfig, catalog: ModelCatalog) -> EngineResult<Self> {
        config.validate()?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(EngineError::NoRuntime);
        }

        let alerts = Arc::new(AlertLog::new(config.accuracy.alert_cooldown()));
        let extractor = Arc::new(FeatureExtractor::new(config.learning.max_user_history));
        let table = Arc::new(PerformanceTable::new(config.learning.max_entries_per_key));
        let accuracy = Arc::new(AccuracyMonitor::new(config.accuracy.clone(), alerts.clone()));
        let experiments = Arc::new(ExperimentManager::new(
            config.experiments.clone(),
            config.accuracy.significance,
        ));
        let health = Arc::new(HealthMonitor::new(
            config.health.clone(),
            config.sampling.clone(),
            alerts.clone(),
        ));

        let (events, receiver) = mpsc::channel(config.queue.capacity);
        let learner = OutcomeLearner::new(config.learning.clone(), table.clone(), extractor.clone())
            .with_health(health.clone())
            .with_events(events.clone());
        let cancel = CancellationToken::new();

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(
            MonitoringWorker::new(
                receiver,
                accuracy.clone(),
                experiments.clone(),
                health.clone(),
                cancel.clone(),
            )
            .run(),
        ));

        {
            let health = health.clone();
            tasks.push(spawn_periodic(
                "health_snapshot",
                Duration::from_secs(config.health.snapshot_interval_secs),
                cancel.clone(),
                move || {
                    health.snapshot();
                },
            ));
        }
        {
            let accuracy = accuracy.clone();
            let health = health.clone();
            tasks.push(spawn_periodic(
                "accuracy_evaluation",
                Duration::from_secs(config.accuracy.snapshot_interval_secs),
                cancel.clone(),
                move || {
                    let reports = accuracy.evaluate();
                    health.set_routing_accuracy(accuracy.overall_accuracy());
                    debug!(keys = reports.len(), "Drift evaluation complete");
                },
            ));
        }
        {
            let experiments = experiments.clone();
            tasks.push(spawn_periodic(
                "experiment_analysis",
                Duration::from_secs(config.experiments.analysis_interval_secs),
                cancel.clone(),
                move || {
                    let analyses = experiments.run_analysis();
                    if !analyses.is_empty() {
                        debug!(count = analyses.len(), "Experiment analysis complete");
                    }
                },
            ));
        }

        info!(
            queue_capacity = config.queue.capacity,
            sampling = ?config.sampling.strategy,
            significance = ?config.accuracy.significance,
            "Routing engine started"
        );

        Ok(Self {
            router: Router::new(config.router.clone(), catalog),
            config,
            extractor,
            table,
            learner,
            accuracy,
            experiments,
            health,
            alerts,
            events,
            cancel,
            tasks: Mutex::new(tasks),
            counters: Counters::default(),
        })
    }

    /// Route with the configured default objective and no constraints
    pub fn route_default(
        &self,
        request: &CompletionRequest,
        user_id: Option<&str>,
        backends: &[String],
    ) -> Decision {
        self.route(
            request,
            user_id,
            backends,
            self.config.router.default_objective,
            &RoutingConstraints::none(),
        )
    }

    /// Choose a backend for the request; never fails
    ///
    /// Users taking part in a running experiment whose arms are both
    /// available get their assigned arm. Everyone else is routed on
    /// predictions.
    pub fn route(
        &self,
        request: &CompletionRequest,
        user_id: Option<&str>,
        backends: &[String],
        objective: Objective,
        constraints: &RoutingConstraints,
    ) -> Decision {
        let started = Instant::now();
        let features = self.extractor.extract(request, user_id);

        let decision = match user_id {
            Some(user) => panic::catch_unwind(AssertUnwindSafe(|| {
                self.experiment_decision(request, user, &features, backends, objective)
            }))
            .unwrap_or_else(|_| {
                warn!("Experiment routing panicked, using fallback decision");
                Some(self.router.fallback(backends, objective, Utc::now()))
            }),
            None => None,
        }
        .unwrap_or_else(|| {
            self.router
                .route(&self.table, &features, backends, objective, constraints)
        });

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.health.record_routing(decision.backend(), elapsed_ms);

        self.counters.total.fetch_add(1, Ordering::Relaxed);
        if decision.is_fallback {
            self.counters.fallback.fetch_add(1, Ordering::Relaxed);
        }
        if decision.experiment_id.is_some() {
            self.counters.experiment.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            decision = %decision.decision_id,
            request = %request.fingerprint(),
            backend = decision.backend(),
            model = decision.model(),
            request_type = features.request_type.as_str(),
            complexity = features.complexity_score,
            fallback = decision.is_fallback,
            elapsed_ms,
            "Request routed"
        );
        decision
    }

    fn experiment_decision(
        &self,
        request: &CompletionRequest,
        user_id: &str,
        features: &RequestFeatures,
        backends: &[String],
        objective: Objective,
    ) -> Option<Decision> {
        let available = |backend: &str| backends.iter().any(|b| b == backend);

        for experiment in self.experiments.running_experiments() {
            if !available(&experiment.variant_a.backend) || !available(&experiment.variant_b.backend)
            {
                continue;
            }
            let id = experiment.experiment_id.as_str();
            if !self.experiments.should_participate(id, user_id, request) {
                continue;
            }

            let arm_id = match self.experiments.assign_variant(id, user_id) {
                Ok(arm) => arm,
                Err(e) => {
                    warn!(experiment = %id, "Arm assignment failed: {}", e);
                    continue;
                }
            };
            let arm = experiment.arm(arm_id);
            let now = Utc::now();
            let mut selected = self.router.predictor().predict(
                &self.table,
                features,
                &BackendKey::new(arm.backend.clone(), arm.model.clone()),
                now,
            );
            selected.reasoning = format!(
                "experiment {} arm {} ({})",
                id,
                arm_id.as_str(),
                selected.reasoning
            );

            return Some(Decision {
                decision_id: uuid::Uuid::new_v4(),
                score: router::score(&selected, objective),
                selected,
                alternatives: Vec::new(),
                objective,
                is_fallback: false,
                experiment_id: Some(experiment.experiment_id.clone()),
                decided_at: now,
            });
        }
        None
    }

    /// Learn from a served request; never fails
    ///
    /// `decision` is the routing decision the call was made under. Its
    /// prediction for the backend actually used, if any, is audited for
    /// accuracy, and an experiment decision credits its experiment.
    pub fn report_outcome(
        &self,
        request: &CompletionRequest,
        user_id: Option<&str>,
        backend: &str,
        model: &str,
        outcome: &ActualOutcome,
        decision: Option<&Decision>,
    ) -> PerformanceHistoryEntry {
        let predicted = decision.and_then(|d| prediction_for(d, backend, model));
        let experiment_id = decision.and_then(|d| d.experiment_id.as_deref());
        self.learner.record(
            request,
            user_id,
            backend,
            model,
            outcome,
            predicted,
            experiment_id,
        )
    }

    /// Wait until every event queued so far has been processed
    pub async fn flush(&self) -> EngineResult<()> {
        let (ack, done) = oneshot::channel();
        self.events
            .send(MonitoringEvent::Flush(ack))
            .await
            .map_err(|_| EngineError::QueueClosed)?;
        done.await.map_err(|_| EngineError::QueueClosed)
    }

    pub fn insights(&self) -> Insights {
        let performance = self
            .table
            .keys()
            .into_iter()
            .filter_map(|key| {
                let history_len = self.table.history(&key).len();
                self.table.latest(&key).map(|latest| KeyPerformance {
                    key,
                    latest,
                    history_len,
                })
            })
            .collect();

        Insights {
            generated_at: Utc::now(),
            decisions: self.decision_counts(),
            outcomes_recorded: self.learner.recorded(),
            dropped_events: self.learner.dropped(),
            predictions_audited: self.accuracy.total_predictions(),
            accuracy: self.accuracy.summary(),
            performance,
            user_patterns: self.extractor.user_patterns(),
            experiments: self.experiments.summary(),
            health: self.health.current(),
            unresolved_alerts: self.alerts.alerts(AlertFilter::Unresolved).len(),
        }
    }

    pub fn decision_counts(&self) -> DecisionCounts {
        let total = self.counters.total.load(Ordering::Relaxed);
        let fallback = self.counters.fallback.load(Ordering::Relaxed);
        let experiment = self.counters.experiment.load(Ordering::Relaxed);
        DecisionCounts {
            total,
            predicted: total.saturating_sub(fallback + experiment),
            fallback,
            experiment,
        }
    }

    pub fn alerts(&self, filter: AlertFilter) -> Vec<Alert> {
        self.alerts.alerts(filter)
    }

    pub fn resolve_alert(&self, id: uuid::Uuid) -> bool {
        self.alerts.resolve(id)
    }

    /// Prometheus text exposition of the health collectors
    pub fn render_prometheus(&self) -> anyhow::Result<String> {
        self.health.render_prometheus()
    }

    /// Clear all learned and monitored state; configuration is kept
    pub fn reset(&self) {
        self.table.clear();
        self.extractor.reset();
        self.accuracy.reset();
        self.experiments.reset();
        self.health.reset();
        self.alerts.clear();
        self.learner.reset_counters();
        self.counters.total.store(0, Ordering::Relaxed);
        self.counters.fallback.store(0, Ordering::Relaxed);
        self.counters.experiment.store(0, Ordering::Relaxed);
        info!("Routing engine state reset");
    }

    /// Stop the timers, drain the queue and wait for the background tasks
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = lock(&self.tasks).drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Background task ended abnormally: {}", e);
            }
        }
        info!(
            outcomes = self.learner.recorded(),
            dropped = self.learner.dropped(),
            "Routing engine stopped"
        );
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn performance(&self) -> &PerformanceTable {
        &self.table
    }

    pub fn features(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn accuracy(&self) -> &AccuracyMonitor {
        &self.accuracy
    }

    pub fn experiments(&self) -> &ExperimentManager {
        &self.experiments
    }

    pub fn health(&self) -> &HealthMonitor {
        &self.health
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Prediction in the decision that matches the backend actually used
fn prediction_for<'a>(decision: &'a Decision, backend: &str, model: &str) -> Option<&'a PredictionResult> {
    std::iter::once(&decision.selected)
        .chain(decision.alternatives.iter())
        .find(|p| p.backend == backend && p.model == model)
}

/// Run `tick` every `period` until cancelled; the first run is one period in
fn spawn_periodic<F>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => tick(),
            }
        }
        debug!(timer = name, "Periodic task stopped");
    })
}
