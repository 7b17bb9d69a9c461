// Background monitoring worker
//
// Single consumer of the monitoring queue. Sampled latencies feed the health
// monitor and outcomes reported with a prediction feed the accuracy monitor.
// Outcomes of experiment decisions are credited to that experiment when the
// user's assigned arm served them.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::experiments::ExperimentManager;
use crate::feedback::{MonitoringEvent, OutcomeEvent};
use crate::metrics::{AccuracyMonitor, HealthMonitor, RequestSample};

pub(crate) struct MonitoringWorker {
    events: mpsc::Receiver<MonitoringEvent>,
    accuracy: Arc<AccuracyMonitor>,
    experiments: Arc<ExperimentManager>,
    health: Arc<HealthMonitor>,
    cancel: CancellationToken,
    processed: u64,
}

impl MonitoringWorker {
    pub(crate) fn new(
        events: mpsc::Receiver<MonitoringEvent>,
        accuracy: Arc<AccuracyMonitor>,
        experiments: Arc<ExperimentManager>,
        health: Arc<HealthMonitor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            events,
            accuracy,
            experiments,
            health,
            cancel,
            processed: 0,
        }
    }

    /// Drain the queue until cancelled, then process what is left
    pub(crate) async fn run(mut self) {
        info!("Monitoring worker started");

        loop {
            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => break,
                },

                _ = self.cancel.cancelled() => {
                    // Refuse new events, keep the buffered ones
                    self.events.close();
                    while let Some(event) = self.events.recv().await {
                        self.handle(event);
                    }
                    break;
                }
            }
        }

        info!(processed = self.processed, "Monitoring worker stopped");
    }

    fn handle(&mut self, event: MonitoringEvent) {
        match event {
            MonitoringEvent::Outcome(outcome) => {
                self.processed += 1;
                let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&outcome)));
                if result.is_err() {
                    error!(key = %outcome.key, "Monitoring bookkeeping panicked, event skipped");
                }
            }
            MonitoringEvent::Flush(ack) => {
                // Receiver may have given up waiting
                let _ = ack.send(());
            }
        }
    }

    fn process(&self, event: &OutcomeEvent) {
        if event.sampled {
            self.health.record_sample(RequestSample {
                timestamp: event.recorded_at,
                backend: event.key.backend.clone(),
                latency_ms: event.actual.latency_ms,
                success: event.success,
                request_hash: Some(event.request_hash.clone()),
            });
        }

        if let Some(predicted) = event.predicted {
            self.accuracy
                .record_at(&event.key, predicted, event.actual, event.recorded_at);
        }

        let (Some(experiment_id), Some(user_id)) =
            (event.experiment_id.as_deref(), event.user_id.as_deref())
        else {
            return;
        };
        let Some(enrollment) = self.experiments.enrollment(experiment_id, user_id) else {
            debug!(experiment = %experiment_id, "No running enrollment for outcome, not recorded");
            return;
        };
        if enrollment.backend != event.key.backend || enrollment.model != event.key.model {
            debug!(
                experiment = %experiment_id,
                key = %event.key,
                "Outcome served outside the assigned arm, not recorded"
            );
            return;
        }
        self.experiments.record_result(
            experiment_id,
            enrollment.arm,
            user_id,
            event.actual,
            event.success,
        );
    }
}
