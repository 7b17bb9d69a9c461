// Alert log shared by the accuracy and health monitors
//
// Alerts are rate limited per (subject, kind): a second alert of the same kind
// for the same subject inside the cooldown window is dropped.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

/// Log size that triggers a trim
const MAX_ALERTS: usize = 1_000;

/// Alerts kept after a trim
const TRIM_ALERTS_TO: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// What tripped the alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Prediction accuracy moved away from its baseline
    AccuracyDrift,
    HighLatency,
    HighErrorRate,
    HighMemory,
    LowThroughput,
    LowRoutingAccuracy,
    SlowRouting,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::AccuracyDrift => "accuracy_drift",
            AlertKind::HighLatency => "high_latency",
            AlertKind::HighErrorRate => "high_error_rate",
            AlertKind::HighMemory => "high_memory",
            AlertKind::LowThroughput => "low_throughput",
            AlertKind::LowRoutingAccuracy => "low_routing_accuracy",
            AlertKind::SlowRouting => "slow_routing",
        }
    }

    /// Drift alerts come from the accuracy monitor, the rest from health
    pub fn is_drift(&self) -> bool {
        matches!(self, AlertKind::AccuracyDrift)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    /// Backend key for drift alerts, metric name for performance alerts
    pub subject: String,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub raised_at: DateTime<Utc>,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        subject: impl Into<String>,
        message: impl Into<String>,
        value: f64,
        threshold: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity,
            subject: subject.into(),
            message: message.into(),
            value,
            threshold,
            raised_at: Utc::now(),
            resolved: false,
            resolved_at: None,
        }
    }
}

/// Alert query filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertFilter {
    All,
    Unresolved,
}

/// Bounded, rate-limited alert log
pub struct AlertLog {
    alerts: Mutex<VecDeque<Alert>>,
    last_raised: DashMap<(String, AlertKind), DateTime<Utc>>,
    cooldown: chrono::Duration,
}

impl AlertLog {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            alerts: Mutex::new(VecDeque::new()),
            last_raised: DashMap::new(),
            cooldown: chrono::Duration::from_std(cooldown)
                .unwrap_or_else(|_| chrono::Duration::seconds(300)),
        }
    }

    /// Record an alert unless one of the same kind for the same subject was
    /// raised within the cooldown. Returns the stored alert.
    pub fn raise(&self, mut alert: Alert) -> Option<Alert> {
        let key = (alert.subject.clone(), alert.kind);
        let now = alert.raised_at;

        // Check and stamp under the same shard lock
        match self.last_raised.entry(key) {
            Entry::Occupied(mut previous) => {
                if now.signed_duration_since(*previous.get()) < self.cooldown {
                    tracing::debug!(
                        kind = alert.kind.as_str(),
                        subject = %alert.subject,
                        "Alert suppressed by cooldown"
                    );
                    return None;
                }
                previous.insert(now);
            }
            Entry::Vacant(slot) => {
                slot.insert(now);
            }
        }

        alert.resolved = false;
        alert.resolved_at = None;

        match alert.severity {
            AlertSeverity::Critical => tracing::error!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            AlertSeverity::Warning => tracing::warn!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                value = alert.value,
                threshold = alert.threshold,
                "{}",
                alert.message
            ),
            AlertSeverity::Info => tracing::info!(
                kind = alert.kind.as_str(),
                subject = %alert.subject,
                value = alert.value,
                "{}",
                alert.message
            ),
        }

        let mut alerts = lock(&self.alerts);
        alerts.push_back(alert.clone());
        if alerts.len() > MAX_ALERTS {
            let excess = alerts.len() - TRIM_ALERTS_TO;
            alerts.drain(..excess);
        }
        Some(alert)
    }

    /// Alerts oldest first
    pub fn alerts(&self, filter: AlertFilter) -> Vec<Alert> {
        lock(&self.alerts)
            .iter()
            .filter(|a| filter == AlertFilter::All || !a.resolved)
            .cloned()
            .collect()
    }

    /// Mark an alert resolved; false if the id is unknown or already resolved
    pub fn resolve(&self, id: Uuid) -> bool {
        let mut alerts = lock(&self.alerts);
        match alerts.iter_mut().find(|a| a.id == id && !a.resolved) {
            Some(alert) => {
                alert.resolved = true;
                alert.resolved_at = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.alerts).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.alerts).is_empty()
    }

    pub fn clear(&self) {
        lock(&self.alerts).clear();
        self.last_raised.clear();
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Lock a monitor buffer, recovering the data if a writer panicked
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
