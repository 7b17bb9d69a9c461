// Health monitor - request latency, error rate and routing overhead
//
// Every request bumps the counters and the one-minute rate window on the
// caller's task. Latency samples go through the sampler so heavy traffic
// thins them out before they reach the monitoring queue. A health
// snapshot is taken on a timer: it scores the current numbers against the
// configured thresholds, raises alerts for breaches and is kept for a week.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::alerts::{lock, Alert, AlertKind, AlertLog, AlertSeverity};
use super::sampling::Sampler;
use super::stats::{mean, percentile};
use super::types::RequestSample;
use crate::config::{HealthConfig, SamplingConfig};

/// Width of the request-rate window
const RATE_WINDOW_SECS: i64 = 60;

/// Routing latency samples kept for the average
const MAX_ROUTING_SAMPLES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl HealthStatus {
    pub fn from_score(score: u32) -> Self {
        if score < 70 {
            HealthStatus::Critical
        } else if score < 85 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
        }
    }
}

/// Measurements a health score is computed from
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthInputs {
    pub avg_latency_ms: f64,
    pub error_rate: f64,
    pub memory_mb: f64,
    pub throughput_rps: f64,
    /// None until the accuracy monitor has data
    pub routing_accuracy: Option<f64>,
    pub avg_routing_latency_ms: f64,
}

/// One threshold breach and the points it cost
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Breach {
    pub kind: AlertKind,
    pub value: f64,
    pub threshold: f64,
    pub penalty: u32,
}

/// Score out of 100 with the breaches that reduced it
pub fn compute_health_score(inputs: &HealthInputs, config: &HealthConfig) -> (u32, Vec<Breach>) {
    let mut breaches = Vec::new();
    let mut check = |breached: bool, kind: AlertKind, value: f64, threshold: f64, penalty: u32| {
        if breached {
            breaches.push(Breach {
                kind,
                value,
                threshold,
                penalty,
            });
        }
    };

    check(
        inputs.avg_latency_ms > config.max_response_time_ms,
        AlertKind::HighLatency,
        inputs.avg_latency_ms,
        config.max_response_time_ms,
        20,
    );
    check(
        inputs.error_rate > config.max_error_rate,
        AlertKind::HighErrorRate,
        inputs.error_rate,
        config.max_error_rate,
        25,
    );
    check(
        inputs.memory_mb > config.max_memory_mb,
        AlertKind::HighMemory,
        inputs.memory_mb,
        config.max_memory_mb,
        15,
    );
    check(
        config.min_throughput_rps > 0.0 && inputs.throughput_rps < config.min_throughput_rps,
        AlertKind::LowThroughput,
        inputs.throughput_rps,
        config.min_throughput_rps,
        10,
    );
    if let Some(accuracy) = inputs.routing_accuracy {
        check(
            accuracy < config.min_routing_accuracy,
            AlertKind::LowRoutingAccuracy,
            accuracy,
            config.min_routing_accuracy,
            15,
        );
    }
    check(
        inputs.avg_routing_latency_ms > config.max_routing_latency_ms,
        AlertKind::SlowRouting,
        inputs.avg_routing_latency_ms,
        config.max_routing_latency_ms,
        10,
    );

    let penalty: u32 = breaches.iter().map(|b| b.penalty).sum();
    (100u32.saturating_sub(penalty), breaches)
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Point-in-time health of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub timestamp: DateTime<Utc>,
    pub score: u32,
    pub status: HealthStatus,
    pub latency: LatencyPercentiles,
    pub inputs: HealthInputs,
    pub breaches: Vec<Breach>,
    pub total_requests: u64,
    pub total_errors: u64,
    pub sampled_requests: u64,
    /// Routing decisions per backend
    pub provider_distribution: BTreeMap<String, u64>,
}

/// Resident memory of the current process
pub trait MemoryProbe: Send + Sync {
    fn used_mb(&self) -> f64;
}

/// `MemoryProbe` backed by sysinfo
pub struct ProcessMemory {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl ProcessMemory {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for ProcessMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemory {
    fn used_mb(&self) -> f64 {
        let Some(pid) = self.pid else {
            return 0.0;
        };
        let mut system = lock(&self.system);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system
            .process(pid)
            .map(|p| p.memory() as f64 / (1024.0 * 1024.0))
            .unwrap_or(0.0)
    }
}

/// Prometheus collectors owned by one monitor
struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounter,
    errors: IntCounter,
    latency: Histogram,
    health_score: Gauge,
}

impl PrometheusMetrics {
    fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();
        let requests = IntCounter::new("pathwise_requests_total", "Completed backend requests")?;
        let errors = IntCounter::new("pathwise_errors_total", "Failed backend requests")?;
        let latency = Histogram::with_opts(
            HistogramOpts::new(
                "pathwise_request_latency_seconds",
                "Backend request latency in seconds",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
        )?;
        let health_score = Gauge::new("pathwise_health_score", "Latest health score (0-100)")?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(latency.clone()))?;
        registry.register(Box::new(health_score.clone()))?;

        Ok(Self {
            registry,
            requests,
            errors,
            latency,
            health_score,
        })
    }
}

pub struct HealthMonitor {
    config: HealthConfig,
    sampler: Sampler,
    latencies: Mutex<VecDeque<f64>>,
    request_times: Mutex<VecDeque<DateTime<Utc>>>,
    routing_latencies: Mutex<VecDeque<f64>>,
    recent: Mutex<VecDeque<RequestSample>>,
    snapshots: Mutex<VecDeque<HealthSnapshot>>,
    provider_counts: DashMap<String, u64>,
    routing_accuracy: Mutex<Option<f64>>,
    total_requests: AtomicU64,
    total_errors: AtomicU64,
    sampled_requests: AtomicU64,
    alerts: Arc<AlertLog>,
    memory: Box<dyn MemoryProbe>,
    prometheus: Option<PrometheusMetrics>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, sampling: SamplingConfig, alerts: Arc<AlertLog>) -> Self {
        Self::with_memory_probe(config, sampling, alerts, Box::new(ProcessMemory::new()))
    }

    pub fn with_memory_probe(
        config: HealthConfig,
        sampling: SamplingConfig,
        alerts: Arc<AlertLog>,
        memory: Box<dyn MemoryProbe>,
    ) -> Self {
        let prometheus = match PrometheusMetrics::new() {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                tracing::warn!("Failed to register prometheus metrics: {}", e);
                None
            }
        };

        Self {
            sampler: Sampler::new(sampling, config.slow_request_threshold_ms),
            config,
            latencies: Mutex::new(VecDeque::new()),
            request_times: Mutex::new(VecDeque::new()),
            routing_latencies: Mutex::new(VecDeque::new()),
            recent: Mutex::new(VecDeque::new()),
            snapshots: Mutex::new(VecDeque::new()),
            provider_counts: DashMap::new(),
            routing_accuracy: Mutex::new(None),
            total_requests: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            sampled_requests: AtomicU64::new(0),
            alerts,
            memory,
            prometheus,
        }
    }

    /// Count a completed request and keep its sample if the sampler does
    pub fn record_request(&self, sample: RequestSample) -> bool {
        let sampled = self.count_request(&sample);
        if sampled {
            self.record_sample(sample);
        }
        sampled
    }

    /// Bump the request and error counters and the rate window, then decide
    /// whether the request's latency is worth sampling
    pub fn count_request(&self, sample: &RequestSample) -> bool {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if !sample.success {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(metrics) = &self.prometheus {
            metrics.requests.inc();
            if !sample.success {
                metrics.errors.inc();
            }
            if sample.latency_ms.is_finite() && sample.latency_ms >= 0.0 {
                metrics.latency.observe(sample.latency_ms / 1000.0);
            }
        }

        let throughput = {
            let mut times = lock(&self.request_times);
            times.push_back(sample.timestamp);
            prune_window(&mut times, sample.timestamp);
            times.len() as f64 / RATE_WINDOW_SECS as f64
        };

        let sampled = self
            .sampler
            .should_sample(sample.latency_ms, sample.success, throughput);
        if sampled {
            self.sampled_requests.fetch_add(1, Ordering::Relaxed);
        }
        sampled
    }

    /// Keep a sampled request for the latency percentiles and recent log
    pub fn record_sample(&self, sample: RequestSample) {
        if sample.latency_ms.is_finite() {
            let mut latencies = lock(&self.latencies);
            latencies.push_back(sample.latency_ms.max(0.0));
            if latencies.len() > self.config.max_latency_samples {
                let excess = latencies.len() - self.config.trim_latency_samples_to;
                latencies.drain(..excess);
            }
        }

        let mut recent = lock(&self.recent);
        recent.push_back(sample);
        while recent.len() > self.config.max_metric_log.max(1) {
            recent.pop_front();
        }
    }

    /// Record the time spent deciding a route and which backend won
    pub fn record_routing(&self, backend: &str, elapsed_ms: f64) {
        *self.provider_counts.entry(backend.to_string()).or_insert(0) += 1;
        if !elapsed_ms.is_finite() {
            return;
        }
        let mut routing = lock(&self.routing_latencies);
        routing.push_back(elapsed_ms.max(0.0));
        while routing.len() > MAX_ROUTING_SAMPLES {
            routing.pop_front();
        }
    }

    pub fn set_routing_accuracy(&self, accuracy: Option<f64>) {
        *lock(&self.routing_accuracy) = accuracy.filter(|a| a.is_finite());
    }

    /// Requests per second over the last minute
    pub fn throughput(&self) -> f64 {
        self.throughput_at(Utc::now())
    }

    pub fn throughput_at(&self, now: DateTime<Utc>) -> f64 {
        let mut times = lock(&self.request_times);
        prune_window(&mut times, now);
        times.len() as f64 / RATE_WINDOW_SECS as f64
    }

    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        let mut sorted: Vec<f64> = lock(&self.latencies).iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        LatencyPercentiles {
            p50: percentile(&sorted, 0.50),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
        }
    }

    pub fn error_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        self.total_errors.load(Ordering::Relaxed) as f64 / total as f64
    }

    /// Current measurements as of `now`
    pub fn inputs_at(&self, now: DateTime<Utc>) -> HealthInputs {
        let avg_latency_ms = mean(&lock(&self.latencies).iter().copied().collect::<Vec<_>>());
        let avg_routing_latency_ms =
            mean(&lock(&self.routing_latencies).iter().copied().collect::<Vec<_>>());

        HealthInputs {
            avg_latency_ms,
            error_rate: self.error_rate(),
            memory_mb: self.memory.used_mb(),
            throughput_rps: self.throughput_at(now),
            routing_accuracy: *lock(&self.routing_accuracy),
            avg_routing_latency_ms,
        }
    }

    /// Score the current state without recording anything
    pub fn current(&self) -> HealthSnapshot {
        self.build_snapshot(Utc::now())
    }

    /// Take, store and alert on a health snapshot
    pub fn snapshot(&self) -> HealthSnapshot {
        self.snapshot_at(Utc::now())
    }

    pub fn snapshot_at(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let snapshot = self.build_snapshot(now);

        for breach in &snapshot.breaches {
            self.alerts.raise(Alert {
                raised_at: now,
                ..Alert::new(
                    breach.kind,
                    if snapshot.status == HealthStatus::Critical {
                        AlertSeverity::Critical
                    } else {
                        AlertSeverity::Warning
                    },
                    breach.kind.as_str(),
                    format!(
                        "{} at {:.3} (threshold {:.3})",
                        breach.kind.as_str(),
                        breach.value,
                        breach.threshold
                    ),
                    breach.value,
                    breach.threshold,
                )
            });
        }

        if let Some(metrics) = &self.prometheus {
            metrics.health_score.set(snapshot.score as f64);
        }

        tracing::debug!(
            score = snapshot.score,
            status = snapshot.status.as_str(),
            throughput = snapshot.inputs.throughput_rps,
            p95_ms = snapshot.latency.p95,
            "Health snapshot"
        );

        let retention = chrono::Duration::hours(self.config.snapshot_retention_hours);
        let mut snapshots = lock(&self.snapshots);
        snapshots.push_back(snapshot.clone());
        while snapshots
            .front()
            .is_some_and(|s| now.signed_duration_since(s.timestamp) > retention)
        {
            snapshots.pop_front();
        }
        snapshot
    }

    fn build_snapshot(&self, now: DateTime<Utc>) -> HealthSnapshot {
        let inputs = self.inputs_at(now);
        let (score, breaches) = compute_health_score(&inputs, &self.config);
        HealthSnapshot {
            timestamp: now,
            score,
            status: HealthStatus::from_score(score),
            latency: self.latency_percentiles(),
            inputs,
            breaches,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            total_errors: self.total_errors.load(Ordering::Relaxed),
            sampled_requests: self.sampled_requests.load(Ordering::Relaxed),
            provider_distribution: self.provider_distribution(),
        }
    }

    /// Stored snapshots, oldest first
    pub fn snapshots(&self) -> Vec<HealthSnapshot> {
        lock(&self.snapshots).iter().cloned().collect()
    }

    /// Most recent sampled requests, oldest first
    pub fn recent_requests(&self) -> Vec<RequestSample> {
        lock(&self.recent).iter().cloned().collect()
    }

    pub fn provider_distribution(&self) -> BTreeMap<String, u64> {
        self.provider_counts
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect()
    }

    /// Prometheus text exposition of this monitor's collectors
    pub fn render_prometheus(&self) -> Result<String> {
        let Some(metrics) = &self.prometheus else {
            return Ok(String::new());
        };
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metrics.registry.gather(), &mut buffer)
            .context("Failed to encode prometheus metrics")?;
        String::from_utf8(buffer).context("Prometheus output was not UTF-8")
    }

    pub fn reset(&self) {
        lock(&self.latencies).clear();
        lock(&self.request_times).clear();
        lock(&self.routing_latencies).clear();
        lock(&self.recent).clear();
        lock(&self.snapshots).clear();
        self.provider_counts.clear();
        *lock(&self.routing_accuracy) = None;
        self.total_requests.store(0, Ordering::Relaxed);
        self.total_errors.store(0, Ordering::Relaxed);
        self.sampled_requests.store(0, Ordering::Relaxed);
    }
}

fn prune_window(times: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let window = chrono::Duration::seconds(RATE_WINDOW_SECS);
    while times
        .front()
        .is_some_and(|t| now.signed_duration_since(*t) > window)
    {
        times.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SamplingStrategy;

    struct FixedMemory(f64);

    impl MemoryProbe for FixedMemory {
        fn used_mb(&self) -> f64 {
            self.0
        }
    }

    fn monitor() -> HealthMonitor {
        HealthMonitor::with_memory_probe(
            HealthConfig::default(),
            SamplingConfig {
                strategy: SamplingStrategy::Uniform,
                ..SamplingConfig::default()
            },
            Arc::new(AlertLog::default()),
            Box::new(FixedMemory(100.0)),
        )
    }

    fn nominal() -> HealthInputs {
        HealthInputs {
            avg_latency_ms: 500.0,
            error_rate: 0.0,
            memory_mb: 100.0,
            throughput_rps: 10.0,
            routing_accuracy: Some(0.9),
            avg_routing_latency_ms: 1.0,
        }
    }

    #[test]
    fn test_nominal_scores_full() {
        let (score, breaches) = compute_health_score(&nominal(), &HealthConfig::default());
        assert_eq!(score, 100);
        assert!(breaches.is_empty());
        assert_eq!(HealthStatus::from_score(score), HealthStatus::Healthy);
    }

    #[test]
    fn test_latency_breach_costs_twenty() {
        let inputs = HealthInputs {
            avg_latency_ms: 3_500.0,
            ..nominal()
        };
        let (score, breaches) = compute_health_score(&inputs, &HealthConfig::default());
        assert_eq!(score, 80);
        assert_eq!(breaches.len(), 1);
        assert_eq!(breaches[0].kind, AlertKind::HighLatency);
        assert_eq!(HealthStatus::from_score(score), HealthStatus::Warning);
    }

    #[test]
    fn test_multiple_breaches_go_critical() {
        let inputs = HealthInputs {
            error_rate: 0.2,
            memory_mb: 4_096.0,
            routing_accuracy: Some(0.5),
            ..nominal()
        };
        let (score, _) = compute_health_score(&inputs, &HealthConfig::default());
        assert_eq!(score, 100 - 25 - 15 - 15);
        assert_eq!(HealthStatus::from_score(score), HealthStatus::Critical);
    }

    #[test]
    fn test_throughput_check_disabled_by_default() {
        let inputs = HealthInputs {
            throughput_rps: 0.0,
            ..nominal()
        };
        assert_eq!(compute_health_score(&inputs, &HealthConfig::default()).0, 100);

        let config = HealthConfig {
            min_throughput_rps: 1.0,
            ..HealthConfig::default()
        };
        assert_eq!(compute_health_score(&inputs, &config).0, 90);
    }

    #[test]
    fn test_record_and_snapshot() {
        let monitor = monitor();
        for latency in [100.0, 200.0, 300.0, 400.0] {
            assert!(monitor.record_request(RequestSample::new("openai", latency, true)));
        }
        monitor.record_request(RequestSample::new("openai", 100.0, false));
        monitor.record_routing("openai", 0.5);
        monitor.record_routing("anthropic", 0.7);

        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.total_requests, 5);
        assert_eq!(snapshot.total_errors, 1);
        assert!((snapshot.inputs.error_rate - 0.2).abs() < 1e-12);
        assert_eq!(snapshot.latency.p50, 200.0);
        assert_eq!(snapshot.provider_distribution.get("openai"), Some(&1));
        // Error rate breach
        assert_eq!(snapshot.score, 75);
        assert_eq!(monitor.snapshots().len(), 1);
        assert_eq!(monitor.recent_requests().len(), 5);
    }

    #[test]
    fn test_counting_keeps_errors_without_samples() {
        let monitor = HealthMonitor::with_memory_probe(
            HealthConfig::default(),
            SamplingConfig {
                strategy: SamplingStrategy::Uniform,
                base_rate: 0.0,
                ..SamplingConfig::default()
            },
            Arc::new(AlertLog::default()),
            Box::new(FixedMemory(100.0)),
        );
        for _ in 0..5 {
            assert!(!monitor.count_request(&RequestSample::new("openai", 100.0, true)));
        }
        assert!(monitor.count_request(&RequestSample::new("openai", 100.0, false)));

        let snapshot = monitor.current();
        assert_eq!(snapshot.total_requests, 6);
        assert_eq!(snapshot.total_errors, 1);
        assert_eq!(snapshot.sampled_requests, 1);
        // Counting alone stores no latency
        assert!(monitor.recent_requests().is_empty());
    }

    #[test]
    fn test_process_memory_reads_current_process() {
        let used = ProcessMemory::new().used_mb();
        assert!(used.is_finite());
        assert!(used >= 0.0);
    }

    #[test]
    fn test_rate_window_slides() {
        let monitor = monitor();
        let start = Utc::now();
        for _ in 0..30 {
            let mut sample = RequestSample::new("openai", 100.0, true);
            sample.timestamp = start;
            monitor.record_request(sample);
        }
        assert!((monitor.throughput_at(start) - 0.5).abs() < 1e-12);
        assert_eq!(monitor.throughput_at(start + chrono::Duration::seconds(61)), 0.0);
    }

    #[test]
    fn test_latency_samples_trimmed() {
        let config = HealthConfig {
            max_latency_samples: 10,
            trim_latency_samples_to: 5,
            ..HealthConfig::default()
        };
        let monitor = HealthMonitor::with_memory_probe(
            config,
            SamplingConfig {
                strategy: SamplingStrategy::Uniform,
                ..SamplingConfig::default()
            },
            Arc::new(AlertLog::default()),
            Box::new(FixedMemory(0.0)),
        );
        for i in 0..11 {
            monitor.record_request(RequestSample::new("x", i as f64, true));
        }
        // 11 samples exceeded 10, trimmed to the latest 5
        assert_eq!(monitor.latency_percentiles().p50, 8.0);
    }

    #[test]
    fn test_old_snapshots_pruned() {
        let monitor = monitor();
        let now = Utc::now();
        monitor.snapshot_at(now - chrono::Duration::days(8));
        monitor.snapshot_at(now);
        assert_eq!(monitor.snapshots().len(), 1);
    }

    #[test]
    fn test_breaches_raise_alerts() {
        let alerts = Arc::new(AlertLog::default());
        let monitor = HealthMonitor::with_memory_probe(
            HealthConfig::default(),
            SamplingConfig::default(),
            alerts.clone(),
            Box::new(FixedMemory(10_000.0)),
        );
        monitor.snapshot();
        monitor.snapshot();
        // Cooldown keeps it to one
        let raised = alerts.alerts(crate::metrics::AlertFilter::All);
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, AlertKind::HighMemory);
    }

    #[test]
    fn test_render_prometheus() {
        let monitor = monitor();
        monitor.record_request(RequestSample::new("openai", 250.0, true));
        monitor.snapshot();
        let text = monitor.render_prometheus().unwrap();
        assert!(text.contains("pathwise_requests_total 1"));
        assert!(text.contains("pathwise_health_score 100"));
    }
}
