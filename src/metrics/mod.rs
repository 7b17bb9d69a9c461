// Metrics module
// Accuracy auditing, health monitoring and the statistics they share

mod accuracy;
mod alerts;
mod health;
mod sampling;
mod stats;
mod trends;
mod types;

pub use accuracy::{
    metric_accuracy, AccuracyMonitor, AccuracySnapshot, AccuracySummary, DriftAction, DriftReport,
    KeyAccuracy,
};
pub use alerts::{Alert, AlertFilter, AlertKind, AlertLog, AlertSeverity};
pub(crate) use alerts::lock;
pub use health::{
    compute_health_score, Breach, HealthInputs, HealthMonitor, HealthSnapshot, HealthStatus,
    LatencyPercentiles, MemoryProbe, ProcessMemory,
};
pub use sampling::{Sampler, SamplingStrategy};
pub use stats::{
    mean, normal_cdf, percentile, proportion_interval, std_dev, two_proportion_z, welch_t,
    BandedSignificance, NormalApproximation, SignificanceMethod, SignificanceTest, StudentT,
    WelchTest,
};
pub use trends::{trend_of, Trend};
pub use types::{OutcomeMetrics, RequestSample};
