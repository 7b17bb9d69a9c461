// Arm comparison for a single experiment

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::config::{ArmId, ExperimentConfig, PrimaryMetric};
use crate::metrics::{mean, std_dev, welch_t, SignificanceTest};

/// One outcome observed by a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResult {
    pub arm: ArmId,
    pub user_id: String,
    pub cost: f64,
    pub latency_ms: f64,
    pub quality: f64,
    pub success: bool,
    pub recorded_at: DateTime<Utc>,
}

impl ExperimentResult {
    pub fn metric(&self, metric: PrimaryMetric) -> f64 {
        match metric {
            PrimaryMetric::Cost => self.cost,
            PrimaryMetric::Latency => self.latency_ms,
            PrimaryMetric::Quality => self.quality,
            PrimaryMetric::SuccessRate => {
                if self.success {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    InsufficientData,
    NoSignificantDifference,
    VariantAWins,
    VariantBWins,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::InsufficientData => "insufficient_data",
            AnalysisStatus::NoSignificantDifference => "no_significant_difference",
            AnalysisStatus::VariantAWins => "variant_a_wins",
            AnalysisStatus::VariantBWins => "variant_b_wins",
        }
    }

    pub fn winner(&self) -> Option<ArmId> {
        match self {
            AnalysisStatus::VariantAWins => Some(ArmId::A),
            AnalysisStatus::VariantBWins => Some(ArmId::B),
            _ => None,
        }
    }
}

/// Descriptive statistics for one arm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub arm: ArmId,
    pub samples: usize,
    /// Mean and sample std-dev of the primary metric
    pub mean: f64,
    pub std_dev: f64,
    pub avg_cost: f64,
    pub avg_latency_ms: f64,
    pub avg_quality: f64,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrimaryMetricResults {
    pub metric: PrimaryMetric,
    pub mean_a: f64,
    pub mean_b: f64,
    /// (mean_b - mean_a) / |mean_a| in percent; 0 when mean_a is 0
    pub improvement: f64,
    /// Cohen's d of b against a; 0 without variance
    pub effect_size: f64,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
    pub p_value: f64,
    /// 1 - p
    pub confidence: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentAnalysis {
    pub experiment_id: String,
    pub status: AnalysisStatus,
    pub arm_a: ArmStats,
    pub arm_b: ArmStats,
    pub primary_metric_results: PrimaryMetricResults,
    pub test_method: String,
    pub recommendation: String,
    pub analyzed_at: DateTime<Utc>,
}

impl ExperimentAnalysis {
    /// Whether this verdict clears the auto-stop bar for the experiment
    pub fn warrants_auto_stop(&self, config: &ExperimentConfig) -> bool {
        config.auto_stop
            && self.status.winner().is_some()
            && self.primary_metric_results.confidence >= config.winner_threshold
    }
}

/// Compare the two arms of an experiment on its primary metric
pub fn analyze(
    experiment_id: &str,
    config: &ExperimentConfig,
    results: &[ExperimentResult],
    test: &dyn SignificanceTest,
    now: DateTime<Utc>,
) -> ExperimentAnalysis {
    let metric = config.primary_metric;
    let arm_a: Vec<&ExperimentResult> = results.iter().filter(|r| r.arm == ArmId::A).collect();
    let arm_b: Vec<&ExperimentResult> = results.iter().filter(|r| r.arm == ArmId::B).collect();
    let values_a: Vec<f64> = arm_a.iter().map(|r| r.metric(metric)).collect();
    let values_b: Vec<f64> = arm_b.iter().map(|r| r.metric(metric)).collect();

    let stats_a = arm_stats(ArmId::A, &arm_a, &values_a);
    let stats_b = arm_stats(ArmId::B, &arm_b, &values_b);

    let welch = welch_t(&values_a, &values_b);
    let p_value = test.p_value(welch.statistic, welch.degrees_of_freedom);
    let significant = p_value < config.significance_level;

    let improvement = if stats_a.mean.abs() > f64::EPSILON {
        (stats_b.mean - stats_a.mean) / stats_a.mean.abs() * 100.0
    } else {
        0.0
    };

    let pooled_sd = ((stats_a.std_dev.powi(2) + stats_b.std_dev.powi(2)) / 2.0).sqrt();
    let effect_size = if pooled_sd > 0.0 {
        (stats_b.mean - stats_a.mean) / pooled_sd
    } else {
        0.0
    };

    let enough = stats_a.samples >= config.min_sample_size && stats_b.samples >= config.min_sample_size;
    let status = if !enough {
        AnalysisStatus::InsufficientData
    } else if !significant {
        AnalysisStatus::NoSignificantDifference
    } else {
        let b_higher = stats_b.mean > stats_a.mean;
        if b_higher != metric.lower_is_better() {
            AnalysisStatus::VariantBWins
        } else {
            AnalysisStatus::VariantAWins
        }
    };

    let recommendation = match status {
        AnalysisStatus::InsufficientData => format!(
            "Keep collecting data: {} of {} samples per arm",
            stats_a.samples.min(stats_b.samples),
            config.min_sample_size
        ),
        AnalysisStatus::NoSignificantDifference => {
            "No significant difference; either arm is acceptable".to_string()
        }
        AnalysisStatus::VariantAWins => format!(
            "Prefer {}:{} on {}",
            config.variant_a.backend,
            config.variant_a.model,
            metric.as_str()
        ),
        AnalysisStatus::VariantBWins => format!(
            "Prefer {}:{} on {} ({:+.1}%)",
            config.variant_b.backend,
            config.variant_b.model,
            metric.as_str(),
            improvement
        ),
    };

    ExperimentAnalysis {
        experiment_id: experiment_id.to_string(),
        status,
        primary_metric_results: PrimaryMetricResults {
            metric,
            mean_a: stats_a.mean,
            mean_b: stats_b.mean,
            improvement,
            effect_size,
            t_statistic: welch.statistic,
            degrees_of_freedom: welch.degrees_of_freedom,
            p_value,
            confidence: (1.0 - p_value).clamp(0.0, 1.0),
            significant,
        },
        arm_a: stats_a,
        arm_b: stats_b,
        test_method: test.name().to_string(),
        recommendation,
        analyzed_at: now,
    }
}

fn arm_stats(arm: ArmId, results: &[&ExperimentResult], values: &[f64]) -> ArmStats {
    let n = results.len();
    let avg = |f: fn(&ExperimentResult) -> f64| -> f64 {
        if n == 0 {
            0.0
        } else {
            results.iter().map(|r| f(r)).sum::<f64>() / n as f64
        }
    };

    ArmStats {
        arm,
        samples: n,
        mean: mean(values),
        std_dev: std_dev(values),
        avg_cost: avg(|r| r.cost),
        avg_latency_ms: avg(|r| r.latency_ms),
        avg_quality: avg(|r| r.quality),
        success_rate: avg(|r| if r.success { 1.0 } else { 0.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::ExperimentArm;
    use crate::metrics::{BandedSignificance, NormalApproximation};

    fn config() -> ExperimentConfig {
        ExperimentConfig::new(
            "cost",
            ExperimentArm::new("openai", "gpt-4o-mini", 0.5),
            ExperimentArm::new("anthropic", "claude-3-5-haiku", 0.5),
        )
    }

    fn result(arm: ArmId, cost: f64) -> ExperimentResult {
        ExperimentResult {
            arm,
            user_id: "u".to_string(),
            cost,
            latency_ms: 1000.0,
            quality: 0.8,
            success: true,
            recorded_at: Utc::now(),
        }
    }

    fn results(cost_a: f64, cost_b: f64, n: usize) -> Vec<ExperimentResult> {
        let mut out = Vec::new();
        for _ in 0..n {
            out.push(result(ArmId::A, cost_a));
            out.push(result(ArmId::B, cost_b));
        }
        out
    }

    #[test]
    fn test_identical_arms_no_difference() {
        let analysis = analyze("e", &config(), &results(0.01, 0.01, 100), &NormalApproximation, Utc::now());
        assert_eq!(analysis.status, AnalysisStatus::NoSignificantDifference);
        assert_eq!(analysis.primary_metric_results.t_statistic, 0.0);
        assert!((analysis.primary_metric_results.p_value - 1.0).abs() < 1e-6);

        // Banded lookup reaches the same verdict
        let banded = analyze("e", &config(), &results(0.01, 0.01, 100), &BandedSignificance, Utc::now());
        assert_eq!(banded.status, AnalysisStatus::NoSignificantDifference);
    }

    #[test]
    fn test_cheaper_arm_wins_on_cost() {
        let analysis = analyze("e", &config(), &results(0.01, 0.015, 100), &NormalApproximation, Utc::now());
        assert!((analysis.primary_metric_results.improvement - 50.0).abs() < 1e-6);
        assert_eq!(analysis.status, AnalysisStatus::VariantAWins);
        assert_eq!(analysis.primary_metric_results.confidence, 1.0);
        assert!(analysis.warrants_auto_stop(&config()));
    }

    #[test]
    fn test_higher_quality_wins_on_quality() {
        let mut data = Vec::new();
        for i in 0..50 {
            let jitter = (i % 5) as f64 * 0.01;
            data.push(ExperimentResult {
                quality: 0.6 + jitter,
                ..result(ArmId::A, 0.01)
            });
            data.push(ExperimentResult {
                quality: 0.9 + jitter,
                ..result(ArmId::B, 0.01)
            });
        }
        let config = config()
            .with_primary_metric(PrimaryMetric::Quality)
            .with_min_sample_size(50);
        let analysis = analyze("e", &config, &data, &NormalApproximation, Utc::now());
        assert_eq!(analysis.status, AnalysisStatus::VariantBWins);
        assert!(analysis.primary_metric_results.effect_size > 0.0);
    }

    #[test]
    fn test_insufficient_data() {
        let analysis = analyze("e", &config(), &results(0.01, 0.015, 20), &NormalApproximation, Utc::now());
        assert_eq!(analysis.status, AnalysisStatus::InsufficientData);
        assert!(!analysis.warrants_auto_stop(&config()));
        assert_eq!(analysis.arm_a.samples, 20);
    }

    #[test]
    fn test_zero_baseline_mean_has_zero_improvement() {
        let analysis = analyze("e", &config(), &results(0.0, 0.01, 100), &NormalApproximation, Utc::now());
        assert_eq!(analysis.primary_metric_results.improvement, 0.0);
    }
}
