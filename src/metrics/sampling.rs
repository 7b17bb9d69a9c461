// Health sample rate selection
//
// Errors and slow requests are always kept. Everything else is kept with a
// probability chosen by the configured strategy and the current throughput,
// so sustained load thins out latency samples instead of blocking.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplingStrategy {
    /// Fixed base rate
    Uniform,
    /// Base rate scaled down in proportion to throughput above the threshold
    Adaptive,
    /// Fixed steps at 100, 500 and 1000 requests per second
    Tiered,
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        SamplingStrategy::Adaptive
    }
}

#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplingConfig,
    slow_request_threshold_ms: f64,
}

impl Sampler {
    pub fn new(config: SamplingConfig, slow_request_threshold_ms: f64) -> Self {
        Self {
            config,
            slow_request_threshold_ms,
        }
    }

    pub fn strategy(&self) -> SamplingStrategy {
        self.config.strategy
    }

    /// Sampling probability at the given throughput (requests per second)
    pub fn rate(&self, throughput_rps: f64) -> f64 {
        let base = self.config.base_rate.clamp(0.0, 1.0);
        let throughput = if throughput_rps.is_finite() {
            throughput_rps.max(0.0)
        } else {
            0.0
        };

        match self.config.strategy {
            SamplingStrategy::Uniform => base,
            SamplingStrategy::Adaptive => {
                let threshold = self.config.high_volume_threshold;
                if threshold <= 0.0 || throughput <= threshold {
                    base
                } else {
                    (base * threshold / throughput).max(self.config.min_rate).min(base)
                }
            }
            SamplingStrategy::Tiered => {
                if throughput >= 1_000.0 {
                    0.01
                } else if throughput >= 500.0 {
                    0.05
                } else if throughput >= 100.0 {
                    0.1
                } else {
                    base
                }
            }
        }
    }

    /// Decide whether to keep a request sample
    pub fn should_sample(&self, latency_ms: f64, success: bool, throughput_rps: f64) -> bool {
        let draw = rand::thread_rng().gen::<f64>();
        self.should_sample_with(latency_ms, success, throughput_rps, draw)
    }

    /// As `should_sample` with the uniform draw supplied by the caller
    pub fn should_sample_with(
        &self,
        latency_ms: f64,
        success: bool,
        throughput_rps: f64,
        draw: f64,
    ) -> bool {
        if !success || latency_ms > self.slow_request_threshold_ms {
            return true;
        }
        draw < self.rate(throughput_rps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(strategy: SamplingStrategy) -> Sampler {
        Sampler::new(
            SamplingConfig {
                strategy,
                ..SamplingConfig::default()
            },
            5_000.0,
        )
    }

    #[test]
    fn test_uniform_ignores_throughput() {
        let s = sampler(SamplingStrategy::Uniform);
        assert_eq!(s.rate(0.0), 1.0);
        assert_eq!(s.rate(10_000.0), 1.0);
    }

    #[test]
    fn test_adaptive_backs_off_proportionally() {
        let s = sampler(SamplingStrategy::Adaptive);
        assert_eq!(s.rate(50.0), 1.0);
        assert!((s.rate(200.0) - 0.5).abs() < 1e-12);
        assert!((s.rate(1_000.0) - 0.1).abs() < 1e-12);
        // Floored at min_rate
        assert!((s.rate(1_000_000.0) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_tiered_steps() {
        let s = sampler(SamplingStrategy::Tiered);
        assert_eq!(s.rate(99.0), 1.0);
        assert_eq!(s.rate(100.0), 0.1);
        assert_eq!(s.rate(750.0), 0.05);
        assert_eq!(s.rate(1_500.0), 0.01);
    }

    #[test]
    fn test_errors_and_slow_requests_always_sampled() {
        let s = sampler(SamplingStrategy::Tiered);
        assert!(s.should_sample_with(100.0, false, 5_000.0, 0.999));
        assert!(s.should_sample_with(6_000.0, true, 5_000.0, 0.999));
        assert!(!s.should_sample_with(100.0, true, 5_000.0, 0.5));
        assert!(s.should_sample_with(100.0, true, 5_000.0, 0.001));
    }
}
