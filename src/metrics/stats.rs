// Summary statistics and significance testing
//
// Two-sided p-values for t/z statistics sit behind `SignificanceTest` so the
// experiment analysis and drift checks can swap the approximation in use.

use serde::{Deserialize, Serialize};
use std::fmt;

/// z for a two-sided 95% interval
pub const Z_95: f64 = 1.96;

/// Standard errors below this fraction of the means count as zero
const ZERO_VARIANCE_TOLERANCE: f64 = 1e-12;

/// Which p-value approximation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificanceMethod {
    /// Coarse statistic to p-value bands
    Banded,
    /// Standard normal CDF
    Normal,
    /// Student's t distribution with Welch degrees of freedom
    StudentT,
}

impl Default for SignificanceMethod {
    fn default() -> Self {
        SignificanceMethod::Normal
    }
}

impl SignificanceMethod {
    pub fn build(&self) -> Box<dyn SignificanceTest> {
        match self {
            SignificanceMethod::Banded => Box::new(BandedSignificance),
            SignificanceMethod::Normal => Box::new(NormalApproximation),
            SignificanceMethod::StudentT => Box::new(StudentT),
        }
    }
}

/// Converts a test statistic into a two-sided p-value
pub trait SignificanceTest: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Two-sided p-value in [0, 1]; non-finite statistics are treated as
    /// infinitely significant
    fn p_value(&self, statistic: f64, degrees_of_freedom: f64) -> f64;
}

/// Lookup of |t| against the common critical values
#[derive(Debug, Clone, Copy, Default)]
pub struct BandedSignificance;

impl SignificanceTest for BandedSignificance {
    fn name(&self) -> &'static str {
        "banded"
    }

    fn p_value(&self, statistic: f64, _degrees_of_freedom: f64) -> f64 {
        let t = statistic.abs();
        if t.is_nan() {
            1.0
        } else if t > 3.291 {
            0.001
        } else if t > 2.576 {
            0.01
        } else if t > 1.96 {
            0.05
        } else if t > 1.645 {
            0.1
        } else {
            0.5
        }
    }
}

/// Two-sided p-value from the standard normal distribution
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalApproximation;

impl SignificanceTest for NormalApproximation {
    fn name(&self) -> &'static str {
        "normal"
    }

    fn p_value(&self, statistic: f64, _degrees_of_freedom: f64) -> f64 {
        if statistic.is_nan() {
            return 1.0;
        }
        (2.0 * (1.0 - normal_cdf(statistic.abs()))).clamp(0.0, 1.0)
    }
}

/// Two-sided p-value from Student's t distribution
///
/// Falls back to the normal distribution when the degrees of freedom are
/// unusable.
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentT;

impl SignificanceTest for StudentT {
    fn name(&self) -> &'static str {
        "student_t"
    }

    fn p_value(&self, statistic: f64, degrees_of_freedom: f64) -> f64 {
        if statistic.is_nan() {
            return 1.0;
        }
        if statistic.is_infinite() {
            return 0.0;
        }
        if !degrees_of_freedom.is_finite() || degrees_of_freedom <= 0.0 {
            return NormalApproximation.p_value(statistic, degrees_of_freedom);
        }
        let x = degrees_of_freedom / (degrees_of_freedom + statistic * statistic);
        incomplete_beta(degrees_of_freedom / 2.0, 0.5, x).clamp(0.0, 1.0)
    }
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Error function, Abramowitz and Stegun 7.1.26 (|error| < 1.5e-7)
fn erf(x: f64) -> f64 {
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;
    const P: f64 = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let y = 1.0 - (((((A5 * t + A4) * t) + A3) * t + A2) * t + A1) * t * (-x * x).exp();
    sign * y
}

/// ln Γ(x) via the Lanczos approximation (g = 7, n = 9)
fn ln_gamma(x: f64) -> f64 {
    const COEFFS: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];

    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }

    let x = x - 1.0;
    let mut a = COEFFS[0];
    let t = x + 7.5;
    for (i, c) in COEFFS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta I_x(a, b)
fn incomplete_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }

    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();

    // The continued fraction converges fastest on this side of the mean
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_continued_fraction(a, b, x) / a
    } else {
        1.0 - front * beta_continued_fraction(b, a, 1.0 - x) / b
    }
}

/// Lentz evaluation of the incomplete beta continued fraction
fn beta_continued_fraction(a: f64, b: f64, x: f64) -> f64 {
    const MAX_ITERATIONS: usize = 200;
    const EPSILON: f64 = 3e-14;
    const TINY: f64 = 1e-300;

    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;

    let mut c = 1.0;
    let mut d = 1.0 - qab * x / qap;
    if d.abs() < TINY {
        d = TINY;
    }
    d = 1.0 / d;
    let mut h = d;

    for m in 1..=MAX_ITERATIONS {
        let m = m as f64;
        let m2 = 2.0 * m;

        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        h *= d * c;

        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 + aa * d;
        if d.abs() < TINY {
            d = TINY;
        }
        c = 1.0 + aa / c;
        if c.abs() < TINY {
            c = TINY;
        }
        d = 1.0 / d;
        let delta = d * c;
        h *= delta;

        if (delta - 1.0).abs() < EPSILON {
            break;
        }
    }
    h
}

/// Arithmetic mean; 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample variance (n - 1); 0 below two values
pub fn sample_variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

pub fn std_dev(values: &[f64]) -> f64 {
    sample_variance(values).sqrt()
}

/// Welch's t statistic for `b - a` and its degrees of freedom
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub statistic: f64,
    pub degrees_of_freedom: f64,
}

/// Welch's unequal-variance t test of `b` against `a`
///
/// With zero pooled variance the statistic is 0 for equal means and
/// signed infinity otherwise.
pub fn welch_t(a: &[f64], b: &[f64]) -> WelchTest {
    let (na, nb) = (a.len() as f64, b.len() as f64);
    let fallback_df = (na + nb - 2.0).max(1.0);
    if a.is_empty() || b.is_empty() {
        return WelchTest {
            statistic: 0.0,
            degrees_of_freedom: fallback_df,
        };
    }

    let diff = mean(b) - mean(a);
    let va = sample_variance(a) / na;
    let vb = sample_variance(b) / nb;
    let se2 = va + vb;

    // Rounding leaves constant samples with a variance near but above zero
    let scale = ZERO_VARIANCE_TOLERANCE * (mean(a).abs() + mean(b).abs());
    if se2 <= scale * scale || !se2.is_finite() {
        let statistic = if diff.abs() < f64::EPSILON {
            0.0
        } else {
            f64::INFINITY.copysign(diff)
        };
        return WelchTest {
            statistic,
            degrees_of_freedom: fallback_df,
        };
    }

    let mut denominator = 0.0;
    if na > 1.0 {
        denominator += va * va / (na - 1.0);
    }
    if nb > 1.0 {
        denominator += vb * vb / (nb - 1.0);
    }
    let degrees_of_freedom = if denominator > 0.0 {
        se2 * se2 / denominator
    } else {
        fallback_df
    };

    WelchTest {
        statistic: diff / se2.sqrt(),
        degrees_of_freedom,
    }
}

/// 95% normal-approximation interval for a proportion, clamped to [0, 1]
pub fn proportion_interval(p: f64, n: usize) -> (f64, f64) {
    if n == 0 || !p.is_finite() {
        return (0.0, 1.0);
    }
    let p = p.clamp(0.0, 1.0);
    let se = (p * (1.0 - p) / n as f64).sqrt();
    ((p - Z_95 * se).clamp(0.0, 1.0), (p + Z_95 * se).clamp(0.0, 1.0))
}

/// Two-proportion z statistic of `p2` against `p1`
pub fn two_proportion_z(p1: f64, n1: usize, p2: f64, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 0.0;
    }
    let (n1, n2) = (n1 as f64, n2 as f64);
    let pooled = ((p1 * n1 + p2 * n2) / (n1 + n2)).clamp(0.0, 1.0);
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se <= 0.0 || !se.is_finite() {
        return 0.0;
    }
    (p2 - p1) / se
}

/// Linear-interpolated percentile of an ascending slice, q in [0, 1]
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}
