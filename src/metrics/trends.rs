// Trend direction of a snapshot series

use serde::{Deserialize, Serialize};

/// Half-average differences at or below this are noise
const TREND_THRESHOLD: f64 = 0.05;

/// Fewest values a direction is called from
const MIN_TREND_POINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Improving,
    Stable,
    Declining,
}

/// Direction of a series where larger values are better
///
/// Splits the finite values in two and compares the halves' averages; an
/// odd middle value counts toward the later half.
pub fn trend_of(values: impl IntoIterator<Item = f64>) -> Trend {
    let series: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
    if series.len() < MIN_TREND_POINTS {
        return Trend::Stable;
    }

    let (earlier, later) = series.split_at(series.len() / 2);
    let delta = average(later) - average(earlier);

    if delta > TREND_THRESHOLD {
        Trend::Improving
    } else if delta < -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}

fn average(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rising_accuracy_is_improving() {
        let trend = trend_of([0.5, 0.55, 0.6, 0.65, 0.8, 0.85, 0.9, 0.95]);
        assert_eq!(trend, Trend::Improving);
    }

    #[test]
    fn test_falling_accuracy_is_declining() {
        let trend = trend_of([0.9, 0.85, 0.8, 0.75, 0.6, 0.55, 0.5, 0.45]);
        assert_eq!(trend, Trend::Declining);
    }

    #[test]
    fn test_flat_or_short_series_is_stable() {
        assert_eq!(trend_of(std::iter::repeat(0.75).take(8)), Trend::Stable);
        assert_eq!(trend_of([0.1, 0.9]), Trend::Stable);
        assert_eq!(trend_of(Vec::new()), Trend::Stable);
    }

    #[test]
    fn test_non_finite_values_skipped() {
        // Only three usable points remain
        assert_eq!(trend_of([0.1, f64::NAN, 0.9, f64::INFINITY, 0.95]), Trend::Stable);
        assert_eq!(
            trend_of([0.1, f64::NAN, 0.2, 0.9, 0.95]),
            Trend::Improving
        );
    }
}
