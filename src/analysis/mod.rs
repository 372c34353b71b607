//! Statistics and aggregation engines.
//!
//! Everything in here is a pure computation over an already loaded
//! [`Dataset`](crate::models::Dataset). Errors are returned as values.

pub mod aggregator;
pub mod anomaly;
pub mod correlation;
pub mod statistics;
pub mod trend;

pub use aggregator::*;
pub use anomaly::{detect_anomalies, AnomalyMethod, AnomalyRecord, AnomalyReport, AnomalySeverity};
pub use correlation::{
    correlation_matrix, CorrelationEntry, CorrelationMatrix, CorrelationMethod,
    CorrelationStrength,
};
pub use statistics::{basic_statistics, describe, StatisticsResult};
pub use trend::{trend_analysis, TrendDirection, TrendResult};

/// Rounds to a fixed number of decimal places.
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Arithmetic mean; `None` for an empty slice.
pub(crate) fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Standard deviation with `ddof` degrees of freedom removed.
pub(crate) fn std_dev(values: &[f64], ddof: usize) -> Option<f64> {
    if values.len() <= ddof {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|x| (x - m).powi(2)).sum();
    Some((ss / (values.len() - ddof) as f64).sqrt())
}

/// Treats floating-point residue around a constant series as zero spread.
pub(crate) fn is_zero_spread(std: f64, center: f64) -> bool {
    !std.is_finite() || std <= 1e-12 * center.abs().max(1.0)
}

/// Linear-interpolated quantile of an ascending slice.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = (sorted.len() - 1) as f64 * q.clamp(0.0, 1.0);
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Sorts a copy of the values ascending.
pub(crate) fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(23.8875, 2), 23.89);
        assert_eq!(round_to(-0.12345, 3), -0.123);
        assert_eq!(round_to(0.2, 2), 0.2);
    }

    #[test]
    fn test_quantile_interpolation() {
        let sorted = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&sorted, 0.5), Some(2.5));
        assert_eq!(quantile_sorted(&sorted, 0.25), Some(1.75));
        assert_eq!(quantile_sorted(&sorted, 1.0), Some(4.0));
        assert_eq!(quantile_sorted(&[], 0.5), None);
    }

    #[test]
    fn test_std_dev_ddof() {
        let values = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(std_dev(&values, 0), Some(2.0));
        assert!(std_dev(&[1.0], 1).is_none());
    }
}
