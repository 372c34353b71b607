//! Descriptive statistics over a single numeric column.

use super::{is_zero_spread, mean, quantile_sorted, sorted_copy};
use crate::error::{AnalysisError, Result};
use crate::models::Dataset;
use serde::{Deserialize, Serialize};

/// Descriptive statistics of one column, computed over non-null values.
///
/// Standard deviation and variance are sample estimates (n - 1).
/// Skewness and kurtosis are the bias-adjusted estimators; kurtosis is
/// reported as excess kurtosis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticsResult {
    pub column: String,
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub range: f64,
    pub q25: f64,
    pub q75: f64,
    pub iqr: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// Computes [`StatisticsResult`] for a dataset column.
pub fn basic_statistics(dataset: &Dataset, column: &str) -> Result<StatisticsResult> {
    let values: Vec<f64> = dataset.numeric_column(column)?.into_iter().flatten().collect();
    describe(column, &values)
}

/// Computes [`StatisticsResult`] over already extracted values.
///
/// NaN and infinite values are dropped before anything is computed.
pub fn describe(column: &str, values: &[f64]) -> Result<StatisticsResult> {
    let non_numeric = || AnalysisError::NonNumericColumn {
        column: column.to_string(),
    };

    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let values = finite.as_slice();
    let sorted = sorted_copy(values);
    let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
        return Err(non_numeric());
    };

    let n = values.len();
    let sum: f64 = values.iter().sum();
    let mean = mean(values).ok_or_else(non_numeric)?;
    let variance = if n > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };
    let q25 = quantile_sorted(&sorted, 0.25).ok_or_else(non_numeric)?;
    let median = quantile_sorted(&sorted, 0.5).ok_or_else(non_numeric)?;
    let q75 = quantile_sorted(&sorted, 0.75).ok_or_else(non_numeric)?;

    Ok(StatisticsResult {
        column: column.to_string(),
        count: n,
        sum,
        mean,
        median,
        std_dev: variance.sqrt(),
        variance,
        min,
        max,
        range: max - min,
        q25,
        q75,
        iqr: q75 - q25,
        skewness: skewness(values, mean),
        kurtosis: kurtosis(values, mean),
    })
}

/// Adjusted Fisher-Pearson skewness. Zero below three samples or without spread.
fn skewness(values: &[f64], mean: f64) -> f64 {
    let n = values.len();
    if n < 3 {
        return 0.0;
    }
    let nf = n as f64;
    let m2 = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / nf;
    if is_zero_spread(m2.sqrt(), mean) {
        return 0.0;
    }
    let m3 = values.iter().map(|x| (x - mean).powi(3)).sum::<f64>() / nf;
    let g1 = m3 / m2.powf(1.5);
    g1 * (nf * (nf - 1.0)).sqrt() / (nf - 2.0)
}

/// Bias-adjusted excess kurtosis. Zero below four samples or without spread.
fn kurtosis(values: &[f64], mean: f64) -> f64 {
    let n = values.len();
    if n < 4 {
        return 0.0;
    }
    let nf = n as f64;
    let s2: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
    if is_zero_spread((s2 / nf).sqrt(), mean) {
        return 0.0;
    }
    let s4: f64 = values.iter().map(|x| (x - mean).powi(4)).sum();
    let numer = nf * (nf + 1.0) * (nf - 1.0) * s4;
    let denom = (nf - 2.0) * (nf - 3.0) * s2 * s2;
    let adj = 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0));
    numer / denom - adj
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Record;
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_describe_known_values() {
        let stats = describe("value", &[100.0, 150.0, 200.0, 180.0, 5000.0]).unwrap();
        assert_eq!(stats.count, 5);
        assert!(approx(stats.mean, 1126.0));
        assert_eq!(stats.median, 180.0);
        assert_eq!(stats.q25, 150.0);
        assert_eq!(stats.q75, 200.0);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 5000.0);
        assert_eq!(stats.range, 4900.0);
        // sample variance: 18_765_520 / 4
        assert!((stats.variance - 4_691_380.0).abs() < 1e-6);
        assert!(stats.skewness > 2.0);
        assert!(stats.kurtosis > 4.0);
    }

    #[test]
    fn test_quartile_ordering() {
        let series: [&[f64]; 4] = [
            &[3.0],
            &[5.0, -2.0],
            &[1.0, 1.0, 1.0, 9.0, -4.5, 2.25],
            &[10.0, 0.0, 7.5, 7.5, 3.0, 100.0, -50.0],
        ];
        for values in series {
            let s = describe("x", values).unwrap();
            assert!(s.min <= s.q25);
            assert!(s.q25 <= s.median);
            assert!(s.median <= s.q75);
            assert!(s.q75 <= s.max);
        }
    }

    #[test]
    fn test_small_sample_policy() {
        let two = describe("x", &[1.0, 5.0]).unwrap();
        assert_eq!(two.skewness, 0.0);
        assert_eq!(two.kurtosis, 0.0);

        let three = describe("x", &[1.0, 2.0, 9.0]).unwrap();
        assert!(three.skewness > 0.0);
        assert_eq!(three.kurtosis, 0.0);

        let single = describe("x", &[4.0]).unwrap();
        assert_eq!(single.std_dev, 0.0);
        assert_eq!(single.median, 4.0);
    }

    #[test]
    fn test_constant_series() {
        let s = describe("x", &[7.0; 6]).unwrap();
        assert_eq!(s.std_dev, 0.0);
        assert_eq!(s.skewness, 0.0);
        assert_eq!(s.kurtosis, 0.0);
    }

    #[test]
    fn test_empty_values_fail() {
        assert_eq!(
            describe("x", &[]),
            Err(AnalysisError::NonNumericColumn { column: "x".into() })
        );
    }

    #[test]
    fn test_describe_drops_non_finite() {
        let values = [100.0, 150.0, f64::NAN, 180.0, f64::INFINITY, 5000.0];
        let stats = describe("value", &values).unwrap();
        assert_eq!(stats.count, 4);
        assert!(approx(stats.mean, 1357.5));
        assert!(stats.std_dev.is_finite());
        assert_eq!(stats.max, 5000.0);

        assert_eq!(
            describe("x", &[f64::NAN, f64::NEG_INFINITY]),
            Err(AnalysisError::NonNumericColumn { column: "x".into() })
        );
    }

    #[test]
    fn test_non_finite_record_value_is_null() {
        let records = [100.0, f64::NAN, 150.0]
            .iter()
            .map(|v| Record::new(None, *v, "A", "North"))
            .collect();
        let dataset = Dataset::new("test", records);
        let stats = basic_statistics(&dataset, "value").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 125.0);
    }

    #[test]
    fn test_basic_statistics_drops_nulls() {
        let rows = [json!({"units": 2}), json!({"units": null}), json!({"units": 4})];
        let records = rows
            .iter()
            .map(|raw| {
                Record::new(None, 1.0, "A", "North")
                    .with_raw(raw.as_object().cloned().unwrap_or_default())
            })
            .collect();
        let dataset = Dataset::new("test", records);
        let stats = basic_statistics(&dataset, "units").unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 3.0);

        assert!(matches!(
            basic_statistics(&dataset, "category"),
            Err(AnalysisError::NonNumericColumn { .. })
        ));
    }
}
