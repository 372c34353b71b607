//! Outlier detection by z-score or interquartile range.

use super::{is_zero_spread, mean, quantile_sorted, round_to, sorted_copy, std_dev};
use crate::error::{AnalysisError, Result};
use crate::models::{format_timestamp, Dataset};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default z-score threshold.
pub const DEFAULT_ZSCORE_THRESHOLD: f64 = 2.0;

/// |z| above this is a high-severity anomaly.
pub const HIGH_SEVERITY_ZSCORE: f64 = 2.5;

/// Tukey fence multiplier for IQR outliers.
const IQR_FENCE: f64 = 1.5;

/// Values beyond this many IQRs are high-severity ("far out").
const IQR_FAR_FENCE: f64 = 3.0;

/// Detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyMethod {
    #[default]
    ZScore,
    Iqr,
}

impl FromStr for AnomalyMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "zscore" | "z-score" => Ok(AnomalyMethod::ZScore),
            "iqr" => Ok(AnomalyMethod::Iqr),
            other => Err(AnalysisError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for AnomalyMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyMethod::ZScore => write!(f, "zscore"),
            AnomalyMethod::Iqr => write!(f, "iqr"),
        }
    }
}

/// How far an anomaly sits from the bulk of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Medium,
    High,
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalySeverity::Medium => write!(f, "medium"),
            AnomalySeverity::High => write!(f, "high"),
        }
    }
}

/// Why a value was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum AnomalyEvidence {
    #[serde(rename = "zscore")]
    ZScore { z_score: f64 },
    Iqr { lower_bound: f64, upper_bound: f64 },
}

/// A single flagged value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    /// Position of the record in the dataset.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub value: f64,
    pub evidence: AnomalyEvidence,
    pub severity: AnomalySeverity,
}

/// Result of [`detect_anomalies`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub column: String,
    pub method: AnomalyMethod,
    pub threshold: f64,
    /// Non-null values examined.
    pub sample_size: usize,
    pub total_anomalies: usize,
    /// `total_anomalies / sample_size`, rounded to 2 decimals.
    pub anomaly_rate: f64,
    pub anomalies: Vec<AnomalyRecord>,
}

/// Flags outliers in a dataset column.
///
/// `zscore` flags values whose absolute z-score (population standard
/// deviation, rounded to 2 decimals) reaches `threshold`. A series without
/// spread has no anomalies. `iqr` flags values outside
/// `[Q1 - 1.5 IQR, Q3 + 1.5 IQR]` and ignores `threshold`.
pub fn detect_anomalies(
    dataset: &Dataset,
    column: &str,
    method: &str,
    threshold: f64,
) -> Result<AnomalyReport> {
    let method: AnomalyMethod = method.parse()?;
    let values = dataset.numeric_column(column)?;
    let mut report = detect_in_values(column, &values, method, threshold)?;

    for anomaly in &mut report.anomalies {
        anomaly.date = dataset.records()[anomaly.index]
            .date
            .as_ref()
            .map(format_timestamp);
    }

    Ok(report)
}

/// Core of [`detect_anomalies`] over a column with null positions preserved.
///
/// NaN and infinite values are treated as nulls.
pub fn detect_in_values(
    column: &str,
    values: &[Option<f64>],
    method: AnomalyMethod,
    threshold: f64,
) -> Result<AnomalyReport> {
    if !threshold.is_finite() || threshold < 0.0 {
        return Err(AnalysisError::invalid_parameter(
            "threshold",
            format!("must be a non-negative number, got {}", threshold),
        ));
    }

    let present: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(i, v)| v.filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();
    let sample: Vec<f64> = present.iter().map(|(_, v)| *v).collect();

    if sample.is_empty() {
        return Err(AnalysisError::NonNumericColumn {
            column: column.to_string(),
        });
    }

    let anomalies = match method {
        AnomalyMethod::ZScore => zscore_anomalies(&present, &sample, threshold),
        AnomalyMethod::Iqr => iqr_anomalies(&present, &sample),
    };

    Ok(AnomalyReport {
        column: column.to_string(),
        method,
        threshold,
        sample_size: sample.len(),
        total_anomalies: anomalies.len(),
        anomaly_rate: round_to(anomalies.len() as f64 / sample.len() as f64, 2),
        anomalies,
    })
}

fn zscore_anomalies(
    present: &[(usize, f64)],
    sample: &[f64],
    threshold: f64,
) -> Vec<AnomalyRecord> {
    let (Some(m), Some(std)) = (mean(sample), std_dev(sample, 0)) else {
        return Vec::new();
    };
    if is_zero_spread(std, m) {
        return Vec::new();
    }

    present
        .iter()
        .filter_map(|&(index, value)| {
            let z = round_to((value - m) / std, 2);
            (z.abs() >= threshold).then(|| AnomalyRecord {
                index,
                date: None,
                value,
                evidence: AnomalyEvidence::ZScore { z_score: z },
                severity: if z.abs() > HIGH_SEVERITY_ZSCORE {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
            })
        })
        .collect()
}

fn iqr_anomalies(present: &[(usize, f64)], sample: &[f64]) -> Vec<AnomalyRecord> {
    let sorted = sorted_copy(sample);
    let (Some(q1), Some(q3)) = (quantile_sorted(&sorted, 0.25), quantile_sorted(&sorted, 0.75))
    else {
        return Vec::new();
    };
    let iqr = q3 - q1;
    let lower_bound = q1 - IQR_FENCE * iqr;
    let upper_bound = q3 + IQR_FENCE * iqr;

    present
        .iter()
        .filter(|(_, v)| *v < lower_bound || *v > upper_bound)
        .map(|&(index, value)| {
            let far = value < q1 - IQR_FAR_FENCE * iqr || value > q3 + IQR_FAR_FENCE * iqr;
            AnomalyRecord {
                index,
                date: None,
                value,
                evidence: AnomalyEvidence::Iqr {
                    lower_bound,
                    upper_bound,
                },
                severity: if far {
                    AnomalySeverity::High
                } else {
                    AnomalySeverity::Medium
                },
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_timestamp, Record};

    fn dataset(values: &[f64]) -> Dataset {
        let records = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let date = parse_timestamp(&format!("2024-02-{:02}", i + 1));
                Record::new(date, *v, "A", "North")
            })
            .collect();
        Dataset::new("test", records)
    }

    #[test]
    fn test_zscore_flags_single_spike() {
        let data = dataset(&[100.0, 150.0, 200.0, 180.0, 5000.0]);
        let report = detect_anomalies(&data, "value", "zscore", 2.0).unwrap();

        assert_eq!(report.total_anomalies, 1);
        let anomaly = &report.anomalies[0];
        assert_eq!(anomaly.index, 4);
        assert_eq!(anomaly.value, 5000.0);
        assert_eq!(anomaly.date.as_deref(), Some("2024-02-05"));
        assert_eq!(anomaly.evidence, AnomalyEvidence::ZScore { z_score: 2.0 });
        assert_eq!(anomaly.severity, AnomalySeverity::Medium);
        assert_eq!(report.sample_size, 5);
        assert_eq!(report.anomaly_rate, 0.2);
    }

    #[test]
    fn test_zero_variance_has_no_anomalies() {
        for values in [vec![42.0; 10], vec![0.1; 7], vec![-3.5, -3.5]] {
            let report = detect_anomalies(&dataset(&values), "value", "zscore", 2.0).unwrap();
            assert!(report.anomalies.is_empty());
            assert_eq!(report.anomaly_rate, 0.0);

            let strict = detect_anomalies(&dataset(&values), "value", "zscore", 0.0).unwrap();
            assert!(strict.anomalies.is_empty());
        }
    }

    #[test]
    fn test_iqr_bounds() {
        let report = detect_anomalies(
            &dataset(&[10.0, 12.0, 11.0, 13.0, 12.0, 11.0, 40.0, -20.0]),
            "value",
            "iqr",
            DEFAULT_ZSCORE_THRESHOLD,
        )
        .unwrap();

        let flagged: Vec<f64> = report.anomalies.iter().map(|a| a.value).collect();
        assert_eq!(flagged, vec![40.0, -20.0]);
        assert!(report
            .anomalies
            .iter()
            .all(|a| a.severity == AnomalySeverity::High));
        match &report.anomalies[0].evidence {
            AnomalyEvidence::Iqr {
                lower_bound,
                upper_bound,
            } => {
                // Q1 = 10.75, Q3 = 12.25
                assert_eq!(*lower_bound, 8.5);
                assert_eq!(*upper_bound, 14.5);
            }
            other => panic!("unexpected evidence {:?}", other),
        }
        assert_eq!(report.anomaly_rate, 0.25);
    }

    #[test]
    fn test_unsupported_method() {
        assert_eq!(
            detect_anomalies(&dataset(&[1.0, 2.0]), "value", "isolation_forest", 2.0),
            Err(AnalysisError::UnsupportedMethod("isolation_forest".into()))
        );
    }

    #[test]
    fn test_rate_uses_non_null_sample() {
        let values = [Some(1.0), None, Some(1.0), Some(1.0), None, Some(9.0)];
        let report = detect_in_values("units", &values, AnomalyMethod::Iqr, 2.0).unwrap();
        assert_eq!(report.sample_size, 4);
        assert_eq!(report.total_anomalies, 1);
        assert_eq!(report.anomalies[0].index, 5);
        assert_eq!(report.anomaly_rate, 0.25);
    }

    #[test]
    fn test_non_finite_values_do_not_hide_spike() {
        let values = [
            Some(100.0),
            Some(150.0),
            Some(f64::NAN),
            Some(200.0),
            Some(f64::INFINITY),
            Some(180.0),
            Some(5000.0),
        ];
        let report = detect_in_values("value", &values, AnomalyMethod::ZScore, 2.0).unwrap();
        assert_eq!(report.sample_size, 5);
        assert_eq!(report.total_anomalies, 1);
        assert_eq!(report.anomalies[0].index, 6);
        assert_eq!(report.anomalies[0].value, 5000.0);
    }

    #[test]
    fn test_invalid_threshold() {
        let values = [Some(1.0), Some(2.0)];
        assert!(matches!(
            detect_in_values("x", &values, AnomalyMethod::ZScore, f64::NAN),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }
}
