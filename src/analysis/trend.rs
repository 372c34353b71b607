//! Time-series trend analysis: growth rates, moving averages, inflection points.

use super::{mean, round_to, std_dev};
use crate::error::{AnalysisError, Result};
use crate::models::{format_timestamp, Dataset};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean growth above this percentage is an increasing trend, below its
/// negation a decreasing one.
pub const TREND_THRESHOLD_PCT: f64 = 5.0;

/// Overall direction of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Stable,
}

impl TrendDirection {
    /// Classifies a mean period-over-period growth rate (in percent).
    pub fn from_growth(avg_growth: f64) -> Self {
        if avg_growth > TREND_THRESHOLD_PCT {
            TrendDirection::Increasing
        } else if avg_growth < -TREND_THRESHOLD_PCT {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Stable
        }
    }
}

impl fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendDirection::Increasing => write!(f, "increasing"),
            TrendDirection::Decreasing => write!(f, "decreasing"),
            TrendDirection::Stable => write!(f, "stable"),
        }
    }
}

/// Growth from the previous point to this one, in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GrowthPoint {
    pub date: String,
    pub growth_rate: f64,
}

/// Averages of the first and last `window` points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentPerformance {
    pub first_period_avg: f64,
    pub last_period_avg: f64,
    pub performance_change: Option<f64>,
}

/// Result of [`trend_analysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendResult {
    pub value_column: String,
    pub date_column: String,
    pub window_size: usize,
    pub start: String,
    pub end: String,
    pub trend: TrendDirection,
    pub average_growth_rate: f64,
    pub total_growth: Option<f64>,
    pub growth_rates: Vec<GrowthPoint>,
    /// Trailing simple moving average; `None` until the window fills.
    pub moving_average: Vec<Option<f64>>,
    pub latest_moving_average: Option<f64>,
    pub inflection_points: Vec<String>,
    pub recent_performance: RecentPerformance,
}

/// Analyzes `value_column` over time, ordering records by `date_column`.
///
/// Records missing either a value or a parsable date are dropped. Records
/// with equal dates keep their original relative order.
pub fn trend_analysis(
    dataset: &Dataset,
    value_column: &str,
    date_column: &str,
    window_size: usize,
) -> Result<TrendResult> {
    let values = dataset.numeric_column(value_column)?;

    let points: Vec<(NaiveDateTime, f64)> = dataset
        .records()
        .iter()
        .zip(values)
        .filter_map(|(record, value)| Some((record.timestamp(date_column)?, value?)))
        .collect();

    trend_from_points(value_column, date_column, points, window_size)
}

/// Same as [`trend_analysis`] over pre-extracted `(date, value)` points.
pub fn trend_from_points(
    value_column: &str,
    date_column: &str,
    mut points: Vec<(NaiveDateTime, f64)>,
    window_size: usize,
) -> Result<TrendResult> {
    if window_size == 0 {
        return Err(AnalysisError::invalid_parameter(
            "window_size",
            "must be at least 1",
        ));
    }

    points.sort_by_key(|(date, _)| *date);

    if points.len() < 2 {
        return Err(AnalysisError::InsufficientData {
            required: 2,
            found: points.len(),
        });
    }

    let values: Vec<f64> = points.iter().map(|(_, v)| *v).collect();

    let growth_rates: Vec<(NaiveDateTime, f64)> = points
        .windows(2)
        .filter(|pair| pair[0].1 != 0.0)
        .map(|pair| {
            let (prev, (date, current)) = (pair[0].1, pair[1]);
            (date, round_to((current - prev) / prev * 100.0, 2))
        })
        .collect();

    let rates: Vec<f64> = growth_rates.iter().map(|(_, r)| *r).collect();
    let average_growth_rate = mean(&rates).map_or(0.0, |m| round_to(m, 2));

    let moving_average = moving_average(&values, window_size);
    let latest_moving_average = moving_average.last().copied().flatten();

    let first = values[0];
    let last = values[values.len() - 1];
    let total_growth = (first != 0.0).then(|| round_to((last - first) / first * 100.0, 2));

    Ok(TrendResult {
        value_column: value_column.to_string(),
        date_column: date_column.to_string(),
        window_size,
        start: format_timestamp(&points[0].0),
        end: format_timestamp(&points[points.len() - 1].0),
        trend: TrendDirection::from_growth(average_growth_rate),
        average_growth_rate,
        total_growth,
        inflection_points: inflection_points(&growth_rates),
        growth_rates: growth_rates
            .iter()
            .map(|(date, rate)| GrowthPoint {
                date: format_timestamp(date),
                growth_rate: *rate,
            })
            .collect(),
        moving_average,
        latest_moving_average,
        recent_performance: recent_performance(&values, window_size),
    })
}

/// Trailing simple moving average, rounded to 2 decimals.
pub fn moving_average(values: &[f64], window: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if window == 0 || i + 1 < window {
                None
            } else {
                mean(&values[i + 1 - window..=i]).map(|m| round_to(m, 2))
            }
        })
        .collect()
}

/// Dates where the change in growth rate exceeds one standard deviation of
/// the change series.
fn inflection_points(growth_rates: &[(NaiveDateTime, f64)]) -> Vec<String> {
    let changes: Vec<(NaiveDateTime, f64)> = growth_rates
        .windows(2)
        .map(|pair| (pair[1].0, pair[1].1 - pair[0].1))
        .collect();

    let deltas: Vec<f64> = changes.iter().map(|(_, d)| *d).collect();
    let Some(threshold) = std_dev(&deltas, 1) else {
        return Vec::new();
    };

    changes
        .iter()
        .filter(|(_, delta)| delta.abs() > threshold)
        .map(|(date, _)| format_timestamp(date))
        .collect()
}

fn recent_performance(values: &[f64], window: usize) -> RecentPerformance {
    let take = window.min(values.len());
    let first_period_avg = mean(&values[..take]).unwrap_or(0.0);
    let last_period_avg = mean(&values[values.len() - take..]).unwrap_or(0.0);
    let performance_change = (first_period_avg != 0.0)
        .then(|| round_to((last_period_avg - first_period_avg) / first_period_avg * 100.0, 2));

    RecentPerformance {
        first_period_avg,
        last_period_avg,
        performance_change,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{parse_timestamp, Record};

    fn day(n: u32) -> NaiveDateTime {
        parse_timestamp(&format!("2024-01-{:02}", n)).unwrap()
    }

    fn dataset_from(values: &[(u32, f64)]) -> Dataset {
        let records = values
            .iter()
            .map(|(d, v)| Record::new(Some(day(*d)), *v, "A", "North"))
            .collect();
        Dataset::new("test", records)
    }

    #[test]
    fn test_increasing_trend_sorted_by_date() {
        // deliberately out of order; sorted by date it reads 100,150,200,180,220
        let dataset = dataset_from(&[(3, 200.0), (1, 100.0), (5, 220.0), (2, 150.0), (4, 180.0)]);
        let result = trend_analysis(&dataset, "value", "date", 3).unwrap();

        assert_eq!(result.trend, TrendDirection::Increasing);
        let rates: Vec<f64> = result.growth_rates.iter().map(|g| g.growth_rate).collect();
        assert_eq!(rates, vec![50.0, 33.33, -10.0, 22.22]);
        assert!((result.average_growth_rate - 23.89).abs() < 0.011);
        assert_eq!(result.total_growth, Some(120.0));
        assert_eq!(result.start, "2024-01-01");
        assert_eq!(result.end, "2024-01-05");
        assert_eq!(
            result.moving_average,
            vec![None, None, Some(150.0), Some(176.67), Some(200.0)]
        );
        assert_eq!(result.latest_moving_average, Some(200.0));
    }

    #[test]
    fn test_decreasing_and_stable() {
        let down = dataset_from(&[(1, 200.0), (2, 150.0), (3, 100.0)]);
        assert_eq!(
            trend_analysis(&down, "value", "date", 2).unwrap().trend,
            TrendDirection::Decreasing
        );

        let flat = dataset_from(&[(1, 100.0), (2, 101.0), (3, 100.0)]);
        assert_eq!(
            trend_analysis(&flat, "value", "date", 2).unwrap().trend,
            TrendDirection::Stable
        );
    }

    #[test]
    fn test_zero_denominator_skipped() {
        let dataset = dataset_from(&[(1, 0.0), (2, 50.0), (3, 100.0)]);
        let result = trend_analysis(&dataset, "value", "date", 2).unwrap();
        assert_eq!(result.growth_rates.len(), 1);
        assert_eq!(result.growth_rates[0].date, "2024-01-03");
        assert_eq!(result.growth_rates[0].growth_rate, 100.0);
        assert_eq!(result.total_growth, None);
    }

    #[test]
    fn test_insufficient_data() {
        let dataset = dataset_from(&[(1, 10.0)]);
        assert_eq!(
            trend_analysis(&dataset, "value", "date", 2),
            Err(AnalysisError::InsufficientData {
                required: 2,
                found: 1
            })
        );

        let undated = Dataset::new(
            "test",
            vec![
                Record::new(None, 1.0, "A", "N"),
                Record::new(None, 2.0, "A", "N"),
            ],
        );
        assert!(matches!(
            trend_analysis(&undated, "value", "date", 2),
            Err(AnalysisError::InsufficientData { found: 0, .. })
        ));
    }

    #[test]
    fn test_zero_window_rejected() {
        let dataset = dataset_from(&[(1, 10.0), (2, 20.0)]);
        assert!(matches!(
            trend_analysis(&dataset, "value", "date", 0),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_stable_sort_on_equal_dates() {
        let points = vec![(day(1), 10.0), (day(1), 20.0), (day(2), 40.0)];
        let result = trend_from_points("value", "date", points, 1).unwrap();
        let rates: Vec<f64> = result.growth_rates.iter().map(|g| g.growth_rate).collect();
        assert_eq!(rates, vec![100.0, 100.0]);
    }

    #[test]
    fn test_inflection_points() {
        // growth: +10%, +10%, +10%, -50%, +10% -> the drop and the rebound stand out
        let dataset = dataset_from(&[
            (1, 100.0),
            (2, 110.0),
            (3, 121.0),
            (4, 133.1),
            (5, 66.55),
            (6, 73.205),
        ]);
        let result = trend_analysis(&dataset, "value", "date", 2).unwrap();
        assert_eq!(result.inflection_points, vec!["2024-01-05", "2024-01-06"]);
    }

    #[test]
    fn test_window_larger_than_series() {
        let dataset = dataset_from(&[(1, 10.0), (2, 20.0)]);
        let result = trend_analysis(&dataset, "value", "date", 7).unwrap();
        assert_eq!(result.latest_moving_average, None);
        assert_eq!(result.recent_performance.first_period_avg, 15.0);
        assert_eq!(result.recent_performance.performance_change, Some(0.0));
    }
}
