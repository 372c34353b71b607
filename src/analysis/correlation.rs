//! Pairwise correlation between numeric columns.

use super::{is_zero_spread, mean, round_to};
use crate::error::{AnalysisError, Result};
use crate::models::Dataset;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Pairs at or above this absolute coefficient are reported.
pub const STRONG_CORRELATION_THRESHOLD: f64 = 0.7;

/// Pairs at or above this absolute coefficient are classified `strong`.
pub const VERY_STRONG_CORRELATION: f64 = 0.9;

/// Correlation coefficient flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    Kendall,
}

impl FromStr for CorrelationMethod {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pearson" => Ok(CorrelationMethod::Pearson),
            "spearman" => Ok(CorrelationMethod::Spearman),
            "kendall" => Ok(CorrelationMethod::Kendall),
            other => Err(AnalysisError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationMethod::Pearson => write!(f, "pearson"),
            CorrelationMethod::Spearman => write!(f, "spearman"),
            CorrelationMethod::Kendall => write!(f, "kendall"),
        }
    }
}

/// Classification of a retained pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationStrength {
    Moderate,
    Strong,
}

/// A column pair whose coefficient met the reporting threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationEntry {
    pub column_a: String,
    pub column_b: String,
    pub coefficient: f64,
    pub strength: CorrelationStrength,
}

/// Full coefficient matrix plus the retained strong pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub method: CorrelationMethod,
    pub columns: Vec<String>,
    /// Row-major coefficients, rounded to 3 decimals. `None` where a column
    /// has no spread or fewer than two paired observations.
    pub matrix: Vec<Vec<Option<f64>>>,
    pub strong_correlations: Vec<CorrelationEntry>,
}

impl CorrelationMatrix {
    /// Coefficient for a column pair, if both columns are in the matrix.
    pub fn coefficient(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.columns.iter().position(|c| c == a)?;
        let j = self.columns.iter().position(|c| c == b)?;
        self.matrix[i][j]
    }
}

/// Correlation matrix over the numeric columns among `columns`.
pub fn correlation_matrix(
    dataset: &Dataset,
    columns: &[String],
    method: &str,
) -> Result<CorrelationMatrix> {
    correlation_matrix_with_threshold(dataset, columns, method, STRONG_CORRELATION_THRESHOLD)
}

/// [`correlation_matrix`] with a custom threshold for retained pairs.
pub fn correlation_matrix_with_threshold(
    dataset: &Dataset,
    columns: &[String],
    method: &str,
    threshold: f64,
) -> Result<CorrelationMatrix> {
    let method: CorrelationMethod = method.parse()?;

    let mut names: Vec<String> = Vec::new();
    let mut series: Vec<Vec<Option<f64>>> = Vec::new();
    for column in columns {
        if names.contains(column) {
            continue;
        }
        if let Ok(values) = dataset.numeric_column(column) {
            names.push(column.clone());
            series.push(values);
        }
    }

    if names.len() < 2 {
        return Err(AnalysisError::InsufficientColumns { found: names });
    }

    let k = names.len();
    let mut matrix = vec![vec![None; k]; k];
    for i in 0..k {
        for j in i..k {
            let r = pairwise(&series[i], &series[j], method).map(|r| round_to(r, 3));
            matrix[i][j] = r;
            matrix[j][i] = r;
        }
    }

    let mut strong_correlations = Vec::new();
    for i in 0..k {
        for j in (i + 1)..k {
            let Some(r) = matrix[i][j] else { continue };
            if r.abs() >= threshold {
                strong_correlations.push(CorrelationEntry {
                    column_a: names[i].clone(),
                    column_b: names[j].clone(),
                    coefficient: r,
                    strength: if r.abs() >= VERY_STRONG_CORRELATION {
                        CorrelationStrength::Strong
                    } else {
                        CorrelationStrength::Moderate
                    },
                });
            }
        }
    }
    strong_correlations.sort_by(|a, b| b.coefficient.abs().total_cmp(&a.coefficient.abs()));

    Ok(CorrelationMatrix {
        method,
        columns: names,
        matrix,
        strong_correlations,
    })
}

/// Coefficient over rows where both columns have a value.
fn pairwise(a: &[Option<f64>], b: &[Option<f64>], method: CorrelationMethod) -> Option<f64> {
    let (xs, ys): (Vec<f64>, Vec<f64>) = a
        .iter()
        .zip(b)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .unzip();

    if xs.len() < 2 {
        return None;
    }

    let r = match method {
        CorrelationMethod::Pearson => pearson(&xs, &ys)?,
        CorrelationMethod::Spearman => pearson(&ranks(&xs), &ranks(&ys))?,
        CorrelationMethod::Kendall => kendall_tau_b(&xs, &ys)?,
    };
    Some(r.clamp(-1.0, 1.0))
}

fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mx) * (y - my);
        sxx += (x - mx).powi(2);
        syy += (y - my).powi(2);
    }
    let n = xs.len() as f64;
    if is_zero_spread((sxx / n).sqrt(), mx) || is_zero_spread((syy / n).sqrt(), my) {
        return None;
    }
    Some(sxy / (sxx * syy).sqrt())
}

/// Average ranks (1-based), ties share the mean of their positions.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && values[order[end + 1]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }
    ranks
}

/// Kendall's tau-b, which corrects for ties in either column.
fn kendall_tau_b(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    let (mut s, mut untied_x, mut untied_y) = (0.0, 0.0, 0.0);
    for i in 0..n {
        for j in (i + 1)..n {
            let dx = sign(xs[i] - xs[j]);
            let dy = sign(ys[i] - ys[j]);
            s += dx * dy;
            untied_x += dx.abs();
            untied_y += dy.abs();
        }
    }
    if untied_x == 0.0 || untied_y == 0.0 {
        return None;
    }
    Some(s / (untied_x * untied_y).sqrt())
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}
