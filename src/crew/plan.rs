//! The work-unit graph for each run depth.

use super::context::keys;
use super::dispatcher::Role;
use super::unit::WorkUnit;
use crate::models::Depth;

pub const DATA_EXPLORATION: &str = "task_data_exploration";
pub const STATISTICAL_ANALYSIS: &str = "task_statistical_analysis";
pub const AI_INSIGHT: &str = "task_ai_insight";
pub const OUTLIER_REVIEW: &str = "task_outlier_review";
pub const REPORT_GENERATION: &str = "task_report_generation";

/// Units registered for `depth`, in registration order.
///
/// Reporting always comes last and depends on every other unit.
pub fn build_units(depth: Depth) -> Vec<WorkUnit> {
    let mut units = vec![
        WorkUnit::new(
            DATA_EXPLORATION,
            "Profile the dataset: size, coverage, data quality and group breakdowns",
            Role::DataExploration.label(),
        ),
        WorkUnit::new(
            STATISTICAL_ANALYSIS,
            "Descriptive statistics, trend, correlation and z-score anomalies",
            Role::StatisticalAnalysis.label(),
        )
        .depends_on([DATA_EXPLORATION]),
    ];

    if depth != Depth::Quick {
        units.push(
            WorkUnit::new(
                AI_INSIGHT,
                "Insights, anomaly screen, trend prediction and recommendations",
                Role::AiInsight.label(),
            )
            .depends_on([DATA_EXPLORATION, STATISTICAL_ANALYSIS]),
        );
    }

    if depth == Depth::Deep {
        units.push(
            WorkUnit::new(
                OUTLIER_REVIEW,
                "IQR outlier review of the value column",
                Role::StatisticalAnalysis.label(),
            )
            .depends_on([STATISTICAL_ANALYSIS])
            .with_param("anomaly_method", "iqr")
            .with_param("anomaly_key", keys::IQR_ANOMALIES)
            .with_param("anomalies_only", true),
        );
    }

    let upstream: Vec<String> = units.iter().map(|u| u.id.clone()).collect();
    units.push(
        WorkUnit::new(
            REPORT_GENERATION,
            "Executive summary and key findings",
            Role::Reporting.label(),
        )
        .depends_on(upstream),
    );

    units
}
