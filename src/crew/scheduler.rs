//! Dependency scheduler.
//!
//! Orders work units so that every prerequisite runs first, then executes
//! them one at a time. A failing or skipped unit never stops the run: its
//! dependents are skipped and everything else carries on.

use super::context::SharedContext;
use super::dispatcher::Dispatcher;
use super::unit::{UnitStatus, WorkUnit};
use crate::error::{AnalysisError, Result};
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, info, warn};

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every unit completed.
    Completed,
    /// At least one unit failed or was skipped.
    Partial,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Partial => write!(f, "partial"),
        }
    }
}

/// One state transition of one unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    pub unit: String,
    pub status: UnitStatus,
    pub message: String,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.unit, self.status)?;
        if !self.message.is_empty() {
            write!(f, ": {}", self.message)?;
        }
        Ok(())
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub status: RunStatus,
    pub context: SharedContext,
    /// Units in registration order, in their final state.
    pub units: Vec<WorkUnit>,
    /// Unit ids in the order they were processed.
    pub execution_order: Vec<String>,
    pub log: Vec<LogEntry>,
}

impl ExecutionReport {
    pub fn unit(&self, id: &str) -> Option<&WorkUnit> {
        self.units.iter().find(|u| u.id == id)
    }

    /// Number of units in `status`.
    pub fn count(&self, status: UnitStatus) -> usize {
        self.units.iter().filter(|u| u.status() == status).count()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Topological order of `units` as indices.
///
/// Post-order depth-first search over units in registration order, visiting
/// prerequisites first. Prerequisites that name no registered unit are left
/// for the executor to report.
pub fn topological_order(units: &[WorkUnit]) -> Result<Vec<usize>> {
    let index = index_units(units)?;
    let mut marks = vec![Mark::Unvisited; units.len()];
    let mut stack = Vec::new();
    let mut order = Vec::with_capacity(units.len());

    for start in 0..units.len() {
        visit(start, units, &index, &mut marks, &mut stack, &mut order)?;
    }

    Ok(order)
}

/// [`topological_order`] as unit ids.
pub fn execution_order(units: &[WorkUnit]) -> Result<Vec<String>> {
    Ok(topological_order(units)?
        .into_iter()
        .map(|i| units[i].id.clone())
        .collect())
}

fn index_units(units: &[WorkUnit]) -> Result<HashMap<&str, usize>> {
    let mut index = HashMap::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        if index.insert(unit.id.as_str(), i).is_some() {
            return Err(AnalysisError::invalid_parameter(
                "units",
                format!("duplicate unit id '{}'", unit.id),
            ));
        }
    }
    Ok(index)
}

fn visit(
    current: usize,
    units: &[WorkUnit],
    index: &HashMap<&str, usize>,
    marks: &mut [Mark],
    stack: &mut Vec<usize>,
    order: &mut Vec<usize>,
) -> Result<()> {
    match marks[current] {
        Mark::Done => return Ok(()),
        Mark::InProgress => {
            let start = stack.iter().position(|&i| i == current).unwrap_or(0);
            let mut path: Vec<String> = stack[start..]
                .iter()
                .map(|&i| units[i].id.clone())
                .collect();
            path.push(units[current].id.clone());
            return Err(AnalysisError::CyclicDependency { path });
        }
        Mark::Unvisited => {}
    }

    marks[current] = Mark::InProgress;
    stack.push(current);

    for dependency in &units[current].dependencies {
        if let Some(&next) = index.get(dependency.as_str()) {
            visit(next, units, index, marks, stack, order)?;
        }
    }

    stack.pop();
    marks[current] = Mark::Done;
    order.push(current);
    Ok(())
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs work units in dependency order through a [`Dispatcher`].
pub struct Scheduler {
    dispatcher: Dispatcher,
    show_progress: bool,
}

impl Scheduler {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            dispatcher,
            show_progress: false,
        }
    }

    /// Show a progress bar while executing.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    fn progress_bar(&self, len: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Executes `units` sequentially, starting from `initial`.
    ///
    /// Fails only before anything runs: on duplicate ids, a dependency cycle
    /// or units that are not pending. Unit failures end up in the report.
    pub async fn execute(
        &self,
        mut units: Vec<WorkUnit>,
        initial: SharedContext,
    ) -> Result<ExecutionReport> {
        let order = topological_order(&units)?;
        if let Some(unit) = units.iter().find(|u| u.status() != UnitStatus::Pending) {
            return Err(AnalysisError::InvalidTransition {
                unit: unit.id.clone(),
                from: unit.status().to_string(),
                to: UnitStatus::Running.to_string(),
            });
        }

        let index: HashMap<String, usize> = units
            .iter()
            .enumerate()
            .map(|(i, u)| (u.id.clone(), i))
            .collect();

        info!(
            "Executing {} units: {}",
            order.len(),
            order
                .iter()
                .map(|&i| units[i].id.as_str())
                .collect::<Vec<_>>()
                .join(" -> ")
        );

        let mut context = initial;
        let mut log = Vec::new();
        let pb = self.progress_bar(order.len());

        for &current in &order {
            let unit_id = units[current].id.clone();
            pb.set_message(unit_id.clone());

            let blocker = units[current].dependencies.iter().find_map(|dep| match index.get(dep) {
                Some(&d) if units[d].status() == UnitStatus::Completed => None,
                Some(&d) => Some((dep.clone(), units[d].status().to_string())),
                None => Some((dep.clone(), "missing".to_string())),
            });

            if let Some((dependency, status)) = blocker {
                let reason = AnalysisError::DependencyNotSatisfied {
                    unit: unit_id.clone(),
                    dependency,
                    status,
                };
                warn!("Skipping {}: {}", unit_id, reason);
                let unit = &mut units[current];
                unit.transition(UnitStatus::Skipped)?;
                unit.error = Some(reason.to_string());
                log.push(LogEntry {
                    unit: unit_id,
                    status: UnitStatus::Skipped,
                    message: reason.to_string(),
                });
                pb.inc(1);
                continue;
            }

            units[current].transition(UnitStatus::Running)?;
            info!("{} -> running ({})", unit_id, units[current].role);
            log.push(LogEntry {
                unit: unit_id.clone(),
                status: UnitStatus::Running,
                message: units[current].description.clone(),
            });

            let outcome = AssertUnwindSafe(self.dispatcher.dispatch(&units[current], &context))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(AnalysisError::HandlerPanic(panic_message(panic))));

            let unit = &mut units[current];
            match outcome {
                Ok(payload) => {
                    let overwritten = context.merge(&unit_id, &payload);
                    if !overwritten.is_empty() {
                        debug!("{} overwrote context keys: {:?}", unit_id, overwritten);
                    }
                    let keys: Vec<&str> = payload.keys().map(String::as_str).collect();
                    let message = format!("wrote {}", keys.join(", "));
                    unit.result = Some(payload);
                    unit.transition(UnitStatus::Completed)?;
                    info!("{} -> completed", unit_id);
                    log.push(LogEntry {
                        unit: unit_id,
                        status: UnitStatus::Completed,
                        message,
                    });
                }
                Err(e) => {
                    warn!("{} -> failed: {}", unit_id, e);
                    unit.error = Some(e.to_string());
                    unit.transition(UnitStatus::Failed)?;
                    log.push(LogEntry {
                        unit: unit_id,
                        status: UnitStatus::Failed,
                        message: e.to_string(),
                    });
                }
            }
            pb.inc(1);
        }

        let status = if units.iter().all(|u| u.status() == UnitStatus::Completed) {
            RunStatus::Completed
        } else {
            RunStatus::Partial
        };
        pb.finish_with_message(format!("run {}", status));
        info!("Run {}", status);

        Ok(ExecutionReport {
            status,
            context,
            execution_order: order.iter().map(|&i| units[i].id.clone()).collect(),
            units,
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crew::dispatcher::{HandlerInput, Role, RoleHandler};
    use crate::crew::unit::Payload;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Writes `<unit id> = true` and the given fixed entries.
    struct WritingHandler {
        entries: Vec<(&'static str, serde_json::Value)>,
    }

    #[async_trait]
    impl RoleHandler for WritingHandler {
        async fn handle(&self, input: HandlerInput<'_>) -> crate::error::Result<Payload> {
            let mut payload = Payload::new();
            payload.insert(input.unit.id.clone(), json!(true));
            for (k, v) in &self.entries {
                payload.insert(k.to_string(), v.clone());
            }
            Ok(payload)
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl RoleHandler for FailingHandler {
        async fn handle(&self, _input: HandlerInput<'_>) -> crate::error::Result<Payload> {
            Err(AnalysisError::InsufficientData {
                required: 2,
                found: 0,
            })
        }
    }

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl RoleHandler for CountingHandler {
        async fn handle(&self, _input: HandlerInput<'_>) -> crate::error::Result<Payload> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(Payload::new())
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl RoleHandler for PanickingHandler {
        async fn handle(&self, _input: HandlerInput<'_>) -> crate::error::Result<Payload> {
            panic!("handler exploded");
        }
    }

    fn writer(entries: Vec<(&'static str, serde_json::Value)>) -> Arc<WritingHandler> {
        Arc::new(WritingHandler { entries })
    }

    fn unit(id: &str, role: Role, deps: &[&str]) -> WorkUnit {
        WorkUnit::new(id, format!("unit {}", id), role.label()).depends_on(deps.iter().copied())
    }

    #[test]
    fn test_dependencies_precede_dependents() {
        let units = vec![
            unit("report", Role::Reporting, &["insight", "stats"]),
            unit("insight", Role::AiInsight, &["explore", "stats"]),
            unit("stats", Role::StatisticalAnalysis, &["explore"]),
            unit("explore", Role::DataExploration, &[]),
            unit("loner", Role::Reporting, &[]),
        ];

        let order = execution_order(&units).unwrap();
        assert_eq!(order, vec!["explore", "stats", "insight", "report", "loner"]);

        for u in &units {
            let pos = order.iter().position(|id| *id == u.id).unwrap();
            for dep in &u.dependencies {
                let dep_pos = order.iter().position(|id| id == dep).unwrap();
                assert!(dep_pos < pos, "{} must run before {}", dep, u.id);
            }
        }
    }

    #[test]
    fn test_cycle_detection() {
        let units = vec![
            unit("a", Role::Reporting, &["c"]),
            unit("b", Role::Reporting, &["a"]),
            unit("c", Role::Reporting, &["b"]),
        ];
        assert_eq!(
            topological_order(&units),
            Err(AnalysisError::CyclicDependency {
                path: vec!["a".into(), "c".into(), "b".into(), "a".into()]
            })
        );

        let self_loop = vec![unit("a", Role::Reporting, &["a"])];
        assert!(matches!(
            topological_order(&self_loop),
            Err(AnalysisError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let units = vec![
            unit("a", Role::Reporting, &[]),
            unit("a", Role::Reporting, &[]),
        ];
        assert!(matches!(
            topological_order(&units),
            Err(AnalysisError::InvalidParameter { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new()
            .with_handler(Role::DataExploration, writer(vec![]))
            .with_handler(Role::StatisticalAnalysis, Arc::new(FailingHandler))
            .with_handler(Role::AiInsight, Arc::new(CountingHandler(calls.clone())))
            .with_handler(Role::Reporting, Arc::new(CountingHandler(calls.clone())));

        let units = vec![
            unit("A", Role::DataExploration, &[]),
            unit("B", Role::StatisticalAnalysis, &[]),
            unit("C", Role::AiInsight, &["A", "B"]),
            unit("D", Role::Reporting, &["C"]),
        ];

        let report = Scheduler::new(dispatcher)
            .execute(units, SharedContext::new())
            .await
            .unwrap();

        assert_eq!(report.status, RunStatus::Partial);
        assert_eq!(report.unit("A").unwrap().status(), UnitStatus::Completed);
        assert_eq!(report.unit("B").unwrap().status(), UnitStatus::Failed);
        assert_eq!(report.unit("C").unwrap().status(), UnitStatus::Skipped);
        assert_eq!(report.unit("D").unwrap().status(), UnitStatus::Skipped);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let c = report.unit("C").unwrap();
        assert!(c.error.as_deref().unwrap().contains("'B'"));
        assert!(c.result.is_none());
        assert_eq!(report.context.get("A"), Some(&json!(true)));

        let transitions: Vec<String> = report.log.iter().map(|e| e.to_string()).collect();
        assert_eq!(transitions.len(), 6);
        assert_eq!(transitions[0], "A -> running: unit A");
        assert!(transitions[3].starts_with("B -> failed: insufficient data"));
        assert!(transitions[4].starts_with("C -> skipped"));
    }

    #[tokio::test]
    async fn test_all_completed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new()
            .with_handler(Role::Reporting, Arc::new(CountingHandler(calls.clone())));
        let units = vec![
            unit("r1", Role::Reporting, &[]),
            unit("r2", Role::Reporting, &["r1"]),
        ];

        let report = Scheduler::new(dispatcher)
            .execute(units, SharedContext::new())
            .await
            .unwrap();
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.count(UnitStatus::Completed), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_last_writer_wins_in_execution_order() {
        let dispatcher = Dispatcher::new()
            .with_handler(
                Role::DataExploration,
                writer(vec![("shared", json!("explorer")), ("goal", json!("narrowed"))]),
            )
            .with_handler(Role::StatisticalAnalysis, writer(vec![("shared", json!("analyst"))]));

        // registered in reverse; execution order puts the explorer first
        let units = vec![
            unit("analyst", Role::StatisticalAnalysis, &["explorer"]),
            unit("explorer", Role::DataExploration, &[]),
        ];
        let mut initial = SharedContext::new();
        initial.insert("goal", "original");

        let report = Scheduler::new(dispatcher)
            .execute(units, initial)
            .await
            .unwrap();

        assert_eq!(report.context.get("shared"), Some(&json!("analyst")));
        assert_eq!(report.context.writer("shared"), Some("analyst"));
        assert_eq!(report.context.get_str("goal"), Some("narrowed"));
    }

    #[tokio::test]
    async fn test_unknown_role_and_missing_dependency() {
        let dispatcher = Dispatcher::new().with_handler(Role::Reporting, writer(vec![]));
        let units = vec![
            WorkUnit::new("mystery", "", "forecaster"),
            unit("orphan", Role::Reporting, &["ghost"]),
            unit("fine", Role::Reporting, &[]),
        ];

        let report = Scheduler::new(dispatcher)
            .execute(units, SharedContext::new())
            .await
            .unwrap();

        let mystery = report.unit("mystery").unwrap();
        assert_eq!(mystery.status(), UnitStatus::Failed);
        assert_eq!(mystery.error.as_deref(), Some("unknown role: forecaster"));

        let orphan = report.unit("orphan").unwrap();
        assert_eq!(orphan.status(), UnitStatus::Skipped);
        assert!(orphan.error.as_deref().unwrap().ends_with("is missing"));

        assert_eq!(report.unit("fine").unwrap().status(), UnitStatus::Completed);
        assert_eq!(report.status, RunStatus::Partial);
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_unit() {
        let dispatcher = Dispatcher::new()
            .with_handler(Role::AiInsight, Arc::new(PanickingHandler))
            .with_handler(Role::Reporting, writer(vec![]));
        let units = vec![
            unit("boom", Role::AiInsight, &[]),
            unit("after", Role::Reporting, &[]),
        ];

        let report = Scheduler::new(dispatcher)
            .execute(units, SharedContext::new())
            .await
            .unwrap();

        assert_eq!(report.unit("boom").unwrap().status(), UnitStatus::Failed);
        assert_eq!(
            report.unit("boom").unwrap().error.as_deref(),
            Some("handler panicked: handler exploded")
        );
        assert_eq!(report.unit("after").unwrap().status(), UnitStatus::Completed);
    }

    #[tokio::test]
    async fn test_cycle_aborts_before_running() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = Dispatcher::new()
            .with_handler(Role::Reporting, Arc::new(CountingHandler(calls.clone())));
        let units = vec![
            unit("a", Role::Reporting, &["b"]),
            unit("b", Role::Reporting, &["a"]),
        ];

        let result = Scheduler::new(dispatcher)
            .execute(units, SharedContext::new())
            .await;
        assert!(matches!(result, Err(AnalysisError::CyclicDependency { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
