//! Work units and their lifecycle.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Structured result of a unit: key to JSON value.
pub type Payload = BTreeMap<String, Value>;

/// Lifecycle state of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl UnitStatus {
    /// Whether the unit has reached a final state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitStatus::Completed | UnitStatus::Failed | UnitStatus::Skipped
        )
    }

    /// The only legal moves: `pending -> running | skipped` and
    /// `running -> completed | failed`.
    pub fn can_transition_to(self, next: UnitStatus) -> bool {
        matches!(
            (self, next),
            (UnitStatus::Pending, UnitStatus::Running)
                | (UnitStatus::Pending, UnitStatus::Skipped)
                | (UnitStatus::Running, UnitStatus::Completed)
                | (UnitStatus::Running, UnitStatus::Failed)
        )
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Pending => write!(f, "pending"),
            UnitStatus::Running => write!(f, "running"),
            UnitStatus::Completed => write!(f, "completed"),
            UnitStatus::Failed => write!(f, "failed"),
            UnitStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A unit of work executed by one role.
///
/// Units are built when the plan is assembled and only the scheduler moves
/// them through their lifecycle. They are kept after the run for auditing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub id: String,
    pub description: String,
    /// Role label, resolved by the dispatcher at run time.
    pub role: String,
    /// Prerequisite unit ids, in declaration order.
    pub dependencies: Vec<String>,
    /// Per-unit handler parameters.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Payload,
    status: UnitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Payload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkUnit {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            role: role.into(),
            dependencies: Vec::new(),
            params: Payload::new(),
            status: UnitStatus::Pending,
            result: None,
            error: None,
        }
    }

    /// Adds prerequisites.
    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Sets a handler parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn status(&self) -> UnitStatus {
        self.status
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.params.get(key).and_then(Value::as_f64)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(Value::as_bool)
    }

    /// Moves the unit to `next`, rejecting moves the lifecycle forbids.
    pub(crate) fn transition(&mut self, next: UnitStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(AnalysisError::InvalidTransition {
                unit: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}
