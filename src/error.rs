//! Error types for the analysis engines and the crew scheduler.
//!
//! Engine failures are returned as values. The dispatcher turns them into
//! a failed work unit; nothing here is allowed to abort a whole run.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the statistics engine, the dispatcher and the scheduler.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// The column holds text values, or no numeric values once nulls are dropped.
    #[error("column '{column}' has no numeric values")]
    NonNumericColumn {
        /// Column name
        column: String,
    },

    /// Not enough usable records for the requested computation.
    #[error("insufficient data: need at least {required} records, found {found}")]
    InsufficientData {
        /// Minimum number of records
        required: usize,
        /// Records actually available
        found: usize,
    },

    /// Fewer than two numeric columns were available for correlation.
    #[error("need at least 2 numeric columns, found {}", found.len())]
    InsufficientColumns {
        /// The numeric columns that were found
        found: Vec<String>,
    },

    /// A method identifier that no engine understands.
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    /// A role label with no registered handler.
    #[error("unknown role: {0}")]
    UnknownRole(String),

    /// A prerequisite unit did not complete. Surfaces as a skipped unit.
    #[error("dependency '{dependency}' of '{unit}' is {status}")]
    DependencyNotSatisfied {
        /// Unit that was about to run
        unit: String,
        /// The prerequisite that blocked it
        dependency: String,
        /// Status of the prerequisite (or "missing")
        status: String,
    },

    /// The dependency graph contains a cycle.
    #[error("cyclic dependency: {}", path.join(" -> "))]
    CyclicDependency {
        /// Unit ids along the cycle, first id repeated at the end
        path: Vec<String>,
    },

    /// A unit status change that the work-unit lifecycle forbids.
    #[error("invalid transition for '{unit}': {from} -> {to}")]
    InvalidTransition {
        /// Unit id
        unit: String,
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// A parameter outside its accepted domain.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// What was wrong with it
        message: String,
    },

    /// The external inference call did not answer in time.
    #[error("external inference timed out after {0:?}")]
    ExternalInferenceTimeout(Duration),

    /// The external inference call failed.
    #[error("external inference failed: {0}")]
    ExternalInferenceFailure(String),

    /// A handler panicked while running a unit.
    #[error("handler panicked: {0}")]
    HandlerPanic(String),
}

impl AnalysisError {
    /// Shorthand for [`AnalysisError::InvalidParameter`].
    pub fn invalid_parameter(name: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, AnalysisError>;
