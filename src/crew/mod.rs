//! The analysis crew: work units, their roles and the scheduler that runs them.

pub mod context;
pub mod dispatcher;
pub mod plan;
pub mod roles;
pub mod scheduler;
pub mod unit;

pub use context::{keys, RunInputs, SharedContext};
pub use dispatcher::{Dispatcher, HandlerInput, Role, RoleHandler};
pub use plan::build_units;
pub use roles::InferenceBinding;
pub use scheduler::{execution_order, ExecutionReport, LogEntry, RunStatus, Scheduler};
pub use unit::{Payload, UnitStatus, WorkUnit};
