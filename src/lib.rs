//! InsightCrew - dependency-ordered analysis of tabular business data.
//!
//! A run loads a [`Dataset`](models::Dataset), builds the work units for the
//! requested [`Depth`](models::Depth), executes them in dependency order with
//! the [`Scheduler`](crew::Scheduler) and compiles the accumulated context into
//! a report with [`report::compile`].

pub mod agent;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod crew;
pub mod error;
pub mod loader;
pub mod models;
pub mod report;

pub use error::{AnalysisError, Result};
