//! Role dispatch.
//!
//! Every work unit names a role. The dispatcher resolves the label to a
//! [`Role`] and hands the unit to the handler registered for it.

use super::context::SharedContext;
use super::roles::{
    AiInsightHandler, ExplorationHandler, InferenceBinding, ReportingHandler,
    StatisticalAnalysisHandler,
};
use super::unit::{Payload, WorkUnit};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::models::Dataset;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// The roles a work unit can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    DataExploration,
    StatisticalAnalysis,
    AiInsight,
    Reporting,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::DataExploration,
        Role::StatisticalAnalysis,
        Role::AiInsight,
        Role::Reporting,
    ];

    /// Canonical label used in work units.
    pub fn label(self) -> &'static str {
        match self {
            Role::DataExploration => "dataExploration",
            Role::StatisticalAnalysis => "statisticalAnalysis",
            Role::AiInsight => "aiInsight",
            Role::Reporting => "reporting",
        }
    }

    /// Title used in the report and on the console.
    pub fn title(self) -> &'static str {
        match self {
            Role::DataExploration => "Data Explorer",
            Role::StatisticalAnalysis => "Statistical Analyst",
            Role::AiInsight => "Insight Analyst",
            Role::Reporting => "Report Writer",
        }
    }
}

impl FromStr for Role {
    type Err = AnalysisError;

    /// Accepts the canonical labels and the older agent names.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dataExploration" | "data_explorer" => Ok(Role::DataExploration),
            "statisticalAnalysis" | "analyst" => Ok(Role::StatisticalAnalysis),
            "aiInsight" | "pandaai" => Ok(Role::AiInsight),
            "reporting" | "reporter" => Ok(Role::Reporting),
            other => Err(AnalysisError::UnknownRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What a handler sees when it runs a unit.
#[derive(Clone, Copy)]
pub struct HandlerInput<'a> {
    pub unit: &'a WorkUnit,
    pub context: &'a SharedContext,
}

/// Executes units of one role and returns their payload.
#[async_trait]
pub trait RoleHandler: Send + Sync {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload>;
}

/// Registry from role to handler.
#[derive(Default, Clone)]
pub struct Dispatcher {
    handlers: HashMap<Role, Arc<dyn RoleHandler>>,
}

impl Dispatcher {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in handler for every role.
    pub fn with_default_handlers(
        dataset: Arc<Dataset>,
        settings: AnalysisConfig,
        inference: Option<InferenceBinding>,
    ) -> Self {
        let mut dispatcher = Self::new();

        for role in Role::ALL {
            let handler: Arc<dyn RoleHandler> = match role {
                Role::DataExploration => Arc::new(ExplorationHandler::new(dataset.clone())),
                Role::StatisticalAnalysis => Arc::new(StatisticalAnalysisHandler::new(
                    dataset.clone(),
                    settings.clone(),
                )),
                Role::AiInsight => Arc::new(AiInsightHandler::new(
                    dataset.clone(),
                    settings.clone(),
                    inference.clone(),
                )),
                Role::Reporting => Arc::new(ReportingHandler::new()),
            };
            dispatcher.register(role, handler);
        }

        dispatcher
    }

    /// Registers a handler, returning the one it replaced.
    pub fn register(
        &mut self,
        role: Role,
        handler: Arc<dyn RoleHandler>,
    ) -> Option<Arc<dyn RoleHandler>> {
        self.handlers.insert(role, handler)
    }

    /// Builder form of [`Dispatcher::register`].
    pub fn with_handler(mut self, role: Role, handler: Arc<dyn RoleHandler>) -> Self {
        self.register(role, handler);
        self
    }

    pub fn has_handler(&self, role: Role) -> bool {
        self.handlers.contains_key(&role)
    }

    /// Runs `unit` with the handler for its role.
    pub async fn dispatch(&self, unit: &WorkUnit, context: &SharedContext) -> Result<Payload> {
        let role: Role = unit.role.parse()?;
        let handler = self
            .handlers
            .get(&role)
            .ok_or_else(|| AnalysisError::UnknownRole(unit.role.clone()))?;

        debug!("Dispatching {} to {}", unit.id, role);
        handler.handle(HandlerInput { unit, context }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl RoleHandler for EchoHandler {
        async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload> {
            let mut payload = Payload::new();
            payload.insert("echo".into(), json!(input.unit.id));
            Ok(payload)
        }
    }

    #[test]
    fn test_role_labels_round_trip() {
        for role in Role::ALL {
            assert_eq!(role.label().parse::<Role>().unwrap(), role);
        }
        assert_eq!("pandaai".parse::<Role>().unwrap(), Role::AiInsight);
        assert_eq!(
            "forecaster".parse::<Role>(),
            Err(AnalysisError::UnknownRole("forecaster".into()))
        );
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_role() {
        let dispatcher = Dispatcher::new().with_handler(Role::Reporting, Arc::new(EchoHandler));
        let unit = WorkUnit::new("task_report_generation", "", "reporting");

        let payload = dispatcher
            .dispatch(&unit, &SharedContext::new())
            .await
            .unwrap();
        assert_eq!(payload["echo"], json!("task_report_generation"));
    }

    #[tokio::test]
    async fn test_unknown_or_unregistered_role() {
        let dispatcher = Dispatcher::new().with_handler(Role::Reporting, Arc::new(EchoHandler));
        let context = SharedContext::new();

        let unknown = WorkUnit::new("x", "", "forecaster");
        assert_eq!(
            dispatcher.dispatch(&unknown, &context).await,
            Err(AnalysisError::UnknownRole("forecaster".into()))
        );

        let unregistered = WorkUnit::new("y", "", "aiInsight");
        assert!(matches!(
            dispatcher.dispatch(&unregistered, &context).await,
            Err(AnalysisError::UnknownRole(_))
        ));
    }

    #[test]
    fn test_dispatch_accepts_alias_labels() {
        let dispatcher = Dispatcher::new().with_handler(Role::Reporting, Arc::new(EchoHandler));
        let unit = WorkUnit::new("legacy", "", "reporter");

        let context = SharedContext::new();
        let payload = tokio_test::block_on(dispatcher.dispatch(&unit, &context)).unwrap();
        assert_eq!(payload["echo"], json!("legacy"));
    }

    #[test]
    fn test_default_handlers_cover_every_role() {
        let dispatcher = Dispatcher::with_default_handlers(
            Arc::new(Dataset::default()),
            AnalysisConfig::default(),
            None,
        );
        assert!(Role::ALL.iter().all(|r| dispatcher.has_handler(*r)));
    }
}
