//! Shared server state
//!
//! The server wires the local collaborators: keyword planner, rule-based
//! assessor, built-in tool registry, lexical router and an auto-approving
//! monitor, since nobody is at a terminal to answer prompts.

use std::sync::Arc;

use pca_core::{EngineConfig, InMemoryHistory, SafetyMode, ToolRegistry};
use pca_engine::{AutoMonitor, Capabilities, Orchestrator};
use pca_out::SummaryRenderer;
use pca_policy::{RuleAssessor, TriggerPolicy};
use pca_tools::{KeywordPlanner, LexicalRouter, LocalToolRegistry};

use crate::error::ApiError;
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub registry: Arc<LocalToolRegistry>,
    pub router: Arc<LexicalRouter>,
    pub history: Arc<InMemoryHistory>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// Local collaborators around `config`
    pub fn new(config: EngineConfig) -> Result<Self, ApiError> {
        Self::with_registry(config, LocalToolRegistry::with_builtins())
    }

    pub fn with_registry(config: EngineConfig, registry: LocalToolRegistry) -> Result<Self, ApiError> {
        let renderer = Arc::new(SummaryRenderer::builtin()?);
        let registry = Arc::new(registry);
        let router = Arc::new(LexicalRouter::new(registry.list()));
        let history = Arc::new(InMemoryHistory::new(config.history_capacity));
        let monitor =
            AutoMonitor::new(renderer.clone()).with_triggers(TriggerPolicy::from_config(&config));

        let caps = Capabilities::new(
            Arc::new(KeywordPlanner::new()),
            Arc::new(RuleAssessor::new(registry.list())),
            registry.clone(),
            Arc::new(monitor),
        )
        .with_history(history.clone());

        tracing::info!(
            safety_mode = %config.safety_mode,
            tools = registry.len(),
            "orchestrator ready"
        );
        let orchestrator = Orchestrator::new(caps, config, renderer).with_router(router.clone());

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
            registry,
            router,
            history,
            metrics: Arc::new(Metrics::new()?),
        })
    }

    /// Server defaults: no interactive approver, so AUTONOMOUS unless the
    /// config file or environment says otherwise
    pub fn server_config(file: Option<EngineConfig>) -> EngineConfig {
        file.unwrap_or_else(|| EngineConfig::default().with_safety_mode(SafetyMode::Autonomous))
    }
}
