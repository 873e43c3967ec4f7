//! PCA Core: Execution Context, Data Model and Capability Contracts
//!
//! Everything the orchestrator, executor and boundary crates share: the
//! per-request context, the plan/step/result vocabulary, the state table,
//! the capability traits external collaborators implement, and the error
//! taxonomy.

pub mod capability;
pub mod config;
pub mod context;
pub mod data_model;
pub mod error;
pub mod event;
pub mod history;
pub mod state;

pub use capability::{HistoryRecorder, Monitor, Planner, RiskAssessor, Router, ToolRegistry};
pub use config::{AssessmentFallback, EngineConfig, SafetyMode};
pub use context::{
    ExecutionContext, OutcomeCounts, RetryCounters, StateEntry, MAX_DRIFT_RETRIES,
    MAX_PLAN_ATTEMPTS,
};
pub use data_model::{
    Arguments, DriftDecision, FailurePolicy, IntentAck, ParamSpec, Plan, PlanRequest,
    Recommendation, RiskAssessment, RiskLevel, RouteMatch, Step, StepResult, StepStatus,
    ToolDescriptor, ToolOutput, ToolRisk, ToolStatus,
};
pub use error::{
    AssessmentError, ConfigError, GenerationError, HistoryError, OrchestrationError, ToolError,
};
pub use event::{Event, EventLog};
pub use history::{ExecutionMemo, HistorySnapshot, InMemoryHistory, MemoryContext};
pub use state::{State, TRANSITIONS};

/// Engine version
pub const PCA_VERSION: &str = "1.0.0";
