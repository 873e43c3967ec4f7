//! Unified Error Model
use thiserror::Error;

use crate::state::State;

/// Planner unavailable or returned invalid output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("plan generation failed: {0}")]
pub struct GenerationError(pub String);

impl GenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Risk Assessor unavailable or returned invalid output
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("risk assessment failed: {0}")]
pub struct AssessmentError(pub String);

impl AssessmentError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Tool Registry failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("tool '{0}' not found in registry")]
    NotFound(String),

    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments { tool: String, message: String },

    #[error("tool '{tool}' failed: {message}")]
    Execution { tool: String, message: String },
}

impl ToolError {
    /// Whether retrying the same invocation could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ToolError::Execution { .. })
    }
}

/// History Recorder failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("history append failed: {0}")]
pub struct HistoryError(pub String);

/// Configuration load failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Everything that can end or interrupt a request
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestrationError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Assessment(#[from] AssessmentError),

    #[error("step {step_id} references unresolved output '{reference}'")]
    UnresolvedReference { step_id: u32, reference: String },

    #[error(transparent)]
    ToolInvocation(#[from] ToolError),

    #[error("permission denied for step {step_id} ({tool})")]
    PermissionDenied { step_id: u32, tool: String },

    #[error("{0}")]
    LoopExhausted(String),

    #[error("plan declined by user")]
    PlanDeclined,

    #[error("cancelled by user")]
    Cancelled,

    #[error("invalid transition {from} -> {to}")]
    InvalidTransition { from: State, to: State },

    #[error("context {0} is terminal and can no longer change")]
    Immutable(String),

    #[error("{0}")]
    Halted(String),

    #[error(transparent)]
    History(#[from] HistoryError),
}

impl OrchestrationError {
    /// Short category code for logs and metrics
    pub fn code(&self) -> &'static str {
        match self {
            Self::Generation(_) => "GEN",
            Self::Assessment(_) => "RISK",
            Self::UnresolvedReference { .. } => "REF",
            Self::ToolInvocation(_) => "TOOL",
            Self::PermissionDenied { .. } => "PERM",
            Self::LoopExhausted(_) => "LOOP",
            Self::PlanDeclined => "DECLINED",
            Self::Cancelled => "CANCEL",
            Self::InvalidTransition { .. } => "FSM",
            Self::Immutable(_) => "FSM",
            Self::Halted(_) => "HALT",
            Self::History(_) => "HIST",
        }
    }
}
