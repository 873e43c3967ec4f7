//! Capability interfaces the Orchestrator is wired against
//!
//! Each external collaborator sits behind one trait so the state machine can
//! be driven by scripted test doubles or by real implementations alike.
use async_trait::async_trait;

use crate::history::HistorySnapshot;
use crate::data_model::{
    Arguments, DriftDecision, IntentAck, Plan, PlanRequest, RiskAssessment, RouteMatch, Step,
    StepResult, StepStatus, ToolDescriptor, ToolOutput,
};
use crate::error::{AssessmentError, GenerationError, HistoryError, ToolError};

/// Plan generation and result summarization
#[async_trait]
pub trait Planner: Send + Sync {
    /// Produce a candidate plan for the request
    async fn generate(&self, request: &PlanRequest) -> Result<Plan, GenerationError>;

    /// Produce a user-facing summary of what happened
    async fn summarize(
        &self,
        goal: &str,
        plan: &Plan,
        results: &[StepResult],
    ) -> Result<String, GenerationError>;
}

/// Independent safety review of a candidate plan
#[async_trait]
pub trait RiskAssessor: Send + Sync {
    async fn assess(&self, plan: &Plan, goal: &str) -> Result<RiskAssessment, AssessmentError>;
}

/// Registered tools and their invocation
#[async_trait]
pub trait ToolRegistry: Send + Sync {
    fn describe(&self, name: &str) -> Option<ToolDescriptor>;

    fn list(&self) -> Vec<ToolDescriptor>;

    async fn invoke(&self, name: &str, arguments: &Arguments) -> Result<ToolOutput, ToolError>;
}

/// The human (or a policy standing in for one) who approves and steers
/// execution at its suspension points
#[async_trait]
pub trait Monitor: Send + Sync {
    /// Acknowledge the goal before any planning starts
    async fn confirm_intent(&self, goal: &str) -> IntentAck;

    /// Approve a MEDIUM/HIGH plan before it runs
    async fn confirm_plan(&self, plan: &Plan, assessment: &RiskAssessment) -> bool;

    /// Approve a single step the permission gate flagged
    async fn request_permission(&self, step: &Step, tool: &ToolDescriptor) -> bool;

    /// Decide how to continue after a step exhausted its retries
    async fn notify_drift(&self, step: &Step, status: StepStatus, attempts: u32) -> DriftDecision;

    /// Optionally vary the arguments for the next retry; `None` keeps them
    async fn vary_invocation(&self, _step: &Step, _attempt: u32) -> Option<Arguments> {
        None
    }
}

/// Append-only archive of finished requests
#[async_trait]
pub trait HistoryRecorder: Send + Sync {
    async fn append(&self, snapshot: HistorySnapshot) -> Result<(), HistoryError>;

    async fn read_all(&self) -> Vec<HistorySnapshot>;
}

/// Fast path that maps simple queries straight to one tool
pub trait Router: Send + Sync {
    fn route(&self, query: &str) -> Option<RouteMatch>;
}
