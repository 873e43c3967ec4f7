//! Data Model: Plan, Step, StepResult, RiskAssessment, ToolDescriptor
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::error::GenerationError;
use crate::history::MemoryContext;

/// Tool arguments, keyed by parameter name
pub type Arguments = Map<String, Value>;

// ============================================================================
// PLAN
// ============================================================================

/// An ordered sequence of steps proposed by the Planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Planner's explanation of its approach
    #[serde(default)]
    pub reasoning: String,
    /// Self-assessed confidence (0.0 to 1.0)
    #[serde(default)]
    pub confidence: f64,
    /// Steps in declared execution order
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Plan {
    pub fn new(reasoning: impl Into<String>, confidence: f64, steps: Vec<Step>) -> Self {
        Self {
            reasoning: reasoning.into(),
            confidence,
            steps,
        }
    }

    /// Check the structural contract: step ids unique and strictly increasing,
    /// tool names present, confidence finite.
    pub fn validate(&self) -> Result<(), GenerationError> {
        if !self.confidence.is_finite() {
            return Err(GenerationError::new("plan confidence is not a number"));
        }

        let mut previous: Option<u32> = None;
        for step in &self.steps {
            if step.tool_name.trim().is_empty() {
                return Err(GenerationError::new(format!(
                    "step {} has no tool_name",
                    step.step_id
                )));
            }
            if let Some(prev) = previous {
                if step.step_id <= prev {
                    return Err(GenerationError::new(format!(
                        "step ids must be unique and increasing (step {} follows step {})",
                        step.step_id, prev
                    )));
                }
            }
            previous = Some(step.step_id);
        }
        Ok(())
    }

    /// Look up a step by id
    pub fn step(&self, step_id: u32) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Names of every tool this plan uses, in step order
    pub fn tool_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.tool_name.as_str()).collect()
    }

    /// Content fingerprint used to tell regenerated plans apart
    pub fn fingerprint(&self) -> String {
        let data = serde_json::to_vec(self).unwrap_or_default();
        format!("blake3:{}", blake3::hash(&data))
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A single tool invocation within a plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Sequential id, unique within the plan
    pub step_id: u32,
    /// Registered tool to invoke
    pub tool_name: String,
    /// Arguments; string values may hold `{{stepN.field}}` references
    #[serde(default)]
    pub arguments: Arguments,
    /// What to do when this step cannot complete
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

impl Step {
    pub fn new(step_id: u32, tool_name: impl Into<String>) -> Self {
        Self {
            step_id,
            tool_name: tool_name.into(),
            arguments: Arguments::new(),
            on_failure: FailurePolicy::Abort,
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }
}

/// Per-step failure policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// End the whole plan, remaining steps are skipped
    #[default]
    Abort,
    /// Record the step as skipped and move on
    Skip,
    /// Retry transient failures; behaves like `Skip` once retries are spent
    Retry,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailurePolicy::Abort => write!(f, "abort"),
            FailurePolicy::Skip => write!(f, "skip"),
            FailurePolicy::Retry => write!(f, "retry"),
        }
    }
}

// ============================================================================
// STEP RESULTS
// ============================================================================

/// Terminal outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Success,
    Failed,
    Error,
    Timeout,
    Skipped,
}

impl StepStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, StepStatus::Success)
    }

    /// Outcomes that count as drift
    pub fn is_drift(&self) -> bool {
        matches!(self, StepStatus::Failed | StepStatus::Error | StepStatus::Timeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failed",
            StepStatus::Error => "error",
            StepStatus::Timeout => "timeout",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded outcome of one step, appended in execution order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: u32,
    pub tool: String,
    pub status: StepStatus,
    /// Tool output on success (serialized as `result` on the wire)
    #[serde(rename = "result", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Invocation attempts made, retries included
    #[serde(default)]
    pub attempts: u32,
}

impl StepResult {
    pub fn success(step: &Step, output: Value, attempts: u32) -> Self {
        Self {
            step_id: step.step_id,
            tool: step.tool_name.clone(),
            status: StepStatus::Success,
            output: Some(output),
            error: None,
            attempts,
        }
    }

    pub fn failure(step: &Step, status: StepStatus, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            step_id: step.step_id,
            tool: step.tool_name.clone(),
            status,
            output: None,
            error: Some(error.into()),
            attempts,
        }
    }

    pub fn skipped(step: &Step, reason: impl Into<String>, attempts: u32) -> Self {
        Self::failure(step, StepStatus::Skipped, reason, attempts)
    }
}

// ============================================================================
// RISK
// ============================================================================

/// Coarse risk classification of a plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// MEDIUM and HIGH plans need an explicit user confirmation before execution
    pub fn requires_confirmation(&self) -> bool {
        matches!(self, RiskLevel::Medium | RiskLevel::High)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Risk Assessor's go/no-go recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    Approve,
    ApproveWithModifications,
    Reject,
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Recommendation::Approve => write!(f, "APPROVE"),
            Recommendation::ApproveWithModifications => write!(f, "APPROVE_WITH_MODIFICATIONS"),
            Recommendation::Reject => write!(f, "REJECT"),
        }
    }
}

/// Result of assessing one candidate plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub concerns: Vec<String>,
    /// Constraints the Planner must honour when regenerating
    #[serde(default)]
    pub constraints: Vec<String>,
    pub recommendation: Recommendation,
}

impl RiskAssessment {
    pub fn approve(risk_level: RiskLevel) -> Self {
        Self {
            risk_level,
            concerns: Vec::new(),
            constraints: Vec::new(),
            recommendation: Recommendation::Approve,
        }
    }

    pub fn with_concern(mut self, concern: impl Into<String>) -> Self {
        self.concerns.push(concern.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: Recommendation) -> Self {
        self.recommendation = recommendation;
        self
    }

    pub fn is_approved(&self) -> bool {
        self.recommendation == Recommendation::Approve
    }
}

// ============================================================================
// TOOLS
// ============================================================================

/// Risk level declared by a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolRisk {
    /// Read-only, no side effects
    #[default]
    Safe,
    /// Reversible changes
    Medium,
    /// Destructive or system-altering
    High,
}

impl fmt::Display for ToolRisk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ToolRisk::Safe => write!(f, "safe"),
            ToolRisk::Medium => write!(f, "medium"),
            ToolRisk::High => write!(f, "high"),
        }
    }
}

/// One declared tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    /// JSON type name ("string", "integer", "boolean", "array", ...)
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Metadata for a registered tool, owned by the Tool Registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "risk")]
    pub risk_level: ToolRisk,
    /// Tool performs an action the user should confirm in semi-autonomous mode
    #[serde(default)]
    pub confirms_action: bool,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Extra words the router and keyword planner match against
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, risk_level: ToolRisk) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            risk_level,
            confirms_action: false,
            params: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn confirms_action(mut self) -> Self {
        self.confirms_action = true;
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    pub fn aliases(mut self, aliases: &[&str]) -> Self {
        self.aliases = aliases.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn required_params(&self) -> impl Iterator<Item = &ParamSpec> {
        self.params.iter().filter(|p| p.required)
    }
}

/// Raw status reported by a tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Failed,
    Error,
}

/// What a tool invocation returned
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolOutput {
    pub fn success(output: Value) -> Self {
        Self {
            status: ToolStatus::Success,
            output: Some(output),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            output: None,
            error: Some(error.into()),
        }
    }
}

// ============================================================================
// COLLABORATOR MESSAGES
// ============================================================================

/// Input to the Plan Generation Gateway
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanRequest {
    pub goal: String,
    /// Constraints from the last risk assessment (empty on first generation)
    #[serde(default)]
    pub constraints: Vec<String>,
    /// The plan being replaced, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_plan: Option<Plan>,
    /// Context gathered in DIAGNOSE
    #[serde(default)]
    pub diagnostics: Value,
    /// Tools the plan may use
    #[serde(default)]
    pub available_tools: Vec<ToolDescriptor>,
    /// Recent outcomes and safety rules recalled in DIAGNOSE
    #[serde(default)]
    pub memory: MemoryContext,
}

/// Monitoring collaborator's acknowledgement of a user goal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentAck {
    pub confirmed: bool,
    pub reply: String,
    #[serde(default)]
    pub explanation: String,
}

impl IntentAck {
    pub fn confirmed(reply: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            confirmed: true,
            reply: reply.into(),
            explanation: explanation.into(),
        }
    }

    pub fn declined(reply: impl Into<String>) -> Self {
        Self {
            confirmed: false,
            reply: reply.into(),
            explanation: String::new(),
        }
    }
}

/// Decision returned after a drift event pauses execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriftDecision {
    /// Continue with the next step; the drifted step is recorded per its policy
    Resume,
    /// Continue with the next step; the drifted step is recorded as skipped
    Skip,
    /// End the plan
    Abort,
}

/// Router shortcut candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteMatch {
    pub tool: String,
    pub score: f64,
}
