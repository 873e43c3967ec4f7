//! Execution Context: the single-owner record of one in-flight request
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::data_model::{IntentAck, Plan, RiskAssessment, StepResult, StepStatus};
use crate::error::OrchestrationError;
use crate::state::State;

/// Hard cap on risk-negotiation attempts
pub const MAX_PLAN_ATTEMPTS: u32 = 3;

/// Hard cap on per-step drift retries
pub const MAX_DRIFT_RETRIES: u32 = 3;

/// Per-step retry counters; each entry only grows and never passes its cap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RetryCounters(BTreeMap<u32, u32>);

impl RetryCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump the counter for a step, saturating at `cap`. Returns the new value.
    pub fn increment(&mut self, step_id: u32, cap: u32) -> u32 {
        let cap = cap.min(MAX_DRIFT_RETRIES);
        let entry = self.0.entry(step_id).or_insert(0);
        if *entry < cap {
            *entry += 1;
        }
        *entry
    }

    pub fn get(&self, step_id: u32) -> u32 {
        self.0.get(&step_id).copied().unwrap_or(0)
    }

    /// Fold another set of counters in, keeping the larger value per step
    pub fn merge(&mut self, other: &RetryCounters) {
        for (step_id, count) in &other.0 {
            let entry = self.0.entry(*step_id).or_insert(0);
            *entry = (*entry).max(*count).min(MAX_DRIFT_RETRIES);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Timestamp of one state entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateEntry {
    pub state: State,
    pub entered_at: DateTime<Utc>,
}

/// Counts of step outcomes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn from_results(results: &[StepResult]) -> Self {
        let mut counts = Self {
            total: results.len(),
            ..Self::default()
        };
        for result in results {
            match result.status {
                StepStatus::Success => counts.succeeded += 1,
                StepStatus::Skipped => counts.skipped += 1,
                StepStatus::Failed | StepStatus::Error | StepStatus::Timeout => counts.failed += 1,
            }
        }
        counts
    }
}

/// One user request as it moves through the state machine.
///
/// Only the Orchestrator holds a mutable reference. Every mutator refuses to
/// run once the context has reached a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    id: Uuid,
    goal: String,
    state: State,
    plan: Option<Plan>,
    confidence: f64,
    risk_assessment: Option<RiskAssessment>,
    plan_attempt_count: u32,
    drift_retry_counts: RetryCounters,
    step_results: Vec<StepResult>,
    summary: Option<String>,
    diagnostics: Value,
    cm_response: Option<IntentAck>,
    abort_reason: Option<String>,
    halt_reason: Option<String>,
    forced_confirmation: bool,
    created_at: DateTime<Utc>,
    transitions: Vec<StateEntry>,
}

impl ExecutionContext {
    pub fn new(goal: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            goal: goal.into(),
            state: State::Idle,
            plan: None,
            confidence: 0.0,
            risk_assessment: None,
            plan_attempt_count: 0,
            drift_retry_counts: RetryCounters::new(),
            step_results: Vec::new(),
            summary: None,
            diagnostics: Value::Null,
            cm_response: None,
            abort_reason: None,
            halt_reason: None,
            forced_confirmation: false,
            created_at: now,
            transitions: vec![StateEntry {
                state: State::Idle,
                entered_at: now,
            }],
        }
    }

    // ------------------------------------------------------------------
    // Read view
    // ------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn goal(&self) -> &str {
        &self.goal
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn risk_assessment(&self) -> Option<&RiskAssessment> {
        self.risk_assessment.as_ref()
    }

    pub fn plan_attempt_count(&self) -> u32 {
        self.plan_attempt_count
    }

    pub fn drift_retry_counts(&self) -> &RetryCounters {
        &self.drift_retry_counts
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.step_results
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    pub fn diagnostics(&self) -> &Value {
        &self.diagnostics
    }

    pub fn cm_response(&self) -> Option<&IntentAck> {
        self.cm_response.as_ref()
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    /// Why execution stopped early, if it did
    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    /// Whether the risk assessor failed and every step must be confirmed
    pub fn forced_confirmation(&self) -> bool {
        self.forced_confirmation
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn transitions(&self) -> &[StateEntry] {
        &self.transitions
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn outcome_counts(&self) -> OutcomeCounts {
        OutcomeCounts::from_results(&self.step_results)
    }

    // ------------------------------------------------------------------
    // Mutators (Orchestrator only)
    // ------------------------------------------------------------------

    fn ensure_mutable(&self) -> Result<(), OrchestrationError> {
        if self.state.is_terminal() {
            return Err(OrchestrationError::Immutable(self.id.to_string()));
        }
        Ok(())
    }

    /// Move along one edge of the transition table. Returns the state left.
    pub fn transition(&mut self, next: State) -> Result<State, OrchestrationError> {
        self.ensure_mutable()?;
        let from = self.state;
        if !from.can_transition_to(next) {
            return Err(OrchestrationError::InvalidTransition { from, to: next });
        }
        self.state = next;
        self.transitions.push(StateEntry {
            state: next,
            entered_at: Utc::now(),
        });
        Ok(from)
    }

    /// Replace the candidate plan; confidence follows the plan's own score
    pub fn set_plan(&mut self, plan: Plan) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.confidence = plan.confidence.clamp(0.0, 1.0);
        self.plan = Some(plan);
        Ok(())
    }

    pub fn set_confidence(&mut self, confidence: f64) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.confidence = confidence.clamp(0.0, 1.0);
        Ok(())
    }

    pub fn set_risk_assessment(
        &mut self,
        assessment: RiskAssessment,
    ) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.risk_assessment = Some(assessment);
        Ok(())
    }

    /// Start the next risk-negotiation attempt. Fails once `max` (never more
    /// than [`MAX_PLAN_ATTEMPTS`]) attempts have been made.
    pub fn begin_plan_attempt(&mut self, max: u32) -> Result<u32, OrchestrationError> {
        self.ensure_mutable()?;
        let cap = max.clamp(1, MAX_PLAN_ATTEMPTS);
        if self.plan_attempt_count >= cap {
            return Err(OrchestrationError::LoopExhausted(format!(
                "risk unresolved after {} attempts",
                self.plan_attempt_count
            )));
        }
        self.plan_attempt_count += 1;
        Ok(self.plan_attempt_count)
    }

    /// Append step outcomes from an executor run and fold in its retry counters
    pub fn record_execution(
        &mut self,
        results: Vec<StepResult>,
        retries: &RetryCounters,
    ) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.step_results.extend(results);
        self.drift_retry_counts.merge(retries);
        Ok(())
    }

    pub fn set_diagnostics(&mut self, diagnostics: Value) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.diagnostics = diagnostics;
        Ok(())
    }

    pub fn set_cm_response(&mut self, ack: IntentAck) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.cm_response = Some(ack);
        Ok(())
    }

    pub fn set_summary(&mut self, summary: impl Into<String>) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.summary = Some(summary.into());
        Ok(())
    }

    pub fn set_abort_reason(&mut self, reason: impl Into<String>) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.abort_reason = Some(reason.into());
        Ok(())
    }

    pub fn set_halt_reason(&mut self, reason: impl Into<String>) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.halt_reason = Some(reason.into());
        Ok(())
    }

    pub fn force_confirmation(&mut self) -> Result<(), OrchestrationError> {
        self.ensure_mutable()?;
        self.forced_confirmation = true;
        Ok(())
    }
}
