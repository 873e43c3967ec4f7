//! Suspend/resume handshake with the Monitoring collaborator
//!
//! [`ChannelMonitor`] turns each suspension point into a [`Suspension`]
//! message carrying a oneshot reply slot. The run stays parked until the
//! other side answers; dropping the message without answering counts as
//! a refusal (deny / abort). [`AutoMonitor`] answers everything itself and
//! is what headless deployments wire in.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use pca_core::{
    Arguments, DriftDecision, IntentAck, Monitor, Plan, RiskAssessment, Step, StepStatus,
    ToolDescriptor,
};
use pca_out::SummaryRenderer;
use pca_policy::TriggerPolicy;

/// One parked question for the human side
#[derive(Debug)]
pub enum Suspension {
    Intent {
        goal: String,
        reply: oneshot::Sender<IntentAck>,
    },
    PlanConfirmation {
        plan: Plan,
        assessment: RiskAssessment,
        prompt: String,
        reply: oneshot::Sender<bool>,
    },
    Permission {
        step: Step,
        tool: ToolDescriptor,
        prompt: String,
        reply: oneshot::Sender<bool>,
    },
    /// Execution is paused after a step exhausted its retries
    Drift {
        step: Step,
        status: StepStatus,
        attempts: u32,
        reply: oneshot::Sender<DriftDecision>,
    },
    /// Only sent when retry prompts are enabled
    Retry {
        step: Step,
        attempt: u32,
        reply: oneshot::Sender<Option<Arguments>>,
    },
}

impl Suspension {
    pub fn kind(&self) -> &'static str {
        match self {
            Suspension::Intent { .. } => "intent",
            Suspension::PlanConfirmation { .. } => "plan_confirmation",
            Suspension::Permission { .. } => "permission",
            Suspension::Drift { .. } => "drift",
            Suspension::Retry { .. } => "retry",
        }
    }
}

/// Monitor backed by an mpsc channel of [`Suspension`]s
#[derive(Debug, Clone)]
pub struct ChannelMonitor {
    outbound: mpsc::Sender<Suspension>,
    renderer: Option<Arc<SummaryRenderer>>,
    retry_prompts: bool,
}

impl ChannelMonitor {
    /// The monitor plus the receiving end the UI reads from
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Suspension>) {
        let (outbound, inbound) = mpsc::channel(capacity.max(1));
        (
            Self {
                outbound,
                renderer: None,
                retry_prompts: false,
            },
            inbound,
        )
    }

    /// Render prompt text for confirmations
    pub fn with_renderer(mut self, renderer: Arc<SummaryRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Also ask before every retry whether to vary the arguments
    pub fn with_retry_prompts(mut self) -> Self {
        self.retry_prompts = true;
        self
    }

    async fn ask<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Suspension) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        let suspension = make(tx);
        let kind = suspension.kind();
        tracing::debug!(kind, "suspending for monitor");
        if self.outbound.send(suspension).await.is_err() {
            tracing::warn!(kind, "monitor channel closed");
            return None;
        }
        match rx.await {
            Ok(answer) => Some(answer),
            Err(_) => {
                tracing::warn!(kind, "suspension dropped without an answer");
                None
            }
        }
    }
}

#[async_trait]
impl Monitor for ChannelMonitor {
    async fn confirm_intent(&self, goal: &str) -> IntentAck {
        self.ask(|reply| Suspension::Intent {
            goal: goal.to_string(),
            reply,
        })
        .await
        .unwrap_or_else(|| IntentAck::declined("No one is available to confirm this request."))
    }

    async fn confirm_plan(&self, plan: &Plan, assessment: &RiskAssessment) -> bool {
        let prompt = match &self.renderer {
            Some(r) => r.plan_review(plan, assessment),
            None => format!("Plan risk is {}. Proceed?", assessment.risk_level),
        };
        self.ask(|reply| Suspension::PlanConfirmation {
            plan: plan.clone(),
            assessment: assessment.clone(),
            prompt,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    async fn request_permission(&self, step: &Step, tool: &ToolDescriptor) -> bool {
        let prompt = match &self.renderer {
            Some(r) => r.permission_prompt(step, tool),
            None => format!("Allow {}?", tool.name),
        };
        self.ask(|reply| Suspension::Permission {
            step: step.clone(),
            tool: tool.clone(),
            prompt,
            reply,
        })
        .await
        .unwrap_or(false)
    }

    async fn notify_drift(&self, step: &Step, status: StepStatus, attempts: u32) -> DriftDecision {
        self.ask(|reply| Suspension::Drift {
            step: step.clone(),
            status,
            attempts,
            reply,
        })
        .await
        .unwrap_or(DriftDecision::Abort)
    }

    async fn vary_invocation(&self, step: &Step, attempt: u32) -> Option<Arguments> {
        if !self.retry_prompts {
            return None;
        }
        self.ask(|reply| Suspension::Retry {
            step: step.clone(),
            attempt,
            reply,
        })
        .await
        .flatten()
    }
}

/// Monitor that approves every suspension on its own
#[derive(Debug, Clone)]
pub struct AutoMonitor {
    renderer: Arc<SummaryRenderer>,
    triggers: Option<TriggerPolicy>,
    on_drift: DriftDecision,
}

impl AutoMonitor {
    pub fn new(renderer: Arc<SummaryRenderer>) -> Self {
        Self {
            renderer,
            triggers: None,
            on_drift: DriftDecision::Skip,
        }
    }

    /// Mention the risk review in acknowledgements of risky goals
    pub fn with_triggers(mut self, triggers: TriggerPolicy) -> Self {
        self.triggers = Some(triggers);
        self
    }

    pub fn on_drift(mut self, decision: DriftDecision) -> Self {
        self.on_drift = decision;
        self
    }
}

#[async_trait]
impl Monitor for AutoMonitor {
    async fn confirm_intent(&self, goal: &str) -> IntentAck {
        let risky = self
            .triggers
            .as_ref()
            .map(|t| !t.keyword_hits(goal).is_empty())
            .unwrap_or(false);
        self.renderer.acknowledgement(goal, risky)
    }

    async fn confirm_plan(&self, _plan: &Plan, assessment: &RiskAssessment) -> bool {
        tracing::info!(risk = %assessment.risk_level, "auto-confirming plan");
        true
    }

    async fn request_permission(&self, step: &Step, tool: &ToolDescriptor) -> bool {
        tracing::info!(step_id = step.step_id, tool = %tool.name, "auto-granting permission");
        true
    }

    async fn notify_drift(&self, step: &Step, status: StepStatus, attempts: u32) -> DriftDecision {
        tracing::warn!(
            step_id = step.step_id,
            status = status.as_str(),
            attempts,
            decision = ?self.on_drift,
            "drift handled automatically"
        );
        self.on_drift
    }
}
