//! Orchestrator: the request state machine
//!
//! Drives one [`ExecutionContext`] from IDLE to a terminal state, calling a
//! handler per state and moving only along edges of
//! [`pca_core::TRANSITIONS`]. Any handler error aborts the request with a
//! plain-language explanation. Terminal contexts are archived.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pca_core::{
    Arguments, EngineConfig, Event, EventLog, ExecutionContext, HistoryRecorder, HistorySnapshot,
    InMemoryHistory, MemoryContext, Monitor, OrchestrationError, Plan, PlanRequest, Planner,
    RiskAssessor, RiskLevel, RouteMatch, Router, State, Step, StepResult, ToolRegistry, ToolRisk,
    ToolStatus,
};
use pca_out::SummaryRenderer;
use pca_policy::{PermissionGate, TriggerPolicy};
use serde_json::{Map, Value};

use crate::cancel::CancelToken;
use crate::executor::{Executor, Halt};
use crate::gateway::PlanGateway;
use crate::risk_loop::{Attempt, LoopOutcome, RiskValidationLoop};

/// The collaborators one orchestrator is wired against
#[derive(Clone)]
pub struct Capabilities {
    pub planner: Arc<dyn Planner>,
    pub assessor: Arc<dyn RiskAssessor>,
    pub registry: Arc<dyn ToolRegistry>,
    pub monitor: Arc<dyn Monitor>,
    pub history: Arc<dyn HistoryRecorder>,
}

impl Capabilities {
    /// Wire the four required collaborators with an in-memory history
    pub fn new(
        planner: Arc<dyn Planner>,
        assessor: Arc<dyn RiskAssessor>,
        registry: Arc<dyn ToolRegistry>,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            planner,
            assessor,
            registry,
            monitor,
            history: Arc::new(InMemoryHistory::default()),
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryRecorder>) -> Self {
        self.history = history;
        self
    }
}

/// Final context of a request plus everything it emitted
#[derive(Debug, Clone)]
pub struct RunReport {
    pub context: ExecutionContext,
    pub events: EventLog,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn state(&self) -> State {
        self.context.state()
    }

    pub fn summary(&self) -> Option<&str> {
        self.context.summary()
    }

    pub fn results(&self) -> &[StepResult] {
        self.context.step_results()
    }
}

/// Per-request scratch the handlers share
struct Run {
    ctx: ExecutionContext,
    events: EventLog,
    cancel: CancelToken,
    routed: Option<RouteMatch>,
    memory: MemoryContext,
    halt: Option<Halt>,
}

pub struct Orchestrator {
    caps: Capabilities,
    router: Option<Arc<dyn Router>>,
    config: EngineConfig,
    renderer: Arc<SummaryRenderer>,
    gateway: PlanGateway,
    risk_loop: RiskValidationLoop,
    triggers: TriggerPolicy,
    gate: PermissionGate,
}

impl Orchestrator {
    pub fn new(caps: Capabilities, config: EngineConfig, renderer: Arc<SummaryRenderer>) -> Self {
        let config = config.normalized();
        let gateway = PlanGateway::new(caps.planner.clone());
        let risk_loop = RiskValidationLoop::new(
            caps.assessor.clone(),
            gateway.clone(),
            config.assessment_fallback,
        );
        let triggers = TriggerPolicy::from_config(&config);
        let gate = PermissionGate::new(config.safety_mode).with_denied(config.denied_tools.clone());
        Self {
            caps,
            router: None,
            config,
            renderer,
            gateway,
            risk_loop,
            triggers,
            gate,
        }
    }

    /// Enable the router shortcut
    pub fn with_router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn renderer(&self) -> &Arc<SummaryRenderer> {
        &self.renderer
    }

    pub async fn process(&self, goal: &str) -> RunReport {
        self.process_with_cancel(goal, CancelToken::never()).await
    }

    /// Run one request to completion. Never fails: every error ends in an
    /// ABORTED context whose summary explains why.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn process_with_cancel(&self, goal: &str, cancel: CancelToken) -> RunReport {
        let started = Instant::now();
        let mut run = Run {
            ctx: ExecutionContext::new(goal),
            events: EventLog::new(),
            cancel,
            routed: None,
            memory: MemoryContext::default(),
            halt: None,
        };
        tracing::info!(context_id = %run.ctx.id(), "request received");

        if let Err(err) = self.advance(&mut run, State::Negotiate) {
            self.abort(&mut run, err);
        }

        loop {
            let state = run.ctx.state();
            if state.is_terminal() || state == State::Idle {
                break;
            }
            let next = match self.handle(state, &mut run).await {
                Ok(next) => self.advance(&mut run, next),
                Err(err) => Err(err),
            };
            if let Err(err) = next {
                self.abort(&mut run, err);
            }
        }

        if run.ctx.is_terminal() {
            if let Err(err) = self.archive(&run.ctx).await {
                tracing::warn!(context_id = %run.ctx.id(), code = err.code(), error = %err, "archive failed");
            }
        }

        let elapsed = started.elapsed();
        tracing::info!(
            context_id = %run.ctx.id(),
            state = %run.ctx.state(),
            elapsed_ms = elapsed.as_millis() as u64,
            "request finished"
        );
        RunReport {
            context: run.ctx,
            events: run.events,
            elapsed,
        }
    }

    async fn handle(&self, state: State, run: &mut Run) -> Result<State, OrchestrationError> {
        if run.cancel.is_cancelled() && state != State::Reporting && state != State::Learn {
            return Err(OrchestrationError::Cancelled);
        }
        match state {
            State::Negotiate => self.negotiate(run).await,
            State::Diagnose => self.diagnose(run).await,
            State::Plan => self.plan(run).await,
            State::Score => self.score(run),
            State::Validate => self.validate(run).await,
            State::Execute => self.execute(run).await,
            State::ErrorRecovery => self.recover(run),
            State::Reporting => self.report(run).await,
            State::Learn => self.learn(run),
            other => Err(OrchestrationError::Halted(format!(
                "no handler for state {}",
                other
            ))),
        }
    }

    fn advance(&self, run: &mut Run, next: State) -> Result<(), OrchestrationError> {
        let from = run.ctx.transition(next)?;
        tracing::info!(context_id = %run.ctx.id(), %from, to = %next, "transition");
        run.events.push(Event::State { from, to: next });
        Ok(())
    }

    fn abort(&self, run: &mut Run, err: OrchestrationError) {
        if run.ctx.is_terminal() {
            tracing::error!(context_id = %run.ctx.id(), error = %err, "error after terminal state");
            return;
        }
        tracing::error!(
            context_id = %run.ctx.id(),
            state = %run.ctx.state(),
            code = err.code(),
            error = %err,
            "aborting request"
        );
        if let Err(err) = self.record_abort(run, err.to_string()) {
            tracing::error!(context_id = %run.ctx.id(), error = %err, "could not abort context");
        }
    }

    fn record_abort(&self, run: &mut Run, reason: String) -> Result<(), OrchestrationError> {
        let summary = self.renderer.abort_explanation(&reason);
        run.ctx.set_abort_reason(reason)?;
        run.ctx.set_summary(summary)?;
        self.advance(run, State::Aborted)
    }

    async fn archive(&self, ctx: &ExecutionContext) -> Result<(), OrchestrationError> {
        self.caps.history.append(HistorySnapshot::from(ctx)).await?;
        tracing::debug!(context_id = %ctx.id(), "archived");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Handlers
    // -------------------------------------------------------------------------

    async fn negotiate(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let goal = run.ctx.goal().to_string();
        let ack = run.cancel.guard(self.caps.monitor.confirm_intent(&goal)).await?;
        run.events.push(Event::CmResponse {
            reply: ack.reply.clone(),
            explanation: ack.explanation.clone(),
        });
        let confirmed = ack.confirmed;
        run.ctx.set_cm_response(ack)?;
        if !confirmed {
            tracing::info!(context_id = %run.ctx.id(), "intent declined");
            return Ok(State::Idle);
        }

        if let Some(router) = &self.router {
            let best = router.route(&goal);
            let score = best.as_ref().map(|m| m.score).unwrap_or(0.0);
            let hit = score >= self.config.router_threshold;
            run.events.push(Event::Router {
                query: goal.clone(),
                tool: best.as_ref().map(|m| m.tool.clone()),
                score,
                hit,
            });
            if hit {
                run.routed = best;
            }
        }
        Ok(State::Diagnose)
    }

    async fn diagnose(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let mut diagnostics = Map::new();
        let timeout = self.config.tool_timeout();
        let no_args = Arguments::new();
        for name in &self.config.diagnostic_tools {
            let Some(tool) = self.caps.registry.describe(name) else {
                tracing::debug!(tool = %name, "diagnostic tool not registered");
                continue;
            };
            if tool.risk_level != ToolRisk::Safe {
                tracing::warn!(tool = %name, "diagnostic tool is not safe, skipped");
                continue;
            }
            let call = tokio::time::timeout(timeout, self.caps.registry.invoke(name, &no_args));
            match run.cancel.guard(call).await? {
                Ok(Ok(output)) if output.status == ToolStatus::Success => {
                    diagnostics.insert(name.clone(), output.output.unwrap_or(Value::Null));
                }
                Ok(Ok(output)) => {
                    tracing::warn!(tool = %name, error = ?output.error, "diagnostic failed")
                }
                Ok(Err(err)) => tracing::warn!(tool = %name, error = %err, "diagnostic failed"),
                Err(_) => tracing::warn!(tool = %name, "diagnostic timed out"),
            }
        }
        run.ctx.set_diagnostics(Value::Object(diagnostics))?;

        let archive = match self.config.memory_depth {
            0 => Vec::new(),
            _ => self.caps.history.read_all().await,
        };
        run.memory =
            MemoryContext::recall(&archive, self.config.memory_depth, &self.config.safety_rules);
        tracing::debug!(
            recalled = run.memory.recent_executions.len(),
            patterns = run.memory.known_patterns.len(),
            "memory recalled"
        );
        Ok(State::Plan)
    }

    fn plan_request(&self, run: &Run) -> PlanRequest {
        PlanRequest {
            goal: run.ctx.goal().to_string(),
            constraints: Vec::new(),
            prior_plan: None,
            diagnostics: run.ctx.diagnostics().clone(),
            available_tools: self.caps.registry.list(),
            memory: run.memory.clone(),
        }
    }

    async fn plan(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let plan = match run.routed.take() {
            Some(route) => {
                tracing::info!(tool = %route.tool, score = route.score, "router shortcut");
                Plan::new(
                    format!("Router match ({:.2}) for {}", route.score, route.tool),
                    route.score,
                    vec![Step::new(1, route.tool)],
                )
            }
            None => {
                let request = self.plan_request(run);
                run.cancel.guard(self.gateway.generate(&request)).await??
            }
        };
        run.ctx.set_plan(plan.clone())?;
        run.events.push(Event::Plan { plan });
        Ok(State::Score)
    }

    fn score(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let plan = run
            .ctx
            .plan()
            .cloned()
            .ok_or_else(|| OrchestrationError::Halted("no plan to score".into()))?;
        let registry = &self.caps.registry;

        let unknown = plan
            .steps
            .iter()
            .filter(|s| registry.describe(&s.tool_name).is_none())
            .count();
        let score = plan.confidence - self.config.unknown_tool_penalty * unknown as f64;
        run.ctx.set_confidence(score)?;
        let score = run.ctx.confidence();
        run.events.push(Event::Confidence { score });

        let triggers = self.triggers.evaluate(run.ctx.goal(), score, &plan, |name| {
            registry.describe(name).map(|d| d.risk_level)
        });
        if triggers.is_empty() {
            tracing::info!(confidence = score, "no validation needed");
            Ok(State::Execute)
        } else {
            tracing::info!(confidence = score, ?triggers, "validation triggered");
            Ok(State::Validate)
        }
    }

    async fn validate(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let template = self.plan_request(run);
        loop {
            let number = run.ctx.begin_plan_attempt(self.config.max_plan_attempts)?;
            let plan = run
                .ctx
                .plan()
                .cloned()
                .ok_or_else(|| OrchestrationError::Halted("no plan to validate".into()))?;
            let goal = run.ctx.goal().to_string();
            let attempt = Attempt {
                goal: &goal,
                plan: &plan,
                number,
                max: self.config.max_plan_attempts,
            };
            let iteration = run
                .cancel
                .guard(self.risk_loop.iterate(attempt, &template))
                .await??;

            run.events
                .push(Event::RiskAssessment(iteration.assessment.clone()));
            run.ctx.set_risk_assessment(iteration.assessment.clone())?;
            if iteration.fallback {
                run.ctx.force_confirmation()?;
            }

            match iteration.outcome {
                LoopOutcome::Approved {
                    requires_confirmation,
                } => {
                    if requires_confirmation || run.ctx.forced_confirmation() {
                        let confirmed = run
                            .cancel
                            .guard(self.caps.monitor.confirm_plan(&plan, &iteration.assessment))
                            .await?;
                        if !confirmed {
                            return Err(OrchestrationError::PlanDeclined);
                        }
                    }
                    return Ok(State::Execute);
                }
                LoopOutcome::Regenerated(next) => {
                    tracing::info!(attempt = number, steps = next.steps.len(), "plan regenerated");
                    run.ctx.set_plan(next.clone())?;
                    run.events.push(Event::Plan { plan: next });
                    run.events.push(Event::Confidence {
                        score: run.ctx.confidence(),
                    });
                }
                LoopOutcome::Exhausted(reason) => {
                    return Err(OrchestrationError::LoopExhausted(reason));
                }
            }
        }
    }

    async fn execute(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let plan = run
            .ctx
            .plan()
            .cloned()
            .ok_or_else(|| OrchestrationError::Halted("no plan to execute".into()))?;
        let gate = if run.ctx.forced_confirmation() {
            self.gate.escalated()
        } else {
            self.gate.clone()
        };
        let executor = Executor::new(self.caps.registry.clone(), self.caps.monitor.clone(), gate)
            .with_timeout(self.config.tool_timeout())
            .with_max_retries(self.config.max_drift_retries);

        let report = executor.run(&plan, &run.cancel).await;
        for result in &report.results {
            run.events.push(Event::StepResult(result.clone()));
        }
        run.ctx.record_execution(report.results, &report.retries)?;

        match report.halt {
            None => Ok(State::Reporting),
            Some(Halt::Cancelled) => Err(OrchestrationError::Cancelled),
            Some(halt) => {
                run.ctx.set_halt_reason(halt.to_string())?;
                run.halt = Some(halt);
                Ok(State::ErrorRecovery)
            }
        }
    }

    fn recover(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        match &run.halt {
            Some(halt @ Halt::DriftAbort { .. }) => {
                Err(OrchestrationError::LoopExhausted(halt.to_string()))
            }
            _ => Ok(State::Reporting),
        }
    }

    async fn report(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let goal = run.ctx.goal().to_string();
        let summary = match run.ctx.plan() {
            Some(plan) => self
                .gateway
                .summarize(&goal, plan, run.ctx.step_results())
                .await
                .map_err(|err| tracing::warn!(error = %err, "planner summary unavailable")),
            None => Err(()),
        };
        let summary = summary.unwrap_or_else(|_| {
            self.renderer
                .execution_summary(&goal, run.ctx.step_results(), run.ctx.halt_reason())
        });
        run.ctx.set_summary(summary)?;
        Ok(State::Learn)
    }

    fn learn(&self, run: &mut Run) -> Result<State, OrchestrationError> {
        let counts = run.ctx.outcome_counts();
        let policy_abort = matches!(run.halt, Some(Halt::PolicyAbort { .. }));
        let nothing_worked = counts.total > 0 && counts.succeeded == 0;
        let risk = run
            .ctx
            .risk_assessment()
            .map(|a| a.risk_level)
            .unwrap_or(RiskLevel::Low);
        tracing::info!(
            succeeded = counts.succeeded,
            skipped = counts.skipped,
            failed = counts.failed,
            risk = %risk,
            "learning from outcome"
        );
        if policy_abort || nothing_worked {
            Ok(State::Failed)
        } else {
            Ok(State::Complete)
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("router", &self.router.is_some())
            .finish_non_exhaustive()
    }
}
