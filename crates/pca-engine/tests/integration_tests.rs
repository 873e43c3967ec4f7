//! Integration tests for pca-engine: whole requests driven through the state
//! machine against scripted collaborators.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pca_core::{
    Arguments, AssessmentError, AssessmentFallback, DriftDecision, EngineConfig, Event,
    FailurePolicy, GenerationError, HistoryError, HistoryRecorder, HistorySnapshot,
    InMemoryHistory, IntentAck, Monitor, Plan, PlanRequest, Planner, Recommendation,
    RiskAssessment, RiskAssessor, RiskLevel, RouteMatch, Router, SafetyMode, State, Step,
    StepResult, StepStatus, ToolDescriptor, ToolError, ToolOutput, ToolRegistry, ToolRisk,
};
use pca_engine::{CancelHandle, Capabilities, ChannelMonitor, Orchestrator, Suspension};
use pca_out::SummaryRenderer;
use pca_policy::dry_run_constraint;

// =============================================================================
// Scripted collaborators
// =============================================================================

/// Pops scripted replies in order; the last one repeats
fn next_scripted<T: Clone>(queue: &Mutex<VecDeque<T>>) -> Option<T> {
    let mut queue = queue.lock().unwrap();
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[derive(Default)]
struct ScriptedPlanner {
    plans: Mutex<VecDeque<Result<Plan, GenerationError>>>,
    requests: Mutex<Vec<PlanRequest>>,
    summary: Option<String>,
}

impl ScriptedPlanner {
    fn requests(&self) -> Vec<PlanRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn generate(&self, request: &PlanRequest) -> Result<Plan, GenerationError> {
        self.requests.lock().unwrap().push(request.clone());
        next_scripted(&self.plans).unwrap_or_else(|| Err(GenerationError::new("no plan scripted")))
    }

    async fn summarize(
        &self,
        _goal: &str,
        _plan: &Plan,
        _results: &[StepResult],
    ) -> Result<String, GenerationError> {
        self.summary
            .clone()
            .ok_or_else(|| GenerationError::new("summaries unavailable"))
    }
}

#[derive(Default)]
struct ScriptedAssessor {
    replies: Mutex<VecDeque<Result<RiskAssessment, AssessmentError>>>,
    calls: AtomicUsize,
}

impl ScriptedAssessor {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RiskAssessor for ScriptedAssessor {
    async fn assess(&self, _plan: &Plan, _goal: &str) -> Result<RiskAssessment, AssessmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        next_scripted(&self.replies).unwrap_or_else(|| Ok(RiskAssessment::approve(RiskLevel::Low)))
    }
}

#[derive(Default)]
struct ScriptedRegistry {
    tools: Vec<ToolDescriptor>,
    replies: Mutex<HashMap<String, Mutex<VecDeque<Result<ToolOutput, ToolError>>>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<(String, Arguments)>>,
}

impl ScriptedRegistry {
    fn calls_to(&self, name: &str) -> Vec<Arguments> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[async_trait]
impl ToolRegistry for ScriptedRegistry {
    fn describe(&self, name: &str) -> Option<ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name).cloned()
    }

    fn list(&self) -> Vec<ToolDescriptor> {
        self.tools.clone()
    }

    async fn invoke(&self, name: &str, arguments: &Arguments) -> Result<ToolOutput, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments.clone()));
        if let Some(delay) = self.delays.get(name) {
            tokio::time::sleep(*delay).await;
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(name)
            .and_then(|queue| next_scripted(queue));
        reply.unwrap_or_else(|| Ok(ToolOutput::success(json!({ "tool": name }))))
    }
}

struct ScriptedMonitor {
    intent: bool,
    plan_ok: bool,
    permission: bool,
    drift: DriftDecision,
    plan_confirmations: AtomicUsize,
    permission_requests: AtomicUsize,
    drifts: Mutex<Vec<(u32, StepStatus, u32)>>,
}

impl Default for ScriptedMonitor {
    fn default() -> Self {
        Self {
            intent: true,
            plan_ok: true,
            permission: true,
            drift: DriftDecision::Skip,
            plan_confirmations: AtomicUsize::new(0),
            permission_requests: AtomicUsize::new(0),
            drifts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Monitor for ScriptedMonitor {
    async fn confirm_intent(&self, goal: &str) -> IntentAck {
        if self.intent {
            IntentAck::confirmed(format!("On it: {}", goal), "")
        } else {
            IntentAck::declined("Not now.")
        }
    }

    async fn confirm_plan(&self, _plan: &Plan, _assessment: &RiskAssessment) -> bool {
        self.plan_confirmations.fetch_add(1, Ordering::SeqCst);
        self.plan_ok
    }

    async fn request_permission(&self, _step: &Step, _tool: &ToolDescriptor) -> bool {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        self.permission
    }

    async fn notify_drift(&self, step: &Step, status: StepStatus, attempts: u32) -> DriftDecision {
        self.drifts
            .lock()
            .unwrap()
            .push((step.step_id, status, attempts));
        self.drift
    }
}

struct FixedRouter(RouteMatch);

impl Router for FixedRouter {
    fn route(&self, _query: &str) -> Option<RouteMatch> {
        Some(self.0.clone())
    }
}

// =============================================================================
// Harness
// =============================================================================

#[derive(Default)]
struct Harness {
    planner: ScriptedPlanner,
    assessor: ScriptedAssessor,
    registry: ScriptedRegistry,
    monitor: ScriptedMonitor,
}

struct Wired {
    orchestrator: Orchestrator,
    planner: Arc<ScriptedPlanner>,
    assessor: Arc<ScriptedAssessor>,
    registry: Arc<ScriptedRegistry>,
    monitor: Arc<ScriptedMonitor>,
    history: Arc<InMemoryHistory>,
}

impl Harness {
    fn plan(self, plan: Plan) -> Self {
        self.planner.plans.lock().unwrap().push_back(Ok(plan));
        self
    }

    fn plan_error(self, message: &str) -> Self {
        self.planner
            .plans
            .lock()
            .unwrap()
            .push_back(Err(GenerationError::new(message)));
        self
    }

    fn assess(self, reply: Result<RiskAssessment, AssessmentError>) -> Self {
        self.assessor.replies.lock().unwrap().push_back(reply);
        self
    }

    fn tool(mut self, tool: ToolDescriptor) -> Self {
        self.registry.tools.push(tool);
        self
    }

    fn reply(self, name: &str, reply: Result<ToolOutput, ToolError>) -> Self {
        self.registry
            .replies
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .lock()
            .unwrap()
            .push_back(reply);
        self
    }

    fn delay(mut self, name: &str, delay: Duration) -> Self {
        self.registry.delays.insert(name.to_string(), delay);
        self
    }

    fn monitor(mut self, monitor: ScriptedMonitor) -> Self {
        self.monitor = monitor;
        self
    }

    fn wire(self, config: EngineConfig) -> Wired {
        self.wire_with(config, None)
    }

    fn wire_with(self, config: EngineConfig, monitor: Option<Arc<dyn Monitor>>) -> Wired {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        let planner = Arc::new(self.planner);
        let assessor = Arc::new(self.assessor);
        let registry = Arc::new(self.registry);
        let scripted_monitor = Arc::new(self.monitor);
        let history = Arc::new(InMemoryHistory::new(16));
        let monitor: Arc<dyn Monitor> = monitor.unwrap_or_else(|| scripted_monitor.clone());
        let caps = Capabilities::new(planner.clone(), assessor.clone(), registry.clone(), monitor)
            .with_history(history.clone());
        let renderer = Arc::new(SummaryRenderer::builtin().unwrap());
        Wired {
            orchestrator: Orchestrator::new(caps, config, renderer),
            planner,
            assessor,
            registry,
            monitor: scripted_monitor,
            history,
        }
    }
}

fn config(mode: SafetyMode) -> EngineConfig {
    EngineConfig::default()
        .with_safety_mode(mode)
        .with_diagnostic_tools(Vec::new())
}

fn kinds(events: &[Event]) -> Vec<&'static str> {
    events.iter().map(Event::kind).collect()
}

fn safe(name: &str) -> ToolDescriptor {
    ToolDescriptor::new(name, ToolRisk::Safe)
}

// =============================================================================
// Scenario A: simple safe request
// =============================================================================

#[tokio::test]
async fn test_safe_request_runs_straight_through() {
    let wired = Harness::default()
        .plan(Plan::new("read config", 0.95, vec![Step::new(1, "net.get_config")]))
        .tool(safe("net.get_config"))
        .reply("net.get_config", Ok(ToolOutput::success(json!({"ip": "10.0.0.2"}))))
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("check ip").await;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(
        report.events.state_path(),
        vec![
            State::Idle,
            State::Negotiate,
            State::Diagnose,
            State::Plan,
            State::Score,
            State::Execute,
            State::Reporting,
            State::Learn,
            State::Complete,
        ]
    );
    assert_eq!(
        kinds(report.events.events()),
        vec![
            "state",
            "cm_response",
            "state",
            "state",
            "plan",
            "state",
            "confidence",
            "state",
            "step_result",
            "state",
            "state",
            "state",
        ]
    );
    assert_eq!(report.results().len(), 1);
    assert_eq!(report.results()[0].output, Some(json!({"ip": "10.0.0.2"})));
    assert_eq!(wired.assessor.calls(), 0);
    assert_eq!(wired.monitor.permission_requests.load(Ordering::SeqCst), 0);
    assert_eq!(
        report.summary(),
        Some("Finished \"check ip\": 1 of 1 steps succeeded.")
    );
}

#[tokio::test]
async fn test_safe_mode_asks_before_every_step() {
    let wired = Harness::default()
        .plan(Plan::new("read config", 0.95, vec![Step::new(1, "net.get_config")]))
        .tool(safe("net.get_config"))
        .wire(config(SafetyMode::Safe));

    let report = wired.orchestrator.process("check ip").await;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(wired.monitor.permission_requests.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Scenario B: risky request negotiated down
// =============================================================================

#[tokio::test]
async fn test_risky_request_regenerated_and_drift_skipped() {
    let first = Plan::new(
        "find then delete",
        0.72,
        vec![
            Step::new(1, "fs.find_old_files")
                .with_arg("path", "/tmp")
                .with_arg("days", 365),
            Step::new(2, "fs.delete_file").with_arg("paths", "{{step1.files}}"),
        ],
    );
    let second = Plan::new(
        "find then preview the delete",
        0.88,
        vec![
            Step::new(1, "fs.find_old_files")
                .with_arg("path", "/tmp")
                .with_arg("days", 365),
            Step::new(2, "fs.delete_file")
                .with_arg("paths", "{{step1.files}}")
                .with_arg("dry_run", true)
                .on_failure(FailurePolicy::Skip),
        ],
    );
    let wired = Harness::default()
        .plan(first.clone())
        .plan(second)
        .assess(Ok(RiskAssessment::approve(RiskLevel::High)
            .with_concern("Deletes files without a preview")
            .with_constraint(dry_run_constraint("fs.delete_file"))
            .with_recommendation(Recommendation::ApproveWithModifications)))
        .assess(Ok(RiskAssessment::approve(RiskLevel::Medium)))
        .tool(safe("fs.find_old_files"))
        .tool(ToolDescriptor::new("fs.delete_file", ToolRisk::High).confirms_action())
        .reply(
            "fs.find_old_files",
            Ok(ToolOutput::success(json!({"files": ["/tmp/a.log", "/tmp/b.log"], "count": 2}))),
        )
        .reply("fs.delete_file", Ok(ToolOutput::failed("files in use")))
        .wire(config(SafetyMode::SemiAutonomous));

    let goal = "delete all files older than 1 year";
    let report = wired.orchestrator.process(goal).await;
    let ctx = &report.context;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(ctx.plan_attempt_count(), 2);
    assert_eq!(ctx.confidence(), 0.88);
    assert_eq!(wired.assessor.calls(), 2);

    let requests = wired.planner.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].constraints, vec![dry_run_constraint("fs.delete_file")]);
    assert_eq!(requests[1].prior_plan.as_ref(), Some(&first));

    assert_eq!(wired.monitor.plan_confirmations.load(Ordering::SeqCst), 1);
    assert_eq!(wired.monitor.permission_requests.load(Ordering::SeqCst), 1);
    assert_eq!(
        *wired.monitor.drifts.lock().unwrap(),
        vec![(2, StepStatus::Failed, 3)]
    );
    assert_eq!(ctx.drift_retry_counts().get(2), 3);

    let deletes = wired.registry.calls_to("fs.delete_file");
    assert_eq!(deletes.len(), 3);
    assert_eq!(deletes[0]["paths"], json!(["/tmp/a.log", "/tmp/b.log"]));
    assert_eq!(deletes[0]["dry_run"], Value::Bool(true));

    let statuses: Vec<StepStatus> = report.results().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::Success, StepStatus::Skipped]);
    let summary = report.summary().unwrap();
    assert!(summary.contains("1 of 2 steps succeeded"), "{}", summary);
    assert!(summary.contains("1 skipped"), "{}", summary);

    assert_eq!(
        report.events.state_path(),
        vec![
            State::Idle,
            State::Negotiate,
            State::Diagnose,
            State::Plan,
            State::Score,
            State::Validate,
            State::Execute,
            State::Reporting,
            State::Learn,
            State::Complete,
        ]
    );
    assert_eq!(report.events.of_kind("risk_assessment").count(), 2);
    assert_eq!(report.events.of_kind("plan").count(), 2);
}

// =============================================================================
// Scenario C: unresolvable risk
// =============================================================================

#[tokio::test]
async fn test_rejected_three_times_aborts() {
    let plan = Plan::new("wipe", 0.9, vec![Step::new(1, "disk.wipe")]);
    let wired = Harness::default()
        .plan(plan)
        .assess(Ok(RiskAssessment::approve(RiskLevel::High)
            .with_concern("Irreversible")
            .with_recommendation(Recommendation::Reject)))
        .tool(ToolDescriptor::new("disk.wipe", ToolRisk::High))
        .wire(config(SafetyMode::SemiAutonomous));

    let report = wired.orchestrator.process("wipe the disk").await;

    assert_eq!(report.state(), State::Aborted);
    assert_eq!(
        report.context.abort_reason(),
        Some("risk unresolved after 3 attempts")
    );
    assert!(report.results().is_empty());
    assert_eq!(report.context.plan_attempt_count(), 3);
    assert_eq!(wired.assessor.calls(), 3);
    assert_eq!(wired.planner.requests().len(), 3);
    assert!(wired.registry.calls_to("disk.wipe").is_empty());
    assert!(report
        .summary()
        .unwrap()
        .starts_with("I could not complete this safely because risk unresolved after 3 attempts"));

    let archived = wired.history.read_all().await;
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].state, State::Aborted);
}

// =============================================================================
// Validation loop boundaries
// =============================================================================

#[tokio::test]
async fn test_approval_stops_regeneration() {
    let wired = Harness::default()
        .plan(Plan::new("p1", 0.5, vec![Step::new(1, "fs.list_dir")]))
        .plan(Plan::new("p2", 0.6, vec![Step::new(1, "fs.list_dir")]))
        .assess(Ok(RiskAssessment::approve(RiskLevel::Medium)
            .with_recommendation(Recommendation::ApproveWithModifications)))
        .assess(Ok(RiskAssessment::approve(RiskLevel::Low)))
        .assess(Ok(RiskAssessment::approve(RiskLevel::High)
            .with_recommendation(Recommendation::Reject)))
        .tool(safe("fs.list_dir"))
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list my files").await;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(wired.assessor.calls(), 2);
    assert_eq!(wired.planner.requests().len(), 2);
    assert_eq!(wired.monitor.plan_confirmations.load(Ordering::SeqCst), 0);
    assert_eq!(report.context.plan().unwrap().reasoning, "p2");
}

#[tokio::test]
async fn test_unknown_tool_penalised_in_score() {
    let wired = Harness::default()
        .plan(Plan::new("guess", 0.95, vec![Step::new(1, "ghost.tool")]))
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("do the thing").await;

    let score = report
        .events
        .events()
        .iter()
        .find_map(|e| match e {
            Event::Confidence { score } => Some(*score),
            _ => None,
        })
        .unwrap();
    assert!((score - 0.65).abs() < 1e-9);
    assert_eq!(wired.assessor.calls(), 1);
    assert_eq!(report.results()[0].status, StepStatus::Failed);
    assert_eq!(report.state(), State::Failed);
    assert!(report.events.state_path().contains(&State::ErrorRecovery));
}

#[tokio::test]
async fn test_nan_threshold_still_validates_low_confidence() {
    let mut cfg = config(SafetyMode::Autonomous);
    cfg.confidence_threshold = f64::NAN;
    let wired = Harness::default()
        .plan(Plan::new("unsure", 0.10, vec![Step::new(1, "fs.list_dir")]))
        .tool(safe("fs.list_dir"))
        .wire(cfg);

    let report = wired.orchestrator.process("list my files").await;

    assert_eq!(wired.assessor.calls(), 1);
    assert!(report.events.state_path().contains(&State::Validate));
    assert_eq!(report.state(), State::Complete);
}

#[tokio::test]
async fn test_declined_plan_aborts_before_execution() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.4, vec![Step::new(1, "fs.list_dir")]))
        .assess(Ok(RiskAssessment::approve(RiskLevel::High)))
        .tool(safe("fs.list_dir"))
        .monitor(ScriptedMonitor {
            plan_ok: false,
            ..ScriptedMonitor::default()
        })
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.state(), State::Aborted);
    assert_eq!(report.context.abort_reason(), Some("plan declined by user"));
    assert_eq!(report.events.of_kind("step_result").count(), 0);
    assert!(wired.registry.calls_to("fs.list_dir").is_empty());
}

#[tokio::test]
async fn test_assessor_outage_forces_confirmation_everywhere() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.5, vec![Step::new(1, "fs.list_dir")]))
        .assess(Err(AssessmentError::new("assessor unreachable")))
        .tool(safe("fs.list_dir"))
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.state(), State::Complete);
    assert!(report.context.forced_confirmation());
    assert_eq!(
        report.context.risk_assessment().unwrap().risk_level,
        RiskLevel::High
    );
    assert_eq!(wired.monitor.plan_confirmations.load(Ordering::SeqCst), 1);
    assert_eq!(wired.monitor.permission_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_assessor_outage_can_abort() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.5, vec![Step::new(1, "fs.list_dir")]))
        .assess(Err(AssessmentError::new("assessor unreachable")))
        .tool(safe("fs.list_dir"))
        .wire(config(SafetyMode::Autonomous).with_assessment_fallback(AssessmentFallback::Abort));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.state(), State::Aborted);
    assert!(report
        .context
        .abort_reason()
        .unwrap()
        .contains("assessor unreachable"));
}

// =============================================================================
// Negotiation and planning failures
// =============================================================================

#[tokio::test]
async fn test_declined_intent_returns_to_idle() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "fs.list_dir")]))
        .monitor(ScriptedMonitor {
            intent: false,
            ..ScriptedMonitor::default()
        })
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.state(), State::Idle);
    assert_eq!(kinds(report.events.events()), vec!["state", "cm_response", "state"]);
    assert!(wired.planner.requests().is_empty());
    assert!(wired.history.is_empty().await);
}

#[tokio::test]
async fn test_generation_failure_aborts_with_explanation() {
    let wired = Harness::default()
        .plan_error("model offline")
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.state(), State::Aborted);
    assert!(report.context.plan().is_none());
    assert!(report
        .summary()
        .unwrap()
        .starts_with("I could not complete this safely because"));
    assert!(report.context.abort_reason().unwrap().contains("model offline"));
}

#[tokio::test]
async fn test_router_hit_skips_planner() {
    let wired = Harness::default()
        .tool(safe("net.get_config"))
        .wire(config(SafetyMode::Autonomous));
    let orchestrator = wired.orchestrator.with_router(Arc::new(FixedRouter(RouteMatch {
        tool: "net.get_config".into(),
        score: 0.9,
    })));

    let report = orchestrator.process("check ip").await;

    assert_eq!(report.state(), State::Complete);
    assert!(wired.planner.requests().is_empty());
    let routed = report.events.of_kind("router").next().unwrap();
    assert!(matches!(routed, Event::Router { hit: true, .. }));
    assert_eq!(report.results()[0].tool, "net.get_config");
}

#[tokio::test]
async fn test_router_miss_falls_back_to_planner() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "fs.list_dir")]))
        .tool(safe("fs.list_dir"))
        .tool(safe("net.get_config"))
        .wire(config(SafetyMode::Autonomous));
    let orchestrator = wired.orchestrator.with_router(Arc::new(FixedRouter(RouteMatch {
        tool: "net.get_config".into(),
        score: 0.2,
    })));

    let report = orchestrator.process("list files in home").await;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(wired.planner.requests().len(), 1);
    let routed = report.events.of_kind("router").next().unwrap();
    assert!(matches!(routed, Event::Router { hit: false, .. }));
}

// =============================================================================
// Execution outcomes
// =============================================================================

#[tokio::test]
async fn test_unresolved_reference_fails_step_without_invoking() {
    let wired = Harness::default()
        .plan(Plan::new(
            "p",
            0.9,
            vec![
                Step::new(1, "scan").on_failure(FailurePolicy::Skip),
                Step::new(2, "consume")
                    .with_arg("items", "{{step1.items}}")
                    .on_failure(FailurePolicy::Skip),
            ],
        ))
        .tool(safe("scan"))
        .tool(safe("consume"))
        .reply(
            "scan",
            Err(ToolError::InvalidArguments {
                tool: "scan".into(),
                message: "bad input".into(),
            }),
        )
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("scan and consume").await;

    let second = &report.results()[1];
    assert_eq!(second.status, StepStatus::Failed);
    assert!(second.error.as_deref().unwrap().contains("step1.items"));
    assert!(wired.registry.calls_to("consume").is_empty());
    assert_eq!(wired.registry.calls_to("scan").len(), 1);
    assert_eq!(report.state(), State::Failed);
}

#[tokio::test]
async fn test_policy_abort_reports_then_fails() {
    let wired = Harness::default()
        .plan(Plan::new(
            "p",
            0.9,
            vec![Step::new(1, "scan"), Step::new(2, "after")],
        ))
        .tool(safe("scan"))
        .tool(safe("after"))
        .reply(
            "scan",
            Err(ToolError::InvalidArguments {
                tool: "scan".into(),
                message: "bad input".into(),
            }),
        )
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("scan things").await;

    assert_eq!(report.state(), State::Failed);
    let statuses: Vec<StepStatus> = report.results().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::Failed, StepStatus::Skipped]);
    assert!(report.context.halt_reason().is_some());
    assert!(report.summary().unwrap().starts_with("Stopped early"));
    assert!(report.events.state_path().contains(&State::ErrorRecovery));
}

#[tokio::test]
async fn test_drift_abort_ends_request() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "stuck"), Step::new(2, "after")]))
        .tool(safe("stuck"))
        .tool(safe("after"))
        .reply("stuck", Ok(ToolOutput::failed("files in use")))
        .monitor(ScriptedMonitor {
            drift: DriftDecision::Abort,
            ..ScriptedMonitor::default()
        })
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("do stuck things").await;

    assert_eq!(report.state(), State::Aborted);
    assert_eq!(
        report.context.abort_reason(),
        Some("drift retries exhausted at step 1")
    );
    assert_eq!(wired.registry.calls_to("stuck").len(), 3);
    assert!(wired.registry.calls_to("after").is_empty());
    assert_eq!(report.results().len(), 2);
}

#[tokio::test]
async fn test_timeouts_count_towards_drift() {
    let wired = Harness::default()
        .plan(Plan::new(
            "p",
            0.9,
            vec![Step::new(1, "slow").on_failure(FailurePolicy::Skip)],
        ))
        .tool(safe("slow"))
        .delay("slow", Duration::from_millis(500))
        .wire(config(SafetyMode::Autonomous).with_tool_timeout(Duration::from_millis(20)));

    let report = wired.orchestrator.process("run slow tool").await;

    let result = &report.results()[0];
    assert_eq!(result.status, StepStatus::Skipped);
    assert_eq!(result.attempts, 3);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(
        *wired.monitor.drifts.lock().unwrap(),
        vec![(1, StepStatus::Timeout, 3)]
    );
    assert_eq!(report.state(), State::Failed);
}

#[tokio::test]
async fn test_planner_summary_preferred() {
    let mut harness = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "fs.list_dir")]))
        .tool(safe("fs.list_dir"));
    harness.planner.summary = Some("Listed your files.".into());
    let wired = harness.wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("list files").await;

    assert_eq!(report.summary(), Some("Listed your files."));
}

#[tokio::test]
async fn test_empty_plan_completes_with_nothing_to_do() {
    let wired = Harness::default()
        .plan(Plan::new("nothing needed", 0.9, Vec::new()))
        .wire(config(SafetyMode::Autonomous));

    let report = wired.orchestrator.process("say hello").await;

    assert_eq!(report.state(), State::Complete);
    assert!(report.results().is_empty());
}

// =============================================================================
// Suspend/resume and cancellation
// =============================================================================

#[tokio::test]
async fn test_channel_monitor_drives_drift_decision() {
    let (monitor, mut inbound) = ChannelMonitor::new(4);
    let wired = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "stuck"), Step::new(2, "ok")]))
        .tool(safe("stuck"))
        .tool(safe("ok"))
        .reply("stuck", Ok(ToolOutput::error("device busy")))
        .wire_with(config(SafetyMode::Autonomous), Some(Arc::new(monitor)));
    let orchestrator = Arc::new(wired.orchestrator);

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.process("flush the device").await })
    };

    match inbound.recv().await.unwrap() {
        Suspension::Intent { reply, .. } => reply.send(IntentAck::confirmed("ok", "")).unwrap(),
        other => panic!("expected intent, got {}", other.kind()),
    }
    match inbound.recv().await.unwrap() {
        Suspension::Drift {
            step,
            status,
            attempts,
            reply,
        } => {
            assert_eq!(step.step_id, 1);
            assert_eq!(status, StepStatus::Error);
            assert_eq!(attempts, 3);
            reply.send(DriftDecision::Skip).unwrap();
        }
        other => panic!("expected drift, got {}", other.kind()),
    }

    let report = run.await.unwrap();
    assert_eq!(report.state(), State::Complete);
    let statuses: Vec<StepStatus> = report.results().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::Skipped, StepStatus::Success]);
}

#[tokio::test]
async fn test_cancel_while_waiting_for_permission() {
    let (monitor, mut inbound) = ChannelMonitor::new(4);
    let wired = Harness::default()
        .plan(Plan::new("p", 0.95, vec![Step::new(1, "a"), Step::new(2, "b")]))
        .tool(safe("a"))
        .tool(safe("b"))
        .wire_with(config(SafetyMode::Safe), Some(Arc::new(monitor)));
    let orchestrator = Arc::new(wired.orchestrator);
    let handle = CancelHandle::new();
    let token = handle.token();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.process_with_cancel("run a and b", token).await })
    };

    match inbound.recv().await.unwrap() {
        Suspension::Intent { reply, .. } => reply.send(IntentAck::confirmed("ok", "")).unwrap(),
        other => panic!("expected intent, got {}", other.kind()),
    }
    let pending = inbound.recv().await.unwrap();
    assert_eq!(pending.kind(), "permission");
    handle.cancel();

    let report = run.await.unwrap();
    drop(pending);

    assert_eq!(report.state(), State::Aborted);
    assert_eq!(report.context.abort_reason(), Some("cancelled by user"));
    assert!(report
        .results()
        .iter()
        .all(|r| r.status == StepStatus::Skipped));
    assert!(wired.registry.calls_to("a").is_empty());
    assert_eq!(wired.history.len().await, 1);
}

#[tokio::test]
async fn test_cancel_interrupts_running_tool() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.95, vec![Step::new(1, "slow")]))
        .tool(safe("slow"))
        .delay("slow", Duration::from_secs(10))
        .wire(config(SafetyMode::Autonomous));
    let orchestrator = Arc::new(wired.orchestrator);
    let handle = CancelHandle::new();
    let token = handle.token();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.process_with_cancel("run slow", token).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();

    let report = tokio::time::timeout(Duration::from_secs(2), run)
        .await
        .expect("cancellation should end the run promptly")
        .unwrap();
    assert_eq!(report.state(), State::Aborted);
    assert_eq!(report.results()[0].status, StepStatus::Skipped);
}

#[tokio::test]
async fn test_cancel_while_paused_on_drift() {
    let (monitor, mut inbound) = ChannelMonitor::new(4);
    let wired = Harness::default()
        .plan(Plan::new("p", 0.9, vec![Step::new(1, "stuck"), Step::new(2, "ok")]))
        .tool(safe("stuck"))
        .tool(safe("ok"))
        .reply("stuck", Ok(ToolOutput::error("device busy")))
        .wire_with(config(SafetyMode::Autonomous), Some(Arc::new(monitor)));
    let orchestrator = Arc::new(wired.orchestrator);
    let handle = CancelHandle::new();
    let token = handle.token();

    let run = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.process_with_cancel("flush the device", token).await })
    };

    match inbound.recv().await.unwrap() {
        Suspension::Intent { reply, .. } => reply.send(IntentAck::confirmed("ok", "")).unwrap(),
        other => panic!("expected intent, got {}", other.kind()),
    }
    let pending = inbound.recv().await.unwrap();
    assert_eq!(pending.kind(), "drift");
    handle.cancel();

    let report = run.await.unwrap();
    drop(pending);

    assert_eq!(report.state(), State::Aborted);
    assert_eq!(report.context.abort_reason(), Some("cancelled by user"));
    let statuses: Vec<StepStatus> = report.results().iter().map(|r| r.status).collect();
    assert_eq!(statuses, vec![StepStatus::Skipped, StepStatus::Skipped]);
    assert_eq!(report.results()[0].error.as_deref(), Some("cancelled by user"));
    assert_eq!(report.results()[0].attempts, 3);
    assert!(wired.registry.calls_to("ok").is_empty());
}

// =============================================================================
// Concurrency and history
// =============================================================================

#[tokio::test]
async fn test_concurrent_requests_keep_separate_contexts() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.95, vec![Step::new(1, "net.get_config")]))
        .tool(safe("net.get_config"))
        .wire(config(SafetyMode::Autonomous));
    let orchestrator = Arc::new(wired.orchestrator);

    let tasks: Vec<_> = (0..5)
        .map(|i| {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.process(&format!("check ip {}", i)).await })
        })
        .collect();

    let mut ids = Vec::new();
    for task in tasks {
        let report = task.await.unwrap();
        assert_eq!(report.state(), State::Complete);
        assert_eq!(report.results().len(), 1);
        ids.push(report.context.id());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
    assert_eq!(wired.history.len().await, 5);
}

#[tokio::test]
async fn test_second_request_recalls_first_outcome() {
    let wired = Harness::default()
        .plan(Plan::new("p", 0.95, vec![Step::new(1, "net.get_config")]))
        .tool(safe("net.get_config"))
        .wire(config(SafetyMode::Autonomous));

    let first = wired.orchestrator.process("check ip").await;
    assert_eq!(first.state(), State::Complete);
    let second = wired.orchestrator.process("check dns").await;
    assert_eq!(second.state(), State::Complete);

    let requests = wired.planner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].memory.recent_executions.is_empty());
    assert_eq!(requests[0].memory.safety_rules, EngineConfig::default().safety_rules);

    let memory = &requests[1].memory;
    assert_eq!(memory.recent_executions.len(), 1);
    assert_eq!(memory.recent_executions[0].goal, "check ip");
    assert_eq!(memory.recent_executions[0].state, State::Complete);
    assert_eq!(memory.recent_executions[0].tools, vec!["net.get_config".to_string()]);
    assert_eq!(memory.safety_rules.len(), 4);
    assert_eq!(
        memory.known_patterns,
        vec!["\"check ip\" solved with net.get_config".to_string()]
    );
}

#[tokio::test]
async fn test_memory_depth_zero_recalls_nothing() {
    let mut cfg = config(SafetyMode::Autonomous);
    cfg.memory_depth = 0;
    let wired = Harness::default()
        .plan(Plan::new("p", 0.95, vec![Step::new(1, "net.get_config")]))
        .tool(safe("net.get_config"))
        .wire(cfg);

    wired.orchestrator.process("check ip").await;
    wired.orchestrator.process("check ip").await;

    let requests = wired.planner.requests();
    assert!(requests[1].memory.recent_executions.is_empty());
    assert_eq!(requests[1].memory.safety_rules.len(), 4);
}

struct FullHistory;

#[async_trait]
impl HistoryRecorder for FullHistory {
    async fn append(&self, _snapshot: HistorySnapshot) -> Result<(), HistoryError> {
        Err(HistoryError("disk full".into()))
    }

    async fn read_all(&self) -> Vec<HistorySnapshot> {
        Vec::new()
    }
}

#[tokio::test]
async fn test_archive_failure_keeps_outcome() {
    let mut registry = ScriptedRegistry::default();
    registry.tools.push(safe("net.get_config"));
    let planner = ScriptedPlanner::default();
    planner
        .plans
        .lock()
        .unwrap()
        .push_back(Ok(Plan::new("p", 0.95, vec![Step::new(1, "net.get_config")])));
    let caps = Capabilities::new(
        Arc::new(planner),
        Arc::new(ScriptedAssessor::default()),
        Arc::new(registry),
        Arc::new(ScriptedMonitor::default()),
    )
    .with_history(Arc::new(FullHistory));
    let orchestrator = Orchestrator::new(
        caps,
        config(SafetyMode::Autonomous),
        Arc::new(SummaryRenderer::builtin().unwrap()),
    );

    let report = orchestrator.process("check ip").await;

    assert_eq!(report.state(), State::Complete);
    assert_eq!(report.results().len(), 1);
}
