//! Step executor
//!
//! Runs a plan's steps strictly in declared order. Per step: resolve
//! references, look the tool up, pass the permission gate, then invoke with
//! a timeout and retry transient failures. A step that exhausts its retries
//! is a drift event: execution pauses until the monitor decides how to go on.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use pca_core::{
    Arguments, DriftDecision, FailurePolicy, Monitor, OrchestrationError, Plan, RetryCounters,
    Step, StepResult, StepStatus, ToolDescriptor, ToolError, ToolRegistry, ToolStatus,
    MAX_DRIFT_RETRIES,
};
use pca_policy::{PermissionDecision, PermissionGate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cancel::CancelToken;
use crate::placeholder::resolve_arguments;

pub const CANCELLED_REASON: &str = "cancelled by user";
const PLAN_HALTED_REASON: &str = "not run: plan halted";

/// Why execution stopped before the last step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Halt {
    /// A step with `on_failure: abort` could not complete
    PolicyAbort { step_id: u32, reason: String },
    /// The monitor chose to abort after a drift event
    DriftAbort { step_id: u32 },
    Cancelled,
}

impl fmt::Display for Halt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Halt::PolicyAbort { step_id, reason } => {
                write!(f, "step {} failed and its policy is abort: {}", step_id, reason)
            }
            Halt::DriftAbort { step_id } => {
                write!(f, "drift retries exhausted at step {}", step_id)
            }
            Halt::Cancelled => f.write_str(CANCELLED_REASON),
        }
    }
}

/// A paused-and-resumed drift, as decided by the monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub step_id: u32,
    pub status: StepStatus,
    pub attempts: u32,
    pub decision: DriftDecision,
}

/// Everything one executor run produced
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    /// One entry per plan step, in plan order
    pub results: Vec<StepResult>,
    pub retries: RetryCounters,
    pub drifts: Vec<DriftEvent>,
    pub halt: Option<Halt>,
}

impl ExecutionReport {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.status.is_success()).count()
    }
}

/// Outcome of a single invocation attempt
enum Attempt {
    Success(Value),
    Failure {
        status: StepStatus,
        message: String,
        transient: bool,
    },
    Cancelled,
}

/// What to do after a step settles
enum Next {
    Continue,
    Halt(Halt),
}

pub struct Executor {
    registry: Arc<dyn ToolRegistry>,
    monitor: Arc<dyn Monitor>,
    gate: PermissionGate,
    timeout: Duration,
    max_retries: u32,
}

impl Executor {
    pub fn new(
        registry: Arc<dyn ToolRegistry>,
        monitor: Arc<dyn Monitor>,
        gate: PermissionGate,
    ) -> Self {
        Self {
            registry,
            monitor,
            gate,
            timeout: Duration::from_secs(30),
            max_retries: MAX_DRIFT_RETRIES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Attempts per step before drift; never more than [`MAX_DRIFT_RETRIES`]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.clamp(1, MAX_DRIFT_RETRIES);
        self
    }

    /// Run every step of `plan` in order
    #[tracing::instrument(skip_all, fields(steps = plan.steps.len()))]
    pub async fn run(&self, plan: &Plan, cancel: &CancelToken) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        for (index, step) in plan.steps.iter().enumerate() {
            let next = if cancel.is_cancelled() {
                report.results.push(StepResult::skipped(step, CANCELLED_REASON, 0));
                Next::Halt(Halt::Cancelled)
            } else {
                self.run_step(step, cancel, &mut report).await
            };

            if let Next::Halt(halt) = next {
                tracing::warn!(step_id = step.step_id, halt = %halt, "execution halted");
                let reason = match halt {
                    Halt::Cancelled => CANCELLED_REASON,
                    _ => PLAN_HALTED_REASON,
                };
                for rest in &plan.steps[index + 1..] {
                    report.results.push(StepResult::skipped(rest, reason, 0));
                }
                report.halt = Some(halt);
                break;
            }
        }

        tracing::info!(
            succeeded = report.succeeded(),
            total = report.results.len(),
            "execution finished"
        );
        report
    }

    async fn run_step(
        &self,
        step: &Step,
        cancel: &CancelToken,
        report: &mut ExecutionReport,
    ) -> Next {
        let arguments = match resolve_arguments(step, &report.results) {
            Ok(arguments) => arguments,
            Err(err) => {
                tracing::warn!(step_id = step.step_id, error = %err, "unresolved reference");
                return Self::settle_failure(step, StepStatus::Failed, err.to_string(), 0, report);
            }
        };

        let tool = match self.registry.describe(&step.tool_name) {
            Some(tool) => tool,
            None => {
                let err = OrchestrationError::from(ToolError::NotFound(step.tool_name.clone()));
                return Self::settle_failure(step, StepStatus::Failed, err.to_string(), 0, report);
            }
        };

        match self.authorize(step, &tool, cancel).await {
            Ok(()) => {}
            Err(OrchestrationError::Cancelled) => {
                report.results.push(StepResult::skipped(step, CANCELLED_REASON, 0));
                return Next::Halt(Halt::Cancelled);
            }
            Err(err) => {
                tracing::warn!(step_id = step.step_id, tool = %tool.name, "permission denied");
                let reason = err.to_string();
                report
                    .results
                    .push(StepResult::skipped(step, reason.clone(), 0));
                return match step.on_failure {
                    FailurePolicy::Abort => Next::Halt(Halt::PolicyAbort {
                        step_id: step.step_id,
                        reason,
                    }),
                    _ => Next::Continue,
                };
            }
        }

        self.invoke_with_retries(step, arguments, cancel, report).await
    }

    /// `PermissionDenied` when the gate or the monitor refuses,
    /// `Cancelled` when cancelled while waiting for the monitor
    async fn authorize(
        &self,
        step: &Step,
        tool: &ToolDescriptor,
        cancel: &CancelToken,
    ) -> Result<(), OrchestrationError> {
        let approved = match self.gate.evaluate(tool) {
            PermissionDecision::AutoApprove => true,
            PermissionDecision::Deny => false,
            PermissionDecision::RequireConfirmation => {
                cancel.guard(self.monitor.request_permission(step, tool)).await?
            }
        };
        if approved {
            Ok(())
        } else {
            Err(OrchestrationError::PermissionDenied {
                step_id: step.step_id,
                tool: tool.name.clone(),
            })
        }
    }

    async fn invoke_with_retries(
        &self,
        step: &Step,
        mut arguments: Arguments,
        cancel: &CancelToken,
        report: &mut ExecutionReport,
    ) -> Next {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (status, message, transient) = match self.invoke_once(&step.tool_name, &arguments, cancel).await {
                Attempt::Success(output) => {
                    tracing::info!(step_id = step.step_id, attempts, "step succeeded");
                    report
                        .results
                        .push(StepResult::success(step, output, attempts));
                    return Next::Continue;
                }
                Attempt::Cancelled => {
                    report
                        .results
                        .push(StepResult::skipped(step, CANCELLED_REASON, attempts));
                    return Next::Halt(Halt::Cancelled);
                }
                Attempt::Failure {
                    status,
                    message,
                    transient,
                } => (status, message, transient),
            };

            let count = report.retries.increment(step.step_id, self.max_retries);
            tracing::warn!(
                step_id = step.step_id,
                status = status.as_str(),
                retry_count = count,
                transient,
                error = %message,
                "step attempt failed"
            );

            if !transient {
                return Self::settle_failure(step, status, message, attempts, report);
            }

            if count < self.max_retries {
                match cancel
                    .guard(self.monitor.vary_invocation(step, attempts))
                    .await
                {
                    Ok(Some(varied)) => {
                        tracing::info!(step_id = step.step_id, "retrying with varied arguments");
                        arguments = varied;
                    }
                    Ok(None) => {}
                    Err(_) => {
                        report
                            .results
                            .push(StepResult::skipped(step, CANCELLED_REASON, attempts));
                        return Next::Halt(Halt::Cancelled);
                    }
                }
                continue;
            }

            return self
                .drift(step, status, message, attempts, cancel, report)
                .await;
        }
    }

    /// Retries exhausted: pause and let the monitor decide
    async fn drift(
        &self,
        step: &Step,
        status: StepStatus,
        message: String,
        attempts: u32,
        cancel: &CancelToken,
        report: &mut ExecutionReport,
    ) -> Next {
        tracing::warn!(step_id = step.step_id, attempts, "drift detected, execution paused");
        let decision = match cancel
            .guard(self.monitor.notify_drift(step, status, attempts))
            .await
        {
            Ok(decision) => decision,
            Err(_) => {
                report
                    .results
                    .push(StepResult::skipped(step, CANCELLED_REASON, attempts));
                return Next::Halt(Halt::Cancelled);
            }
        };
        tracing::info!(step_id = step.step_id, ?decision, "execution resumed");
        report.drifts.push(DriftEvent {
            step_id: step.step_id,
            status,
            attempts,
            decision,
        });

        match decision {
            DriftDecision::Resume => {
                let result = if step.on_failure == FailurePolicy::Skip {
                    StepResult::skipped(step, message, attempts)
                } else {
                    StepResult::failure(step, status, message, attempts)
                };
                report.results.push(result);
                Next::Continue
            }
            DriftDecision::Skip => {
                report
                    .results
                    .push(StepResult::skipped(step, message, attempts));
                Next::Continue
            }
            DriftDecision::Abort => {
                report
                    .results
                    .push(StepResult::failure(step, status, message, attempts));
                Next::Halt(Halt::DriftAbort {
                    step_id: step.step_id,
                })
            }
        }
    }

    /// Record a failure that is not retried and apply the step's policy
    fn settle_failure(
        step: &Step,
        status: StepStatus,
        message: String,
        attempts: u32,
        report: &mut ExecutionReport,
    ) -> Next {
        report
            .results
            .push(StepResult::failure(step, status, message.clone(), attempts));
        match step.on_failure {
            FailurePolicy::Abort => Next::Halt(Halt::PolicyAbort {
                step_id: step.step_id,
                reason: message,
            }),
            FailurePolicy::Skip | FailurePolicy::Retry => Next::Continue,
        }
    }

    async fn invoke_once(&self, tool: &str, arguments: &Arguments, cancel: &CancelToken) -> Attempt {
        let call = tokio::time::timeout(self.timeout, self.registry.invoke(tool, arguments));
        match cancel.guard(call).await {
            Err(_) => Attempt::Cancelled,
            Ok(Err(_elapsed)) => Attempt::Failure {
                status: StepStatus::Timeout,
                message: format!("timed out after {}ms", self.timeout.as_millis()),
                transient: true,
            },
            Ok(Ok(Ok(output))) => match output.status {
                ToolStatus::Success => Attempt::Success(output.output.unwrap_or(Value::Null)),
                ToolStatus::Failed => Attempt::Failure {
                    status: StepStatus::Failed,
                    message: output.error.unwrap_or_else(|| "tool reported failure".into()),
                    transient: true,
                },
                ToolStatus::Error => Attempt::Failure {
                    status: StepStatus::Error,
                    message: output.error.unwrap_or_else(|| "tool reported an error".into()),
                    transient: true,
                },
            },
            Ok(Ok(Err(err))) => {
                let status = match err {
                    ToolError::Execution { .. } => StepStatus::Error,
                    _ => StepStatus::Failed,
                };
                let transient = err.is_transient();
                Attempt::Failure {
                    status,
                    message: OrchestrationError::from(err).to_string(),
                    transient,
                }
            }
        }
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("gate", &self.gate)
            .field("timeout", &self.timeout)
            .field("max_retries", &self.max_retries)
            .finish_non_exhaustive()
    }
}
