//! PCA Engine: Orchestrator, Risk Validation Loop and Executor
//!
//! Turns a natural-language goal into an executed plan:
//!
//! ```text
//! IDLE → NEGOTIATE → DIAGNOSE → PLAN → SCORE ─┬─→ EXECUTE → REPORTING → LEARN → COMPLETE
//!                                             └─→ VALIDATE ─┘    │                 └→ FAILED
//!                              any failure → ABORTED     ERROR_RECOVERY
//! ```
//!
//! - **orchestrator**: the state machine and its per-state handlers
//! - **risk_loop**: assess, regenerate with constraints, at most three times
//! - **executor**: ordered steps, permission gate, retries and drift
//! - **handshake**: suspend/resume with the monitoring side
//! - **cancel**: abort a running request from outside

pub mod cancel;
pub mod executor;
pub mod gateway;
pub mod handshake;
pub mod orchestrator;
pub mod placeholder;
pub mod risk_loop;

pub use cancel::{CancelHandle, CancelToken};
pub use executor::{DriftEvent, ExecutionReport, Executor, Halt};
pub use gateway::PlanGateway;
pub use handshake::{AutoMonitor, ChannelMonitor, Suspension};
pub use orchestrator::{Capabilities, Orchestrator, RunReport};
pub use placeholder::resolve_arguments;
pub use risk_loop::{Iteration, LoopOutcome, RiskValidationLoop};
