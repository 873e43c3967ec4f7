//! PCA Policy: Permission Gate, Validation Triggers, Rule-based Risk
//!
//! The decisions that sit between a plan and its execution:
//!
//! - **permission**: per-step auto-approve / confirm / deny by safety mode
//! - **trigger**: whether SCORE must route a plan through validation
//! - **risk**: a deterministic Risk Assessor built from tool risk levels

pub mod permission;
pub mod risk;
pub mod trigger;

pub use permission::{decide, PermissionDecision, PermissionGate};
pub use risk::{dry_run_constraint, RuleAssessor};
pub use trigger::{TriggerPolicy, ValidationTrigger};

pub use pca_core::SafetyMode;
