//! Permission Gate
//!
//! Decides, per step and immediately before dispatch, whether a tool may run
//! unattended, needs a human decision, or must not run at all.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use pca_core::{SafetyMode, ToolDescriptor, ToolRisk};

/// Outcome of the gate for one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionDecision {
    AutoApprove,
    RequireConfirmation,
    Deny,
}

impl PermissionDecision {
    pub fn is_auto(&self) -> bool {
        matches!(self, PermissionDecision::AutoApprove)
    }
}

/// The pure decision table.
///
/// | mode | safe | medium | high |
/// |---|---|---|---|
/// | safe | confirm | confirm | confirm |
/// | semi_autonomous | auto (confirm if `confirms_action`) | confirm | confirm |
/// | autonomous | auto | auto | auto |
pub fn decide(risk: ToolRisk, confirms_action: bool, mode: SafetyMode) -> PermissionDecision {
    match mode {
        SafetyMode::Safe => PermissionDecision::RequireConfirmation,
        SafetyMode::SemiAutonomous => {
            if risk >= ToolRisk::Medium || confirms_action {
                PermissionDecision::RequireConfirmation
            } else {
                PermissionDecision::AutoApprove
            }
        }
        SafetyMode::Autonomous => PermissionDecision::AutoApprove,
    }
}

/// Deployment-wide gate: the decision table plus a deny list
#[derive(Debug, Clone, Default)]
pub struct PermissionGate {
    mode: SafetyMode,
    denied_tools: HashSet<String>,
}

impl PermissionGate {
    pub fn new(mode: SafetyMode) -> Self {
        Self {
            mode,
            denied_tools: HashSet::new(),
        }
    }

    /// Tools listed here are denied in every mode
    pub fn with_denied<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied_tools.extend(tools.into_iter().map(Into::into));
        self
    }

    pub fn mode(&self) -> SafetyMode {
        self.mode
    }

    /// Escalate to SAFE, e.g. after the Risk Assessor could not be reached
    pub fn escalated(&self) -> Self {
        Self {
            mode: SafetyMode::Safe,
            denied_tools: self.denied_tools.clone(),
        }
    }

    pub fn evaluate(&self, tool: &ToolDescriptor) -> PermissionDecision {
        if self.denied_tools.contains(&tool.name) {
            return PermissionDecision::Deny;
        }
        decide(tool.risk_level, tool.confirms_action, self.mode)
    }
}
