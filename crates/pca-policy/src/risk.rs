//! Rule-based Risk Assessor
//!
//! Classifies a plan from the declared risk of its tools and the shape of
//! the goal. Used when no external assessor is wired, and as the reference
//! behaviour in tests.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

use pca_core::{
    AssessmentError, Plan, Recommendation, RiskAssessment, RiskAssessor, RiskLevel, Step,
    ToolDescriptor, ToolRisk,
};

const DESTRUCTIVE_MARKERS: &[&str] = &["delete", "kill"];
const MODIFYING_MARKERS: &[&str] = &["flush", "rename"];
const BULK_VERBS: &[&str] = &["delete", "kill", "remove"];

/// Constraint text the Planner recognises for a dry-run requirement
pub fn dry_run_constraint(tool: &str) -> String {
    format!("Use dry_run=true for '{}'", tool)
}

fn is_dry_run(step: &Step) -> bool {
    matches!(step.arguments.get("dry_run"), Some(Value::Bool(true)))
}

/// Deterministic assessor keyed on tool risk levels
#[derive(Debug, Clone, Default)]
pub struct RuleAssessor {
    tool_risk: HashMap<String, ToolRisk>,
}

impl RuleAssessor {
    pub fn new<I>(descriptors: I) -> Self
    where
        I: IntoIterator<Item = ToolDescriptor>,
    {
        Self {
            tool_risk: descriptors
                .into_iter()
                .map(|d| (d.name, d.risk_level))
                .collect(),
        }
    }

    fn is_destructive(&self, tool: &str) -> bool {
        self.tool_risk.get(tool) == Some(&ToolRisk::High)
            || DESTRUCTIVE_MARKERS.iter().any(|m| tool.contains(m))
    }

    fn is_modifying(&self, tool: &str) -> bool {
        self.tool_risk.get(tool) == Some(&ToolRisk::Medium)
            || MODIFYING_MARKERS.iter().any(|m| tool.contains(m))
    }

    fn is_bulk_goal(goal: &str) -> bool {
        let words: Vec<String> = goal
            .split(|c: char| !c.is_alphanumeric())
            .map(str::to_lowercase)
            .collect();
        words.iter().any(|w| w == "all") && words.iter().any(|w| BULK_VERBS.contains(&w.as_str()))
    }

    /// Pure evaluation of a plan against the rules
    pub fn evaluate(&self, plan: &Plan, goal: &str) -> RiskAssessment {
        if plan.is_empty() {
            return RiskAssessment::approve(RiskLevel::Low);
        }

        let mut level = RiskLevel::Low;
        let mut concerns = Vec::new();
        let mut constraints = Vec::new();
        let mut unguarded_destructive = false;

        for step in &plan.steps {
            let tool = step.tool_name.as_str();
            if self.is_destructive(tool) {
                if is_dry_run(step) {
                    level = level.max(RiskLevel::Medium);
                    concerns.push(format!("'{}' will only simulate its changes", tool));
                } else {
                    level = RiskLevel::High;
                    unguarded_destructive = true;
                    concerns.push(format!("'{}' can cause data loss or crash applications", tool));
                    constraints.push(dry_run_constraint(tool));
                }
            } else if self.is_modifying(tool) {
                level = level.max(RiskLevel::Medium);
                concerns.push(format!("'{}' modifies system state", tool));
            }
        }

        if unguarded_destructive && Self::is_bulk_goal(goal) {
            level = RiskLevel::High;
            concerns.push("Bulk destructive operation detected".to_string());
            constraints.push("Limit the scope or use dry_run first".to_string());
        }

        let recommendation = match level {
            RiskLevel::Low => Recommendation::Approve,
            RiskLevel::Medium if constraints.is_empty() => Recommendation::Approve,
            RiskLevel::Medium => Recommendation::ApproveWithModifications,
            RiskLevel::High if constraints.is_empty() => Recommendation::Reject,
            RiskLevel::High => Recommendation::ApproveWithModifications,
        };

        RiskAssessment {
            risk_level: level,
            concerns,
            constraints,
            recommendation,
        }
    }
}

#[async_trait]
impl RiskAssessor for RuleAssessor {
    async fn assess(&self, plan: &Plan, goal: &str) -> Result<RiskAssessment, AssessmentError> {
        let assessment = self.evaluate(plan, goal);
        tracing::debug!(
            risk = %assessment.risk_level,
            recommendation = %assessment.recommendation,
            concerns = assessment.concerns.len(),
            "rule assessment"
        );
        Ok(assessment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assessor() -> RuleAssessor {
        RuleAssessor::new(vec![
            ToolDescriptor::new("fs.find_old_files", ToolRisk::Safe),
            ToolDescriptor::new("fs.delete_file", ToolRisk::High),
            ToolDescriptor::new("net.flush_dns", ToolRisk::Medium),
        ])
    }

    #[test]
    fn test_empty_plan_is_low() {
        let result = assessor().evaluate(&Plan::new("", 1.0, vec![]), "nothing");
        assert_eq!(result.risk_level, RiskLevel::Low);
        assert!(result.is_approved());
    }

    #[test]
    fn test_destructive_tool_needs_dry_run() {
        let plan = Plan::new(
            "r",
            0.72,
            vec![
                Step::new(1, "fs.find_old_files"),
                Step::new(2, "fs.delete_file").with_arg("paths", "{{step1.files}}"),
            ],
        );
        let result = assessor().evaluate(&plan, "delete all files older than 1 year");
        assert_eq!(result.risk_level, RiskLevel::High);
        assert_eq!(result.recommendation, Recommendation::ApproveWithModifications);
        assert!(result.constraints.contains(&dry_run_constraint("fs.delete_file")));
        assert!(result
            .concerns
            .iter()
            .any(|c| c == "Bulk destructive operation detected"));
    }

    #[test]
    fn test_dry_run_plan_is_medium_approve() {
        let plan = Plan::new(
            "r",
            0.88,
            vec![
                Step::new(1, "fs.find_old_files"),
                Step::new(2, "fs.delete_file").with_arg("dry_run", true),
            ],
        );
        let result = assessor().evaluate(&plan, "delete all files older than 1 year");
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.recommendation, Recommendation::Approve);
        assert!(result.constraints.is_empty());
    }

    #[test]
    fn test_modifying_tool_is_medium() {
        let plan = Plan::new("r", 0.9, vec![Step::new(1, "net.flush_dns")]);
        let result = assessor().evaluate(&plan, "fix dns");
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert_eq!(result.recommendation, Recommendation::Approve);
    }

    #[test]
    fn test_name_markers_apply_to_unregistered_tools() {
        let plan = Plan::new("r", 0.9, vec![Step::new(1, "proc.kill")]);
        let result = assessor().evaluate(&plan, "stop it");
        assert_eq!(result.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn test_assess_through_trait() {
        let plan = Plan::new("r", 0.9, vec![Step::new(1, "fs.find_old_files")]);
        let result = assessor().assess(&plan, "find old files").await.unwrap();
        assert_eq!(result.risk_level, RiskLevel::Low);
    }
}
