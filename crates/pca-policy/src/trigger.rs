//! Validation triggers evaluated in SCORE
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use pca_core::{EngineConfig, Plan, ToolRisk};

/// One reason a plan must go through the Risk Validation Loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "trigger", rename_all = "snake_case")]
pub enum ValidationTrigger {
    LowConfidence { score: f64, threshold: f64 },
    HighRiskTool { tool: String },
    /// Fires alongside the SCORE penalty; plans with only registered tools
    /// never see it
    UnknownTool { tool: String },
    RiskyKeyword { keyword: String },
}

/// Confidence threshold plus the risky-keyword set
#[derive(Debug, Clone)]
pub struct TriggerPolicy {
    confidence_threshold: f64,
    risky_keywords: BTreeSet<String>,
}

impl TriggerPolicy {
    pub fn new<I, S>(confidence_threshold: f64, risky_keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            confidence_threshold,
            risky_keywords: risky_keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.confidence_threshold, &config.risky_keywords)
    }

    /// Risky keywords appearing as whole words in the goal
    pub fn keyword_hits(&self, goal: &str) -> Vec<String> {
        let words: BTreeSet<String> = goal
            .split(|c: char| !c.is_alphanumeric() && c != '_')
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();
        self.risky_keywords
            .iter()
            .filter(|k| words.contains(*k))
            .cloned()
            .collect()
    }

    /// Every trigger that fires; an empty result means SCORE may go
    /// straight to EXECUTE. `lookup` maps a tool name to its declared risk,
    /// `None` meaning the registry does not know it.
    pub fn evaluate<F>(&self, goal: &str, confidence: f64, plan: &Plan, lookup: F) -> Vec<ValidationTrigger>
    where
        F: Fn(&str) -> Option<ToolRisk>,
    {
        let mut triggers = Vec::new();

        if confidence < self.confidence_threshold {
            triggers.push(ValidationTrigger::LowConfidence {
                score: confidence,
                threshold: self.confidence_threshold,
            });
        }

        for step in &plan.steps {
            match lookup(&step.tool_name) {
                Some(ToolRisk::High) => triggers.push(ValidationTrigger::HighRiskTool {
                    tool: step.tool_name.clone(),
                }),
                Some(_) => {}
                None => triggers.push(ValidationTrigger::UnknownTool {
                    tool: step.tool_name.clone(),
                }),
            }
        }

        triggers.extend(
            self.keyword_hits(goal)
                .into_iter()
                .map(|keyword| ValidationTrigger::RiskyKeyword { keyword }),
        );

        triggers
    }
}
