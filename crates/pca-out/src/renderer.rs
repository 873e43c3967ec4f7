//! Template rendering
//!
//! Handlebars with HTML escaping off and three helpers:
//! - percent: 0.85 -> "85%"
//! - join: join an array with a separator
//! - default: fall back when a value is missing

use handlebars::{handlebars_helper, Handlebars};
use serde_json::{json, Value};

use pca_core::{IntentAck, OutcomeCounts, Plan, RiskAssessment, Step, StepResult, StepStatus, ToolDescriptor};

use crate::templates::TemplatesFile;
use crate::RenderError;

handlebars_helper!(percent: |value: f64| format!("{}%", (value * 100.0).round() as i64));

handlebars_helper!(join: |items: array, separator: str| {
    items
        .iter()
        .map(|v| v.as_str().map(String::from).unwrap_or_else(|| v.to_string()))
        .collect::<Vec<_>>()
        .join(separator)
});

handlebars_helper!(or_default: |value: Json, fallback: Json| {
    if value.is_null() { fallback.clone() } else { value.clone() }
});

/// Compiled renderer for the summary template set
pub struct SummaryRenderer {
    handlebars: Handlebars<'static>,
    templates: TemplatesFile,
}

impl std::fmt::Debug for SummaryRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SummaryRenderer")
            .field("templates", &self.templates.list_templates())
            .finish()
    }
}

impl SummaryRenderer {
    /// Compile every template in the file
    pub fn new(templates: TemplatesFile) -> Result<Self, RenderError> {
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.register_helper("percent", Box::new(percent));
        handlebars.register_helper("join", Box::new(join));
        handlebars.register_helper("default", Box::new(or_default));

        for (name, template) in &templates.templates {
            handlebars
                .register_template_string(name, &template.template)
                .map_err(|e| RenderError::Template(format!("{}: {}", name, e)))?;
        }

        Ok(Self {
            handlebars,
            templates,
        })
    }

    /// Renderer over the templates compiled into the crate
    pub fn builtin() -> Result<Self, RenderError> {
        Self::new(TemplatesFile::builtin()?)
    }

    /// Built-in templates overlaid with a YAML file
    pub fn with_overrides(path: &str) -> Result<Self, RenderError> {
        let templates = TemplatesFile::builtin()?.merged(TemplatesFile::load(path)?);
        Self::new(templates)
    }

    /// Render a named template with data
    pub fn render(&self, template_name: &str, data: &Value) -> Result<String, RenderError> {
        if self.templates.get(template_name).is_none() {
            return Err(RenderError::UnknownTemplate(template_name.to_string()));
        }
        self.handlebars
            .render(template_name, data)
            .map_err(|e| RenderError::Render(e.to_string()))
    }

    pub fn list_templates(&self) -> Vec<&str> {
        self.templates.list_templates()
    }

    /// Count-based summary of an execution, used when the Planner cannot
    /// summarize. `halt_reason` is set when execution stopped early.
    pub fn execution_summary(
        &self,
        goal: &str,
        results: &[StepResult],
        halt_reason: Option<&str>,
    ) -> String {
        let counts = OutcomeCounts::from_results(results);
        if counts.total == 0 && halt_reason.is_none() {
            return self
                .render("nothing_to_do", &json!({ "goal": goal }))
                .unwrap_or_else(|_| format!("Nothing to run for \"{}\".", goal));
        }

        let skipped_tools: Vec<&str> = results
            .iter()
            .filter(|r| r.status == StepStatus::Skipped)
            .map(|r| r.tool.as_str())
            .collect();
        let data = json!({
            "goal": goal,
            "total": counts.total,
            "succeeded": counts.succeeded,
            "skipped": counts.skipped,
            "failed": counts.failed,
            "skipped_tools": skipped_tools,
            "reason": halt_reason,
        });
        let template = if halt_reason.is_some() {
            "execution_halted"
        } else {
            "execution_complete"
        };
        self.render(template, &data).unwrap_or_else(|_| {
            format!(
                "{}: {} of {} steps succeeded, {} skipped, {} failed.",
                goal, counts.succeeded, counts.total, counts.skipped, counts.failed
            )
        })
    }

    /// "I could not complete this safely because ..."
    pub fn abort_explanation(&self, reason: &str) -> String {
        self.render("aborted", &json!({ "reason": reason }))
            .unwrap_or_else(|_| format!("I could not complete this safely because {}.", reason))
    }

    /// Acknowledgement for a goal; `risky` mentions the risk review
    pub fn acknowledgement(&self, goal: &str, risky: bool) -> IntentAck {
        let reply = self
            .render("intent_ack", &json!({ "goal": goal }))
            .unwrap_or_else(|_| format!("Understood: {}", goal));
        let explanation = self
            .render("intent_explanation", &json!({ "risky": risky }))
            .unwrap_or_default();
        IntentAck::confirmed(reply, explanation)
    }

    /// Prompt text for a plan awaiting confirmation
    pub fn plan_review(&self, plan: &Plan, assessment: &RiskAssessment) -> String {
        let data = json!({
            "risk_level": assessment.risk_level,
            "confidence": plan.confidence,
            "concerns": assessment.concerns,
        });
        self.render("plan_review", &data)
            .unwrap_or_else(|_| format!("Plan risk is {}. Proceed?", assessment.risk_level))
    }

    /// Prompt text for a step awaiting permission
    pub fn permission_prompt(&self, step: &Step, tool: &ToolDescriptor) -> String {
        let data = json!({
            "step_id": step.step_id,
            "tool": tool.name,
            "risk": tool.risk_level,
        });
        self.render("permission_prompt", &data)
            .unwrap_or_else(|_| format!("Allow {}?", tool.name))
    }
}
