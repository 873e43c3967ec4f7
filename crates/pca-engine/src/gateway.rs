//! Plan Generation Gateway
//!
//! The only path by which plans and summaries enter the engine. Whatever the
//! Planner returns is checked here before the state machine sees it.

use std::sync::Arc;

use pca_core::{GenerationError, Plan, PlanRequest, Planner, StepResult};

use crate::placeholder::references;

#[derive(Clone)]
pub struct PlanGateway {
    planner: Arc<dyn Planner>,
}

impl PlanGateway {
    pub fn new(planner: Arc<dyn Planner>) -> Self {
        Self { planner }
    }

    /// Ask for a candidate plan. The plan must validate and every
    /// `{{stepN.field}}` must point at a step that runs earlier; its
    /// confidence is clamped into `[0, 1]`.
    #[tracing::instrument(skip(self, request), fields(goal = %request.goal, constraints = request.constraints.len()))]
    pub async fn generate(&self, request: &PlanRequest) -> Result<Plan, GenerationError> {
        let mut plan = self.planner.generate(request).await?;
        plan.validate()?;
        check_references(&plan)?;
        plan.confidence = plan.confidence.clamp(0.0, 1.0);
        tracing::info!(
            steps = plan.steps.len(),
            confidence = plan.confidence,
            "plan generated"
        );
        Ok(plan)
    }

    pub async fn summarize(
        &self,
        goal: &str,
        plan: &Plan,
        results: &[StepResult],
    ) -> Result<String, GenerationError> {
        let summary = self.planner.summarize(goal, plan, results).await?;
        if summary.trim().is_empty() {
            return Err(GenerationError::new("planner returned an empty summary"));
        }
        Ok(summary)
    }
}

fn check_references(plan: &Plan) -> Result<(), GenerationError> {
    for step in &plan.steps {
        for (target, path) in references(step) {
            let earlier = target < step.step_id && plan.steps.iter().any(|s| s.step_id == target);
            if !earlier {
                return Err(GenerationError::new(format!(
                    "step {} references step{}.{} which does not run before it",
                    step.step_id, target, path
                )));
            }
        }
    }
    Ok(())
}

impl std::fmt::Debug for PlanGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanGateway").finish_non_exhaustive()
    }
}
