//! Risk Validation Loop
//!
//! One iteration assesses the current candidate and either approves it,
//! asks the gateway for a constrained replacement, or gives up. The caller
//! owns the context and the attempt counter, so every candidate and every
//! assessment is recorded by the state machine before the next iteration.

use std::sync::Arc;

use pca_core::{
    AssessmentError, AssessmentFallback, OrchestrationError, Plan, PlanRequest, Recommendation,
    RiskAssessment, RiskAssessor, RiskLevel,
};

use crate::gateway::PlanGateway;

/// What the loop decided for the current candidate
#[derive(Debug, Clone, PartialEq)]
pub enum LoopOutcome {
    /// Run it; confirm with the user first when asked to
    Approved { requires_confirmation: bool },
    /// Assess this replacement next
    Regenerated(Plan),
    /// Attempt budget spent without approval
    Exhausted(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Iteration {
    pub assessment: RiskAssessment,
    /// The assessor failed and a synthetic HIGH assessment stands in
    pub fallback: bool,
    pub outcome: LoopOutcome,
}

/// Inputs for one iteration
#[derive(Debug, Clone, Copy)]
pub struct Attempt<'a> {
    pub goal: &'a str,
    pub plan: &'a Plan,
    /// 1-based number of this assessment
    pub number: u32,
    pub max: u32,
}

pub struct RiskValidationLoop {
    assessor: Arc<dyn RiskAssessor>,
    gateway: PlanGateway,
    fallback: AssessmentFallback,
}

impl RiskValidationLoop {
    pub fn new(
        assessor: Arc<dyn RiskAssessor>,
        gateway: PlanGateway,
        fallback: AssessmentFallback,
    ) -> Self {
        Self {
            assessor,
            gateway,
            fallback,
        }
    }

    /// Assessment used when the assessor cannot be reached
    pub fn fallback_assessment(error: &AssessmentError) -> RiskAssessment {
        RiskAssessment::approve(RiskLevel::High)
            .with_concern(format!("risk assessment unavailable: {}", error.0))
    }

    /// Assess `attempt.plan` and decide what happens next. `template` carries
    /// the diagnostics and tool list for a regeneration request.
    #[tracing::instrument(skip(self, attempt, template), fields(number = attempt.number))]
    pub async fn iterate(
        &self,
        attempt: Attempt<'_>,
        template: &PlanRequest,
    ) -> Result<Iteration, OrchestrationError> {
        let (assessment, fallback) = match self.assessor.assess(attempt.plan, attempt.goal).await {
            Ok(assessment) => (assessment, false),
            Err(err) => match self.fallback {
                AssessmentFallback::Abort => {
                    tracing::error!(error = %err, "risk assessor failed, aborting");
                    return Err(err.into());
                }
                AssessmentFallback::RequireConfirmation => {
                    tracing::warn!(error = %err, "risk assessor failed, forcing confirmation");
                    (Self::fallback_assessment(&err), true)
                }
            },
        };

        tracing::info!(
            risk = %assessment.risk_level,
            recommendation = %assessment.recommendation,
            concerns = assessment.concerns.len(),
            "plan assessed"
        );

        let outcome = if assessment.recommendation == Recommendation::Approve {
            LoopOutcome::Approved {
                requires_confirmation: fallback || assessment.risk_level.requires_confirmation(),
            }
        } else if attempt.number < attempt.max {
            let request = PlanRequest {
                goal: attempt.goal.to_string(),
                constraints: assessment.constraints.clone(),
                prior_plan: Some(attempt.plan.clone()),
                ..template.clone()
            };
            LoopOutcome::Regenerated(self.gateway.generate(&request).await?)
        } else {
            LoopOutcome::Exhausted(format!(
                "risk unresolved after {} attempts",
                attempt.number
            ))
        };

        Ok(Iteration {
            assessment,
            fallback,
            outcome,
        })
    }
}

impl std::fmt::Debug for RiskValidationLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RiskValidationLoop")
            .field("fallback", &self.fallback)
            .finish_non_exhaustive()
    }
}
