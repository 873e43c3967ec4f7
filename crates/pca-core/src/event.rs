//! Event stream emitted while a request runs
use serde::{Deserialize, Serialize};

use crate::data_model::{Plan, RiskAssessment, StepResult};
use crate::state::State;

/// One observable event, tagged by `type` on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    State {
        from: State,
        to: State,
    },
    CmResponse {
        reply: String,
        explanation: String,
    },
    Router {
        query: String,
        tool: Option<String>,
        score: f64,
        hit: bool,
    },
    Plan {
        plan: Plan,
    },
    Confidence {
        score: f64,
    },
    RiskAssessment(RiskAssessment),
    StepResult(StepResult),
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::State { .. } => "state",
            Event::CmResponse { .. } => "cm_response",
            Event::Router { .. } => "router",
            Event::Plan { .. } => "plan",
            Event::Confidence { .. } => "confidence",
            Event::RiskAssessment(_) => "risk_assessment",
            Event::StepResult(_) => "step_result",
        }
    }
}

/// Ordered record of emitted events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventLog(Vec<Event>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: Event) {
        tracing::trace!(kind = event.kind(), "event");
        self.0.push(event);
    }

    pub fn events(&self) -> &[Event] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<Event> {
        self.0
    }

    /// Every state the run passed through, starting with the first `from`
    pub fn state_path(&self) -> Vec<State> {
        let mut path = Vec::new();
        for event in &self.0 {
            if let Event::State { from, to } = event {
                if path.is_empty() {
                    path.push(*from);
                }
                path.push(*to);
            }
        }
        path
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.0.iter().filter(move |e| e.kind() == kind)
    }
}
