//! Orchestrator states and the transition table
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finite-state controller states for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    Idle,
    Negotiate,
    Diagnose,
    Plan,
    Score,
    Validate,
    Execute,
    ErrorRecovery,
    Reporting,
    Learn,
    Complete,
    Aborted,
    Failed,
}

/// Every legal edge, as data. ABORTED is reachable from every non-terminal
/// state except IDLE so a failing handler always has somewhere to go.
pub const TRANSITIONS: &[(State, &[State])] = &[
    (State::Idle, &[State::Negotiate]),
    (State::Negotiate, &[State::Diagnose, State::Idle, State::Aborted]),
    (State::Diagnose, &[State::Plan, State::Aborted]),
    (State::Plan, &[State::Score, State::Aborted]),
    (State::Score, &[State::Execute, State::Validate, State::Aborted]),
    (State::Validate, &[State::Execute, State::Aborted]),
    (
        State::Execute,
        &[State::Reporting, State::ErrorRecovery, State::Aborted],
    ),
    (State::ErrorRecovery, &[State::Reporting, State::Aborted]),
    (State::Reporting, &[State::Learn, State::Aborted]),
    (
        State::Learn,
        &[State::Complete, State::Failed, State::Aborted],
    ),
    (State::Complete, &[]),
    (State::Aborted, &[]),
    (State::Failed, &[]),
];

impl State {
    pub const ALL: [State; 13] = [
        State::Idle,
        State::Negotiate,
        State::Diagnose,
        State::Plan,
        State::Score,
        State::Validate,
        State::Execute,
        State::ErrorRecovery,
        State::Reporting,
        State::Learn,
        State::Complete,
        State::Aborted,
        State::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Complete | State::Aborted | State::Failed)
    }

    /// Legal successors of this state
    pub fn successors(&self) -> &'static [State] {
        TRANSITIONS
            .iter()
            .find(|(from, _)| from == self)
            .map(|(_, to)| *to)
            .unwrap_or(&[])
    }

    pub fn can_transition_to(&self, next: State) -> bool {
        self.successors().contains(&next)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Negotiate => "negotiate",
            State::Diagnose => "diagnose",
            State::Plan => "plan",
            State::Score => "score",
            State::Validate => "validate",
            State::Execute => "execute",
            State::ErrorRecovery => "error_recovery",
            State::Reporting => "reporting",
            State::Learn => "learn",
            State::Complete => "complete",
            State::Aborted => "aborted",
            State::Failed => "failed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
