//! History Recorder: archived snapshots of finished requests
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::capability::HistoryRecorder;
use crate::context::{ExecutionContext, OutcomeCounts};
use crate::data_model::{RiskAssessment, StepResult};
use crate::error::HistoryError;
use crate::state::State;

/// Read-only copy of a context at its terminal state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub id: Uuid,
    pub goal: String,
    pub state: State,
    pub confidence: f64,
    pub summary: Option<String>,
    pub step_results: Vec<StepResult>,
    pub risk_assessment: Option<RiskAssessment>,
    pub plan_attempt_count: u32,
    pub abort_reason: Option<String>,
    /// blake3 fingerprint of the plan that ran, if any
    pub plan_fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HistorySnapshot {
    pub fn outcome_counts(&self) -> OutcomeCounts {
        OutcomeCounts::from_results(&self.step_results)
    }
}

impl From<&ExecutionContext> for HistorySnapshot {
    fn from(ctx: &ExecutionContext) -> Self {
        let finished_at = ctx
            .transitions()
            .last()
            .map(|entry| entry.entered_at)
            .unwrap_or_else(Utc::now);
        Self {
            id: ctx.id(),
            goal: ctx.goal().to_string(),
            state: ctx.state(),
            confidence: ctx.confidence(),
            summary: ctx.summary().map(str::to_string),
            step_results: ctx.step_results().to_vec(),
            risk_assessment: ctx.risk_assessment().cloned(),
            plan_attempt_count: ctx.plan_attempt_count(),
            abort_reason: ctx.abort_reason().map(str::to_string),
            plan_fingerprint: ctx.plan().map(|plan| plan.fingerprint()),
            created_at: ctx.created_at(),
            finished_at,
        }
    }
}

/// One archived request as the Planner sees it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMemo {
    pub goal: String,
    pub state: State,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Tools that ran, in step order
    #[serde(default)]
    pub tools: Vec<String>,
    pub succeeded: usize,
    pub failed: usize,
}

impl From<&HistorySnapshot> for ExecutionMemo {
    fn from(snapshot: &HistorySnapshot) -> Self {
        let counts = snapshot.outcome_counts();
        Self {
            goal: snapshot.goal.clone(),
            state: snapshot.state,
            confidence: snapshot.confidence,
            summary: snapshot.summary.clone(),
            tools: snapshot.step_results.iter().map(|r| r.tool.clone()).collect(),
            succeeded: counts.succeeded,
            failed: counts.failed,
        }
    }
}

/// Memory handed to the Planner with every plan request: recent outcomes,
/// curated safety rules and the tool sequences that fully worked before
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    /// Newest first
    #[serde(default)]
    pub recent_executions: Vec<ExecutionMemo>,
    #[serde(default)]
    pub safety_rules: Vec<String>,
    #[serde(default)]
    pub known_patterns: Vec<String>,
}

impl MemoryContext {
    /// Recall the newest `depth` snapshots of `archive` (oldest first, as
    /// [`HistoryRecorder::read_all`] returns them)
    pub fn recall(archive: &[HistorySnapshot], depth: usize, safety_rules: &[String]) -> Self {
        let recent: Vec<&HistorySnapshot> = archive.iter().rev().take(depth).collect();
        let known_patterns = recent
            .iter()
            .filter(|s| s.state == State::Complete && !s.step_results.is_empty())
            .filter(|s| s.step_results.iter().all(|r| r.status.is_success()))
            .map(|s| {
                let tools: Vec<&str> = s.step_results.iter().map(|r| r.tool.as_str()).collect();
                format!("\"{}\" solved with {}", s.goal, tools.join(" -> "))
            })
            .collect();
        Self {
            recent_executions: recent.into_iter().map(ExecutionMemo::from).collect(),
            safety_rules: safety_rules.to_vec(),
            known_patterns,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.recent_executions.is_empty() && self.safety_rules.is_empty() && self.known_patterns.is_empty()
    }

    /// Most recent archived outcome for `goal`, compared case-insensitively
    pub fn last_outcome_of(&self, goal: &str) -> Option<&ExecutionMemo> {
        let goal = goal.trim().to_lowercase();
        self.recent_executions
            .iter()
            .find(|m| m.goal.trim().to_lowercase() == goal)
    }
}

/// Bounded in-process recorder; the oldest snapshot is dropped when full
pub struct InMemoryHistory {
    capacity: usize,
    entries: RwLock<VecDeque<HistorySnapshot>>,
}

impl InMemoryHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: RwLock::new(VecDeque::new()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Most recent `limit` snapshots, newest first
    pub async fn recent(&self, limit: usize) -> Vec<HistorySnapshot> {
        self.entries
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl HistoryRecorder for InMemoryHistory {
    async fn append(&self, snapshot: HistorySnapshot) -> Result<(), HistoryError> {
        if !snapshot.state.is_terminal() {
            return Err(HistoryError(format!(
                "context {} is still in state {}",
                snapshot.id, snapshot.state
            )));
        }
        let mut entries = self.entries.write().await;
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(snapshot);
        Ok(())
    }

    async fn read_all(&self) -> Vec<HistorySnapshot> {
        self.entries.read().await.iter().cloned().collect()
    }
}
