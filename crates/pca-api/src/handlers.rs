//! API Handlers
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pca_core::{
    Event, HistorySnapshot, IntentAck, RiskAssessment, State as RunState, StepResult,
    ToolRegistry, PCA_VERSION,
};
use pca_engine::RunReport;

use crate::error::ApiError;
use crate::state::AppState;
use crate::system;

const HISTORY_LIMIT: usize = 20;
const SIMILARITY_LIMIT: usize = 5;

#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub command: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub command: String,
    pub state: RunState,
    pub elapsed_seconds: f64,
    pub events: Vec<Event>,
    pub results: Vec<StepResult>,
    pub summary: Option<String>,
    pub confidence: f64,
    pub cm_response: Option<IntentAck>,
    pub cs_assessment: Option<RiskAssessment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl ExecuteResponse {
    fn from_report(command: String, report: RunReport) -> Self {
        let ctx = &report.context;
        Self {
            command,
            state: ctx.state(),
            elapsed_seconds: (report.elapsed.as_secs_f64() * 100.0).round() / 100.0,
            events: report.events.events().to_vec(),
            results: ctx.step_results().to_vec(),
            summary: ctx.summary().map(str::to_string),
            confidence: ctx.confidence(),
            cm_response: ctx.cm_response().cloned(),
            cs_assessment: ctx.risk_assessment().cloned(),
            abort_reason: ctx.abort_reason().map(str::to_string),
        }
    }
}

pub async fn execute(
    State(state): State<AppState>,
    Json(payload): Json<ExecuteRequest>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let command = payload.command.trim().to_string();
    if command.is_empty() {
        return Err(ApiError::BadRequest("command must not be empty".into()));
    }

    let report = state.orchestrator.process(&command).await;
    state.metrics.observe(&report);
    Ok(Json(ExecuteResponse::from_report(command, report)))
}

pub async fn status(State(state): State<AppState>) -> Json<Value> {
    let config = state.orchestrator.config();
    Json(json!({
        "system": system::snapshot(),
        "agents": {
            "planner": true,
            "risk_assessor": true,
            "tool_registry": true,
            "history": true,
            "router": !state.router.indexed_tools().is_empty(),
            "safety_mode": config.safety_mode,
        },
        "tool_count": state.registry.len(),
    }))
}

pub async fn tools(State(state): State<AppState>) -> Json<Value> {
    let tools = state.registry.list();
    Json(json!({ "count": tools.len(), "tools": tools }))
}

#[derive(Debug, Deserialize)]
pub struct SimilarityQuery {
    pub query: String,
}

pub async fn similarity(
    State(state): State<AppState>,
    Query(params): Query<SimilarityQuery>,
) -> Json<Value> {
    let matches = state.router.scores(&params.query, SIMILARITY_LIMIT);
    Json(json!({ "query": params.query, "matches": matches }))
}

fn history_entry(snapshot: &HistorySnapshot) -> Value {
    json!({
        "id": snapshot.id,
        "timestamp": snapshot.finished_at,
        "request": snapshot.goal,
        "state": snapshot.state,
        "confidence": snapshot.confidence,
        "summary": snapshot.summary,
        "results": snapshot.step_results,
    })
}

pub async fn history(State(state): State<AppState>) -> Json<Value> {
    let entries: Vec<Value> = state
        .history
        .recent(HISTORY_LIMIT)
        .await
        .iter()
        .map(history_entry)
        .collect();
    Json(json!({ "entries": entries }))
}

pub async fn health() -> Json<Value> {
    let now = chrono::Utc::now();
    Json(json!({
        "status": "ok",
        "version": PCA_VERSION,
        "timestamp": now.timestamp_millis() as f64 / 1000.0,
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.encode()?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}
