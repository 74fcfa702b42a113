use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use crate::errors::PipelineError;
use crate::models::{FeedbackStatus, InsightStatus};
use crate::pipeline::{AutoLimits, Pipeline};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub pipeline: Pipeline,
    pub demo_mode: bool,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct IngestUrlRequest {
    pub url: String,
    pub max_items: Option<usize>,
}

#[derive(Deserialize)]
pub struct ApprovalRequest {
    pub insight_id: i64,
    /// "approve" or "reject".
    pub action: String,
    pub comment: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateRepoConfigRequest {
    pub owner: String,
    pub repo: String,
    pub base_branch: Option<String>,
    pub auto_create_tickets: Option<bool>,
    pub auto_create_prs: Option<bool>,
    pub require_approval: Option<bool>,
}

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
    pub status: Option<String>,
}

#[derive(Deserialize)]
pub struct AutoProcessQuery {
    pub entry_limit: Option<i64>,
    pub insight_limit: Option<i64>,
    pub ticket_limit: Option<i64>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InsightNotFound { .. } | PipelineError::FeedbackNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            PipelineError::Validation(_) | PipelineError::NoRepoConfig => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/feedback/ingest-url", post(ingest_url))
        .route("/api/feedback/refresh-scores", post(refresh_scores))
        .route("/api/feedback", get(list_feedback))
        .route("/api/insights/generate", post(generate_insights))
        .route("/api/insights", get(list_insights))
        .route("/api/insights/{id}", get(get_insight))
        .route("/api/insights/{id}/analyze", post(analyze_insight))
        .route("/api/insights/{id}/create-ticket", post(create_ticket))
        .route("/api/insights/{id}/create-pr", post(create_pr))
        .route("/api/insights/{id}/ask-community", post(ask_community))
        .route("/api/insights/{id}/logs", get(get_insight_logs))
        .route("/api/workflows/approve", post(approve_workflow))
        .route("/api/pipeline/auto-process", post(auto_process))
        .route("/api/repo-config", get(get_repo_config).post(create_repo_config))
        .route("/api/stats", get(get_stats))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "demo_mode": state.demo_mode,
    }))
}

async fn ingest_url(
    State(state): State<SharedState>,
    Json(req): Json<IngestUrlRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".into()));
    }
    let report = state
        .pipeline
        .ingest_thread(&req.url, req.max_items.unwrap_or(50))
        .await?;
    Ok(Json(report))
}

async fn refresh_scores(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let refresh = state
        .pipeline
        .refresher
        .refresh(query.limit.unwrap_or(100))
        .await?;
    // Community reply scores poll on the same cadence.
    let community = state.pipeline.gate.poll_community().await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "refresh": refresh,
        "community": community,
    })))
}

async fn list_feedback(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            FeedbackStatus::from_str(raw).map_err(ApiError::BadRequest)?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50);
    let items = state
        .pipeline
        .db
        .call(move |db| db.list_feedback(status, limit))
        .await?;
    Ok(Json(serde_json::json!({
        "count": items.len(),
        "items": items,
    })))
}

async fn generate_insights(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state
        .pipeline
        .grouper
        .run(query.limit.unwrap_or(200))
        .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "entries_processed": report.items_processed,
        "insights_created": report.insights_created,
        "insights_updated": report.insights_updated,
    })))
}

async fn list_insights(
    State(state): State<SharedState>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            InsightStatus::from_str(raw).map_err(ApiError::BadRequest)?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50);
    let insights = state
        .pipeline
        .db
        .call(move |db| db.list_insights(status, limit))
        .await?;
    Ok(Json(serde_json::json!({
        "count": insights.len(),
        "insights": insights,
    })))
}

async fn get_insight(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let insight = state
        .pipeline
        .db
        .call(move |db| db.get_insight(id))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("insight {} not found", id)))?;
    let entries = state
        .pipeline
        .db
        .call(move |db| db.list_feedback_for_insight(id))
        .await?;
    let entry_count = entries.len();
    Ok(Json(serde_json::json!({
        "insight": insight,
        "entries": entries,
        "entry_count": entry_count,
    })))
}

async fn analyze_insight(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.synthesizer.analyze(id).await?;
    Ok(Json(report))
}

async fn create_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.gate.create_ticket(id).await?;
    Ok(Json(report))
}

async fn create_pr(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.gate.create_pr(id).await?;
    Ok(Json(report))
}

async fn ask_community(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.pipeline.gate.ask_community(id).await?;
    Ok(Json(report))
}

async fn get_insight_logs(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Query(query): Query<LimitQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = query.limit.unwrap_or(50);
    let logs = state
        .pipeline
        .db
        .call(move |db| db.list_logs(id, limit))
        .await?;
    Ok(Json(serde_json::json!({
        "count": logs.len(),
        "logs": logs,
    })))
}

async fn approve_workflow(
    State(state): State<SharedState>,
    Json(req): Json<ApprovalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let insight = match req.action.as_str() {
        "approve" => state.pipeline.gate.approve(req.insight_id, req.comment).await?,
        "reject" => state.pipeline.gate.reject(req.insight_id, req.comment).await?,
        other => {
            return Err(ApiError::BadRequest(format!("unknown action: {}", other)));
        }
    };
    Ok(Json(serde_json::json!({
        "success": true,
        "action": req.action,
        "insight": insight,
    })))
}

async fn auto_process(
    State(state): State<SharedState>,
    Query(query): Query<AutoProcessQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let defaults = AutoLimits::default();
    let limits = AutoLimits {
        entry_limit: query.entry_limit.unwrap_or(defaults.entry_limit),
        insight_limit: query.insight_limit.unwrap_or(defaults.insight_limit),
        ticket_limit: query.ticket_limit.unwrap_or(defaults.ticket_limit),
    };
    let report = state.pipeline.auto_process(limits).await?;
    Ok(Json(report))
}

async fn get_repo_config(
    State(state): State<SharedState>,
) -> Result<impl IntoResponse, ApiError> {
    let config = state
        .pipeline
        .db
        .call(|db| db.default_repo_config())
        .await?;
    Ok(Json(serde_json::json!({ "config": config })))
}

async fn create_repo_config(
    State(state): State<SharedState>,
    Json(req): Json<CreateRepoConfigRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.owner.trim().is_empty() || req.repo.trim().is_empty() {
        return Err(ApiError::BadRequest("owner and repo are required".into()));
    }
    let config = state
        .pipeline
        .db
        .call(move |db| {
            db.create_repo_config(
                &req.owner,
                &req.repo,
                req.base_branch.as_deref().unwrap_or("main"),
                req.auto_create_tickets.unwrap_or(false),
                req.auto_create_prs.unwrap_or(false),
                req.require_approval.unwrap_or(true),
            )
        })
        .await?;
    Ok((StatusCode::CREATED, Json(config)))
}

async fn get_stats(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let counts = state.pipeline.db.call(|db| db.status_counts()).await?;
    Ok(Json(counts))
}
