//! HTTP interface.
//!
//! `GET /` is the first-time initialization trigger: it creates the
//! session-log schema and starts the monitoring pipeline exactly once per
//! process lifetime. The remaining routes expose daemon status, the
//! pending verification question, answer submission, and the session log.

use crate::config::Config;
use crate::engine;
use crate::gate::{PendingQuestion, PromptGate};
use crate::lifecycle::{Lifecycle, StartOutcome};
use crate::store::SessionLogReader;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_LOG_LIMIT: u32 = 20;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub lifecycle: Arc<Lifecycle>,
    pub gate: Arc<PromptGate>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle: Arc::new(Lifecycle::new()),
            gate: Arc::new(PromptGate::new()),
        }
    }
}

/// Build the daemon router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(trigger))
        .route("/status", get(status))
        .route("/question", get(question))
        .route("/answer", post(answer))
        .route("/log", get(log_recent))
}

/// Initialization trigger. Idempotent: the first hit starts the pipeline,
/// later hits report that it is already running.
async fn trigger(State(state): State<AppState>) -> Result<String, (StatusCode, String)> {
    let config = Arc::clone(&state.config);
    let lifecycle = Arc::clone(&state.lifecycle);
    let gate = Arc::clone(&state.gate);

    // Pipeline startup opens the camera and loads models; keep it off the
    // async workers.
    let outcome = tokio::task::spawn_blocking(move || {
        lifecycle.start_with(|| engine::spawn_pipeline(&config, gate))
    })
    .await
    .map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("startup task failed: {e}"),
        )
    })?;

    match outcome {
        Ok(StartOutcome::Started) => {
            Ok("Vigil is running. Camera monitoring and logging active.".to_string())
        }
        Ok(StartOutcome::AlreadyRunning) => Ok("Vigil is already running.".to_string()),
        Err(e) => {
            tracing::error!(error = %e, "pipeline startup failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("pipeline startup failed: {e}"),
            ))
        }
    }
}

async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "pipeline": state.lifecycle.phase().as_str(),
        "camera": state.config.camera.device,
        "pending_question": state.gate.pending().map(|p| p.question),
    }))
}

async fn question(State(state): State<AppState>) -> Json<Option<PendingQuestion>> {
    Json(state.gate.pending())
}

#[derive(Deserialize)]
struct AnswerSubmission {
    id: Uuid,
    answer: String,
}

async fn answer(
    State(state): State<AppState>,
    Json(submission): Json<AnswerSubmission>,
) -> (StatusCode, Json<serde_json::Value>) {
    let accepted = state.gate.submit(submission.id, submission.answer);
    let status = if accepted {
        StatusCode::OK
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(serde_json::json!({ "accepted": accepted })))
}

#[derive(Deserialize)]
struct LogQuery {
    limit: Option<u32>,
}

/// Recent session-log records, newest first. Reads go through a dedicated
/// read-only connection; before first initialization there is no database
/// and the log is simply empty.
async fn log_recent(
    State(state): State<AppState>,
    Query(query): Query<LogQuery>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);

    let records = match SessionLogReader::open(&state.config.store.db_path).await {
        Ok(reader) => reader.recent(limit).await.map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("log read failed: {e}"),
            )
        })?,
        Err(_) => Vec::new(),
    };

    Ok(Json(serde_json::json!({ "records": records })))
}
