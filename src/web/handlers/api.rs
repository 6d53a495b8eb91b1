use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::agent::PipelineInput;
use crate::db::executor::DEFAULT_ROW_LIMIT;
use crate::schema::Row;
use crate::util::time::now_iso;
use crate::web::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct ResetRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub role: String,
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct AskResponse {
    pub session_id: String,
    pub reply_text: String,
    pub final_sql: Option<String>,
    pub rows: Vec<Row>,
    pub rowcount: usize,
    pub messages: Vec<Message>,
}

pub async fn health(state: State<Arc<AppState>>) -> impl IntoResponse {
    let uptime = chrono::Utc::now() - state.startup_time;
    Json(json!({ "ok": true, "uptime_seconds": uptime.num_seconds() }))
}

pub async fn ask(
    state: State<Arc<AppState>>,
    Json(payload): Json<AskRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "question must not be empty".to_string()));
    }

    let start_time = Instant::now();
    let session_id = state
        .sessions
        .get_or_create(payload.session_id.as_deref())
        .await;
    let previous_turns = state.sessions.history(&session_id).await;
    info!(
        "Session {}: '{}' ({} prior turns)",
        session_id,
        question,
        previous_turns.len()
    );

    let output = state
        .pipeline
        .run(PipelineInput {
            user_query: question.to_string(),
            now_iso: now_iso(state.timezone),
            timezone: state.timezone.name().to_string(),
            previous_turns,
        })
        .await;

    state
        .sessions
        .replace(&session_id, output.previous_turns)
        .await;

    info!(
        "Session {} answered in {}ms",
        session_id,
        start_time.elapsed().as_millis()
    );

    let messages = vec![
        Message {
            role: "user".to_string(),
            text: question.to_string(),
        },
        Message {
            role: "assistant".to_string(),
            text: output.reply_text.clone(),
        },
    ];

    let mut rows = output.result_rows;
    rows.truncate(DEFAULT_ROW_LIMIT);

    Ok(Json(AskResponse {
        session_id,
        reply_text: output.reply_text,
        final_sql: output.validated_sql,
        rows,
        rowcount: output.rowcount,
        messages,
    }))
}

pub async fn reset(
    state: State<Arc<AppState>>,
    payload: Option<Json<ResetRequest>>,
) -> impl IntoResponse {
    let Json(payload) = payload.unwrap_or_default();
    let session_id = state
        .sessions
        .get_or_create(payload.session_id.as_deref())
        .await;
    state.sessions.reset(&session_id).await;
    info!("Session {} reset", session_id);

    Json(json!({ "session_id": session_id, "ok": true }))
}

pub async fn get_schema(
    state: State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    match state.pipeline.schema_cache().get_schema_snapshot().await {
        Ok(snapshot) => Ok(Json(snapshot)),
        Err(e) => {
            error!("Failed to load schema: {}", e);
            Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
        }
    }
}
