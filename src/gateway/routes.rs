//! Session API handlers.
//!
//! Every response is either a success payload or the error envelope
//! `{success: false, error: {code, message, details?}, meta: {timestamp,
//! requestId}}`.  Details are always passed through secret redaction.

use std::{sync::Arc, time::Instant};

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::agent::RunOptions;
use crate::context::ImageRef;
use crate::error::{CoreError, ErrorKind, redact_secrets};
use crate::runtime::Runtime;

pub type GatewayState = Arc<Runtime>;

// ─── Envelope helpers ─────────────────────────────────────────────────────────

fn envelope(code: &str, message: &str, status: u16, details: Option<Value>) -> Response {
    let mut error = json!({ "code": code, "message": message });
    if let Some(mut details) = details {
        redact_secrets(&mut details);
        error["details"] = details;
    }
    let body = json!({
        "success": false,
        "error": error,
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "requestId": uuid::Uuid::new_v4().to_string(),
        },
    });
    (
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        Json(body),
    )
        .into_response()
}

/// Map a [`CoreError`] onto the envelope, with the session-flavored
/// NOT_FOUND code for this API surface.
fn session_error(err: &CoreError) -> Response {
    let code = match err.kind {
        ErrorKind::NotFound => "SESSION_NOT_FOUND",
        _ => err.kind.code(),
    };
    envelope(code, &err.message, err.kind.http_status(), None)
}

// ─── Health ───────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "service": "engram" }))
}

// ─── Session collection ───────────────────────────────────────────────────────

pub async fn list_sessions(State(runtime): State<GatewayState>) -> Response {
    let started = Instant::now();
    match runtime.sessions.list_sessions().await {
        Ok(sessions) => {
            let count = sessions.len();
            Json(json!({
                "sessions": sessions,
                "count": count,
                "currentSession": runtime.sessions.current_session(),
                "processingTime": started.elapsed().as_millis() as u64,
            }))
            .into_response()
        }
        Err(err) => session_error(&err),
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

pub async fn create_session(
    State(runtime): State<GatewayState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Response {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    match runtime
        .sessions
        .create_session(request.session_id.as_deref())
        .await
    {
        Ok(session) => {
            let metadata = session.metadata();
            (
                StatusCode::CREATED,
                Json(json!({
                    "session": { "id": metadata.session_id, "createdAt": metadata.created_at },
                    "created": true,
                })),
            )
                .into_response()
        }
        Err(err) => session_error(&err),
    }
}

// ─── Single session ───────────────────────────────────────────────────────────

pub async fn current_session(State(runtime): State<GatewayState>) -> Response {
    let Some(id) = runtime.sessions.current_session() else {
        return session_error(&CoreError::not_found("no current session"));
    };
    match runtime.sessions.session_metadata(&id).await {
        Ok(metadata) => Json(json!({
            "sessionId": id,
            "metadata": metadata,
            "isCurrent": true,
        }))
        .into_response(),
        Err(err) => session_error(&err),
    }
}

pub async fn get_session(
    State(runtime): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match runtime.sessions.session_metadata(&id).await {
        Ok(metadata) => {
            let is_current =
                runtime.sessions.current_session().as_deref() == Some(metadata.session_id.as_str());
            Json(json!({
                "sessionId": metadata.session_id,
                "metadata": metadata,
                "isCurrent": is_current,
            }))
            .into_response()
        }
        Err(err) => session_error(&err),
    }
}

pub async fn load_session(
    State(runtime): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match runtime.sessions.load_session(&id).await {
        Ok(session) => Json(json!({
            "sessionId": session.id,
            "loaded": true,
            "conversationHistory": session.context.raw_messages(),
        }))
        .into_response(),
        Err(err) => session_error(&err),
    }
}

pub async fn session_history(
    State(runtime): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    let started = Instant::now();
    match runtime.sessions.fetch_history(&id).await {
        Ok((history, source)) => {
            let count = history.len();
            Json(json!({
                "sessionId": id,
                "history": history,
                "count": count,
                "source": source.as_str(),
                "processingTime": started.elapsed().as_millis() as u64,
            }))
            .into_response()
        }
        Err(err) => session_error(&err),
    }
}

pub async fn delete_session(
    State(runtime): State<GatewayState>,
    Path(id): Path<String>,
) -> Response {
    match runtime.delete_session(&id).await {
        Ok(successful) => Json(json!({
            "sessionId": id,
            "deleted": true,
            "successful": successful,
        }))
        .into_response(),
        Err(err) => session_error(&err),
    }
}

// ─── Stats ────────────────────────────────────────────────────────────────────

pub async fn session_stats(State(runtime): State<GatewayState>) -> Response {
    Json(runtime.stats()).into_response()
}

// ─── Run ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub message: String,
    #[serde(default)]
    pub image: Option<ImageRef>,
    #[serde(default)]
    pub options: Option<RunOptions>,
}

pub async fn run_session(
    State(runtime): State<GatewayState>,
    Path(id): Path<String>,
    Json(request): Json<RunRequest>,
) -> Response {
    let started = Instant::now();
    let conversation = match runtime.conversation(Some(&id)).await {
        Ok(conversation) => conversation,
        Err(err) => return session_error(&err),
    };

    match conversation
        .run(&request.message, request.image, request.options)
        .await
    {
        Ok(response) => Json(json!({
            "sessionId": conversation.session_id(),
            "response": response,
            "processingTime": started.elapsed().as_millis() as u64,
        }))
        .into_response(),
        Err(err) => match err.kind {
            // LLM timeouts and provider failures surface as 500 with the
            // short message preserved.
            ErrorKind::Timeout | ErrorKind::Provider => {
                envelope("INTERNAL_ERROR", &err.message, 500, None)
            }
            _ => session_error(&err),
        },
    }
}
