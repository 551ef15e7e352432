//! Optional bearer-token auth for the session endpoints.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::routes::GatewayState;

/// Reject requests without `Authorization: Bearer <token>` when a token is
/// configured.  With no configured token the middleware is a pass-through.
pub async fn auth_middleware(
    State(runtime): State<GatewayState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(expected) = runtime.config.gateway.auth_token.clone() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    if provided == Some(expected.as_str()) {
        return next.run(request).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        axum::Json(json!({
            "success": false,
            "error": { "code": "UNAUTHORIZED", "message": "missing or invalid bearer token" },
            "meta": { "timestamp": chrono::Utc::now().to_rfc3339() },
        })),
    )
        .into_response()
}
