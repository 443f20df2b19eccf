//! Relay supervision endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use crate::state::AppState;

/// `GET /v1/relay/status` probes the relay's health endpoint.
pub async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.status().await)
}

/// `POST /v1/relay/ensure`: start the relay if it is not running.
pub async fn ensure(State(state): State<AppState>) -> Response {
    match state.supervisor.ensure_running().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            let code = if e.is_configuration() {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::BAD_GATEWAY
            };
            (
                code,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "retrying": !e.is_configuration(),
                    "attempts": e.attempts(),
                    "hints": e.troubleshooting(),
                })),
            )
                .into_response()
        }
    }
}
