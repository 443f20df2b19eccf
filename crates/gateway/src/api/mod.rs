pub mod calls;
pub mod health;
pub mod supervisor;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use cr_calls::CallError;

use crate::relay::{webhook_routes, RelayState};
use crate::state::AppState;

/// Build the control API router.
///
/// In direct mode the provider webhook routes are merged in, since the
/// call tracker lives in this process.
pub fn router(state: &AppState) -> Router<AppState> {
    let api = Router::new()
        .route("/v1/health", get(health::health))
        .route("/v1/calls", post(calls::start_call))
        .route("/v1/calls/:call_sid/transcript", get(calls::transcript))
        .route("/v1/calls/:call_sid/terminate", post(calls::terminate_call))
        .route("/v1/metrics", get(calls::metrics))
        .route("/v1/relay/status", get(supervisor::status))
        .route("/v1/relay/ensure", post(supervisor::ensure));

    match state.direct {
        Some(ref backend) => {
            api.merge(webhook_routes().with_state(RelayState::new(backend.clone())))
        }
        None => api,
    }
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}

/// Map a call error onto its HTTP status. 503 responses also carry the
/// `retrying` flag and operator hints.
fn call_error(e: CallError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    if status != StatusCode::SERVICE_UNAVAILABLE {
        return api_error(status, e.to_string());
    }
    let retrying = matches!(e, CallError::Unavailable { retrying: true, .. });
    (
        status,
        Json(serde_json::json!({
            "error": e.to_string(),
            "retrying": retrying,
            "hints": e.hints(),
        })),
    )
        .into_response()
}
