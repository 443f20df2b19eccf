//! Call operations, forwarded to the dispatch façade.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};

use cr_calls::TerminateResponse;
use cr_domain::call::CallRequest;

use super::call_error;
use crate::state::AppState;

/// `POST /v1/calls`
pub async fn start_call(State(state): State<AppState>, Json(req): Json<CallRequest>) -> Response {
    match state.dispatcher.start_call(req).await {
        Ok(started) => Json(started).into_response(),
        Err(e) => call_error(e),
    }
}

/// `GET /v1/calls/:call_sid/transcript`
pub async fn transcript(
    State(state): State<AppState>,
    Path(call_sid): Path<String>,
) -> Response {
    match state.dispatcher.transcript(&call_sid).await {
        Ok(t) => Json(t).into_response(),
        Err(e) => call_error(e),
    }
}

/// `POST /v1/calls/:call_sid/terminate`
pub async fn terminate_call(
    State(state): State<AppState>,
    Path(call_sid): Path<String>,
) -> Response {
    match state.dispatcher.terminate_call(&call_sid).await {
        Ok(status) => Json(TerminateResponse {
            success: true,
            call_sid,
            status,
        })
        .into_response(),
        Err(e) => call_error(e),
    }
}

/// `GET /v1/metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.dispatcher.metrics().await {
        Ok(m) => Json(m).into_response(),
        Err(e) => call_error(e),
    }
}
