use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::Form;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use cr_calls::twiml::say_and_hangup;
use cr_calls::{CallBackend, CallError, TerminateResponse};
use cr_domain::call::CallRequest;

use super::RelayState;

/// `{ "error": "<message>" }` with the status the error maps to.
fn relay_error(e: &CallError) -> Response {
    let status = StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut body = serde_json::json!({ "error": e.to_string() });
    if let CallError::Provider {
        call_sid: Some(sid),
        ..
    } = e
    {
        body["callSid"] = serde_json::json!(sid);
    }
    (status, Json(body)).into_response()
}

// ── Health & metrics ────────────────────────────────────────────────

pub async fn health(State(state): State<RelayState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "active_calls": state.backend.tracker().metrics().active_calls,
    }))
}

pub async fn metrics(State(state): State<RelayState>) -> impl IntoResponse {
    Json(state.backend.tracker().metrics())
}

// ── Call operations ─────────────────────────────────────────────────

pub async fn outbound_call(
    State(state): State<RelayState>,
    Json(req): Json<CallRequest>,
) -> Response {
    match state.backend.start_call(req).await {
        Ok(started) => Json(started).into_response(),
        Err(e) => relay_error(&e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateRequest {
    #[serde(default)]
    pub call_sid: String,
}

pub async fn terminate_call(
    State(state): State<RelayState>,
    Json(req): Json<TerminateRequest>,
) -> Response {
    match state.backend.terminate_call(&req.call_sid).await {
        Ok(status) => Json(TerminateResponse {
            success: true,
            call_sid: req.call_sid,
            status,
        })
        .into_response(),
        Err(e) => relay_error(&e),
    }
}

// ── Transcripts ─────────────────────────────────────────────────────

pub async fn get_transcript(
    State(state): State<RelayState>,
    Path(call_sid): Path<String>,
) -> impl IntoResponse {
    Json(state.backend.tracker().transcript(&call_sid))
}

#[derive(Debug, Deserialize)]
pub struct AppendTranscript {
    pub role: String,
    pub text: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

pub async fn append_transcript(
    State(state): State<RelayState>,
    Path(call_sid): Path<String>,
    Json(body): Json<AppendTranscript>,
) -> Response {
    if body.role.trim().is_empty() || body.text.trim().is_empty() {
        return relay_error(&CallError::InvalidRequest(
            "role and text are required".into(),
        ));
    }
    let entry = state
        .backend
        .append_transcript(&call_sid, &body.role, &body.text, body.timestamp);
    (StatusCode::CREATED, Json(entry)).into_response()
}

// ── Provider webhooks ───────────────────────────────────────────────

/// Form fields of a telephony status callback.
#[derive(Debug, Deserialize)]
pub struct StatusCallback {
    #[serde(rename = "CallSid")]
    pub call_sid: String,
    #[serde(rename = "CallStatus")]
    pub call_status: String,
}

pub async fn status_webhook(
    State(state): State<RelayState>,
    Form(cb): Form<StatusCallback>,
) -> StatusCode {
    state.backend.handle_status(&cb.call_sid, &cb.call_status);
    StatusCode::NO_CONTENT
}

#[derive(Debug, Deserialize)]
pub struct TwimlQuery {
    #[serde(default)]
    pub request_id: String,
}

/// Instructions for an answered call. Failures still answer with TwiML so
/// the callee hears a message instead of a provider error tone.
pub async fn twiml(
    State(state): State<RelayState>,
    Query(q): Query<TwimlQuery>,
) -> Response {
    let xml = match state.backend.twiml(&q.request_id).await {
        Ok(xml) => xml,
        Err(e) => {
            tracing::warn!(request_id = %q.request_id, error = %e, "could not build call instructions");
            say_and_hangup("Sorry, this call cannot be connected right now. Goodbye.")
        }
    };
    ([(header::CONTENT_TYPE, "text/xml")], xml).into_response()
}
