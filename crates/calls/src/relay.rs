//! Relay call backend: forwards call operations to the supervised relay
//! process over HTTP, making sure it is running first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use cr_domain::call::{CallRequest, CallStarted, MetricsSnapshot, TerminateOutcome, Transcript};
use cr_domain::config::DispatchMode;
use cr_domain::trace::TraceEvent;
use cr_supervisor::{RelaySupervisor, SupervisorError};

use crate::backend::CallBackend;
use crate::error::CallError;
use crate::validation;

/// The part of the supervisor the relay backend depends on.
#[async_trait]
pub trait RelayLifecycle: Send + Sync {
    async fn ensure_running(&self) -> Result<(), SupervisorError>;
}

#[async_trait]
impl RelayLifecycle for RelaySupervisor {
    async fn ensure_running(&self) -> Result<(), SupervisorError> {
        RelaySupervisor::ensure_running(self).await.map(|_| ())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TerminateBody<'a> {
    call_sid: &'a str,
}

/// Body of `POST /twilio/terminate_call` responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateResponse {
    pub success: bool,
    pub call_sid: String,
    pub status: TerminateOutcome,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

pub struct RelayBackend {
    http: Client,
    base_url: String,
    lifecycle: Arc<dyn RelayLifecycle>,
}

impl RelayBackend {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        lifecycle: Arc<dyn RelayLifecycle>,
    ) -> Result<Self, CallError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CallError::Network(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
            lifecycle,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// URL with each segment percent-encoded, so ids cannot change the route.
    fn segment_url(&self, segments: &[&str]) -> Result<Url, CallError> {
        segment_url(&self.base_url, segments)
    }

    async fn ensure_relay(&self) -> Result<(), CallError> {
        self.lifecycle.ensure_running().await.map_err(|e| {
            tracing::warn!(error = %e, "relay unavailable");
            CallError::from(e)
        })
    }

    /// Send one request and classify the outcome.
    async fn send(&self, endpoint: &str, rb: RequestBuilder) -> Result<Response, CallError> {
        let start = Instant::now();
        let result = rb.send().await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(resp) => {
                TraceEvent::RelayRequest {
                    endpoint: endpoint.to_owned(),
                    status: resp.status().as_u16(),
                    duration_ms,
                }
                .emit();
                classify(resp).await
            }
            Err(e) => {
                TraceEvent::RelayRequest {
                    endpoint: endpoint.to_owned(),
                    status: 0,
                    duration_ms,
                }
                .emit();
                Err(from_reqwest(e))
            }
        }
    }
}

/// 4xx → `Rejected` with the relay's own message, 504 → `TimedOut`,
/// anything else non-2xx → `Network`.
async fn classify(resp: Response) -> Result<Response, CallError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::GATEWAY_TIMEOUT {
        return Err(CallError::TimedOut);
    }
    let body = resp.text().await.unwrap_or_default();
    let message = error_message(&body, status);
    if status.is_client_error() {
        return Err(CallError::Rejected {
            status: status.as_u16(),
            message,
        });
    }
    Err(CallError::Network(format!("relay returned {status}: {message}")))
}

fn error_message(body: &str, status: StatusCode) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(msg) = parsed.error.or(parsed.message) {
            return msg;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_owned()
    } else {
        trimmed.to_owned()
    }
}

fn segment_url(base: &str, segments: &[&str]) -> Result<Url, CallError> {
    let mut url = Url::parse(base)
        .map_err(|e| CallError::Network(format!("invalid relay url {base}: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| CallError::Network(format!("relay url {base} cannot take a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn from_reqwest(e: reqwest::Error) -> CallError {
    if e.is_timeout() {
        CallError::TimedOut
    } else {
        CallError::Network(e.to_string())
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: Response, what: &str) -> Result<T, CallError> {
    resp.json()
        .await
        .map_err(|e| CallError::Network(format!("invalid {what} response from relay: {e}")))
}

#[async_trait]
impl CallBackend for RelayBackend {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Relay
    }

    async fn start_call(&self, req: CallRequest) -> Result<CallStarted, CallError> {
        // Reject bad input before touching the relay.
        let req = validation::validate_request(&req)?;
        self.ensure_relay().await?;

        let resp = self
            .send(
                "POST /twilio/outbound_call",
                self.http.post(self.url("/twilio/outbound_call")).json(&req),
            )
            .await?;
        let started: CallStarted = decode(resp, "outbound_call").await?;

        if !started.success {
            return Err(CallError::Provider {
                call_sid: started.call_sid,
                code: None,
                message: started
                    .error
                    .unwrap_or_else(|| "relay reported failure".to_owned()),
            });
        }
        if let Some(ref sid) = started.call_sid {
            TraceEvent::CallStarted {
                call_sid: sid.clone(),
                request_id: started.request_id.clone(),
                mode: DispatchMode::Relay.to_string(),
            }
            .emit();
        }
        Ok(started)
    }

    async fn transcript(&self, call_sid: &str) -> Result<Transcript, CallError> {
        self.ensure_relay().await?;
        let resp = self
            .send(
                "GET /transcripts/{callSid}",
                self.http.get(self.segment_url(&["transcripts", call_sid])?),
            )
            .await?;
        decode(resp, "transcript").await
    }

    async fn terminate_call(&self, call_sid: &str) -> Result<TerminateOutcome, CallError> {
        if call_sid.trim().is_empty() {
            return Err(CallError::InvalidRequest("callSid is required".into()));
        }
        self.ensure_relay().await?;
        let resp = self
            .send(
                "POST /twilio/terminate_call",
                self.http
                    .post(self.url("/twilio/terminate_call"))
                    .json(&TerminateBody { call_sid }),
            )
            .await?;
        let body: TerminateResponse = decode(resp, "terminate_call").await?;
        Ok(body.status)
    }

    async fn metrics(&self) -> Result<MetricsSnapshot, CallError> {
        self.ensure_relay().await?;
        let resp = self
            .send("GET /metrics", self.http.get(self.url("/metrics")))
            .await?;
        decode(resp, "metrics").await
    }
}
