//! Telephony provider client.
//!
//! [`TwilioClient`] speaks the 2010-04-01 Calls REST API with basic auth
//! and form-encoded bodies.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;

use cr_domain::call::CallStatus;
use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;

const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Parameters for placing an outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceCall {
    pub to: String,
    pub from: String,
    /// Where the provider fetches call instructions.
    pub twiml_url: String,
    pub status_callback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacedCall {
    pub call_sid: String,
    pub status: CallStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOutcome {
    Ended,
    /// The provider refused because the call had already finished.
    AlreadyEnded,
}

#[async_trait]
pub trait TelephonyClient: Send + Sync {
    async fn place_call(&self, req: &PlaceCall) -> Result<PlacedCall>;

    /// Hang up `call_sid`. Finishing an already-finished call is not an error.
    async fn end_call(&self, call_sid: &str) -> Result<EndOutcome>;

    async fn call_status(&self, call_sid: &str) -> Result<CallStatus>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Twilio
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<u32>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct TwilioClient {
    http: Client,
    base_url: String,
    account_sid: String,
    auth_token: String,
}

impl std::fmt::Debug for TwilioClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwilioClient")
            .field("base_url", &self.base_url)
            .field("account_sid", &self.account_sid)
            .finish_non_exhaustive()
    }
}

impl TwilioClient {
    pub fn new(account_sid: &str, auth_token: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: TWILIO_API_BASE.to_owned(),
            account_sid: account_sid.to_owned(),
            auth_token: auth_token.to_owned(),
        })
    }

    /// Point the client at another API host (tests, regional edges).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }

    async fn send(&self, endpoint: &str, rb: RequestBuilder) -> Result<Response> {
        let start = Instant::now();
        let result = rb
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let resp = match result {
            Ok(resp) => resp,
            Err(e) => {
                TraceEvent::ProviderRequest {
                    provider: "twilio".into(),
                    endpoint: endpoint.to_owned(),
                    status: 0,
                    duration_ms,
                }
                .emit();
                return Err(crate::from_reqwest(e));
            }
        };

        let status = resp.status();
        TraceEvent::ProviderRequest {
            provider: "twilio".into(),
            endpoint: endpoint.to_owned(),
            status: status.as_u16(),
            duration_ms,
        }
        .emit();

        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
        Err(Error::Telephony {
            status: status.as_u16(),
            code: parsed.code,
            message: parsed
                .message
                .unwrap_or_else(|| format!("{endpoint} returned {status}: {body}")),
        })
    }
}

#[async_trait]
impl TelephonyClient for TwilioClient {
    async fn place_call(&self, req: &PlaceCall) -> Result<PlacedCall> {
        let mut form = vec![
            ("To", req.to.as_str()),
            ("From", req.from.as_str()),
            ("Url", req.twiml_url.as_str()),
        ];
        if let Some(ref cb) = req.status_callback {
            form.push(("StatusCallback", cb.as_str()));
            for event in ["initiated", "ringing", "answered", "completed"] {
                form.push(("StatusCallbackEvent", event));
            }
        }

        let resp = self
            .send("POST Calls", self.http.post(self.calls_url()).form(&form))
            .await?;
        let call: CallResource = resp.json().await.map_err(crate::from_reqwest)?;
        Ok(PlacedCall {
            status: CallStatus::from_provider(&call.status),
            call_sid: call.sid,
        })
    }

    async fn end_call(&self, call_sid: &str) -> Result<EndOutcome> {
        let rb = self
            .http
            .post(self.call_url(call_sid))
            .form(&[("Status", "completed")]);
        let err = match self.send("POST Calls/{sid}", rb).await {
            Ok(_) => return Ok(EndOutcome::Ended),
            Err(err) => err,
        };

        // A 4xx here usually means the call is no longer in progress.
        if let Error::Telephony { status, .. } = &err {
            if (400..500).contains(status) {
                match self.call_status(call_sid).await {
                    Ok(s) if s.is_terminal() => {
                        tracing::debug!(call_sid, status = %s, "call had already ended");
                        return Ok(EndOutcome::AlreadyEnded);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(call_sid, error = %e, "status lookup after failed hangup failed");
                    }
                }
            }
        }
        Err(err)
    }

    async fn call_status(&self, call_sid: &str) -> Result<CallStatus> {
        let resp = self
            .send("GET Calls/{sid}", self.http.get(self.call_url(call_sid)))
            .await?;
        let call: CallResource = resp.json().await.map_err(crate::from_reqwest)?;
        Ok(CallStatus::from_provider(&call.status))
    }
}
