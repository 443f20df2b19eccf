//! In-process call backend.
//!
//! Places calls with the telephony client and answers webhooks from the
//! local [`CallTracker`]. The relay process runs this backend behind its
//! HTTP surface; the gateway uses it directly in `direct` mode.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;

use cr_domain::call::{
    CallRequest, CallStarted, CallStatus, MetricsSnapshot, TerminateOutcome, Transcript,
    TranscriptEntry,
};
use cr_domain::config::{DispatchMode, RelayConfig};
use cr_domain::trace::TraceEvent;

use crate::agent::{ElevenLabsClient, VoiceAgentClient};
use crate::backend::CallBackend;
use crate::error::CallError;
use crate::telephony::{EndOutcome, PlaceCall, TelephonyClient, TwilioClient};
use crate::tracker::{CallTracker, StatusUpdate};
use crate::{twiml, validation};

/// Provider clients plus the addresses they need.
#[derive(Clone)]
pub struct ProviderClients {
    pub telephony: Arc<dyn TelephonyClient>,
    pub agent: Arc<dyn VoiceAgentClient>,
    /// Caller id for outbound calls.
    pub from_number: String,
    /// Public base URL for provider webhooks.
    pub webhook_base_url: String,
}

impl ProviderClients {
    /// Build real provider clients. Fails listing every missing credential.
    ///
    /// `local_base_url` is where this process mounts the webhook routes. It
    /// is used when `WEBHOOK_BASE_URL` is unset.
    pub fn from_config(
        relay: &RelayConfig,
        local_base_url: &str,
        timeout: Duration,
    ) -> Result<Self, CallError> {
        let creds = &relay.credentials;
        let missing = creds.missing();
        if !missing.is_empty() {
            return Err(CallError::NotConfigured { missing });
        }

        let telephony =
            TwilioClient::new(&creds.twilio_account_sid, &creds.twilio_auth_token, timeout)?;
        let agent = ElevenLabsClient::new(&creds.agent_id, &creds.agent_api_key, timeout)?;
        let webhook_base_url = match relay.webhook_base_url {
            Some(ref url) => url.trim_end_matches('/').to_owned(),
            None => {
                tracing::warn!(
                    local_base_url,
                    "WEBHOOK_BASE_URL not set, provider webhooks will target the local address"
                );
                local_base_url.trim_end_matches('/').to_owned()
            }
        };

        Ok(Self {
            telephony: Arc::new(telephony),
            agent: Arc::new(agent),
            from_number: creds.twilio_phone_number.clone(),
            webhook_base_url,
        })
    }
}

pub struct DirectBackend {
    tracker: Arc<CallTracker>,
    clients: OnceLock<ProviderClients>,
    /// Used for lazy initialisation when `initialize` was never called.
    base: RelayConfig,
    /// Where this process serves the webhook routes.
    local_base_url: String,
    timeout: Duration,
}

impl DirectBackend {
    pub fn new(tracker: Arc<CallTracker>, base: RelayConfig, timeout: Duration) -> Self {
        Self {
            tracker,
            clients: OnceLock::new(),
            local_base_url: base.local_base_url(),
            base,
            timeout,
        }
    }

    /// Override the webhook fallback address. Defaults to the relay port,
    /// which is right for the relay process itself.
    pub fn with_local_base_url(mut self, url: impl Into<String>) -> Self {
        self.local_base_url = url.into();
        self
    }

    /// Backend with pre-built clients (tests, custom providers).
    pub fn with_clients(tracker: Arc<CallTracker>, clients: ProviderClients) -> Self {
        let backend = Self::new(tracker, RelayConfig::default(), Duration::from_secs(30));
        // A fresh OnceLock is always empty.
        let _ = backend.clients.set(clients);
        backend
    }

    /// One-time initialisation with explicit configuration. Later calls
    /// are ignored.
    pub fn initialize(&self, relay: &RelayConfig) -> Result<(), CallError> {
        if self.clients.get().is_some() {
            tracing::debug!("direct backend already initialised");
            return Ok(());
        }
        let clients = ProviderClients::from_config(relay, &self.local_base_url, self.timeout)?;
        if self.clients.set(clients).is_ok() {
            tracing::info!("direct call backend initialised");
        }
        Ok(())
    }

    /// Initialise from the base config with credentials overlaid from
    /// `lookup`.
    pub fn initialize_from_lookup(
        &self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), CallError> {
        let mut relay = self.base.clone();
        relay.credentials.overlay(&lookup);
        self.initialize(&relay)
    }

    pub fn is_initialized(&self) -> bool {
        self.clients.get().is_some()
    }

    /// Base URL handed to the provider for webhooks, once initialised.
    pub fn webhook_base_url(&self) -> Option<&str> {
        self.clients.get().map(|c| c.webhook_base_url.as_str())
    }

    fn clients(&self) -> Result<&ProviderClients, CallError> {
        if let Some(clients) = self.clients.get() {
            return Ok(clients);
        }
        self.initialize_from_lookup(|k| std::env::var(k).ok())
            .inspect_err(|e| tracing::warn!(error = %e, "direct backend auto-initialisation failed"))?;
        self.clients.get().ok_or_else(|| CallError::NotConfigured {
            missing: self.base.credentials.missing(),
        })
    }

    pub fn tracker(&self) -> &Arc<CallTracker> {
        &self.tracker
    }

    // ── Webhook side ─────────────────────────────────────────────────

    /// Apply a provider status webhook.
    pub fn handle_status(&self, call_sid: &str, raw_status: &str) -> StatusUpdate {
        let status = CallStatus::from_provider(raw_status);
        let update = self.tracker.on_status(call_sid, status);
        tracing::info!(
            call_sid,
            status = %status,
            active_calls = update.active_calls,
            "call status update"
        );
        update
    }

    pub fn append_transcript(
        &self,
        call_sid: &str,
        role: &str,
        text: &str,
        timestamp: Option<chrono::DateTime<chrono::Utc>>,
    ) -> TranscriptEntry {
        self.tracker.append_transcript(call_sid, role, text, timestamp)
    }

    /// TwiML for the provider's instruction fetch. Repeat fetches count as
    /// reconnects.
    pub async fn twiml(&self, request_id: &str) -> Result<String, CallError> {
        let ctx = self.tracker.context(request_id).ok_or_else(|| {
            CallError::InvalidRequest(format!("unknown request id {request_id}"))
        })?;
        if self.tracker.note_twiml_fetch(request_id) {
            tracing::info!(request_id, call_sid = ?ctx.call_sid, "call reconnected");
        }
        let clients = self.clients()?;
        let stream_url = clients.agent.signed_stream_url().await?;
        Ok(twiml::connect_stream(&stream_url, &ctx))
    }
}

#[async_trait]
impl CallBackend for DirectBackend {
    fn mode(&self) -> DispatchMode {
        DispatchMode::Direct
    }

    async fn start_call(&self, req: CallRequest) -> Result<CallStarted, CallError> {
        validation::validate_request(&req)?;
        let clients = self.clients()?;
        let ctx = self.tracker.prepare_call(&req)?;

        let place = PlaceCall {
            to: ctx.to.clone(),
            from: clients.from_number.clone(),
            twiml_url: format!(
                "{}/twilio/twiml?request_id={}",
                clients.webhook_base_url, ctx.request_id
            ),
            status_callback: Some(format!("{}/twilio/status", clients.webhook_base_url)),
        };

        match clients.telephony.place_call(&place).await {
            Ok(placed) => {
                self.tracker.record_started(&ctx.request_id, &placed.call_sid);
                TraceEvent::CallStarted {
                    call_sid: placed.call_sid.clone(),
                    request_id: ctx.request_id.clone(),
                    mode: DispatchMode::Direct.to_string(),
                }
                .emit();
                tracing::info!(
                    call_sid = %placed.call_sid,
                    request_id = %ctx.request_id,
                    "outbound call placed"
                );
                Ok(CallStarted {
                    success: true,
                    call_sid: Some(placed.call_sid),
                    request_id: ctx.request_id,
                    error: None,
                })
            }
            Err(e) => {
                self.tracker.record_failed(&ctx.request_id);
                tracing::warn!(request_id = %ctx.request_id, error = %e, "outbound call failed");
                Err(CallError::from(e))
            }
        }
    }

    async fn transcript(&self, call_sid: &str) -> Result<Transcript, CallError> {
        Ok(self.tracker.transcript(call_sid))
    }

    async fn terminate_call(&self, call_sid: &str) -> Result<TerminateOutcome, CallError> {
        if call_sid.trim().is_empty() {
            return Err(CallError::InvalidRequest("callSid is required".into()));
        }
        if self.tracker.has_ended(call_sid) {
            return Ok(TerminateOutcome::AlreadyEnded);
        }

        let clients = self.clients()?;
        let outcome = clients
            .telephony
            .end_call(call_sid)
            .await
            .map_err(|e| CallError::from(e).with_call_sid(call_sid))?;
        self.tracker.on_status(call_sid, CallStatus::Completed);

        tracing::info!(call_sid, outcome = ?outcome, "call terminated");
        Ok(match outcome {
            EndOutcome::Ended => TerminateOutcome::Terminated,
            EndOutcome::AlreadyEnded => TerminateOutcome::AlreadyEnded,
        })
    }

    async fn metrics(&self) -> Result<MetricsSnapshot, CallError> {
        Ok(self.tracker.metrics())
    }
}
