//! Voice-agent client: hands out the stream URL a call is bridged to.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use cr_domain::error::{Error, Result};
use cr_domain::trace::TraceEvent;

const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";

#[async_trait]
pub trait VoiceAgentClient: Send + Sync {
    /// A short-lived URL the telephony media stream connects to.
    async fn signed_stream_url(&self) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

#[derive(Clone)]
pub struct ElevenLabsClient {
    http: Client,
    base_url: String,
    agent_id: String,
    api_key: String,
}

impl std::fmt::Debug for ElevenLabsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElevenLabsClient")
            .field("base_url", &self.base_url)
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl ElevenLabsClient {
    pub fn new(agent_id: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: ELEVENLABS_API_BASE.to_owned(),
            agent_id: agent_id.to_owned(),
            api_key: api_key.to_owned(),
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }
}

#[async_trait]
impl VoiceAgentClient for ElevenLabsClient {
    async fn signed_stream_url(&self) -> Result<String> {
        let url = format!("{}/v1/convai/conversation/get_signed_url", self.base_url);
        let start = Instant::now();
        let result = self
            .http
            .get(&url)
            .query(&[("agent_id", self.agent_id.as_str())])
            .header("xi-api-key", &self.api_key)
            .send()
            .await;

        let status = result.as_ref().map(|r| r.status().as_u16()).unwrap_or(0);
        TraceEvent::ProviderRequest {
            provider: "elevenlabs".into(),
            endpoint: "GET get_signed_url".into(),
            status,
            duration_ms: start.elapsed().as_millis() as u64,
        }
        .emit();

        let resp = result.map_err(crate::from_reqwest)?;
        if !resp.status().is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Agent(format!("signed URL request returned {status}: {body}")));
        }
        let body: SignedUrlResponse = resp
            .json()
            .await
            .map_err(|e| Error::Agent(format!("failed to parse signed URL response: {e}")))?;
        Ok(body.signed_url)
    }
}
