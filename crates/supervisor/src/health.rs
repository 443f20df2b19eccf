//! Relay liveness probing.
//!
//! A probe never fails: network errors, timeouts, non-200 responses and
//! unexpected bodies all read as "unhealthy".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::time::Instant;

/// Anything that can answer "is the relay up right now?".
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn is_healthy(&self) -> bool;

    /// Delay between polls in [`wait_until_healthy`](Self::wait_until_healthy).
    fn poll_interval(&self) -> Duration {
        Duration::from_secs(1)
    }

    /// Poll until healthy or `timeout` elapses. Returns `false` on timeout.
    async fn wait_until_healthy(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_healthy().await {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let pause = self.poll_interval().min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    #[serde(default)]
    status: String,
}

/// Probes `GET {base_url}/health` with a short per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpHealthProber {
    http: Client,
    url: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl HttpHealthProber {
    pub fn new(base_url: &str, timeout: Duration, poll_interval: Duration) -> Self {
        // A builder failure only happens when the TLS backend cannot
        // initialise; per-request timeouts still apply on the fallback.
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "health client builder failed, using defaults");
                Client::new()
            });
        Self {
            http,
            url: format!("{}/health", base_url.trim_end_matches('/')),
            timeout,
            poll_interval,
        }
    }

    /// Probe `http://127.0.0.1:{port}/health`.
    pub fn for_port(port: u16, timeout: Duration, poll_interval: Duration) -> Self {
        Self::new(&format!("http://127.0.0.1:{port}"), timeout, poll_interval)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> Result<(), String> {
        let resp = self
            .http
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(format!("status {}", resp.status()));
        }
        let body: HealthBody = resp.json().await.map_err(|e| e.to_string())?;
        match body.status.as_str() {
            "healthy" | "ok" => Ok(()),
            other => Err(format!("reported status {other:?}")),
        }
    }
}

#[async_trait]
impl HealthCheck for HttpHealthProber {
    async fn is_healthy(&self) -> bool {
        // The client timeout already bounds this; the outer timeout also
        // covers slow body reads.
        match tokio::time::timeout(self.timeout, self.probe()).await {
            Ok(Ok(())) => true,
            Ok(Err(reason)) => {
                tracing::debug!(url = %self.url, reason = %reason, "relay health probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(url = %self.url, "relay health probe timed out");
                false
            }
        }
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}
