use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::env;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Relay process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything needed to spawn and talk to the relay process.
///
/// Treated as read-only once the supervisor has been built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub credentials: RelayCredentials,
    #[serde(default = "d_relay_port")]
    pub port: u16,
    /// Public base URL the telephony provider uses for webhooks.
    #[serde(default)]
    pub webhook_base_url: Option<String>,
    /// Program to launch. `None` runs this binary with `relay`.
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Relay installation directory. Must exist when set.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Substring on the relay's stdout that signals it is listening.
    #[serde(default = "d_ready_marker")]
    pub ready_marker: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            credentials: RelayCredentials::default(),
            port: d_relay_port(),
            webhook_base_url: None,
            command: None,
            args: Vec::new(),
            working_dir: None,
            ready_marker: d_ready_marker(),
        }
    }
}

impl RelayConfig {
    /// Base URL for talking to the relay on the loopback interface.
    pub fn local_base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Environment handed to the spawned relay.
    pub fn child_env(&self) -> Vec<(String, String)> {
        let c = &self.credentials;
        let mut vars = vec![
            (env::TWILIO_ACCOUNT_SID.to_owned(), c.twilio_account_sid.clone()),
            (env::TWILIO_AUTH_TOKEN.to_owned(), c.twilio_auth_token.clone()),
            (env::TWILIO_PHONE_NUMBER.to_owned(), c.twilio_phone_number.clone()),
            (env::ELEVENLABS_AGENT_ID.to_owned(), c.agent_id.clone()),
            (env::ELEVENLABS_API_KEY.to_owned(), c.agent_api_key.clone()),
            (env::PORT.to_owned(), self.port.to_string()),
        ];
        if let Some(ref url) = self.webhook_base_url {
            vars.push((env::WEBHOOK_BASE_URL.to_owned(), url.clone()));
        }
        vars
    }
}

/// Third-party credentials. Usually supplied via environment variables
/// rather than the config file.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RelayCredentials {
    #[serde(default)]
    pub twilio_account_sid: String,
    #[serde(default)]
    pub twilio_auth_token: String,
    #[serde(default)]
    pub twilio_phone_number: String,
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub agent_api_key: String,
}

impl RelayCredentials {
    /// Read credentials from an environment lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut creds = Self::default();
        creds.overlay(&lookup);
        creds
    }

    /// Read credentials from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Overwrite fields whose lookup value is non-empty.
    pub fn overlay(&mut self, lookup: &impl Fn(&str) -> Option<String>) {
        let slots: [(&str, &mut String); 5] = [
            (env::TWILIO_ACCOUNT_SID, &mut self.twilio_account_sid),
            (env::TWILIO_AUTH_TOKEN, &mut self.twilio_auth_token),
            (env::TWILIO_PHONE_NUMBER, &mut self.twilio_phone_number),
            (env::ELEVENLABS_AGENT_ID, &mut self.agent_id),
            (env::ELEVENLABS_API_KEY, &mut self.agent_api_key),
        ];
        for (key, slot) in slots {
            if let Some(v) = lookup(key).map(|v| v.trim().to_owned()) {
                if !v.is_empty() {
                    *slot = v;
                }
            }
        }
    }

    /// Names of the environment variables whose values are still empty.
    pub fn missing(&self) -> Vec<&'static str> {
        [
            (env::TWILIO_ACCOUNT_SID, &self.twilio_account_sid),
            (env::TWILIO_AUTH_TOKEN, &self.twilio_auth_token),
            (env::TWILIO_PHONE_NUMBER, &self.twilio_phone_number),
            (env::ELEVENLABS_AGENT_ID, &self.agent_id),
            (env::ELEVENLABS_API_KEY, &self.agent_api_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing().is_empty()
    }
}

impl std::fmt::Debug for RelayCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn mask(v: &str) -> &'static str {
            if v.is_empty() {
                "<unset>"
            } else {
                "<redacted>"
            }
        }
        f.debug_struct("RelayCredentials")
            .field("twilio_account_sid", &self.twilio_account_sid)
            .field("twilio_auth_token", &mask(&self.twilio_auth_token))
            .field("twilio_phone_number", &self.twilio_phone_number)
            .field("agent_id", &self.agent_id)
            .field("agent_api_key", &mask(&self.agent_api_key))
            .finish()
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_relay_port() -> u16 {
    8765
}
fn d_ready_marker() -> String {
    "Server listening on".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
