mod dispatch;
mod observability;
mod relay;
mod server;
mod supervisor;

pub use dispatch::*;
pub use observability::*;
pub use relay::*;
pub use server::*;
pub use supervisor::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Environment variable names understood by [`Config::apply_env_overrides`].
pub mod env {
    pub const RELAY_ENABLED: &str = "RELAY_ENABLED";
    pub const RELAY_MAX_RESTART_ATTEMPTS: &str = "RELAY_MAX_RESTART_ATTEMPTS";
    pub const RELAY_MAX_STARTUP_ATTEMPTS: &str = "RELAY_MAX_STARTUP_ATTEMPTS";
    pub const RELAY_INITIAL_BACKOFF_MS: &str = "RELAY_INITIAL_BACKOFF_MS";
    pub const RELAY_MAX_BACKOFF_MS: &str = "RELAY_MAX_BACKOFF_MS";
    pub const RELAY_BACKOFF_FACTOR: &str = "RELAY_BACKOFF_FACTOR";
    pub const RELAY_STARTUP_TIMEOUT_MS: &str = "RELAY_STARTUP_TIMEOUT_MS";
    pub const RELAY_PORT: &str = "RELAY_PORT";
    pub const CALL_DISPATCH_MODE: &str = "CALL_DISPATCH_MODE";
    pub const WEBHOOK_BASE_URL: &str = "WEBHOOK_BASE_URL";

    pub const TWILIO_ACCOUNT_SID: &str = "TWILIO_ACCOUNT_SID";
    pub const TWILIO_AUTH_TOKEN: &str = "TWILIO_AUTH_TOKEN";
    pub const TWILIO_PHONE_NUMBER: &str = "TWILIO_PHONE_NUMBER";
    pub const ELEVENLABS_AGENT_ID: &str = "ELEVENLABS_AGENT_ID";
    pub const ELEVENLABS_API_KEY: &str = "ELEVENLABS_API_KEY";

    /// Port variable read by the relay process itself.
    pub const PORT: &str = "PORT";
}

impl Config {
    /// Overlay environment variables on top of the file/default values.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let sup = &mut self.supervisor;
        override_parsed(&lookup, env::RELAY_ENABLED, &mut sup.enabled);
        override_parsed(&lookup, env::RELAY_MAX_RESTART_ATTEMPTS, &mut sup.max_restart_attempts);
        override_parsed(&lookup, env::RELAY_MAX_STARTUP_ATTEMPTS, &mut sup.max_startup_attempts);
        override_parsed(&lookup, env::RELAY_INITIAL_BACKOFF_MS, &mut sup.initial_backoff_ms);
        override_parsed(&lookup, env::RELAY_MAX_BACKOFF_MS, &mut sup.max_backoff_ms);
        override_parsed(&lookup, env::RELAY_BACKOFF_FACTOR, &mut sup.backoff_factor);
        override_parsed(&lookup, env::RELAY_STARTUP_TIMEOUT_MS, &mut sup.startup_timeout_ms);

        override_parsed(&lookup, env::RELAY_PORT, &mut self.relay.port);
        if let Some(url) = non_empty(&lookup, env::WEBHOOK_BASE_URL) {
            self.relay.webhook_base_url = Some(url);
        }
        self.relay.credentials.overlay(&lookup);

        override_parsed(&lookup, env::CALL_DISPATCH_MODE, &mut self.dispatch.mode);
    }

    /// Convenience wrapper reading the real process environment.
    pub fn apply_process_env(&mut self) {
        self.apply_env_overrides(|k| std::env::var(k).ok());
    }
}

fn non_empty(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    lookup(key)
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = non_empty(lookup, key) else {
        return;
    };
    match raw.parse::<T>() {
        Ok(v) => *slot = v,
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            });
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host", "host must not be empty".into());
        }
        if self.relay.port == 0 {
            push(ConfigSeverity::Error, "relay.port", "port must be greater than 0".into());
        }
        if self.relay.port == self.server.port {
            push(
                ConfigSeverity::Error,
                "relay.port",
                format!("relay port {} collides with server.port", self.relay.port),
            );
        }
        if self.relay.ready_marker.trim().is_empty() {
            push(
                ConfigSeverity::Error,
                "relay.ready_marker",
                "readiness marker must not be empty".into(),
            );
        }

        let sup = &self.supervisor;
        if sup.max_startup_attempts == 0 {
            push(
                ConfigSeverity::Error,
                "supervisor.max_startup_attempts",
                "at least one startup attempt is required".into(),
            );
        }
        if sup.backoff_factor < 1.0 {
            push(
                ConfigSeverity::Error,
                "supervisor.backoff_factor",
                format!("factor {} would shrink delays; use >= 1.0", sup.backoff_factor),
            );
        }
        if sup.initial_backoff_ms > sup.max_backoff_ms {
            push(
                ConfigSeverity::Warning,
                "supervisor.initial_backoff_ms",
                format!(
                    "initial delay {}ms exceeds max delay {}ms; every retry waits the max",
                    sup.initial_backoff_ms, sup.max_backoff_ms
                ),
            );
        }
        if sup.health_timeout_ms >= sup.startup_timeout_ms {
            push(
                ConfigSeverity::Warning,
                "supervisor.health_timeout_ms",
                "health probe timeout should be well below the startup timeout".into(),
            );
        }

        if self.dispatch.mode == DispatchMode::Relay && !sup.enabled {
            push(
                ConfigSeverity::Warning,
                "supervisor.enabled",
                "relay dispatch with the supervisor disabled requires an externally managed relay"
                    .into(),
            );
        }

        let obs = &self.observability;
        if !(0.0..=1.0).contains(&obs.sample_rate) {
            push(
                ConfigSeverity::Warning,
                "observability.sample_rate",
                format!("sample rate {} is outside 0.0..=1.0 and will be clamped", obs.sample_rate),
            );
        }

        let missing = self.relay.credentials.missing();
        if !missing.is_empty() {
            push(
                ConfigSeverity::Warning,
                "relay.credentials",
                format!(
                    "missing {}; calls will fail until they are set",
                    missing.join(", ")
                ),
            );
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn env_overrides_supervisor_numbers() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(lookup(&[
            ("RELAY_MAX_RESTART_ATTEMPTS", "2"),
            ("RELAY_BACKOFF_FACTOR", "1.5"),
            ("RELAY_PORT", "9100"),
            ("RELAY_ENABLED", "false"),
        ]));
        assert_eq!(cfg.supervisor.max_restart_attempts, 2);
        assert!((cfg.supervisor.backoff_factor - 1.5).abs() < f64::EPSILON);
        assert_eq!(cfg.relay.port, 9100);
        assert!(!cfg.supervisor.enabled);
    }

    #[test]
    fn unparseable_override_keeps_default() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(lookup(&[("RELAY_STARTUP_TIMEOUT_MS", "soon")]));
        assert_eq!(cfg.supervisor.startup_timeout_ms, 30_000);
    }

    #[test]
    fn dispatch_mode_override() {
        let mut cfg = Config::default();
        cfg.apply_env_overrides(lookup(&[("CALL_DISPATCH_MODE", "direct")]));
        assert_eq!(cfg.dispatch.mode, DispatchMode::Direct);
    }

    #[test]
    fn default_config_only_warns_about_credentials() {
        let issues = Config::default().validate();
        assert!(issues.iter().all(|i| i.severity == ConfigSeverity::Warning));
        assert!(issues.iter().any(|i| i.field == "relay.credentials"));
    }

    #[test]
    fn port_collision_is_an_error() {
        let mut cfg = Config::default();
        cfg.relay.port = cfg.server.port;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "relay.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn shrinking_factor_is_an_error() {
        let mut cfg = Config::default();
        cfg.supervisor.backoff_factor = 0.5;
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "supervisor.backoff_factor"));
    }

    #[test]
    fn out_of_range_sample_rate_warns() {
        let mut cfg = Config::default();
        cfg.observability.sample_rate = 2.0;
        let issue = cfg
            .validate()
            .into_iter()
            .find(|i| i.field == "observability.sample_rate")
            .unwrap();
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn config_error_display() {
        let e = ConfigError {
            severity: ConfigSeverity::Error,
            field: "relay.port".into(),
            message: "bad".into(),
        };
        assert_eq!(e.to_string(), "[ERROR] relay.port: bad");
    }
}
