use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Logging and trace export for both halves of callrelay.
///
/// `serve` writes supervisor transitions, restart decisions and dispatch
/// outcomes through `log_filter`, optionally exporting the same spans over
/// OTLP. The relay child logs to stderr with `relay_log_filter` and never
/// exports; its lines reach the collector through the supervisor's
/// `relay stderr` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// OTLP/gRPC collector for `serve`, e.g. `http://localhost:4317`.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default = "d_service_name")]
    pub service_name: String,

    /// Fraction of traces exported. Clamped to `0.0..=1.0` on use.
    #[serde(default = "d_sample_rate")]
    pub sample_rate: f64,

    /// JSON lines from `serve`; `false` for plain text while developing.
    #[serde(default = "d_true")]
    pub json_logs: bool,

    /// `EnvFilter` directives for `serve` when `RUST_LOG` is unset.
    #[serde(default = "d_log_filter")]
    pub log_filter: String,

    /// `EnvFilter` directives for the relay child when `RUST_LOG` is unset.
    #[serde(default = "d_relay_log_filter")]
    pub relay_log_filter: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: d_service_name(),
            sample_rate: d_sample_rate(),
            json_logs: true,
            log_filter: d_log_filter(),
            relay_log_filter: d_relay_log_filter(),
        }
    }
}

impl ObservabilityConfig {
    pub fn sample_ratio(&self) -> f64 {
        if self.sample_rate.is_nan() {
            return 1.0;
        }
        self.sample_rate.clamp(0.0, 1.0)
    }

    /// Collector endpoint, ignoring blank values left by templated configs.
    pub fn otlp_endpoint(&self) -> Option<&str> {
        self.otlp_endpoint
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
    }
}

fn d_service_name() -> String {
    "callrelay".into()
}
fn d_sample_rate() -> f64 {
    1.0
}
fn d_true() -> bool {
    true
}
fn d_log_filter() -> String {
    "info,cr_gateway=debug,cr_supervisor=debug".into()
}
fn d_relay_log_filter() -> String {
    "info".into()
}
