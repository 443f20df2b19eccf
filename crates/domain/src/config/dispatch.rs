use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Call dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Fixed at startup; never changes while the process runs.
    #[serde(default)]
    pub mode: DispatchMode,
    /// Timeout for relay HTTP requests.
    #[serde(default = "d_request_timeout")]
    pub request_timeout_ms: u64,
    /// Completed calls whose context and transcript stay in memory.
    #[serde(default = "d_retain")]
    pub retain_completed_calls: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            mode: DispatchMode::default(),
            request_timeout_ms: d_request_timeout(),
            retain_completed_calls: d_retain(),
        }
    }
}

/// Where call operations are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// In-process provider clients.
    Direct,
    /// HTTP calls to the supervised relay process.
    #[default]
    Relay,
}

impl FromStr for DispatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "relay" => Ok(Self::Relay),
            other => Err(format!("unknown dispatch mode: {other}")),
        }
    }
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Direct => "direct",
            Self::Relay => "relay",
        })
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_request_timeout() -> u64 {
    30_000
}
fn d_retain() -> usize {
    1000
}
