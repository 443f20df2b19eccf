use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tuning for relay startup, health probing, and crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// When false the startup hook does nothing.
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Automatic restarts after a crash before giving up.
    #[serde(default = "d_5")]
    pub max_restart_attempts: u32,
    /// Spawn attempts per startup sequence.
    #[serde(default = "d_3")]
    pub max_startup_attempts: u32,
    #[serde(default = "d_1000")]
    pub initial_backoff_ms: u64,
    #[serde(default = "d_30000")]
    pub max_backoff_ms: u64,
    #[serde(default = "d_factor")]
    pub backoff_factor: f64,
    /// Hard bound on a single spawn attempt (marker + health).
    #[serde(default = "d_30000")]
    pub startup_timeout_ms: u64,
    /// Per-probe timeout for `GET /health`.
    #[serde(default = "d_2000")]
    pub health_timeout_ms: u64,
    #[serde(default = "d_1000")]
    pub health_poll_interval_ms: u64,
    /// Wait before re-probing when the relay port is already bound.
    #[serde(default = "d_2000")]
    pub port_in_use_grace_ms: u64,
    /// How long a terminated relay gets before it is killed.
    #[serde(default = "d_5000")]
    pub shutdown_grace_ms: u64,
    /// Uptime after which a crash no longer counts against the restart budget.
    #[serde(default = "d_3600")]
    pub restart_reset_after_secs: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restart_attempts: 5,
            max_startup_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            backoff_factor: 2.0,
            startup_timeout_ms: 30_000,
            health_timeout_ms: 2000,
            health_poll_interval_ms: 1000,
            port_in_use_grace_ms: 2000,
            shutdown_grace_ms: 5000,
            restart_reset_after_secs: 3600,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_1000() -> u64 {
    1000
}
fn d_2000() -> u64 {
    2000
}
fn d_5000() -> u64 {
    5000
}
fn d_30000() -> u64 {
    30_000
}
fn d_3600() -> u64 {
    3600
}
fn d_factor() -> f64 {
    2.0
}
