//! Supervisor state, status snapshots, and observer events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle of the single supervised relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Absent,
    Spawning,
    Healthy,
    /// The relay crashed or failed a probe and a restart is pending.
    Restarting,
    ShuttingDown,
}

/// Read-only view of the supervisor. Cheap to build, never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayStatus {
    pub running: bool,
    pub healthy: bool,
    pub port: u16,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub state: SupervisorState,
    /// The relay was found already running rather than spawned by us.
    pub adopted: bool,
    pub started_at: Option<DateTime<Utc>>,
}

/// Notifications published to [`RelaySupervisor::subscribe`](crate::RelaySupervisor::subscribe) receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorEvent {
    StateChanged {
        from: SupervisorState,
        to: SupervisorState,
    },
    Spawned {
        pid: Option<u32>,
        attempt: u32,
    },
    Ready {
        pid: Option<u32>,
    },
    Adopted {
        port: u16,
    },
    Exited {
        pid: Option<u32>,
        code: Option<i32>,
    },
    RestartScheduled {
        attempt: u32,
        delay: Duration,
    },
    RestartsExhausted {
        attempts: u32,
    },
}
