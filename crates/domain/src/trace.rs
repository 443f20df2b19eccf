use serde::Serialize;

/// Structured trace events emitted across all callrelay crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    RelaySpawned {
        pid: Option<u32>,
        attempt: u32,
        port: u16,
    },
    RelayReady {
        pid: Option<u32>,
        attempt: u32,
        startup_ms: u64,
    },
    RelayAdopted {
        port: u16,
    },
    RelayExited {
        pid: Option<u32>,
        code: Option<i32>,
        uptime_ms: u64,
        restart_count: u32,
    },
    RelayRestartScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    RelayStartupFailed {
        attempts: u32,
        reason: String,
    },
    CallStarted {
        call_sid: String,
        request_id: String,
        mode: String,
    },
    CallStatusChanged {
        call_sid: String,
        status: String,
        active_calls: u64,
    },
    RelayRequest {
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
    ProviderRequest {
        provider: String,
        endpoint: String,
        status: u16,
        duration_ms: u64,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "cr_event");
    }
}
