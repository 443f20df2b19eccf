use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/health: lightweight health probe
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Liveness of the gateway itself. Relay state is reported from the last
/// known snapshot and never triggers a probe.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let relay = state.supervisor.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "mode": state.dispatcher.mode(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "relay": {
            "state": relay.state,
            "running": relay.running,
            "restartCount": relay.restart_count,
        },
    }))
}
