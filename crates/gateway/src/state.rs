use std::sync::Arc;
use std::time::Instant;

use cr_calls::{CallDispatcher, DirectBackend};
use cr_domain::config::Config;
use cr_supervisor::{RelaySupervisor, StartupHook};

/// Shared application state passed to all control API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub supervisor: RelaySupervisor,
    pub dispatcher: CallDispatcher,
    /// Set in direct mode, where the webhook routes live on this server.
    pub direct: Option<Arc<DirectBackend>>,
    pub startup: Arc<StartupHook>,
    pub started_at: Instant,
}
