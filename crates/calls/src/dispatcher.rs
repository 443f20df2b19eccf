//! Call Dispatch Façade.
//!
//! The backend is chosen once from `dispatch.mode` and never changes.

use std::sync::Arc;
use std::time::Duration;

use cr_domain::call::{CallRequest, CallStarted, MetricsSnapshot, TerminateOutcome, Transcript};
use cr_domain::config::{Config, DispatchMode};
use cr_supervisor::RelaySupervisor;

use crate::backend::CallBackend;
use crate::direct::DirectBackend;
use crate::error::CallError;
use crate::relay::RelayBackend;
use crate::tracker::CallTracker;

/// Entry point for call operations.
#[derive(Clone)]
pub struct CallDispatcher {
    backend: Arc<dyn CallBackend>,
}

impl std::fmt::Debug for CallDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallDispatcher")
            .field("mode", &self.mode())
            .finish()
    }
}

impl CallDispatcher {
    pub fn new(backend: Arc<dyn CallBackend>) -> Self {
        Self { backend }
    }

    pub fn mode(&self) -> DispatchMode {
        self.backend.mode()
    }

    pub async fn start_call(&self, req: CallRequest) -> Result<CallStarted, CallError> {
        let to = req.to.clone();
        let result = self.backend.start_call(req).await;
        if let Err(ref e) = result {
            tracing::warn!(mode = %self.mode(), to = %to, error = %e, "start_call failed");
        }
        result
    }

    pub async fn transcript(&self, call_sid: &str) -> Result<Transcript, CallError> {
        self.backend.transcript(call_sid).await
    }

    pub async fn terminate_call(&self, call_sid: &str) -> Result<TerminateOutcome, CallError> {
        self.backend.terminate_call(call_sid).await
    }

    pub async fn metrics(&self) -> Result<MetricsSnapshot, CallError> {
        self.backend.metrics().await
    }
}

/// The backend picked for this process.
#[derive(Clone)]
pub enum SelectedBackend {
    Direct(Arc<DirectBackend>),
    Relay(Arc<RelayBackend>),
}

impl SelectedBackend {
    pub fn as_backend(&self) -> Arc<dyn CallBackend> {
        match self {
            Self::Direct(b) => b.clone() as Arc<dyn CallBackend>,
            Self::Relay(b) => b.clone() as Arc<dyn CallBackend>,
        }
    }

    /// The in-process backend, when running in direct mode.
    pub fn direct(&self) -> Option<&Arc<DirectBackend>> {
        match self {
            Self::Direct(b) => Some(b),
            Self::Relay(_) => None,
        }
    }
}

/// Build the backend `config.dispatch.mode` asks for.
///
/// | mode     | backend                                       |
/// |----------|-----------------------------------------------|
/// | `direct` | [`DirectBackend`] over a fresh [`CallTracker`] |
/// | `relay`  | [`RelayBackend`] driving `supervisor`          |
///
/// Direct mode initialises eagerly when credentials are complete and
/// otherwise defers to the first call.
pub fn create_backend(
    config: &Config,
    supervisor: &RelaySupervisor,
) -> Result<SelectedBackend, CallError> {
    let timeout = Duration::from_millis(config.dispatch.request_timeout_ms);
    match config.dispatch.mode {
        DispatchMode::Direct => {
            let tracker = Arc::new(CallTracker::new(config.dispatch.retain_completed_calls));
            // Webhooks are mounted on the control API in this mode.
            let backend = DirectBackend::new(tracker, config.relay.clone(), timeout)
                .with_local_base_url(config.server.local_base_url());
            if config.relay.credentials.is_complete() {
                backend.initialize(&config.relay)?;
            } else {
                tracing::warn!(
                    missing = ?config.relay.credentials.missing(),
                    "direct mode without complete credentials, will initialise on first call"
                );
            }
            Ok(SelectedBackend::Direct(Arc::new(backend)))
        }
        DispatchMode::Relay => {
            let backend = RelayBackend::new(
                &config.relay.local_base_url(),
                timeout,
                Arc::new(supervisor.clone()),
            )?;
            Ok(SelectedBackend::Relay(Arc::new(backend)))
        }
    }
}
