//! Best-effort relay start at application boot.

use tokio::sync::OnceCell;

use cr_domain::config::{RelayCredentials, SupervisorConfig};

use crate::state::RelayStatus;
use crate::supervisor::RelaySupervisor;

/// What the boot-time start attempt concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    /// Supervision turned off by config.
    Disabled,
    /// Credentials are incomplete; the relay will start lazily once they
    /// are provided and a call comes in.
    MissingCredentials(Vec<&'static str>),
    Running(RelayStatus),
    /// Start failed. The application keeps running.
    Failed { message: String, configuration: bool },
}

/// Runs the supervisor's first `ensure_running` once per process.
#[derive(Debug)]
pub struct StartupHook {
    supervisor: RelaySupervisor,
    enabled: bool,
    missing: Vec<&'static str>,
    outcome: OnceCell<StartupOutcome>,
}

impl StartupHook {
    pub fn new(
        supervisor: RelaySupervisor,
        config: &SupervisorConfig,
        credentials: &RelayCredentials,
    ) -> Self {
        Self {
            supervisor,
            enabled: config.enabled,
            missing: credentials.missing(),
            outcome: OnceCell::new(),
        }
    }

    /// Start the relay if configured to. Never returns an error; every
    /// failure is logged and reported in the outcome. Later calls return
    /// the first call's outcome.
    pub async fn initialize_on_startup(&self) -> StartupOutcome {
        self.outcome.get_or_init(|| self.run()).await.clone()
    }

    /// Outcome of the first run, if it has finished.
    pub fn outcome(&self) -> Option<&StartupOutcome> {
        self.outcome.get()
    }

    async fn run(&self) -> StartupOutcome {
        if !self.enabled {
            tracing::info!("relay supervision disabled, not starting relay");
            return StartupOutcome::Disabled;
        }
        if !self.missing.is_empty() {
            tracing::warn!(
                missing = ?self.missing,
                "relay credentials incomplete, relay will start on first call once configured"
            );
            return StartupOutcome::MissingCredentials(self.missing.clone());
        }

        match self.supervisor.ensure_running().await {
            Ok(status) => {
                tracing::info!(
                    port = status.port,
                    pid = ?status.pid,
                    adopted = status.adopted,
                    "relay started at boot"
                );
                StartupOutcome::Running(status)
            }
            Err(e) => {
                let configuration = e.is_configuration();
                if configuration {
                    tracing::error!(error = %e, hints = ?e.troubleshooting(), "relay misconfigured at boot");
                } else {
                    tracing::warn!(error = %e, "relay failed to start at boot, will retry on first call");
                }
                StartupOutcome::Failed {
                    message: e.to_string(),
                    configuration,
                }
            }
        }
    }
}
