//! Supervisor error taxonomy.
//!
//! [`SpawnError`] describes why a single spawn attempt failed and decides
//! whether retrying makes sense. [`SupervisorError`] is what
//! `ensure_running` hands back to callers.

use std::path::PathBuf;
use std::time::Duration;

/// Why one spawn attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("relay installation not found at {}", .0.display())]
    RelayNotInstalled(PathBuf),

    #[error("relay executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("relay port {0} is already in use")]
    PortInUse(u16),

    #[error("relay exited before becoming ready (code {code:?}){}", stderr_suffix(.stderr_tail))]
    ExitedBeforeReady {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("relay did not report readiness within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("relay printed its readiness marker but /health never passed")]
    HealthCheckFailed,

    #[error("spawn I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn stderr_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

impl SpawnError {
    /// Configuration problems short-circuit the retry loop.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::RelayNotInstalled(_) | Self::ExecutableNotFound(_)
        )
    }
}

/// Errors surfaced by [`RelaySupervisor`](crate::RelaySupervisor).
#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("relay supervision is disabled")]
    Disabled,

    #[error("relay credentials missing: {}", .0.join(", "))]
    MissingCredentials(Vec<&'static str>),

    #[error("supervisor is shutting down")]
    ShuttingDown,

    #[error("relay failed to start after {attempts} attempt(s): {last}")]
    StartupFailed { attempts: u32, last: SpawnError },

    #[error("relay is misconfigured (attempt {attempts}): {source}")]
    Misconfigured {
        attempts: u32,
        #[source]
        source: SpawnError,
    },
}

impl SupervisorError {
    /// True when retrying cannot help and an operator must fix something.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Disabled | Self::MissingCredentials(_) | Self::Misconfigured { .. }
        )
    }

    /// Spawn attempts made before giving up, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::StartupFailed { attempts, .. } | Self::Misconfigured { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    /// Short, user-facing summary without internal detail.
    pub fn user_message(&self) -> &'static str {
        if self.is_configuration() {
            "Calling service is misconfigured. Contact your administrator."
        } else {
            "Calling service is temporarily unavailable. Please retry shortly."
        }
    }

    /// Operator hints for the API boundary.
    pub fn troubleshooting(&self) -> Vec<String> {
        match self {
            Self::Disabled => vec!["Set RELAY_ENABLED=true to let the gateway manage the relay.".into()],
            Self::MissingCredentials(missing) => missing
                .iter()
                .map(|k| format!("Set the {k} environment variable."))
                .collect(),
            Self::ShuttingDown => vec!["The gateway is shutting down; retry after restart.".into()],
            Self::Misconfigured { source, .. } => match source {
                SpawnError::RelayNotInstalled(dir) => vec![
                    format!("Install the relay into {}.", dir.display()),
                    "Or unset relay.working_dir to run the bundled relay.".into(),
                ],
                SpawnError::ExecutableNotFound(cmd) => vec![
                    format!("Make sure `{cmd}` is installed and on PATH."),
                    "Or unset relay.command to run the bundled relay.".into(),
                ],
                other => vec![other.to_string()],
            },
            Self::StartupFailed { last, .. } => {
                let mut hints = vec![
                    "Check the relay logs for startup errors.".to_string(),
                    "Verify the telephony and voice-agent credentials.".to_string(),
                ];
                if matches!(last, SpawnError::PortInUse(_)) {
                    hints.push("Free the relay port or change RELAY_PORT.".into());
                }
                if matches!(last, SpawnError::ReadinessTimeout(_)) {
                    hints.push("Raise RELAY_STARTUP_TIMEOUT_MS on slow hosts.".into());
                }
                hints
            }
        }
    }
}
