//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::broadcast::error::RecvError;

use cr_calls::{create_backend, CallDispatcher};
use cr_domain::config::{Config, ConfigSeverity};
use cr_supervisor::{RelaySupervisor, StartupHook, StartupOutcome, SupervisorEvent};

use crate::state::AppState;

/// Validate config, build the supervisor and the call backend, and return
/// a fully-wired [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    check_config(&config)?;

    let supervisor = RelaySupervisor::from_config(&config.relay, &config.supervisor)
        .context("resolving relay launch command")?;
    with_supervisor(config, supervisor)
}

/// Wire the state around an existing supervisor.
pub fn with_supervisor(config: Arc<Config>, supervisor: RelaySupervisor) -> anyhow::Result<AppState> {
    let selected = create_backend(&config, &supervisor).context("creating call backend")?;
    let dispatcher = CallDispatcher::new(selected.as_backend());
    tracing::info!(mode = %dispatcher.mode(), "call dispatch mode selected");

    let startup = Arc::new(StartupHook::new(
        supervisor.clone(),
        &config.supervisor,
        &config.relay.credentials,
    ));

    Ok(AppState {
        direct: selected.direct().cloned(),
        config,
        supervisor,
        dispatcher,
        startup,
        started_at: Instant::now(),
    })
}

fn check_config(config: &Config) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    let errors = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("config validation failed with {errors} error(s)");
    }
    Ok(())
}

/// Spawn the boot-time relay start and the supervisor event logger.
///
/// Neither blocks the server from accepting requests.
pub fn spawn_background_tasks(state: &AppState) {
    if state.dispatcher.mode() == cr_domain::config::DispatchMode::Relay {
        let startup = state.startup.clone();
        tokio::spawn(async move {
            match startup.initialize_on_startup().await {
                StartupOutcome::Failed {
                    message,
                    configuration,
                } => {
                    tracing::warn!(%message, configuration, "relay not available at boot");
                }
                outcome => tracing::debug!(?outcome, "startup hook finished"),
            }
        });
    } else {
        tracing::info!("direct dispatch mode, relay process not started");
    }

    let mut events = state.supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SupervisorEvent::RestartsExhausted { attempts }) => {
                    tracing::error!(attempts, "relay restart budget exhausted, calls will fail until the relay is started");
                }
                Ok(event) => tracing::debug!(?event, "supervisor event"),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "supervisor event observer lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });
}
