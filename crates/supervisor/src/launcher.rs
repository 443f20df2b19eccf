//! Relay process launching.
//!
//! The launcher owns the OS child. Everything the supervisor learns about
//! it (output lines, exit) arrives as [`RelayEvent`]s over an `mpsc`
//! channel, and termination is requested through [`RelayControl`].

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use cr_domain::config::{RelayConfig, SupervisorConfig};

use crate::error::SpawnError;

/// Buffered output lines per relay before the reader applies backpressure.
const EVENT_BUFFER: usize = 256;

/// How long to wait for the output readers after the child exits.
const READER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Launch spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What to run and how.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    pub port: u16,
    /// Time between SIGTERM and SIGKILL on shutdown.
    pub shutdown_grace: Duration,
}

impl LaunchSpec {
    /// Build the spec from config. Without `relay.command`, the current
    /// executable is re-run with the `relay` subcommand.
    pub fn from_config(relay: &RelayConfig, sup: &SupervisorConfig) -> std::io::Result<Self> {
        let (program, args) = match relay.command {
            Some(ref cmd) => (cmd.clone(), relay.args.clone()),
            None => {
                let exe = std::env::current_exe()?;
                (exe.to_string_lossy().into_owned(), vec!["relay".to_owned()])
            }
        };
        Ok(Self {
            program,
            args,
            working_dir: relay.working_dir.clone(),
            env: relay.child_env(),
            port: relay.port,
            shutdown_grace: Duration::from_millis(sup.shutdown_grace_ms),
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events & control
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Something the relay process did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Stdout(String),
    Stderr(String),
    /// Always the last event. `None` when killed by a signal.
    Exited(Option<i32>),
}

/// Shared termination handle for one relay process.
#[derive(Debug, Clone, Default)]
pub struct RelayControl {
    terminate: CancellationToken,
    exited: CancellationToken,
}

impl RelayControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the launcher to stop the process (graceful, then forced).
    pub fn request_terminate(&self) {
        self.terminate.cancel();
    }

    pub fn termination_requested(&self) -> bool {
        self.terminate.is_cancelled()
    }

    /// Resolves once termination has been requested.
    pub async fn terminate_requested(&self) {
        self.terminate.cancelled().await;
    }

    /// Called by launchers once the process is gone.
    pub fn mark_exited(&self) {
        self.exited.cancel();
    }

    pub fn has_exited(&self) -> bool {
        self.exited.is_cancelled()
    }

    pub async fn wait_exited(&self) {
        self.exited.cancelled().await;
    }

    /// Request termination and wait up to `timeout` for the exit.
    /// Returns whether the process is gone.
    pub async fn terminate_and_wait(&self, timeout: Duration) -> bool {
        self.request_terminate();
        tokio::time::timeout(timeout, self.wait_exited()).await.is_ok()
    }
}

/// A freshly started relay.
#[derive(Debug)]
pub struct LaunchedRelay {
    pub pid: Option<u32>,
    pub events: mpsc::Receiver<RelayEvent>,
    pub control: RelayControl,
}

/// Starts relay processes. The seam tests use to fake process behaviour.
#[async_trait]
pub trait RelayLauncher: Send + Sync {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedRelay, SpawnError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// OS process launcher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Launches the relay as a child process via `tokio::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandLauncher;

#[async_trait]
impl RelayLauncher for CommandLauncher {
    async fn launch(&self, spec: &LaunchSpec) -> Result<LaunchedRelay, SpawnError> {
        if let Some(ref dir) = spec.working_dir {
            if !dir.is_dir() {
                return Err(SpawnError::RelayNotInstalled(dir.clone()));
            }
        }

        let mut cmd = tokio::process::Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = spec.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SpawnError::ExecutableNotFound(spec.program.clone())
            } else {
                SpawnError::Io(e)
            }
        })?;

        let pid = child.id();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let control = RelayControl::new();

        let stdout = child.stdout.take().ok_or_else(|| {
            SpawnError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture relay stdout",
            ))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            SpawnError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "failed to capture relay stderr",
            ))
        })?;

        let readers = [
            tokio::spawn(forward_lines(stdout, tx.clone(), RelayEvent::Stdout)),
            tokio::spawn(forward_lines(stderr, tx.clone(), RelayEvent::Stderr)),
        ];
        tokio::spawn(watch_child(
            child,
            pid,
            tx,
            control.clone(),
            spec.shutdown_grace,
            readers,
        ));

        tracing::debug!(pid = ?pid, program = %spec.program, "relay process spawned");

        Ok(LaunchedRelay {
            pid,
            events: rx,
            control,
        })
    }
}

/// Forward each line of `reader` as an event. Keeps draining after the
/// receiver is gone so the child never blocks on a full pipe.
async fn forward_lines<R>(
    reader: R,
    tx: mpsc::Sender<RelayEvent>,
    wrap: fn(String) -> RelayEvent,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !tx.is_closed() {
                    let _ = tx.send(wrap(line)).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "relay output stream closed with error");
                break;
            }
        }
    }
}

async fn watch_child(
    mut child: Child,
    pid: Option<u32>,
    tx: mpsc::Sender<RelayEvent>,
    control: RelayControl,
    grace: Duration,
    readers: [tokio::task::JoinHandle<()>; 2],
) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = control.terminate_requested() => stop_child(&mut child, pid, grace).await,
    };

    // Let trailing output land before the exit event.
    for reader in readers {
        let _ = tokio::time::timeout(READER_DRAIN_TIMEOUT, reader).await;
    }

    let code = match status {
        Ok(s) => s.code(),
        Err(e) => {
            tracing::warn!(pid = ?pid, error = %e, "failed to collect relay exit status");
            None
        }
    };

    control.mark_exited();
    let _ = tx.send(RelayEvent::Exited(code)).await;
}

/// SIGTERM, wait `grace`, then SIGKILL.
async fn stop_child(
    child: &mut Child,
    pid: Option<u32>,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    send_terminate(child, pid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            tracing::warn!(pid = ?pid, grace_ms = grace.as_millis() as u64, "relay ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                tracing::warn!(pid = ?pid, error = %e, "failed to kill relay process");
            }
            child.wait().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child, pid: Option<u32>) {
    match pid {
        Some(pid) => {
            // SAFETY: `kill` has no memory-safety preconditions; the pid
            // belongs to a child we have not reaped yet.
            let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
            if rc != 0 {
                tracing::debug!(pid, "SIGTERM failed, falling back to kill");
                let _ = child.start_kill();
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
