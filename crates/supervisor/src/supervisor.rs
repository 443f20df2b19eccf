//! The relay process supervisor.
//!
//! One [`RelaySupervisor`] per process owns at most one relay child. It
//! starts the relay on demand, adopts an already-running instance when the
//! port answers `/health`, restarts a crashed relay with exponential
//! backoff inside a bounded budget, and tears everything down on shutdown.
//!
//! All state transitions happen under `ensure_lock`, so concurrent callers
//! of [`ensure_running`](RelaySupervisor::ensure_running) share one spawn.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use cr_domain::config::{RelayConfig, SupervisorConfig};
use cr_domain::trace::TraceEvent;

use crate::backoff::{BackoffPolicy, RetryState};
use crate::error::{SpawnError, SupervisorError};
use crate::health::{HealthCheck, HttpHealthProber};
use crate::launcher::{CommandLauncher, LaunchSpec, LaunchedRelay, RelayControl, RelayEvent, RelayLauncher};
use crate::state::{RelayStatus, SupervisorEvent, SupervisorState};

/// Observer channel depth. Slow subscribers see `Lagged`, never block us.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Stderr lines kept for `ExitedBeforeReady` diagnostics.
const STDERR_TAIL_LINES: usize = 5;

/// Extra time on top of the child's own SIGTERM grace before we stop
/// waiting for its exit.
const EXIT_CONFIRM_SLACK: Duration = Duration::from_secs(1);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolved supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub enabled: bool,
    pub port: u16,
    pub ready_marker: String,
    pub max_startup_attempts: u32,
    pub max_restart_attempts: u32,
    pub backoff: BackoffPolicy,
    pub startup_timeout: Duration,
    pub port_in_use_grace: Duration,
    pub shutdown_grace: Duration,
    /// Uptime after which a crash no longer counts against the budget.
    pub restart_reset_after: Duration,
    /// Credential variables that are unset. Spawning is refused while
    /// this is non-empty.
    pub missing_credentials: Vec<&'static str>,
}

impl SupervisorSettings {
    pub fn from_config(relay: &RelayConfig, sup: &SupervisorConfig) -> Self {
        Self {
            enabled: sup.enabled,
            port: relay.port,
            ready_marker: relay.ready_marker.clone(),
            max_startup_attempts: sup.max_startup_attempts.max(1),
            max_restart_attempts: sup.max_restart_attempts,
            backoff: BackoffPolicy::from_config(sup),
            startup_timeout: Duration::from_millis(sup.startup_timeout_ms),
            port_in_use_grace: Duration::from_millis(sup.port_in_use_grace_ms),
            shutdown_grace: Duration::from_millis(sup.shutdown_grace_ms),
            restart_reset_after: Duration::from_secs(sup.restart_reset_after_secs),
            missing_credentials: relay.credentials.missing(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single relay we spawned. Owned exclusively by the supervisor.
#[derive(Debug)]
struct RelayProcessHandle {
    pid: Option<u32>,
    started_at: Instant,
    started_wall: DateTime<Utc>,
    /// Distinguishes this child's exit from that of one we replaced.
    generation: u64,
    control: RelayControl,
}

impl RelayProcessHandle {
    fn is_alive(&self) -> bool {
        !self.control.has_exited()
    }
}

/// A relay that printed its marker and passed `/health`.
struct ReadyRelay {
    pid: Option<u32>,
    events: mpsc::Receiver<RelayEvent>,
    control: RelayControl,
    startup: Duration,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Supervisor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Inner {
    settings: SupervisorSettings,
    spec: LaunchSpec,
    launcher: Arc<dyn RelayLauncher>,
    health: Arc<dyn HealthCheck>,

    handle: Mutex<Option<RelayProcessHandle>>,
    /// Control of a child that is still starting, so shutdown can reach it.
    pending: Mutex<Option<RelayControl>>,
    state: Mutex<SupervisorState>,
    ensure_lock: tokio::sync::Mutex<()>,

    restart_count: AtomicU32,
    generation: AtomicU64,
    adopted: AtomicBool,
    shutting_down: AtomicBool,
    shutdown: CancellationToken,

    events: broadcast::Sender<SupervisorEvent>,
}

/// Cheaply cloneable handle to the process-wide relay supervisor.
#[derive(Clone)]
pub struct RelaySupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RelaySupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySupervisor")
            .field("port", &self.inner.settings.port)
            .field("state", &self.state())
            .finish()
    }
}

impl RelaySupervisor {
    pub fn new(
        settings: SupervisorSettings,
        spec: LaunchSpec,
        launcher: Arc<dyn RelayLauncher>,
        health: Arc<dyn HealthCheck>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                settings,
                spec,
                launcher,
                health,
                handle: Mutex::new(None),
                pending: Mutex::new(None),
                state: Mutex::new(SupervisorState::Absent),
                ensure_lock: tokio::sync::Mutex::new(()),
                restart_count: AtomicU32::new(0),
                generation: AtomicU64::new(0),
                adopted: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                events,
            }),
        }
    }

    /// Supervisor backed by a real child process and an HTTP prober.
    pub fn from_config(relay: &RelayConfig, sup: &SupervisorConfig) -> std::io::Result<Self> {
        let settings = SupervisorSettings::from_config(relay, sup);
        let spec = LaunchSpec::from_config(relay, sup)?;
        let health = HttpHealthProber::for_port(
            relay.port,
            Duration::from_millis(sup.health_timeout_ms),
            Duration::from_millis(sup.health_poll_interval_ms),
        );
        Ok(Self::new(
            settings,
            spec,
            Arc::new(CommandLauncher),
            Arc::new(health),
        ))
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.inner.events.subscribe()
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn port(&self) -> u16 {
        self.inner.settings.port
    }

    pub fn state(&self) -> SupervisorState {
        *self.inner.state.lock()
    }

    pub fn restart_count(&self) -> u32 {
        self.inner.restart_count.load(Ordering::SeqCst)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Status from bookkeeping alone, no network.
    pub fn snapshot(&self) -> RelayStatus {
        let handle = self.inner.handle.lock();
        let state = *self.inner.state.lock();
        let adopted = self.inner.adopted.load(Ordering::SeqCst);
        let live = handle.as_ref().is_some_and(|h| h.is_alive());
        let running = live || adopted;
        RelayStatus {
            running,
            healthy: running && state == SupervisorState::Healthy,
            port: self.inner.settings.port,
            pid: handle.as_ref().and_then(|h| h.pid),
            restart_count: self.restart_count(),
            state,
            adopted,
            started_at: handle.as_ref().map(|h| h.started_wall),
        }
    }

    /// Status with a live health probe. Never fails.
    pub async fn status(&self) -> RelayStatus {
        let mut status = self.snapshot();
        status.healthy = self.inner.health.is_healthy().await;
        status
    }

    pub async fn is_healthy(&self) -> bool {
        self.inner.health.is_healthy().await
    }

    // ── Start ────────────────────────────────────────────────────────

    /// Make sure a healthy relay is listening on the configured port.
    ///
    /// Idempotent: a live healthy relay (ours or adopted) is returned as
    /// is. Otherwise a relay is spawned with bounded retries.
    pub async fn ensure_running(&self) -> Result<RelayStatus, SupervisorError> {
        self.ensure_within(self.inner.settings.max_startup_attempts).await
    }

    /// `ensure_running` with at most `max_attempts` spawns. Crash recovery
    /// passes 1 so each restart slot is a single spawn.
    async fn ensure_within(&self, max_attempts: u32) -> Result<RelayStatus, SupervisorError> {
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }
        let _guard = self.inner.ensure_lock.lock().await;
        if self.is_shutting_down() {
            return Err(SupervisorError::ShuttingDown);
        }

        let live = {
            let mut slot = self.inner.handle.lock();
            match slot.as_ref() {
                Some(h) if h.is_alive() => true,
                Some(_) => {
                    // Exited but the monitor has not caught up; forget it so
                    // the late exit is treated as stale.
                    slot.take();
                    false
                }
                None => false,
            }
        };

        if live {
            if self.inner.health.is_healthy().await {
                self.set_state(SupervisorState::Healthy);
                return Ok(self.snapshot());
            }
            tracing::warn!(
                port = self.inner.settings.port,
                "relay process is alive but failing health checks, replacing it"
            );
            self.replace_unhealthy().await;
        } else if self.inner.health.is_healthy().await {
            self.adopt();
            return Ok(self.snapshot());
        }

        self.inner.adopted.store(false, Ordering::SeqCst);

        if !self.inner.settings.enabled {
            self.set_state(SupervisorState::Absent);
            return Err(SupervisorError::Disabled);
        }
        if !self.inner.settings.missing_credentials.is_empty() {
            let missing = self.inner.settings.missing_credentials.clone();
            tracing::error!(missing = ?missing, "refusing to spawn relay without credentials");
            self.set_state(SupervisorState::Absent);
            return Err(SupervisorError::MissingCredentials(missing));
        }

        self.start_with_retry(max_attempts).await
    }

    async fn start_with_retry(&self, max_attempts: u32) -> Result<RelayStatus, SupervisorError> {
        let settings = &self.inner.settings;
        let mut retry = RetryState::new();

        loop {
            let attempt = retry.begin_attempt();
            self.set_state(SupervisorState::Spawning);
            tracing::info!(
                attempt,
                max_attempts,
                port = settings.port,
                "starting relay"
            );

            let err = match self.spawn_once(attempt).await {
                Ok(ready) => match self.install(ready, attempt) {
                    Ok(()) => return Ok(self.snapshot()),
                    Err(ready) => {
                        ready
                            .control
                            .terminate_and_wait(settings.shutdown_grace + EXIT_CONFIRM_SLACK)
                            .await;
                        return Err(SupervisorError::ShuttingDown);
                    }
                },
                Err(e) => e,
            };

            if self.is_shutting_down() {
                return Err(SupervisorError::ShuttingDown);
            }

            if let SpawnError::PortInUse(port) = &err {
                tracing::warn!(
                    port = *port,
                    grace_ms = settings.port_in_use_grace.as_millis() as u64,
                    "relay port already bound, re-probing for an existing instance"
                );
                if !self.sleep_unless_shutdown(settings.port_in_use_grace).await {
                    return Err(SupervisorError::ShuttingDown);
                }
                if self.inner.health.is_healthy().await {
                    self.adopt();
                    return Ok(self.snapshot());
                }
            }

            if !err.is_retryable() {
                tracing::error!(attempt, error = %err, "relay cannot be started, not retrying");
                self.fail_startup(attempt, &err);
                return Err(SupervisorError::Misconfigured {
                    attempts: attempt,
                    source: err,
                });
            }

            if retry.exhausted(max_attempts) {
                tracing::error!(attempts = attempt, error = %err, "relay startup attempts exhausted");
                self.fail_startup(attempt, &err);
                return Err(SupervisorError::StartupFailed {
                    attempts: attempt,
                    last: err,
                });
            }

            let delay = settings.backoff.delay_for_attempt(attempt);
            retry.record_delay(delay);
            tracing::warn!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "relay startup attempt failed, retrying"
            );
            if !self.sleep_unless_shutdown(delay).await {
                return Err(SupervisorError::ShuttingDown);
            }
        }
    }

    /// One launch: wait for the readiness marker, then for `/health`, all
    /// within `startup_timeout`. On failure the child is terminated.
    async fn spawn_once(&self, attempt: u32) -> Result<ReadyRelay, SpawnError> {
        let settings = &self.inner.settings;
        let started = Instant::now();

        let LaunchedRelay {
            pid,
            mut events,
            control,
        } = self.inner.launcher.launch(&self.inner.spec).await?;

        *self.inner.pending.lock() = Some(control.clone());
        if self.is_shutting_down() {
            control.request_terminate();
        }

        TraceEvent::RelaySpawned {
            pid,
            attempt,
            port: settings.port,
        }
        .emit();
        let _ = self.inner.events.send(SupervisorEvent::Spawned { pid, attempt });

        let timeout = settings.startup_timeout;
        let readiness = async {
            self.await_marker(&mut events, pid).await?;
            let remaining = timeout.saturating_sub(started.elapsed());
            tokio::select! {
                healthy = self.inner.health.wait_until_healthy(remaining) => {
                    if healthy { Ok(()) } else { Err(SpawnError::HealthCheckFailed) }
                }
                code = wait_for_exit(&mut events, pid) => Err(SpawnError::ExitedBeforeReady {
                    code,
                    stderr_tail: String::new(),
                }),
            }
        };
        let outcome = tokio::time::timeout(timeout, readiness)
            .await
            .unwrap_or(Err(SpawnError::ReadinessTimeout(timeout)));

        self.inner.pending.lock().take();

        match outcome {
            Ok(()) => Ok(ReadyRelay {
                pid,
                events,
                control,
                startup: started.elapsed(),
            }),
            Err(err) => {
                if !control.has_exited() {
                    tracing::debug!(pid = ?pid, error = %err, "terminating relay that failed to start");
                    if !control
                        .terminate_and_wait(settings.shutdown_grace + EXIT_CONFIRM_SLACK)
                        .await
                    {
                        tracing::warn!(pid = ?pid, "failed relay did not confirm exit");
                    }
                }
                Err(err)
            }
        }
    }

    /// Read output until the readiness marker shows up.
    async fn await_marker(
        &self,
        events: &mut mpsc::Receiver<RelayEvent>,
        pid: Option<u32>,
    ) -> Result<(), SpawnError> {
        let marker = self.inner.settings.ready_marker.as_str();
        let mut stderr_tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);

        while let Some(event) = events.recv().await {
            match event {
                RelayEvent::Stdout(line) => {
                    tracing::debug!(pid = ?pid, line = %line, "relay stdout");
                    if line.contains(marker) {
                        return Ok(());
                    }
                }
                RelayEvent::Stderr(line) => {
                    tracing::debug!(pid = ?pid, line = %line, "relay stderr");
                    if is_port_in_use(&line) {
                        return Err(SpawnError::PortInUse(self.inner.settings.port));
                    }
                    if stderr_tail.len() == STDERR_TAIL_LINES {
                        stderr_tail.pop_front();
                    }
                    stderr_tail.push_back(line);
                }
                RelayEvent::Exited(code) => {
                    return Err(SpawnError::ExitedBeforeReady {
                        code,
                        stderr_tail: join_tail(&stderr_tail),
                    });
                }
            }
        }

        Err(SpawnError::ExitedBeforeReady {
            code: None,
            stderr_tail: join_tail(&stderr_tail),
        })
    }

    /// Store the ready relay as the live handle. Hands it back if shutdown
    /// has begun; the flag is checked under the handle lock, which
    /// `shutdown` also holds while raising it.
    fn install(&self, ready: ReadyRelay, attempt: u32) -> Result<(), ReadyRelay> {
        let mut slot = self.inner.handle.lock();
        if self.is_shutting_down() {
            return Err(ready);
        }

        let ReadyRelay {
            pid,
            events,
            control,
            startup,
        } = ready;
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;

        *slot = Some(RelayProcessHandle {
            pid,
            started_at: Instant::now(),
            started_wall: Utc::now(),
            generation,
            control,
        });
        self.inner.adopted.store(false, Ordering::SeqCst);
        self.set_state(SupervisorState::Healthy);
        drop(slot);

        TraceEvent::RelayReady {
            pid,
            attempt,
            startup_ms: startup.as_millis() as u64,
        }
        .emit();
        let _ = self.inner.events.send(SupervisorEvent::Ready { pid });
        tracing::info!(pid = ?pid, port = self.inner.settings.port, "relay is ready");

        tokio::spawn(monitor(self.clone(), generation, pid, events));
        Ok(())
    }

    fn adopt(&self) {
        let port = self.inner.settings.port;
        self.inner.adopted.store(true, Ordering::SeqCst);
        self.set_state(SupervisorState::Healthy);
        TraceEvent::RelayAdopted { port }.emit();
        let _ = self.inner.events.send(SupervisorEvent::Adopted { port });
        tracing::info!(port, "healthy relay already listening, adopting it");
    }

    async fn replace_unhealthy(&self) {
        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            let wait = self.inner.settings.shutdown_grace + EXIT_CONFIRM_SLACK;
            if !handle.control.terminate_and_wait(wait).await {
                tracing::warn!(pid = ?handle.pid, "unhealthy relay did not confirm exit");
            }
        }
    }

    fn fail_startup(&self, attempts: u32, err: &SpawnError) {
        self.set_state(SupervisorState::Absent);
        TraceEvent::RelayStartupFailed {
            attempts,
            reason: err.to_string(),
        }
        .emit();
    }

    // ── Crash recovery ───────────────────────────────────────────────

    fn handle_exit(&self, generation: u64, pid: Option<u32>, code: Option<i32>) {
        let handle = {
            let mut slot = self.inner.handle.lock();
            match slot.as_ref() {
                Some(h) if h.generation == generation => slot.take(),
                _ => None,
            }
        };
        let Some(handle) = handle else {
            tracing::debug!(pid = ?pid, "replaced relay exited");
            return;
        };

        let _ = self.inner.events.send(SupervisorEvent::Exited { pid, code });

        if self.is_shutting_down() {
            tracing::info!(pid = ?pid, code = ?code, "relay exited during shutdown");
            return;
        }

        let uptime = handle.started_at.elapsed();
        if uptime >= self.inner.settings.restart_reset_after {
            let previous = self.inner.restart_count.swap(0, Ordering::SeqCst);
            if previous > 0 {
                tracing::info!(previous, "relay ran long enough, restart budget reset");
            }
        }

        TraceEvent::RelayExited {
            pid,
            code,
            uptime_ms: uptime.as_millis() as u64,
            restart_count: self.restart_count(),
        }
        .emit();
        tracing::warn!(
            pid = ?pid,
            code = ?code,
            uptime_ms = uptime.as_millis() as u64,
            "relay exited unexpectedly"
        );

        self.set_state(SupervisorState::Restarting);
        let sup = self.clone();
        tokio::spawn(async move { sup.recover().await });
    }

    async fn recover(&self) {
        let max = self.inner.settings.max_restart_attempts;
        loop {
            if self.is_shutting_down() {
                return;
            }

            let used = self.restart_count();
            if used >= max {
                tracing::error!(
                    attempts = used,
                    "relay restart budget exhausted, manual intervention required"
                );
                self.set_state(SupervisorState::Absent);
                let _ = self
                    .inner
                    .events
                    .send(SupervisorEvent::RestartsExhausted { attempts: used });
                return;
            }

            let attempt = self.inner.restart_count.fetch_add(1, Ordering::SeqCst) + 1;
            let delay = self.inner.settings.backoff.delay_for_attempt(attempt);
            TraceEvent::RelayRestartScheduled {
                attempt,
                delay_ms: delay.as_millis() as u64,
            }
            .emit();
            let _ = self
                .inner
                .events
                .send(SupervisorEvent::RestartScheduled { attempt, delay });
            tracing::info!(
                attempt,
                max_attempts = max,
                delay_ms = delay.as_millis() as u64,
                "scheduling relay restart"
            );

            if !self.sleep_unless_shutdown(delay).await {
                return;
            }

            match self.ensure_within(1).await {
                Ok(status) => {
                    tracing::info!(attempt, pid = ?status.pid, "relay restarted");
                    return;
                }
                Err(SupervisorError::ShuttingDown) => return,
                Err(e) if e.is_configuration() => {
                    tracing::error!(error = %e, "relay restart hit a configuration error, automatic restarts stopped");
                    self.set_state(SupervisorState::Absent);
                    return;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "relay restart failed");
                    self.set_state(SupervisorState::Restarting);
                }
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop the relay and refuse further starts. Safe to call repeatedly.
    pub async fn shutdown(&self) {
        let already = {
            let _slot = self.inner.handle.lock();
            self.inner.shutting_down.swap(true, Ordering::SeqCst)
        };
        if already {
            tracing::debug!("relay supervisor shutdown already requested");
            return;
        }
        tracing::info!("shutting down relay supervisor");
        self.inner.shutdown.cancel();
        self.set_state(SupervisorState::ShuttingDown);

        let pending = self.inner.pending.lock().take();
        if let Some(control) = pending {
            control.request_terminate();
        }

        let handle = self.inner.handle.lock().take();
        if let Some(handle) = handle {
            let wait = self.inner.settings.shutdown_grace + EXIT_CONFIRM_SLACK;
            if handle.control.terminate_and_wait(wait).await {
                tracing::info!(pid = ?handle.pid, "relay stopped");
            } else {
                tracing::warn!(pid = ?handle.pid, "relay did not confirm exit before shutdown deadline");
            }
        }

        self.inner.adopted.store(false, Ordering::SeqCst);
        self.set_state(SupervisorState::Absent);
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn set_state(&self, to: SupervisorState) {
        let from = std::mem::replace(&mut *self.inner.state.lock(), to);
        if from != to {
            tracing::debug!(from = ?from, to = ?to, "relay supervisor state changed");
            let _ = self
                .inner
                .events
                .send(SupervisorEvent::StateChanged { from, to });
        }
    }

    /// Returns `false` if shutdown interrupted the sleep.
    async fn sleep_unless_shutdown(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.inner.shutdown.cancelled() => false,
        }
    }
}

/// Log relay output for the lifetime of the child, then report its exit.
async fn monitor(
    sup: RelaySupervisor,
    generation: u64,
    pid: Option<u32>,
    mut events: mpsc::Receiver<RelayEvent>,
) {
    let code = loop {
        match events.recv().await {
            Some(RelayEvent::Stdout(line)) => tracing::info!(pid = ?pid, line = %line, "relay"),
            Some(RelayEvent::Stderr(line)) => tracing::warn!(pid = ?pid, line = %line, "relay stderr"),
            Some(RelayEvent::Exited(code)) => break code,
            None => break None,
        }
    };
    sup.handle_exit(generation, pid, code);
}

async fn wait_for_exit(events: &mut mpsc::Receiver<RelayEvent>, pid: Option<u32>) -> Option<i32> {
    while let Some(event) = events.recv().await {
        match event {
            RelayEvent::Exited(code) => return code,
            RelayEvent::Stdout(line) => tracing::debug!(pid = ?pid, line = %line, "relay stdout"),
            RelayEvent::Stderr(line) => tracing::debug!(pid = ?pid, line = %line, "relay stderr"),
        }
    }
    None
}

fn is_port_in_use(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    lower.contains("eaddrinuse") || lower.contains("address already in use")
}

fn join_tail(tail: &VecDeque<String>) -> String {
    tail.iter().map(String::as_str).collect::<Vec<_>>().join(" | ")
}
