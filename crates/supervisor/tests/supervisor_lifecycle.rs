//! Supervisor state machine driven by a scripted launcher.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use cr_domain::config::{RelayCredentials, SupervisorConfig};
use cr_supervisor::{
    BackoffPolicy, HealthCheck, LaunchSpec, LaunchedRelay, RelayControl, RelayEvent,
    RelayLauncher, RelaySupervisor, SpawnError, StartupHook, StartupOutcome, SupervisorError,
    SupervisorEvent, SupervisorSettings, SupervisorState,
};

// ── Fakes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Behavior {
    /// Prints the marker, turns healthy, runs until terminated or crashed.
    Ready,
    /// Writes to stderr and exits with code 1.
    ExitImmediately,
    /// Reports a missing installation.
    NotInstalled,
    /// Reports EADDRINUSE while another instance becomes healthy.
    PortInUse,
}

struct FakeLauncher {
    behavior: Mutex<Behavior>,
    healthy: Arc<AtomicBool>,
    spawns: AtomicU32,
    latest: Mutex<Option<(RelayControl, CancellationToken)>>,
}

impl FakeLauncher {
    fn new(behavior: Behavior, healthy: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            behavior: Mutex::new(behavior),
            healthy,
            spawns: AtomicU32::new(0),
            latest: Mutex::new(None),
        })
    }

    fn spawns(&self) -> u32 {
        self.spawns.load(Ordering::SeqCst)
    }

    fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    fn crash_latest(&self) {
        let latest = self.latest.lock().unwrap();
        let (_, crash) = latest.as_ref().expect("no relay launched");
        crash.cancel();
    }

    fn latest_control(&self) -> RelayControl {
        self.latest.lock().unwrap().as_ref().expect("no relay launched").0.clone()
    }
}

#[async_trait]
impl RelayLauncher for FakeLauncher {
    async fn launch(&self, _spec: &LaunchSpec) -> Result<LaunchedRelay, SpawnError> {
        let n = self.spawns.fetch_add(1, Ordering::SeqCst) + 1;
        let behavior = *self.behavior.lock().unwrap();
        if behavior == Behavior::NotInstalled {
            return Err(SpawnError::RelayNotInstalled("/opt/missing-relay".into()));
        }

        let (tx, rx) = mpsc::channel(16);
        let control = RelayControl::new();
        let crash = CancellationToken::new();
        *self.latest.lock().unwrap() = Some((control.clone(), crash.clone()));

        match behavior {
            Behavior::Ready => {
                tx.send(RelayEvent::Stdout("Server listening on http://127.0.0.1:8765".into()))
                    .await
                    .unwrap();
                self.healthy.store(true, Ordering::SeqCst);
                let healthy = self.healthy.clone();
                let ctl = control.clone();
                tokio::spawn(async move {
                    let code = tokio::select! {
                        _ = ctl.terminate_requested() => Some(0),
                        _ = crash.cancelled() => Some(1),
                    };
                    healthy.store(false, Ordering::SeqCst);
                    ctl.mark_exited();
                    let _ = tx.send(RelayEvent::Exited(code)).await;
                });
            }
            Behavior::ExitImmediately => {
                tx.send(RelayEvent::Stderr(format!("boom {n}"))).await.unwrap();
                control.mark_exited();
                tx.send(RelayEvent::Exited(Some(1))).await.unwrap();
            }
            Behavior::PortInUse => {
                tx.send(RelayEvent::Stderr(
                    "Error: listen EADDRINUSE: address already in use 127.0.0.1:8765".into(),
                ))
                .await
                .unwrap();
                self.healthy.store(true, Ordering::SeqCst);
                let ctl = control.clone();
                tokio::spawn(async move {
                    ctl.terminate_requested().await;
                    ctl.mark_exited();
                    let _ = tx.send(RelayEvent::Exited(Some(1))).await;
                });
            }
            Behavior::NotInstalled => unreachable!(),
        }

        Ok(LaunchedRelay {
            pid: Some(40_000 + n),
            events: rx,
            control,
        })
    }
}

struct FakeHealth(Arc<AtomicBool>);

#[async_trait]
impl HealthCheck for FakeHealth {
    async fn is_healthy(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(10)
    }
}

fn settings() -> SupervisorSettings {
    SupervisorSettings {
        enabled: true,
        port: 8765,
        ready_marker: "Server listening on".into(),
        max_startup_attempts: 3,
        max_restart_attempts: 2,
        backoff: BackoffPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            factor: 2.0,
        },
        startup_timeout: Duration::from_secs(1),
        port_in_use_grace: Duration::from_millis(20),
        shutdown_grace: Duration::from_millis(200),
        restart_reset_after: Duration::from_secs(3600),
        missing_credentials: Vec::new(),
    }
}

fn spec() -> LaunchSpec {
    LaunchSpec {
        program: "fake-relay".into(),
        args: Vec::new(),
        working_dir: None,
        env: Vec::new(),
        port: 8765,
        shutdown_grace: Duration::from_millis(200),
    }
}

fn supervisor_with(
    settings: SupervisorSettings,
    behavior: Behavior,
    initially_healthy: bool,
) -> (RelaySupervisor, Arc<FakeLauncher>) {
    let healthy = Arc::new(AtomicBool::new(initially_healthy));
    let launcher = FakeLauncher::new(behavior, healthy.clone());
    let sup = RelaySupervisor::new(
        settings,
        spec(),
        launcher.clone(),
        Arc::new(FakeHealth(healthy)),
    );
    (sup, launcher)
}

async fn wait_for(
    rx: &mut broadcast::Receiver<SupervisorEvent>,
    pred: impl Fn(&SupervisorEvent) -> bool,
) -> SupervisorEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed: {e}"),
            }
        }
    })
    .await
    .expect("expected supervisor event was not observed")
}

fn complete_credentials() -> RelayCredentials {
    RelayCredentials {
        twilio_account_sid: "AC123".into(),
        twilio_auth_token: "token".into(),
        twilio_phone_number: "+14155550000".into(),
        agent_id: "agent".into(),
        agent_api_key: "key".into(),
    }
}

// ── ensure_running ───────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_ensure_spawns_once() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);

    let (a, b) = tokio::join!(sup.ensure_running(), sup.ensure_running());
    let a = a.unwrap();
    let b = b.unwrap();

    assert_eq!(launcher.spawns(), 1);
    assert!(a.running && a.healthy);
    assert_eq!(a.pid, b.pid);
    assert_eq!(sup.state(), SupervisorState::Healthy);

    // Already running: no new spawn.
    sup.ensure_running().await.unwrap();
    assert_eq!(launcher.spawns(), 1);
}

#[tokio::test]
async fn adopts_existing_healthy_relay() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, true);

    let status = sup.ensure_running().await.unwrap();

    assert_eq!(launcher.spawns(), 0);
    assert!(status.adopted);
    assert!(status.running);
    assert_eq!(status.pid, None);
}

#[tokio::test]
async fn startup_failure_reports_attempt_count() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::ExitImmediately, false);

    let err = sup.ensure_running().await.unwrap_err();

    match err {
        SupervisorError::StartupFailed { attempts, ref last } => {
            assert_eq!(attempts, 3);
            assert!(last.to_string().contains("boom 3"), "{last}");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(!err.is_configuration());
    assert_eq!(launcher.spawns(), 3);
    assert_eq!(sup.state(), SupervisorState::Absent);
    assert!(!sup.snapshot().running);
}

#[tokio::test]
async fn configuration_error_is_not_retried() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::NotInstalled, false);

    let err = sup.ensure_running().await.unwrap_err();

    assert!(matches!(err, SupervisorError::Misconfigured { attempts: 1, .. }), "{err:?}");
    assert!(err.is_configuration());
    assert_eq!(launcher.spawns(), 1);
}

#[tokio::test]
async fn port_in_use_adopts_the_other_instance() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::PortInUse, false);

    let status = sup.ensure_running().await.unwrap();

    assert_eq!(launcher.spawns(), 1);
    assert!(status.adopted);
    assert!(launcher.latest_control().has_exited());
}

#[tokio::test]
async fn missing_credentials_refuse_to_spawn() {
    let mut s = settings();
    s.missing_credentials = vec!["TWILIO_AUTH_TOKEN"];
    let (sup, launcher) = supervisor_with(s, Behavior::Ready, false);

    let err = sup.ensure_running().await.unwrap_err();

    assert!(matches!(err, SupervisorError::MissingCredentials(ref m) if m == &vec!["TWILIO_AUTH_TOKEN"]));
    assert_eq!(launcher.spawns(), 0);
}

#[tokio::test]
async fn disabled_supervisor_only_adopts() {
    let mut s = settings();
    s.enabled = false;
    let (sup, launcher) = supervisor_with(s.clone(), Behavior::Ready, false);
    assert!(matches!(sup.ensure_running().await, Err(SupervisorError::Disabled)));
    assert_eq!(launcher.spawns(), 0);

    let (sup, _) = supervisor_with(s, Behavior::Ready, true);
    assert!(sup.ensure_running().await.unwrap().adopted);
}

#[tokio::test]
async fn unhealthy_live_relay_is_replaced() {
    let healthy = Arc::new(AtomicBool::new(false));
    let launcher = FakeLauncher::new(Behavior::Ready, healthy.clone());
    let sup = RelaySupervisor::new(
        settings(),
        spec(),
        launcher.clone(),
        Arc::new(FakeHealth(healthy.clone())),
    );

    let first = sup.ensure_running().await.unwrap();
    let first_control = launcher.latest_control();
    healthy.store(false, Ordering::SeqCst);

    let second = sup.ensure_running().await.unwrap();

    assert_eq!(launcher.spawns(), 2);
    assert_ne!(first.pid, second.pid);
    assert!(first_control.has_exited());
    // The replaced process's exit is not a crash.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sup.restart_count(), 0);
    assert_eq!(launcher.spawns(), 2);
}

// ── Crash recovery ───────────────────────────────────────────────────

#[tokio::test]
async fn crashed_relay_is_restarted() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    sup.ensure_running().await.unwrap();
    let mut events = sup.subscribe();

    launcher.crash_latest();

    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Exited { code: Some(1), .. })).await;
    let scheduled = wait_for(&mut events, |e| matches!(e, SupervisorEvent::RestartScheduled { .. })).await;
    assert_eq!(
        scheduled,
        SupervisorEvent::RestartScheduled {
            attempt: 1,
            delay: Duration::from_millis(10)
        }
    );
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::Ready { .. })).await;

    assert_eq!(launcher.spawns(), 2);
    assert_eq!(sup.restart_count(), 1);
    assert_eq!(sup.state(), SupervisorState::Healthy);
}

#[tokio::test]
async fn restart_budget_is_bounded() {
    // Startup attempts stay at 3: each restart slot is still one spawn.
    let s = settings();
    assert_eq!(s.max_startup_attempts, 3);
    assert_eq!(s.max_restart_attempts, 2);
    let (sup, launcher) = supervisor_with(s, Behavior::Ready, false);
    sup.ensure_running().await.unwrap();
    let mut events = sup.subscribe();

    launcher.set_behavior(Behavior::ExitImmediately);
    launcher.crash_latest();

    let exhausted = wait_for(&mut events, |e| {
        matches!(e, SupervisorEvent::RestartsExhausted { .. })
    })
    .await;

    assert_eq!(exhausted, SupervisorEvent::RestartsExhausted { attempts: 2 });
    // One initial spawn plus exactly one per restart slot.
    assert_eq!(launcher.spawns(), 3);
    assert_eq!(sup.state(), SupervisorState::Absent);

    // Nothing else gets scheduled afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(launcher.spawns(), 3);
}

#[tokio::test]
async fn manual_ensure_after_exhaustion_gets_full_startup_budget() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    sup.ensure_running().await.unwrap();
    let mut events = sup.subscribe();

    launcher.set_behavior(Behavior::ExitImmediately);
    launcher.crash_latest();
    wait_for(&mut events, |e| matches!(e, SupervisorEvent::RestartsExhausted { .. })).await;
    let before = launcher.spawns();

    let err = sup.ensure_running().await.unwrap_err();
    assert!(
        matches!(err, SupervisorError::StartupFailed { attempts: 3, .. }),
        "{err:?}"
    );
    assert_eq!(launcher.spawns(), before + 3);
}

#[tokio::test]
async fn configuration_error_stops_recovery() {
    let mut s = settings();
    s.max_restart_attempts = 5;
    let (sup, launcher) = supervisor_with(s, Behavior::Ready, false);
    sup.ensure_running().await.unwrap();
    let mut events = sup.subscribe();

    launcher.set_behavior(Behavior::NotInstalled);
    launcher.crash_latest();

    wait_for(&mut events, |e| {
        matches!(
            e,
            SupervisorEvent::StateChanged {
                to: SupervisorState::Absent,
                ..
            }
        )
    })
    .await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(launcher.spawns(), 2);
    assert_eq!(sup.restart_count(), 1);
}

// ── Shutdown ─────────────────────────────────────────────────────────

#[tokio::test]
async fn shutdown_is_idempotent_and_final() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    sup.ensure_running().await.unwrap();
    let control = launcher.latest_control();

    sup.shutdown().await;
    sup.shutdown().await;

    assert!(control.has_exited());
    assert!(sup.is_shutting_down());
    assert_eq!(sup.state(), SupervisorState::Absent);
    assert!(matches!(sup.ensure_running().await, Err(SupervisorError::ShuttingDown)));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(launcher.spawns(), 1);
    assert_eq!(sup.restart_count(), 0);
}

#[tokio::test]
async fn shutdown_without_relay_is_a_no_op() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    sup.shutdown().await;
    assert_eq!(launcher.spawns(), 0);
    assert!(!sup.snapshot().running);
}

// ── Startup hook ─────────────────────────────────────────────────────

#[tokio::test]
async fn startup_hook_skips_without_credentials() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    let hook = StartupHook::new(sup, &SupervisorConfig::default(), &RelayCredentials::default());

    let outcome = hook.initialize_on_startup().await;

    match outcome {
        StartupOutcome::MissingCredentials(missing) => assert_eq!(missing.len(), 5),
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(launcher.spawns(), 0);
}

#[tokio::test]
async fn startup_hook_respects_disabled_flag() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    let cfg = SupervisorConfig {
        enabled: false,
        ..Default::default()
    };
    let hook = StartupHook::new(sup, &cfg, &complete_credentials());

    assert_eq!(hook.initialize_on_startup().await, StartupOutcome::Disabled);
    assert_eq!(launcher.spawns(), 0);
}

#[tokio::test]
async fn startup_hook_runs_once() {
    let (sup, launcher) = supervisor_with(settings(), Behavior::Ready, false);
    let hook = StartupHook::new(sup, &SupervisorConfig::default(), &complete_credentials());

    let (a, b) = tokio::join!(hook.initialize_on_startup(), hook.initialize_on_startup());
    let again = hook.initialize_on_startup().await;

    assert!(matches!(a, StartupOutcome::Running(_)), "{a:?}");
    assert_eq!(a, b);
    assert_eq!(a, again);
    assert_eq!(launcher.spawns(), 1);
    assert!(hook.outcome().is_some());
}

#[tokio::test]
async fn startup_hook_swallows_failures() {
    let (sup, _) = supervisor_with(settings(), Behavior::ExitImmediately, false);
    let hook = StartupHook::new(sup, &SupervisorConfig::default(), &complete_credentials());

    match hook.initialize_on_startup().await {
        StartupOutcome::Failed { configuration, message } => {
            assert!(!configuration);
            assert!(message.contains("3 attempt"), "{message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}
