//! The relay process: `callrelay relay`.
//!
//! Runs the in-process call backend behind the HTTP surface the relay
//! backend and the telephony provider talk to. Binds the loopback
//! interface only and announces readiness on stdout.

pub mod handlers;

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;

use cr_calls::{CallTracker, DirectBackend};
use cr_domain::config::{env, Config};

/// State shared by the relay's handlers.
#[derive(Clone)]
pub struct RelayState {
    pub backend: Arc<DirectBackend>,
    pub started_at: Instant,
}

impl RelayState {
    pub fn new(backend: Arc<DirectBackend>) -> Self {
        Self {
            backend,
            started_at: Instant::now(),
        }
    }
}

/// Full relay surface: health, metrics, call operations, and webhooks.
pub fn router(state: RelayState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .route("/twilio/outbound_call", post(handlers::outbound_call))
        .route("/twilio/terminate_call", post(handlers::terminate_call))
        .merge(webhook_routes())
        .with_state(state)
}

/// Routes the telephony provider and the voice agent call back into.
/// Mounted on the control API as well when dispatching directly.
pub fn webhook_routes() -> Router<RelayState> {
    Router::new()
        .route(
            "/transcripts/:call_sid",
            get(handlers::get_transcript).post(handlers::append_transcript),
        )
        .route("/twilio/status", post(handlers::status_webhook))
        .route("/twilio/twiml", get(handlers::twiml).post(handlers::twiml))
}

/// Port from `PORT` (set by the supervisor), else `relay.port`.
pub fn resolve_port(config: &Config, lookup: impl Fn(&str) -> Option<String>) -> u16 {
    lookup(env::PORT)
        .and_then(|v| v.trim().parse::<u16>().ok())
        .unwrap_or(config.relay.port)
}

/// Run the relay until `shutdown` resolves.
pub async fn serve(
    config: Config,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let port = resolve_port(&config, |k| std::env::var(k).ok());
    let timeout = Duration::from_millis(config.dispatch.request_timeout_ms);

    let tracker = Arc::new(CallTracker::new(config.dispatch.retain_completed_calls));
    let backend = DirectBackend::new(tracker, config.relay.clone(), timeout);
    if config.relay.credentials.is_complete() {
        backend
            .initialize(&config.relay)
            .context("initialising provider clients")?;
    } else {
        tracing::warn!(
            missing = ?config.relay.credentials.missing(),
            "relay starting without complete credentials"
        );
    }
    let app = router(RelayState::new(Arc::new(backend)));

    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    let local = listener.local_addr().context("reading bound address")?;

    // The supervisor waits for this exact line.
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{} http://{local}", config.relay.ready_marker)?;
    stdout.flush()?;
    drop(stdout);

    tracing::info!(addr = %local, "relay listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("relay server error")?;

    tracing::info!("relay stopped");
    Ok(())
}
