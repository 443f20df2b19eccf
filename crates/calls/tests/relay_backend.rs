//! Relay-mode dispatch against an in-process fake relay.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Path;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;

use cr_calls::{CallBackend, CallError, RelayBackend, RelayLifecycle};
use cr_domain::call::{CallRequest, TerminateOutcome};
use cr_supervisor::{SpawnError, SupervisorError};

#[derive(Default)]
struct StubLifecycle {
    ensures: AtomicU32,
    fail: AtomicBool,
}

#[async_trait]
impl RelayLifecycle for StubLifecycle {
    async fn ensure_running(&self) -> Result<(), SupervisorError> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(SupervisorError::StartupFailed {
                attempts: 3,
                last: SpawnError::ReadinessTimeout(Duration::from_secs(30)),
            });
        }
        Ok(())
    }
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn fake_relay() -> Router {
    Router::new()
        .route(
            "/twilio/outbound_call",
            post(|Json(req): Json<CallRequest>| async move {
                match req.to.as_str() {
                    "+15005550001" => (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({ "error": "Number is on the do-not-call list" })),
                    ),
                    "+15005550002" => (
                        StatusCode::GATEWAY_TIMEOUT,
                        Json(serde_json::json!({ "error": "upstream timeout" })),
                    ),
                    "+15005550003" => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(serde_json::json!({ "error": "kaboom" })),
                    ),
                    "+15005550004" => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        (StatusCode::OK, Json(serde_json::json!({})))
                    }
                    _ => (
                        StatusCode::OK,
                        Json(serde_json::json!({
                            "success": true,
                            "callSid": "CA77",
                            "requestId": "req-1"
                        })),
                    ),
                }
            }),
        )
        .route(
            "/transcripts/:sid",
            get(|Path(sid): Path<String>| async move {
                Json(serde_json::json!({
                    "callSid": sid,
                    "transcript": [
                        { "role": "agent", "text": "Hello", "timestamp": "2024-01-01T00:00:00Z" }
                    ]
                }))
            }),
        )
        .route(
            "/twilio/terminate_call",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "success": true,
                    "callSid": body["callSid"],
                    "status": "already_ended"
                }))
            }),
        )
        .route(
            "/metrics",
            get(|| async {
                Json(serde_json::json!({
                    "callsStarted": 4, "errors": 1, "activeCalls": 2, "reconnects": 0
                }))
            }),
        )
}

async fn backend(lifecycle: Arc<StubLifecycle>) -> RelayBackend {
    let base = serve(fake_relay()).await;
    RelayBackend::new(&base, Duration::from_millis(500), lifecycle).unwrap()
}

fn call_to(to: &str) -> CallRequest {
    CallRequest {
        to: to.into(),
        script: Some("intro".into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn invalid_number_is_rejected_before_ensure() {
    let lifecycle = Arc::new(StubLifecycle::default());
    let backend = backend(lifecycle.clone()).await;

    let err = backend.start_call(call_to("notanumber")).await.unwrap_err();

    assert!(matches!(err, CallError::InvalidRequest(_)));
    assert_eq!(lifecycle.ensures.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn successful_start_returns_relay_response() {
    let lifecycle = Arc::new(StubLifecycle::default());
    let backend = backend(lifecycle.clone()).await;

    let started = backend.start_call(call_to("+14155551234")).await.unwrap();

    assert!(started.success);
    assert_eq!(started.call_sid.as_deref(), Some("CA77"));
    assert_eq!(started.request_id, "req-1");
    assert_eq!(lifecycle.ensures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn client_errors_surface_the_relay_message() {
    let backend = backend(Arc::new(StubLifecycle::default())).await;
    let err = backend.start_call(call_to("+15005550001")).await.unwrap_err();
    match err {
        CallError::Rejected { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "Number is on the do-not-call list");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn gateway_timeout_and_slow_relay_are_timeouts() {
    let backend = backend(Arc::new(StubLifecycle::default())).await;
    assert!(matches!(
        backend.start_call(call_to("+15005550002")).await,
        Err(CallError::TimedOut)
    ));
    assert!(matches!(
        backend.start_call(call_to("+15005550004")).await,
        Err(CallError::TimedOut)
    ));
}

#[tokio::test]
async fn server_errors_are_generic_failures() {
    let backend = backend(Arc::new(StubLifecycle::default())).await;
    let err = backend.start_call(call_to("+15005550003")).await.unwrap_err();
    assert!(matches!(err, CallError::Network(ref m) if m.contains("kaboom")), "{err:?}");
}

#[tokio::test]
async fn unreachable_relay_is_a_network_error() {
    let port = {
        let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
        l.local_addr().unwrap().port()
    };
    let backend = RelayBackend::new(
        &format!("http://127.0.0.1:{port}"),
        Duration::from_millis(500),
        Arc::new(StubLifecycle::default()),
    )
    .unwrap();
    assert!(matches!(
        backend.metrics().await,
        Err(CallError::Network(_)) | Err(CallError::TimedOut)
    ));
}

#[tokio::test]
async fn unavailable_relay_fails_without_http() {
    let lifecycle = Arc::new(StubLifecycle::default());
    lifecycle.fail.store(true, Ordering::SeqCst);
    let backend = backend(lifecycle).await;

    let err = backend.start_call(call_to("+14155551234")).await.unwrap_err();

    match err {
        CallError::Unavailable {
            retrying, hints, ..
        } => {
            assert!(retrying);
            assert!(hints.iter().any(|h| h.contains("RELAY_STARTUP_TIMEOUT_MS")));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn transcript_terminate_and_metrics_round_trip() {
    let backend = backend(Arc::new(StubLifecycle::default())).await;

    let t = backend.transcript("CA77").await.unwrap();
    assert_eq!(t.call_sid, "CA77");
    assert_eq!(t.transcript.len(), 1);
    assert_eq!(t.transcript[0].text, "Hello");

    assert_eq!(
        backend.terminate_call("CA77").await.unwrap(),
        TerminateOutcome::AlreadyEnded
    );

    let m = backend.metrics().await.unwrap();
    assert_eq!(m.calls_started, 4);
    assert_eq!(m.active_calls, 2);
}

#[tokio::test]
async fn transcript_sid_with_reserved_characters_stays_in_the_path() {
    let backend = backend(Arc::new(StubLifecycle::default())).await;

    let sid = "CA77/../metrics?x=1#frag";
    let t = backend.transcript(sid).await.unwrap();
    assert_eq!(t.call_sid, sid);
    assert_eq!(t.transcript[0].text, "Hello");
}
