//! Control API status mapping and direct-mode webhook mounting.

use std::sync::Arc;

use serde_json::Value;
use tokio::net::TcpListener;

use cr_domain::config::{Config, DispatchMode};
use cr_gateway::{api, bootstrap};

async fn free_port() -> u16 {
    let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
    l.local_addr().unwrap().port()
}

async fn serve(config: Config) -> String {
    let state = bootstrap::build_app_state(Arc::new(config)).unwrap();
    let app = api::router(&state).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Relay mode with supervision switched off and nothing on the relay port.
async fn relay_mode_disabled() -> Config {
    let mut cfg = Config::default();
    cfg.dispatch.mode = DispatchMode::Relay;
    cfg.supervisor.enabled = false;
    cfg.supervisor.health_timeout_ms = 200;
    cfg.relay.port = free_port().await;
    cfg
}

async fn direct_mode() -> Config {
    let mut cfg = Config::default();
    cfg.dispatch.mode = DispatchMode::Direct;
    cfg.relay.port = free_port().await;
    cfg
}

#[tokio::test]
async fn health_reports_mode_and_relay_snapshot() {
    let base = serve(relay_mode_disabled().await).await;
    let body: Value = reqwest::get(format!("{base}/v1/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["mode"], "relay");
    assert_eq!(body["relay"]["running"], false);
}

#[tokio::test]
async fn invalid_number_is_400_without_touching_the_relay() {
    let base = serve(relay_mode_disabled().await).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/calls"))
        .json(&serde_json::json!({ "to": "call me maybe" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body.get("hints").is_none());
}

#[tokio::test]
async fn disabled_supervisor_is_503_not_retrying_with_hints() {
    let base = serve(relay_mode_disabled().await).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/v1/calls"))
        .json(&serde_json::json!({ "to": "+14155551234" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["retrying"], false);
    let hints = body["hints"].as_array().unwrap();
    assert!(hints
        .iter()
        .any(|h| h.as_str().unwrap().contains("RELAY_ENABLED")));
}

#[tokio::test]
async fn relay_status_and_ensure_endpoints() {
    let base = serve(relay_mode_disabled().await).await;
    let http = reqwest::Client::new();

    let status: Value = http
        .get(format!("{base}/v1/relay/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["running"], false);
    assert_eq!(status["healthy"], false);
    assert_eq!(status["state"], "absent");

    let resp = http
        .post(format!("{base}/v1/relay/ensure"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 503);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["retrying"], false);
}

#[tokio::test]
async fn direct_mode_mounts_provider_webhooks() {
    let base = serve(direct_mode().await).await;
    let http = reqwest::Client::new();

    let appended = http
        .post(format!("{base}/transcripts/CA42"))
        .json(&serde_json::json!({ "role": "user", "text": "Yes, Tuesday works." }))
        .send()
        .await
        .unwrap();
    assert_eq!(appended.status(), 201);

    let t: Value = http
        .get(format!("{base}/v1/calls/CA42/transcript"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(t["transcript"][0]["text"], "Yes, Tuesday works.");

    let hook = http
        .post(format!("{base}/twilio/status"))
        .form(&[("CallSid", "CA42"), ("CallStatus", "ringing")])
        .send()
        .await
        .unwrap();
    assert_eq!(hook.status(), 204);

    let metrics: Value = http
        .get(format!("{base}/v1/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["callsStarted"], 0);
}

#[tokio::test]
async fn relay_mode_does_not_expose_webhooks() {
    let base = serve(relay_mode_disabled().await).await;
    let resp = reqwest::Client::new()
        .post(format!("{base}/twilio/status"))
        .form(&[("CallSid", "CA1"), ("CallStatus", "completed")])
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[test]
fn validation_errors_block_boot() {
    let mut cfg = Config::default();
    cfg.relay.port = cfg.server.port;
    let err = bootstrap::build_app_state(Arc::new(cfg)).err().expect("expected config validation to fail");
    assert!(err.to_string().contains("config validation failed"), "{err}");
}
