//! The relay process's HTTP surface, driven over real sockets with mocked
//! provider clients.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::net::TcpListener;

use cr_calls::{
    CallBackend, CallTracker, DirectBackend, EndOutcome, PlaceCall, PlacedCall, ProviderClients,
    RelayBackend, RelayLifecycle, TelephonyClient, VoiceAgentClient,
};
use cr_domain::call::{CallRequest, CallStatus, TerminateOutcome};
use cr_domain::error::Result;
use cr_gateway::relay::{router, RelayState};
use cr_supervisor::SupervisorError;

#[derive(Default)]
struct MockTelephony {
    placed: AtomicU32,
}

#[async_trait]
impl TelephonyClient for MockTelephony {
    async fn place_call(&self, _req: &PlaceCall) -> Result<PlacedCall> {
        let n = self.placed.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PlacedCall {
            call_sid: format!("CA{n:04}"),
            status: CallStatus::Queued,
        })
    }

    async fn end_call(&self, _call_sid: &str) -> Result<EndOutcome> {
        Ok(EndOutcome::Ended)
    }

    async fn call_status(&self, _call_sid: &str) -> Result<CallStatus> {
        Ok(CallStatus::InProgress)
    }
}

struct MockAgent;

#[async_trait]
impl VoiceAgentClient for MockAgent {
    async fn signed_stream_url(&self) -> Result<String> {
        Ok("wss://agent.example/stream".into())
    }
}

struct AlwaysUp;

#[async_trait]
impl RelayLifecycle for AlwaysUp {
    async fn ensure_running(&self) -> std::result::Result<(), SupervisorError> {
        Ok(())
    }
}

async fn start_relay() -> String {
    let clients = ProviderClients {
        telephony: Arc::new(MockTelephony::default()),
        agent: Arc::new(MockAgent),
        from_number: "+14155550000".into(),
        webhook_base_url: "https://hooks.example".into(),
    };
    let backend = Arc::new(DirectBackend::with_clients(
        Arc::new(CallTracker::default()),
        clients,
    ));
    let app = router(RelayState::new(backend));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn start_call(http: &reqwest::Client, base: &str, to: &str) -> reqwest::Response {
    http.post(format!("{base}/twilio/outbound_call"))
        .json(&serde_json::json!({ "to": to, "script": "renewal" }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn health_reports_healthy_with_active_calls() {
    let base = start_relay().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["active_calls"], 0);
    assert!(body["uptime_secs"].is_u64());
}

#[tokio::test]
async fn outbound_call_then_status_webhook_ends_it() {
    let base = start_relay().await;
    let http = reqwest::Client::new();

    let resp = start_call(&http, &base, "+1 (415) 555-1234").await;
    assert_eq!(resp.status(), 200);
    let started: Value = resp.json().await.unwrap();
    assert_eq!(started["success"], true);
    let sid = started["callSid"].as_str().unwrap().to_owned();

    let metrics: Value = http
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["activeCalls"], 1);
    assert_eq!(metrics["callsStarted"], 1);

    let hook = http
        .post(format!("{base}/twilio/status"))
        .form(&[("CallSid", sid.as_str()), ("CallStatus", "completed")])
        .send()
        .await
        .unwrap();
    assert_eq!(hook.status(), 204);

    let metrics: Value = http
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["activeCalls"], 0);

    let terminated: Value = http
        .post(format!("{base}/twilio/terminate_call"))
        .json(&serde_json::json!({ "callSid": sid }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(terminated["success"], true);
    assert_eq!(terminated["status"], "already_ended");
}

#[tokio::test]
async fn invalid_number_is_a_400_with_error_text() {
    let base = start_relay().await;
    let resp = start_call(&reqwest::Client::new(), &base, "12").await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("invalid"), "{body}");
}

#[tokio::test]
async fn transcript_append_and_read() {
    let base = start_relay().await;
    let http = reqwest::Client::new();

    let resp = http
        .post(format!("{base}/transcripts/CA9"))
        .json(&serde_json::json!({ "role": "agent", "text": "Hi, this is Sam." }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let rejected = http
        .post(format!("{base}/transcripts/CA9"))
        .json(&serde_json::json!({ "role": "user", "text": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);

    let t: Value = http
        .get(format!("{base}/transcripts/CA9"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(t["callSid"], "CA9");
    assert_eq!(t["transcript"].as_array().unwrap().len(), 1);
    assert_eq!(t["transcript"][0]["text"], "Hi, this is Sam.");
}

#[tokio::test]
async fn twiml_connects_stream_and_unknown_request_hangs_up() {
    let base = start_relay().await;
    let http = reqwest::Client::new();

    let started: Value = start_call(&http, &base, "+14155551234")
        .await
        .json()
        .await
        .unwrap();
    let request_id = started["requestId"].as_str().unwrap();

    let resp = http
        .post(format!("{base}/twilio/twiml?request_id={request_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "text/xml");
    let xml = resp.text().await.unwrap();
    assert!(xml.contains(r#"<Stream url="wss://agent.example/stream">"#), "{xml}");
    assert!(xml.contains(r#"<Parameter name="script" value="renewal"/>"#), "{xml}");

    let again = http
        .get(format!("{base}/twilio/twiml?request_id={request_id}"))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 200);
    let metrics: Value = http
        .get(format!("{base}/metrics"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(metrics["reconnects"], 1);

    let xml = http
        .get(format!("{base}/twilio/twiml?request_id=nope"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(xml.contains("<Hangup/>"), "{xml}");
}

#[tokio::test]
async fn relay_backend_talks_to_the_real_relay_surface() {
    let base = start_relay().await;
    let backend = RelayBackend::new(&base, Duration::from_secs(5), Arc::new(AlwaysUp)).unwrap();

    let started = backend
        .start_call(CallRequest {
            to: "+14155551234".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    let sid = started.call_sid.unwrap();

    assert_eq!(backend.metrics().await.unwrap().active_calls, 1);
    assert_eq!(
        backend.terminate_call(&sid).await.unwrap(),
        TerminateOutcome::Terminated
    );
    assert_eq!(backend.metrics().await.unwrap().active_calls, 0);
    assert!(backend.transcript(&sid).await.unwrap().transcript.is_empty());
}
