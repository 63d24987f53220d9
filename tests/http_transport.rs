//! HttpTransport against a local Axum stub of the chat endpoint.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use guided_chat::error::TransportError;
use guided_chat::llm::{
    ChatTurn, GenerationRequest, GenerationTransport, HttpTransport, RequestMetadata,
    TransportConfig, is_quota_exceeded,
};

#[derive(Clone, Default)]
struct Captured {
    last: Arc<Mutex<Option<(Option<String>, Value)>>>,
}

/// Replies based on the `mode` field so one server covers every case.
async fn chat(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    *captured.last.lock().unwrap() = Some((auth, body.clone()));

    match body["mode"].as_str().unwrap_or_default() {
        "quota" => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({"error": "Monthly generation limit reached"})),
        ),
        "flagged" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"code": "quota_exceeded", "message": "Upgrade to continue"})),
        ),
        "throttled" => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": {"message": "slow down"}})),
        ),
        _ => (StatusCode::OK, Json(json!({"reply": "Hello from the stub"}))),
    }
}

async fn start_stub() -> (String, Captured) {
    let captured = Captured::default();
    let app = Router::new()
        .route("/chat", post(chat))
        .with_state(captured.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{port}/chat"), captured)
}

fn transport(endpoint: String, api_key: Option<&str>) -> HttpTransport {
    HttpTransport::new(TransportConfig {
        endpoint,
        api_key: api_key.map(|k| SecretString::from(k.to_string())),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn request(mode: &str) -> GenerationRequest {
    GenerationRequest::new(
        vec![ChatTurn::user("hi"), ChatTurn::system("Be brief.")],
        RequestMetadata {
            mode: mode.to_string(),
            workflow_step_id: Some("welcome".into()),
            ..RequestMetadata::default()
        },
    )
}

#[tokio::test]
async fn posts_turns_with_flattened_metadata() {
    let (endpoint, captured) = start_stub().await;
    let reply = transport(endpoint, Some("sk-test"))
        .generate(request("first_time_onboarding"))
        .await
        .unwrap();
    assert_eq!(reply, "Hello from the stub");

    let (auth, body) = captured.last.lock().unwrap().clone().unwrap();
    assert_eq!(auth.as_deref(), Some("Bearer sk-test"));
    assert_eq!(body["mode"], "first_time_onboarding");
    assert_eq!(body["workflowStepId"], "welcome");
    assert!(body.get("workflowInstanceId").is_none());
    assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    assert_eq!(body["messages"][1]["role"], "system");
}

#[tokio::test]
async fn no_key_means_no_auth_header() {
    let (endpoint, captured) = start_stub().await;
    transport(endpoint, None)
        .generate(request("goal_creation"))
        .await
        .unwrap();
    let (auth, _) = captured.last.lock().unwrap().clone().unwrap();
    assert!(auth.is_none());
}

#[tokio::test]
async fn payment_required_is_quota_exceeded() {
    let (endpoint, _) = start_stub().await;
    let err = transport(endpoint, None)
        .generate(request("quota"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::QuotaExceeded { ref message } if message.contains("limit reached")));
}

#[tokio::test]
async fn quota_code_is_recognised_on_any_status() {
    let (endpoint, _) = start_stub().await;
    let err = transport(endpoint, None)
        .generate(request("flagged"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::QuotaExceeded { .. }));
}

#[tokio::test]
async fn plain_rate_limit_is_a_generic_failure() {
    let (endpoint, _) = start_stub().await;
    let err = transport(endpoint, None)
        .generate(request("throttled"))
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::RequestFailed { ref reason, .. } if reason.contains("slow down")));
    assert!(!is_quota_exceeded(&err));
}
