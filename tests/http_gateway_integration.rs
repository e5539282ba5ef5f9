//! HTTP-level integration tests for the protection engine.
//!
//! A local axum server stands in for the tokenization service, so these run
//! without network access. Run with: cargo test --test http_gateway_integration

use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use data_protection::{
    FieldValue, HttpGateway, Operation, ProtectionConfig, ProtectionEngine, ProtectionError,
    ProtectionGateway,
};

// ── Stub service ───────────────────────────────────────────────

#[derive(Clone, Copy)]
enum Behaviour {
    /// Answer every call
    Echo,
    /// Fail the first N calls with 500, then echo
    FailFirst(usize),
    /// Always answer 503
    Down,
    /// Answer 200 with an object instead of an array
    WrongShape,
    /// Answer 400 with the submitted items echoed in the error body
    RejectWithEcho,
}

struct StubService {
    behaviour: Behaviour,
    calls: AtomicUsize,
    json_requests: AtomicUsize,
}

impl StubService {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            calls: AtomicUsize::new(0),
            json_requests: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn echo(items: &[Value], operation: Operation) -> Value {
    let answer: Vec<Value> = items
        .iter()
        .filter_map(Value::as_object)
        .map(|item| {
            let mut out = serde_json::Map::new();
            for (key, value) in item {
                let value = match (key.as_str(), operation) {
                    ("policyName", _) => value.clone(),
                    (_, Operation::Protect) => json!(format!("tok-{}", value.as_str().unwrap_or(""))),
                    (_, Operation::Unprotect) => value.clone(),
                };
                out.insert(key.clone(), value);
            }
            Value::Object(out)
        })
        .collect();
    Value::Array(answer)
}

async fn handle(
    stub: &StubService,
    headers: &HeaderMap,
    items: Vec<Value>,
    operation: Operation,
) -> Response {
    let call = stub.calls.fetch_add(1, Ordering::SeqCst);
    if headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"))
    {
        stub.json_requests.fetch_add(1, Ordering::SeqCst);
    }

    match stub.behaviour {
        Behaviour::Echo => Json(echo(&items, operation)).into_response(),
        Behaviour::FailFirst(n) if call < n => {
            (StatusCode::INTERNAL_SERVER_ERROR, "temporarily broken").into_response()
        }
        Behaviour::FailFirst(_) => Json(echo(&items, operation)).into_response(),
        Behaviour::Down => (StatusCode::SERVICE_UNAVAILABLE, "down").into_response(),
        Behaviour::WrongShape => Json(json!({"error": "unexpected"})).into_response(),
        Behaviour::RejectWithEcho => (
            StatusCode::BAD_REQUEST,
            format!("rejected items: {}", Value::Array(items)),
        )
            .into_response(),
    }
}

async fn protect_list(
    State(stub): State<Arc<StubService>>,
    headers: HeaderMap,
    Json(items): Json<Vec<Value>>,
) -> Response {
    handle(&stub, &headers, items, Operation::Protect).await
}

async fn unprotect_list(
    State(stub): State<Arc<StubService>>,
    headers: HeaderMap,
    Json(items): Json<Vec<Value>>,
) -> Response {
    handle(&stub, &headers, items, Operation::Unprotect).await
}

/// Serve the stub on an ephemeral port and return its base URL.
async fn spawn_stub(stub: Arc<StubService>) -> String {
    let app = Router::new()
        .route("/protectList", post(protect_list))
        .route("/unprotectList", post(unprotect_list))
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind stub listener");
    let addr = listener.local_addr().expect("stub listener has no address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("stub server failed");
    });
    format!("http://{}/", addr)
}

fn config_for(host: &str) -> ProtectionConfig {
    ProtectionConfig::default().with_host(host)
}

// ── Tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn gateway_posts_json_to_operation_route() {
    let stub = StubService::new(Behaviour::Echo);
    let host = spawn_stub(stub.clone()).await;
    let gateway = HttpGateway::new(&config_for(&host)).unwrap();

    let payload = vec![json!({"policyName": "SSN", "m1": "123"})];
    let response = gateway
        .send(Operation::Unprotect, &payload)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response, vec![json!({"policyName": "SSN", "m1": "123"})]);
    assert_eq!(stub.calls(), 1);
    assert_eq!(stub.json_requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn gateway_maps_error_status_to_no_body() {
    let stub = StubService::new(Behaviour::Down);
    let host = spawn_stub(stub.clone()).await;
    let gateway = HttpGateway::new(&config_for(&host)).unwrap();

    let response = gateway
        .send(Operation::Protect, &[json!({"ssn": "1", "policyName": "SSN"})])
        .await
        .unwrap();
    assert!(response.is_none());
}

#[tokio::test]
async fn detokenize_over_http() {
    let stub = StubService::new(Behaviour::Echo);
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let records = json!({
        "member": {"ssn": "123456789$$SSN", "lastNm": "O'Brien$$lastName"},
        "aliases": ["Ann", "Annie", "firstName"],
        "note": "nothing to see"
    });
    let result = engine.detokenize(&records).await.unwrap();

    assert_eq!(
        result,
        json!({
            "member": {"ssn": "123456789", "lastNm": "O'Brien"},
            "aliases": ["Ann", "Annie"],
            "note": "nothing to see"
        })
    );
    assert_eq!(stub.calls(), 1);
}

#[tokio::test]
async fn tokenize_over_http() {
    let stub = StubService::new(Behaviour::Echo);
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let fields = vec![
        ("ssn".to_string(), FieldValue::from("123456789")),
        ("firstNm".to_string(), FieldValue::from(vec!["Ann", "Bo"])),
    ];
    let tokens = engine.tokenize(&fields).await.unwrap();

    assert_eq!(
        tokens.into_json(),
        json!({"ssn": "tok-123456789", "firstNm": ["tok-Ann", "tok-Bo"]})
    );
}

#[tokio::test]
async fn transient_server_errors_are_retried() {
    let stub = StubService::new(Behaviour::FailFirst(2));
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let result = engine.detokenize(&json!({"ssn": "1$$SSN"})).await.unwrap();

    assert_eq!(result, json!({"ssn": "1"}));
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn service_down_fails_after_three_calls() {
    let stub = StubService::new(Behaviour::Down);
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let err = engine
        .detokenize(&json!({"ssn": "1$$SSN"}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ProtectionError::ServiceUnavailable { attempts: 3, .. }
    ));
    assert_eq!(err.http_status(), 503);
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn non_array_body_is_retried_then_fails() {
    let stub = StubService::new(Behaviour::WrongShape);
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let err = engine
        .tokenize(&[("ssn".to_string(), FieldValue::from("1"))])
        .await
        .unwrap_err();

    assert!(err.is_unavailable());
    assert_eq!(stub.calls(), 3);
}

#[tokio::test]
async fn unreachable_host_is_unavailable() {
    // Bind then drop to get a port nothing listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let engine = ProtectionEngine::new(config_for(&format!("http://{}", addr))).unwrap();
    let err = engine
        .detokenize(&json!({"ssn": "1$$SSN"}))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
}

/// In-memory log sink for a scoped tracing subscriber.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn error_bodies_are_not_logged() {
    let logs = CapturedLogs::default();
    let sink = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter("data_protection=trace")
        .with_ansi(false)
        .with_writer(move || sink.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let stub = StubService::new(Behaviour::RejectWithEcho);
    let host = spawn_stub(stub.clone()).await;
    let engine = ProtectionEngine::new(config_for(&host)).unwrap();

    let err = engine
        .detokenize(&json!({"ssn": "987654321$$SSN"}))
        .await
        .unwrap_err();
    assert!(err.is_unavailable());
    assert_eq!(stub.calls(), 3);

    let text = logs.text();
    assert!(text.contains("tokenization service returned an error status"));
    assert!(text.contains("body_len"));
    assert!(!text.contains("987654321"));
    assert!(!text.contains("rejected items"));
}
