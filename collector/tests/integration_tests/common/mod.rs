//! Common test utilities and helpers for integration tests.
//!
//! Starts a full collector on ephemeral ports and provides fake downstream sinks
//! plus HTTP request helpers.

use axum::{body::Bytes, extract::State, http::StatusCode, routing::post, Router};
use collector::Collector;
use serde_json::Value;
use shared::config::CollectorConfig;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Behaviour and recordings of a fake push sink.
#[derive(Clone, Default)]
pub struct Sink {
    /// Requests that reached the sink, including failed ones.
    pub started: Arc<AtomicUsize>,
    /// Number of leading requests answered with 503.
    pub fail_first: usize,
    /// Time spent before answering each request.
    pub delay: Duration,
    /// Bodies of successful requests, in arrival order.
    pub received: Arc<Mutex<Vec<Value>>>,
}

impl Sink {
    /// A sink that accepts everything immediately.
    pub fn accepting() -> Self {
        Self::default()
    }

    /// A sink that answers 503 to the first `n` requests.
    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            ..Self::default()
        }
    }

    /// A sink that takes `delay` to answer.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Bodies received so far.
    pub fn bodies(&self) -> Vec<Value> {
        self.received.lock().unwrap().clone()
    }

    /// Starts the sink and returns its push URL.
    pub async fn start(&self) -> String {
        let app = Router::new()
            .route("/push", post(record))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        format!("http://{addr}/push")
    }
}

async fn record(State(sink): State<Sink>, body: Bytes) -> StatusCode {
    let attempt = sink.started.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(sink.delay).await;
    if attempt < sink.fail_first {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    sink.received
        .lock()
        .unwrap()
        .push(serde_json::from_slice(&body).unwrap());
    StatusCode::NO_CONTENT
}

/// Parses `yaml` and starts a collector from it.
pub async fn start_collector(yaml: &str) -> Collector {
    let config = CollectorConfig::from_yaml_str_with(yaml, |_| None).unwrap();
    Collector::start(&config).await.unwrap()
}

/// Waits until `condition` holds, polling every 10ms for up to five seconds.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within five seconds");
}

/// Helper to POST a JSON body to a collector listener.
///
/// # Returns
///
/// A tuple containing the response status code and parsed JSON response body.
pub async fn post_json(addr: SocketAddr, path: &str, body: &str) -> (StatusCode, Value) {
    let response = reqwest::Client::new()
        .post(format!("http://{addr}{path}"))
        .header("content-type", "application/json")
        .body(body.to_string())
        .send()
        .await
        .unwrap();

    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    let json = response.json().await.unwrap_or(Value::Null);
    (status, json)
}

/// Helper to make a GET request against a collector listener.
pub async fn get_json(addr: SocketAddr, path: &str) -> (StatusCode, Value) {
    let response = reqwest::get(format!("http://{addr}{path}")).await.unwrap();
    let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
    let json = response.json().await.unwrap_or(Value::Null);
    (status, json)
}

/// OTLP/JSON traces request with one span per name, in order.
pub fn traces_json(service: &str, names: &[&str]) -> String {
    let spans: Vec<Value> = names
        .iter()
        .enumerate()
        .map(|(i, name)| {
            serde_json::json!({
                "traceId": "5b8efff798038103d269b633813fc60c",
                "spanId": format!("{:016x}", i + 1),
                "name": name,
                "kind": 2,
                "startTimeUnixNano": "1700000000000000000",
                "endTimeUnixNano": "1700000000250000000"
            })
        })
        .collect();

    serde_json::json!({
        "resourceSpans": [{
            "resource": {"attributes": [
                {"key": "service.name", "value": {"stringValue": service}}
            ]},
            "scopeSpans": [{"scope": {"name": "integration"}, "spans": spans}]
        }]
    })
    .to_string()
}
