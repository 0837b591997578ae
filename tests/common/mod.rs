//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use eyepi::config::ServiceConfig;
use eyepi::observability::{MetricEvent, Observer, ObserverError};
use eyepi::rpc::proto::eye_pi_client::EyePiClient;
use eyepi::rpc::proto::HelloRequest;
use eyepi::{Bootstrap, RunningService};
use serde_json::Value;
use tonic::transport::Channel;

/// Config with every listener on an ephemeral loopback port.
pub fn local_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.rpc.host = "127.0.0.1".into();
    config.rpc.port = 0;
    config.gateway.host = "127.0.0.1".into();
    config.gateway.port = 0;
    config.metrics.host = "127.0.0.1".into();
    config.metrics.port = 0;
    config.shutdown.callback_timeout_ms = 500;
    config.shutdown.listener_grace_ms = 500;
    config
}

pub async fn start(config: ServiceConfig) -> RunningService {
    Bootstrap::new(config).unwrap().start().await.unwrap()
}

pub async fn rpc_client(addr: SocketAddr) -> EyePiClient<Channel> {
    EyePiClient::connect(format!("http://{}", addr)).await.unwrap()
}

pub async fn rpc_hello(client: &mut EyePiClient<Channel>, text: &str) -> Result<String, tonic::Status> {
    client
        .hello_proxy(HelloRequest {
            hello_text: text.to_string(),
        })
        .await
        .map(|reply| reply.into_inner().text)
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// POST `{"hello_text": text}` to the gateway; returns status and JSON body.
pub async fn gateway_hello(client: &reqwest::Client, addr: SocketAddr, text: &str) -> (u16, Value) {
    let res = client
        .post(format!("http://{}/v1/hello", addr))
        .json(&serde_json::json!({ "hello_text": text }))
        .send()
        .await
        .expect("gateway unreachable");
    let status = res.status().as_u16();
    (status, res.json().await.unwrap())
}

pub async fn fetch_metrics(client: &reqwest::Client, addr: SocketAddr) -> Value {
    client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .expect("exporter unreachable")
        .json()
        .await
        .unwrap()
}

/// Fetch the metrics report until `ready` holds for it, or two seconds pass.
pub async fn metrics_when<F>(client: &reqwest::Client, addr: SocketAddr, ready: F) -> Value
where
    F: Fn(&Value) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        let metrics = fetch_metrics(client, addr).await;
        if ready(&metrics) || tokio::time::Instant::now() >= deadline {
            return metrics;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Observer keeping every event it accepts.
#[derive(Default)]
pub struct Recording {
    pub events: Mutex<Vec<MetricEvent>>,
}

impl Recording {
    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

impl Observer for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    fn accept(&self, event: &MetricEvent) {
        self.events.lock().unwrap().push(event.clone());
    }

    fn report(&self) -> Result<Value, ObserverError> {
        Ok(serde_json::json!({ "events": self.count() }))
    }
}

/// Observer that blocks on its first event until the returned sender is dropped.
pub struct Stuck {
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Stuck {
    pub fn new() -> (Arc<Self>, mpsc::Sender<()>) {
        let (tx, rx) = mpsc::channel();
        (Arc::new(Self { gate: Mutex::new(rx) }), tx)
    }
}

impl Observer for Stuck {
    fn name(&self) -> &str {
        "stuck"
    }

    fn accept(&self, _event: &MetricEvent) {
        let _ = self.gate.lock().unwrap().recv();
    }

    fn report(&self) -> Result<Value, ObserverError> {
        Ok(Value::Null)
    }
}

/// Observer whose report always fails.
pub struct BrokenReport;

impl Observer for BrokenReport {
    fn name(&self) -> &str {
        "broken"
    }

    fn accept(&self, _event: &MetricEvent) {}

    fn report(&self) -> Result<Value, ObserverError> {
        Err(ObserverError::Report {
            observer: "broken".into(),
            reason: "backend offline".into(),
        })
    }
}
