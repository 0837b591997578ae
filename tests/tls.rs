//! Mutual TLS across the RPC listener, the gateway and the exporter.

use std::net::SocketAddr;
use std::path::PathBuf;

use eyepi::config::ServiceConfig;
use eyepi::lifecycle::Stage;
use eyepi::rpc::proto::eye_pi_client::EyePiClient;
use eyepi::{Bootstrap, Error};
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Endpoint, Identity};

mod common;

fn fixture(name: &str) -> String {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures/tls")
        .join(name)
        .display()
        .to_string()
}

fn read_fixture(name: &str) -> Vec<u8> {
    std::fs::read(fixture(name)).unwrap()
}

/// Every surface on TLS, sharing one CA and one identity.
fn tls_config() -> ServiceConfig {
    let mut config = common::local_config();
    config.rpc.use_tls = true;
    config.gateway.use_tls = true;
    config.metrics.use_tls = true;
    config.tls.ca_cert_path = fixture("ca.pem");
    config.tls.server_cert_path = fixture("server.pem");
    config.tls.server_key_path = fixture("server.key");
    config.tls.server_cert_name = "localhost".into();
    config
}

/// HTTPS client trusting the test CA, with `localhost` pinned to loopback.
fn https_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .add_root_certificate(reqwest::Certificate::from_pem(&read_fixture("ca.pem")).unwrap())
        .resolve("localhost", "127.0.0.1:0".parse().unwrap())
        .build()
        .unwrap()
}

async fn rpc_tls_client(
    addr: SocketAddr,
    present_identity: bool,
) -> Result<EyePiClient<Channel>, tonic::transport::Error> {
    let mut tls = ClientTlsConfig::new()
        .ca_certificate(Certificate::from_pem(read_fixture("ca.pem")))
        .domain_name("localhost");
    if present_identity {
        tls = tls.identity(Identity::from_pem(read_fixture("server.pem"), read_fixture("server.key")));
    }
    let channel = Endpoint::from_shared(format!("https://{}", addr))?
        .tls_config(tls)?
        .connect()
        .await?;
    Ok(EyePiClient::new(channel))
}

#[tokio::test]
async fn test_all_surfaces_serve_over_tls() {
    let service = common::start(tls_config()).await;
    assert_eq!(
        service.stages(),
        &[
            Stage::Unconfigured,
            Stage::ListenerBound,
            Stage::BackendRegistered,
            Stage::Serving
        ]
    );
    let gateway = service.gateway_addr().expect("gateway attached over mTLS");

    let mut rpc = rpc_tls_client(service.rpc_addr(), true).await.unwrap();
    assert_eq!(common::rpc_hello(&mut rpc, "ping").await.unwrap(), "pong");

    let https = https_client();
    let reply: serde_json::Value = https
        .post(format!("https://localhost:{}/v1/hello", gateway.port()))
        .json(&serde_json::json!({ "hello_text": "ping" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply["text"], "pong");

    let metrics: serde_json::Value = https
        .get(format!("https://localhost:{}/metrics", service.metrics_addr().port()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(metrics["rpc"]["totals"].is_object());

    // Plain HTTP is not served on the TLS exporter.
    let plain = common::http_client()
        .get(format!("http://{}/metrics", service.metrics_addr()))
        .send()
        .await;
    assert!(plain.map(|r| !r.status().is_success()).unwrap_or(true));

    service.shutdown().await;
}

#[tokio::test]
async fn test_rpc_requires_client_certificate() {
    let service = common::start(tls_config()).await;

    // The server may reject during the handshake or on the first call.
    match rpc_tls_client(service.rpc_addr(), false).await {
        Err(_) => {}
        Ok(mut anonymous) => assert!(common::rpc_hello(&mut anonymous, "ping").await.is_err()),
    }

    service.shutdown().await;
}

#[tokio::test]
async fn test_wrong_server_name_degrades_to_rpc_only() {
    let mut config = tls_config();
    config.tls.server_cert_name = "wrong.example".into();
    config.gateway.connect_attempts = 2;
    config.gateway.connect_base_delay_ms = 10;
    config.gateway.connect_max_delay_ms = 20;

    let service = common::start(config).await;
    assert!(service.gateway_addr().is_none());
    assert_eq!(
        service.stages(),
        &[Stage::Unconfigured, Stage::ListenerBound, Stage::Serving]
    );

    let mut rpc = rpc_tls_client(service.rpc_addr(), true).await.unwrap();
    assert_eq!(common::rpc_hello(&mut rpc, "ping").await.unwrap(), "pong");

    service.shutdown().await;
}

#[tokio::test]
async fn test_wrong_server_name_is_fatal_when_gateway_required() {
    let mut config = tls_config();
    config.tls.server_cert_name = "wrong.example".into();
    config.gateway.required = true;
    config.gateway.connect_attempts = 2;
    config.gateway.connect_base_delay_ms = 10;
    config.gateway.connect_max_delay_ms = 20;

    let err = Bootstrap::new(config).unwrap().start().await.err().unwrap();
    assert!(matches!(err, Error::Registration { attempts: 2, .. }));
}
