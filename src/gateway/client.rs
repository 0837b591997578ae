//! The gateway's connection to the RPC backend.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use crate::error::Error;
use crate::net::tls::TlsError;
use crate::resilience::{retry, RetryPolicy};
use crate::rpc::proto::eye_pi_client::EyePiClient;

/// Bound on a single connect attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Address to dial for a listener bound on `bound`.
///
/// A wildcard bind is reached over loopback of the same family.
pub fn dial_addr(bound: SocketAddr) -> SocketAddr {
    match bound.ip() {
        IpAddr::V4(ip) if ip.is_unspecified() => SocketAddr::new(Ipv4Addr::LOCALHOST.into(), bound.port()),
        IpAddr::V6(ip) if ip.is_unspecified() => SocketAddr::new(Ipv6Addr::LOCALHOST.into(), bound.port()),
        _ => bound,
    }
}

/// Open an eager channel to the backend, retrying with backoff.
///
/// Exhausting `policy` is a registration failure.
pub async fn connect_backend(
    backend: SocketAddr,
    tls: Option<ClientTlsConfig>,
    policy: RetryPolicy,
) -> Result<EyePiClient<Channel>, Error> {
    let scheme = if tls.is_some() { "https" } else { "http" };
    let mut endpoint = Endpoint::from_shared(format!("{}://{}", scheme, backend))
        .map_err(|e| Error::Configuration(format!("invalid backend address {backend}: {e}")))?
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(tls) = tls {
        endpoint = endpoint
            .tls_config(tls)
            .map_err(|e| TlsError::Rejected(e.to_string()))?;
    }

    let channel = retry(policy, "gateway backend connect", |attempt| {
        let endpoint = endpoint.clone();
        async move {
            tracing::debug!(backend = %backend, attempt, "Connecting gateway to RPC backend");
            endpoint.connect().await.map_err(describe)
        }
    })
    .await
    .map_err(|(reason, attempts)| Error::Registration {
        backend,
        attempts,
        reason,
    })?;

    tracing::info!(backend = %backend, tls = scheme == "https", "Gateway attached to RPC backend");
    Ok(EyePiClient::new(channel))
}

/// Flatten a transport error and its causes into one line.
fn describe(err: tonic::transport::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(&err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
