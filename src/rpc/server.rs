//! gRPC server on a pre-bound listener.
//!
//! # Responsibilities
//! - Apply the server TLS context when configured
//! - Measure every inbound call when a metrics subject is attached
//! - Serve the service on the listener bound by the bootstrap
//! - Stop on request, draining in-flight calls for a bounded time

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Server, ServerTlsConfig};

use crate::error::Error;
use crate::net::tls::TlsError;
use crate::net::Listener;
use crate::observability::Subject;
use crate::rpc::instrument::{CallMetricsLayer, RecordSizes};
use crate::rpc::proto::eye_pi_server::{EyePi, EyePiServer};

/// A bound but not yet serving RPC listener.
pub struct RpcServer {
    listener: Listener,
    tls: Option<ServerTlsConfig>,
    metrics: Option<Subject>,
}

impl RpcServer {
    pub fn new(listener: Listener) -> Self {
        Self {
            listener,
            tls: None,
            metrics: None,
        }
    }

    pub fn with_tls(mut self, tls: ServerTlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Emit one event per inbound call into `subject`.
    pub fn with_metrics(mut self, subject: Subject) -> Self {
        self.metrics = Some(subject);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn uses_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// Start serving `service` in the background.
    pub fn spawn<S: EyePi>(self, service: S) -> Result<RpcServerHandle, Error> {
        let local_addr = self.listener.local_addr();

        let mut builder = Server::builder();
        if let Some(tls) = self.tls {
            builder = builder
                .tls_config(tls)
                .map_err(|e| TlsError::Rejected(e.to_string()))?;
        }
        let metrics = tower::util::option_layer(self.metrics.map(CallMetricsLayer::new));
        let router = builder
            .layer(metrics)
            .add_service(EyePiServer::new(RecordSizes::new(service)));
        let incoming = TcpListenerStream::new(self.listener.into_inner());

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            tracing::info!(address = %local_addr, "RPC server starting");
            let result = router
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = stop_rx.await;
                })
                .await
                .map_err(|e| Error::Serve {
                    name: "rpc",
                    reason: e.to_string(),
                });
            tracing::info!(address = %local_addr, "RPC server stopped");
            result
        });

        Ok(RpcServerHandle {
            local_addr,
            stop: Some(stop_tx),
            task,
        })
    }
}

/// Handle to a serving RPC listener.
pub struct RpcServerHandle {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), Error>>,
}

impl RpcServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop accepting, give in-flight calls `grace` to finish, then abort.
    pub async fn stop(mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }

        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::error!(error = %e, "RPC server exited with error"),
            Ok(Err(e)) => tracing::error!(error = %e, "RPC server task failed"),
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "RPC server did not drain in time, aborting in-flight calls"
                );
                self.task.abort();
                // Wait for the cancelled task so the listener socket is closed on return.
                let _ = (&mut self.task).await;
            }
        }
    }
}
