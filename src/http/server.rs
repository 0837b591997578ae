//! HTTP server setup shared by the gateway and the metrics exporter.
//!
//! # Responsibilities
//! - Serve an Axum router on a pre-bound listener
//! - Terminate TLS with the rustls acceptor when configured
//! - Stop gracefully when the shared context is cancelled

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::net::Listener;

/// How long open HTTP connections may finish after cancellation.
const GRACEFUL_SHUTDOWN: Duration = Duration::from_secs(5);

/// An HTTP surface ready to serve.
pub struct HttpServer {
    listener: Listener,
    router: Router,
    tls: Option<RustlsConfig>,
}

impl HttpServer {
    pub fn new(listener: Listener, router: Router) -> Self {
        Self {
            listener,
            router,
            tls: None,
        }
    }

    pub fn with_tls(mut self, tls: RustlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Serve in the background until `shutdown` fires.
    pub fn spawn(self, shutdown: ShutdownSignal) -> Result<JoinHandle<Result<(), Error>>, Error> {
        let name = self.listener.name();
        let addr = self.listener.local_addr();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        let handle = match self.tls {
            None => {
                let listener = self.listener.into_inner();
                tokio::spawn(async move {
                    tracing::info!(listener = name, address = %addr, tls = false, "HTTP server starting");
                    let result = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown.cancelled())
                        .await
                        .map_err(|e| Error::Serve {
                            name,
                            reason: e.to_string(),
                        });
                    tracing::info!(listener = name, "HTTP server stopped");
                    result
                })
            }
            Some(tls) => {
                let std_listener = self
                    .listener
                    .into_inner()
                    .into_std()
                    .map_err(|e| Error::Serve {
                        name,
                        reason: e.to_string(),
                    })?;
                let handle = axum_server::Handle::new();
                let server = axum_server::from_tcp_rustls(std_listener, tls).handle(handle.clone());

                tokio::spawn(async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(Some(GRACEFUL_SHUTDOWN));
                });

                tokio::spawn(async move {
                    tracing::info!(listener = name, address = %addr, tls = true, "HTTP server starting");
                    let result = server.serve(app).await.map_err(|e| Error::Serve {
                        name,
                        reason: e.to_string(),
                    });
                    tracing::info!(listener = name, "HTTP server stopped");
                    result
                })
            }
        };

        Ok(handle)
    }
}
