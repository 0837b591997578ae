//! Startup orchestration.
//!
//! # Responsibilities
//! - Load TLS material before anything binds
//! - Bind the RPC listener, then build the metrics pipeline around it
//! - Attach the gateway to the already-serving RPC backend
//! - Record a cancel callback for every optional registration
//!
//! # Design Decisions
//! - Fail fast: bind, TLS and configuration errors are fatal, on every surface
//! - The gateway only connects after the RPC listener is bound and serving
//! - A gateway that cannot register against the backend degrades the service
//!   to RPC-only unless `gateway.required` is set
//! - A failure after partial startup unwinds through the shutdown coordinator

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;

use crate::config::{validate_config, ServiceConfig};
use crate::discovery::{Announcer, Endpoint, EndpointKind, FileAnnouncer};
use crate::error::Error;
use crate::gateway;
use crate::http::HttpServer;
use crate::lifecycle::shutdown::{Shutdown, ShutdownCoordinator, ShutdownReport};
use crate::net::{tls, Listener};
use crate::observability::exporter;
use crate::observability::observers::{RpcObserver, RuntimeObserver, StatsdObserver};
use crate::observability::{Observer, Subject};
use crate::rpc::{EyePiService, RpcServer};

/// How long HTTP listener tasks get to finish after the coordinator ran.
const HTTP_TASK_GRACE: Duration = Duration::from_secs(10);

/// Progress of the bootstrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Unconfigured,
    ListenerBound,
    BackendRegistered,
    Serving,
}

/// Builds and starts the service.
pub struct Bootstrap {
    config: ServiceConfig,
    announcer: Option<Arc<dyn Announcer>>,
    observers: Vec<Arc<dyn Observer>>,
}

impl Bootstrap {
    /// Validate `config` and prepare to start.
    pub fn new(config: ServiceConfig) -> Result<Self, Error> {
        validate_config(&config).map_err(|errors| {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Error::Configuration(joined)
        })?;

        let announcer: Option<Arc<dyn Announcer>> = match &config.discovery.announce_dir {
            Some(dir) if config.discovery.enabled => Some(Arc::new(FileAnnouncer::new(dir))),
            _ => None,
        };

        Ok(Self {
            config,
            announcer,
            observers: Vec::new(),
        })
    }

    /// Replace the announcer derived from `discovery`.
    pub fn with_announcer(mut self, announcer: Arc<dyn Announcer>) -> Self {
        self.announcer = Some(announcer);
        self
    }

    /// Register an extra observer next to the built-in ones.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Bring every listener up. Returns once all of them are serving.
    pub async fn start(self) -> Result<RunningService, Error> {
        tls::install_crypto_provider();

        let context = Shutdown::new();
        let coordinator = Arc::new(ShutdownCoordinator::new(context.clone(), &self.config.shutdown));

        match self.launch(&context, &coordinator).await {
            Ok(service) => Ok(service),
            Err(e) => {
                tracing::error!(error = %e, "Startup failed, unwinding");
                coordinator.shutdown().await;
                Err(e)
            }
        }
    }

    async fn launch(
        self,
        context: &Shutdown,
        coordinator: &Arc<ShutdownCoordinator>,
    ) -> Result<RunningService, Error> {
        let Bootstrap {
            config,
            announcer,
            observers,
        } = self;
        let mut stages = vec![Stage::Unconfigured];

        let rpc_tls = if config.rpc.use_tls {
            Some(tls::load_material(&config.tls)?)
        } else {
            None
        };
        let metrics_tls = if config.metrics.use_tls {
            let identity = tls::load_metrics_identity(&config.metrics, &config.tls)?;
            Some(tls::http_server_config(&identity).await?)
        } else {
            None
        };
        let gateway_tls = if config.gateway.enabled && config.gateway.use_tls {
            let identity = tls::load_identity(
                Path::new(&config.tls.server_cert_path),
                Path::new(&config.tls.server_key_path),
            )?;
            Some(tls::http_server_config(&identity).await?)
        } else {
            None
        };

        let mut rpc_server = RpcServer::new(Listener::bind("rpc", &config.rpc.address()).await?);
        if let Some(material) = &rpc_tls {
            rpc_server = rpc_server.with_tls(tls::rpc_server_config(material));
        }
        let rpc_addr = rpc_server.local_addr();
        advance(&mut stages, Stage::ListenerBound);

        // Metrics pipeline
        let subject = Subject::new(config.metrics.queue_capacity)?;
        subject.register(Arc::new(RpcObserver::new(config.metrics.cache_size)))?;
        subject.register(Arc::new(RuntimeObserver::new(config.service_name.clone())))?;
        let statsd = if config.statsd.enabled {
            let observer = StatsdObserver::new(&config.statsd, &config.service_name)
                .map_err(|e| Error::Configuration(format!("failed to create statsd sink: {e}")))?;
            let observer = Arc::new(observer);
            subject.register(observer.clone())?;
            Some(observer)
        } else {
            None
        };
        for observer in observers {
            subject.register(observer)?;
        }
        subject.start()?;
        subject.close_on(context.subscribe());
        let drain = subject.clone();
        coordinator.register(
            "metrics-pipeline",
            Box::new(move || {
                drain.close();
                drain.join();
            }),
        );
        if let Some(statsd) = &statsd {
            statsd.spawn_flusher(
                Duration::from_millis(config.statsd.flush_interval_ms),
                context.subscribe(),
            );
        }

        let metrics_listener = Listener::bind("metrics", &config.metrics.address()).await?;
        let metrics_addr = metrics_listener.local_addr();
        let mut exporter_server = HttpServer::new(metrics_listener, exporter::router(subject.clone()));
        if let Some(tls) = metrics_tls {
            exporter_server = exporter_server.with_tls(tls);
        }
        let mut tasks = vec![("metrics", exporter_server.spawn(context.subscribe())?)];
        announce(
            announcer.as_deref(),
            coordinator,
            Endpoint {
                service: config.service_name.clone(),
                kind: EndpointKind::Metrics,
                address: metrics_addr,
                tls: config.metrics.use_tls,
            },
        );

        let rpc_handle = rpc_server.with_metrics(subject.clone()).spawn(EyePiService::new())?;
        coordinator.set_listener(rpc_handle);
        announce(
            announcer.as_deref(),
            coordinator,
            Endpoint {
                service: config.service_name.clone(),
                kind: EndpointKind::Rpc,
                address: rpc_addr,
                tls: config.rpc.use_tls,
            },
        );

        let mut gateway_addr = None;
        if config.gateway.enabled {
            match start_gateway(&config, rpc_addr, rpc_tls.as_ref(), gateway_tls, context).await {
                Ok((addr, task)) => {
                    advance(&mut stages, Stage::BackendRegistered);
                    tasks.push(("gateway", task));
                    gateway_addr = Some(addr);
                    announce(
                        announcer.as_deref(),
                        coordinator,
                        Endpoint {
                            service: config.service_name.clone(),
                            kind: EndpointKind::Gateway,
                            address: addr,
                            tls: config.gateway.use_tls,
                        },
                    );
                }
                Err(e @ Error::Registration { .. }) if !config.gateway.required => {
                    tracing::error!(error = %e, "Gateway failed to attach, serving binary RPC only");
                }
                Err(e) => return Err(e),
            }
        }

        advance(&mut stages, Stage::Serving);
        tracing::info!(
            service = %config.service_name,
            rpc = %rpc_addr,
            gateway = ?gateway_addr,
            metrics = %metrics_addr,
            "Service started"
        );

        Ok(RunningService {
            rpc_addr,
            gateway_addr,
            metrics_addr,
            coordinator: Arc::clone(coordinator),
            subject,
            stages,
            tasks,
        })
    }
}

async fn start_gateway(
    config: &ServiceConfig,
    backend: SocketAddr,
    rpc_tls: Option<&tls::TlsMaterial>,
    server_tls: Option<RustlsConfig>,
    context: &Shutdown,
) -> Result<(SocketAddr, JoinHandle<Result<(), Error>>), Error> {
    let client_tls = rpc_tls.map(tls::rpc_client_config);
    let router = gateway::attach(&config.gateway, backend, client_tls, config.logging.verbose).await?;

    let listener = Listener::bind("gateway", &config.gateway.address()).await?;
    let addr = listener.local_addr();
    let mut server = HttpServer::new(listener, router);
    if let Some(tls) = server_tls {
        server = server.with_tls(tls);
    }
    let task = server.spawn(context.subscribe())?;
    Ok((addr, task))
}

fn advance(stages: &mut Vec<Stage>, stage: Stage) {
    tracing::debug!(stage = ?stage, "Bootstrap stage reached");
    stages.push(stage);
}

/// Announce `endpoint` if discovery is on; failures are logged and skipped.
fn announce(announcer: Option<&dyn Announcer>, coordinator: &ShutdownCoordinator, endpoint: Endpoint) {
    let Some(announcer) = announcer else {
        return;
    };
    match announcer.announce(&endpoint) {
        Ok(cancel) => coordinator.register(format!("discovery:{}", endpoint.kind), cancel),
        Err(e) => tracing::warn!(kind = %endpoint.kind, error = %e, "Endpoint announcement failed, continuing"),
    }
}

/// A started service.
pub struct RunningService {
    rpc_addr: SocketAddr,
    gateway_addr: Option<SocketAddr>,
    metrics_addr: SocketAddr,
    coordinator: Arc<ShutdownCoordinator>,
    subject: Subject,
    stages: Vec<Stage>,
    tasks: Vec<(&'static str, JoinHandle<Result<(), Error>>)>,
}

impl RunningService {
    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// `None` when the gateway is disabled or failed to attach.
    pub fn gateway_addr(&self) -> Option<SocketAddr> {
        self.gateway_addr
    }

    pub fn metrics_addr(&self) -> SocketAddr {
        self.metrics_addr
    }

    pub fn coordinator(&self) -> Arc<ShutdownCoordinator> {
        Arc::clone(&self.coordinator)
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Stages reached, in order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run the shutdown sequence and wait for the HTTP listeners to exit.
    ///
    /// Returns `None` if shutdown had already been started elsewhere.
    pub async fn shutdown(self) -> Option<ShutdownReport> {
        let report = self.coordinator.shutdown().await;
        for (name, task) in self.tasks {
            match tokio::time::timeout(HTTP_TASK_GRACE, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => tracing::error!(listener = name, error = %e, "Listener exited with error"),
                Ok(Err(e)) => tracing::error!(listener = name, error = %e, "Listener task failed"),
                Err(_) => tracing::warn!(listener = name, "Listener did not stop in time"),
            }
        }
        report
    }
}
