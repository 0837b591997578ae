//! Per-call instrumentation.
//!
//! # Responsibilities
//! - Record start time and operation when a call reaches the server
//! - Emit exactly one `MetricEvent` when the call ends, however it ends
//! - Never alter the call's result
//!
//! # Design Decisions
//! - `CallMetricsLayer` sits on the tonic server, in front of routing, so
//!   calls that never reach a handler (unknown method, undecodable request)
//!   are measured too; the operation is the request path
//! - A drop guard carries the measurement; a call whose future is dropped
//!   (client went away, deadline) or unwinds (panic) is still recorded, as
//!   `Outcome::Aborted`
//! - The outcome is read from the `grpc-status` response header; OK unary
//!   responses carry their status in trailers, so a missing header on a 200
//!   is a success
//! - Sizes are the encoded protobuf lengths, recorded by `RecordSizes` inside
//!   the handler and handed back to the guard through a request extension

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Instant, SystemTime};

use prost::Message;
use tonic::codegen::http;
use tonic::transport::server::{TcpConnectInfo, TlsConnectInfo};
use tonic::{Code, Request, Response, Status};
use tower::{Layer, Service};

use crate::observability::{MetricEvent, Outcome, Subject};
use crate::rpc::proto::eye_pi_server::EyePi;
use crate::rpc::proto::{HelloRequest, HelloResponse};

/// Encoded message sizes of one call, filled in by the handler.
#[derive(Debug, Clone, Default)]
pub struct CallSizes(Arc<Mutex<(Option<usize>, Option<usize>)>>);

impl CallSizes {
    pub fn record_request(&self, bytes: usize) {
        self.lock().0 = Some(bytes);
    }

    pub fn record_response(&self, bytes: usize) {
        self.lock().1 = Some(bytes);
    }

    fn snapshot(&self) -> (Option<usize>, Option<usize>) {
        *self.lock()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, (Option<usize>, Option<usize>)> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Measures one call and emits its event when dropped.
pub struct CallGuard {
    subject: Subject,
    operation: String,
    started_at: SystemTime,
    start: Instant,
    peer: Option<String>,
    sizes: CallSizes,
    outcome: Option<Outcome>,
}

impl CallGuard {
    /// Start measuring a call.
    pub fn begin(subject: Subject, operation: impl Into<String>, peer: Option<String>, sizes: CallSizes) -> Self {
        Self {
            subject,
            operation: operation.into(),
            started_at: SystemTime::now(),
            start: Instant::now(),
            peer,
            sizes,
            outcome: None,
        }
    }

    /// Record how the call completed. Without this the call counts as aborted.
    pub fn complete(&mut self, outcome: Outcome) {
        self.outcome = Some(outcome);
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        let outcome = self.outcome.take().unwrap_or(Outcome::Aborted);
        let (request_bytes, response_bytes) = self.sizes.snapshot();
        let mut event = MetricEvent::new(std::mem::take(&mut self.operation), self.start.elapsed(), outcome)
            .with_started_at(self.started_at)
            .with_sizes(request_bytes, response_bytes)
            .with_tag("protocol", "grpc");
        if let Some(peer) = self.peer.take() {
            event = event.with_tag("peer", peer);
        }
        self.subject.emit(event);
    }
}

/// Outcome of a call as carried by its response head.
pub fn response_outcome<B>(response: &http::Response<B>) -> Outcome {
    let status = response
        .headers()
        .get("grpc-status")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<i32>().ok());
    match status {
        Some(0) => Outcome::Success,
        Some(code) => Outcome::Failure(code),
        None if response.status().is_success() => Outcome::Success,
        None => Outcome::Failure(Code::Unknown as i32),
    }
}

fn peer_of<B>(request: &http::Request<B>) -> Option<String> {
    let extensions = request.extensions();
    extensions
        .get::<TcpConnectInfo>()
        .and_then(|info| info.remote_addr())
        .or_else(|| {
            extensions
                .get::<TlsConnectInfo<TcpConnectInfo>>()
                .and_then(|info| info.get_ref().remote_addr())
        })
        .map(|addr| addr.to_string())
}

/// Tower layer measuring every call the RPC server receives.
#[derive(Clone)]
pub struct CallMetricsLayer {
    subject: Subject,
}

impl CallMetricsLayer {
    pub fn new(subject: Subject) -> Self {
        Self { subject }
    }
}

impl<S> Layer<S> for CallMetricsLayer {
    type Service = CallMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CallMetrics {
            inner,
            subject: self.subject.clone(),
        }
    }
}

/// Service produced by [`CallMetricsLayer`].
#[derive(Clone)]
pub struct CallMetrics<S> {
    inner: S,
    subject: Subject,
}

impl<S, B, ResBody> Service<http::Request<B>> for CallMetrics<S>
where
    S: Service<http::Request<B>, Response = http::Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    B: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<B>) -> Self::Future {
        let sizes = CallSizes::default();
        request.extensions_mut().insert(sizes.clone());
        let mut guard = CallGuard::begin(
            self.subject.clone(),
            request.uri().path(),
            peer_of(&request),
            sizes,
        );

        // Call the instance that was driven to readiness.
        let ready = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, ready);
        Box::pin(async move {
            let result = inner.call(request).await;
            guard.complete(match &result {
                Ok(response) => response_outcome(response),
                Err(_) => Outcome::Failure(Code::Internal as i32),
            });
            result
        })
    }
}

/// Wraps the business service to record encoded message sizes for the
/// surrounding [`CallMetrics`]. A no-op when the layer is absent.
#[derive(Clone)]
pub struct RecordSizes<S> {
    inner: S,
}

impl<S> RecordSizes<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }
}

#[tonic::async_trait]
impl<S: EyePi> EyePi for RecordSizes<S> {
    async fn hello_proxy(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let sizes = request.extensions().get::<CallSizes>().cloned();
        if let Some(sizes) = &sizes {
            sizes.record_request(request.get_ref().encoded_len());
        }
        let result = self.inner.hello_proxy(request).await;
        if let (Some(sizes), Ok(response)) = (&sizes, &result) {
            sizes.record_response(response.get_ref().encoded_len());
        }
        result
    }
}
