//! HTTP/JSON routes translated into RPC calls.
//!
//! # Responsibilities
//! - Decode the JSON (or path) form of each RPC request
//! - Forward request metadata the backend cares about
//! - Encode the RPC reply or status as JSON with a matching HTTP status,
//!   including requests cut off by the gateway's own timeout

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tonic::metadata::MetadataValue;
use tonic::transport::Channel;
use tonic::{Code, Status};
use tower::timeout::error::Elapsed;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::rpc::proto::eye_pi_client::EyePiClient;
use crate::rpc::proto::HelloRequest;

/// Headers copied onto the outgoing RPC as metadata.
pub const FORWARDED_HEADERS: [&str; 2] = ["x-request-id", "authorization"];

/// Largest accepted request body.
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared handler state: one multiplexed channel to the backend.
#[derive(Clone)]
pub struct GatewayState {
    client: EyePiClient<Channel>,
}

/// JSON form of `HelloRequest`. Missing fields take their zero value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HelloBody {
    pub hello_text: String,
}

/// JSON form of `HelloResponse`.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloReply {
    pub text: String,
}

/// An RPC status rendered as a gateway error response.
#[derive(Debug)]
pub struct GatewayError(pub Status);

/// JSON body of an error response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: i32,
    pub message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = http_status(self.0.code());
        let body = ErrorBody {
            error: self.0.message().to_string(),
            code: self.0.code() as i32,
            message: self.0.message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for GatewayError {
    fn from(rejection: JsonRejection) -> Self {
        GatewayError(Status::invalid_argument(rejection.body_text()))
    }
}

/// HTTP status for an RPC code.
pub fn http_status(code: Code) -> StatusCode {
    match code {
        Code::Ok => StatusCode::OK,
        // Client closed request
        Code::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
        Code::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        Code::InvalidArgument => StatusCode::BAD_REQUEST,
        Code::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::AlreadyExists => StatusCode::CONFLICT,
        Code::PermissionDenied => StatusCode::FORBIDDEN,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
        Code::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
        Code::Aborted => StatusCode::CONFLICT,
        Code::OutOfRange => StatusCode::BAD_REQUEST,
        Code::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Build the gateway router over `client`.
pub fn router(client: EyePiClient<Channel>, request_timeout: Duration, access_log: bool) -> Router {
    let router = Router::new()
        .route("/v1/hello", post(post_hello))
        .route("/v1/hello/{hello_text}", get(get_hello))
        .fallback(not_found)
        .with_state(GatewayState { client })
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(middleware_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    if access_log {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

async fn post_hello(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Result<Json<HelloBody>, JsonRejection>,
) -> Result<Json<HelloReply>, GatewayError> {
    let Json(body) = body?;
    hello_proxy(state, &headers, body.hello_text).await
}

async fn get_hello(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Path(hello_text): Path<String>,
) -> Result<Json<HelloReply>, GatewayError> {
    hello_proxy(state, &headers, hello_text).await
}

async fn not_found() -> GatewayError {
    GatewayError(Status::not_found("Not Found"))
}

/// Render a failure raised by the middleware stack in the error contract.
async fn middleware_error(err: BoxError) -> GatewayError {
    if err.is::<Elapsed>() {
        GatewayError(Status::deadline_exceeded("gateway request timed out"))
    } else {
        GatewayError(Status::internal(err.to_string()))
    }
}

async fn hello_proxy(
    state: GatewayState,
    headers: &HeaderMap,
    hello_text: String,
) -> Result<Json<HelloReply>, GatewayError> {
    let mut request = tonic::Request::new(HelloRequest { hello_text });
    forward_metadata(headers, &mut request);

    let mut client = state.client;
    let reply = client.hello_proxy(request).await.map_err(|status| {
        tracing::debug!(code = ?status.code(), message = status.message(), "Backend returned error");
        GatewayError(status)
    })?;
    Ok(Json(HelloReply {
        text: reply.into_inner().text,
    }))
}

/// Copy forwarded headers that are valid metadata values.
fn forward_metadata<T>(headers: &HeaderMap, request: &mut tonic::Request<T>) {
    for name in FORWARDED_HEADERS {
        let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) else {
            continue;
        };
        match MetadataValue::try_from(value) {
            Ok(value) => {
                request.metadata_mut().insert(name, value);
            }
            Err(_) => tracing::debug!(header = name, "Skipping header not valid as metadata"),
        }
    }
}
