//! The business method.

use tonic::{Request, Response, Status};

use crate::rpc::proto::eye_pi_server::EyePi;
use crate::rpc::proto::{HelloRequest, HelloResponse};

/// Answers `"ping"` with `"pong"` and rejects everything else.
#[derive(Debug, Default, Clone)]
pub struct EyePiService;

impl EyePiService {
    pub fn new() -> Self {
        Self
    }
}

#[tonic::async_trait]
impl EyePi for EyePiService {
    async fn hello_proxy(
        &self,
        request: Request<HelloRequest>,
    ) -> Result<Response<HelloResponse>, Status> {
        let req = request.into_inner();
        if req.hello_text == "ping" {
            return Ok(Response::new(HelloResponse {
                text: "pong".to_string(),
            }));
        }
        tracing::debug!(hello_text = %req.hello_text, "Rejecting hello request");
        Err(Status::invalid_argument("invalid request"))
    }
}
