//! Pull-based metrics endpoint.
//!
//! # Responsibilities
//! - Serve `GET /metrics` on its own listener
//! - Ask every observer for a fresh report on each request
//! - Isolate observer failures to their own section of the response
//!
//! # Design Decisions
//! - No caching; observers keep reporting proportional to what they retain
//! - Reports are gathered on the blocking pool since they take observer locks

use std::panic::{catch_unwind, AssertUnwindSafe};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};

use crate::observability::observer::ObserverError;
use crate::observability::subject::Subject;

/// Key holding the subject's own delivery counters.
pub const SUBJECT_SECTION: &str = "subject";

/// Router exposing `GET /metrics` over `subject`'s observers.
pub fn router(subject: Subject) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(subject)
}

async fn metrics_handler(State(subject): State<Subject>) -> Response {
    match tokio::task::spawn_blocking(move || collect(&subject)).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Metrics collection task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "metrics collection failed" })),
            )
                .into_response()
        }
    }
}

/// Merge every observer's report into one document.
pub fn collect(subject: &Subject) -> Value {
    let mut body = Map::new();
    for observer in subject.observers() {
        let name = observer.name().to_string();
        let section = match catch_unwind(AssertUnwindSafe(|| observer.report())) {
            Ok(Ok(report)) => report,
            Ok(Err(e)) => {
                tracing::warn!(observer = %name, error = %e, "Observer report failed");
                error_section(&e.to_string())
            }
            Err(_) => {
                let e = ObserverError::Report {
                    observer: name.clone(),
                    reason: "report panicked".to_string(),
                };
                tracing::error!(observer = %name, "Observer panicked while reporting");
                error_section(&e.to_string())
            }
        };
        body.insert(name, section);
    }

    let stats = serde_json::to_value(subject.stats())
        .unwrap_or_else(|e| error_section(&e.to_string()));
    body.insert(SUBJECT_SECTION.to_string(), stats);
    Value::Object(body)
}

fn error_section(message: &str) -> Value {
    serde_json::json!({ "error": message })
}
