//! The unit of measurement carried through the metrics pipeline.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use serde::Serialize;

/// How a call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "code")]
pub enum Outcome {
    /// Completed with an OK status.
    Success,
    /// Completed with a non-OK status; carries the gRPC status code.
    Failure(i32),
    /// Never completed: the call was cancelled or panicked.
    Aborted,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Status code in gRPC numbering (`Aborted` reports `CANCELLED`).
    pub fn status_code(&self) -> i32 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure(code) => *code,
            Outcome::Aborted => 1,
        }
    }

    /// Low-cardinality label for metric backends.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success => "ok",
            Outcome::Failure(_) => "error",
            Outcome::Aborted => "aborted",
        }
    }
}

/// One completed unit of work. Immutable once emitted.
#[derive(Debug, Clone, Serialize)]
pub struct MetricEvent {
    /// Fully qualified operation, e.g. `/eyepi.EyePi/HelloProxy`.
    pub operation: String,
    pub started_at: SystemTime,
    pub duration: Duration,
    pub outcome: Outcome,
    pub request_bytes: Option<usize>,
    pub response_bytes: Option<usize>,
    pub tags: HashMap<String, String>,
}

impl MetricEvent {
    pub fn new(operation: impl Into<String>, duration: Duration, outcome: Outcome) -> Self {
        Self {
            operation: operation.into(),
            started_at: SystemTime::now(),
            duration,
            outcome,
            request_bytes: None,
            response_bytes: None,
            tags: HashMap::new(),
        }
    }

    pub fn with_started_at(mut self, started_at: SystemTime) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn with_sizes(mut self, request_bytes: Option<usize>, response_bytes: Option<usize>) -> Self {
        self.request_bytes = request_bytes;
        self.response_bytes = response_bytes;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes() {
        assert_eq!(Outcome::Success.status_code(), 0);
        assert_eq!(Outcome::Failure(3).status_code(), 3);
        assert_eq!(Outcome::Aborted.status_code(), 1);
        assert!(!Outcome::Aborted.is_success());
    }

    #[test]
    fn test_builder_sets_tags_and_sizes() {
        let event = MetricEvent::new("/svc/Op", Duration::from_millis(5), Outcome::Success)
            .with_sizes(Some(6), Some(6))
            .with_tag("protocol", "grpc");
        assert_eq!(event.tags.get("protocol").map(String::as_str), Some("grpc"));
        assert_eq!(event.request_bytes, Some(6));
    }
}
