//! Process-level observer backed by a Prometheus recorder.
//!
//! The recorder is private to this observer and driven through
//! `metrics::with_local_recorder`, so nothing is installed globally and
//! several services can coexist in one process (tests do).

use std::time::Instant;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde_json::Value;

use crate::observability::event::MetricEvent;
use crate::observability::observer::{Observer, ObserverError};

pub const REQUESTS_TOTAL: &str = "eyepi_rpc_requests_total";
pub const DURATION_SECONDS: &str = "eyepi_rpc_duration_seconds";
pub const REQUEST_BYTES: &str = "eyepi_rpc_request_bytes";
pub const RESPONSE_BYTES: &str = "eyepi_rpc_response_bytes";

/// Observer exposing uptime and Prometheus-formatted call metrics.
pub struct RuntimeObserver {
    service: String,
    started: Instant,
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl RuntimeObserver {
    pub const NAME: &'static str = "runtime";

    pub fn new(service: impl Into<String>) -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        Self {
            service: service.into(),
            started: Instant::now(),
            recorder,
            handle,
        }
    }

    /// Current exposition text.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

impl Observer for RuntimeObserver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn accept(&self, event: &MetricEvent) {
        let operation = event.operation.clone();
        let outcome = event.outcome.label();
        metrics::with_local_recorder(&self.recorder, || {
            metrics::counter!(REQUESTS_TOTAL, "operation" => operation.clone(), "outcome" => outcome)
                .increment(1);
            metrics::histogram!(DURATION_SECONDS, "operation" => operation.clone())
                .record(event.duration.as_secs_f64());
            if let Some(bytes) = event.request_bytes {
                metrics::counter!(REQUEST_BYTES, "operation" => operation.clone()).increment(bytes as u64);
            }
            if let Some(bytes) = event.response_bytes {
                metrics::counter!(RESPONSE_BYTES, "operation" => operation).increment(bytes as u64);
            }
        });
    }

    fn report(&self) -> Result<Value, ObserverError> {
        Ok(serde_json::json!({
            "service": self.service,
            "uptime_secs": self.started.elapsed().as_secs(),
            "pid": std::process::id(),
            "prometheus": self.render(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::Outcome;
    use std::time::Duration;

    #[test]
    fn test_counts_by_outcome() {
        let observer = RuntimeObserver::new("eyepi");
        let ok = MetricEvent::new("/eyepi.EyePi/HelloProxy", Duration::from_millis(2), Outcome::Success)
            .with_sizes(Some(6), Some(6));
        observer.accept(&ok);
        observer.accept(&ok);
        observer.accept(&MetricEvent::new(
            "/eyepi.EyePi/HelloProxy",
            Duration::from_millis(1),
            Outcome::Failure(3),
        ));

        let text = observer.render();
        assert!(text.contains(REQUESTS_TOTAL));
        assert!(text.contains("outcome=\"ok\"} 2"), "{text}");
        assert!(text.contains("outcome=\"error\"} 1"), "{text}");
        assert!(text.contains(REQUEST_BYTES));
    }

    #[test]
    fn test_report_shape() {
        let observer = RuntimeObserver::new("eyepi");
        let report = observer.report().unwrap();
        assert_eq!(report["service"], "eyepi");
        assert!(report["uptime_secs"].is_u64());
        assert!(report["prometheus"].is_string());
    }

    #[test]
    fn test_recorders_are_isolated() {
        let a = RuntimeObserver::new("a");
        let b = RuntimeObserver::new("b");
        a.accept(&MetricEvent::new("/x", Duration::from_millis(1), Outcome::Success));
        assert!(a.render().contains(REQUESTS_TOTAL));
        assert!(!b.render().contains(REQUESTS_TOTAL));
    }
}
