//! The observer capability: consume events, report on demand.

use serde_json::Value;

use crate::observability::event::MetricEvent;

/// A failure inside one observer. Never reaches an RPC caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObserverError {
    #[error("observer {observer} failed to report: {reason}")]
    Report { observer: String, reason: String },
}

/// An independent consumer of the event stream.
///
/// The subject calls `accept` from a single dedicated thread per observer, in
/// emission order. `report` is called from the exporter concurrently with
/// `accept`, so implementations guard their state internally and keep
/// reporting proportional to what they retain, not to all history.
pub trait Observer: Send + Sync + 'static {
    /// Key under which this observer's report is published.
    fn name(&self) -> &str;

    /// Take one event. Must not block indefinitely.
    fn accept(&self, event: &MetricEvent);

    /// Produce the current snapshot.
    fn report(&self) -> Result<Value, ObserverError>;

    /// Called once after the stream has ended and everything received was accepted.
    fn finish(&self) {}
}
