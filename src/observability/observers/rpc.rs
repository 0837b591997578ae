//! Ring-buffer observer for RPC calls.
//!
//! Keeps the last `capacity` events for latency statistics and cumulative
//! per-operation counters. Reporting walks the ring once, so its cost is
//! bounded by the ring size rather than by uptime.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::observability::event::{MetricEvent, Outcome};
use crate::observability::observer::{Observer, ObserverError};

#[derive(Debug, Default, Clone, Serialize)]
struct Totals {
    requests: u64,
    errors: u64,
    aborted: u64,
    request_bytes: u64,
    response_bytes: u64,
}

impl Totals {
    fn record(&mut self, event: &MetricEvent) {
        self.requests += 1;
        match event.outcome {
            Outcome::Success => {}
            Outcome::Failure(_) => self.errors += 1,
            Outcome::Aborted => self.aborted += 1,
        }
        self.request_bytes += event.request_bytes.unwrap_or(0) as u64;
        self.response_bytes += event.response_bytes.unwrap_or(0) as u64;
    }
}

/// Latency summary over the retained window, in milliseconds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencySummary {
    pub samples: usize,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    fn from_durations(mut durations: Vec<Duration>) -> Option<Self> {
        if durations.is_empty() {
            return None;
        }
        durations.sort_unstable();
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;
        let pick = |q: f64| {
            let idx = ((durations.len() as f64 * q).ceil() as usize).clamp(1, durations.len()) - 1;
            ms(durations[idx])
        };
        let total: f64 = durations.iter().copied().map(ms).sum();
        Some(Self {
            samples: durations.len(),
            avg_ms: total / durations.len() as f64,
            p50_ms: pick(0.50),
            p90_ms: pick(0.90),
            p99_ms: pick(0.99),
            max_ms: ms(durations[durations.len() - 1]),
        })
    }
}

struct State {
    window: VecDeque<(String, Duration)>,
    totals: Totals,
    per_operation: BTreeMap<String, Totals>,
}

/// Observer that summarises RPC traffic.
pub struct RpcObserver {
    capacity: usize,
    state: Mutex<State>,
}

impl RpcObserver {
    pub const NAME: &'static str = "rpc";

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                window: VecDeque::with_capacity(capacity),
                totals: Totals::default(),
                per_operation: BTreeMap::new(),
            }),
        }
    }

    /// Latency over the retained window, optionally for one operation.
    pub fn latency(&self, operation: Option<&str>) -> Option<LatencySummary> {
        let state = self.state.lock().ok()?;
        let durations = state
            .window
            .iter()
            .filter(|(op, _)| operation.map_or(true, |wanted| op == wanted))
            .map(|(_, d)| *d)
            .collect();
        LatencySummary::from_durations(durations)
    }
}

impl Observer for RpcObserver {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn accept(&self, event: &MetricEvent) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.window.len() == self.capacity {
            state.window.pop_front();
        }
        state.window.push_back((event.operation.clone(), event.duration));
        state.totals.record(event);
        state
            .per_operation
            .entry(event.operation.clone())
            .or_default()
            .record(event);
    }

    fn report(&self) -> Result<Value, ObserverError> {
        let state = self.state.lock().map_err(|_| ObserverError::Report {
            observer: Self::NAME.to_string(),
            reason: "state lock poisoned".to_string(),
        })?;

        let mut windows: BTreeMap<&str, Vec<Duration>> = BTreeMap::new();
        let mut all = Vec::with_capacity(state.window.len());
        for (op, duration) in &state.window {
            windows.entry(op.as_str()).or_default().push(*duration);
            all.push(*duration);
        }

        let operations: serde_json::Map<String, Value> = state
            .per_operation
            .iter()
            .map(|(op, totals)| {
                let latency = windows
                    .remove(op.as_str())
                    .and_then(LatencySummary::from_durations);
                (
                    op.clone(),
                    serde_json::json!({ "totals": totals, "latency": latency }),
                )
            })
            .collect();

        Ok(serde_json::json!({
            "window": { "capacity": self.capacity, "len": state.window.len() },
            "totals": state.totals,
            "latency": LatencySummary::from_durations(all),
            "operations": operations,
        }))
    }
}
