//! Fan-out of metric events to every registered observer.
//!
//! # Responsibilities
//! - Accept events from any number of concurrent producers without blocking them
//! - Deliver each event to every observer, in emission order per observer
//! - Bound memory per observer and count what a lagging observer loses
//! - End the stream on cancellation so observers can finalise
//!
//! # Design Decisions
//! - One `broadcast` channel: a single send per event regardless of observer
//!   count, one receive cursor per observer
//! - Overflow policy is drop-oldest: a lagging observer skips ahead to the
//!   oldest event still buffered; the skipped count is recorded
//! - Each observer consumes on its own OS thread so a stuck observer never
//!   occupies an async worker
//! - The observer set is frozen by `start`
//! - `emit` and `close` share a read/write gate so no event is counted after
//!   the end marker has been sent

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::error::Error;
use crate::lifecycle::shutdown::ShutdownSignal;
use crate::observability::event::MetricEvent;
use crate::observability::observer::Observer;

#[derive(Debug, Clone)]
enum Delivery {
    Event(Arc<MetricEvent>),
    End,
}

/// An observer together with its delivery accounting.
struct Slot {
    observer: Arc<dyn Observer>,
    received: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Default)]
struct Registry {
    pending: Vec<Arc<dyn Observer>>,
    started: bool,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    capacity: usize,
    registry: Mutex<Registry>,
    sender: OnceLock<broadcast::Sender<Delivery>>,
    slots: OnceLock<Vec<Arc<Slot>>>,
    accepting: RwLock<bool>,
    emitted: AtomicU64,
}

/// Delivery counters for one observer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ObserverStats {
    pub name: String,
    pub received: u64,
    pub dropped: u64,
}

/// Delivery counters for the whole subject.
#[derive(Debug, Clone, Serialize)]
pub struct SubjectStats {
    pub emitted: u64,
    pub observers: Vec<ObserverStats>,
}

/// The broadcaster. Cheap to clone; all clones share one stream.
#[derive(Clone)]
pub struct Subject {
    inner: Arc<Inner>,
}

impl Subject {
    /// Create a subject whose observers may each fall `capacity` events behind.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::Configuration("subject capacity must be greater than 0".into()));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                capacity,
                registry: Mutex::new(Registry::default()),
                sender: OnceLock::new(),
                slots: OnceLock::new(),
                accepting: RwLock::new(false),
                emitted: AtomicU64::new(0),
            }),
        })
    }

    /// Add an observer. Only allowed before `start`.
    pub fn register(&self, observer: Arc<dyn Observer>) -> Result<(), Error> {
        let mut registry = self.lock_registry();
        if registry.started {
            return Err(Error::Configuration(format!(
                "observer {} registered after the subject started",
                observer.name()
            )));
        }
        registry.pending.push(observer);
        Ok(())
    }

    /// Freeze the observer set and begin accepting events.
    pub fn start(&self) -> Result<(), Error> {
        let mut registry = self.lock_registry();
        if registry.started {
            return Err(Error::Configuration("subject already started".into()));
        }
        registry.started = true;

        let (sender, _) = broadcast::channel(self.inner.capacity);
        let pending = std::mem::take(&mut registry.pending);
        let mut slots = Vec::with_capacity(pending.len());

        for observer in pending {
            let slot = Arc::new(Slot {
                observer,
                received: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            });
            let receiver = sender.subscribe();
            let worker_slot = Arc::clone(&slot);
            let worker = std::thread::Builder::new()
                .name(format!("observer-{}", slot.observer.name()))
                .spawn(move || consume(worker_slot, receiver))
                .map_err(|e| Error::Configuration(format!("failed to spawn observer thread: {e}")))?;
            registry.workers.push(worker);
            slots.push(slot);
        }

        tracing::info!(
            observers = slots.len(),
            capacity = self.inner.capacity,
            "Metrics subject started"
        );

        let _ = self.inner.slots.set(slots);
        let _ = self.inner.sender.set(sender);
        *self.write_gate() = true;
        Ok(())
    }

    /// Broadcast an event. Never waits on observers; a no-op before `start` and after `close`.
    pub fn emit(&self, event: MetricEvent) {
        let accepting = self.read_gate();
        if !*accepting {
            return;
        }
        if let Some(sender) = self.inner.sender.get() {
            // No receivers means no observers; nothing to deliver.
            let _ = sender.send(Delivery::Event(Arc::new(event)));
            self.inner.emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stop accepting events and signal end-of-stream to every observer.
    pub fn close(&self) {
        let mut accepting = self.write_gate();
        if !*accepting {
            return;
        }
        *accepting = false;
        if let Some(sender) = self.inner.sender.get() {
            let _ = sender.send(Delivery::End);
        }
        drop(accepting);
        tracing::info!(
            emitted = self.inner.emitted.load(Ordering::Relaxed),
            "Metrics subject closed"
        );
    }

    /// Close the subject once `signal` fires.
    pub fn close_on(&self, signal: ShutdownSignal) -> tokio::task::JoinHandle<()> {
        let subject = self.clone();
        tokio::spawn(async move {
            signal.cancelled().await;
            subject.close();
        })
    }

    /// Wait for every observer thread to drain and finish. Call after `close`.
    pub fn join(&self) {
        let workers = std::mem::take(&mut self.lock_registry().workers);
        for worker in workers {
            if worker.join().is_err() {
                tracing::error!("Observer thread terminated abnormally");
            }
        }
    }

    pub fn is_accepting(&self) -> bool {
        *self.read_gate()
    }

    /// The frozen observer set; empty before `start`.
    pub fn observers(&self) -> Vec<Arc<dyn Observer>> {
        self.inner
            .slots
            .get()
            .map(|slots| slots.iter().map(|s| Arc::clone(&s.observer)).collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> SubjectStats {
        let observers = self
            .inner
            .slots
            .get()
            .map(|slots| {
                slots
                    .iter()
                    .map(|s| ObserverStats {
                        name: s.observer.name().to_string(),
                        received: s.received.load(Ordering::Relaxed),
                        dropped: s.dropped.load(Ordering::Relaxed),
                    })
                    .collect()
            })
            .unwrap_or_default();
        SubjectStats {
            emitted: self.inner.emitted.load(Ordering::Relaxed),
            observers,
        }
    }

    fn read_gate(&self) -> std::sync::RwLockReadGuard<'_, bool> {
        self.inner
            .accepting
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_gate(&self) -> std::sync::RwLockWriteGuard<'_, bool> {
        self.inner
            .accepting
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_registry(&self) -> std::sync::MutexGuard<'_, Registry> {
        self.inner
            .registry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Observer thread body.
fn consume(slot: Arc<Slot>, mut receiver: broadcast::Receiver<Delivery>) {
    let name = slot.observer.name().to_string();
    loop {
        match receiver.blocking_recv() {
            Ok(Delivery::Event(event)) => {
                slot.received.fetch_add(1, Ordering::Relaxed);
                let accepted = catch_unwind(AssertUnwindSafe(|| slot.observer.accept(&event)));
                if accepted.is_err() {
                    tracing::error!(observer = %name, operation = %event.operation, "Observer panicked while accepting an event");
                }
            }
            Ok(Delivery::End) | Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(skipped)) => {
                slot.dropped.fetch_add(skipped, Ordering::Relaxed);
                tracing::warn!(observer = %name, skipped, "Observer lagging, oldest events dropped");
            }
        }
    }

    if catch_unwind(AssertUnwindSafe(|| slot.observer.finish())).is_err() {
        tracing::error!(observer = %name, "Observer panicked while finishing");
    }
    tracing::debug!(observer = %name, "Observer stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::event::Outcome;
    use crate::observability::observer::ObserverError;
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    /// Records the sequence numbers it sees.
    struct Recorder {
        name: String,
        seen: Mutex<Vec<u64>>,
        finished: AtomicBool,
    }

    impl Recorder {
        fn new(name: &str) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                seen: Mutex::new(Vec::new()),
                finished: AtomicBool::new(false),
            })
        }

        fn seen(&self) -> Vec<u64> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Observer for Recorder {
        fn name(&self) -> &str {
            &self.name
        }

        fn accept(&self, event: &MetricEvent) {
            let seq = event.tags["seq"].parse().unwrap();
            self.seen.lock().unwrap().push(seq);
        }

        fn report(&self) -> Result<Value, ObserverError> {
            Ok(json!({ "seen": self.seen.lock().unwrap().len() }))
        }

        fn finish(&self) {
            self.finished.store(true, Ordering::SeqCst);
        }
    }

    /// Blocks inside `accept` until released.
    struct Stuck {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl Observer for Stuck {
        fn name(&self) -> &str {
            "stuck"
        }

        fn accept(&self, _event: &MetricEvent) {
            let _ = self.gate.lock().unwrap().recv();
        }

        fn report(&self) -> Result<Value, ObserverError> {
            Ok(Value::Null)
        }
    }

    fn event(seq: u64) -> MetricEvent {
        MetricEvent::new("/test/Op", Duration::from_micros(seq), Outcome::Success)
            .with_tag("seq", seq.to_string())
    }

    #[test]
    fn test_every_observer_sees_events_in_order() {
        let subject = Subject::new(1024).unwrap();
        let a = Recorder::new("a");
        let b = Recorder::new("b");
        subject.register(a.clone()).unwrap();
        subject.register(b.clone()).unwrap();
        subject.start().unwrap();

        for seq in 0..500 {
            subject.emit(event(seq));
        }
        subject.close();
        subject.join();

        let expected: Vec<u64> = (0..500).collect();
        assert_eq!(a.seen(), expected);
        assert_eq!(b.seen(), expected);
        assert!(a.finished.load(Ordering::SeqCst));
        assert!(b.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_concurrent_producers_keep_per_producer_order() {
        let subject = Subject::new(100_000).unwrap();
        let recorder = Recorder::new("rec");
        subject.register(recorder.clone()).unwrap();
        subject.start().unwrap();

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let subject = subject.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        subject.emit(event(p * 10_000 + i));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        subject.close();
        subject.join();

        let seen = recorder.seen();
        assert_eq!(seen.len(), 4000);
        for p in 0..4u64 {
            let mine: Vec<u64> = seen.iter().copied().filter(|s| s / 10_000 == p).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
        }
    }

    #[test]
    fn test_register_after_start_is_configuration_error() {
        let subject = Subject::new(8).unwrap();
        subject.start().unwrap();
        let err = subject.register(Recorder::new("late")).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(matches!(subject.start(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(matches!(Subject::new(0), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_zero_observers_emit_is_noop() {
        let subject = Subject::new(8).unwrap();
        subject.start().unwrap();
        for seq in 0..100 {
            subject.emit(event(seq));
        }
        assert!(subject.observers().is_empty());
        assert_eq!(subject.stats().emitted, 100);
        subject.close();
        subject.join();
    }

    #[test]
    fn test_emit_after_close_is_noop() {
        let subject = Subject::new(8).unwrap();
        let recorder = Recorder::new("rec");
        subject.register(recorder.clone()).unwrap();
        subject.start().unwrap();
        subject.emit(event(1));
        subject.close();
        subject.emit(event(2));
        subject.join();

        assert_eq!(recorder.seen(), vec![1]);
        assert!(!subject.is_accepting());
        assert_eq!(subject.stats().emitted, 1);
    }

    #[test]
    fn test_emit_before_start_is_noop() {
        let subject = Subject::new(8).unwrap();
        let recorder = Recorder::new("rec");
        subject.register(recorder.clone()).unwrap();
        subject.emit(event(0));
        subject.start().unwrap();
        subject.close();
        subject.join();
        assert!(recorder.seen().is_empty());
    }

    #[test]
    fn test_stuck_observer_does_not_block_emit_or_others() {
        let (release, gate) = mpsc::channel();
        let subject = Subject::new(64).unwrap();
        let fast = Recorder::new("fast");
        subject.register(Arc::new(Stuck { gate: Mutex::new(gate) })).unwrap();
        subject.register(fast.clone()).unwrap();
        subject.start().unwrap();

        let started = Instant::now();
        for seq in 0..50_000 {
            subject.emit(event(seq));
        }
        assert!(started.elapsed() < Duration::from_secs(5));

        // Stuck observer has fallen behind by far more than its window.
        drop(release);
        subject.close();
        subject.join();

        let stats = subject.stats();
        let stuck = stats.observers.iter().find(|o| o.name == "stuck").unwrap();
        assert!(stuck.dropped > 0);
        assert!(stuck.received + stuck.dropped <= 50_000);

        let seen = fast.seen();
        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        struct Panics;
        impl Observer for Panics {
            fn name(&self) -> &str {
                "panics"
            }
            fn accept(&self, _event: &MetricEvent) {
                panic!("observer failure");
            }
            fn report(&self) -> Result<Value, ObserverError> {
                Ok(Value::Null)
            }
        }

        let subject = Subject::new(16).unwrap();
        let recorder = Recorder::new("rec");
        subject.register(Arc::new(Panics)).unwrap();
        subject.register(recorder.clone()).unwrap();
        subject.start().unwrap();
        for seq in 0..10 {
            subject.emit(event(seq));
        }
        subject.close();
        subject.join();

        assert_eq!(recorder.seen().len(), 10);
        let stats = subject.stats();
        assert_eq!(stats.observers[0].received, 10);
    }

    #[test]
    fn test_emit_racing_close_is_counted_only_when_delivered() {
        let subject = Subject::new(1 << 16).unwrap();
        let recorder = Recorder::new("rec");
        subject.register(recorder.clone()).unwrap();
        subject.start().unwrap();

        let producers: Vec<_> = (0..4u64)
            .map(|p| {
                let subject = subject.clone();
                std::thread::spawn(move || {
                    for i in 0..5_000 {
                        subject.emit(event(p * 10_000 + i));
                    }
                })
            })
            .collect();
        std::thread::sleep(Duration::from_millis(1));
        subject.close();
        for producer in producers {
            producer.join().unwrap();
        }
        subject.join();

        let stats = subject.stats();
        assert_eq!(stats.emitted, recorder.seen().len() as u64);
        assert_eq!(stats.observers[0].received, stats.emitted);
    }

    #[tokio::test]
    async fn test_close_on_shutdown_signal() {
        let shutdown = crate::lifecycle::Shutdown::new();
        let subject = Subject::new(8).unwrap();
        subject.start().unwrap();
        let closer = subject.close_on(shutdown.subscribe());

        assert!(subject.is_accepting());
        shutdown.trigger();
        closer.await.unwrap();
        assert!(!subject.is_accepting());
    }
}
