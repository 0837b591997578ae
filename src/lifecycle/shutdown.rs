//! Shutdown coordination for the service.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, watch};

use crate::config::ShutdownConfig;
use crate::rpc::RpcServerHandle;

/// The process-wide cancellation context.
///
/// Cloning shares the context; every long-running task holds a
/// [`ShutdownSignal`] obtained from [`Shutdown::subscribe`].
#[derive(Clone)]
pub struct Shutdown {
    tx: Arc<watch::Sender<bool>>,
}

impl Shutdown {
    /// Create a new, untriggered context.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Subscribe to the shutdown signal. Subscribing after the trigger still observes it.
    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// One task's view of the cancellation context.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Resolve once the context is cancelled.
    pub async fn cancelled(mut self) {
        // An error means every sender is gone, which only happens at teardown.
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }
}

/// A zero-argument teardown action registered by an optional subsystem.
pub type CancelFn = Box<dyn FnOnce() + Send + 'static>;

struct NamedCancel {
    name: String,
    cancel: CancelFn,
}

/// What a shutdown run did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub timed_out: Vec<String>,
}

/// Unwinds startup when the process is asked to terminate.
///
/// Sequence: cancel the shared context, run every cancel callback oldest
/// first, then stop the RPC listener. Each callback runs on its own detached
/// thread under its own timeout; a failing or hung callback is logged and
/// skipped, and a hung one never holds up runtime teardown.
/// Only the first call to [`shutdown`](Self::shutdown) does anything.
pub struct ShutdownCoordinator {
    context: Shutdown,
    callbacks: Mutex<Vec<NamedCancel>>,
    listener: Mutex<Option<RpcServerHandle>>,
    started: AtomicBool,
    callback_timeout: Duration,
    listener_grace: Duration,
}

impl ShutdownCoordinator {
    pub fn new(context: Shutdown, config: &ShutdownConfig) -> Self {
        Self {
            context,
            callbacks: Mutex::new(Vec::new()),
            listener: Mutex::new(None),
            started: AtomicBool::new(false),
            callback_timeout: Duration::from_millis(config.callback_timeout_ms),
            listener_grace: Duration::from_millis(config.listener_grace_ms),
        }
    }

    /// The shared cancellation context.
    pub fn context(&self) -> &Shutdown {
        &self.context
    }

    /// Append a cancel callback. Ignored once shutdown has begun.
    pub fn register(&self, name: impl Into<String>, cancel: CancelFn) {
        let name = name.into();
        if self.started.load(Ordering::Acquire) {
            tracing::warn!(callback = %name, "Cancel callback registered during shutdown, ignoring");
            return;
        }
        tracing::debug!(callback = %name, "Cancel callback registered");
        lock(&self.callbacks).push(NamedCancel { name, cancel });
    }

    /// Hand over the RPC listener, stopped last.
    pub fn set_listener(&self, handle: RpcServerHandle) {
        *lock(&self.listener) = Some(handle);
    }

    /// Number of callbacks waiting to run.
    pub fn pending(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Run the teardown sequence. Returns `None` when shutdown already ran or is running.
    pub async fn shutdown(&self) -> Option<ShutdownReport> {
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::info!("Shutdown already in progress");
            return None;
        }

        tracing::info!("Cancelling shared context");
        self.context.trigger();

        let callbacks = std::mem::take(&mut *lock(&self.callbacks));
        let mut report = ShutdownReport::default();

        for NamedCancel { name, cancel } in callbacks {
            let outcome = match run_detached(&name, cancel) {
                Ok(done) => tokio::time::timeout(self.callback_timeout, done).await,
                Err(e) => {
                    tracing::error!(callback = %name, error = %e, "Failed to spawn cancel callback thread");
                    Ok(Ok(false))
                }
            };
            match outcome {
                Ok(Ok(true)) => {
                    tracing::debug!(callback = %name, "Cancel callback completed");
                    report.completed.push(name);
                }
                Ok(Ok(false)) | Ok(Err(_)) => {
                    tracing::error!(callback = %name, "Cancel callback panicked, continuing");
                    report.failed.push(name);
                }
                Err(_) => {
                    tracing::warn!(
                        callback = %name,
                        timeout_ms = self.callback_timeout.as_millis() as u64,
                        "Cancel callback timed out, skipping"
                    );
                    report.timed_out.push(name);
                }
            }
        }

        let listener = lock(&self.listener).take();
        if let Some(listener) = listener {
            tracing::info!(address = %listener.local_addr(), "Stopping RPC listener");
            listener.stop(self.listener_grace).await;
        }

        tracing::info!(
            completed = report.completed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            "Shutdown sequence finished"
        );
        Some(report)
    }
}

/// Run `cancel` on a thread nobody joins. The receiver yields `true` when it
/// returned normally and `false` when it panicked.
fn run_detached(name: &str, cancel: CancelFn) -> std::io::Result<oneshot::Receiver<bool>> {
    let (tx, rx) = oneshot::channel();
    std::thread::Builder::new()
        .name(format!("cancel-{name}"))
        .spawn(move || {
            let returned = std::panic::catch_unwind(AssertUnwindSafe(cancel)).is_ok();
            let _ = tx.send(returned);
        })?;
    Ok(rx)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
