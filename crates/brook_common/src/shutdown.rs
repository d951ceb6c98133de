//! Cooperative shutdown signal for pipeline tasks.
//!
//! Every suspension point in the pipeline selects against [`ShutdownSignal::wait`]
//! so that cancellation unblocks channel sends, channel receives, and limiter
//! waits within one scheduling quantum.

use std::sync::Arc;

use tokio::sync::watch;

/// Clonable cancellation signal.
///
/// `shutdown()` is sticky: once fired it stays fired, and every clone and
/// every in-flight `wait()` observes it.
#[derive(Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    /// Create a signal in the non-shutdown state.
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Fire the signal, waking all waiters.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }

    /// Non-blocking check.
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Derive a child signal: it fires when the parent fires or when it is
    /// shut down directly. Shutting down the child leaves the parent
    /// untouched. Must be called from within a tokio runtime.
    pub fn child(&self) -> ShutdownSignal {
        let child = ShutdownSignal::new();
        if self.is_shutdown() {
            child.shutdown();
            return child;
        }
        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.wait() => forward.shutdown(),
                // The child fired on its own; nothing left to forward.
                _ = forward.wait() => {}
            }
        });
        child
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
