//! Failure-grouped task supervision.
//!
//! The pipeline runs under a single group: the first task to fail shuts the
//! group's signal down so siblings unwind, and the failure is reported from
//! [`TaskGroup::wait`]. `Cancelled` results are the normal unwind path and do
//! not count as failures.

use std::future::Future;

use tokio::task::JoinSet;

use crate::error::{BrookError, BrookResult};
use crate::shutdown::ShutdownSignal;

/// Supervises a set of tasks under a shared, derived shutdown signal.
pub struct TaskGroup {
    signal: ShutdownSignal,
    tasks: JoinSet<BrookResult<()>>,
}

impl TaskGroup {
    /// Create a group whose signal is a child of `parent`: the caller can
    /// cancel the whole group, and a group failure never fires the caller's
    /// signal.
    pub fn new(parent: &ShutdownSignal) -> Self {
        Self {
            signal: parent.child(),
            tasks: JoinSet::new(),
        }
    }

    /// The group's shutdown signal; hand a clone to every spawned task.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn a supervised task.
    pub fn spawn<F>(&mut self, fut: F)
    where
        F: Future<Output = BrookResult<()>> + Send + 'static,
    {
        self.tasks.spawn(fut);
    }

    /// Join every task, returning the first non-cancellation error.
    ///
    /// Any task error fires the group signal so siblings unwind. Panicked
    /// tasks surface as internal errors.
    pub async fn wait(mut self) -> BrookResult<()> {
        let mut first_err: Option<BrookError> = None;
        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_err) => Err(BrookError::Internal(format!("task panicked: {join_err}"))),
            };
            if let Err(err) = result {
                if !err.is_cancelled() {
                    tracing::warn!(error = %err, "task failed, shutting group down");
                    if first_err.is_none() {
                        first_err = Some(err);
                    }
                }
                self.signal.shutdown();
            }
        }
        self.signal.shutdown();
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
