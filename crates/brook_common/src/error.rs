//! Error types shared across the puller pipeline.

use thiserror::Error;

/// Convenience alias for `Result<T, BrookError>`.
pub type BrookResult<T> = Result<T, BrookError>;

/// Errors surfaced by the puller pipeline.
///
/// `Cancelled` is the cooperative-cancellation path and is treated as normal
/// termination by the task supervisor; everything else is a failure that
/// tears the pipeline down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrookError {
    /// The shutdown signal fired while an operation was suspended.
    #[error("operation cancelled")]
    Cancelled,

    /// CDC client construction or transport failure.
    #[error("cdc client: {0}")]
    Client(String),

    /// A region feed terminated with a fatal regional error.
    #[error("region feed: {0}")]
    RegionFeed(String),

    /// A buffer endpoint was dropped while the pipeline still had data for it.
    #[error("buffer closed")]
    BufferClosed,

    /// Invariant violation or unclassified failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrookError {
    /// True for the cooperative-cancellation variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BrookError::Cancelled)
    }

    /// Prefix the error message with `ctx`, preserving cancellation so the
    /// supervisor still recognizes a clean unwind.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        let ctx = ctx.into();
        match self {
            BrookError::Cancelled => BrookError::Cancelled,
            BrookError::Client(msg) => BrookError::Client(format!("{ctx}: {msg}")),
            BrookError::RegionFeed(msg) => BrookError::RegionFeed(format!("{ctx}: {msg}")),
            BrookError::BufferClosed => BrookError::Internal(format!("{ctx}: buffer closed")),
            BrookError::Internal(msg) => BrookError::Internal(format!("{ctx}: {msg}")),
        }
    }
}
