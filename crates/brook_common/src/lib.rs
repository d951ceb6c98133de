//! Shared foundation for the Brook change-data puller: the event data model,
//! span utilities, error types, and cooperative shutdown / task supervision.

pub mod error;
pub mod keys;
pub mod shutdown;
pub mod span;
pub mod task;
pub mod types;

pub use error::{BrookError, BrookResult};
pub use shutdown::ShutdownSignal;
pub use span::{key_in_spans, Span};
pub use task::TaskGroup;
pub use types::{
    OpType, RawKvEntry, RawTxn, RegionFeedEvent, RegionId, ResolvedSpan, Ts,
};
