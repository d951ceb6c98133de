//! Change-data puller core.
//!
//! Fans in per-span region feeds from a sharded transactional KV store,
//! applies byte- and count-level backpressure, tracks the span frontier, and
//! emits a totally-ordered stream of mutations interleaved with a monotonic
//! global resolved ts.
//!
//! ```text
//! region feeds ─▶ span filter ─▶ MemBuffer ─▶ ChanBuffer ─┬▶ frontier + resolved-ts publish
//!                                                         └▶ EntrySorter ─▶ sorted output
//! ```

pub mod buffer;
pub mod frontier;
pub mod limiter;
pub mod puller;
pub mod sorter;
pub mod txn;

pub use buffer::{ChanBuffer, MemBuffer, DEFAULT_CHAN_BUFFER_CAPACITY};
pub use frontier::SpanFrontier;
pub use limiter::{BlurLimiterConfig, BlurResourceLimiter};
pub use puller::{CancellablePuller, Puller, PullerConfig, DEFAULT_EVENT_CHANNEL_CAPACITY};
pub use sorter::{EntrySorter, DEFAULT_SORTED_OUTPUT_CAPACITY};
pub use txn::{collect_raw_txns, EntryGroup};
