//! Upstream CDC client interface.
//!
//! The real region client (gRPC feeds, region split handling, leader
//! failover, retries, per-region resolved-ts emission) lives outside this
//! repository. The puller consumes it through these traits, and the channel
//! implementation in [`crate::channel`] stands in for it in-process.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use brook_common::{BrookResult, RegionFeedEvent, ShutdownSignal, Span, Ts};

/// Send end of the merged event channel a feed pushes into.
pub type EventSink = mpsc::Sender<RegionFeedEvent>;

/// One upstream CDC client connection.
#[async_trait]
pub trait CdcClient: Send + Sync {
    /// Open a feed over `span` starting at `start_ts`, pushing events into
    /// `sink` until the signal fires or a fatal regional error occurs.
    ///
    /// Implementations own region splits, leader failover, and retries. The
    /// events reaching `sink` are ordered per region, and resolved-ts markers
    /// for a region are non-decreasing. Keys outside `span` may still appear
    /// when region boundaries are wider than the request; the puller filters
    /// them.
    async fn event_feed(
        &self,
        signal: ShutdownSignal,
        span: Span,
        start_ts: Ts,
        sink: EventSink,
    ) -> BrookResult<()>;

    /// Release client resources. Idempotent.
    fn close(&self);
}

/// Builds a [`CdcClient`] from whatever directory-service handle the
/// deployment uses. Connection failure is the puller's fatal startup error.
#[async_trait]
pub trait CdcConnector: Send + Sync {
    async fn connect(&self) -> BrookResult<Arc<dyn CdcClient>>;
}
