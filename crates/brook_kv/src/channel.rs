//! In-process channel-backed CDC client.
//!
//! Stands in for the network client in tests and embedded deployments: each
//! subscribed span gets a scripted feed the caller pushes `RegionFeedEvent`s
//! into, optionally terminated by an injected error once the scripted events
//! have been consumed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use brook_common::{BrookError, BrookResult, RegionFeedEvent, ShutdownSignal, Span, Ts};

use crate::client::{CdcClient, CdcConnector, EventSink};

/// Capacity of each scripted feed channel.
const FEED_CHANNEL_CAPACITY: usize = 1024;

struct ScriptedFeed {
    rx: mpsc::Receiver<RegionFeedEvent>,
    /// Error returned once the scripted events are drained.
    trailing_error: Option<String>,
}

/// A CDC client whose feeds are driven through channels instead of the wire.
pub struct ChannelCdcClient {
    feeds: Mutex<HashMap<Span, ScriptedFeed>>,
    closed: AtomicBool,
}

impl ChannelCdcClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            feeds: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Register a feed for `span`; push events into the returned sender.
    /// Dropping the sender ends the feed cleanly.
    pub fn register_feed(&self, span: Span) -> mpsc::Sender<RegionFeedEvent> {
        self.script_feed(span, None)
    }

    /// Register a feed that fails with `reason` after its scripted events
    /// have been consumed.
    pub fn register_failing_feed(
        &self,
        span: Span,
        reason: impl Into<String>,
    ) -> mpsc::Sender<RegionFeedEvent> {
        self.script_feed(span, Some(reason.into()))
    }

    fn script_feed(
        &self,
        span: Span,
        trailing_error: Option<String>,
    ) -> mpsc::Sender<RegionFeedEvent> {
        let (tx, rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);
        self.feeds.lock().insert(span, ScriptedFeed { rx, trailing_error });
        tx
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CdcClient for ChannelCdcClient {
    async fn event_feed(
        &self,
        signal: ShutdownSignal,
        span: Span,
        _start_ts: Ts,
        sink: EventSink,
    ) -> BrookResult<()> {
        let feed = self.feeds.lock().remove(&span);
        let Some(mut feed) = feed else {
            return Err(BrookError::Client(format!(
                "no scripted feed registered for span {span}"
            )));
        };
        loop {
            tokio::select! {
                _ = signal.wait() => return Err(BrookError::Cancelled),
                received = feed.rx.recv() => {
                    let Some(event) = received else {
                        tracing::debug!(%span, "scripted feed ended");
                        return match feed.trailing_error {
                            Some(reason) => Err(BrookError::RegionFeed(reason)),
                            None => Ok(()),
                        };
                    };
                    tokio::select! {
                        _ = signal.wait() => return Err(BrookError::Cancelled),
                        sent = sink.send(event) => {
                            // The driver dropped its receive end; nothing left to feed.
                            if sent.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

enum ConnectorInner {
    Ready(Arc<ChannelCdcClient>),
    Fail(String),
}

/// Connector handing out a pre-built channel client, or a scripted failure
/// for exercising the fatal startup path.
pub struct ChannelConnector {
    inner: ConnectorInner,
}

impl ChannelConnector {
    pub fn new(client: Arc<ChannelCdcClient>) -> Arc<Self> {
        Arc::new(Self {
            inner: ConnectorInner::Ready(client),
        })
    }

    /// A connector whose `connect` always fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            inner: ConnectorInner::Fail(reason.into()),
        })
    }
}

#[async_trait]
impl CdcConnector for ChannelConnector {
    async fn connect(&self) -> BrookResult<Arc<dyn CdcClient>> {
        match &self.inner {
            ConnectorInner::Ready(client) => Ok(Arc::clone(client) as Arc<dyn CdcClient>),
            ConnectorInner::Fail(reason) => Err(BrookError::Client(reason.clone())),
        }
    }
}
