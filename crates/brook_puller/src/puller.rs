//! Puller driver: supervises the region feeds, the span filter, and the
//! buffering pipeline, and publishes the global resolved ts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use brook_common::{
    key_in_spans, BrookError, BrookResult, RawKvEntry, RegionFeedEvent, ShutdownSignal, Span,
    TaskGroup, Ts,
};
use brook_kv::CdcConnector;
use brook_observability as obs;

use crate::buffer::{ChanBuffer, MemBuffer};
use crate::frontier::SpanFrontier;
use crate::limiter::BlurResourceLimiter;
use crate::sorter::{EntrySorter, DEFAULT_SORTED_OUTPUT_CAPACITY};

/// Default capacity of the merged region-feed event channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128_000;

/// Tunables for one puller instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullerConfig {
    /// Capacity of the merged event channel all region feeds push into.
    pub event_channel_capacity: usize,
    /// Slot capacity of the channel buffer between drain and sorter.
    pub chan_buffer_capacity: usize,
    /// Capacity of the sorted output channel.
    pub sorted_output_capacity: usize,
    /// Interval of the buffer-size observability tick.
    pub observe_interval: Duration,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            chan_buffer_capacity: crate::buffer::DEFAULT_CHAN_BUFFER_CAPACITY,
            sorted_output_capacity: DEFAULT_SORTED_OUTPUT_CAPACITY,
            observe_interval: Duration::from_secs(60),
        }
    }
}

/// Pulls change data for a set of spans and exposes raw and sorted outputs.
///
/// One puller owns one memory buffer, one channel buffer, and one frontier;
/// the shared limiter applies byte backpressure across all of its feeds.
pub struct Puller {
    connector: Arc<dyn CdcConnector>,
    checkpoint_ts: Ts,
    spans: Vec<Span>,
    /// Whether feed keys must be pre-encoded before span membership tests.
    need_encode: bool,
    buffer: MemBuffer,
    chan_buffer: ChanBuffer,
    /// Written only by the sorted-output task.
    frontier: Mutex<SpanFrontier>,
    resolved_ts: AtomicU64,
    config: PullerConfig,
}

impl Puller {
    /// Create a puller fetching events from `checkpoint_ts` over `spans`.
    pub fn new(
        connector: Arc<dyn CdcConnector>,
        checkpoint_ts: Ts,
        spans: Vec<Span>,
        need_encode: bool,
        limiter: Arc<BlurResourceLimiter>,
        config: PullerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            frontier: Mutex::new(SpanFrontier::new(spans.iter().cloned())),
            buffer: MemBuffer::new(limiter),
            chan_buffer: ChanBuffer::new(config.chan_buffer_capacity),
            connector,
            checkpoint_ts,
            spans,
            need_encode,
            resolved_ts: AtomicU64::new(0),
            config,
        })
    }

    /// Raw pre-sort stream, ordered by arrival. For consumers that implement
    /// their own ordering (e.g. [`collect_raw_txns`](crate::txn::collect_raw_txns)).
    pub fn output(&self) -> ChanBuffer {
        self.chan_buffer.clone()
    }

    /// Last published global resolved ts (lock-free read).
    pub fn get_resolved_ts(&self) -> Ts {
        Ts(self.resolved_ts.load(Ordering::Acquire))
    }

    /// Install an [`EntrySorter`] over the raw output and return its stream.
    ///
    /// The spawned reader is the single writer of the frontier and the
    /// published resolved ts. On each marker it forwards the frontier and,
    /// only when the global minimum strictly advances, publishes the new
    /// minimum and injects a synthetic resolved entry into the sorter, so
    /// markers reaching the sorter are strictly increasing.
    pub fn sorted_output(self: &Arc<Self>, signal: &ShutdownSignal) -> ReceiverStream<RawKvEntry> {
        let (sorter, output_rx) = EntrySorter::new(self.config.sorted_output_capacity);

        let flusher = Arc::clone(&sorter);
        let flusher_signal = signal.clone();
        tokio::spawn(async move {
            match flusher.run(flusher_signal).await {
                Ok(()) => tracing::debug!("entry sorter stopped"),
                Err(error) if error.is_cancelled() => {
                    tracing::debug!("entry sorter cancelled");
                }
                Err(error) => tracing::error!(error = %error, "entry sorter failed"),
            }
        });

        let puller = Arc::clone(self);
        let reader_signal = signal.clone();
        tokio::spawn(async move {
            loop {
                let event = match puller.chan_buffer.get(&reader_signal).await {
                    Ok(event) => event,
                    Err(error) => {
                        if error.is_cancelled() {
                            tracing::debug!("sorted output reader cancelled");
                        } else {
                            tracing::error!(error = %error, "sorted output reader failed");
                        }
                        break;
                    }
                };
                match event {
                    RegionFeedEvent::Val(entry) => {
                        obs::record_txn_collect("kv");
                        sorter.add_entry(entry);
                    }
                    RegionFeedEvent::Resolved(resolved) => {
                        obs::record_txn_collect("resolved");
                        // forward() is serialized on this task, so reading the
                        // frontier right after it is an atomic view of the new
                        // global minimum.
                        let (advanced, frontier_ts) = {
                            let mut frontier = puller.frontier.lock();
                            let advanced =
                                frontier.forward(&resolved.span, resolved.resolved_ts);
                            (advanced, frontier.frontier())
                        };
                        if !advanced {
                            continue;
                        }
                        obs::record_resolved_ts(frontier_ts.physical());
                        puller.resolved_ts.store(frontier_ts.0, Ordering::Release);
                        sorter.add_entry(RawKvEntry::resolved(frontier_ts));
                    }
                }
            }
        });

        ReceiverStream::new(output_rx)
    }

    /// Run the pipeline until the signal fires or a child task fails.
    /// Returns the first non-cancellation error observed.
    pub async fn run(&self, signal: &ShutdownSignal) -> BrookResult<()> {
        let client = self
            .connector
            .connect()
            .await
            .map_err(|error| error.context("create cdc client failed"))?;

        tracing::info!(
            spans = self.spans.len(),
            checkpoint_ts = %self.checkpoint_ts,
            "puller starting"
        );

        let mut group = TaskGroup::new(signal);
        let (event_tx, event_rx) =
            mpsc::channel::<RegionFeedEvent>(self.config.event_channel_capacity);

        // T1: one region feed per subscribed span.
        for span in &self.spans {
            let client = Arc::clone(&client);
            let feed_signal = group.signal();
            let sink = event_tx.clone();
            let span = span.clone();
            let checkpoint_ts = self.checkpoint_ts;
            group.spawn(async move {
                client
                    .event_feed(feed_signal, span, checkpoint_ts, sink)
                    .await
            });
        }

        // T2: observability tick. The probe is a weak sender so sampling
        // never holds the event channel open; once every feed has dropped
        // its sink, the channel really closes and ingress can drain out.
        let tick_signal = group.signal();
        let chan_buffer = self.chan_buffer.clone();
        let buffer = self.buffer.clone();
        let event_probe = event_tx.downgrade();
        let interval = self.config.observe_interval;
        group.spawn(async move {
            loop {
                tokio::select! {
                    _ = tick_signal.wait() => return Ok(()),
                    _ = tokio::time::sleep(interval) => {
                        // Upgrade failure means every feed has dropped its
                        // sink; nothing is producing into the channel anymore.
                        let event_channel_len = event_probe
                            .upgrade()
                            .map_or(0, |probe| probe.max_capacity() - probe.capacity());
                        obs::record_buffer_sizes(
                            chan_buffer.len(),
                            event_channel_len,
                            buffer.size(),
                        );
                    }
                }
            }
        });

        drop(event_tx);

        // T3: ingress filter/merge, the sole receiver of the event channel.
        // A region serving [a, z) answers a request for [b, c) with every key
        // event in the region, so out-of-span keys must be dropped here or
        // the output would carry keys nobody subscribed to.
        let ingress_signal = group.signal();
        let buffer = self.buffer.clone();
        let spans = self.spans.clone();
        let need_encode = self.need_encode;
        group.spawn(async move {
            let mut event_rx = event_rx;
            loop {
                tokio::select! {
                    _ = ingress_signal.wait() => return Err(BrookError::Cancelled),
                    received = event_rx.recv() => {
                        // Every feed sender dropped: nothing left to merge.
                        let Some(event) = received else { return Ok(()); };
                        match &event {
                            RegionFeedEvent::Val(entry) => {
                                obs::record_kv_event("kv");
                                if !key_in_spans(&entry.key, &spans, need_encode) {
                                    tracing::debug!(
                                        key = ?entry.key,
                                        "dropping key outside subscribed spans"
                                    );
                                    continue;
                                }
                            }
                            RegionFeedEvent::Resolved(_) => obs::record_kv_event("resolved"),
                        }
                        buffer.add_entry(&ingress_signal, event).await?;
                    }
                }
            }
        });

        // T4: drain the memory buffer into the channel buffer.
        let drain_signal = group.signal();
        let buffer = self.buffer.clone();
        let chan_buffer = self.chan_buffer.clone();
        group.spawn(async move {
            loop {
                let event = buffer.get(&drain_signal).await?;
                chan_buffer.add_entry(&drain_signal, event).await?;
            }
        });

        let result = group.wait().await;
        client.close();
        tracing::info!("puller stopped");
        result
    }
}

/// A puller paired with the signal that stops it, for owners that manage one
/// puller per table.
pub struct CancellablePuller {
    pub puller: Arc<Puller>,
    signal: ShutdownSignal,
}

impl CancellablePuller {
    pub fn new(puller: Arc<Puller>, signal: ShutdownSignal) -> Self {
        Self { puller, signal }
    }

    /// The signal `run` and the sorted output were started with.
    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Stop the puller.
    pub fn cancel(&self) {
        self.signal.shutdown();
    }
}
