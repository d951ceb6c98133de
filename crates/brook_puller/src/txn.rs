//! Legacy whole-transaction grouping.
//!
//! Groups entries by commit ts and releases them at each resolved-ts
//! boundary. The [`EntrySorter`](crate::sorter::EntrySorter) path supersedes
//! this for new consumers; it is kept for consumers that replay whole
//! transactions from [`Puller::output`](crate::puller::Puller::output). An
//! idle window still emits a fake (empty) transaction so downstream progress
//! tracking does not stall.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use brook_common::{
    BrookError, BrookResult, RawKvEntry, RawTxn, RegionFeedEvent, ShutdownSignal, Ts,
};

use crate::buffer::ChanBuffer;
use crate::frontier::SpanFrontier;

/// Entries awaiting a resolved-ts boundary, keyed by commit ts.
#[derive(Debug, Default)]
pub struct EntryGroup {
    entries: BTreeMap<Ts, Vec<RawKvEntry>>,
}

impl EntryGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer one entry under its commit ts.
    pub fn add_entry(&mut self, ts: Ts, entry: RawKvEntry) {
        self.entries.entry(ts).or_default().push(entry);
    }

    /// Drain every buffered transaction with `ts <= resolved_ts`, ascending.
    pub fn consume(&mut self, resolved_ts: Ts) -> Vec<RawTxn> {
        let retained = self.entries.split_off(&Ts(resolved_ts.0.saturating_add(1)));
        let ready = std::mem::replace(&mut self.entries, retained);
        ready
            .into_iter()
            .map(|(ts, entries)| RawTxn { ts, entries })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Drive an [`EntryGroup`] from `input`, forwarding `frontier` on each
/// resolved-ts marker and emitting grouped transactions per advance of the
/// global minimum. An advance with no ready transactions emits a fake txn.
pub async fn collect_raw_txns(
    signal: &ShutdownSignal,
    input: &ChanBuffer,
    output: &mpsc::Sender<RawTxn>,
    frontier: &mut SpanFrontier,
) -> BrookResult<()> {
    let mut group = EntryGroup::new();
    loop {
        let event = input.get(signal).await?;
        match event {
            RegionFeedEvent::Val(entry) => group.add_entry(entry.crts, entry),
            RegionFeedEvent::Resolved(resolved) => {
                if !frontier.forward(&resolved.span, resolved.resolved_ts) {
                    continue;
                }
                let boundary = frontier.frontier();
                let ready = group.consume(boundary);
                if ready.is_empty() {
                    tracing::debug!(ts = %boundary, "forwarding fake txn");
                    send_txn(
                        signal,
                        output,
                        RawTxn {
                            ts: boundary,
                            entries: Vec::new(),
                        },
                    )
                    .await?;
                    continue;
                }
                for txn in ready {
                    send_txn(signal, output, txn).await?;
                }
            }
        }
    }
}

async fn send_txn(
    signal: &ShutdownSignal,
    output: &mpsc::Sender<RawTxn>,
    txn: RawTxn,
) -> BrookResult<()> {
    tokio::select! {
        _ = signal.wait() => Err(BrookError::Cancelled),
        sent = output.send(txn) => sent.map_err(|_| BrookError::BufferClosed),
    }
}
