//! Entry sorter: turns the per-region semi-ordered stream into resolved-ts
//! windows emitted in commit-ts order.
//!
//! For every pair of consecutive emitted markers `R1 < R2`, the entries
//! emitted between them have `R1 < crts <= R2`, in non-decreasing `crts`
//! order with ties stable on arrival. A window with no entries still emits
//! its marker.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use brook_common::{BrookError, BrookResult, OpType, RawKvEntry, ShutdownSignal, Ts};

/// Default capacity of the sorted output channel.
pub const DEFAULT_SORTED_OUTPUT_CAPACITY: usize = 1024;

#[derive(Default)]
struct SorterState {
    unsorted: Vec<RawKvEntry>,
    resolved_ts_group: Vec<Ts>,
}

/// Buffers entries between resolved-ts markers and flushes each window in
/// commit-ts order.
pub struct EntrySorter {
    state: Mutex<SorterState>,
    resolved_notify: Notify,
    output_tx: mpsc::Sender<RawKvEntry>,
}

impl EntrySorter {
    /// Create a sorter and the receive end of its output.
    pub fn new(output_capacity: usize) -> (Arc<Self>, mpsc::Receiver<RawKvEntry>) {
        let (output_tx, output_rx) = mpsc::channel(output_capacity.max(1));
        let sorter = Arc::new(Self {
            state: Mutex::new(SorterState::default()),
            resolved_notify: Notify::new(),
            output_tx,
        });
        (sorter, output_rx)
    }

    /// Append an entry. A `Resolved` entry records its ts and triggers a
    /// flush instead of joining the pending set.
    pub fn add_entry(&self, entry: RawKvEntry) {
        let mut state = self.state.lock();
        if entry.op_type == OpType::Resolved {
            state.resolved_ts_group.push(entry.crts);
            drop(state);
            self.resolved_notify.notify_one();
        } else {
            state.unsorted.push(entry);
        }
    }

    /// Flush loop. Runs until the signal fires or the output consumer is
    /// dropped; the caller spawns it.
    pub async fn run(&self, signal: ShutdownSignal) -> BrookResult<()> {
        // Entries left over from earlier cycles, sorted by crts.
        let mut sorted: Vec<RawKvEntry> = Vec::new();
        loop {
            // Register for the marker notification before checking state, so
            // a marker landing between the check and the await is not lost.
            let notified = self.resolved_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (mut batch, mut group) = {
                let mut state = self.state.lock();
                if state.resolved_ts_group.is_empty() {
                    (Vec::new(), Vec::new())
                } else {
                    (
                        std::mem::take(&mut state.unsorted),
                        std::mem::take(&mut state.resolved_ts_group),
                    )
                }
            };

            if group.is_empty() {
                tokio::select! {
                    _ = signal.wait() => return Ok(()),
                    _ = &mut notified => {}
                }
                continue;
            }

            // Stable sort keeps arrival order among equal commit timestamps;
            // the leftover run arrived earlier still, so it wins merge ties.
            batch.sort_by_key(|entry| entry.crts);
            group.sort_unstable();

            let merged = merge_by_crts(std::mem::take(&mut sorted), batch);
            let mut entries = merged.into_iter().peekable();
            for resolved_ts in group {
                while let Some(entry) = entries.next_if(|e| e.crts <= resolved_ts) {
                    self.send(&signal, entry).await?;
                }
                self.send(&signal, RawKvEntry::resolved(resolved_ts)).await?;
            }
            sorted = entries.collect();
        }
    }

    async fn send(&self, signal: &ShutdownSignal, entry: RawKvEntry) -> BrookResult<()> {
        tokio::select! {
            _ = signal.wait() => Err(BrookError::Cancelled),
            sent = self.output_tx.send(entry) => sent.map_err(|_| BrookError::BufferClosed),
        }
    }
}

/// Merge two crts-sorted runs; `older` wins ties to keep arrival order.
fn merge_by_crts(older: Vec<RawKvEntry>, newer: Vec<RawKvEntry>) -> Vec<RawKvEntry> {
    if older.is_empty() {
        return newer;
    }
    if newer.is_empty() {
        return older;
    }
    let mut out = Vec::with_capacity(older.len() + newer.len());
    let mut a = older.into_iter().peekable();
    let mut b = newer.into_iter().peekable();
    loop {
        let take_older = match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => x.crts <= y.crts,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_older { a.next() } else { b.next() };
        if let Some(entry) = next {
            out.push(entry);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use brook_common::RegionId;

    use super::*;

    fn entry(key: &'static str, crts: u64) -> RawKvEntry {
        RawKvEntry::put(
            Bytes::from_static(key.as_bytes()),
            Bytes::from_static(b"v"),
            Ts(crts.saturating_sub(1)),
            Ts(crts),
            RegionId(1),
        )
    }

    fn spawn_sorter(
        sorter: &Arc<EntrySorter>,
        signal: &ShutdownSignal,
    ) -> tokio::task::JoinHandle<BrookResult<()>> {
        let sorter = Arc::clone(sorter);
        let signal = signal.clone();
        tokio::spawn(async move { sorter.run(signal).await })
    }

    async fn next(rx: &mut mpsc::Receiver<RawKvEntry>) -> RawKvEntry {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for sorter output")
            .expect("sorter output ended unexpectedly")
    }

    #[tokio::test]
    async fn test_window_is_sorted_by_crts() {
        let (sorter, mut rx) = EntrySorter::new(16);
        let signal = ShutdownSignal::new();
        let _run = spawn_sorter(&sorter, &signal);

        sorter.add_entry(entry("c", 30));
        sorter.add_entry(entry("a", 10));
        sorter.add_entry(entry("b", 20));
        sorter.add_entry(RawKvEntry::resolved(Ts(25)));

        assert_eq!(next(&mut rx).await, entry("a", 10));
        assert_eq!(next(&mut rx).await, entry("b", 20));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(25)));
        signal.shutdown();
    }

    #[tokio::test]
    async fn test_retained_entries_flush_on_later_marker() {
        let (sorter, mut rx) = EntrySorter::new(16);
        let signal = ShutdownSignal::new();
        let _run = spawn_sorter(&sorter, &signal);

        sorter.add_entry(entry("c", 30));
        sorter.add_entry(entry("a", 10));
        sorter.add_entry(RawKvEntry::resolved(Ts(25)));
        assert_eq!(next(&mut rx).await, entry("a", 10));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(25)));

        // crts 30 was retained; it flushes once a covering marker arrives.
        sorter.add_entry(RawKvEntry::resolved(Ts(35)));
        assert_eq!(next(&mut rx).await, entry("c", 30));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(35)));
        signal.shutdown();
    }

    #[tokio::test]
    async fn test_ties_are_stable_on_arrival_order() {
        let (sorter, mut rx) = EntrySorter::new(16);
        let signal = ShutdownSignal::new();
        let _run = spawn_sorter(&sorter, &signal);

        sorter.add_entry(entry("first", 10));
        sorter.add_entry(entry("second", 10));
        sorter.add_entry(entry("third", 10));
        sorter.add_entry(RawKvEntry::resolved(Ts(10)));

        assert_eq!(next(&mut rx).await, entry("first", 10));
        assert_eq!(next(&mut rx).await, entry("second", 10));
        assert_eq!(next(&mut rx).await, entry("third", 10));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(10)));
        signal.shutdown();
    }

    #[tokio::test]
    async fn test_multiple_markers_partition_into_windows() {
        let (sorter, mut rx) = EntrySorter::new(16);
        let signal = ShutdownSignal::new();
        let _run = spawn_sorter(&sorter, &signal);

        sorter.add_entry(entry("a", 5));
        sorter.add_entry(entry("b", 15));
        sorter.add_entry(RawKvEntry::resolved(Ts(10)));
        sorter.add_entry(RawKvEntry::resolved(Ts(20)));

        assert_eq!(next(&mut rx).await, entry("a", 5));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(10)));
        assert_eq!(next(&mut rx).await, entry("b", 15));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(20)));
        signal.shutdown();
    }

    #[tokio::test]
    async fn test_empty_window_still_emits_marker() {
        let (sorter, mut rx) = EntrySorter::new(16);
        let signal = ShutdownSignal::new();
        let _run = spawn_sorter(&sorter, &signal);

        sorter.add_entry(RawKvEntry::resolved(Ts(10)));
        sorter.add_entry(RawKvEntry::resolved(Ts(20)));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(10)));
        assert_eq!(next(&mut rx).await, RawKvEntry::resolved(Ts(20)));
        signal.shutdown();
    }

    #[tokio::test]
    async fn test_permutations_yield_identical_output() {
        let inputs = [
            vec![entry("a", 10), entry("b", 20), entry("c", 15)],
            vec![entry("c", 15), entry("a", 10), entry("b", 20)],
            vec![entry("b", 20), entry("c", 15), entry("a", 10)],
        ];
        let mut outputs = Vec::new();
        for input in inputs {
            let (sorter, mut rx) = EntrySorter::new(16);
            let signal = ShutdownSignal::new();
            let _run = spawn_sorter(&sorter, &signal);
            for e in input {
                sorter.add_entry(e);
            }
            sorter.add_entry(RawKvEntry::resolved(Ts(25)));
            let mut collected = Vec::new();
            for _ in 0..4 {
                collected.push(next(&mut rx).await);
            }
            signal.shutdown();
            outputs.push(collected);
        }
        assert_eq!(outputs[0], outputs[1]);
        assert_eq!(outputs[1], outputs[2]);
    }

    #[tokio::test]
    async fn test_dropped_consumer_stops_flusher() {
        let (sorter, rx) = EntrySorter::new(1);
        let signal = ShutdownSignal::new();
        let run = spawn_sorter(&sorter, &signal);
        drop(rx);
        sorter.add_entry(entry("a", 10));
        sorter.add_entry(RawKvEntry::resolved(Ts(20)));
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("flusher should stop when consumer is gone")
            .unwrap();
        assert_eq!(result.unwrap_err(), BrookError::BufferClosed);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_flusher() {
        let (sorter, _rx) = EntrySorter::new(1);
        let signal = ShutdownSignal::new();
        let run = spawn_sorter(&sorter, &signal);
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .expect("idle flusher should observe shutdown")
            .unwrap();
        assert!(result.is_ok());
    }
}
