//! Bounded buffering between the region feeds and the sorter.
//!
//! [`MemBuffer`] applies byte-level backpressure through the shared blur
//! limiter; [`ChanBuffer`] is the count-bounded smoothing stage in front of
//! the sorter. Both unblock on shutdown and drop nothing.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use brook_common::{BrookError, BrookResult, RegionFeedEvent, ShutdownSignal};

use crate::limiter::BlurResourceLimiter;

/// Default slot capacity of the channel buffer.
pub const DEFAULT_CHAN_BUFFER_CAPACITY: usize = 128_000;

struct MemBufferInner {
    queue: Mutex<VecDeque<RegionFeedEvent>>,
    limiter: Arc<BlurResourceLimiter>,
    not_empty: Notify,
}

/// FIFO of feed events gated by the shared byte limiter.
///
/// Bytes are accounted at admission and released when the single consumer
/// takes the event out.
#[derive(Clone)]
pub struct MemBuffer {
    inner: Arc<MemBufferInner>,
}

impl MemBuffer {
    pub fn new(limiter: Arc<BlurResourceLimiter>) -> Self {
        Self {
            inner: Arc::new(MemBufferInner {
                queue: Mutex::new(VecDeque::new()),
                limiter,
                not_empty: Notify::new(),
            }),
        }
    }

    /// Append an event, waiting on the limiter while it is gated.
    pub async fn add_entry(
        &self,
        signal: &ShutdownSignal,
        event: RegionFeedEvent,
    ) -> BrookResult<()> {
        self.inner
            .limiter
            .acquire(signal, event.approximate_size())
            .await?;
        self.inner.queue.lock().push_back(event);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Take the oldest event, waiting while the buffer is empty.
    pub async fn get(&self, signal: &ShutdownSignal) -> BrookResult<RegionFeedEvent> {
        loop {
            if let Some(event) = self.inner.queue.lock().pop_front() {
                self.inner.limiter.release(event.approximate_size());
                return Ok(event);
            }
            tokio::select! {
                _ = signal.wait() => return Err(BrookError::Cancelled),
                _ = self.inner.not_empty.notified() => {}
            }
        }
    }

    /// Approximate bytes held, for observability only.
    pub fn size(&self) -> u64 {
        self.inner.limiter.used_bytes()
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct ChanBufferInner {
    queue: Mutex<VecDeque<RegionFeedEvent>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

/// Count-bounded FIFO with a clonable handle, decoupling the buffer drainer
/// from whichever consumer (sorter or external) reads the raw stream.
#[derive(Clone)]
pub struct ChanBuffer {
    inner: Arc<ChanBufferInner>,
}

impl ChanBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChanBufferInner {
                queue: Mutex::new(VecDeque::new()),
                capacity: capacity.max(1),
                not_empty: Notify::new(),
                not_full: Notify::new(),
            }),
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHAN_BUFFER_CAPACITY)
    }

    /// Append an event, waiting while the buffer is at capacity.
    pub async fn add_entry(
        &self,
        signal: &ShutdownSignal,
        event: RegionFeedEvent,
    ) -> BrookResult<()> {
        let mut pending = event;
        loop {
            match self.try_push(pending) {
                Ok(()) => return Ok(()),
                Err(rejected) => pending = rejected,
            }
            tokio::select! {
                _ = signal.wait() => return Err(BrookError::Cancelled),
                _ = self.inner.not_full.notified() => {}
            }
        }
    }

    fn try_push(&self, event: RegionFeedEvent) -> Result<(), RegionFeedEvent> {
        let mut queue = self.inner.queue.lock();
        if queue.len() < self.inner.capacity {
            queue.push_back(event);
            drop(queue);
            self.inner.not_empty.notify_one();
            Ok(())
        } else {
            Err(event)
        }
    }

    /// Take the oldest event, waiting while the buffer is empty.
    pub async fn get(&self, signal: &ShutdownSignal) -> BrookResult<RegionFeedEvent> {
        loop {
            if let Some(event) = self.inner.queue.lock().pop_front() {
                self.inner.not_full.notify_one();
                return Ok(event);
            }
            tokio::select! {
                _ = signal.wait() => return Err(BrookError::Cancelled),
                _ = self.inner.not_empty.notified() => {}
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use brook_common::{RawKvEntry, RegionId, Ts};

    use crate::limiter::BlurLimiterConfig;

    use super::*;

    fn event(crts: u64) -> RegionFeedEvent {
        RegionFeedEvent::Val(RawKvEntry::put(
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            Ts(crts - 1),
            Ts(crts),
            RegionId(1),
        ))
    }

    fn unlimited() -> Arc<BlurResourceLimiter> {
        BlurResourceLimiter::new(BlurLimiterConfig::with_quota(u64::MAX / 2))
    }

    #[tokio::test]
    async fn test_mem_buffer_fifo_order() {
        let buffer = MemBuffer::new(unlimited());
        let signal = ShutdownSignal::new();
        buffer.add_entry(&signal, event(1)).await.unwrap();
        buffer.add_entry(&signal, event(2)).await.unwrap();
        assert_eq!(buffer.get(&signal).await.unwrap(), event(1));
        assert_eq!(buffer.get(&signal).await.unwrap(), event(2));
    }

    #[tokio::test]
    async fn test_mem_buffer_size_tracks_bytes() {
        let buffer = MemBuffer::new(unlimited());
        let signal = ShutdownSignal::new();
        assert_eq!(buffer.size(), 0);
        buffer.add_entry(&signal, event(1)).await.unwrap();
        let held = buffer.size();
        assert!(held > 0);
        buffer.get(&signal).await.unwrap();
        assert_eq!(buffer.size(), 0);
    }

    #[tokio::test]
    async fn test_mem_buffer_get_blocks_until_add() {
        let buffer = MemBuffer::new(unlimited());
        let signal = ShutdownSignal::new();
        let getter = {
            let buffer = buffer.clone();
            let signal = signal.clone();
            tokio::spawn(async move { buffer.get(&signal).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!getter.is_finished());
        buffer.add_entry(&signal, event(7)).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), getter)
            .await
            .expect("get should wake on add")
            .unwrap()
            .unwrap();
        assert_eq!(received, event(7));
    }

    #[tokio::test]
    async fn test_mem_buffer_get_observes_cancellation() {
        let buffer = MemBuffer::new(unlimited());
        let signal = ShutdownSignal::new();
        let getter = {
            let buffer = buffer.clone();
            let signal = signal.clone();
            tokio::spawn(async move { buffer.get(&signal).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), getter)
            .await
            .expect("get should unblock on shutdown")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_mem_buffer_add_blocks_on_gated_limiter() {
        let limiter = BlurResourceLimiter::new(BlurLimiterConfig {
            hi_bytes: 1,
            lo_bytes: 0,
        });
        let buffer = MemBuffer::new(limiter);
        let signal = ShutdownSignal::new();
        buffer.add_entry(&signal, event(1)).await.unwrap();

        let blocked = {
            let buffer = buffer.clone();
            let signal = signal.clone();
            tokio::spawn(async move { buffer.add_entry(&signal, event(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "add must block while gated");

        // Consuming the first event drains the limiter and admits the second.
        buffer.get(&signal).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("blocked add should complete after drain")
            .unwrap()
            .unwrap();
        assert_eq!(buffer.get(&signal).await.unwrap(), event(2));
    }

    #[tokio::test]
    async fn test_chan_buffer_blocks_at_capacity() {
        let buffer = ChanBuffer::new(2);
        let signal = ShutdownSignal::new();
        buffer.add_entry(&signal, event(1)).await.unwrap();
        buffer.add_entry(&signal, event(2)).await.unwrap();
        assert_eq!(buffer.len(), 2);

        let blocked = {
            let buffer = buffer.clone();
            let signal = signal.clone();
            tokio::spawn(async move { buffer.add_entry(&signal, event(3)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "add must block at capacity");

        assert_eq!(buffer.get(&signal).await.unwrap(), event(1));
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("blocked add should complete after get")
            .unwrap()
            .unwrap();
        assert_eq!(buffer.get(&signal).await.unwrap(), event(2));
        assert_eq!(buffer.get(&signal).await.unwrap(), event(3));
    }

    #[tokio::test]
    async fn test_chan_buffer_add_observes_cancellation() {
        let buffer = ChanBuffer::new(1);
        let signal = ShutdownSignal::new();
        buffer.add_entry(&signal, event(1)).await.unwrap();
        let blocked = {
            let buffer = buffer.clone();
            let signal = signal.clone();
            tokio::spawn(async move { buffer.add_entry(&signal, event(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("add should unblock on shutdown")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_chan_buffer_clone_shares_queue() {
        let buffer = ChanBuffer::new(8);
        let other = buffer.clone();
        let signal = ShutdownSignal::new();
        buffer.add_entry(&signal, event(1)).await.unwrap();
        assert_eq!(other.get(&signal).await.unwrap(), event(1));
        assert!(other.is_empty());
    }
}
