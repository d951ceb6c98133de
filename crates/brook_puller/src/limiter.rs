//! Hysteretic byte-budget limiter ("blur" policy) gating memory-buffer
//! admission.
//!
//! Producers gate once in-flight bytes reach `hi_bytes` and stay gated until
//! usage drains to `lo_bytes`. The gap between the two thresholds keeps
//! admission from flapping around a single threshold under a bursty producer.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use brook_common::{BrookError, BrookResult, ShutdownSignal};

/// Thresholds for the blur limiter.
#[derive(Debug, Clone)]
pub struct BlurLimiterConfig {
    /// Usage at or above this gates new admissions.
    pub hi_bytes: u64,
    /// Once gated, admissions resume when usage drains to this.
    pub lo_bytes: u64,
}

impl Default for BlurLimiterConfig {
    fn default() -> Self {
        Self {
            hi_bytes: 256 * 1024 * 1024,
            lo_bytes: 192 * 1024 * 1024,
        }
    }
}

impl BlurLimiterConfig {
    /// Derive the hysteresis band from a single quota: gate at the quota,
    /// ungate once a quarter of it has drained.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            hi_bytes: quota_bytes,
            lo_bytes: quota_bytes - quota_bytes / 4,
        }
    }
}

struct LimiterState {
    used: u64,
    gated: bool,
}

/// Byte-accounting admission gate shared by every region feed of one puller.
pub struct BlurResourceLimiter {
    config: BlurLimiterConfig,
    state: Mutex<LimiterState>,
    drained: Notify,
}

impl BlurResourceLimiter {
    pub fn new(config: BlurLimiterConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            state: Mutex::new(LimiterState {
                used: 0,
                gated: false,
            }),
            drained: Notify::new(),
        })
    }

    /// Account `bytes`, waiting while the limiter is gated. Returns
    /// `Cancelled` if the signal fires first. An admission that crosses
    /// `hi_bytes` still succeeds; it gates the ones after it.
    pub async fn acquire(&self, signal: &ShutdownSignal, bytes: u64) -> BrookResult<()> {
        loop {
            // Register for the drain notification before checking state, so a
            // release between the check and the await is not lost.
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if !state.gated {
                    state.used += bytes;
                    if state.used >= self.config.hi_bytes {
                        state.gated = true;
                    }
                    return Ok(());
                }
            }

            tokio::select! {
                _ = signal.wait() => return Err(BrookError::Cancelled),
                _ = &mut notified => {}
            }
        }
    }

    /// Release previously-acquired bytes; ungates waiters once usage drains
    /// to the low threshold.
    pub fn release(&self, bytes: u64) {
        let mut state = self.state.lock();
        state.used = state.used.saturating_sub(bytes);
        if state.gated && state.used <= self.config.lo_bytes {
            state.gated = false;
            self.drained.notify_waiters();
        }
    }

    /// Bytes currently admitted and not yet released. Advisory.
    pub fn used_bytes(&self) -> u64 {
        self.state.lock().used
    }

    pub fn is_gated(&self) -> bool {
        self.state.lock().gated
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn limiter(hi: u64, lo: u64) -> Arc<BlurResourceLimiter> {
        BlurResourceLimiter::new(BlurLimiterConfig {
            hi_bytes: hi,
            lo_bytes: lo,
        })
    }

    #[tokio::test]
    async fn test_admits_below_hi() {
        let limiter = limiter(100, 50);
        let signal = ShutdownSignal::new();
        limiter.acquire(&signal, 40).await.unwrap();
        limiter.acquire(&signal, 40).await.unwrap();
        assert_eq!(limiter.used_bytes(), 80);
        assert!(!limiter.is_gated());
    }

    #[tokio::test]
    async fn test_crossing_hi_gates_later_admissions() {
        let limiter = limiter(100, 50);
        let signal = ShutdownSignal::new();
        limiter.acquire(&signal, 120).await.unwrap();
        assert!(limiter.is_gated());

        let blocked = {
            let limiter = Arc::clone(&limiter);
            let signal = signal.clone();
            tokio::spawn(async move { limiter.acquire(&signal, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished(), "admission must block while gated");

        // Draining to lo ungates the waiter.
        limiter.release(70);
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("waiter should be released")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_hysteresis_requires_drain_to_lo() {
        let limiter = limiter(10, 5);
        let signal = ShutdownSignal::new();
        limiter.acquire(&signal, 10).await.unwrap();
        assert!(limiter.is_gated());
        limiter.release(3);
        // 7 > lo: still gated.
        assert!(limiter.is_gated());
        limiter.release(2);
        // 5 <= lo: ungated.
        assert!(!limiter.is_gated());
    }

    #[tokio::test]
    async fn test_cancellation_unblocks_acquire() {
        let limiter = limiter(10, 5);
        let signal = ShutdownSignal::new();
        limiter.acquire(&signal, 10).await.unwrap();

        let blocked = {
            let limiter = Arc::clone(&limiter);
            let signal = signal.clone();
            tokio::spawn(async move { limiter.acquire(&signal, 1).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("acquire should unblock on shutdown")
            .unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_with_quota_band() {
        let config = BlurLimiterConfig::with_quota(400);
        assert_eq!(config.hi_bytes, 400);
        assert_eq!(config.lo_bytes, 300);
    }
}
