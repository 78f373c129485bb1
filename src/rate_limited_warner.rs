//! Throttled reporting of records dropped by failed sends.

use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Default interval between dropped-record warnings.
pub const DEFAULT_WARN_INTERVAL: Duration = Duration::from_secs(5);

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis().min(u128::from(u64::MAX)) as u64)
        .unwrap_or_default()
}

/// Counts dropped records and reports them at most once per interval.
///
/// Many sends may fail at once. Only the caller that wins the interval
/// slot reports, and it reports the whole count accumulated so far, so a
/// burst of failures produces one warning rather than one per record.
#[derive(Debug)]
pub struct RateLimitedWarner {
    interval_ms: u64,
    last_warn_ms: AtomicU64,
    dropped: AtomicU64,
}

impl Default for RateLimitedWarner {
    fn default() -> Self {
        Self::new(DEFAULT_WARN_INTERVAL)
    }
}

impl RateLimitedWarner {
    /// The first drop is reported immediately.
    pub fn new(interval: Duration) -> Self {
        let interval_ms = interval.as_millis().min(u128::from(u64::MAX)) as u64;
        Self {
            interval_ms,
            last_warn_ms: AtomicU64::new(now_millis().saturating_sub(interval_ms)),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Drops not yet reported.
    pub fn pending(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Call `warn` with the pending count if the interval has elapsed and
    /// this caller claims the slot.
    pub fn warn_if_due(&self, warn: impl FnOnce(u64)) {
        let now = now_millis();
        let prev = self.last_warn_ms.load(Ordering::Acquire);
        if now.saturating_sub(prev) < self.interval_ms {
            return;
        }
        if self
            .last_warn_ms
            .compare_exchange(prev, now, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.report(warn);
    }

    /// Report pending drops regardless of the interval.
    pub fn flush(&self, warn: impl FnOnce(u64)) {
        if self.report(warn) {
            self.last_warn_ms.store(now_millis(), Ordering::Release);
        }
    }

    fn report(&self, warn: impl FnOnce(u64)) -> bool {
        match self.dropped.swap(0, Ordering::AcqRel) {
            0 => false,
            count => {
                warn(count);
                true
            }
        }
    }
}
