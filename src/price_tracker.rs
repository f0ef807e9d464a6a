//! Price Tracker (§4.1).
//!
//! Maintains the last-valid `(source_price, mirror_price, diff)` sample,
//! tolerating failed polls by reusing the most recent valid one. Grounded in
//! `exchange.rs`'s `LiveExchange` `(value, Instant)` cache-tuple pattern,
//! generalized from a single-field cache into the cross-venue price pair
//! every other component reads from.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::Mutex;

use crate::exchange::{MirrorClient, SourceClient};

const MAX_ABNORMAL_DIFF: f64 = 5_000.0;

#[derive(Debug, Clone, Copy)]
pub struct PriceSample {
    pub source: f64,
    pub mirror: f64,
    pub diff_abs: f64,
    pub at_ms: u64,
}

#[derive(Default)]
pub struct PriceTracker {
    last_valid: Mutex<Option<PriceSample>>,
    source_failures: AtomicU32,
    mirror_failures: AtomicU32,
}

impl PriceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cheap, lock-protected read for every other component; no back-pressure.
    pub async fn current(&self) -> Option<PriceSample> {
        *self.last_valid.lock().await
    }

    /// Polls both venues. A failed poll reuses the existing source/mirror
    /// leg; an abnormal combined sample (non-positive or implausibly wide)
    /// is rejected outright and does not update state. Never fatal.
    pub async fn poll(&self, source: &dyn SourceClient, mirror: &dyn MirrorClient, now_ms: u64) {
        let prev = *self.last_valid.lock().await;

        let new_source = match source.get_ticker().await {
            Ok(t) if t.last > 0.0 => {
                self.source_failures.store(0, Ordering::Relaxed);
                Some(t.last)
            }
            _ => {
                self.source_failures.fetch_add(1, Ordering::Relaxed);
                prev.map(|p| p.source)
            }
        };

        let new_mirror = match mirror.get_ticker().await {
            Ok(t) if t.last > 0.0 => {
                self.mirror_failures.store(0, Ordering::Relaxed);
                Some(t.last)
            }
            _ => {
                self.mirror_failures.fetch_add(1, Ordering::Relaxed);
                prev.map(|p| p.mirror)
            }
        };

        let (source_px, mirror_px) = match (new_source, new_mirror) {
            (Some(s), Some(m)) => (s, m),
            _ => return, // no valid prior sample to fall back on either
        };

        let diff_abs = (source_px - mirror_px).abs();
        if source_px <= 0.0 || mirror_px <= 0.0 || diff_abs > MAX_ABNORMAL_DIFF {
            return;
        }

        *self.last_valid.lock().await = Some(PriceSample { source: source_px, mirror: mirror_px, diff_abs, at_ms: now_ms });
    }

    pub fn source_failure_count(&self) -> u32 {
        self.source_failures.load(Ordering::Relaxed)
    }

    pub fn mirror_failure_count(&self) -> u32 {
        self.mirror_failures.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;

    #[tokio::test]
    async fn reuses_last_valid_sample_on_failed_poll() {
        let tracker = PriceTracker::new();
        let source = MockExchange::new(100.0, 1_000.0);
        let mirror = MockExchange::new(99.0, 1_000.0);

        tracker.poll(&source, &mirror, 1).await;
        let first = tracker.current().await.unwrap();
        assert!((first.source - 100.0).abs() < 1e-9);

        // Simulate an abnormal mirror read by setting a wild divergence,
        // which must be rejected and keep the prior sample intact.
        mirror.set_price(999_999.0).await;
        tracker.poll(&source, &mirror, 2).await;
        let after = tracker.current().await.unwrap();
        assert!((after.mirror - 99.0).abs() < 1e-9, "abnormal sample must not update state");
    }

    #[tokio::test]
    async fn rejects_non_positive_prices() {
        let tracker = PriceTracker::new();
        let source = MockExchange::new(0.0, 1_000.0);
        let mirror = MockExchange::new(99.0, 1_000.0);
        tracker.poll(&source, &mirror, 1).await;
        assert!(tracker.current().await.is_none());
    }
}
