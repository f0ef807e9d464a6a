//! Margin-Mode Guard (§4.2).
//!
//! Asserted before every mirror placement, cancel, and reconciliation-driven
//! market order: reads the mirror venue's margin mode and, if not cross,
//! runs an escalating coercion sequence.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::exchange::MirrorClient;
use crate::notifier::{NotificationCategory, RateLimitedNotifier};
use crate::stats::Stats;
use crate::types::MarginMode;

pub struct MarginModeGuard {
    mirror: Arc<dyn MirrorClient>,
    notifier: Arc<RateLimitedNotifier>,
    stats: Arc<Stats>,
    consecutive_failures: AtomicU32,
}

impl MarginModeGuard {
    pub fn new(mirror: Arc<dyn MirrorClient>, notifier: Arc<RateLimitedNotifier>, stats: Arc<Stats>) -> Self {
        Self { mirror, notifier, stats, consecutive_failures: AtomicU32::new(0) }
    }

    /// Reads the current mode and, if not cross, runs the escalating
    /// coercion sequence and re-reads. Never blocks the caller: returns
    /// `true` only on a confirmed cross read, `false` otherwise (the caller
    /// proceeds "best effort" per spec §4.2).
    pub async fn ensure_cross(&self, contract: &str) -> bool {
        match self.mirror.get_margin_mode(contract).await {
            Ok(MarginMode::Cross) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                true
            }
            Ok(_) | Err(_) => {
                let coerced = self.coerce(contract).await;
                if coerced {
                    self.consecutive_failures.store(0, Ordering::Relaxed);
                    return true;
                }
                self.stats.margin_mode_failures.fetch_add(1, Ordering::Relaxed);
                let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures == 3 {
                    self.notifier
                        .send(NotificationCategory::MarginModeWarning, &format!("cross-margin coercion failing for {contract}"))
                        .await;
                }
                false
            }
        }
    }

    /// Four escalating methods: a gentle retry of the explicit force-cross
    /// call, a leverage touch (some venues reset margin mode as a side
    /// effect of a leverage update), a second force-cross attempt, and a
    /// final confirm-by-re-read. Each step is more intrusive than the last.
    async fn coerce(&self, contract: &str) -> bool {
        if matches!(self.mirror.force_cross_margin(contract).await, Ok(true)) {
            if matches!(self.mirror.get_margin_mode(contract).await, Ok(MarginMode::Cross)) {
                return true;
            }
        }
        let _ = self.mirror.set_leverage(contract, 20).await;
        if matches!(self.mirror.force_cross_margin(contract).await, Ok(true)) {
            if matches!(self.mirror.get_margin_mode(contract).await, Ok(MarginMode::Cross)) {
                return true;
            }
        }
        matches!(self.mirror.get_margin_mode(contract).await, Ok(MarginMode::Cross))
    }
}
