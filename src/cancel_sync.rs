//! Cancel Synchronizer (§4.8).
//!
//! When a source order is judged canceled, cancels the mirror counterpart
//! with bounded retries and a force-cleanup threshold.

use std::sync::Arc;
use std::time::Duration;

use crate::error::AdapterError;
use crate::exchange::MirrorClient;
use crate::hash_cache::TtlMap;
use crate::margin_guard::MarginModeGuard;
use crate::mirror_record::MirrorRecordStore;
use crate::notifier::{NotificationCategory, RateLimitedNotifier};
use crate::stats::Stats;

const FORCE_CLEANUP_THRESHOLD: u32 = 5;
const WIPE_THRESHOLD: u32 = 10;
const RECHECK_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    AlreadyAbsent,
    Canceled,
    StillPendingRetry { attempts: u32 },
    ForcedCleanup { attempts: u32 },
    WipedAfterRepeatedFailure { attempts: u32 },
}

pub struct CancelSynchronizer {
    mirror: Arc<dyn MirrorClient>,
    margin_guard: Arc<MarginModeGuard>,
    notifier: Arc<RateLimitedNotifier>,
    stats: Arc<Stats>,
}

impl CancelSynchronizer {
    pub fn new(
        mirror: Arc<dyn MirrorClient>,
        margin_guard: Arc<MarginModeGuard>,
        notifier: Arc<RateLimitedNotifier>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { mirror, margin_guard, notifier, stats }
    }

    /// Steps 1-6 of §4.8.
    pub async fn synchronize(
        &self,
        source_order_id: &str,
        records: &MirrorRecordStore,
        retry_counts: &TtlMap<String, u32>,
        now_ms: u64,
    ) -> CancelOutcome {
        let Some(record) = records.get_by_source(source_order_id).await else {
            return CancelOutcome::AlreadyAbsent;
        };

        self.margin_guard.ensure_cross(&record.source_snapshot.contract).await;

        let live = self
            .mirror
            .get_all_trigger_orders(&record.source_snapshot.contract)
            .await
            .unwrap_or_default();
        if !live.iter().any(|o| o.order_id == record.mirror_order_id) {
            records.remove_by_source(source_order_id).await;
            retry_counts.remove(&source_order_id.to_string()).await;
            return CancelOutcome::AlreadyAbsent;
        }

        match self.mirror.cancel_trigger(&record.mirror_order_id).await {
            Ok(()) | Err(AdapterError::AlreadyDone) => {
                records.remove_by_source(source_order_id).await;
                retry_counts.remove(&source_order_id.to_string()).await;
                self.stats.mirrors_canceled.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                return CancelOutcome::Canceled;
            }
            Err(_) => {}
        }

        tokio::time::sleep(RECHECK_DELAY).await;

        let still_present = self
            .mirror
            .get_all_trigger_orders(&record.source_snapshot.contract)
            .await
            .map(|orders| orders.iter().any(|o| o.order_id == record.mirror_order_id))
            .unwrap_or(true);

        if !still_present {
            records.remove_by_source(source_order_id).await;
            retry_counts.remove(&source_order_id.to_string()).await;
            return CancelOutcome::Canceled;
        }

        let attempts = retry_counts.get(&source_order_id.to_string()).await.unwrap_or(0) + 1;
        retry_counts.set(source_order_id.to_string(), attempts, now_ms).await;
        self.stats.cancel_failures.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        if attempts >= WIPE_THRESHOLD {
            let _ = self.mirror.cancel_trigger(&record.mirror_order_id).await;
            records.remove_by_source(source_order_id).await;
            retry_counts.remove(&source_order_id.to_string()).await;
            self.stats.forced_cancel_cleanups.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return CancelOutcome::WipedAfterRepeatedFailure { attempts };
        }

        if attempts >= FORCE_CLEANUP_THRESHOLD {
            // Notify-only: the record stays live so retries keep counting
            // toward `WIPE_THRESHOLD`. Fully removing both inverse mappings
            // here (as `remove_by_source` does) would leave nothing for the
            // `>= 10` branch's "wipe all mappings" to act on. The counter and
            // the notification both fire once, on the threshold-crossing
            // pass only, not on every subsequent retry.
            if attempts == FORCE_CLEANUP_THRESHOLD {
                self.notifier
                    .send(
                        NotificationCategory::ForcedCancelCleanup,
                        &format!("mirror record for {source_order_id} still uncanceled after {attempts} attempts"),
                    )
                    .await;
            }
            return CancelOutcome::ForcedCleanup { attempts };
        }

        CancelOutcome::StillPendingRetry { attempts }
    }
}
