//! Immediate-Fill Executor (§4.7, §4.7.1).
//!
//! Runs when a source order is judged filled while the mirror's
//! corresponding trigger is still pending: cancels the mirror trigger and
//! places a market order, with retry and a two-stage backup fallback.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::AdapterError;
use crate::exchange::MirrorClient;
use crate::margin_guard::MarginModeGuard;
use crate::mirror_record::MirrorRecord;
use crate::types::OrderSide;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(2);
const BACKUP_OFFSET_USD: f64 = 50.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillOutcome {
    Filled { mirror_order_id: String },
    BackupTriggerPlaced { mirror_order_id: String },
    BackupMarketPlaced { mirror_order_id: String },
    Failed(String),
}

/// Per-mirror-order-ID mutex map: serializes attempts against the same
/// order so duplicate handoffs from quick-successive ticks coalesce instead
/// of racing (§4.7 concurrency note).
#[derive(Default)]
pub struct OrderLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OrderLocks {
    async fn lock_for(&self, order_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(order_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }
}

pub struct ImmediateFillExecutor {
    mirror: Arc<dyn MirrorClient>,
    margin_guard: Arc<MarginModeGuard>,
    locks: OrderLocks,
}

impl ImmediateFillExecutor {
    pub fn new(mirror: Arc<dyn MirrorClient>, margin_guard: Arc<MarginModeGuard>) -> Self {
        Self { mirror, margin_guard, locks: OrderLocks::default() }
    }

    /// Steps 1-6 of §4.7, with the per-order lock held for the whole
    /// attempt so a second handoff for the same record simply waits and
    /// then observes the completed (or failed) outcome upstream.
    pub async fn execute(&self, record: &MirrorRecord) -> FillOutcome {
        let guard = self.locks.lock_for(&record.mirror_order_id).await;
        let _held = guard.lock().await;

        self.margin_guard.ensure_cross(&record.source_snapshot.contract).await;

        match self.mirror.cancel_trigger(&record.mirror_order_id).await {
            Ok(()) | Err(AdapterError::AlreadyDone) => {}
            Err(e) => return FillOutcome::Failed(format!("cancel failed: {e}")),
        }

        let reduce_only = record.source_snapshot.side.is_reduce_only();
        let mut size = record.source_snapshot.size.abs();

        if reduce_only {
            let positions = match self.mirror.get_positions(&record.source_snapshot.contract).await {
                Ok(p) => p,
                Err(e) => return FillOutcome::Failed(format!("position lookup failed: {e}")),
            };
            let available = positions.iter().map(|p| p.size).fold(0.0, f64::max);
            size = size.min(available);
            if size <= 0.0 {
                return FillOutcome::Failed("no mirror position available to reduce".into());
            }
        }

        for attempt in 0..RETRY_ATTEMPTS {
            match self.mirror.place_market(&record.source_snapshot.contract, size, reduce_only).await {
                Ok(mirror_order_id) => return FillOutcome::Filled { mirror_order_id },
                Err(_) if attempt + 1 < RETRY_ATTEMPTS => tokio::time::sleep(RETRY_DELAY).await,
                Err(_) => {}
            }
        }

        self.backup_fill(record, size, reduce_only).await
    }

    /// Two-stage fallback of §4.7.1, each attempted at most once: smart
    /// price adjustment first, then an unconditional market order.
    pub async fn backup_fill(&self, record: &MirrorRecord, size: f64, reduce_only: bool) -> FillOutcome {
        let ticker = self.mirror.get_ticker().await;
        if let Ok(t) = ticker {
            let offset = if record.source_snapshot.side.is_long() { -BACKUP_OFFSET_USD } else { BACKUP_OFFSET_USD };
            let adjusted_price = t.last + offset;
            if let Ok(mirror_order_id) = self
                .mirror
                .place_trigger(
                    &record.source_snapshot.contract,
                    record.source_snapshot.side,
                    adjusted_price,
                    size,
                    reduce_only,
                    None,
                    None,
                )
                .await
            {
                return FillOutcome::BackupTriggerPlaced { mirror_order_id };
            }
        }

        match self.mirror.place_market(&record.source_snapshot.contract, size, reduce_only).await {
            Ok(mirror_order_id) => FillOutcome::BackupMarketPlaced { mirror_order_id },
            Err(e) => FillOutcome::Failed(format!("backup market fill failed: {e}")),
        }
    }
}
