//! Mirror Placement Pipeline (§4.9).
//!
//! For each appeared source order (excluding the startup set): dedup,
//! classify, compute margin ratio, adjust trigger price for cross-venue
//! drift, size the mirror order, and place it.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::analyzer::{classify_direction, OrderDirection};
use crate::error::ReconcileError;
use crate::exchange::{MirrorClient, SourceClient};
use crate::hash_cache::OrderHashes;
use crate::margin_guard::MarginModeGuard;
use crate::mirror_record::{MirrorRecord, MirrorRecordStore};
use crate::notifier::{NotificationCategory, RateLimitedNotifier};
use crate::stats::Stats;
use crate::types::TriggerOrder;

const TRIGGER_DRIFT_THRESHOLD_USD: f64 = 50.0;
const MAX_TRIGGER_ADJUSTMENT_FRACTION: f64 = 0.05;
const MAX_FINAL_RATIO: f64 = 0.95;
const DEFAULT_LEVERAGE: u32 = 30;
const CONTRACT_UNIT: f64 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PlacementOutcome {
    Skipped(&'static str),
    Placed { mirror_order_id: String, tp_sl_partial: bool },
    Aborted(String),
}

pub struct MarginRatioCalc {
    pub base_ratio: f64,
    pub final_ratio: f64,
}

/// `base_ratio := (size * trigger_price) / (leverage * source_total_equity)`;
/// `final_ratio := clamp(base_ratio * ratio_multiplier, (0, 0.95])`.
pub fn compute_margin_ratio(size: f64, trigger_price: f64, leverage: u32, source_total_equity: f64, ratio_multiplier: f64) -> MarginRatioCalc {
    let base_ratio = if leverage == 0 || source_total_equity <= 0.0 {
        0.0
    } else {
        (size * trigger_price) / (leverage as f64 * source_total_equity)
    };
    let final_ratio = (base_ratio * ratio_multiplier).clamp(f64::MIN_POSITIVE, MAX_FINAL_RATIO);
    MarginRatioCalc { base_ratio, final_ratio }
}

/// Shifts the trigger in the direction that preserves intent on the mirror
/// side when prices have drifted apart by more than the threshold. Total
/// adjustment is bounded to 5% of the trigger price.
pub fn adjust_trigger_price(trigger_price: f64, is_long: bool, source_price: f64, mirror_price: f64) -> f64 {
    let diff = source_price - mirror_price;
    if diff.abs() <= TRIGGER_DRIFT_THRESHOLD_USD {
        return trigger_price;
    }
    let max_adjustment = trigger_price * MAX_TRIGGER_ADJUSTMENT_FRACTION;
    let raw_adjustment = diff * 0.1;
    let bounded = raw_adjustment.clamp(-max_adjustment, max_adjustment);
    if is_long {
        trigger_price - bounded
    } else {
        trigger_price + bounded
    }
}

pub struct MirrorPlacementPipeline {
    source: Arc<dyn SourceClient>,
    mirror: Arc<dyn MirrorClient>,
    margin_guard: Arc<MarginModeGuard>,
    notifier: Arc<RateLimitedNotifier>,
    stats: Arc<Stats>,
}

impl MirrorPlacementPipeline {
    pub fn new(
        source: Arc<dyn SourceClient>,
        mirror: Arc<dyn MirrorClient>,
        margin_guard: Arc<MarginModeGuard>,
        notifier: Arc<RateLimitedNotifier>,
        stats: Arc<Stats>,
    ) -> Self {
        Self { source, mirror, margin_guard, notifier, stats }
    }

    /// Steps 1-9 of §4.9.
    #[allow(clippy::too_many_arguments)]
    pub async fn place(
        &self,
        order: &TriggerOrder,
        hashes: &OrderHashes,
        records: &MirrorRecordStore,
        startup_source_ids: &std::collections::HashSet<String>,
        ratio_multiplier: f64,
        minimum_margin_usd: f64,
        source_price: f64,
        mirror_price: f64,
        now_ms: u64,
    ) -> Result<PlacementOutcome, ReconcileError> {
        if startup_source_ids.contains(&order.order_id) {
            return Ok(PlacementOutcome::Skipped("startup set"));
        }

        // 1. Dedup via hash cache.
        if hashes.contains_any(order).await {
            return Ok(PlacementOutcome::Skipped("dedup hash hit"));
        }

        // 2. Pre-checks: already mirrored.
        if records.contains_source(&order.order_id).await {
            return Ok(PlacementOutcome::Skipped("already has a mirror record"));
        }
        self.margin_guard.ensure_cross(&order.contract).await;

        // 3. Close-order classification, permissive: force-mirror even
        // with no known local mirror position, since a concurrent open
        // may be in flight. This is a deliberate retained behavior, not an
        // oversight: it favors never silently dropping a close.
        let direction = classify_direction(order);
        let mut permissive_close = false;
        if direction == OrderDirection::Close {
            let positions = self.mirror.get_positions(&order.contract).await.unwrap_or_default();
            if positions.iter().all(|p| p.is_flat()) {
                permissive_close = true;
            }
        }

        // 4. Leverage extraction: payload -> position -> account -> default.
        let leverage = self.resolve_leverage(order).await;

        // 5. Margin ratio.
        let account = self
            .source
            .get_account()
            .await
            .map_err(ReconcileError::Adapter)?;
        let calc = compute_margin_ratio(order.size, order.trigger_price, leverage, account.total_equity, ratio_multiplier);

        // 6. Trigger-price adjustment.
        let adjusted_trigger = adjust_trigger_price(order.trigger_price, order.side.is_long(), source_price, mirror_price);

        // 7. Mirror sizing, with tie-break clamp to available balance.
        let mirror_account = self
            .mirror
            .get_account()
            .await
            .map_err(ReconcileError::Adapter)?;
        let mut final_ratio = calc.final_ratio;
        let mut margin_usd = final_ratio * mirror_account.total_equity;
        if margin_usd > mirror_account.available * MAX_FINAL_RATIO {
            margin_usd = mirror_account.available * MAX_FINAL_RATIO;
            final_ratio = if mirror_account.total_equity > 0.0 { margin_usd / mirror_account.total_equity } else { 0.0 };
        }
        if margin_usd < minimum_margin_usd {
            return Ok(PlacementOutcome::Aborted(format!(
                "margin {margin_usd:.2} below floor {minimum_margin_usd:.2}"
            )));
        }
        let mirror_notional = margin_usd * leverage as f64;
        let mirror_contracts = (mirror_notional / (adjusted_trigger * CONTRACT_UNIT)).floor().max(1.0);

        // 8. Place with TP/SL if present.
        let placed = self
            .mirror
            .place_trigger(
                &order.contract,
                order.side,
                adjusted_trigger,
                mirror_contracts,
                order.side.is_reduce_only(),
                order.tp_price,
                order.sl_price,
            )
            .await
            .map_err(ReconcileError::Adapter)?;

        let tp_sl_partial = order.tp_price.is_some() || order.sl_price.is_some();

        // 9. Record success.
        records
            .insert(MirrorRecord {
                source_order_id: order.order_id.clone(),
                mirror_order_id: placed.clone(),
                source_snapshot: order.clone(),
                base_margin_ratio: calc.base_ratio,
                applied_ratio_multiplier: ratio_multiplier,
                final_margin_ratio: final_ratio,
                requested_trigger_price: order.trigger_price,
                adjusted_trigger_price: adjusted_trigger,
                has_tp_sl: tp_sl_partial,
                tp_price: order.tp_price,
                sl_price: order.sl_price,
                created_at: now_ms,
            })
            .await;
        hashes.insert_variants(order, now_ms).await;
        self.stats.mirrors_placed.fetch_add(1, Ordering::Relaxed);
        if permissive_close {
            self.stats.permissive_close_mirrors.fetch_add(1, Ordering::Relaxed);
        }
        self.notifier
            .send(NotificationCategory::MirrorSuccess, &format!("mirrored {} -> {placed}", order.order_id))
            .await;

        Ok(PlacementOutcome::Placed { mirror_order_id: placed, tp_sl_partial: false })
    }

    async fn resolve_leverage(&self, order: &TriggerOrder) -> u32 {
        if order.leverage >= 1 {
            return order.leverage.clamp(1, 125);
        }
        if let Ok(positions) = self.source.get_positions(&order.contract).await {
            if let Some(p) = positions.first() {
                return p.leverage.clamp(1, 125);
            }
        }
        if let Ok(account) = self.source.get_account().await {
            if account.leverage_default >= 1 {
                return account.leverage_default.clamp(1, 125);
            }
        }
        DEFAULT_LEVERAGE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::notifier::LoggingNotifier;
    use crate::types::OrderSide;

    fn order() -> TriggerOrder {
        TriggerOrder {
            order_id: "s1".into(),
            contract: "BTC_USDT".into(),
            side: OrderSide::OpenLong,
            trigger_price: 50_000.0,
            size: 0.1,
            leverage: 10,
            tp_price: None,
            sl_price: None,
            created_at: 0,
        }
    }

    fn pipeline(source: Arc<MockExchange>, mirror: Arc<MockExchange>) -> MirrorPlacementPipeline {
        MirrorPlacementPipeline::new(
            source,
            mirror.clone(),
            Arc::new(MarginModeGuard::new(
                mirror,
                Arc::new(RateLimitedNotifier::new(Arc::new(LoggingNotifier))),
                Arc::new(Stats::default()),
            )),
            Arc::new(RateLimitedNotifier::new(Arc::new(LoggingNotifier))),
            Arc::new(Stats::default()),
        )
    }

    #[tokio::test]
    async fn places_a_mirror_order_and_records_it() {
        let source = Arc::new(MockExchange::new(50_000.0, 100_000.0));
        let mirror = Arc::new(MockExchange::new(50_010.0, 50_000.0));
        let hashes = OrderHashes::new(vec![0.001], 180_000);
        let records = MirrorRecordStore::default();
        let pipeline = pipeline(source, mirror);
        let outcome = pipeline
            .place(&order(), &hashes, &records, &Default::default(), 1.0, 5.0, 50_000.0, 50_010.0, 0)
            .await
            .unwrap();
        assert!(matches!(outcome, PlacementOutcome::Placed { .. }));
        assert!(records.contains_source("s1").await);
    }

    #[tokio::test]
    async fn dedup_hit_skips_placement() {
        let source = Arc::new(MockExchange::new(50_000.0, 100_000.0));
        let mirror = Arc::new(MockExchange::new(50_010.0, 50_000.0));
        let hashes = OrderHashes::new(vec![0.001], 180_000);
        hashes.insert_variants(&order(), 0).await;
        let records = MirrorRecordStore::default();
        let pipeline = pipeline(source, mirror);
        let outcome = pipeline
            .place(&order(), &hashes, &records, &Default::default(), 1.0, 5.0, 50_000.0, 50_010.0, 0)
            .await
            .unwrap();
        assert_eq!(outcome, PlacementOutcome::Skipped("dedup hash hit"));
    }

    #[tokio::test]
    async fn startup_set_membership_is_always_skipped() {
        let source = Arc::new(MockExchange::new(50_000.0, 100_000.0));
        let mirror = Arc::new(MockExchange::new(50_010.0, 50_000.0));
        let hashes = OrderHashes::new(vec![0.001], 180_000);
        let records = MirrorRecordStore::default();
        let mut startup = std::collections::HashSet::new();
        startup.insert("s1".to_string());
        let pipeline = pipeline(source, mirror);
        let outcome = pipeline
            .place(&order(), &hashes, &records, &startup, 1.0, 5.0, 50_000.0, 50_010.0, 0)
            .await
            .unwrap();
        assert_eq!(outcome, PlacementOutcome::Skipped("startup set"));
    }

    #[test]
    fn margin_ratio_applies_multiplier_and_clamps() {
        let calc = compute_margin_ratio(1.0, 100.0, 10, 1000.0, 50.0);
        assert!(calc.final_ratio <= MAX_FINAL_RATIO);
    }

    #[test]
    fn trigger_adjustment_bounded_to_five_percent() {
        let adjusted = adjust_trigger_price(50_000.0, true, 50_000.0, 40_000.0);
        let max_move = 50_000.0 * MAX_TRIGGER_ADJUSTMENT_FRACTION;
        assert!((adjusted - 50_000.0).abs() <= max_move + 1e-6);
    }
}
