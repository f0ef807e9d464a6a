//! End-to-end scenario tests for the mirroring engine's reconciliation
//! core. Each test wires the relevant components directly against
//! `MockExchange` rather than spinning up the `Supervisor`'s real-time
//! fibers, so outcomes are deterministic and don't depend on wall-clock
//! cadence.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;

use common::{trigger_order, AlwaysFailCancelMirror};

use mm_engine_rs::analyzer::{decide, AnalyzerDecision, DEFAULT_CLOSE_THRESHOLD};
use mm_engine_rs::cancel_sync::{CancelOutcome, CancelSynchronizer};
use mm_engine_rs::controller::Controller;
use mm_engine_rs::exchange::{MirrorClient, MockExchange, SourceClient};
use mm_engine_rs::executor::{FillOutcome, ImmediateFillExecutor};
use mm_engine_rs::hash_cache::{OrderHashes, TtlMap};
use mm_engine_rs::margin_guard::MarginModeGuard;
use mm_engine_rs::mirror_record::MirrorRecordStore;
use mm_engine_rs::notifier::{LoggingNotifier, RateLimitedNotifier};
use mm_engine_rs::placement::{MirrorPlacementPipeline, PlacementOutcome};
use mm_engine_rs::stats::Stats;
use mm_engine_rs::types::{MarginMode, OrderSide};

fn stack(mirror: Arc<MockExchange>) -> (Arc<RateLimitedNotifier>, Arc<Stats>, Arc<MarginModeGuard>) {
    let notifier = Arc::new(RateLimitedNotifier::new(Arc::new(LoggingNotifier)));
    let stats = Arc::new(Stats::default());
    let guard = Arc::new(MarginModeGuard::new(mirror, notifier.clone(), stats.clone()));
    (notifier, stats, guard)
}

/// Scenario A — clean open then fill (spec §8).
///
/// Source opens a long-trigger at 100,000, the engine mirrors it, the
/// source order fills, and the next tick's price read shows the source
/// above its own trigger again — the recent-fills lookup is what must
/// still recognize the fill rather than the momentary reached/not-reached
/// read of the live price.
#[tokio::test]
async fn scenario_a_clean_open_and_fill() {
    let source = Arc::new(MockExchange::new(100_000.0, 10_000.0));
    let mirror = Arc::new(MockExchange::new(99_800.0, 1_000.0));
    let (notifier, stats, margin_guard) = stack(mirror.clone());
    let hashes = OrderHashes::new(vec![0.0004, 0.001, 0.002, 0.004], 180_000);
    let records = MirrorRecordStore::default();
    let order = trigger_order("s1", OrderSide::OpenLong, 100_000.0, 0.1, 10);

    let pipeline = MirrorPlacementPipeline::new(source.clone(), mirror.clone(), margin_guard.clone(), notifier.clone(), stats.clone());
    let outcome = pipeline
        .place(&order, &hashes, &records, &Default::default(), 1.0, 5.0, 100_000.0, 99_800.0, 0)
        .await
        .unwrap();
    assert!(matches!(outcome, PlacementOutcome::Placed { .. }));
    assert!(records.contains_source("s1").await);
    assert_eq!(stats.mirrors_placed.load(Ordering::Relaxed), 1);

    source.mark_filled("s1").await;
    let recent_fills = SourceClient::get_recent_filled_orders(source.as_ref(), "BTC_USDT", 5).await.unwrap();
    // Source has since moved back above its own trigger; without the
    // recent-fills cross-check this would read as "not reached".
    let decision = decide(&order, 100_050.0, 99_800.0, &recent_fills, DEFAULT_CLOSE_THRESHOLD);
    assert_eq!(decision, AnalyzerDecision::Filled);

    let record = records.get_by_source("s1").await.unwrap();
    let executor = ImmediateFillExecutor::new(mirror.clone(), margin_guard);
    let fill_outcome = executor.execute(&record).await;
    assert!(matches!(fill_outcome, FillOutcome::Filled { .. }));
    records.remove_by_source("s1").await;

    assert!(records.get_by_source("s1").await.is_none());
    let st = mirror.inner.lock().await;
    assert_eq!(st.placed_markets.len(), 1);
    assert!(!st.placed_markets[0].2, "opening a long is not reduce-only");
}

/// Scenario B — clean cancel (spec §8): both venues' prices sit above the
/// trigger, the source order disappears, and the mirror counterpart
/// cancels within its first synchronize() pass.
#[tokio::test]
async fn scenario_b_clean_cancel() {
    let source = Arc::new(MockExchange::new(100_000.0, 10_000.0));
    let mirror = Arc::new(MockExchange::new(100_000.0, 1_000.0));
    let (notifier, stats, margin_guard) = stack(mirror.clone());
    let hashes = OrderHashes::new(vec![0.0004, 0.001, 0.002, 0.004], 180_000);
    let records = MirrorRecordStore::default();
    let order = trigger_order("s2", OrderSide::OpenLong, 90_000.0, 0.1, 10);

    let pipeline = MirrorPlacementPipeline::new(source.clone(), mirror.clone(), margin_guard.clone(), notifier.clone(), stats.clone());
    pipeline
        .place(&order, &hashes, &records, &Default::default(), 1.0, 5.0, 100_000.0, 100_000.0, 0)
        .await
        .unwrap();

    let decision = decide(&order, 100_000.0, 100_000.0, &[], DEFAULT_CLOSE_THRESHOLD);
    assert_eq!(decision, AnalyzerDecision::Canceled);

    let cancel_sync = CancelSynchronizer::new(mirror.clone(), margin_guard, notifier, stats);
    let retries = TtlMap::new(60_000);
    let outcome = cancel_sync.synchronize("s2", &records, &retries, 0).await;
    assert_eq!(outcome, CancelOutcome::Canceled);
    assert!(records.get_by_source("s2").await.is_none());
}

/// Scenario C — divergent prices yield "uncertain" rather than a cancel,
/// and the order is retried (not dropped) once prices converge. Models
/// what the `pending_fills` queue (drained by the `fill_queue_drain`
/// fiber) holds between ticks.
#[tokio::test]
async fn scenario_c_divergent_cancel_safe_wait() {
    let order = trigger_order("s3", OrderSide::OpenLong, 99_950.0, 0.1, 10);

    // source hasn't reached its own trigger, mirror has: do not cancel.
    let decision = decide(&order, 100_050.0, 99_900.0, &[], DEFAULT_CLOSE_THRESHOLD);
    assert_eq!(decision, AnalyzerDecision::Uncertain);

    let pending: TtlMap<String, mm_engine_rs::types::TriggerOrder> = TtlMap::new(300_000);
    pending.set(order.order_id.clone(), order.clone(), 0).await;
    assert!(pending.get(&order.order_id).await.is_some());

    // next tick: source catches down to mirror's level too -> both reached,
    // no recent-fill lookup hit -> now resolves to canceled.
    let (_, queued) = pending.entries().await.into_iter().next().unwrap();
    let resolved = decide(&queued, 99_900.0, 99_900.0, &[], DEFAULT_CLOSE_THRESHOLD);
    assert_eq!(resolved, AnalyzerDecision::Canceled);
}

/// Scenario D — mirror `cancel_trigger` fails forever with a
/// non-idempotent error; after the force-cleanup threshold the record is
/// notified-but-kept, and after the wipe threshold it's actually removed.
#[tokio::test(start_paused = true)]
async fn scenario_d_force_cancel_cleanup() {
    let mirror = Arc::new(MockExchange::new(100_000.0, 1_000.0));
    mirror.insert_trigger(trigger_order("m4", OrderSide::OpenLong, 90_000.0, 0.1, 10)).await;
    let failing: Arc<dyn MirrorClient> = Arc::new(AlwaysFailCancelMirror { inner: mirror.clone() });
    let (notifier, stats, margin_guard) = {
        let notifier = Arc::new(RateLimitedNotifier::new(Arc::new(LoggingNotifier)));
        let stats = Arc::new(Stats::default());
        let guard = Arc::new(MarginModeGuard::new(failing.clone(), notifier.clone(), stats.clone()));
        (notifier, stats, guard)
    };
    let cancel_sync = CancelSynchronizer::new(failing, margin_guard, notifier, stats.clone());

    let records = MirrorRecordStore::default();
    records
        .insert(mm_engine_rs::mirror_record::MirrorRecord {
            source_order_id: "s4".into(),
            mirror_order_id: "m4".into(),
            source_snapshot: trigger_order("s4", OrderSide::OpenLong, 90_000.0, 0.1, 10),
            base_margin_ratio: 0.1,
            applied_ratio_multiplier: 1.0,
            final_margin_ratio: 0.1,
            requested_trigger_price: 90_000.0,
            adjusted_trigger_price: 90_000.0,
            has_tp_sl: false,
            tp_price: None,
            sl_price: None,
            created_at: 0,
        })
        .await;
    let retries = TtlMap::new(600_000);

    let mut last = None;
    for attempt in 0..10u64 {
        last = Some(cancel_sync.synchronize("s4", &records, &retries, attempt).await);
    }

    assert_eq!(last, Some(CancelOutcome::WipedAfterRepeatedFailure { attempts: 10 }));
    assert!(records.get_by_source("s4").await.is_none());
    // incremented exactly once, on the attempt-10 wipe itself.
    assert_eq!(stats.forced_cancel_cleanups.load(Ordering::Relaxed), 1);
}

/// Scenario E — an operator ratio change mid-run affects subsequent
/// placements but never resizes an already-mirrored order.
#[tokio::test]
async fn scenario_e_ratio_change_mid_run_does_not_resize_existing() {
    let source = Arc::new(MockExchange::new(50_000.0, 100_000.0));
    let mirror = Arc::new(MockExchange::new(50_000.0, 50_000.0));
    let (notifier, stats, margin_guard) = stack(mirror.clone());
    let hashes = OrderHashes::new(vec![0.0004, 0.001, 0.002, 0.004], 180_000);
    let records = MirrorRecordStore::default();
    let controller = Controller::new(true, 1.0);

    let pipeline = MirrorPlacementPipeline::new(source.clone(), mirror.clone(), margin_guard.clone(), notifier.clone(), stats.clone());

    let first = trigger_order("e1", OrderSide::OpenLong, 50_000.0, 0.1, 10);
    let ratio_at_first = controller.ratio().await;
    pipeline
        .place(&first, &hashes, &records, &Default::default(), ratio_at_first, 0.01, 50_000.0, 50_000.0, 0)
        .await
        .unwrap();
    let first_record = records.get_by_source("e1").await.unwrap();
    let first_ratio_applied = first_record.applied_ratio_multiplier;
    assert_eq!(first_ratio_applied, 1.0);

    controller.set_ratio(2.5, "operator", 1).await.unwrap();

    // Deliberately a different trigger price from the first order -- an
    // identical (contract, price, size) tuple would hit the dedup hash
    // cache regardless of ratio and the placement would be skipped before
    // ever reaching the ratio-dependent sizing step.
    let second = trigger_order("e2", OrderSide::OpenLong, 49_000.0, 0.1, 10);
    let ratio_at_second = controller.ratio().await;
    pipeline
        .place(&second, &hashes, &records, &Default::default(), ratio_at_second, 0.01, 50_000.0, 50_000.0, 0)
        .await
        .unwrap();
    let second_record = records.get_by_source("e2").await.unwrap();
    assert_eq!(second_record.applied_ratio_multiplier, 2.5);

    // the first mirror order's own record is untouched by the ratio bump.
    let first_record_after = records.get_by_source("e1").await.unwrap();
    assert_eq!(first_record_after.applied_ratio_multiplier, first_ratio_applied);
    assert_eq!(first_record_after.final_margin_ratio, first_record.final_margin_ratio);
}

/// Scenario F — margin-mode coercion: the guard detects isolated mode,
/// coerces to cross, and a placement computed afterward reads the
/// (possibly updated) post-coercion mirror equity.
#[tokio::test]
async fn scenario_f_margin_mode_coercion_then_placement() {
    let source = Arc::new(MockExchange::new(50_000.0, 100_000.0));
    let mirror = Arc::new(MockExchange::new(50_000.0, 20_000.0));
    mirror.set_margin_mode(MarginMode::Isolated).await;
    let (notifier, stats, margin_guard) = stack(mirror.clone());

    assert_eq!(mirror.get_margin_mode("BTC_USDT").await.unwrap(), MarginMode::Isolated);
    let coerced = margin_guard.ensure_cross("BTC_USDT").await;
    assert!(coerced);
    assert_eq!(mirror.get_margin_mode("BTC_USDT").await.unwrap(), MarginMode::Cross);
    assert_eq!(stats.margin_mode_failures.load(Ordering::Relaxed), 0, "a successful coercion is not a failure");

    let hashes = OrderHashes::new(vec![0.0004, 0.001, 0.002, 0.004], 180_000);
    let records = MirrorRecordStore::default();
    let order = trigger_order("f1", OrderSide::OpenLong, 50_000.0, 0.1, 10);
    let pipeline = MirrorPlacementPipeline::new(source, mirror.clone(), margin_guard, notifier, stats);
    let outcome = pipeline
        .place(&order, &hashes, &records, &Default::default(), 1.0, 0.01, 50_000.0, 50_000.0, 0)
        .await
        .unwrap();
    assert!(matches!(outcome, PlacementOutcome::Placed { .. }));

    let mirror_account = MirrorClient::get_account(mirror.as_ref()).await.unwrap();
    let record = records.get_by_source("f1").await.unwrap();
    assert!((record.final_margin_ratio * mirror_account.total_equity) <= mirror_account.available + 1e-6);
}
