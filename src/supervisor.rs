//! Supervisor (§4.11).
//!
//! Owns the long-running cooperative fibers, the shared reconciliation
//! state, startup replay, and graceful teardown. Each fiber is a
//! `tokio::spawn`ed task at a fixed cadence, panic-isolated and watching a
//! shared shutdown signal.

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::analyzer::{decide, AnalyzerDecision, DEFAULT_CLOSE_THRESHOLD};
use crate::cancel_sync::CancelSynchronizer;
use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::controller::Controller;
use crate::exchange::{MirrorClient, SourceClient};
use crate::executor::{FillOutcome, ImmediateFillExecutor};
use crate::hash_cache::{OrderHashes, TtlMap};
use crate::types::TriggerOrder;
use crate::margin_guard::MarginModeGuard;
use crate::mirror_record::MirrorRecordStore;
use crate::notifier::{NotificationCategory, RateLimitedNotifier};
use crate::placement::MirrorPlacementPipeline;
use crate::price_tracker::PriceTracker;
use crate::reconciler::PositionReconciler;
use crate::snapshot::{diff, TriggerSnapshot};
use crate::stats::Stats;

const CANCEL_RETRY_TTL_MS: u64 = 10 * 60 * 1000;
const RECENTLY_PROCESSED_TTL_MS: u64 = 15_000;
const ORDER_HASH_TTL_MS: u64 = 3 * 60 * 1000;
const PENDING_FILL_TTL_MS: u64 = 5 * 60 * 1000;

/// All state the fibers share, owned exclusively by the Supervisor. Caches
/// and the record store are internally synchronized; this struct is the
/// thing every fiber clones an `Arc` of.
pub struct SharedState {
    pub price_tracker: Arc<PriceTracker>,
    pub records: Arc<MirrorRecordStore>,
    pub hashes: Arc<OrderHashes>,
    pub cancel_retries: Arc<TtlMap<String, u32>>,
    pub recently_processed: Arc<TtlMap<String, ()>>,
    /// Orders the Analyzer couldn't classify on the tick they disappeared
    /// (`mir_reached && !src_reached` — §4.6's "uncertain" row). They've
    /// already dropped out of the snapshot diff by then, so `trigger_scan`
    /// alone would never revisit them; `fill_queue_drain` owns re-deciding
    /// these every tick until a definitive outcome lands or the TTL expires.
    pub pending_fills: Arc<TtlMap<String, TriggerOrder>>,
    pub controller: Arc<Controller>,
    pub stats: Arc<Stats>,
    pub margin_guard: Arc<MarginModeGuard>,
    pub startup_source_ids: Arc<tokio::sync::RwLock<HashSet<String>>>,
    pub startup_mirror_positions: Arc<tokio::sync::RwLock<HashSet<String>>>,
    pub prev_snapshot: Arc<tokio::sync::Mutex<TriggerSnapshot>>,
}

pub struct Supervisor {
    source: Arc<dyn SourceClient>,
    mirror: Arc<dyn MirrorClient>,
    clock: Arc<dyn Clock>,
    notifier: Arc<RateLimitedNotifier>,
    config: EngineConfig,
    state: Arc<SharedState>,
    shutdown_tx: watch::Sender<bool>,
}

impl Supervisor {
    pub fn new(
        source: Arc<dyn SourceClient>,
        mirror: Arc<dyn MirrorClient>,
        clock: Arc<dyn Clock>,
        notifier: Arc<RateLimitedNotifier>,
        config: EngineConfig,
    ) -> Self {
        let stats = Arc::new(Stats::default());
        let margin_guard = Arc::new(MarginModeGuard::new(mirror.clone(), notifier.clone(), stats.clone()));
        let (shutdown_tx, _) = watch::channel(false);
        let state = Arc::new(SharedState {
            price_tracker: Arc::new(PriceTracker::new()),
            records: Arc::new(MirrorRecordStore::default()),
            hashes: Arc::new(OrderHashes::new(config.hash_offset_fractions.clone(), ORDER_HASH_TTL_MS)),
            cancel_retries: Arc::new(TtlMap::new(CANCEL_RETRY_TTL_MS)),
            recently_processed: Arc::new(TtlMap::new(RECENTLY_PROCESSED_TTL_MS)),
            pending_fills: Arc::new(TtlMap::new(PENDING_FILL_TTL_MS)),
            controller: Arc::new(Controller::new(config.mirror_enabled_default, config.ratio_default)),
            stats,
            margin_guard,
            startup_source_ids: Arc::new(tokio::sync::RwLock::new(HashSet::new())),
            startup_mirror_positions: Arc::new(tokio::sync::RwLock::new(HashSet::new())),
            prev_snapshot: Arc::new(tokio::sync::Mutex::new(TriggerSnapshot::default())),
        });
        Self { source, mirror, clock, notifier, config, state, shutdown_tx }
    }

    /// Rebuilds startup sets and replays any pre-existing non-startup
    /// source triggers up to 3 times with 10s back-off. Idempotent: also
    /// used on the off->on re-initialization transition (§4.3).
    pub async fn init(&self) -> Result<(), String> {
        let contract = self.config.source_contract.clone();

        let mut source_ids = HashSet::new();
        if let Ok(orders) = self.source.get_all_trigger_orders(&contract).await {
            source_ids.extend(orders.into_iter().map(|o| o.order_id));
        }
        *self.state.startup_source_ids.write().await = source_ids;

        let mut mirror_positions = HashSet::new();
        if let Ok(positions) = self.mirror.get_positions(&self.config.mirror_contract).await {
            if positions.iter().any(|p| !p.is_flat()) {
                mirror_positions.insert(self.config.mirror_contract.clone());
            }
        }
        *self.state.startup_mirror_positions.write().await = mirror_positions;

        self.state.price_tracker.poll(self.source.as_ref(), self.mirror.as_ref(), self.clock.now_ms()).await;
        self.state.margin_guard.ensure_cross(&self.config.mirror_contract).await;

        let current = match self.source.get_all_trigger_orders(&contract).await {
            Ok(orders) => TriggerSnapshot::from_orders(orders),
            Err(e) => return Err(format!("init: failed to fetch source triggers: {e}")),
        };
        *self.state.prev_snapshot.lock().await = current;

        log::info!(
            "[SUPERVISOR] init complete: {} startup source orders, mirror startup position={}",
            self.state.startup_source_ids.read().await.len(),
            !self.state.startup_mirror_positions.read().await.is_empty()
        );
        Ok(())
    }

    /// Spawns the cooperative fibers (§4.11's table) at their defined
    /// cadences. Each is
    /// wrapped so a panic inside logs and the fiber restarts without
    /// taking down its peers (§5 "Failure isolation").
    pub fn run(&self) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(self.spawn_fiber("price_refresh", Duration::from_secs(5), {
            let source = self.source.clone();
            let mirror = self.mirror.clone();
            let clock = self.clock.clone();
            let tracker = self.state.price_tracker.clone();
            move || {
                let source = source.clone();
                let mirror = mirror.clone();
                let clock = clock.clone();
                let tracker = tracker.clone();
                async move {
                    let now = clock.now_ms();
                    tracker.poll(source.as_ref(), mirror.as_ref(), now).await;
                }
            }
        }));

        handles.push(self.spawn_fiber("trigger_scan", Duration::from_millis(self.config.trigger_scan_interval_ms), {
            let source = self.source.clone();
            let mirror = self.mirror.clone();
            let clock = self.clock.clone();
            let notifier = self.notifier.clone();
            let config = self.config.clone_minimal();
            let state = self.state.clone();
            move || {
                let source = source.clone();
                let mirror = mirror.clone();
                let clock = clock.clone();
                let notifier = notifier.clone();
                let config = config.clone();
                let state = state.clone();
                async move { run_trigger_scan(&source, &mirror, &clock, &notifier, &config, &state).await }
            }
        }));

        handles.push(self.spawn_fiber("fill_queue_drain", Duration::from_millis(self.config.trigger_scan_interval_ms), {
            let source = self.source.clone();
            let mirror = self.mirror.clone();
            let clock = self.clock.clone();
            let notifier = self.notifier.clone();
            let config = self.config.clone_minimal();
            let state = self.state.clone();
            move || {
                let source = source.clone();
                let mirror = mirror.clone();
                let clock = clock.clone();
                let notifier = notifier.clone();
                let config = config.clone();
                let state = state.clone();
                async move { run_fill_queue_drain(&source, &mirror, &clock, &notifier, &config, &state).await }
            }
        }));

        handles.push(self.spawn_fiber("cancel_scan", Duration::from_secs(10), {
            let mirror = self.mirror.clone();
            let clock = self.clock.clone();
            let notifier = self.notifier.clone();
            let state = self.state.clone();
            move || {
                let mirror = mirror.clone();
                let clock = clock.clone();
                let notifier = notifier.clone();
                let state = state.clone();
                async move {
                    let margin_guard = state.margin_guard.clone();
                    let sync = CancelSynchronizer::new(mirror.clone(), margin_guard, notifier.clone(), state.stats.clone());
                    let now = clock.now_ms();
                    for source_id in state.records.all_source_ids().await {
                        sync.synchronize(&source_id, &state.records, &state.cancel_retries, now).await;
                    }
                }
            }
        }));

        handles.push(self.spawn_fiber("position_sync", Duration::from_secs(self.config.position_sync_interval_s), {
            let source = self.source.clone();
            let mirror = self.mirror.clone();
            let config = self.config.clone_minimal();
            let state = self.state.clone();
            move || {
                let source = source.clone();
                let mirror = mirror.clone();
                let config = config.clone();
                let state = state.clone();
                async move {
                    let reconciler = PositionReconciler::new(source, mirror, state.margin_guard.clone());
                    let startup = state.startup_mirror_positions.read().await.clone();
                    let _ = reconciler.reconcile_contract(&config.mirror_contract, &startup).await;
                }
            }
        }));

        handles.push(self.spawn_fiber("margin_guard", Duration::from_secs(self.config.margin_guard_interval_s), {
            let config = self.config.clone_minimal();
            let state = self.state.clone();
            move || {
                let config = config.clone();
                let state = state.clone();
                async move {
                    state.margin_guard.ensure_cross(&config.mirror_contract).await;
                }
            }
        }));

        handles.push(self.spawn_fiber("hash_cache_sweep", Duration::from_secs(60), {
            let clock = self.clock.clone();
            let state = self.state.clone();
            move || {
                let clock = clock.clone();
                let state = state.clone();
                async move {
                    let now = clock.now_ms();
                    state.hashes.sweep_expired(now).await;
                    state.cancel_retries.sweep_expired(now).await;
                    state.recently_processed.sweep_expired(now).await;
                    state.pending_fills.sweep_expired(now).await;
                }
            }
        }));

        handles.push(self.spawn_fiber("daily_report", Duration::from_secs(24 * 60 * 60), {
            let notifier = self.notifier.clone();
            let state = self.state.clone();
            move || {
                let notifier = notifier.clone();
                let state = state.clone();
                async move {
                    let price = state.price_tracker.current().await;
                    let ratio = state.controller.ratio().await;
                    let startup_source = state.startup_source_ids.read().await.len();
                    let startup_mirror = state.startup_mirror_positions.read().await.len();
                    let snap = state.stats.snapshot(
                        price.map(|p| p.source),
                        price.map(|p| p.mirror),
                        ratio,
                        startup_source,
                        startup_mirror,
                    );
                    notifier
                        .send(
                            NotificationCategory::SyncStatus,
                            &format!(
                                "daily report: placed={} filled={} canceled={} failed={}",
                                snap.mirrors_placed, snap.mirrors_filled, snap.mirrors_canceled, snap.failed_mirrors
                            ),
                        )
                        .await;
                }
            }
        }));

        handles
    }

    /// Wraps a future-producing closure into a fiber that logs and
    /// restarts on panic instead of taking down peers (§5).
    fn spawn_fiber<F, Fut>(&self, name: &'static str, cadence: Duration, make_future: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(cadence);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let fut = make_future();
                        if let Err(panic) = tokio::spawn(fut).await {
                            log::error!("[SUPERVISOR] fiber {name} panicked: {panic:?}, restarting");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            log::info!("[SUPERVISOR] fiber {name} shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    /// Cooperatively cancels all fibers and emits a final report.
    pub async fn teardown(&self) {
        let _ = self.shutdown_tx.send(true);
        let snap = self.state.stats.snapshot(None, None, self.state.controller.ratio().await, 0, 0);
        log::info!("[SUPERVISOR] teardown: final stats placed={} filled={} canceled={}", snap.mirrors_placed, snap.mirrors_filled, snap.mirrors_canceled);
    }

    pub fn state(&self) -> Arc<SharedState> {
        self.state.clone()
    }

    /// Operator-facing `set_enabled` (§4.3): on an off→on transition, runs
    /// the same idempotent re-initialization as startup (margin-mode check,
    /// price refresh, startup-set rebuild) before reconciliation fibers
    /// resume acting. On→off or no-op transitions just flip the flag.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), String> {
        let was_enabled = self.state.controller.is_enabled().await;
        self.state.controller.set_enabled(enabled).await;
        if enabled && !was_enabled {
            log::info!("[SUPERVISOR] re-enabling: replaying startup re-initialization");
            self.init().await?;
        }
        Ok(())
    }
}


/// A minimal, cheaply-cloneable subset of `EngineConfig` the fiber closures
/// need, to avoid requiring `EngineConfig` itself to derive `Clone` against
/// credential fields on every fiber spawn.
#[derive(Clone)]
struct FiberConfig {
    mirror_contract: String,
    source_contract: String,
    minimum_margin_usd: f64,
}

impl EngineConfig {
    fn clone_minimal(&self) -> FiberConfig {
        FiberConfig {
            mirror_contract: self.mirror_contract.clone(),
            source_contract: self.source_contract.clone(),
            minimum_margin_usd: self.minimum_margin_usd,
        }
    }
}

async fn run_trigger_scan(
    source: &Arc<dyn SourceClient>,
    mirror: &Arc<dyn MirrorClient>,
    clock: &Arc<dyn Clock>,
    notifier: &Arc<RateLimitedNotifier>,
    config: &FiberConfig,
    state: &Arc<SharedState>,
) {
    if !state.controller.is_enabled().await {
        return;
    }

    let now = clock.now_ms();
    let current = match source.get_all_trigger_orders(&config.source_contract).await {
        Ok(orders) => TriggerSnapshot::from_orders(orders),
        Err(e) => {
            state.stats.record_error(format!("trigger_scan fetch failed: {e}"));
            return;
        }
    };

    let prev = {
        let mut guard = state.prev_snapshot.lock().await;
        let prev = guard.clone();
        *guard = current.clone();
        prev
    };
    let delta = diff(&prev, &current);

    let recent_fills = source.get_recent_filled_orders(&config.source_contract, 5).await.unwrap_or_default();
    let price = state.price_tracker.current().await;
    let (source_price, mirror_price) = match price {
        Some(p) => (p.source, p.mirror),
        None => return,
    };

    let margin_guard = state.margin_guard.clone();
    let executor = ImmediateFillExecutor::new(mirror.clone(), margin_guard.clone());
    let cancel_sync = CancelSynchronizer::new(mirror.clone(), margin_guard.clone(), notifier.clone(), state.stats.clone());

    for order in &delta.disappeared {
        if state.startup_source_ids.read().await.contains(&order.order_id) {
            continue;
        }
        let decision = decide(order, source_price, mirror_price, &recent_fills, DEFAULT_CLOSE_THRESHOLD);
        match decision {
            AnalyzerDecision::Filled => {
                state.pending_fills.remove(&order.order_id).await;
                if let Some(record) = state.records.get_by_source(&order.order_id).await {
                    let outcome = executor.execute(&record).await;
                    match outcome {
                        FillOutcome::Failed(msg) => {
                            state.stats.immediate_fill_failures.fetch_add(1, Ordering::Relaxed);
                            state.stats.record_error(msg);
                        }
                        _ => {
                            state.stats.mirrors_filled.fetch_add(1, Ordering::Relaxed);
                            state.records.remove_by_source(&order.order_id).await;
                        }
                    }
                }
            }
            AnalyzerDecision::Canceled => {
                state.pending_fills.remove(&order.order_id).await;
                cancel_sync.synchronize(&order.order_id, &state.records, &state.cancel_retries, now).await;
            }
            AnalyzerDecision::Uncertain => {
                state.pending_fills.set(order.order_id.clone(), order.clone(), now).await;
            }
        }
    }

    let pipeline = MirrorPlacementPipeline::new(source.clone(), mirror.clone(), margin_guard, notifier.clone(), state.stats.clone());
    let ratio = state.controller.ratio().await;
    let startup = state.startup_source_ids.read().await.clone();
    for order in &delta.appeared {
        // Recently-processed guard (§3 RecentlyProcessed, TTL 15s): skip an
        // order a prior tick already placed before its hash/record-store
        // entries would otherwise catch the repeat, then mark this one.
        if state.recently_processed.get(&order.order_id).await.is_some() {
            continue;
        }
        state.recently_processed.set(order.order_id.clone(), (), now).await;
        let outcome = pipeline
            .place(order, &state.hashes, &state.records, &startup, ratio, config.minimum_margin_usd, source_price, mirror_price, now)
            .await;
        if let Err(e) = outcome {
            state.stats.failed_mirrors.fetch_add(1, Ordering::Relaxed);
            state.stats.record_error(format!("placement failed for {}: {e}", order.order_id));
        }
    }
}

/// Re-decides every order sitting in the uncertain queue (§4.6's
/// `mir_reached && !src_reached` row). Prices move every tick, so an order
/// that was uncertain a moment ago may now have a clean verdict; this fiber
/// is the only thing that ever revisits them, since they've already fallen
/// out of `trigger_scan`'s snapshot diff by the time they land here.
async fn run_fill_queue_drain(
    source: &Arc<dyn SourceClient>,
    mirror: &Arc<dyn MirrorClient>,
    clock: &Arc<dyn Clock>,
    notifier: &Arc<RateLimitedNotifier>,
    config: &FiberConfig,
    state: &Arc<SharedState>,
) {
    if !state.controller.is_enabled().await {
        return;
    }

    let pending = state.pending_fills.entries().await;
    if pending.is_empty() {
        return;
    }

    let price = state.price_tracker.current().await;
    let (source_price, mirror_price) = match price {
        Some(p) => (p.source, p.mirror),
        None => return,
    };
    let recent_fills = source.get_recent_filled_orders(&config.source_contract, 5).await.unwrap_or_default();
    let now = clock.now_ms();

    let margin_guard = state.margin_guard.clone();
    let executor = ImmediateFillExecutor::new(mirror.clone(), margin_guard.clone());
    let cancel_sync = CancelSynchronizer::new(mirror.clone(), margin_guard, notifier.clone(), state.stats.clone());

    for (order_id, order) in pending {
        let decision = decide(&order, source_price, mirror_price, &recent_fills, DEFAULT_CLOSE_THRESHOLD);
        match decision {
            AnalyzerDecision::Filled => {
                state.pending_fills.remove(&order_id).await;
                if let Some(record) = state.records.get_by_source(&order_id).await {
                    match executor.execute(&record).await {
                        FillOutcome::Failed(msg) => {
                            state.stats.immediate_fill_failures.fetch_add(1, Ordering::Relaxed);
                            state.stats.record_error(msg);
                        }
                        _ => {
                            state.stats.mirrors_filled.fetch_add(1, Ordering::Relaxed);
                            state.records.remove_by_source(&order_id).await;
                        }
                    }
                }
            }
            AnalyzerDecision::Canceled => {
                state.pending_fills.remove(&order_id).await;
                cancel_sync.synchronize(&order_id, &state.records, &state.cancel_retries, now).await;
            }
            AnalyzerDecision::Uncertain => {}
        }
    }
}
