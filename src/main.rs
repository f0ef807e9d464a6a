//! mm-engine-rs: cross-exchange order mirroring engine.
//!
//! Wiring layer only: load config, build the source/mirror adapters, start
//! the Supervisor's cooperative fibers, and run until shutdown. The
//! reconciliation logic itself lives in the library (`src/lib.rs` and its
//! modules) so it can be driven directly from integration tests.

use std::sync::Arc;

use mm_engine_rs::clock::SystemClock;
use mm_engine_rs::config::EngineConfig;
use mm_engine_rs::exchange::{HttpMirrorClient, HttpSourceClient, MirrorClient, SourceClient};
use mm_engine_rs::notifier::{LoggingNotifier, RateLimitedNotifier};
use mm_engine_rs::persistence::{self, PersistedState};
use mm_engine_rs::signing::WalletSigner;
use mm_engine_rs::supervisor::Supervisor;

const STATE_FILE: &str = "mirror_engine_state.json";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();

    let session_id = uuid::Uuid::new_v4().to_string();
    log::info!("[SUPERVISOR] mirror-reconciliation-engine starting, session={session_id}");

    let mut config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            log::error!("[CONFIG] {e}");
            std::process::exit(1);
        }
    };

    let persisted = persistence::load_state(STATE_FILE, config.mirror_enabled_default, config.ratio_default);
    config.mirror_enabled_default = persisted.mirror_enabled;
    config.ratio_default = persisted.ratio;
    log::debug!("[CONFIG] {config:?}");

    // Credential loading / request signing is an external collaborator (§1):
    // the signer seam is filled with one concrete scheme (see `signing.rs`);
    // a real deployment swaps in its venue-specific signer behind the same
    // trait.
    let source_key = std::env::var("SOURCE_SIGNING_KEY")
        .unwrap_or_else(|_| "0000000000000000000000000000000000000000000000000000000000000001".to_string());
    let mirror_key = std::env::var("MIRROR_SIGNING_KEY")
        .unwrap_or_else(|_| "0000000000000000000000000000000000000000000000000000000000000002".to_string());
    let source_signer = Arc::new(WalletSigner::from_private_key_hex(&source_key).expect("invalid SOURCE_SIGNING_KEY"));
    let mirror_signer = Arc::new(WalletSigner::from_private_key_hex(&mirror_key).expect("invalid MIRROR_SIGNING_KEY"));

    let source_base_url = std::env::var("SOURCE_BASE_URL").unwrap_or_else(|_| "https://source.example".to_string());
    let mirror_base_url = std::env::var("MIRROR_BASE_URL").unwrap_or_else(|_| "https://mirror.example".to_string());

    let source: Arc<dyn SourceClient> = Arc::new(HttpSourceClient::new(source_base_url, source_signer));
    let mirror: Arc<dyn MirrorClient> = Arc::new(HttpMirrorClient::new(mirror_base_url, mirror_signer));
    let clock = Arc::new(SystemClock);
    let notifier = Arc::new(RateLimitedNotifier::new(Arc::new(LoggingNotifier)));

    let supervisor = Supervisor::new(source, mirror, clock, notifier, config);

    if let Err(e) = supervisor.init().await {
        log::error!("[SUPERVISOR] init failed: {e}");
        std::process::exit(1);
    }

    let fibers = supervisor.run();
    log::info!("[SUPERVISOR] {} fibers running", fibers.len());

    // Periodic durability save: counters/ratio only, never mirror-record or
    // startup-set state (§19 — restart safety comes from startup exclusion).
    let state_for_save = supervisor.state();
    let save_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let snap = state_for_save.stats.snapshot(None, None, state_for_save.controller.ratio().await, 0, 0);
            let mut persisted = PersistedState::new(state_for_save.controller.is_enabled().await, snap.current_ratio);
            persisted.failed_mirrors = snap.failed_mirrors;
            persisted.cancel_failures = snap.cancel_failures;
            persisted.margin_mode_failures = snap.margin_mode_failures;
            persisted.immediate_fill_failures = snap.immediate_fill_failures;
            persisted.forced_cancel_cleanups = snap.forced_cancel_cleanups;
            persisted.mirrors_placed = snap.mirrors_placed;
            persisted.mirrors_filled = snap.mirrors_filled;
            persisted.mirrors_canceled = snap.mirrors_canceled;
            persisted.permissive_close_mirrors = snap.permissive_close_mirrors;
            persistence::save_state(STATE_FILE, &persisted);
        }
    });

    tokio::signal::ctrl_c().await.expect("failed to listen for ctrl-c");
    log::info!("[SUPERVISOR] shutdown signal received");
    save_handle.abort();
    supervisor.teardown().await;
}
