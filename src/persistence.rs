//! Persistence (ambient, supplementing §6 "Persisted state: none is
//! required"). Mirror-record and startup-set state is always rebuilt from
//! venue reads at `init()`; only the operator-visible counters and
//! ratio/enable knobs are optionally persisted so a restart doesn't reset
//! them to zero.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedState {
    pub failed_mirrors: u64,
    pub cancel_failures: u64,
    pub margin_mode_failures: u64,
    pub immediate_fill_failures: u64,
    pub forced_cancel_cleanups: u64,
    pub mirrors_placed: u64,
    pub mirrors_filled: u64,
    pub mirrors_canceled: u64,
    pub permissive_close_mirrors: u64,
    pub mirror_enabled: bool,
    pub ratio: f64,
}

impl PersistedState {
    pub fn new(mirror_enabled: bool, ratio: f64) -> Self {
        Self {
            failed_mirrors: 0,
            cancel_failures: 0,
            margin_mode_failures: 0,
            immediate_fill_failures: 0,
            forced_cancel_cleanups: 0,
            mirrors_placed: 0,
            mirrors_filled: 0,
            mirrors_canceled: 0,
            permissive_close_mirrors: 0,
            mirror_enabled,
            ratio,
        }
    }
}

pub fn load_state<P: AsRef<Path>>(path: P, mirror_enabled_default: bool, ratio_default: f64) -> PersistedState {
    if path.as_ref().exists() {
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<PersistedState>(&content) {
                Ok(state) => {
                    info!(
                        "Loaded state from {:?}: ratio={:.2}, mirrors_placed={}",
                        path.as_ref(),
                        state.ratio,
                        state.mirrors_placed
                    );
                    return state;
                }
                Err(e) => error!("Failed to parse state file: {e}"),
            },
            Err(e) => error!("Failed to read state file: {e}"),
        }
    }
    info!("State file not found. Initializing new state with ratio={ratio_default:.2}");
    PersistedState::new(mirror_enabled_default, ratio_default)
}

pub fn save_state<P: AsRef<Path>>(path: P, state: &PersistedState) {
    match serde_json::to_string_pretty(state) {
        Ok(content) => {
            if let Err(e) = fs::write(path, content) {
                error!("Failed to write state file: {e}");
            }
        }
        Err(e) => error!("Failed to serialize state: {e}"),
    }
}
