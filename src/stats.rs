//! Stats & controller surface (§17).
//!
//! `Stats` is the write side every fiber increments into; `StatsSnapshot` is
//! the read-only copy handed to the controller surface and the daily report
//! fiber. Grounded in `monitor.rs`'s counters-plus-snapshot split.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct Stats {
    pub failed_mirrors: AtomicU64,
    pub cancel_failures: AtomicU64,
    pub margin_mode_failures: AtomicU64,
    pub immediate_fill_failures: AtomicU64,
    pub forced_cancel_cleanups: AtomicU64,
    pub mirrors_placed: AtomicU64,
    pub mirrors_filled: AtomicU64,
    pub mirrors_canceled: AtomicU64,
    pub permissive_close_mirrors: AtomicU64,
    last_error: Mutex<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub failed_mirrors: u64,
    pub cancel_failures: u64,
    pub margin_mode_failures: u64,
    pub immediate_fill_failures: u64,
    pub forced_cancel_cleanups: u64,
    pub mirrors_placed: u64,
    pub mirrors_filled: u64,
    pub mirrors_canceled: u64,
    pub permissive_close_mirrors: u64,
    pub last_error: Option<String>,
    pub source_price: Option<f64>,
    pub mirror_price: Option<f64>,
    pub current_ratio: f64,
    pub startup_source_count: usize,
    pub startup_mirror_count: usize,
}

impl Stats {
    pub fn record_error(&self, msg: impl Into<String>) {
        *self.last_error.lock().expect("stats mutex poisoned") = Some(msg.into());
    }

    pub fn snapshot(
        &self,
        source_price: Option<f64>,
        mirror_price: Option<f64>,
        current_ratio: f64,
        startup_source_count: usize,
        startup_mirror_count: usize,
    ) -> StatsSnapshot {
        StatsSnapshot {
            failed_mirrors: self.failed_mirrors.load(Ordering::Relaxed),
            cancel_failures: self.cancel_failures.load(Ordering::Relaxed),
            margin_mode_failures: self.margin_mode_failures.load(Ordering::Relaxed),
            immediate_fill_failures: self.immediate_fill_failures.load(Ordering::Relaxed),
            forced_cancel_cleanups: self.forced_cancel_cleanups.load(Ordering::Relaxed),
            mirrors_placed: self.mirrors_placed.load(Ordering::Relaxed),
            mirrors_filled: self.mirrors_filled.load(Ordering::Relaxed),
            mirrors_canceled: self.mirrors_canceled.load(Ordering::Relaxed),
            permissive_close_mirrors: self.permissive_close_mirrors.load(Ordering::Relaxed),
            last_error: self.last_error.lock().expect("stats mutex poisoned").clone(),
            source_price,
            mirror_price,
            current_ratio,
            startup_source_count,
            startup_mirror_count,
        }
    }
}
