//! Notifier & rate limiting (external interfaces §6; error handling §7).
//!
//! `Notifier` is the external collaborator seam (operator chat messaging is
//! out of scope per §1). `RateLimitedNotifier` wraps it and enforces the
//! 2-per-24h per-category cap, with a one-time bypass for invariant
//! violations. Categories mirror the Python source's `warning_counters`
//! keys plus two this spec introduces (`mirror_success`,
//! `forced_cancel_cleanup`).

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

const WINDOW_MS: u64 = 24 * 60 * 60 * 1000;
const MAX_PER_WINDOW: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    PriceDifference,
    SyncStatus,
    OrderFills,
    PlanOrders,
    Positions,
    PriceMonitoring,
    OrderSynchronization,
    HighFailureRate,
    ApiConnection,
    SystemError,
    PositionCleanup,
    MirrorModeChange,
    MarginModeWarning,
    MirrorSuccess,
    ForcedCancelCleanup,
    InvariantViolation,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, category: &str, text: &str);
}

/// Default/test notifier: logs instead of sending, using `log::*!` as the
/// baseline observability channel.
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(&self, category: &str, text: &str) {
        log::info!("[NOTIFY:{category}] {text}");
    }
}

pub struct RateLimitedNotifier {
    inner: std::sync::Arc<dyn Notifier>,
    sent_at: Mutex<HashMap<NotificationCategory, VecDeque<u64>>>,
    clock_ms: Box<dyn Fn() -> u64 + Send + Sync>,
}

impl RateLimitedNotifier {
    pub fn new(inner: std::sync::Arc<dyn Notifier>) -> Self {
        Self {
            inner,
            sent_at: Mutex::new(HashMap::new()),
            clock_ms: Box::new(|| chrono::Utc::now().timestamp_millis() as u64),
        }
    }

    #[cfg(test)]
    pub fn with_clock(inner: std::sync::Arc<dyn Notifier>, clock_ms: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self { inner, sent_at: Mutex::new(HashMap::new()), clock_ms: Box::new(clock_ms) }
    }

    /// Sends subject to the per-category cap. Invariant-violation
    /// notifications bypass the cap once per spec §7.
    pub async fn send(&self, category: NotificationCategory, text: &str) {
        if matches!(category, NotificationCategory::InvariantViolation) {
            self.inner.send(&format!("{category:?}"), text).await;
            return;
        }
        let now = (self.clock_ms)();
        let mut sent = self.sent_at.lock().await;
        let window = sent.entry(category).or_insert_with(VecDeque::new);
        while window.front().is_some_and(|t| now.saturating_sub(*t) > WINDOW_MS) {
            window.pop_front();
        }
        if window.len() >= MAX_PER_WINDOW {
            log::debug!("[NOTIFY:{category:?}] suppressed (rate limit): {text}");
            return;
        }
        window.push_back(now);
        drop(sent);
        self.inner.send(&format!("{category:?}"), text).await;
    }
}
