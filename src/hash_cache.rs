//! Order Hash & Deduplication Cache (§4.4).
//!
//! A canonical hash fingerprints a trigger order by its economically
//! material fields so the engine can recognize "the same order" across
//! tick-level churn (price jitter, re-submission) without relying on venue
//! order IDs, which differ across source and mirror.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use tokio::sync::Mutex;

use crate::types::TriggerOrder;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderHash(pub String);

/// Time-expiring set. Entries carry the tick timestamp (ms) they were
/// inserted at; `sweep_expired` drops anything older than `ttl_ms`.
pub struct TtlSet<K: Eq + Hash + Clone> {
    ttl_ms: u64,
    entries: Mutex<HashMap<K, u64>>,
}

impl<K: Eq + Hash + Clone> TtlSet<K> {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn insert(&self, key: K, now_ms: u64) {
        self.entries.lock().await.insert(key, now_ms);
    }

    pub async fn contains(&self, key: &K) -> bool {
        self.entries.lock().await.contains_key(key)
    }

    pub async fn sweep_expired(&self, now_ms: u64) {
        self.entries.lock().await.retain(|_, at| now_ms.saturating_sub(*at) <= self.ttl_ms);
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

/// Time-expiring map, same eviction policy as `TtlSet` but holding a value.
/// Used for `CancelRetryCount` (value = consecutive-retry counter).
pub struct TtlMap<K: Eq + Hash + Clone, V: Clone> {
    ttl_ms: u64,
    entries: Mutex<HashMap<K, (V, u64)>>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlMap<K, V> {
    pub fn new(ttl_ms: u64) -> Self {
        Self { ttl_ms, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().await.get(key).map(|(v, _)| v.clone())
    }

    pub async fn set(&self, key: K, value: V, now_ms: u64) {
        self.entries.lock().await.insert(key, (value, now_ms));
    }

    pub async fn remove(&self, key: &K) {
        self.entries.lock().await.remove(key);
    }

    pub async fn sweep_expired(&self, now_ms: u64) {
        self.entries.lock().await.retain(|_, (_, at)| now_ms.saturating_sub(*at) <= self.ttl_ms);
    }

    pub async fn remove_if(&self, key: &K) -> bool {
        self.entries.lock().await.remove(key).is_some()
    }

    /// Snapshot of current entries, for fibers that need to iterate and
    /// re-evaluate each one (e.g. the fill-queue drain re-running the
    /// Analyzer against orders it couldn't decide on last tick).
    pub async fn entries(&self) -> Vec<(K, V)> {
        self.entries.lock().await.iter().map(|(k, (v, _))| (k.clone(), v.clone())).collect()
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Computes the canonical hash plus every jitter-absorbing variant for an
/// order: rounding variants (2/1/0 decimals), a TP/SL-aware variant, and
/// price-offset variants. Offsets are expressed as fractions of trigger
/// price rather than the literal `{20,50,100,200}` USD absolute amounts —
/// see DESIGN.md's Open Question decision; this keeps dedup meaningful for
/// symbols far from BTC's price scale.
pub struct HashVariantSet {
    offset_fractions: Vec<f64>,
}

impl HashVariantSet {
    pub fn new(offset_fractions: Vec<f64>) -> Self {
        Self { offset_fractions }
    }

    pub fn canonical_hash(&self, order: &TriggerOrder) -> OrderHash {
        OrderHash(format!("{}|{:.2}|{:.8}", order.contract, order.trigger_price, order.size.abs()))
    }

    pub fn variants(&self, order: &TriggerOrder) -> Vec<OrderHash> {
        let mut out = Vec::new();
        let size = order.size.abs();

        for decimals in [2, 1, 0] {
            let px = round_to(order.trigger_price, decimals);
            out.push(OrderHash(format!("{}|{:.*}|{:.8}", order.contract, decimals.max(0) as usize, px, size)));
        }

        if order.tp_price.is_some() || order.sl_price.is_some() {
            out.push(OrderHash(format!(
                "{}|{:.2}|{:.8}|tp={:?}|sl={:?}",
                order.contract, order.trigger_price, size, order.tp_price, order.sl_price
            )));
        }

        for frac in &self.offset_fractions {
            let offset = order.trigger_price * frac;
            for signed in [offset, -offset] {
                let px = order.trigger_price + signed;
                out.push(OrderHash(format!("{}|{:.2}|{:.8}", order.contract, px, size)));
            }
        }

        out
    }
}

/// Dedup cache keyed by the full variant set of each mirrored order.
/// Membership of *any* variant causes a skip (§4.4).
pub struct OrderHashes {
    variants: HashVariantSet,
    set: TtlSet<OrderHash>,
}

impl OrderHashes {
    pub fn new(offset_fractions: Vec<f64>, ttl_ms: u64) -> Self {
        Self { variants: HashVariantSet::new(offset_fractions), set: TtlSet::new(ttl_ms) }
    }

    pub async fn contains_any(&self, order: &TriggerOrder) -> bool {
        for v in self.variants.variants(order) {
            if self.set.contains(&v).await {
                return true;
            }
        }
        false
    }

    pub async fn insert_variants(&self, order: &TriggerOrder, now_ms: u64) {
        for v in self.variants.variants(order) {
            self.set.insert(v, now_ms).await;
        }
    }

    pub async fn sweep_expired(&self, now_ms: u64) {
        self.set.sweep_expired(now_ms).await;
    }
}

/// Startup-set membership: immutable snapshot of IDs/hashes seen at init,
/// consulted (never mutated) for the restart-safety exclusion in §4.2/§4.4.
#[derive(Debug, Clone, Default)]
pub struct StartupSet {
    pub ids: HashSet<String>,
}

impl StartupSet {
    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }
}
