//! MirrorRecord and the bijective source↔mirror mapping store (§3, §5).
//!
//! One record per currently-live mirrored source order. The Supervisor
//! exclusively owns the store; all mutation happens under the component
//! lock or a per-order lock layered on top (§5).

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::types::TriggerOrder;

#[derive(Debug, Clone)]
pub struct MirrorRecord {
    pub source_order_id: String,
    pub mirror_order_id: String,
    pub source_snapshot: TriggerOrder,
    pub base_margin_ratio: f64,
    pub applied_ratio_multiplier: f64,
    pub final_margin_ratio: f64,
    pub requested_trigger_price: f64,
    pub adjusted_trigger_price: f64,
    pub has_tp_sl: bool,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub created_at: u64,
}

/// Maintains the two mutually-inverse maps `source_order_id -> mirror_order_id`
/// and `mirror_order_id -> source_order_id`, plus the records themselves
/// keyed by source ID (each `MirrorRecord::source_order_id` is unique, as is
/// `mirror_order_id`, per §3's invariant).
#[derive(Default)]
pub struct MirrorRecordStore {
    by_source: RwLock<HashMap<String, MirrorRecord>>,
    source_by_mirror: RwLock<HashMap<String, String>>,
}

impl MirrorRecordStore {
    pub async fn insert(&self, record: MirrorRecord) {
        let mirror_id = record.mirror_order_id.clone();
        let source_id = record.source_order_id.clone();
        self.by_source.write().await.insert(source_id.clone(), record);
        self.source_by_mirror.write().await.insert(mirror_id, source_id);
    }

    pub async fn get_by_source(&self, source_order_id: &str) -> Option<MirrorRecord> {
        self.by_source.read().await.get(source_order_id).cloned()
    }

    pub async fn get_by_mirror(&self, mirror_order_id: &str) -> Option<MirrorRecord> {
        let source_id = self.source_by_mirror.read().await.get(mirror_order_id).cloned()?;
        self.by_source.read().await.get(&source_id).cloned()
    }

    pub async fn remove_by_source(&self, source_order_id: &str) -> Option<MirrorRecord> {
        let record = self.by_source.write().await.remove(source_order_id)?;
        self.source_by_mirror.write().await.remove(&record.mirror_order_id);
        Some(record)
    }

    pub async fn contains_source(&self, source_order_id: &str) -> bool {
        self.by_source.read().await.contains_key(source_order_id)
    }

    pub async fn len(&self) -> usize {
        self.by_source.read().await.len()
    }

    pub async fn all_source_ids(&self) -> Vec<String> {
        self.by_source.read().await.keys().cloned().collect()
    }
}
