//! Snapshot & Diff Engine (§4.5).
//!
//! Each tick takes the current set of source trigger orders and diffs it
//! against the previous tick's set. `disappeared` orders feed the Analyzer;
//! `appeared` orders feed the Placement Pipeline.

use std::collections::{HashMap, HashSet};

use crate::types::{OrderId, TriggerOrder};

#[derive(Debug, Clone, Default)]
pub struct TriggerSnapshot {
    pub ids: HashSet<OrderId>,
    pub by_id: HashMap<OrderId, TriggerOrder>,
}

impl TriggerSnapshot {
    pub fn from_orders(orders: Vec<TriggerOrder>) -> Self {
        let mut ids = HashSet::with_capacity(orders.len());
        let mut by_id = HashMap::with_capacity(orders.len());
        for order in orders {
            ids.insert(order.order_id.clone());
            by_id.insert(order.order_id.clone(), order);
        }
        Self { ids, by_id }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Diff {
    pub disappeared: Vec<TriggerOrder>,
    pub appeared: Vec<TriggerOrder>,
}

/// Retains the full payload of `disappeared` orders (sourced from `prev`,
/// not `current`) for one tick so the Analyzer can inspect vanished orders.
pub fn diff(prev: &TriggerSnapshot, current: &TriggerSnapshot) -> Diff {
    let disappeared = prev
        .ids
        .difference(&current.ids)
        .filter_map(|id| prev.by_id.get(id).cloned())
        .collect();
    let appeared = current
        .ids
        .difference(&prev.ids)
        .filter_map(|id| current.by_id.get(id).cloned())
        .collect();
    Diff { disappeared, appeared }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OrderSide;

    fn order(id: &str) -> TriggerOrder {
        TriggerOrder {
            order_id: id.into(),
            contract: "BTC_USDT".into(),
            side: OrderSide::OpenLong,
            trigger_price: 100.0,
            size: 1.0,
            leverage: 10,
            tp_price: None,
            sl_price: None,
            created_at: 0,
        }
    }

    #[test]
    fn diff_reports_disappeared_and_appeared() {
        let prev = TriggerSnapshot::from_orders(vec![order("a"), order("b")]);
        let current = TriggerSnapshot::from_orders(vec![order("b"), order("c")]);
        let d = diff(&prev, &current);
        assert_eq!(d.disappeared.iter().map(|o| o.order_id.clone()).collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(d.appeared.iter().map(|o| o.order_id.clone()).collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn no_change_yields_empty_diff() {
        let prev = TriggerSnapshot::from_orders(vec![order("a")]);
        let current = TriggerSnapshot::from_orders(vec![order("a")]);
        let d = diff(&prev, &current);
        assert!(d.disappeared.is_empty());
        assert!(d.appeared.is_empty());
    }
}
