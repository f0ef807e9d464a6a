//! Fill-vs-Cancel Analyzer (§4.6).
//!
//! For each disappeared source order, decides whether it filled or was
//! canceled using price-context logic plus a recent-fills lookup.

use crate::types::{OrderSide, TriggerOrder};

pub const DEFAULT_CLOSE_THRESHOLD: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    LongOpen,
    ShortOpen,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerDecision {
    Filled,
    Canceled,
    Uncertain,
}

pub fn classify_direction(order: &TriggerOrder) -> OrderDirection {
    match order.side {
        OrderSide::OpenLong => OrderDirection::LongOpen,
        OrderSide::OpenShort => OrderDirection::ShortOpen,
        OrderSide::CloseLong | OrderSide::CloseShort => OrderDirection::Close,
    }
}

/// "Trigger reached" per side: buy-the-dip semantics for longs, breakout
/// semantics for shorts, and a banded threshold for closes (often stop-like).
pub fn reached(direction: OrderDirection, current: f64, trigger: f64, close_threshold: f64) -> bool {
    match direction {
        OrderDirection::LongOpen => current <= trigger,
        OrderDirection::ShortOpen => current >= trigger,
        OrderDirection::Close => (current - trigger).abs() <= close_threshold,
    }
}

/// Implements the §4.6 decision table exactly. Step 4's recent-fills
/// cross-check is unconditional ("force `is_filled := true`"): a hit there
/// settles the decision before the reached-based table runs at all, which
/// is what lets a source order that already filled at its trigger price
/// still register as filled a tick later even after the market has since
/// moved the live price back past the trigger. The escalation rule (a
/// combined price divergence greater than twice the close threshold forces
/// an immediate-fill decision) applies only once the lookup hasn't already
/// settled it.
pub fn decide(
    order: &TriggerOrder,
    source_price: f64,
    mirror_price: f64,
    recent_fills: &[String],
    close_threshold: f64,
) -> AnalyzerDecision {
    let direction = classify_direction(order);
    let src_reached = reached(direction, source_price, order.trigger_price, close_threshold);
    let mir_reached = reached(direction, mirror_price, order.trigger_price, close_threshold);

    if recent_fills.iter().any(|id| id == &order.order_id) {
        return AnalyzerDecision::Filled;
    }

    if (source_price - mirror_price).abs() > 2.0 * close_threshold && src_reached {
        return AnalyzerDecision::Filled;
    }

    match (src_reached, mir_reached) {
        (true, false) => AnalyzerDecision::Filled,
        (true, true) => AnalyzerDecision::Canceled,
        (false, false) => AnalyzerDecision::Canceled,
        (false, true) => AnalyzerDecision::Uncertain,
    }
}
