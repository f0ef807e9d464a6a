//! Venue-agnostic data model shared by the source and mirror adapters.
//!
//! The two concrete venues are external collaborators (see crate docs); this
//! module defines the typed records the core reconciliation logic actually
//! operates on, with an explicit `from_venue_payload` parser per DESIGN
//! NOTES so the core never touches an open-ended JSON blob directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Opaque venue-issued order identifier. Unique within its own venue.
pub type OrderId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
}

impl OrderSide {
    /// Close-side orders are reduce-only by definition.
    pub fn is_reduce_only(&self) -> bool {
        matches!(self, OrderSide::CloseLong | OrderSide::CloseShort)
    }

    pub fn is_long(&self) -> bool {
        matches!(self, OrderSide::OpenLong | OrderSide::CloseLong)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginMode {
    Cross,
    Isolated,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerOrder {
    pub order_id: OrderId,
    pub contract: String,
    pub side: OrderSide,
    pub trigger_price: f64,
    pub size: f64,
    pub leverage: u32,
    pub tp_price: Option<f64>,
    pub sl_price: Option<f64>,
    pub created_at: u64,
}

impl TriggerOrder {
    /// Enumerates every accepted field alias a venue payload might use.
    /// Unrecognized shapes return `None` (SchemaMismatch, per spec §7) rather
    /// than panicking or fabricating defaults for the required fields.
    pub fn from_venue_payload(v: &Value) -> Option<Self> {
        let order_id = first_str(v, &["orderId", "order_id", "id", "planOrderId"])?.to_string();
        let contract = first_str(v, &["contract", "symbol", "instId"])?.to_string();

        let side_raw = first_str(v, &["side", "tradeSide", "posSide"])?;
        let reduce_only = first_bool(v, &["reduceOnly", "reduce_only"]).unwrap_or(false);
        let side = parse_side(side_raw, reduce_only)?;

        let trigger_price = first_f64(v, &["triggerPrice", "trigger_price", "price", "executePrice"])?;
        if trigger_price <= 0.0 {
            return None;
        }
        let size = first_f64(v, &["size", "sz"])?.abs();
        if size <= 0.0 {
            return None;
        }
        let leverage = first_f64(v, &["leverage", "lever"])
            .map(|l| l.round() as i64)
            .filter(|l| *l >= 1)
            .unwrap_or(30)
            .clamp(1, 125) as u32;

        let tp_price = first_f64(v, &["tpTriggerPrice", "tp_price", "presetTakeProfitPrice"])
            .filter(|p| *p > 0.0);
        let sl_price = first_f64(v, &["slTriggerPrice", "sl_price", "presetStopLossPrice"])
            .filter(|p| *p > 0.0);

        let created_at = first_f64(v, &["cTime", "created_at", "createTime"])
            .map(|t| t as u64)
            .unwrap_or(0);

        Some(TriggerOrder {
            order_id,
            contract,
            side,
            trigger_price,
            size,
            leverage,
            tp_price,
            sl_price,
            created_at,
        })
    }

    /// True if TP/SL are internally consistent with a long/short trigger
    /// (sl < trigger < tp for long, symmetric for short). Orders that set
    /// only one leg, or neither, are trivially consistent.
    pub fn tp_sl_consistent(&self) -> bool {
        match (self.tp_price, self.sl_price) {
            (Some(tp), Some(sl)) => {
                if self.side.is_long() {
                    sl < self.trigger_price && self.trigger_price < tp
                } else {
                    tp < self.trigger_price && self.trigger_price < sl
                }
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub contract: String,
    pub direction: Direction,
    pub size: f64,
    pub entry_price: f64,
    pub leverage: u32,
    pub liquidation_price: f64,
}

impl Position {
    pub fn is_flat(&self) -> bool {
        self.size <= 0.0
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_equity: f64,
    pub available: f64,
    pub leverage_default: u32,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Ticker {
    pub last: f64,
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub change_pct: f64,
}

fn first_str<'a>(v: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|k| v.get(k).and_then(Value::as_str))
}

fn first_bool(v: &Value, keys: &[&str]) -> Option<bool> {
    keys.iter().find_map(|k| v.get(k).and_then(Value::as_bool))
}

fn first_f64(v: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|k| {
        v.get(k).and_then(|x| {
            x.as_f64().or_else(|| x.as_str().and_then(|s| s.parse::<f64>().ok()))
        })
    })
}

fn parse_side(raw: &str, reduce_only: bool) -> Option<OrderSide> {
    let lower = raw.to_lowercase();
    let side = if lower.contains("close") || reduce_only {
        if lower.contains("short") || lower.contains("sell") {
            OrderSide::CloseShort
        } else {
            OrderSide::CloseLong
        }
    } else if lower.contains("short") || lower.contains("sell") {
        OrderSide::OpenShort
    } else if lower.contains("long") || lower.contains("buy") {
        OrderSide::OpenLong
    } else {
        return None;
    };
    Some(side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_known_aliases() {
        let payload = json!({
            "orderId": "123",
            "contract": "BTC_USDT",
            "side": "open_long",
            "triggerPrice": "100000.5",
            "size": "0.1",
            "leverage": 10,
        });
        let order = TriggerOrder::from_venue_payload(&payload).expect("parses");
        assert_eq!(order.order_id, "123");
        assert_eq!(order.side, OrderSide::OpenLong);
        assert!((order.trigger_price - 100000.5).abs() < 1e-9);
        assert!(!order.side.is_reduce_only());
    }

    #[test]
    fn rejects_unparseable_shape() {
        let payload = json!({"foo": "bar"});
        assert!(TriggerOrder::from_venue_payload(&payload).is_none());
    }

    #[test]
    fn close_side_is_reduce_only() {
        let payload = json!({
            "orderId": "1", "contract": "BTC_USDT", "side": "close_long",
            "triggerPrice": "1.0", "size": "1.0",
        });
        let order = TriggerOrder::from_venue_payload(&payload).unwrap();
        assert!(order.side.is_reduce_only());
    }

    #[test]
    fn tp_sl_consistency_for_long() {
        let mut order = TriggerOrder {
            order_id: "1".into(), contract: "X".into(), side: OrderSide::OpenLong,
            trigger_price: 100.0, size: 1.0, leverage: 10,
            tp_price: Some(110.0), sl_price: Some(90.0), created_at: 0,
        };
        assert!(order.tp_sl_consistent());
        order.sl_price = Some(105.0);
        assert!(!order.tp_sl_consistent());
    }
}
