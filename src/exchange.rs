//! Exchange adapters (§4, component #2 "Exchange Adapters"; external
//! interfaces §6 `SourceClient`/`MirrorClient`).
//!
//! Typed request/response facade over the two venues. The core only ever
//! sees `TriggerOrder`/`Position`/`AccountInfo`/`Ticker`; adapters own the
//! raw JSON parsing via `TriggerOrder::from_venue_payload` and retry
//! transport errors before surfacing anything to the reconciliation fibers.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::AdapterError;
use crate::types::{AccountInfo, MarginMode, OrderId, OrderSide, Position, Ticker, TriggerOrder};

#[async_trait]
pub trait SourceClient: Send + Sync {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError>;
    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError>;
    async fn get_account(&self) -> Result<AccountInfo, AdapterError>;
    async fn get_recent_filled_orders(&self, contract: &str, minutes: u32) -> Result<Vec<OrderId>, AdapterError>;
    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError>;
}

#[async_trait]
pub trait MirrorClient: Send + Sync {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError>;
    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError>;
    async fn get_account(&self) -> Result<AccountInfo, AdapterError>;
    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError>;

    async fn get_margin_mode(&self, contract: &str) -> Result<MarginMode, AdapterError>;
    async fn force_cross_margin(&self, contract: &str) -> Result<bool, AdapterError>;
    async fn set_leverage(&self, contract: &str, lev: u32) -> Result<bool, AdapterError>;

    async fn place_trigger(
        &self,
        contract: &str,
        side: OrderSide,
        trigger_price: f64,
        size: f64,
        reduce_only: bool,
        tp: Option<f64>,
        sl: Option<f64>,
    ) -> Result<OrderId, AdapterError>;
    async fn cancel_trigger(&self, order_id: &str) -> Result<(), AdapterError>;
    async fn place_market(&self, contract: &str, size: f64, reduce_only: bool) -> Result<OrderId, AdapterError>;
    async fn close_position(&self, contract: &str) -> Result<(), AdapterError>;
}

/// Shared exponential back-off retry helper: N attempts, doubling delay,
/// surfaced as `AdapterError` on final failure (spec §7 Transport policy).
pub async fn with_retry<T, F, Fut>(attempts: u32, base_delay: Duration, mut op: F) -> Result<T, AdapterError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let mut delay = base_delay;
    let mut last_err = AdapterError::Transport("no attempts made".into());
    for attempt in 0..attempts {
        match op().await {
            Ok(v) => return Ok(v),
            Err(AdapterError::Transport(msg)) => {
                last_err = AdapterError::Transport(msg);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(AdapterError::RateLimited) => {
                last_err = AdapterError::RateLimited;
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
            Err(other) => return Err(other),
        }
    }
    Err(last_err)
}

// ─── HTTP-backed adapter scaffold ──────────────────────────────────────────

/// Generic HTTP client shared by both venue adapters. Credential signing is
/// out of scope (§1); `sign` is a seam the concrete per-venue type fills in
/// via `crate::signing::Signer`.
pub struct HttpVenueClient {
    pub base_url: String,
    pub client: reqwest::Client,
}

impl HttpVenueClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { base_url: base_url.into(), client: reqwest::Client::new() }
    }

    pub async fn post_json(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, AdapterError> {
        let resp = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(&body)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(AdapterError::RateLimited);
        }
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| AdapterError::Schema(e.to_string()))?;
        Ok(data)
    }
}

// ─── HTTP concrete adapters ─────────────────────────────────────────────────

/// Generic HTTP-backed `SourceClient`. The wire format of either concrete
/// venue is out of scope (§1); this adapter talks a generic JSON shape over
/// `reqwest` and leans on `TriggerOrder::from_venue_payload` to absorb
/// whatever aliases the real venue uses, per DESIGN NOTES §9.
pub struct HttpSourceClient {
    http: HttpVenueClient,
    signer: Arc<dyn crate::signing::Signer>,
}

impl HttpSourceClient {
    pub fn new(base_url: impl Into<String>, signer: Arc<dyn crate::signing::Signer>) -> Self {
        Self { http: HttpVenueClient::new(base_url), signer }
    }

    async fn signed_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, AdapterError> {
        let payload = serde_json::to_vec(&body).map_err(|e| AdapterError::Schema(e.to_string()))?;
        self.signer.sign(&payload).await.map_err(AdapterError::Transport)?;
        with_retry(3, Duration::from_millis(500), || self.http.post_json(path, body.clone())).await
    }
}

#[async_trait]
impl SourceClient for HttpSourceClient {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError> {
        let data = self.signed_post("/ticker", serde_json::json!({})).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError> {
        let data = self.signed_post("/positions", serde_json::json!({ "contract": contract })).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_account(&self) -> Result<AccountInfo, AdapterError> {
        let data = self.signed_post("/account", serde_json::json!({})).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_recent_filled_orders(&self, contract: &str, minutes: u32) -> Result<Vec<OrderId>, AdapterError> {
        let data = self
            .signed_post("/recent_fills", serde_json::json!({ "contract": contract, "minutes": minutes }))
            .await?;
        let ids = data
            .as_array()
            .ok_or_else(|| AdapterError::Schema("recent_fills: expected array".into()))?
            .iter()
            .filter_map(|v| first_order_id(v))
            .collect();
        Ok(ids)
    }

    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError> {
        let data = self.signed_post("/trigger_orders", serde_json::json!({ "contract": contract })).await?;
        let raw = data.as_array().ok_or_else(|| AdapterError::Schema("trigger_orders: expected array".into()))?;
        let mut seen = std::collections::HashSet::new();
        let mut orders = Vec::with_capacity(raw.len());
        for v in raw {
            if let Some(order) = TriggerOrder::from_venue_payload(v) {
                if seen.insert(order.order_id.clone()) {
                    orders.push(order);
                }
            }
        }
        Ok(orders)
    }
}

fn first_order_id(v: &serde_json::Value) -> Option<OrderId> {
    for key in ["orderId", "order_id", "id"] {
        if let Some(s) = v.get(key).and_then(serde_json::Value::as_str) {
            return Some(s.to_string());
        }
    }
    v.as_str().map(str::to_string)
}

/// Generic HTTP-backed `MirrorClient`, same stance as `HttpSourceClient` plus
/// the write-side margin-mode/order-management calls of §6.
pub struct HttpMirrorClient {
    http: HttpVenueClient,
    signer: Arc<dyn crate::signing::Signer>,
}

impl HttpMirrorClient {
    pub fn new(base_url: impl Into<String>, signer: Arc<dyn crate::signing::Signer>) -> Self {
        Self { http: HttpVenueClient::new(base_url), signer }
    }

    async fn signed_post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value, AdapterError> {
        let payload = serde_json::to_vec(&body).map_err(|e| AdapterError::Schema(e.to_string()))?;
        self.signer.sign(&payload).await.map_err(AdapterError::Transport)?;
        with_retry(3, Duration::from_millis(500), || self.http.post_json(path, body.clone())).await
    }

    fn is_idempotent_response(data: &serde_json::Value) -> bool {
        data.get("code")
            .and_then(serde_json::Value::as_str)
            .map(|c| {
                let c = c.to_lowercase();
                c.contains("not_found") || c.contains("already_canceled") || c.contains("order_does_not_exist")
            })
            .unwrap_or(false)
    }
}

#[async_trait]
impl MirrorClient for HttpMirrorClient {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError> {
        let data = self.signed_post("/ticker", serde_json::json!({})).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError> {
        let data = self.signed_post("/positions", serde_json::json!({ "contract": contract })).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_account(&self) -> Result<AccountInfo, AdapterError> {
        let data = self.signed_post("/account", serde_json::json!({})).await?;
        serde_json::from_value(data).map_err(|e| AdapterError::Schema(e.to_string()))
    }

    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError> {
        let data = self.signed_post("/trigger_orders", serde_json::json!({ "contract": contract })).await?;
        let raw = data.as_array().ok_or_else(|| AdapterError::Schema("trigger_orders: expected array".into()))?;
        Ok(raw.iter().filter_map(TriggerOrder::from_venue_payload).collect())
    }

    async fn get_margin_mode(&self, contract: &str) -> Result<MarginMode, AdapterError> {
        let data = self.signed_post("/margin_mode", serde_json::json!({ "contract": contract })).await?;
        let mode = data.get("mode").and_then(serde_json::Value::as_str).unwrap_or("unknown");
        Ok(match mode.to_lowercase().as_str() {
            "cross" | "crossed" => MarginMode::Cross,
            "isolated" => MarginMode::Isolated,
            _ => MarginMode::Unknown,
        })
    }

    async fn force_cross_margin(&self, contract: &str) -> Result<bool, AdapterError> {
        let data = self.signed_post("/force_cross_margin", serde_json::json!({ "contract": contract })).await?;
        Ok(data.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false))
    }

    async fn set_leverage(&self, contract: &str, lev: u32) -> Result<bool, AdapterError> {
        let data = self.signed_post("/set_leverage", serde_json::json!({ "contract": contract, "leverage": lev })).await?;
        Ok(data.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false))
    }

    async fn place_trigger(
        &self,
        contract: &str,
        side: OrderSide,
        trigger_price: f64,
        size: f64,
        reduce_only: bool,
        tp: Option<f64>,
        sl: Option<f64>,
    ) -> Result<OrderId, AdapterError> {
        let data = self
            .signed_post(
                "/place_trigger",
                serde_json::json!({
                    "contract": contract,
                    "side": format!("{side:?}"),
                    "trigger_price": trigger_price,
                    "size": size,
                    "reduce_only": reduce_only,
                    "tp_price": tp,
                    "sl_price": sl,
                }),
            )
            .await?;
        first_order_id(&data).ok_or_else(|| AdapterError::Schema("place_trigger: missing order id".into()))
    }

    async fn cancel_trigger(&self, order_id: &str) -> Result<(), AdapterError> {
        let data = self.signed_post("/cancel_trigger", serde_json::json!({ "order_id": order_id })).await?;
        if Self::is_idempotent_response(&data) {
            return Err(AdapterError::AlreadyDone);
        }
        Ok(())
    }

    async fn place_market(&self, contract: &str, size: f64, reduce_only: bool) -> Result<OrderId, AdapterError> {
        let data = self
            .signed_post("/place_market", serde_json::json!({ "contract": contract, "size": size, "reduce_only": reduce_only, "tif": "IOC" }))
            .await?;
        first_order_id(&data).ok_or_else(|| AdapterError::Schema("place_market: missing order id".into()))
    }

    async fn close_position(&self, contract: &str) -> Result<(), AdapterError> {
        self.signed_post("/close_position", serde_json::json!({ "contract": contract })).await?;
        Ok(())
    }
}

// ─── In-memory mock adapter (tests) ────────────────────────────────────────

/// In-memory exchange double used by scenario tests. Shared by both
/// `SourceClient`/`MirrorClient` roles — tests wire up two independent
/// instances for source and mirror.
pub struct MockExchange {
    pub inner: tokio::sync::Mutex<MockExchangeState>,
}

#[derive(Default)]
pub struct MockExchangeState {
    pub ticker_last: f64,
    pub positions: HashMap<String, Position>,
    pub account: AccountInfo,
    pub trigger_orders: HashMap<OrderId, TriggerOrder>,
    pub recent_fills: Vec<OrderId>,
    pub margin_mode: MarginMode,
    pub next_order_id: u64,
    pub placed_markets: Vec<(String, f64, bool)>,
}

impl MockExchange {
    pub fn new(last_price: f64, equity: f64) -> Self {
        Self {
            inner: tokio::sync::Mutex::new(MockExchangeState {
                ticker_last: last_price,
                account: AccountInfo { total_equity: equity, available: equity, leverage_default: 30 },
                margin_mode: MarginMode::Cross,
                ..Default::default()
            }),
        }
    }

    pub async fn set_price(&self, price: f64) {
        self.inner.lock().await.ticker_last = price;
    }

    pub async fn insert_trigger(&self, order: TriggerOrder) {
        self.inner.lock().await.trigger_orders.insert(order.order_id.clone(), order);
    }

    pub async fn remove_trigger(&self, order_id: &str) {
        self.inner.lock().await.trigger_orders.remove(order_id);
    }

    pub async fn mark_filled(&self, order_id: &str) {
        let mut st = self.inner.lock().await;
        st.trigger_orders.remove(order_id);
        st.recent_fills.push(order_id.to_string());
    }

    pub async fn set_margin_mode(&self, mode: MarginMode) {
        self.inner.lock().await.margin_mode = mode;
    }
}

#[async_trait]
impl SourceClient for MockExchange {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError> {
        let st = self.inner.lock().await;
        Ok(Ticker { last: st.ticker_last, ..Default::default() })
    }

    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError> {
        let st = self.inner.lock().await;
        Ok(st.positions.get(contract).cloned().into_iter().collect())
    }

    async fn get_account(&self) -> Result<AccountInfo, AdapterError> {
        Ok(self.inner.lock().await.account)
    }

    async fn get_recent_filled_orders(&self, _contract: &str, _minutes: u32) -> Result<Vec<OrderId>, AdapterError> {
        Ok(self.inner.lock().await.recent_fills.clone())
    }

    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError> {
        let st = self.inner.lock().await;
        Ok(st.trigger_orders.values().filter(|o| o.contract == contract).cloned().collect())
    }
}

#[async_trait]
impl MirrorClient for MockExchange {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError> {
        SourceClient::get_ticker(self).await
    }

    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError> {
        SourceClient::get_positions(self, contract).await
    }

    async fn get_account(&self) -> Result<AccountInfo, AdapterError> {
        SourceClient::get_account(self).await
    }

    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError> {
        SourceClient::get_all_trigger_orders(self, contract).await
    }

    async fn get_margin_mode(&self, _contract: &str) -> Result<MarginMode, AdapterError> {
        Ok(self.inner.lock().await.margin_mode)
    }

    async fn force_cross_margin(&self, _contract: &str) -> Result<bool, AdapterError> {
        let mut st = self.inner.lock().await;
        st.margin_mode = MarginMode::Cross;
        Ok(true)
    }

    async fn set_leverage(&self, _contract: &str, _lev: u32) -> Result<bool, AdapterError> {
        Ok(true)
    }

    async fn place_trigger(
        &self,
        contract: &str,
        side: OrderSide,
        trigger_price: f64,
        size: f64,
        _reduce_only: bool,
        tp: Option<f64>,
        sl: Option<f64>,
    ) -> Result<OrderId, AdapterError> {
        let mut st = self.inner.lock().await;
        st.next_order_id += 1;
        let order_id = format!("mirror-{}", st.next_order_id);
        st.trigger_orders.insert(
            order_id.clone(),
            TriggerOrder {
                order_id: order_id.clone(),
                contract: contract.to_string(),
                side,
                trigger_price,
                size,
                leverage: 30,
                tp_price: tp,
                sl_price: sl,
                created_at: 0,
            },
        );
        Ok(order_id)
    }

    async fn cancel_trigger(&self, order_id: &str) -> Result<(), AdapterError> {
        let mut st = self.inner.lock().await;
        if st.trigger_orders.remove(order_id).is_none() {
            return Err(AdapterError::AlreadyDone);
        }
        Ok(())
    }

    async fn place_market(&self, contract: &str, size: f64, reduce_only: bool) -> Result<OrderId, AdapterError> {
        let mut st = self.inner.lock().await;
        st.next_order_id += 1;
        st.placed_markets.push((contract.to_string(), size, reduce_only));
        Ok(format!("market-{}", st.next_order_id))
    }

    async fn close_position(&self, contract: &str) -> Result<(), AdapterError> {
        self.inner.lock().await.positions.remove(contract);
        Ok(())
    }
}
