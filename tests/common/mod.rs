//! Shared fixtures for the scenario tests in `tests/scenarios.rs`.

use std::sync::Arc;

use async_trait::async_trait;
use mm_engine_rs::error::AdapterError;
use mm_engine_rs::exchange::{MirrorClient, MockExchange};
use mm_engine_rs::types::{AccountInfo, MarginMode, OrderId, OrderSide, Position, Ticker, TriggerOrder};

pub fn trigger_order(order_id: &str, side: OrderSide, trigger_price: f64, size: f64, leverage: u32) -> TriggerOrder {
    TriggerOrder {
        order_id: order_id.into(),
        contract: "BTC_USDT".into(),
        side,
        trigger_price,
        size,
        leverage,
        tp_price: None,
        sl_price: None,
        created_at: 0,
    }
}

/// Wraps a `MockExchange` but makes `cancel_trigger` fail forever with a
/// non-idempotent venue error, for driving the Cancel Synchronizer's
/// force-cleanup/wipe escalation (spec §4.8 steps 5-6) without depending on
/// the mock's normal (idempotent) cancel behavior.
pub struct AlwaysFailCancelMirror {
    pub inner: Arc<MockExchange>,
}

#[async_trait]
impl MirrorClient for AlwaysFailCancelMirror {
    async fn get_ticker(&self) -> Result<Ticker, AdapterError> {
        MirrorClient::get_ticker(self.inner.as_ref()).await
    }

    async fn get_positions(&self, contract: &str) -> Result<Vec<Position>, AdapterError> {
        MirrorClient::get_positions(self.inner.as_ref(), contract).await
    }

    async fn get_account(&self) -> Result<AccountInfo, AdapterError> {
        MirrorClient::get_account(self.inner.as_ref()).await
    }

    async fn get_all_trigger_orders(&self, contract: &str) -> Result<Vec<TriggerOrder>, AdapterError> {
        MirrorClient::get_all_trigger_orders(self.inner.as_ref(), contract).await
    }

    async fn get_margin_mode(&self, contract: &str) -> Result<MarginMode, AdapterError> {
        self.inner.get_margin_mode(contract).await
    }

    async fn force_cross_margin(&self, contract: &str) -> Result<bool, AdapterError> {
        self.inner.force_cross_margin(contract).await
    }

    async fn set_leverage(&self, contract: &str, lev: u32) -> Result<bool, AdapterError> {
        self.inner.set_leverage(contract, lev).await
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
        self.inner.place_trigger(contract, side, trigger_price, size, reduce_only, tp, sl).await
    }

    async fn cancel_trigger(&self, _order_id: &str) -> Result<(), AdapterError> {
        Err(AdapterError::VenueBusiness("cancel_rejected".into()))
    }

    async fn place_market(&self, contract: &str, size: f64, reduce_only: bool) -> Result<OrderId, AdapterError> {
        self.inner.place_market(contract, size, reduce_only).await
    }

    async fn close_position(&self, contract: &str) -> Result<(), AdapterError> {
        self.inner.close_position(contract).await
    }
}
