//! Exchange REST capability.
//!
//! The core consumes these operations but does not care which exchange
//! serves them; [`crate::deribit::DeribitRest`] is the production
//! implementation and tests plug in fakes.

use async_trait::async_trait;
use dbx_core::error::DbxError;
use dbx_core::{InstrumentKind, Label, OrderRecord, OrderType, Side, SubAccountSnapshot, TradeRecord};
use rust_decimal::Decimal;
use serde::Serialize;

/// Parameters of a new order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderParams {
    pub instrument_name: String,
    pub side: Side,
    pub amount: Decimal,
    pub order_type: OrderType,
    pub price: Option<f64>,
    pub label: Option<Label>,
    pub reduce_only: bool,
    pub post_only: bool,
}

impl OrderParams {
    pub fn limit(instrument: &str, side: Side, amount: Decimal, price: f64) -> Self {
        Self {
            instrument_name: instrument.to_string(),
            side,
            amount,
            order_type: OrderType::Limit,
            price: Some(price),
            label: None,
            reduce_only: false,
            post_only: false,
        }
    }

    pub fn market(instrument: &str, side: Side, amount: Decimal) -> Self {
        Self { order_type: OrderType::Market, price: None, ..Self::limit(instrument, side, amount, 0.0) }
    }

    pub fn with_label(mut self, label: Label) -> Self {
        self.label = Some(label);
        self
    }
}

#[async_trait]
pub trait ExchangeRest: Send + Sync {
    /// Positions and open orders of every sub-account for `currency`.
    async fn get_subaccounts_details(&self, currency: &str) -> Result<SubAccountSnapshot, DbxError>;

    /// Trades of `currency` from `start_ts` (ms) up to now, following
    /// continuation pages. `count` is the page size; `query` filters entry
    /// types (e.g. `"trade"`).
    async fn get_transaction_log(
        &self,
        currency: &str,
        start_ts: u64,
        count: u32,
        query: Option<&str>,
    ) -> Result<Vec<TradeRecord>, DbxError>;

    async fn place_order(&self, params: &OrderParams) -> Result<OrderRecord, DbxError>;

    async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord, DbxError>;

    async fn get_open_orders(
        &self,
        kind: Option<InstrumentKind>,
        order_type: Option<OrderType>,
    ) -> Result<Vec<OrderRecord>, DbxError>;
}
