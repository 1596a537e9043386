//! Account-side records: trades, orders, positions, and the order-allowed gate.
//!
//! Amounts are unsigned [`Decimal`]s paired with a [`Side`]; the signed view is
//! derived on demand. Using decimals keeps reconciliation sums exact.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::channel::currency_of;
use super::enums::{OrderState, Side};
use super::label::Label;

// ---------------------------------------------------------------------------
// Trade
// ---------------------------------------------------------------------------

/// One executed fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Exchange-assigned, unique per fill.
    pub trade_id: String,
    pub order_id: String,
    pub instrument_name: String,
    pub side: Side,
    /// Unsigned lot size.
    pub amount: Decimal,
    pub price: f64,
    /// Exchange event time (ms since epoch).
    pub timestamp: u64,
    /// Per-account sequence number; absent until backfilled.
    pub user_seq: Option<u64>,
    pub label: Option<Label>,
    /// Not yet matched to a closing trade.
    pub is_open: bool,
}

impl TradeRecord {
    /// Positive for buys, negative for sells.
    pub fn signed_amount(&self) -> Decimal {
        match self.side {
            Side::Buy => self.amount,
            Side::Sell => -self.amount,
        }
    }

    pub fn currency(&self) -> String {
        currency_of(&self.instrument_name)
    }
}

/// Sum of signed amounts.
pub fn net_amount<'a>(trades: impl IntoIterator<Item = &'a TradeRecord>) -> Decimal {
    trades.into_iter().map(TradeRecord::signed_amount).sum()
}

// ---------------------------------------------------------------------------
// Order
// ---------------------------------------------------------------------------

/// One resting order known to the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_id: String,
    pub instrument_name: String,
    pub label: Option<Label>,
    pub side: Side,
    pub amount: Decimal,
    pub price: Option<f64>,
    pub order_state: OrderState,
    pub timestamp: u64,
}

impl OrderRecord {
    pub fn currency(&self) -> String {
        currency_of(&self.instrument_name)
    }
}

// ---------------------------------------------------------------------------
// Position
// ---------------------------------------------------------------------------

/// Exchange-reported position for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument_name: String,
    /// Signed size (positive = long).
    pub size: Decimal,
    pub currency: String,
}

/// Sub-account view returned by a REST resync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAccountSnapshot {
    pub currency: String,
    pub positions: Vec<Position>,
    pub open_orders: Vec<OrderRecord>,
}

// ---------------------------------------------------------------------------
// Order-allowed gate
// ---------------------------------------------------------------------------

/// Per-instrument trading gate published by the reconciler.
///
/// `size_is_reconciled == false` blocks opening new exposure on the instrument;
/// reducing exposure remains at the strategy's discretion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAllowed {
    pub instrument_name: String,
    #[serde(with = "bool_as_int")]
    pub size_is_reconciled: bool,
    pub currency: String,
}

/// Serializes `bool` as `0`/`1` for consumers that expect integers.
mod bool_as_int {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u8(u8::from(*v))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        Ok(u8::deserialize(d)? != 0)
    }
}

// ---------------------------------------------------------------------------
// Durable stream entry
// ---------------------------------------------------------------------------

/// An inbound exchange notification as written to the durable stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub channel: String,
    pub data: serde_json::Value,
    /// Local arrival time (ms since epoch).
    pub timestamp: u64,
}
