//! Exchange wire shapes to domain records.
//!
//! Everything exchange-specific about payload layout lives here: field names
//! (`direction`, `order_state`, `last_update_timestamp`), numbers that may
//! arrive as JSON floats, strings or in exponent notation, and the
//! transaction log's `"open buy"` style sides. The rest of the engine only
//! sees [`TradeRecord`], [`OrderRecord`] and [`Position`].

use std::str::FromStr;

use dbx_core::error::DbxError;
use dbx_core::{Label, OrderRecord, OrderState, Position, Side, SubAccountSnapshot, TradeRecord, currency_of};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

// ---------------------------------------------------------------------------
// Scalars
// ---------------------------------------------------------------------------

/// Exact decimal from a JSON number or numeric string.
pub fn decimal_of(v: &Value) -> Option<Decimal> {
    let text = match v {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text).or_else(|_| Decimal::from_scientific(&text)).ok().map(|d| d.normalize())
}

fn deserialize_decimal<'de, D: serde::Deserializer<'de>>(d: D) -> Result<Decimal, D::Error> {
    let v = Value::deserialize(d)?;
    decimal_of(&v).ok_or_else(|| serde::de::Error::custom(format!("not a decimal: {v}")))
}

/// Trade and order ids are strings on the wire but some endpoints send
/// numbers.
fn deserialize_id<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    match Value::deserialize(d)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("not an id: {other}"))),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(v: &Value, what: &str) -> Result<T, DbxError> {
    T::deserialize(v).map_err(|e| DbxError::Parse(format!("{what}: {e}")))
}

/// Accept a single object or an array of them.
fn items(v: &Value) -> Vec<&Value> {
    match v {
        Value::Array(a) => a.iter().collect(),
        other => vec![other],
    }
}

// ---------------------------------------------------------------------------
// Trades
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WireTrade {
    #[serde(deserialize_with = "deserialize_id")]
    trade_id: String,
    #[serde(deserialize_with = "deserialize_id")]
    order_id: String,
    instrument_name: String,
    direction: Side,
    #[serde(deserialize_with = "deserialize_decimal")]
    amount: Decimal,
    price: f64,
    timestamp: u64,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    user_seq: Option<u64>,
}

impl From<WireTrade> for TradeRecord {
    fn from(w: WireTrade) -> Self {
        let label = Label::resolve(w.label.as_deref(), w.direction, w.timestamp);
        TradeRecord {
            trade_id: w.trade_id,
            order_id: w.order_id,
            instrument_name: w.instrument_name,
            side: w.direction,
            amount: w.amount,
            price: w.price,
            timestamp: w.timestamp,
            user_seq: w.user_seq,
            label: Some(label),
            is_open: true,
        }
    }
}

/// Fills from a `user.trades.*` notification (array or single object).
pub fn trades(data: &Value) -> Result<Vec<TradeRecord>, DbxError> {
    items(data).into_iter().map(|v| parse::<WireTrade>(v, "trade").map(TradeRecord::from)).collect()
}

// ---------------------------------------------------------------------------
// Transaction log
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WireLogEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    trade_id: Option<Value>,
    #[serde(default)]
    order_id: Option<Value>,
    #[serde(default)]
    instrument_name: Option<String>,
    #[serde(default)]
    side: Option<String>,
    #[serde(default)]
    amount: Option<Value>,
    #[serde(default)]
    price: Option<f64>,
    timestamp: u64,
    #[serde(default)]
    user_seq: Option<u64>,
    #[serde(default)]
    label: Option<String>,
}

fn id_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl WireLogEntry {
    fn into_trade(self) -> Result<TradeRecord, DbxError> {
        let missing = |field: &str| DbxError::Parse(format!("transaction log trade without {field}"));
        let trade_id = self.trade_id.as_ref().and_then(id_text).ok_or_else(|| missing("trade_id"))?;
        let side: Side = self.side.as_deref().ok_or_else(|| missing("side"))?.parse()?;
        let amount = self.amount.as_ref().and_then(decimal_of).ok_or_else(|| missing("amount"))?;
        let label = Label::resolve(self.label.as_deref(), side, self.timestamp);
        Ok(TradeRecord {
            trade_id,
            order_id: self.order_id.as_ref().and_then(id_text).unwrap_or_default(),
            instrument_name: self.instrument_name.ok_or_else(|| missing("instrument_name"))?,
            side,
            amount: amount.abs(),
            price: self.price.unwrap_or_default(),
            timestamp: self.timestamp,
            user_seq: self.user_seq,
            label: Some(label),
            is_open: true,
        })
    }
}

/// One page of `private/get_transaction_log`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogPage {
    pub trades: Vec<TradeRecord>,
    pub continuation: Option<u64>,
}

/// Trade entries of a transaction-log page. Non-trade entries (deposits,
/// settlements, transfers) are skipped; a trade entry that does not decode
/// is logged and skipped.
pub fn transaction_log(result: &Value) -> Result<LogPage, DbxError> {
    let logs = result
        .get("logs")
        .and_then(Value::as_array)
        .ok_or_else(|| DbxError::Parse("transaction log without logs".into()))?;
    let mut trades = Vec::new();
    for raw in logs {
        let entry: WireLogEntry = match parse(raw, "transaction log entry") {
            Ok(e) => e,
            Err(e) => {
                warn!("[translate] {e}");
                continue;
            }
        };
        if entry.kind != "trade" {
            continue;
        }
        match entry.into_trade() {
            Ok(t) => trades.push(t),
            Err(e) => warn!("[translate] {e}: {raw}"),
        }
    }
    let continuation = result.get("continuation").and_then(Value::as_u64);
    Ok(LogPage { trades, continuation })
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WireOrder {
    #[serde(deserialize_with = "deserialize_id")]
    order_id: String,
    instrument_name: String,
    direction: Side,
    #[serde(deserialize_with = "deserialize_decimal")]
    amount: Decimal,
    /// A number, or `"market_price"` for market orders.
    #[serde(default)]
    price: Option<Value>,
    order_state: OrderState,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    last_update_timestamp: Option<u64>,
    #[serde(default)]
    creation_timestamp: Option<u64>,
}

impl From<WireOrder> for OrderRecord {
    fn from(w: WireOrder) -> Self {
        OrderRecord {
            order_id: w.order_id,
            instrument_name: w.instrument_name,
            label: w.label.as_deref().and_then(|l| l.parse().ok()),
            side: w.direction,
            amount: w.amount,
            price: w.price.as_ref().and_then(Value::as_f64),
            order_state: w.order_state,
            timestamp: w.last_update_timestamp.or(w.creation_timestamp).unwrap_or_default(),
        }
    }
}

pub fn order(v: &Value) -> Result<OrderRecord, DbxError> {
    parse::<WireOrder>(v, "order").map(OrderRecord::from)
}

/// Orders from a `user.orders.*` notification (array or single object).
pub fn orders(data: &Value) -> Result<Vec<OrderRecord>, DbxError> {
    items(data).into_iter().map(order).collect()
}

// ---------------------------------------------------------------------------
// Positions / sub-accounts
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WirePosition {
    instrument_name: String,
    #[serde(deserialize_with = "deserialize_decimal")]
    size: Decimal,
}

pub fn position(v: &Value) -> Result<Position, DbxError> {
    let w: WirePosition = parse(v, "position")?;
    Ok(Position { currency: currency_of(&w.instrument_name), instrument_name: w.instrument_name, size: w.size })
}

/// Positions and open orders of every sub-account in a
/// `private/get_subaccounts_details` result, restricted to `currency`.
pub fn subaccounts(currency: &str, result: &Value) -> Result<SubAccountSnapshot, DbxError> {
    let accounts = result
        .as_array()
        .ok_or_else(|| DbxError::Parse("subaccounts details is not an array".into()))?;
    let currency = currency.to_uppercase();
    let mut snapshot = SubAccountSnapshot { currency: currency.clone(), ..Default::default() };
    for account in accounts {
        for p in account.get("positions").and_then(Value::as_array).into_iter().flatten() {
            let p = position(p)?;
            if p.currency == currency {
                snapshot.positions.push(p);
            }
        }
        for o in account.get("open_orders").and_then(Value::as_array).into_iter().flatten() {
            let o = order(o)?;
            if o.currency() == currency {
                snapshot.open_orders.push(o);
            }
        }
    }
    Ok(snapshot)
}

// ---------------------------------------------------------------------------
// Routing helpers
// ---------------------------------------------------------------------------

/// Instrument a user-channel payload refers to: the `instrument_name` of the
/// object, or of the first element of an array.
pub fn instrument_of(data: &Value) -> Option<&str> {
    items(data).into_iter().find_map(|v| v.get("instrument_name").and_then(Value::as_str))
}
