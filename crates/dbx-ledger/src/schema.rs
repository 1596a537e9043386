//! Table layout and row codecs.
//!
//! ```text
//! my_trades / my_trades_closed
//!   trade_id TEXT  order_id TEXT  instrument_name TEXT  currency TEXT
//!   side TEXT  amount TEXT  price REAL  timestamp INTEGER
//!   user_seq INTEGER NULL  label TEXT NULL  is_open INTEGER
//!
//! orders
//!   order_id TEXT PK  instrument_name TEXT  currency TEXT  label TEXT NULL
//!   side TEXT  amount TEXT  price REAL NULL  order_state TEXT  timestamp INTEGER
//! ```
//!
//! `amount` is stored as decimal text so sums are exact after a round trip.
//! `trade_id` carries no UNIQUE constraint: idempotency is enforced by the
//! insert statement, and historical duplicates must stay representable so the
//! reconciler can find and remove them.

use std::str::FromStr;

use dbx_core::{Label, OrderRecord, OrderState, Side, TradeRecord};
use rusqlite::types::Type;
use rusqlite::{Connection, Row};
use rust_decimal::Decimal;

/// Tables owned by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Active fills, open or awaiting archival.
    Trades,
    /// Archived fills whose open/close pair has netted out.
    ClosedTrades,
    Orders,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Trades => "my_trades",
            Self::ClosedTrades => "my_trades_closed",
            Self::Orders => "orders",
        }
    }

    pub fn is_trade_table(self) -> bool {
        matches!(self, Self::Trades | Self::ClosedTrades)
    }
}

pub(crate) const TRADE_COLUMNS: &str =
    "trade_id, order_id, instrument_name, currency, side, amount, price, timestamp, user_seq, label, is_open";

pub(crate) const ORDER_COLUMNS: &str =
    "order_id, instrument_name, currency, label, side, amount, price, order_state, timestamp";

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS my_trades (
    trade_id        TEXT    NOT NULL,
    order_id        TEXT    NOT NULL,
    instrument_name TEXT    NOT NULL,
    currency        TEXT    NOT NULL,
    side            TEXT    NOT NULL,
    amount          TEXT    NOT NULL,
    price           REAL    NOT NULL,
    timestamp       INTEGER NOT NULL,
    user_seq        INTEGER,
    label           TEXT,
    is_open         INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_my_trades_trade_id ON my_trades(trade_id);
CREATE INDEX IF NOT EXISTS idx_my_trades_currency ON my_trades(currency, instrument_name);
CREATE INDEX IF NOT EXISTS idx_my_trades_label ON my_trades(label);

CREATE TABLE IF NOT EXISTS my_trades_closed (
    trade_id        TEXT    NOT NULL,
    order_id        TEXT    NOT NULL,
    instrument_name TEXT    NOT NULL,
    currency        TEXT    NOT NULL,
    side            TEXT    NOT NULL,
    amount          TEXT    NOT NULL,
    price           REAL    NOT NULL,
    timestamp       INTEGER NOT NULL,
    user_seq        INTEGER,
    label           TEXT,
    is_open         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_my_trades_closed_trade_id ON my_trades_closed(trade_id);
CREATE INDEX IF NOT EXISTS idx_my_trades_closed_currency ON my_trades_closed(currency);

CREATE TABLE IF NOT EXISTS orders (
    order_id        TEXT    PRIMARY KEY,
    instrument_name TEXT    NOT NULL,
    currency        TEXT    NOT NULL,
    label           TEXT,
    side            TEXT    NOT NULL,
    amount          TEXT    NOT NULL,
    price           REAL,
    order_state     TEXT    NOT NULL,
    timestamp       INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_currency ON orders(currency);
"#;

/// Create tables and indexes if missing.
pub(crate) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(DDL)
}

// ---- row codecs ----

fn conversion_error(idx: usize, reason: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, reason.into())
}

fn parse_col<T: FromStr>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, format!("{raw:?}: {e}")))
}

/// Labels written by other tools may not parse; those read back as absent.
fn label_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Label>> {
    let raw: Option<String> = row.get(idx)?;
    Ok(raw.and_then(|s| s.parse().ok()))
}

/// Decode a row selected with [`TRADE_COLUMNS`].
pub(crate) fn trade_from_row(row: &Row<'_>) -> rusqlite::Result<TradeRecord> {
    let timestamp: i64 = row.get(7)?;
    let user_seq: Option<i64> = row.get(8)?;
    let is_open: i64 = row.get(10)?;
    Ok(TradeRecord {
        trade_id: row.get(0)?,
        order_id: row.get(1)?,
        instrument_name: row.get(2)?,
        side: parse_col::<Side>(row, 4)?,
        amount: parse_col::<Decimal>(row, 5)?,
        price: row.get(6)?,
        timestamp: timestamp.max(0) as u64,
        user_seq: user_seq.map(|s| s.max(0) as u64),
        label: label_col(row, 9)?,
        is_open: is_open != 0,
    })
}

/// Decode a row selected with [`ORDER_COLUMNS`].
pub(crate) fn order_from_row(row: &Row<'_>) -> rusqlite::Result<OrderRecord> {
    let timestamp: i64 = row.get(8)?;
    Ok(OrderRecord {
        order_id: row.get(0)?,
        instrument_name: row.get(1)?,
        label: label_col(row, 3)?,
        side: parse_col::<Side>(row, 4)?,
        amount: parse_col::<Decimal>(row, 5)?,
        price: row.get(6)?,
        order_state: parse_col::<OrderState>(row, 7)?,
        timestamp: timestamp.max(0) as u64,
    })
}
