//! Enumerations used throughout the DBX trading stack.
//!
//! Wire spellings follow the exchange (`"buy"`, `"filled"`, `"future"`), so the
//! same enums serve the JSON boundary and the ledger's text columns.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DbxError;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// Buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }

    /// `+1` for buys, `-1` for sells.
    pub fn sign(self) -> i64 {
        match self {
            Self::Buy => 1,
            Self::Sell => -1,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = DbxError;

    /// Accepts plain `buy`/`sell` as well as transaction-log spellings such as
    /// `open buy` or `close sell`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        match s.rsplit(' ').next() {
            Some("buy") => Ok(Self::Buy),
            Some("sell") => Ok(Self::Sell),
            _ => Err(DbxError::Parse(format!("unknown side: {s}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// OrderState
// ---------------------------------------------------------------------------

/// Exchange-reported order state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderState {
    Open,
    Filled,
    Cancelled,
    Rejected,
    Untriggered,
    Triggered,
}

impl OrderState {
    /// Terminal orders are removed from the cache and the orders table.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Cancelled => "cancelled",
            Self::Rejected => "rejected",
            Self::Untriggered => "untriggered",
            Self::Triggered => "triggered",
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderState {
    type Err = DbxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "filled" => Ok(Self::Filled),
            "cancelled" => Ok(Self::Cancelled),
            "rejected" => Ok(Self::Rejected),
            "untriggered" => Ok(Self::Untriggered),
            "triggered" => Ok(Self::Triggered),
            other => Err(DbxError::Parse(format!("unknown order state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// InstrumentKind
// ---------------------------------------------------------------------------

/// Instrument category as used in channel names and REST filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Future,
    Option,
    Spot,
    FutureCombo,
    OptionCombo,
}

impl InstrumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Future => "future",
            Self::Option => "option",
            Self::Spot => "spot",
            Self::FutureCombo => "future_combo",
            Self::OptionCombo => "option_combo",
        }
    }
}

/// Order type used by the REST collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    Market,
    StopLimit,
    StopMarket,
}

impl OrderType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Limit => "limit",
            Self::Market => "market",
            Self::StopLimit => "stop_limit",
            Self::StopMarket => "stop_market",
        }
    }
}
