//! Subscription channel names, parsed once into a closed enum.
//!
//! Grammar (segments separated by `.`):
//!
//! | Channel                                   | Kind          |
//! |-------------------------------------------|---------------|
//! | `user.portfolio.<currency>`               | Portfolio     |
//! | `user.changes.<kind>.<currency>.<period>` | UserChanges   |
//! | `user.orders.<kind>.<currency>.<period>`  | Order         |
//! | `user.orders.<instrument>.<period>`       | Order         |
//! | `user.trades.<kind>.<currency>.<period>`  | Trade         |
//! | `user.trades.<instrument>.<period>`       | Trade         |
//! | `incremental_ticker.<instrument>`         | Ticker        |
//! | `chart.trades.<instrument>.<resolution>`  | Chart         |
//!
//! `any` in the kind or currency position means "all".

use crate::error::DbxError;

/// Coarse routing class of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Portfolio,
    UserChanges,
    Trade,
    Order,
    Ticker,
    Chart,
}

/// What a `user.*` channel is scoped to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    /// `<kind>.<currency>`; `None` stands for `any`.
    Kind { kind: Option<String>, currency: Option<String> },
    Instrument(String),
}

/// A parsed channel name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Portfolio { currency: String },
    UserChanges { scope: Scope, period: String },
    Orders { scope: Scope, period: String },
    Trades { scope: Scope, period: String },
    Ticker { instrument: String },
    Chart { instrument: String, resolution: String },
}

fn any_to_none(seg: &str) -> Option<String> {
    if seg.eq_ignore_ascii_case("any") { None } else { Some(seg.to_string()) }
}

fn parse_scope(rest: &[&str]) -> Option<(Scope, String)> {
    match rest {
        [kind, currency, period] => Some((
            Scope::Kind { kind: any_to_none(kind), currency: any_to_none(currency).map(|c| c.to_uppercase()) },
            period.to_string(),
        )),
        [instrument, period] => Some((Scope::Instrument(instrument.to_string()), period.to_string())),
        _ => None,
    }
}

impl Channel {
    pub fn parse(channel: &str) -> Result<Self, DbxError> {
        let segs: Vec<&str> = channel.split('.').collect();
        let bad = || DbxError::Parse(format!("unrecognised channel: {channel}"));
        match segs.as_slice() {
            ["user", "portfolio", currency] => Ok(Self::Portfolio { currency: currency.to_uppercase() }),
            ["user", "changes", rest @ ..] => {
                let (scope, period) = parse_scope(rest).ok_or_else(bad)?;
                Ok(Self::UserChanges { scope, period })
            }
            ["user", "orders", rest @ ..] => {
                let (scope, period) = parse_scope(rest).ok_or_else(bad)?;
                Ok(Self::Orders { scope, period })
            }
            ["user", "trades", rest @ ..] => {
                let (scope, period) = parse_scope(rest).ok_or_else(bad)?;
                Ok(Self::Trades { scope, period })
            }
            ["incremental_ticker", instrument] => Ok(Self::Ticker { instrument: instrument.to_string() }),
            ["chart", "trades", instrument, resolution] => {
                Ok(Self::Chart { instrument: instrument.to_string(), resolution: resolution.to_string() })
            }
            _ => Err(bad()),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Portfolio { .. } => MessageKind::Portfolio,
            Self::UserChanges { .. } => MessageKind::UserChanges,
            Self::Orders { .. } => MessageKind::Order,
            Self::Trades { .. } => MessageKind::Trade,
            Self::Ticker { .. } => MessageKind::Ticker,
            Self::Chart { .. } => MessageKind::Chart,
        }
    }

    /// Currency implied by the channel name alone, if any.
    ///
    /// Channels subscribed with `any` carry several currencies; for those the
    /// currency has to be taken from each payload item.
    pub fn currency(&self) -> Option<String> {
        match self {
            Self::Portfolio { currency } => Some(currency.clone()),
            Self::UserChanges { scope, .. } | Self::Orders { scope, .. } | Self::Trades { scope, .. } => match scope {
                Scope::Kind { currency, .. } => currency.clone(),
                Scope::Instrument(instrument) => Some(currency_of(instrument)),
            },
            Self::Ticker { instrument } | Self::Chart { instrument, .. } => Some(currency_of(instrument)),
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn scope_str(scope: &Scope) -> String {
            match scope {
                Scope::Kind { kind, currency } => format!(
                    "{}.{}",
                    kind.as_deref().unwrap_or("any"),
                    currency.as_deref().unwrap_or("any")
                ),
                Scope::Instrument(i) => i.clone(),
            }
        }
        match self {
            Self::Portfolio { currency } => write!(f, "user.portfolio.{}", currency.to_lowercase()),
            Self::UserChanges { scope, period } => write!(f, "user.changes.{}.{period}", scope_str(scope)),
            Self::Orders { scope, period } => write!(f, "user.orders.{}.{period}", scope_str(scope)),
            Self::Trades { scope, period } => write!(f, "user.trades.{}.{period}", scope_str(scope)),
            Self::Ticker { instrument } => write!(f, "incremental_ticker.{instrument}"),
            Self::Chart { instrument, resolution } => write!(f, "chart.trades.{instrument}.{resolution}"),
        }
    }
}

/// Settlement currency of an instrument: `BTC-PERPETUAL` → `BTC`,
/// `ETH_USDC-PERPETUAL` → `ETH`.
pub fn currency_of(instrument: &str) -> String {
    instrument
        .split(['-', '_'])
        .next()
        .unwrap_or(instrument)
        .to_uppercase()
}

/// Whether an instrument is a perpetual swap.
pub fn is_perpetual(instrument: &str) -> bool {
    instrument.ends_with("PERPETUAL")
}
