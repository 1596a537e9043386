//! Strategy labels attached to orders and trades.
//!
//! On the wire a label is `"<strategy>-<open|closed>-<correlation_id>"`, e.g.
//! `"futureSpread-open-1718030492123"`. Inside the stack it is always the
//! structured [`Label`]; the string form exists only at the exchange and
//! ledger boundaries. An opening and its closing trade share the strategy and
//! correlation id and differ only in [`LabelStatus`].

use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DbxError;
use crate::types::enums::Side;

/// Lifecycle phase encoded in a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LabelStatus {
    Open,
    Closed,
}

impl LabelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

/// Structured strategy label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub strategy: String,
    pub status: LabelStatus,
    pub correlation_id: u64,
}

/// Strategy name given to trades that arrive without a usable label.
pub const SYNTHETIC_PREFIX: &str = "manual";

impl Label {
    pub fn new(strategy: impl Into<String>, status: LabelStatus, correlation_id: u64) -> Self {
        Self { strategy: strategy.into(), status, correlation_id }
    }

    /// Label for an unlabeled fill: `manual<Side>-open-<timestamp>`.
    pub fn synthetic(side: Side, timestamp_ms: u64) -> Self {
        let strategy = match side {
            Side::Buy => format!("{SYNTHETIC_PREFIX}Buy"),
            Side::Sell => format!("{SYNTHETIC_PREFIX}Sell"),
        };
        Self { strategy, status: LabelStatus::Open, correlation_id: timestamp_ms }
    }

    /// Resolve the label of an ingested fill: its own label when it parses,
    /// else a synthetic one.
    pub fn resolve(raw: Option<&str>, side: Side, timestamp_ms: u64) -> Self {
        raw.and_then(|s| s.parse().ok()).unwrap_or_else(|| Self::synthetic(side, timestamp_ms))
    }

    /// The label of the other half of this pair.
    pub fn counterpart(&self) -> Self {
        let status = match self.status {
            LabelStatus::Open => LabelStatus::Closed,
            LabelStatus::Closed => LabelStatus::Open,
        };
        Self { strategy: self.strategy.clone(), status, correlation_id: self.correlation_id }
    }

    pub fn with_correlation_id(&self, correlation_id: u64) -> Self {
        Self { strategy: self.strategy.clone(), status: self.status, correlation_id }
    }

    pub fn is_synthetic(&self) -> bool {
        self.strategy.starts_with(SYNTHETIC_PREFIX)
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.strategy, self.status.as_str(), self.correlation_id)
    }
}

impl FromStr for Label {
    type Err = DbxError;

    /// Parses from the right so strategy names may themselves contain `-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.rsplitn(3, '-');
        let id = parts.next();
        let status = parts.next();
        let strategy = parts.next();
        let (Some(id), Some(status), Some(strategy)) = (id, status, strategy) else {
            return Err(DbxError::Parse(format!("malformed label: {s}")));
        };
        if strategy.is_empty() {
            return Err(DbxError::Parse(format!("label without strategy: {s}")));
        }
        let status = match status {
            "open" => LabelStatus::Open,
            "closed" => LabelStatus::Closed,
            other => return Err(DbxError::Parse(format!("label status {other:?} in {s}"))),
        };
        let correlation_id = id
            .parse::<u64>()
            .map_err(|_| DbxError::Parse(format!("label correlation id {id:?} in {s}")))?;
        Ok(Self { strategy: strategy.to_string(), status, correlation_id })
    }
}

impl Serialize for Label {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Label {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_display() {
        let l: Label = "futureSpread-open-1718030492123".parse().unwrap();
        assert_eq!(l.strategy, "futureSpread");
        assert_eq!(l.status, LabelStatus::Open);
        assert_eq!(l.correlation_id, 1718030492123);
        assert_eq!(l.to_string(), "futureSpread-open-1718030492123");
    }

    #[test]
    fn strategy_may_contain_hyphens() {
        let l: Label = "hedging-spot-closed-42".parse().unwrap();
        assert_eq!(l.strategy, "hedging-spot");
        assert_eq!(l.status, LabelStatus::Closed);
    }

    #[test]
    fn rejects_malformed() {
        assert!("".parse::<Label>().is_err());
        assert!("scalping-open".parse::<Label>().is_err());
        assert!("scalping-pending-1".parse::<Label>().is_err());
        assert!("scalping-open-abc".parse::<Label>().is_err());
        assert!("-open-1".parse::<Label>().is_err());
    }

    #[test]
    fn resolve_falls_back_to_synthetic() {
        let l = Label::resolve(Some("web order"), Side::Sell, 99);
        assert_eq!(l.to_string(), "manualSell-open-99");
        assert!(l.is_synthetic());
        let l = Label::resolve(None, Side::Buy, 7);
        assert_eq!(l.to_string(), "manualBuy-open-7");
        let l = Label::resolve(Some("combo-closed-5"), Side::Buy, 7);
        assert_eq!(l, Label::new("combo", LabelStatus::Closed, 5));
    }

    #[test]
    fn counterpart_flips_status() {
        let open = Label::new("scalping", LabelStatus::Open, 10);
        assert_eq!(open.counterpart(), Label::new("scalping", LabelStatus::Closed, 10));
        assert_eq!(open.counterpart().counterpart(), open);
    }
}
