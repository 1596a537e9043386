//! In-memory caches owned by the distributor.
//!
//! State is sharded by currency. Each shard sits behind its own async mutex,
//! and holding that mutex is what serializes message processing for the
//! currency. No code path holds two shard locks at once. Portfolio entries
//! live outside the shards because the published snapshot spans currencies.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ahash::AHashMap;
use dbx_core::{OrderRecord, Position, TickerSnapshot, TradeRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;

/// Terminal order ids remembered per currency.
const MAX_TERMINAL_ORDERS: usize = 10_000;

/// Cached state of one currency.
#[derive(Debug, Default)]
pub struct CurrencyCache {
    pub orders: BTreeMap<String, OrderRecord>,
    pub positions: BTreeMap<String, Position>,
    pub tickers: BTreeMap<String, TickerSnapshot>,
    /// Orders that reached a terminal state, with the timestamp of that
    /// update. Oldest ids are forgotten first.
    terminal: AHashMap<String, u64>,
    terminal_fifo: VecDeque<String>,
}

impl CurrencyCache {
    /// Remember that `order_id` reached a terminal state at `timestamp`.
    pub fn record_terminal(&mut self, order_id: &str, timestamp: u64) {
        match self.terminal.get_mut(order_id) {
            Some(ts) => *ts = (*ts).max(timestamp),
            None => {
                self.terminal.insert(order_id.to_string(), timestamp);
                self.terminal_fifo.push_back(order_id.to_string());
            }
        }
        while self.terminal_fifo.len() > MAX_TERMINAL_ORDERS {
            if let Some(old) = self.terminal_fifo.pop_front() {
                self.terminal.remove(&old);
            }
        }
    }

    /// Whether `order` is older than what the cache already knows: a newer
    /// cached version, or a terminal update at or after its timestamp.
    pub fn is_stale(&self, order: &OrderRecord) -> bool {
        self.orders.get(&order.order_id).is_some_and(|known| known.timestamp > order.timestamp)
            || self.terminal.get(&order.order_id).is_some_and(|&ts| order.timestamp <= ts)
    }

    pub fn open_orders(&self) -> Vec<OrderRecord> {
        self.orders.values().cloned().collect()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }
}

/// Payload of `sub_account_cache_updating`, one message per currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubAccountUpdate {
    pub currency: String,
    pub positions: Vec<Position>,
    pub open_orders: Vec<OrderRecord>,
    /// Active trades from the ledger at the time of the resync.
    pub my_trades: Vec<TradeRecord>,
}

/// Payload of `order_cache_updating`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCacheUpdate {
    pub currency: String,
    pub open_orders: Vec<OrderRecord>,
}

/// Payload of `ticker_cache_updating`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerUpdate {
    pub instrument_name: String,
    pub currency: String,
    pub ticker: Value,
}

#[derive(Default)]
pub struct Caches {
    shards: Mutex<AHashMap<String, Arc<AsyncMutex<CurrencyCache>>>>,
    portfolio: Mutex<BTreeMap<String, Value>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// The shard of `currency`, created on first use.
    pub fn shard(&self, currency: &str) -> Arc<AsyncMutex<CurrencyCache>> {
        let mut shards = lock(&self.shards);
        Arc::clone(shards.entry(currency.to_uppercase()).or_default())
    }

    pub fn currencies(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.shards).keys().cloned().collect();
        names.sort();
        names
    }

    /// Replace the portfolio entry of `currency` and return every entry,
    /// ordered by currency.
    pub fn upsert_portfolio(&self, currency: &str, entry: Value) -> Vec<Value> {
        let mut portfolio = lock(&self.portfolio);
        portfolio.insert(currency.to_uppercase(), entry);
        portfolio.values().cloned().collect()
    }

    pub fn portfolio(&self, currency: &str) -> Option<Value> {
        lock(&self.portfolio).get(&currency.to_uppercase()).cloned()
    }
}
