//! # dbx-ledger
//!
//! Durable trade/order store on SQLite.
//!
//! - **Trades**: `my_trades` (active) and `my_trades_closed` (archived pairs)
//! - **Orders**: `orders`, one row per order id
//! - **Maintenance**: duplicate scan/cleanup, label collisions, pair archival
//!
//! Every statement runs on the blocking pool against one of a small set of
//! connections. The database is opened in WAL mode so readers never wait on
//! the writer, and SQLite's busy timeout serializes writers; a statement that
//! still reports `SQLITE_BUSY` is retried a bounded number of times.
//!
//! When a notifier bus is attached, every change to the active trade table is
//! followed by a `sqlite_record_updating` signal and a full active-trades
//! snapshot on `my_trades_cache_updating`.

mod error;
mod orders;
mod query;
mod schema;
mod trades;

pub use error::{LedgerError, Result};
pub use query::{Field, Filter, OrderQuery, SortOrder, TradeQuery};
pub use schema::Table;
pub use trades::{DuplicateTrade, LabelCollision};

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dbx_core::bus::{Bus, publish_json};
use dbx_core::config::LedgerConfig;
use dbx_core::topics;
use rusqlite::Connection;
use serde_json::json;
use tracing::{debug, info, warn};

/// Connections opened for a file-backed ledger.
const FILE_POOL_SIZE: usize = 4;

/// Base pause between busy retries; grows linearly with the attempt.
const BUSY_RETRY_STEP: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// Connection pool
// ---------------------------------------------------------------------------

struct Pool {
    conns: Vec<Mutex<Connection>>,
    next: AtomicUsize,
}

impl Pool {
    /// Run `f` on an idle connection, or wait for one in round-robin order.
    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> T) -> T {
        for slot in &self.conns {
            if let Ok(mut conn) = slot.try_lock() {
                return f(&mut conn);
            }
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.conns.len();
        let mut conn = self.conns[idx].lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut conn)
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

/// Handle to the trade ledger. Cheap to clone.
#[derive(Clone)]
pub struct Ledger {
    pool: Arc<Pool>,
    busy_retries: u32,
    notifier: Option<Arc<dyn Bus>>,
}

impl Ledger {
    /// Open (creating if needed) the database at `config.path`.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let path = Path::new(&config.path);
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let mut conns = Vec::with_capacity(FILE_POOL_SIZE);
        for i in 0..FILE_POOL_SIZE {
            let conn = Connection::open(path)?;
            conn.busy_timeout(busy_timeout)?;
            let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            if i == 0 {
                schema::migrate(&conn)?;
                info!("[ledger] opened {} (journal_mode={mode})", config.path);
            }
            conns.push(Mutex::new(conn));
        }
        Ok(Self::from_conns(conns, config.busy_retries))
    }

    /// Private in-memory database on a single connection.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self::from_conns(vec![Mutex::new(conn)], LedgerConfig::default().busy_retries))
    }

    fn from_conns(conns: Vec<Mutex<Connection>>, busy_retries: u32) -> Self {
        Self {
            pool: Arc::new(Pool { conns, next: AtomicUsize::new(0) }),
            busy_retries,
            notifier: None,
        }
    }

    /// Publish change notifications on `bus` after trade mutations.
    pub fn with_notifier(mut self, bus: Arc<dyn Bus>) -> Self {
        self.notifier = Some(bus);
        self
    }

    /// Run `f` on the blocking pool, retrying while the database is busy.
    pub(crate) async fn run<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        F: Fn(&mut Connection) -> Result<T> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let f = Arc::new(f);
        let mut attempt = 0u32;
        loop {
            let pool = Arc::clone(&self.pool);
            let job = Arc::clone(&f);
            let outcome = tokio::task::spawn_blocking(move || pool.with_conn(|conn| job(conn)))
                .await
                .map_err(|e| LedgerError::Worker(e.to_string()))?;
            match outcome {
                Err(e) if e.is_busy() && attempt < self.busy_retries => {
                    attempt += 1;
                    let delay = BUSY_RETRY_STEP * attempt;
                    warn!("[ledger] {op}: database busy, retry {attempt}/{} in {delay:?}", self.busy_retries);
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    /// Signal a trade-table change and republish the active trades view.
    pub(crate) async fn notify_trades_changed(&self, table: Table, operation: &str) {
        let Some(bus) = &self.notifier else {
            return;
        };
        let signal = json!({ "table": table.name(), "operation": operation });
        if let Err(e) = publish_json(bus.as_ref(), topics::SQLITE_RECORD_UPDATING, &signal).await {
            warn!("[ledger] publish {}: {e}", topics::SQLITE_RECORD_UPDATING);
        }
        if table != Table::Trades {
            return;
        }
        match self.query_trades(Table::Trades, TradeQuery::default()).await {
            Ok(active) => {
                debug!("[ledger] republishing {} active trades", active.len());
                if let Err(e) = publish_json(bus.as_ref(), topics::MY_TRADES_CACHE_UPDATING, &active).await {
                    warn!("[ledger] publish {}: {e}", topics::MY_TRADES_CACHE_UPDATING);
                }
            }
            Err(e) => warn!("[ledger] active trades snapshot failed: {e}"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use dbx_core::{Label, Side, TradeRecord};
    use rust_decimal::Decimal;

    pub fn trade(id: &str, instrument: &str, side: Side, amount: Decimal, ts: u64, label: Option<&str>) -> TradeRecord {
        TradeRecord {
            trade_id: id.to_string(),
            order_id: format!("o-{id}"),
            instrument_name: instrument.to_string(),
            side,
            amount,
            price: 60_000.0,
            timestamp: ts,
            user_seq: None,
            label: label.map(|l| l.parse::<Label>().unwrap()),
            is_open: true,
        }
    }
}
