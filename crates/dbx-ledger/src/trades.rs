//! Trade table operations.

use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};
use dbx_core::{Label, LabelStatus, TradeRecord, net_amount};
use rusqlite::{OptionalExtension, params, params_from_iter};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{LedgerError, Result};
use crate::query::{Field, Filter, TradeQuery};
use crate::schema::{TRADE_COLUMNS, Table, trade_from_row};
use crate::Ledger;

/// A trade id stored more than once across the active and closed tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateTrade {
    pub trade_id: String,
    pub copies: usize,
}

/// A label carried by fills of more than one order in the active table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelCollision {
    pub label: Label,
    /// Orders sharing the label, earliest first fill first.
    pub order_ids: Vec<String>,
}

fn require_trade_table(table: Table) -> Result<()> {
    if table.is_trade_table() {
        Ok(())
    } else {
        Err(LedgerError::Invalid(format!("{} is not a trade table", table.name())))
    }
}

impl Ledger {
    /// Insert `trade` unless its trade id is already stored.
    ///
    /// An active insert also checks the closed table, so a redelivered fill
    /// whose pair was already archived is not resurrected. Returns whether a
    /// row was written.
    pub async fn insert_trade(&self, table: Table, trade: &TradeRecord) -> Result<bool> {
        require_trade_table(table)?;
        let guard = match table {
            Table::Trades => {
                "NOT EXISTS (SELECT 1 FROM my_trades WHERE trade_id = ?1) \
                 AND NOT EXISTS (SELECT 1 FROM my_trades_closed WHERE trade_id = ?1)"
            }
            _ => "NOT EXISTS (SELECT 1 FROM my_trades_closed WHERE trade_id = ?1)",
        };
        let sql = format!(
            "INSERT INTO {} ({TRADE_COLUMNS}) SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11 WHERE {guard}",
            table.name()
        );
        let t = trade.clone();
        let inserted = self
            .run("insert_trade", move |conn| {
                let n = conn.execute(
                    &sql,
                    params![
                        t.trade_id,
                        t.order_id,
                        t.instrument_name,
                        t.currency(),
                        t.side.as_str(),
                        t.amount.to_string(),
                        t.price,
                        t.timestamp as i64,
                        t.user_seq.map(|s| s as i64),
                        t.label.as_ref().map(Label::to_string),
                        i64::from(t.is_open),
                    ],
                )?;
                Ok(n > 0)
            })
            .await?;
        if inserted {
            debug!("[ledger] inserted trade {} into {}", trade.trade_id, table.name());
            self.notify_trades_changed(table, "insert").await;
        } else {
            debug!("[ledger] trade {} already stored, skipped", trade.trade_id);
        }
        Ok(inserted)
    }

    /// Set one column on every row matching `filter`. Returns rows changed.
    pub async fn update_field(&self, table: Table, field: Field, filter: Filter) -> Result<usize> {
        if !field.applies_to(table) || !filter.applies_to(table) {
            return Err(LedgerError::Invalid(format!(
                "cannot set {} by {} on {}",
                field.column(),
                filter.column(),
                table.name()
            )));
        }
        let sql = format!("UPDATE {} SET {} = ?1 WHERE {} = ?2", table.name(), field.column(), filter.column());
        let (value, key) = (field.value(), filter.value());
        let changed = self
            .run("update_field", move |conn| Ok(conn.execute(&sql, params![value, key])?))
            .await?;
        if changed > 0 && table.is_trade_table() {
            self.notify_trades_changed(table, "update").await;
        }
        Ok(changed)
    }

    /// Delete every row matching `filter`. Returns rows removed.
    pub async fn delete_row(&self, table: Table, filter: Filter) -> Result<usize> {
        if !filter.applies_to(table) {
            return Err(LedgerError::Invalid(format!("cannot delete by {} on {}", filter.column(), table.name())));
        }
        let sql = format!("DELETE FROM {} WHERE {} = ?1", table.name(), filter.column());
        let key = filter.value();
        let removed = self.run("delete_row", move |conn| Ok(conn.execute(&sql, params![key])?)).await?;
        if removed > 0 && table.is_trade_table() {
            self.notify_trades_changed(table, "delete").await;
        }
        Ok(removed)
    }

    pub async fn query_trades(&self, table: Table, query: TradeQuery) -> Result<Vec<TradeRecord>> {
        require_trade_table(table)?;
        let (tail, values) = query.to_sql();
        let sql = format!("SELECT {TRADE_COLUMNS} FROM {}{tail}", table.name());
        self.run("query_trades", move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), trade_from_row)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Active trades of one currency.
    pub async fn active_trades(&self, currency: &str) -> Result<Vec<TradeRecord>> {
        self.query_trades(Table::Trades, TradeQuery::default().currency(currency)).await
    }

    /// Every trade id stored for `currency`, active and closed.
    pub async fn trade_ids(&self, currency: &str) -> Result<AHashSet<String>> {
        let currency = currency.to_uppercase();
        self.run("trade_ids", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trade_id FROM my_trades WHERE currency = ?1 \
                 UNION SELECT trade_id FROM my_trades_closed WHERE currency = ?1",
            )?;
            let ids = stmt.query_map(params![currency], |row| row.get::<_, String>(0))?;
            Ok(ids.collect::<rusqlite::Result<AHashSet<_>>>()?)
        })
        .await
    }

    /// Earliest timestamp among active trades of `currency`.
    pub async fn oldest_active_timestamp(&self, currency: &str) -> Result<Option<u64>> {
        let currency = currency.to_uppercase();
        self.run("oldest_active_timestamp", move |conn| {
            let ts: Option<i64> = conn
                .query_row("SELECT MIN(timestamp) FROM my_trades WHERE currency = ?1", params![currency], |row| {
                    row.get::<_, Option<i64>>(0)
                })
                .optional()?
                .flatten();
            Ok(ts.map(|t| t.max(0) as u64))
        })
        .await
    }

    /// Net signed amount per instrument over the active trades of `currency`.
    pub async fn net_by_instrument(&self, currency: &str) -> Result<BTreeMap<String, Decimal>> {
        let trades = self.active_trades(currency).await?;
        let mut by_instrument: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
        for t in trades {
            by_instrument.entry(t.instrument_name.clone()).or_default().push(t);
        }
        Ok(by_instrument.into_iter().map(|(k, v)| (k, net_amount(&v))).collect())
    }

    // ---- maintenance ----

    /// Trade ids present more than once across both tables.
    pub async fn duplicate_trade_ids(&self, currency: Option<&str>) -> Result<Vec<DuplicateTrade>> {
        let currency = currency.map(str::to_uppercase);
        self.run("duplicate_trade_ids", move |conn| {
            let mut stmt = conn.prepare(
                "SELECT trade_id, COUNT(*) FROM ( \
                     SELECT trade_id, currency FROM my_trades \
                     UNION ALL SELECT trade_id, currency FROM my_trades_closed) \
                 WHERE ?1 IS NULL OR currency = ?1 \
                 GROUP BY trade_id HAVING COUNT(*) > 1 ORDER BY trade_id",
            )?;
            let rows = stmt.query_map(params![currency], |row| {
                let copies: i64 = row.get(1)?;
                Ok(DuplicateTrade { trade_id: row.get(0)?, copies: copies as usize })
            })?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    /// Reduce `trade_id` to a single stored row. Returns rows removed.
    ///
    /// The survivor is the closed-table copy when one exists (the pair was
    /// already settled), else the earliest-inserted active copy.
    pub async fn remove_duplicates(&self, trade_id: &str) -> Result<usize> {
        let id = trade_id.to_string();
        let removed = self
            .run("remove_duplicates", move |conn| {
                let tx = conn.transaction()?;
                let keep_closed: Option<i64> = tx
                    .query_row("SELECT MIN(rowid) FROM my_trades_closed WHERE trade_id = ?1", params![id], |row| {
                        row.get::<_, Option<i64>>(0)
                    })
                    .optional()?
                    .flatten();
                let removed = match keep_closed {
                    Some(rowid) => {
                        let active = tx.execute("DELETE FROM my_trades WHERE trade_id = ?1", params![id])?;
                        let closed = tx.execute(
                            "DELETE FROM my_trades_closed WHERE trade_id = ?1 AND rowid <> ?2",
                            params![id, rowid],
                        )?;
                        active + closed
                    }
                    None => tx.execute(
                        "DELETE FROM my_trades WHERE trade_id = ?1 \
                         AND rowid <> (SELECT MIN(rowid) FROM my_trades WHERE trade_id = ?1)",
                        params![id],
                    )?,
                };
                tx.commit()?;
                Ok(removed)
            })
            .await?;
        if removed > 0 {
            info!("[ledger] removed {removed} duplicate row(s) of trade {trade_id}");
            self.notify_trades_changed(Table::Trades, "delete").await;
        }
        Ok(removed)
    }

    /// Move a balanced open/close pair to the closed table.
    ///
    /// The pair is every active trade labelled `<strategy>-open-<id>` or
    /// `<strategy>-closed-<id>`. It moves only when both halves are present
    /// and their signed amounts net to zero; otherwise nothing changes and
    /// 0 is returned.
    pub async fn archive_pair(&self, strategy: &str, correlation_id: u64) -> Result<usize> {
        let open = Label::new(strategy, LabelStatus::Open, correlation_id).to_string();
        let closed = Label::new(strategy, LabelStatus::Closed, correlation_id).to_string();
        let moved = self
            .run("archive_pair", move |conn| {
                let tx = conn.transaction()?;
                let legs = {
                    let mut stmt =
                        tx.prepare(&format!("SELECT {TRADE_COLUMNS} FROM my_trades WHERE label IN (?1, ?2)"))?;
                    let rows = stmt.query_map(params![open, closed], trade_from_row)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>()?
                };
                let has_open = legs.iter().any(|t| t.label.as_ref().is_some_and(|l| l.status == LabelStatus::Open));
                let has_closed = legs.iter().any(|t| t.label.as_ref().is_some_and(|l| l.status == LabelStatus::Closed));
                if !has_open || !has_closed || net_amount(&legs) != Decimal::ZERO {
                    return Ok(0);
                }
                tx.execute(
                    &format!(
                        "INSERT INTO my_trades_closed ({TRADE_COLUMNS}) \
                         SELECT trade_id, order_id, instrument_name, currency, side, amount, price, timestamp, \
                         user_seq, label, 0 \
                         FROM my_trades WHERE label IN (?1, ?2)"
                    ),
                    params![open, closed],
                )?;
                let moved = tx.execute("DELETE FROM my_trades WHERE label IN (?1, ?2)", params![open, closed])?;
                tx.commit()?;
                Ok(moved)
            })
            .await?;
        if moved > 0 {
            info!("[ledger] archived {moved} trade(s) of {strategy}/{correlation_id}");
            self.notify_trades_changed(Table::Trades, "archive").await;
        }
        Ok(moved)
    }

    /// Move every active copy of `trade_id` to the closed table with
    /// `is_open = 0`. A copy already present in the closed table is not
    /// written twice. Returns whether anything left the active table.
    pub async fn archive_trade(&self, trade_id: &str) -> Result<bool> {
        let id = trade_id.to_string();
        let moved = self
            .run("archive_trade", move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    &format!(
                        "INSERT INTO my_trades_closed ({TRADE_COLUMNS}) \
                         SELECT trade_id, order_id, instrument_name, currency, side, amount, price, timestamp, \
                         user_seq, label, 0 FROM my_trades WHERE trade_id = ?1 \
                         AND NOT EXISTS (SELECT 1 FROM my_trades_closed WHERE trade_id = ?1) LIMIT 1"
                    ),
                    params![id],
                )?;
                let moved = tx.execute("DELETE FROM my_trades WHERE trade_id = ?1", params![id])?;
                tx.commit()?;
                Ok(moved)
            })
            .await?;
        if moved > 0 {
            info!("[ledger] archived trade {trade_id}");
            self.notify_trades_changed(Table::Trades, "archive").await;
        }
        Ok(moved > 0)
    }

    /// Labels in the active table of `currency` shared by fills of different
    /// orders. Orders are listed by their first fill (timestamp, then trade id).
    pub async fn label_collisions(&self, currency: &str) -> Result<Vec<LabelCollision>> {
        let trades = self.active_trades(currency).await?;
        // label -> order_id -> (first timestamp, first trade id)
        let mut by_label: AHashMap<Label, AHashMap<String, (u64, String)>> = AHashMap::new();
        for t in trades {
            let Some(label) = t.label else { continue };
            let first =
                by_label.entry(label).or_default().entry(t.order_id).or_insert((t.timestamp, t.trade_id.clone()));
            if (t.timestamp, &t.trade_id) < (first.0, &first.1) {
                *first = (t.timestamp, t.trade_id);
            }
        }
        let mut collisions: Vec<LabelCollision> = by_label
            .into_iter()
            .filter(|(_, orders)| orders.len() > 1)
            .map(|(label, orders)| {
                let mut ordered: Vec<(String, (u64, String))> = orders.into_iter().collect();
                ordered.sort_by(|a, b| a.1.cmp(&b.1));
                LabelCollision { label, order_ids: ordered.into_iter().map(|(o, _)| o).collect() }
            })
            .collect();
        collisions.sort_by_key(|c| c.label.to_string());
        if !collisions.is_empty() {
            warn!("[ledger] {} label collision(s) in {currency}", collisions.len());
        }
        Ok(collisions)
    }

    /// Whether `label` is stored on any trade, active or closed.
    pub async fn label_in_use(&self, label: &Label) -> Result<bool> {
        let label = label.to_string();
        self.run("label_in_use", move |conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM my_trades WHERE label = ?1 \
                     UNION ALL SELECT 1 FROM my_trades_closed WHERE label = ?1 LIMIT 1",
                    params![label],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::trade;
    use dbx_core::Side;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn insert_is_idempotent() {
        let ledger = Ledger::open_in_memory().unwrap();
        let t = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(10), 100, Some("scalping-open-1"));
        assert!(ledger.insert_trade(Table::Trades, &t).await.unwrap());
        assert!(!ledger.insert_trade(Table::Trades, &t).await.unwrap());
        let stored = ledger.active_trades("BTC").await.unwrap();
        assert_eq!(stored, vec![t]);
    }

    #[tokio::test]
    async fn archived_trade_is_not_reinserted() {
        let ledger = Ledger::open_in_memory().unwrap();
        let open = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(10), 100, Some("scalping-open-7"));
        let close = trade("2", "BTC-PERPETUAL", Side::Sell, dec!(10), 200, Some("scalping-closed-7"));
        ledger.insert_trade(Table::Trades, &open).await.unwrap();
        ledger.insert_trade(Table::Trades, &close).await.unwrap();
        assert_eq!(ledger.archive_pair("scalping", 7).await.unwrap(), 2);
        assert!(ledger.active_trades("BTC").await.unwrap().is_empty());
        assert!(!ledger.insert_trade(Table::Trades, &open).await.unwrap());
        let closed = ledger.query_trades(Table::ClosedTrades, TradeQuery::default()).await.unwrap();
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|t| !t.is_open));
    }

    #[tokio::test]
    async fn single_trade_is_archived_once() {
        let ledger = Ledger::open_in_memory().unwrap();
        let t = trade("9", "BTC-PERPETUAL", Side::Sell, dec!(3), 100, Some("grid-open-2"));
        ledger.insert_trade(Table::Trades, &t).await.unwrap();
        assert!(ledger.archive_trade("9").await.unwrap());
        assert!(!ledger.archive_trade("9").await.unwrap());
        assert!(ledger.active_trades("BTC").await.unwrap().is_empty());
        let closed = ledger.query_trades(Table::ClosedTrades, TradeQuery::default()).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].trade_id, "9");
        assert!(!closed[0].is_open);
    }

    #[tokio::test]
    async fn unbalanced_pair_stays_active() {
        let ledger = Ledger::open_in_memory().unwrap();
        let open = trade("1", "ETH-PERPETUAL", Side::Buy, dec!(10), 100, Some("scalping-open-7"));
        let partial = trade("2", "ETH-PERPETUAL", Side::Sell, dec!(4), 200, Some("scalping-closed-7"));
        ledger.insert_trade(Table::Trades, &open).await.unwrap();
        ledger.insert_trade(Table::Trades, &partial).await.unwrap();
        assert_eq!(ledger.archive_pair("scalping", 7).await.unwrap(), 0);
        assert_eq!(ledger.active_trades("ETH").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn query_filters_and_limits() {
        let ledger = Ledger::open_in_memory().unwrap();
        for (i, instr) in ["BTC-PERPETUAL", "BTC-27DEC24", "ETH-PERPETUAL"].iter().enumerate() {
            let t = trade(&i.to_string(), instr, Side::Buy, dec!(1), i as u64, Some("hedging-open-1"));
            ledger.insert_trade(Table::Trades, &t).await.unwrap();
        }
        let btc = ledger.query_trades(Table::Trades, TradeQuery::default().currency("btc")).await.unwrap();
        assert_eq!(btc.len(), 2);
        let perps = ledger.query_trades(Table::Trades, TradeQuery::default().instrument("PERPETUAL")).await.unwrap();
        assert_eq!(perps.len(), 2);
        let latest = ledger.query_trades(Table::Trades, TradeQuery::default().newest_first().limit(1)).await.unwrap();
        assert_eq!(latest[0].instrument_name, "ETH-PERPETUAL");
        assert!(ledger.query_trades(Table::Orders, TradeQuery::default()).await.is_err());
    }

    #[tokio::test]
    async fn update_and_delete_by_filter() {
        let ledger = Ledger::open_in_memory().unwrap();
        let t = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(10), 100, None);
        ledger.insert_trade(Table::Trades, &t).await.unwrap();

        let label: Label = "manualBuy-open-100".parse().unwrap();
        let n = ledger
            .update_field(Table::Trades, Field::Label(Some(label.clone())), Filter::TradeId("1".into()))
            .await
            .unwrap();
        assert_eq!(n, 1);
        ledger.update_field(Table::Trades, Field::UserSeq(Some(42)), Filter::TradeId("1".into())).await.unwrap();
        let stored = &ledger.active_trades("BTC").await.unwrap()[0];
        assert_eq!(stored.label, Some(label));
        assert_eq!(stored.user_seq, Some(42));

        let state = Field::OrderState(dbx_core::OrderState::Filled);
        assert!(ledger.update_field(Table::Trades, state, Filter::TradeId("1".into())).await.is_err());
        assert_eq!(ledger.delete_row(Table::Trades, Filter::TradeId("1".into())).await.unwrap(), 1);
        assert!(ledger.active_trades("BTC").await.unwrap().is_empty());
    }

    async fn insert_raw(ledger: &Ledger, table: Table, t: &TradeRecord) {
        let t = t.clone();
        let sql = format!(
            "INSERT INTO {} ({TRADE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10)",
            table.name()
        );
        ledger
            .run("insert_raw", move |conn| {
                conn.execute(
                    &sql,
                    params![
                        t.trade_id,
                        t.order_id,
                        t.instrument_name,
                        t.currency(),
                        t.side.as_str(),
                        t.amount.to_string(),
                        t.price,
                        t.timestamp as i64,
                        t.label.as_ref().map(Label::to_string),
                        i64::from(t.is_open)
                    ],
                )?;
                Ok(())
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicates_are_found_and_removed() {
        let ledger = Ledger::open_in_memory().unwrap();
        let t = trade("9", "BTC-PERPETUAL", Side::Buy, dec!(5), 100, Some("scalping-open-1"));
        insert_raw(&ledger, Table::Trades, &t).await;
        insert_raw(&ledger, Table::Trades, &t).await;
        insert_raw(&ledger, Table::Trades, &t).await;

        let dups = ledger.duplicate_trade_ids(Some("BTC")).await.unwrap();
        assert_eq!(dups, vec![DuplicateTrade { trade_id: "9".into(), copies: 3 }]);
        assert_eq!(ledger.remove_duplicates("9").await.unwrap(), 2);
        assert!(ledger.duplicate_trade_ids(None).await.unwrap().is_empty());
        assert_eq!(ledger.net_by_instrument("BTC").await.unwrap()["BTC-PERPETUAL"], dec!(5));
    }

    #[tokio::test]
    async fn duplicate_cleanup_prefers_closed_copy() {
        let ledger = Ledger::open_in_memory().unwrap();
        let t = trade("9", "BTC-PERPETUAL", Side::Buy, dec!(5), 100, Some("scalping-open-1"));
        insert_raw(&ledger, Table::Trades, &t).await;
        insert_raw(&ledger, Table::ClosedTrades, &t).await;
        assert_eq!(ledger.remove_duplicates("9").await.unwrap(), 1);
        assert!(ledger.active_trades("BTC").await.unwrap().is_empty());
        assert_eq!(ledger.trade_ids("BTC").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn collisions_span_orders_not_fills() {
        let ledger = Ledger::open_in_memory().unwrap();
        let mut a1 = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(1), 100, Some("scalping-open-5"));
        let mut a2 = trade("2", "BTC-PERPETUAL", Side::Buy, dec!(1), 101, Some("scalping-open-5"));
        a1.order_id = "A".into();
        a2.order_id = "A".into();
        ledger.insert_trade(Table::Trades, &a1).await.unwrap();
        ledger.insert_trade(Table::Trades, &a2).await.unwrap();
        assert!(ledger.label_collisions("BTC").await.unwrap().is_empty());

        let mut b = trade("3", "BTC-PERPETUAL", Side::Buy, dec!(1), 50, Some("scalping-open-5"));
        b.order_id = "B".into();
        ledger.insert_trade(Table::Trades, &b).await.unwrap();
        let collisions = ledger.label_collisions("BTC").await.unwrap();
        assert_eq!(collisions.len(), 1);
        assert_eq!(collisions[0].order_ids, vec!["B".to_string(), "A".to_string()]);
        assert!(ledger.label_in_use(&collisions[0].label).await.unwrap());
    }

    #[tokio::test]
    async fn oldest_timestamp_and_ids() {
        let ledger = Ledger::open_in_memory().unwrap();
        assert_eq!(ledger.oldest_active_timestamp("BTC").await.unwrap(), None);
        for (id, ts) in [("1", 300), ("2", 100)] {
            let t = trade(id, "BTC-PERPETUAL", Side::Sell, dec!(1), ts, None);
            ledger.insert_trade(Table::Trades, &t).await.unwrap();
        }
        assert_eq!(ledger.oldest_active_timestamp("BTC").await.unwrap(), Some(100));
        let ids = ledger.trade_ids("btc").await.unwrap();
        assert!(ids.contains("1") && ids.contains("2"));
    }

    #[tokio::test]
    async fn notifier_republishes_active_trades() {
        use dbx_core::bus::{Bus, MemoryBus};
        use dbx_core::topics;
        use futures_util::StreamExt;
        use std::sync::Arc;

        let bus = Arc::new(MemoryBus::new());
        let mut updates = bus.subscribe(topics::MY_TRADES_CACHE_UPDATING).await.unwrap();
        let ledger = Ledger::open_in_memory().unwrap().with_notifier(bus.clone());
        let t = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(2), 100, Some("scalping-open-1"));
        ledger.insert_trade(Table::Trades, &t).await.unwrap();

        let msg = updates.next().await.unwrap();
        let snapshot: Vec<TradeRecord> = serde_json::from_str(&msg).unwrap();
        assert_eq!(snapshot, vec![t]);
    }
}
