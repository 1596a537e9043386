//! Ledger vs. exchange position reconciliation for one currency.
//!
//! A pass compares, per instrument, the signed sum of the ledger's active
//! trades with the size the exchange reports (as published by the
//! distributor on `sub_account_cache_updating`). Sums are exact decimals;
//! any difference blocks the instrument.
//!
//! When something is off, the pass heals once for the whole currency:
//!
//! 1. fetch the transaction log from the oldest active trade minus a margin
//! 2. insert every exchange trade id the ledger has never seen
//! 3. archive active rows inside the fetched window the exchange never reported
//! 4. delete duplicate copies of the same trade id
//! 5. give colliding labels fresh correlation ids
//!
//! and then compares again. A mismatch that survives healing is not healed
//! again before `heal_spacing` has elapsed; the instrument stays blocked.
//! Instruments without a position and without active trades pass without a
//! round trip. If a pass cannot evaluate an instrument its flag keeps its
//! previous value (initially blocked).
//!
//! Passes run on a timer and on `ticker_cache_updating`,
//! `sub_account_cache_updating` and `my_trade_receiving`; bursts of triggers
//! are coalesced to one pass per `min_pass_spacing`. Every pass publishes the
//! full flag list on `order_is_allowed`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use dbx_core::bus::publish_json;
use dbx_core::time_util::{minus_ms, now_ms};
use dbx_core::{OrderAllowed, TradeRecord, topics};
use dbx_ledger::{Field, Filter, Table};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{SubAccountUpdate, TickerUpdate};
use crate::context::CoreContext;
use crate::error::Result;

/// What a heal pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealReport {
    pub backfilled: Vec<String>,
    /// Active rows the exchange log did not contain, moved to the closed table.
    pub orphans_archived: Vec<String>,
    pub duplicates_removed: usize,
    pub relabeled_orders: Vec<String>,
}

pub struct Reconciler {
    ctx: Arc<CoreContext>,
    currency: String,
    /// Exchange-reported sizes from the last sub-account snapshot.
    positions: Option<BTreeMap<String, Decimal>>,
    flags: BTreeMap<String, bool>,
    last_heal: Option<Instant>,
}

impl Reconciler {
    pub fn new(ctx: Arc<CoreContext>, currency: &str) -> Self {
        let currency = currency.to_uppercase();
        let flags = ctx.instruments_of(&currency).into_iter().map(|i| (i, false)).collect();
        Self { ctx, currency, positions: None, flags, last_heal: None }
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    /// Current flags, by instrument.
    pub fn flags(&self) -> Vec<OrderAllowed> {
        self.flags
            .iter()
            .map(|(instrument, ok)| OrderAllowed {
                instrument_name: instrument.clone(),
                size_is_reconciled: *ok,
                currency: self.currency.clone(),
            })
            .collect()
    }

    /// Take exchange positions from a distributor snapshot. Snapshots of
    /// other currencies are ignored.
    pub fn apply_snapshot(&mut self, update: &SubAccountUpdate) {
        if !update.currency.eq_ignore_ascii_case(&self.currency) {
            return;
        }
        self.positions = Some(update.positions.iter().map(|p| (p.instrument_name.clone(), p.size)).collect());
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let tag = format!("reconciler-{}", self.currency);
        let cfg = self.ctx.config.reconciler.clone();
        let mut triggers = self.subscribe_triggers().await?;
        let spacing = Duration::from_millis(cfg.min_pass_spacing_ms);
        let mut timer = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_pass: Option<Instant> = None;
        let mut pending = false;
        info!("[{tag}] started");

        loop {
            let earliest = last_pass.map_or_else(Instant::now, |t| t + spacing);
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = timer.tick() => pending = true,
                msg = triggers.next() => match msg {
                    Some((topic, payload)) => pending |= self.on_trigger(topic, &payload),
                    None => {
                        warn!("[{tag}] trigger subscriptions closed, timer only");
                        triggers = stream::pending().boxed();
                    }
                },
                _ = tokio::time::sleep_until(earliest), if pending => {
                    pending = false;
                    last_pass = Some(Instant::now());
                    self.pass().await;
                    continue;
                }
            }
            // A pass that is already due runs without waiting for the next event.
            if pending && last_pass.is_none_or(|t| t.elapsed() >= spacing) {
                pending = false;
                last_pass = Some(Instant::now());
                self.pass().await;
            }
        }
        info!("[{tag}] stopped");
        Ok(())
    }

    async fn subscribe_triggers(&self) -> anyhow::Result<BoxStream<'static, (&'static str, String)>> {
        let mut merged = Vec::new();
        for topic in [topics::SUB_ACCOUNT_CACHE_UPDATING, topics::TICKER_CACHE_UPDATING, topics::MY_TRADE_RECEIVING] {
            let sub = self.ctx.bus.subscribe(topic).await?;
            merged.push(sub.map(move |payload| (topic, payload)).boxed());
        }
        Ok(stream::select_all(merged).boxed())
    }

    /// Digest a trigger message. Returns whether it concerns this currency.
    fn on_trigger(&mut self, topic: &str, payload: &str) -> bool {
        match topic {
            t if t == topics::SUB_ACCOUNT_CACHE_UPDATING => match serde_json::from_str::<SubAccountUpdate>(payload) {
                Ok(update) if update.currency.eq_ignore_ascii_case(&self.currency) => {
                    self.apply_snapshot(&update);
                    true
                }
                Ok(_) => false,
                Err(e) => {
                    debug!("[reconciler-{}] undecodable snapshot: {e}", self.currency);
                    false
                }
            },
            t if t == topics::TICKER_CACHE_UPDATING => serde_json::from_str::<TickerUpdate>(payload)
                .is_ok_and(|u| u.currency.eq_ignore_ascii_case(&self.currency)),
            _ => serde_json::from_str::<Vec<TradeRecord>>(payload)
                .is_ok_and(|trades| trades.iter().any(|t| t.currency() == self.currency)),
        }
    }

    // -----------------------------------------------------------------------
    // Pass
    // -----------------------------------------------------------------------

    /// Evaluate every instrument, heal if needed, publish the flag list.
    pub async fn pass(&mut self) -> Vec<OrderAllowed> {
        if let Err(e) = self.evaluate().await {
            error!("[reconciler-{}] pass incomplete: {e}", self.currency);
        }
        let flags = self.flags();
        if let Err(e) = publish_json(self.ctx.bus.as_ref(), topics::ORDER_IS_ALLOWED, &flags).await {
            warn!("[reconciler-{}] publish {}: {e}", self.currency, topics::ORDER_IS_ALLOWED);
        }
        flags
    }

    async fn evaluate(&mut self) -> Result<()> {
        let Some(positions) = self.positions.clone() else {
            debug!("[reconciler-{}] no position snapshot yet", self.currency);
            return Ok(());
        };
        let ledger = self.ctx.ledger.net_by_instrument(&self.currency).await?;

        let instruments: BTreeSet<String> =
            positions.keys().chain(ledger.keys()).chain(self.flags.keys()).cloned().collect();
        let mut mismatched = Vec::new();
        for instrument in instruments {
            let size = positions.get(&instrument).copied().unwrap_or_default();
            match ledger.get(&instrument) {
                None if size.is_zero() => self.set_flag(&instrument, true, size, Decimal::ZERO),
                net => {
                    let net = net.copied().unwrap_or_default();
                    if net == size {
                        self.set_flag(&instrument, true, size, net);
                    } else {
                        self.set_flag(&instrument, false, size, net);
                        mismatched.push(instrument);
                    }
                }
            }
        }
        if mismatched.is_empty() {
            return Ok(());
        }
        let heal_spacing = Duration::from_millis(self.ctx.config.reconciler.heal_spacing_ms);
        if self.last_heal.is_some_and(|t| t.elapsed() < heal_spacing) {
            debug!(?mismatched, "[reconciler-{}] mismatch persists, next heal not yet due", self.currency);
            return Ok(());
        }

        self.last_heal = Some(Instant::now());
        let report = self.heal().await?;
        if report != HealReport::default() {
            warn!(
                currency = %self.currency,
                backfilled = ?report.backfilled,
                orphans_archived = ?report.orphans_archived,
                duplicates_removed = report.duplicates_removed,
                relabeled_orders = ?report.relabeled_orders,
                "[reconciler-{}] healed ledger", self.currency
            );
        }

        let ledger = self.ctx.ledger.net_by_instrument(&self.currency).await?;
        for instrument in mismatched {
            let size = positions.get(&instrument).copied().unwrap_or_default();
            let net = ledger.get(&instrument).copied().unwrap_or_default();
            self.set_flag(&instrument, net == size, size, net);
        }
        Ok(())
    }

    fn set_flag(&mut self, instrument: &str, reconciled: bool, expected: Decimal, actual: Decimal) {
        let previous = self.flags.insert(instrument.to_string(), reconciled);
        if previous == Some(reconciled) {
            return;
        }
        if reconciled {
            info!(
                instrument,
                %expected,
                %actual,
                "[reconciler-{}] {instrument} reconciled, trading allowed", self.currency
            );
        } else {
            warn!(
                instrument,
                %expected,
                %actual,
                "[reconciler-{}] {instrument} size mismatch, trading blocked", self.currency
            );
        }
    }

    /// Backfill, deduplicate and relabel the currency's trades.
    pub async fn heal(&self) -> Result<HealReport> {
        let cfg = &self.ctx.config.reconciler;
        let ledger = &self.ctx.ledger;
        let mut report = HealReport::default();

        let start = match ledger.oldest_active_timestamp(&self.currency).await? {
            Some(ts) => minus_ms(ts, cfg.lookback_margin_ms),
            None => minus_ms(now_ms(), cfg.default_lookback_ms),
        };
        let fetched_at = now_ms();
        let exchange = self.ctx.rest.get_transaction_log(&self.currency, start, cfg.txlog_count, Some("trade")).await?;
        let reported: AHashSet<&str> = exchange.iter().map(|t| t.trade_id.as_str()).collect();
        let known = ledger.trade_ids(&self.currency).await?;
        for trade in exchange.iter().filter(|t| !known.contains(&t.trade_id)) {
            if ledger.insert_trade(Table::Trades, trade).await? {
                warn!(
                    trade_id = %trade.trade_id,
                    instrument = %trade.instrument_name,
                    amount = %trade.signed_amount(),
                    "[reconciler-{}] backfilled missing trade", self.currency
                );
                report.backfilled.push(trade.trade_id.clone());
            }
        }

        let orphans = ledger.active_trades(&self.currency).await?.into_iter().filter(|t| {
            (start..=fetched_at).contains(&t.timestamp) && !reported.contains(t.trade_id.as_str())
        });
        for orphan in orphans {
            if ledger.archive_trade(&orphan.trade_id).await? {
                error!(
                    trade_id = %orphan.trade_id,
                    order_id = %orphan.order_id,
                    instrument = %orphan.instrument_name,
                    amount = %orphan.signed_amount(),
                    timestamp = orphan.timestamp,
                    "[reconciler-{}] trade unknown to the exchange, archived", self.currency
                );
                report.orphans_archived.push(orphan.trade_id);
            }
        }

        for dup in ledger.duplicate_trade_ids(Some(&self.currency)).await? {
            let removed = ledger.remove_duplicates(&dup.trade_id).await?;
            error!(
                trade_id = %dup.trade_id,
                copies = dup.copies,
                removed,
                "[reconciler-{}] duplicate trade id", self.currency
            );
            report.duplicates_removed += removed;
        }

        for collision in ledger.label_collisions(&self.currency).await? {
            // The earliest order keeps the label.
            let mut next_id = now_ms();
            for order_id in collision.order_ids.iter().skip(1) {
                let mut fresh = collision.label.with_correlation_id(next_id);
                while ledger.label_in_use(&fresh).await? {
                    next_id += 1;
                    fresh = collision.label.with_correlation_id(next_id);
                }
                next_id += 1;
                ledger
                    .update_field(Table::Trades, Field::Label(Some(fresh.clone())), Filter::OrderId(order_id.clone()))
                    .await?;
                error!(
                    order_id = %order_id,
                    from = %collision.label,
                    to = %fresh,
                    "[reconciler-{}] label collision, relabeled", self.currency
                );
                report.relabeled_orders.push(order_id.clone());
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    use dbx_core::bus::Bus;
    use dbx_core::{Label, Position, Side};
    use dbx_ledger::TradeQuery;
    use rust_decimal_macros::dec;

    use crate::testing::{FakeRest, context, trade};

    fn snapshot(currency: &str, positions: &[(&str, Decimal)]) -> SubAccountUpdate {
        SubAccountUpdate {
            currency: currency.into(),
            positions: positions
                .iter()
                .map(|(i, s)| Position { instrument_name: i.to_string(), size: *s, currency: currency.into() })
                .collect(),
            open_orders: vec![],
            my_trades: vec![],
        }
    }

    fn flag(flags: &[OrderAllowed], instrument: &str) -> bool {
        flags.iter().find(|f| f.instrument_name == instrument).map(|f| f.size_is_reconciled).unwrap()
    }

    #[tokio::test]
    async fn matching_sums_allow_trading_without_log_fetch() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        for t in [
            trade("1", "BTC-PERPETUAL", Side::Buy, dec!(0.1), 10, "a-open-1"),
            trade("2", "BTC-PERPETUAL", Side::Buy, dec!(0.2), 11, "a-open-2"),
        ] {
            ctx.ledger.insert_trade(Table::Trades, &t).await.unwrap();
        }

        let mut r = Reconciler::new(ctx, "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(0.3))]));
        let flags = r.pass().await;
        assert!(flag(&flags, "BTC-PERPETUAL"));
        assert_eq!(rest.log_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn blocked_until_a_snapshot_arrives() {
        let (ctx, _bus) = context(Arc::new(FakeRest::default())).await;
        let mut r = Reconciler::new(ctx, "BTC");
        assert!(!flag(&r.pass().await, "BTC-PERPETUAL"));
    }

    #[tokio::test]
    async fn flat_instrument_is_implicitly_reconciled() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        let mut r = Reconciler::new(ctx, "ETH");
        r.apply_snapshot(&snapshot("ETH", &[]));
        let flags = r.pass().await;
        assert_eq!(flags.len(), 1);
        assert!(flag(&flags, "ETH-PERPETUAL"));
        assert_eq!(rest.log_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn backfill_converges_and_unblocks() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, bus) = context(rest.clone()).await;
        let mut published = bus.subscribe(topics::ORDER_IS_ALLOWED).await.unwrap();
        let known = trade("BTC-1", "BTC-PERPETUAL", Side::Buy, dec!(10), 1_000, "scalp-open-1");
        ctx.ledger.insert_trade(Table::Trades, &known).await.unwrap();
        // Unlabeled on the exchange: the log translation gives it a synthetic label.
        let missing = TradeRecord {
            label: Some(Label::resolve(None, Side::Sell, 2_000)),
            ..trade("BTC-2", "BTC-PERPETUAL", Side::Sell, dec!(4), 2_000, "unused-open-0")
        };
        rest.push_log(known);
        rest.push_log(missing);

        let mut r = Reconciler::new(ctx.clone(), "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(6))]));
        let flags = r.pass().await;
        assert!(flag(&flags, "BTC-PERPETUAL"));
        assert_eq!(rest.log_calls.load(Ordering::SeqCst), 1);

        let rows = ctx.ledger.active_trades("BTC").await.unwrap();
        assert_eq!(rows.len(), 2);
        let backfilled = rows.iter().find(|t| t.trade_id == "BTC-2").unwrap();
        assert_eq!(backfilled.label.as_ref().unwrap().to_string(), "manualSell-open-2000");

        let payload = futures_util::StreamExt::next(&mut published).await.unwrap();
        let msg: Vec<OrderAllowed> = serde_json::from_str(&payload).unwrap();
        assert_eq!(msg, flags);
    }

    #[tokio::test]
    async fn unresolvable_mismatch_stays_blocked() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        let only = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(10), 1, "x-open-1");
        ctx.ledger.insert_trade(Table::Trades, &only).await.unwrap();
        rest.push_log(only);
        let mut r = Reconciler::new(ctx.clone(), "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(10.000001))]));
        assert!(!flag(&r.pass().await, "BTC-PERPETUAL"));
        assert_eq!(ctx.ledger.active_trades("BTC").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn persistent_mismatch_fetches_the_log_once_per_heal_spacing() {
        let rest = Arc::new(FakeRest::default());
        let mut cfg = crate::testing::config();
        cfg.reconciler.heal_spacing_ms = 300;
        let spacing = Duration::from_millis(cfg.reconciler.heal_spacing_ms);
        let ledger = dbx_ledger::Ledger::open_in_memory().unwrap();
        let ctx = CoreContext::new(cfg, Arc::new(dbx_core::bus::MemoryBus::new()), ledger, rest.clone());
        let only = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(10), 1, "x-open-1");
        ctx.ledger.insert_trade(Table::Trades, &only).await.unwrap();
        rest.push_log(only);
        let mut r = Reconciler::new(ctx, "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(11))]));

        for _ in 0..5 {
            assert!(!flag(&r.pass().await, "BTC-PERPETUAL"));
        }
        assert_eq!(rest.log_calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(spacing).await;
        assert!(!flag(&r.pass().await, "BTC-PERPETUAL"));
        assert_eq!(rest.log_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn orphaned_row_is_archived_and_unblocks() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        let real = trade("BTC-1", "BTC-PERPETUAL", Side::Buy, dec!(10), 1_000, "scalp-open-1");
        let phantom = trade("BTC-X", "BTC-PERPETUAL", Side::Buy, dec!(5), 1_500, "scalp-open-2");
        ctx.ledger.insert_trade(Table::Trades, &real).await.unwrap();
        ctx.ledger.insert_trade(Table::Trades, &phantom).await.unwrap();
        rest.push_log(real);

        let mut r = Reconciler::new(ctx.clone(), "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(10))]));
        assert!(flag(&r.pass().await, "BTC-PERPETUAL"));

        let active = ctx.ledger.active_trades("BTC").await.unwrap();
        assert_eq!(active.iter().map(|t| t.trade_id.as_str()).collect::<Vec<_>>(), vec!["BTC-1"]);
        let closed = ctx.ledger.query_trades(Table::ClosedTrades, TradeQuery::default().currency("BTC")).await.unwrap();
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].trade_id, "BTC-X");
        assert!(!closed[0].is_open);
    }

    #[tokio::test]
    async fn rows_outside_the_fetched_window_are_not_orphans() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        let future = trade("BTC-9", "BTC-PERPETUAL", Side::Buy, dec!(1), now_ms() + 3_600_000, "scalp-open-9");
        ctx.ledger.insert_trade(Table::Trades, &future).await.unwrap();

        let report = Reconciler::new(ctx.clone(), "BTC").heal().await.unwrap();
        assert!(report.orphans_archived.is_empty());
        assert_eq!(ctx.ledger.active_trades("BTC").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn log_failure_keeps_others_evaluated() {
        let rest = Arc::new(FakeRest::default());
        rest.fail_log.store(true, Ordering::SeqCst);
        let (ctx, _bus) = context(rest.clone()).await;
        for t in [
            trade("1", "BTC-PERPETUAL", Side::Buy, dec!(1), 1, "x-open-1"),
            trade("2", "BTC-27DEC24", Side::Sell, dec!(2), 1, "y-open-1"),
        ] {
            ctx.ledger.insert_trade(Table::Trades, &t).await.unwrap();
        }

        let mut r = Reconciler::new(ctx, "BTC");
        r.apply_snapshot(&snapshot("BTC", &[("BTC-PERPETUAL", dec!(5)), ("BTC-27DEC24", dec!(-2))]));
        let flags = r.pass().await;
        assert!(!flag(&flags, "BTC-PERPETUAL"));
        assert!(flag(&flags, "BTC-27DEC24"));
    }

    #[tokio::test]
    async fn heal_relabels_colliding_orders() {
        let rest = Arc::new(FakeRest::default());
        let (ctx, _bus) = context(rest.clone()).await;
        let a = trade("1", "BTC-PERPETUAL", Side::Buy, dec!(1), 100, "grid-open-5");
        let b = TradeRecord {
            order_id: "o-other".into(),
            ..trade("2", "BTC-PERPETUAL", Side::Buy, dec!(1), 200, "grid-open-5")
        };
        ctx.ledger.insert_trade(Table::Trades, &a).await.unwrap();
        ctx.ledger.insert_trade(Table::Trades, &b).await.unwrap();
        rest.push_log(a);
        rest.push_log(b);

        let r = Reconciler::new(ctx.clone(), "BTC");
        let report = r.heal().await.unwrap();
        assert_eq!(report.relabeled_orders, vec!["o-other".to_string()]);
        assert!(report.backfilled.is_empty());
        assert!(report.orphans_archived.is_empty());
        assert_eq!(report.duplicates_removed, 0);

        let rows = ctx.ledger.query_trades(Table::Trades, TradeQuery::default().label("grid-open-5")).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].order_id, "o-1");
        let relabeled = ctx.ledger.query_trades(Table::Trades, TradeQuery::default().instrument("BTC")).await.unwrap();
        let moved = relabeled.iter().find(|t| t.order_id == "o-other").unwrap();
        let label = moved.label.as_ref().unwrap();
        assert_eq!(label.strategy, "grid");
        assert_ne!(label.correlation_id, 5);
    }

    #[tokio::test]
    async fn snapshots_of_other_currencies_are_ignored() {
        let (ctx, _bus) = context(Arc::new(FakeRest::default())).await;
        let mut r = Reconciler::new(ctx, "BTC");
        let eth = serde_json::to_string(&snapshot("ETH", &[("ETH-PERPETUAL", dec!(1))])).unwrap();
        assert!(!r.on_trigger(topics::SUB_ACCOUNT_CACHE_UPDATING, &eth));
        assert!(r.positions.is_none());
        let btc = serde_json::to_string(&snapshot("BTC", &[])).unwrap();
        assert!(r.on_trigger(topics::SUB_ACCOUNT_CACHE_UPDATING, &btc));
        assert!(r.positions.is_some());
        assert!(!r.on_trigger(topics::TICKER_CACHE_UPDATING, "garbage"));
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_are_coalesced() {
        let rest = Arc::new(FakeRest::default());
        let (mut ctx_cfg, bus) = (crate::testing::config(), Arc::new(dbx_core::bus::MemoryBus::new()));
        ctx_cfg.reconciler.min_pass_spacing_ms = 1_000;
        ctx_cfg.reconciler.interval_secs = 3_600;
        let ledger = dbx_ledger::Ledger::open_in_memory().unwrap();
        let ctx = CoreContext::new(ctx_cfg, bus.clone(), ledger, rest);
        let mut flags = bus.subscribe(topics::ORDER_IS_ALLOWED).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Reconciler::new(ctx, "BTC").run(rx));
        // The first timer tick runs a pass straight away.
        assert!(futures_util::StreamExt::next(&mut flags).await.is_some());

        let update = serde_json::to_string(&snapshot("BTC", &[])).unwrap();
        for _ in 0..5 {
            bus.publish(topics::SUB_ACCOUNT_CACHE_UPDATING, &update).await.unwrap();
        }
        let passes = tokio::time::timeout(Duration::from_secs(5), async {
            let mut n = 0;
            let window = Duration::from_secs(2);
            while tokio::time::timeout(window, futures_util::StreamExt::next(&mut flags)).await.is_ok() {
                n += 1;
            }
            n
        })
        .await
        .unwrap();
        assert_eq!(passes, 1);

        tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }
}
