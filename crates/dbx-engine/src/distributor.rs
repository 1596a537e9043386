//! Durable-stream consumer and sole writer of the in-memory caches.
//!
//! # Loop
//!
//! | Trigger               | Action                                             |
//! |-----------------------|----------------------------------------------------|
//! | `XREADGROUP` batch    | process, ack what succeeded                        |
//! | claim interval        | reclaim entries pending longer than `claim_idle`   |
//! | resync interval       | REST sub-account resync of every currency          |
//! | shutdown              | stop; unacked entries stay pending for next start  |
//!
//! # Routing
//!
//! | Channel                | Cache                  | Topic(s)                                        |
//! |------------------------|------------------------|-------------------------------------------------|
//! | `user.portfolio.*`     | portfolio (by currency)| `portfolio`                                     |
//! | `user.changes.*`       | positions + orders     | `sub_account_cache_updating`                    |
//! | `user.trades.*`        | orders (fills removed) | `my_trade_receiving`, `my_trades_cache_updating`|
//! | `user.orders.*`        | orders                 | `order_cache_updating`                          |
//! | `incremental_ticker.*` | tickers (field merge)  | `ticker_cache_updating`                         |
//! | `chart.trades.*`       | none                   | `chart_low_high_tick`                           |
//!
//! Entries of a batch are grouped by currency; groups run concurrently and
//! each group runs in stream order under its shard lock. Every handler is
//! safe to repeat: ledger writes are keyed upserts and cache writes replace
//! by key, so a redelivered entry leaves the same final state.
//!
//! An entry that fails is left unacknowledged and comes back through the
//! stale-entry claim. Once it has been delivered `max_deliveries` times it is
//! copied to the dead-letter stream with the failure reason and acked.
//! Entries that cannot be decoded at all are logged and acked immediately.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashSet;
use anyhow::Context;
use dbx_core::backoff::ExponentialBackoff;
use dbx_core::bus::{StreamEntry, publish_json};
use dbx_core::time_util::now_ms;
use dbx_core::{Channel, LabelStatus, OrderRecord, StreamEvent, TradeRecord, currency_of, is_perpetual, topics};
use dbx_ledger::{Table, TradeQuery};
use futures_util::FutureExt;
use futures_util::future::join_all;
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::cache::{Caches, OrderCacheUpdate, SubAccountUpdate, TickerUpdate};
use crate::context::CoreContext;
use crate::error::{EngineError, Result};
use crate::sink::{NoopSink, OpenInterestSink};
use crate::translate;

/// Routing key of entries whose currency cannot be determined.
const UNROUTED: &str = "*";

/// Counters for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub acked: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub malformed: usize,
}

impl BatchStats {
    fn merge(&mut self, other: BatchStats) {
        self.acked += other.acked;
        self.retried += other.retried;
        self.dead_lettered += other.dead_lettered;
        self.malformed += other.malformed;
    }
}

/// A decoded stream entry.
struct Routed {
    event: StreamEvent,
    channel: Channel,
}

fn decode(data: &str) -> Result<Routed> {
    let event: StreamEvent = serde_json::from_str(data).map_err(|e| EngineError::Malformed(format!("entry: {e}")))?;
    let channel = Channel::parse(&event.channel).map_err(|e| EngineError::Malformed(e.to_string()))?;
    Ok(Routed { event, channel })
}

fn route_key(routed: &Routed) -> String {
    routed
        .channel
        .currency()
        .or_else(|| translate::instrument_of(&routed.event.data).map(currency_of))
        .unwrap_or_else(|| UNROUTED.to_string())
}

fn malformed(e: impl std::fmt::Display) -> EngineError {
    EngineError::Malformed(e.to_string())
}

/// Consume a tick of `interval` if one is due, without waiting.
fn tick_due(interval: &mut Interval) -> bool {
    interval.tick().now_or_never().is_some()
}

pub struct Distributor {
    ctx: Arc<CoreContext>,
    caches: Arc<Caches>,
    oi_sink: Arc<dyn OpenInterestSink>,
}

impl Distributor {
    pub fn new(ctx: Arc<CoreContext>) -> Self {
        Self { ctx, caches: Arc::new(Caches::new()), oi_sink: Arc::new(NoopSink) }
    }

    pub fn with_open_interest_sink(mut self, sink: Arc<dyn OpenInterestSink>) -> Self {
        self.oi_sink = sink;
        self
    }

    /// Read access for tests and diagnostics. Only the distributor writes.
    pub fn caches(&self) -> Arc<Caches> {
        Arc::clone(&self.caches)
    }

    // -----------------------------------------------------------------------
    // Consumer loop
    // -----------------------------------------------------------------------

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let bus_cfg = &self.ctx.config.bus;
        let dist_cfg = &self.ctx.config.distributor;
        self.ctx
            .bus
            .ensure_group(&bus_cfg.stream, &bus_cfg.group)
            .await
            .with_context(|| format!("create group {} on {}", bus_cfg.group, bus_cfg.stream))?;
        info!("[distributor] consuming {} as {}/{}", bus_cfg.stream, bus_cfg.group, bus_cfg.consumer);

        if let Err(e) = self.resync().await {
            warn!("[distributor] start-up resync failed: {e}");
        }

        let block = Duration::from_millis(bus_cfg.block_ms);
        let mut claim_tick = tokio::time::interval(Duration::from_secs(dist_cfg.claim_interval_secs.max(1)));
        claim_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut resync_tick = (dist_cfg.resync_interval_secs > 0).then(|| {
            let period = Duration::from_secs(dist_cfg.resync_interval_secs);
            let mut i = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            i.set_missed_tick_behavior(MissedTickBehavior::Delay);
            i
        });
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(bus_cfg.publish_retry_ms), Duration::from_secs(5));

        loop {
            // Timers are serviced between reads. Cancelling a blocking read
            // would strand whatever the server delivered to it in the pending
            // list until `claim_idle_ms`.
            if tick_due(&mut claim_tick) {
                if let Err(e) = self.claim_stale().await {
                    warn!("[distributor] claim failed: {e}");
                }
            }
            if resync_tick.as_mut().is_some_and(tick_due) {
                if let Err(e) = self.resync().await {
                    warn!("[distributor] periodic resync failed: {e}");
                }
            }

            let read = self.ctx.bus.stream_read_group(
                &bus_cfg.stream,
                &bus_cfg.group,
                &bus_cfg.consumer,
                bus_cfg.batch,
                block,
            );
            let read = tokio::select! {
                _ = shutdown.changed() => break,
                read = read => read,
            };
            match read {
                Ok(entries) => {
                    backoff.reset();
                    if !entries.is_empty() {
                        self.process_batch(entries).await;
                    }
                }
                Err(e) if e.is_transient() => {
                    let delay = backoff.next_delay();
                    warn!("[distributor] stream read failed ({e}), retrying in {delay:?}");
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e).context("stream read"),
            }
        }
        info!("[distributor] stopped");
        Ok(())
    }

    /// Take over entries left pending by a dead or slow consumer (including
    /// this one's own failed entries) and process them again.
    pub async fn claim_stale(&self) -> Result<BatchStats> {
        let cfg = &self.ctx.config.bus;
        let entries = self
            .ctx
            .bus
            .stream_claim_stale(
                &cfg.stream,
                &cfg.group,
                &cfg.consumer,
                Duration::from_millis(cfg.claim_idle_ms),
                cfg.batch,
            )
            .await?;
        if entries.is_empty() {
            return Ok(BatchStats::default());
        }
        info!("[distributor] reclaimed {} stale entries", entries.len());
        Ok(self.process_batch(entries).await)
    }

    /// Process a batch and settle every entry (ack, retry or dead-letter).
    pub async fn process_batch(&self, entries: Vec<StreamEntry>) -> BatchStats {
        let mut groups: BTreeMap<String, Vec<(StreamEntry, Result<Routed>)>> = BTreeMap::new();
        for entry in entries {
            let routed = decode(&entry.data);
            let key = routed.as_ref().map(route_key).unwrap_or_else(|_| UNROUTED.to_string());
            groups.entry(key).or_default().push((entry, routed));
        }

        let results = join_all(groups.into_values().map(|group| async move {
            let mut stats = BatchStats::default();
            for (entry, routed) in group {
                let outcome = match routed {
                    Ok(r) => self.dispatch(&r.channel, &r.event).await,
                    Err(e) => Err(e),
                };
                self.settle(&entry, outcome, &mut stats).await;
            }
            stats
        }))
        .await;

        let mut total = BatchStats::default();
        for s in results {
            total.merge(s);
        }
        debug!("[distributor] batch {total:?}");
        total
    }

    async fn settle(&self, entry: &StreamEntry, outcome: Result<()>, stats: &mut BatchStats) {
        let cfg = &self.ctx.config.bus;
        match outcome {
            Ok(()) => {
                self.ack(entry).await;
                stats.acked += 1;
            }
            Err(e) if e.is_malformed() => {
                error!("[distributor] dropping entry {}: {e}", entry.id);
                self.ack(entry).await;
                stats.malformed += 1;
            }
            Err(e) if entry.deliveries >= cfg.max_deliveries => {
                error!("[distributor] entry {} failed {} times, dead-lettering: {e}", entry.id, entry.deliveries);
                let record = json!({
                    "id": entry.id,
                    "data": entry.data,
                    "reason": e.to_string(),
                    "deliveries": entry.deliveries,
                    "timestamp": now_ms(),
                });
                match self.ctx.bus.stream_append(&cfg.dead_letter_stream, &record.to_string(), cfg.max_len).await {
                    Ok(_) => {
                        self.ack(entry).await;
                        stats.dead_lettered += 1;
                    }
                    Err(dl) => {
                        warn!("[distributor] dead-letter append failed ({dl}), entry {} stays pending", entry.id);
                        stats.retried += 1;
                    }
                }
            }
            Err(e) => {
                warn!("[distributor] entry {} failed (delivery {}), will retry: {e}", entry.id, entry.deliveries);
                stats.retried += 1;
            }
        }
    }

    async fn ack(&self, entry: &StreamEntry) {
        let cfg = &self.ctx.config.bus;
        if let Err(e) = self.ctx.bus.stream_ack(&cfg.stream, &cfg.group, &entry.id).await {
            // The entry will be reclaimed and reprocessed, which is harmless.
            warn!("[distributor] ack {} failed: {e}", entry.id);
        }
    }

    // -----------------------------------------------------------------------
    // Handlers
    // -----------------------------------------------------------------------

    /// Apply one event. Does not acknowledge anything.
    pub async fn handle(&self, event: &StreamEvent) -> Result<()> {
        let channel = Channel::parse(&event.channel).map_err(malformed)?;
        self.dispatch(&channel, event).await
    }

    async fn dispatch(&self, channel: &Channel, event: &StreamEvent) -> Result<()> {
        match channel {
            Channel::Portfolio { currency } => self.on_portfolio(currency, &event.data).await,
            Channel::UserChanges { .. } => self.resync().await,
            Channel::Trades { .. } => self.on_trades(&event.data).await,
            Channel::Orders { .. } => self.on_orders(&event.data).await,
            Channel::Ticker { instrument } => self.on_ticker(instrument, &event.data, event.timestamp).await,
            Channel::Chart { instrument, resolution } => {
                let tick = json!({ "instrument_name": instrument, "resolution": resolution, "data": event.data });
                publish_json(self.ctx.bus.as_ref(), topics::CHART_LOW_HIGH_TICK, &tick).await?;
                Ok(())
            }
        }
    }

    async fn on_portfolio(&self, channel_currency: &str, data: &Value) -> Result<()> {
        if !data.is_object() {
            return Err(malformed(format!("portfolio payload is not an object: {data}")));
        }
        let currency = data.get("currency").and_then(Value::as_str).unwrap_or(channel_currency).to_uppercase();
        let all = self.caches.upsert_portfolio(&currency, data.clone());
        publish_json(self.ctx.bus.as_ref(), topics::PORTFOLIO, &all).await?;
        Ok(())
    }

    async fn on_trades(&self, data: &Value) -> Result<()> {
        let trades = translate::trades(data).map_err(malformed)?;
        let mut by_currency: BTreeMap<String, Vec<TradeRecord>> = BTreeMap::new();
        for t in trades {
            by_currency.entry(t.currency()).or_default().push(t);
        }

        for (currency, trades) in by_currency {
            let shard = self.caches.shard(&currency);
            let mut cache = shard.lock().await;

            let mut inserted = 0;
            let mut filled_orders = false;
            for t in &trades {
                if self.ctx.ledger.insert_trade(Table::Trades, t).await? {
                    inserted += 1;
                }
                filled_orders |= cache.orders.remove(&t.order_id).is_some();
            }

            let mut pairs = AHashSet::new();
            for label in trades.iter().filter_map(|t| t.label.as_ref()) {
                if label.status == LabelStatus::Closed && pairs.insert((label.strategy.clone(), label.correlation_id)) {
                    self.ctx.ledger.archive_pair(&label.strategy, label.correlation_id).await?;
                }
            }
            info!("[distributor] {currency}: {} fill(s), {inserted} new", trades.len());

            let bus = self.ctx.bus.as_ref();
            publish_json(bus, topics::MY_TRADE_RECEIVING, &trades).await?;
            let active = self.ctx.ledger.query_trades(Table::Trades, TradeQuery::default()).await?;
            publish_json(bus, topics::MY_TRADES_CACHE_UPDATING, &active).await?;
            if filled_orders {
                let update = OrderCacheUpdate { currency, open_orders: cache.open_orders() };
                publish_json(bus, topics::ORDER_CACHE_UPDATING, &update).await?;
            }
        }
        Ok(())
    }

    async fn on_orders(&self, data: &Value) -> Result<()> {
        let orders = translate::orders(data).map_err(malformed)?;
        let mut by_currency: BTreeMap<String, Vec<OrderRecord>> = BTreeMap::new();
        for o in orders {
            by_currency.entry(o.currency()).or_default().push(o);
        }

        for (currency, orders) in by_currency {
            let shard = self.caches.shard(&currency);
            let mut cache = shard.lock().await;
            for order in orders {
                // A redelivered update must not roll a newer one back, nor
                // revive an order that already reached a terminal state.
                if cache.is_stale(&order) {
                    debug!("[distributor] stale update for order {}", order.order_id);
                    continue;
                }
                if order.order_state.is_terminal() {
                    self.ctx.ledger.delete_order(&order.order_id).await?;
                    cache.orders.remove(&order.order_id);
                    cache.record_terminal(&order.order_id, order.timestamp);
                } else {
                    self.ctx.ledger.upsert_order(&order).await?;
                    cache.orders.insert(order.order_id.clone(), order);
                }
            }
            let update = OrderCacheUpdate { currency, open_orders: cache.open_orders() };
            publish_json(self.ctx.bus.as_ref(), topics::ORDER_CACHE_UPDATING, &update).await?;
        }
        Ok(())
    }

    async fn on_ticker(&self, instrument: &str, data: &Value, arrived: u64) -> Result<()> {
        let fields = data.as_object().ok_or_else(|| malformed(format!("ticker payload is not an object: {data}")))?;
        let currency = currency_of(instrument);
        let shard = self.caches.shard(&currency);
        let mut cache = shard.lock().await;

        let snapshot = cache.tickers.entry(instrument.to_string()).or_default();
        snapshot.apply(fields);
        let update = TickerUpdate { instrument_name: instrument.to_string(), currency, ticker: snapshot.to_value() };
        // Only a change carried by this update is forwarded.
        let open_interest = fields.contains_key("open_interest").then(|| snapshot.open_interest()).flatten();
        publish_json(self.ctx.bus.as_ref(), topics::TICKER_CACHE_UPDATING, &update).await?;

        if let (true, Some(oi)) = (is_perpetual(instrument), open_interest) {
            let ts = data.get("timestamp").and_then(Value::as_u64).unwrap_or(arrived);
            if let Err(e) = self.oi_sink.record(instrument, oi, ts).await {
                warn!("[distributor] open interest for {instrument} not recorded: {e}");
            }
        }
        Ok(())
    }

    /// Replace positions and open orders of every tracked currency from REST
    /// and publish one `sub_account_cache_updating` per currency. A failing
    /// currency does not stop the others; the first error is returned.
    pub async fn resync(&self) -> Result<()> {
        let mut first_err = None;
        for currency in self.ctx.currencies() {
            if let Err(e) = self.resync_currency(&currency).await {
                warn!("[distributor] resync {currency} failed: {e}");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn resync_currency(&self, currency: &str) -> Result<()> {
        let snapshot = self.ctx.rest.get_subaccounts_details(currency).await?;
        let my_trades = self.ctx.ledger.active_trades(currency).await?;
        let shard = self.caches.shard(currency);
        let mut cache = shard.lock().await;
        cache.positions = snapshot.positions.into_iter().map(|p| (p.instrument_name.clone(), p)).collect();
        let open_orders: Vec<_> = snapshot.open_orders.into_iter().filter(|o| !cache.is_stale(o)).collect();
        cache.orders = open_orders.into_iter().map(|o| (o.order_id.clone(), o)).collect();
        let update = SubAccountUpdate {
            currency: currency.to_string(),
            positions: cache.positions(),
            open_orders: cache.open_orders(),
            my_trades,
        };
        debug!(
            "[distributor] {currency} resync: {} positions, {} open orders",
            update.positions.len(),
            update.open_orders.len()
        );
        publish_json(self.ctx.bus.as_ref(), topics::SUB_ACCOUNT_CACHE_UPDATING, &update).await?;
        Ok(())
    }
}
