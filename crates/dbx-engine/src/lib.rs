//! # dbx-engine
//!
//! Everything between the durable stream and the strategies:
//!
//! - [`distributor`]: drains the stream, owns the caches, republishes snapshots
//! - [`reconciler`]: ledger vs. exchange position check and order-allowed gate
//! - [`rest`] / [`deribit`]: exchange REST capability and its HTTP client
//! - [`translate`]: exchange payload shapes to domain records
//! - [`cache`]: per-currency cache shards and published snapshot payloads
//! - [`context`]: the shared handles every component is built from

pub mod cache;
pub mod context;
pub mod deribit;
pub mod distributor;
pub mod error;
pub mod reconciler;
pub mod rest;
pub mod sink;
pub mod translate;

pub use context::CoreContext;
pub use deribit::DeribitRest;
pub use distributor::{BatchStats, Distributor};
pub use error::EngineError;
pub use reconciler::{HealReport, Reconciler};
pub use rest::{ExchangeRest, OrderParams};
pub use sink::{NoopSink, OpenInterestSink};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use ahash::AHashMap;
    use async_trait::async_trait;
    use dbx_core::bus::{Bus, MemoryBus};
    use dbx_core::config::{AppConfig, UniverseConfig};
    use dbx_core::error::DbxError;
    use dbx_core::{
        InstrumentKind, Label, OrderRecord, OrderType, Position, Side, SubAccountSnapshot, TradeRecord, currency_of,
    };
    use dbx_ledger::Ledger;
    use rust_decimal::Decimal;

    use crate::context::CoreContext;
    use crate::rest::{ExchangeRest, OrderParams};

    /// Scripted exchange.
    #[derive(Default)]
    pub struct FakeRest {
        positions: Mutex<AHashMap<String, Vec<Position>>>,
        log: Mutex<Vec<TradeRecord>>,
        pub fail_details: AtomicBool,
        pub fail_log: AtomicBool,
        pub log_calls: AtomicUsize,
    }

    impl FakeRest {
        pub fn set_position(&self, instrument: &str, size: Decimal) {
            let currency = currency_of(instrument);
            let position = Position { instrument_name: instrument.to_string(), size, currency: currency.clone() };
            let mut positions = self.positions.lock().unwrap();
            let list = positions.entry(currency).or_default();
            list.retain(|p| p.instrument_name != instrument);
            list.push(position);
        }

        pub fn push_log(&self, trade: TradeRecord) {
            self.log.lock().unwrap().push(trade);
        }
    }

    #[async_trait]
    impl ExchangeRest for FakeRest {
        async fn get_subaccounts_details(&self, currency: &str) -> Result<SubAccountSnapshot, DbxError> {
            if self.fail_details.load(Ordering::SeqCst) {
                return Err(DbxError::Rest("exchange unreachable".into()));
            }
            let positions = self.positions.lock().unwrap().get(currency).cloned().unwrap_or_default();
            Ok(SubAccountSnapshot { currency: currency.to_string(), positions, open_orders: vec![] })
        }

        async fn get_transaction_log(
            &self,
            currency: &str,
            start_ts: u64,
            _count: u32,
            _query: Option<&str>,
        ) -> Result<Vec<TradeRecord>, DbxError> {
            self.log_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_log.load(Ordering::SeqCst) {
                return Err(DbxError::Rest("transaction log timed out".into()));
            }
            let log = self.log.lock().unwrap();
            Ok(log.iter().filter(|t| t.currency() == currency && t.timestamp >= start_ts).cloned().collect())
        }

        async fn place_order(&self, _params: &OrderParams) -> Result<OrderRecord, DbxError> {
            Err(DbxError::Rest("not scripted".into()))
        }

        async fn cancel_order(&self, _order_id: &str) -> Result<OrderRecord, DbxError> {
            Err(DbxError::Rest("not scripted".into()))
        }

        async fn get_open_orders(
            &self,
            _kind: Option<InstrumentKind>,
            _order_type: Option<OrderType>,
        ) -> Result<Vec<OrderRecord>, DbxError> {
            Ok(vec![])
        }
    }

    pub fn config() -> AppConfig {
        AppConfig {
            exchange: Default::default(),
            universe: UniverseConfig {
                currencies: vec!["BTC".into(), "ETH".into()],
                instruments: vec!["BTC-PERPETUAL".into(), "ETH-PERPETUAL".into()],
                chart_instruments: vec![],
                chart_resolutions: vec![],
            },
            bus: Default::default(),
            ledger: Default::default(),
            distributor: Default::default(),
            reconciler: Default::default(),
            log: Default::default(),
        }
    }

    /// In-memory bus (with the consumer group created), in-memory ledger.
    pub async fn context(rest: Arc<FakeRest>) -> (Arc<CoreContext>, Arc<MemoryBus>) {
        let config = config();
        let bus = Arc::new(MemoryBus::new());
        bus.ensure_group(&config.bus.stream, &config.bus.group).await.unwrap();
        let ledger = Ledger::open_in_memory().unwrap();
        (CoreContext::new(config, bus.clone(), ledger, rest), bus)
    }

    pub fn trade(id: &str, instrument: &str, side: Side, amount: Decimal, ts: u64, label: &str) -> TradeRecord {
        TradeRecord {
            trade_id: id.to_string(),
            order_id: format!("o-{id}"),
            instrument_name: instrument.to_string(),
            side,
            amount,
            price: 60_000.0,
            timestamp: ts,
            user_seq: None,
            label: Some(label.parse::<Label>().unwrap()),
            is_open: true,
        }
    }
}
