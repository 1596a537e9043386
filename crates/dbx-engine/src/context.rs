//! Shared handles built once at start-up.

use std::sync::Arc;

use dbx_core::bus::Bus;
use dbx_core::config::AppConfig;
use dbx_ledger::Ledger;

use crate::rest::ExchangeRest;

/// Everything a component needs from its surroundings. Built by the runner,
/// or by a test with in-memory backends.
pub struct CoreContext {
    pub config: AppConfig,
    pub bus: Arc<dyn Bus>,
    pub ledger: Ledger,
    pub rest: Arc<dyn ExchangeRest>,
}

impl CoreContext {
    pub fn new(config: AppConfig, bus: Arc<dyn Bus>, ledger: Ledger, rest: Arc<dyn ExchangeRest>) -> Arc<Self> {
        Arc::new(Self { config, bus, ledger, rest })
    }

    /// Tracked currencies, upper-case.
    pub fn currencies(&self) -> Vec<String> {
        self.config.universe.currencies.iter().map(|c| c.to_uppercase()).collect()
    }

    /// Configured instruments settled in `currency`.
    pub fn instruments_of(&self, currency: &str) -> Vec<String> {
        self.config
            .universe
            .instruments
            .iter()
            .filter(|i| dbx_core::currency_of(i) == currency.to_uppercase())
            .cloned()
            .collect()
    }
}
