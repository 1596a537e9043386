//! Open-interest hand-off to the OHLC table updater.

use async_trait::async_trait;

/// Receives the open interest of perpetual instruments as tickers arrive.
#[async_trait]
pub trait OpenInterestSink: Send + Sync {
    async fn record(&self, instrument: &str, open_interest: f64, timestamp: u64) -> anyhow::Result<()>;
}

/// Discards everything.
pub struct NoopSink;

#[async_trait]
impl OpenInterestSink for NoopSink {
    async fn record(&self, _instrument: &str, _open_interest: f64, _timestamp: u64) -> anyhow::Result<()> {
        Ok(())
    }
}
