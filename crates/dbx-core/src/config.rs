//! Configuration parsing for the DBX trading stack.
//!
//! Every component reads its settings from a single JSON config file. All
//! fields except the exchange credentials have defaults, so a minimal file
//! only needs the currency universe.
//!
//! # Example config
//!
//! ```json
//! {
//!   "exchange": { "client_id": "abc", "auth_mode": "client_signature" },
//!   "universe": {
//!     "currencies": ["BTC", "ETH"],
//!     "instruments": ["BTC-PERPETUAL", "ETH-PERPETUAL"],
//!     "chart_instruments": ["BTC-PERPETUAL"],
//!     "chart_resolutions": ["1", "5"]
//!   },
//!   "bus": { "backend": "redis", "redis_url": "redis://127.0.0.1/" },
//!   "ledger": { "path": "/var/lib/dbx/ledger.db" },
//!   "log": { "level": "info", "dir": "/var/log/dbx" }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::error::DbxError;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    pub universe: UniverseConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub distributor: DistributorConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl AppConfig {
    /// Reject configurations that would make a component misbehave at runtime.
    pub fn validate(&self) -> Result<(), DbxError> {
        if self.universe.currencies.is_empty() {
            return Err(DbxError::Config("universe.currencies must not be empty".into()));
        }
        if self.bus.max_len == 0 {
            return Err(DbxError::Config("bus.max_len must be positive".into()));
        }
        if self.exchange.backoff_base_ms > self.exchange.backoff_max_ms {
            return Err(DbxError::Config(format!(
                "exchange.backoff_base_ms ({}) exceeds backoff_max_ms ({})",
                self.exchange.backoff_base_ms, self.exchange.backoff_max_ms
            )));
        }
        if self.bus.outbound_buffer == 0 {
            return Err(DbxError::Config("bus.outbound_buffer must be positive".into()));
        }
        if self.bus.max_deliveries == 0 {
            return Err(DbxError::Config("bus.max_deliveries must be positive".into()));
        }
        Ok(())
    }
}

/// How the stream authenticates against `public/auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    ClientCredentials,
    ClientSignature,
}

/// Exchange endpoints, credentials, and session timing.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default = "default_ws_url")]
    pub ws_url: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Falls back to `DBX_CLIENT_ID` when absent.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Falls back to `DBX_CLIENT_SECRET` when absent.
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// Interval requested via `public/set_heartbeat`.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// Silence after which the exchange is presumed to be in maintenance.
    #[serde(default = "default_maintenance_threshold")]
    pub maintenance_threshold_secs: u64,
    /// Silence after which the transport is torn down and rebuilt.
    #[serde(default = "default_websocket_timeout")]
    pub websocket_timeout_secs: u64,
    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    /// How often the token expiry is checked.
    #[serde(default = "default_refresh_check")]
    pub refresh_check_secs: u64,
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
    /// Timeout for a single control request (auth, subscribe).
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Consecutive auth failures after which the stream gives up.
    #[serde(default = "default_max_auth_failures")]
    pub max_auth_failures: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            ws_url: default_ws_url(),
            rest_url: default_rest_url(),
            client_id: None,
            client_secret: None,
            auth_mode: AuthMode::default(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            maintenance_threshold_secs: default_maintenance_threshold(),
            websocket_timeout_secs: default_websocket_timeout(),
            refresh_margin_secs: default_refresh_margin(),
            refresh_check_secs: default_refresh_check(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            request_timeout_secs: default_request_timeout(),
            max_auth_failures: default_max_auth_failures(),
        }
    }
}

impl ExchangeConfig {
    /// Resolve credentials from the config, then from the environment.
    pub fn credentials(&self) -> Result<Credentials, DbxError> {
        let client_id = self
            .client_id
            .clone()
            .or_else(|| std::env::var("DBX_CLIENT_ID").ok())
            .ok_or_else(|| DbxError::Config("missing client_id (config or DBX_CLIENT_ID)".into()))?;
        let client_secret = self
            .client_secret
            .clone()
            .or_else(|| std::env::var("DBX_CLIENT_SECRET").ok())
            .ok_or_else(|| DbxError::Config("missing client_secret (config or DBX_CLIENT_SECRET)".into()))?;
        Ok(Credentials { client_id, client_secret, mode: self.auth_mode })
    }

    pub fn maintenance_threshold(&self) -> Duration {
        Duration::from_secs(self.maintenance_threshold_secs)
    }

    pub fn websocket_timeout(&self) -> Duration {
        Duration::from_secs(self.websocket_timeout_secs)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Resolved API credentials.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    pub mode: AuthMode,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("mode", &self.mode)
            .finish()
    }
}

/// The tracked instrument universe.
#[derive(Debug, Clone, Deserialize)]
pub struct UniverseConfig {
    /// Upper-case currency codes (e.g. `["BTC", "ETH"]`).
    pub currencies: Vec<String>,
    /// Instruments that get an `incremental_ticker` subscription.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Subset of instruments that also get chart subscriptions.
    #[serde(default)]
    pub chart_instruments: Vec<String>,
    /// Chart resolutions (exchange notation, e.g. `"1"`, `"60"`, `"1D"`).
    #[serde(default)]
    pub chart_resolutions: Vec<String>,
}

/// Which bus implementation to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BusBackend {
    #[default]
    Memory,
    Redis,
}

/// Pub/sub and durable stream settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: BusBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_stream_name")]
    pub stream: String,
    #[serde(default = "default_group")]
    pub group: String,
    #[serde(default = "default_consumer")]
    pub consumer: String,
    /// Approximate cap on stream length.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_block_ms")]
    pub block_ms: u64,
    /// Pending entries idle for this long are reclaimed.
    #[serde(default = "default_claim_idle_ms")]
    pub claim_idle_ms: u64,
    /// Deliveries after which an entry goes to the dead-letter stream.
    #[serde(default = "default_max_deliveries")]
    pub max_deliveries: u32,
    #[serde(default = "default_dead_letter")]
    pub dead_letter_stream: String,
    /// Append attempts before an inbound event is dropped with an alert.
    #[serde(default = "default_publish_retries")]
    pub publish_retries: u32,
    #[serde(default = "default_publish_retry_ms")]
    pub publish_retry_ms: u64,
    /// Events buffered between the receive loop and the stream append task.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            redis_url: default_redis_url(),
            stream: default_stream_name(),
            group: default_group(),
            consumer: default_consumer(),
            max_len: default_max_len(),
            batch: default_batch(),
            block_ms: default_block_ms(),
            claim_idle_ms: default_claim_idle_ms(),
            max_deliveries: default_max_deliveries(),
            dead_letter_stream: default_dead_letter(),
            publish_retries: default_publish_retries(),
            publish_retry_ms: default_publish_retry_ms(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

/// SQLite ledger settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Application-level retries on top of SQLite's busy timeout.
    #[serde(default = "default_busy_retries")]
    pub busy_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            busy_retries: default_busy_retries(),
        }
    }
}

/// Distributor timing.
#[derive(Debug, Clone, Deserialize)]
pub struct DistributorConfig {
    /// Periodic sub-account resync (0 disables).
    #[serde(default = "default_resync_secs")]
    pub resync_interval_secs: u64,
    /// How often stale pending entries are reclaimed.
    #[serde(default = "default_claim_interval_secs")]
    pub claim_interval_secs: u64,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            resync_interval_secs: default_resync_secs(),
            claim_interval_secs: default_claim_interval_secs(),
        }
    }
}

/// Reconciler timing and transaction-log window.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcilerConfig {
    #[serde(default = "default_reconcile_secs")]
    pub interval_secs: u64,
    /// Minimum spacing between event-triggered passes.
    #[serde(default = "default_min_pass_spacing_ms")]
    pub min_pass_spacing_ms: u64,
    /// Subtracted from the oldest local trade timestamp when fetching the log.
    #[serde(default = "default_lookback_margin_ms")]
    pub lookback_margin_ms: u64,
    /// Window used when the ledger has no trades for an instrument.
    #[serde(default = "default_lookback_ms")]
    pub default_lookback_ms: u64,
    #[serde(default = "default_txlog_count")]
    pub txlog_count: u32,
    /// Minimum spacing between transaction log fetches for a persistent mismatch.
    #[serde(default = "default_heal_spacing_ms")]
    pub heal_spacing_ms: u64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_secs(),
            min_pass_spacing_ms: default_min_pass_spacing_ms(),
            lookback_margin_ms: default_lookback_margin_ms(),
            default_lookback_ms: default_lookback_ms(),
            txlog_count: default_txlog_count(),
            heal_spacing_ms: default_heal_spacing_ms(),
        }
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_module_name")]
    pub module_name: String,
    /// Write JSON lines to the log file instead of plain text.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), dir: None, module_name: default_module_name(), json: false }
    }
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_ws_url() -> String {
    "wss://www.deribit.com/ws/api/v2".into()
}

fn default_rest_url() -> String {
    "https://www.deribit.com/api/v2".into()
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_maintenance_threshold() -> u64 {
    900
}

fn default_websocket_timeout() -> u64 {
    120
}

fn default_refresh_margin() -> u64 {
    240
}

fn default_refresh_check() -> u64 {
    30
}

fn default_backoff_base() -> u64 {
    5_000
}

fn default_backoff_max() -> u64 {
    300_000
}

fn default_request_timeout() -> u64 {
    10
}

fn default_max_auth_failures() -> u32 {
    5
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/".into()
}

fn default_stream_name() -> String {
    "stream:exchange_events".into()
}

fn default_group() -> String {
    "distributor".into()
}

fn default_consumer() -> String {
    "distributor-1".into()
}

fn default_max_len() -> usize {
    10_000
}

fn default_batch() -> usize {
    100
}

fn default_block_ms() -> u64 {
    1_000
}

fn default_claim_idle_ms() -> u64 {
    30_000
}

fn default_max_deliveries() -> u32 {
    5
}

fn default_dead_letter() -> String {
    "stream:exchange_events:dead".into()
}

fn default_publish_retries() -> u32 {
    10
}

fn default_publish_retry_ms() -> u64 {
    200
}

fn default_outbound_buffer() -> usize {
    4_096
}

fn default_ledger_path() -> String {
    "dbx_ledger.db".into()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_busy_retries() -> u32 {
    3
}

fn default_resync_secs() -> u64 {
    300
}

fn default_claim_interval_secs() -> u64 {
    15
}

fn default_reconcile_secs() -> u64 {
    15
}

fn default_min_pass_spacing_ms() -> u64 {
    2_000
}

fn default_lookback_margin_ms() -> u64 {
    60_000
}

fn default_lookback_ms() -> u64 {
    7 * 24 * 3_600_000
}

fn default_heal_spacing_ms() -> u64 {
    30_000
}

fn default_txlog_count() -> u32 {
    1_000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_module_name() -> String {
    "dbx".into()
}

/// Load and parse a JSON config file, then validate it.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let cfg: AppConfig = serde_json::from_str(r#"{"universe":{"currencies":["BTC"]}}"#).unwrap();
        assert_eq!(cfg.exchange.maintenance_threshold_secs, 900);
        assert_eq!(cfg.bus.max_len, 10_000);
        assert_eq!(cfg.bus.backend, BusBackend::Memory);
        assert_eq!(cfg.exchange.auth_mode, AuthMode::ClientCredentials);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn rejects_empty_universe() {
        let cfg: AppConfig = serde_json::from_str(r#"{"universe":{"currencies":[]}}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_inverted_backoff() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"universe":{"currencies":["ETH"]},"exchange":{"backoff_base_ms":10,"backoff_max_ms":5}}"#,
        )
        .unwrap();
        assert!(matches!(cfg.validate(), Err(DbxError::Config(_))));
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let cfg: ExchangeConfig =
            serde_json::from_str(r#"{"client_id":"id","client_secret":"hunter2"}"#).unwrap();
        let creds = cfg.credentials().unwrap();
        assert!(!format!("{creds:?}").contains("hunter2"));
    }
}
