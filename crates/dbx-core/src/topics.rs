//! Pub/sub topic names. Strategy consumers subscribe by these exact strings.

pub const PORTFOLIO: &str = "portfolio";
pub const SUB_ACCOUNT_CACHE_UPDATING: &str = "sub_account_cache_updating";
pub const MY_TRADE_RECEIVING: &str = "my_trade_receiving";
pub const MY_TRADES_CACHE_UPDATING: &str = "my_trades_cache_updating";
pub const ORDER_CACHE_UPDATING: &str = "order_cache_updating";
pub const TICKER_CACHE_UPDATING: &str = "ticker_cache_updating";
pub const CHART_LOW_HIGH_TICK: &str = "chart_low_high_tick";
pub const ORDER_IS_ALLOWED: &str = "order_is_allowed";
/// Ledger-changed signal.
pub const SQLITE_RECORD_UPDATING: &str = "sqlite_record_updating";
pub const SYSTEM_STATUS: &str = "system_status";
pub const SYSTEM_ALERTS: &str = "system_alerts";
