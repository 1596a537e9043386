//! # dbx-core
//!
//! Core crate for the DBX derivatives trading stack, providing:
//!
//! - **Types** (`types`): trades, orders, positions, tickers, labels, channels
//! - **Configuration** (`config`): JSON config deserialization and validation
//! - **Error types** (`error`): domain-specific `DbxError` via thiserror
//! - **Bus** (`bus`): pub/sub topics + consumer-group durable stream
//! - **WebSocket** (`ws`): connect helper for the exchange session
//! - **Backoff** (`backoff`): capped exponential reconnect delays
//! - **Time utilities** (`time_util`): epoch timestamps
//! - **Logging** (`logging`): tracing-based structured logging

pub mod backoff;
pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod topics;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use types::*;
