//! Typed error definitions for the DBX trading stack.
//!
//! Provides [`DbxError`] for domain-specific errors that are more informative
//! than plain `anyhow::Error` strings. All variants implement `std::error::Error`
//! via `thiserror`, so they integrate seamlessly with `anyhow::Result`.

use thiserror::Error;

/// Domain-specific errors for the DBX trading stack.
#[derive(Debug, Error)]
pub enum DbxError {
    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Authentication rejected or token refresh failed.
    #[error("auth error: {0}")]
    Auth(String),

    /// Exchange message or response parsing error.
    #[error("parse error: {0}")]
    Parse(String),

    /// JSON-RPC error returned by the exchange.
    #[error("exchange error {code}: {message}")]
    Exchange { code: i64, message: String },

    /// REST transport error (timeouts, HTTP status).
    #[error("rest error: {0}")]
    Rest(String),
}

impl DbxError {
    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::WebSocket(_) | Self::Rest(_))
    }
}

impl From<serde_json::Error> for DbxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
