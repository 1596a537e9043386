//! WebSocket transport helpers for the exchange session.
//!
//! The session logic (auth, subscriptions, heartbeats, reconnect) lives in
//! `dbx-stream`; this module only opens the TLS transport and names the types.

use std::time::Duration;

use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::error::DbxError;

/// An open exchange WebSocket.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub use tokio_tungstenite::tungstenite::Message;

/// Establish a TLS WebSocket connection, failing after `timeout`.
pub async fn connect(url: &str, timeout: Duration) -> Result<WsStream, DbxError> {
    validate_url(url)?;
    match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)).await {
        Ok(Ok((stream, _response))) => Ok(stream),
        Ok(Err(e)) => Err(DbxError::WebSocket(format!("connect {url}: {e}"))),
        Err(_) => Err(DbxError::WebSocket(format!("connect {url}: timed out after {timeout:?}"))),
    }
}

/// Reject anything that is not a `ws://` or `wss://` URL with a host.
fn validate_url(url: &str) -> Result<(), DbxError> {
    let parsed = url::Url::parse(url).map_err(|e| DbxError::Config(format!("ws url {url}: {e}")))?;
    match (parsed.scheme(), parsed.host_str()) {
        ("ws" | "wss", Some(_)) => Ok(()),
        _ => Err(DbxError::Config(format!("ws url {url}: expected ws:// or wss:// with a host"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_validation() {
        assert!(validate_url("wss://www.deribit.com/ws/api/v2").is_ok());
        assert!(validate_url("https://www.deribit.com").is_err());
        assert!(validate_url("not a url").is_err());
    }
}
