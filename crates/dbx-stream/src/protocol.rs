//! JSON-RPC 2.0 framing for the exchange WebSocket.
//!
//! Outbound: request builders for the handful of methods the session uses.
//! Inbound: [`classify`] sorts every frame by shape alone.
//!
//! | Shape                         | Meaning                 |
//! |-------------------------------|-------------------------|
//! | has `id`                      | reply to our request    |
//! | `method == "heartbeat"`       | heartbeat / test request|
//! | has `params.channel`          | subscription data       |

use serde::Deserialize;
use serde_json::{Value, json};

use dbx_core::error::DbxError;

/// Request ids. Each control request kind has a fixed id so replies can be
/// matched without a pending-request table.
pub mod ids {
    pub const AUTH: u64 = 9929;
    pub const REFRESH: u64 = 9930;
    pub const SET_HEARTBEAT: u64 = 9098;
    pub const SUBSCRIBE: u64 = 4235;
    pub const UNSUBSCRIBE: u64 = 4236;
    pub const TEST: u64 = 8212;
}

/// Serialize a JSON-RPC request.
pub fn request(id: u64, method: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }).to_string()
}

pub fn set_heartbeat(interval_secs: u64) -> String {
    request(ids::SET_HEARTBEAT, "public/set_heartbeat", json!({ "interval": interval_secs }))
}

/// Acknowledgement for a heartbeat `test_request`.
pub fn heartbeat_ack() -> String {
    request(ids::TEST, "public/test", json!({}))
}

pub fn subscribe(channels: &[String]) -> String {
    request(ids::SUBSCRIBE, "private/subscribe", json!({ "channels": channels }))
}

pub fn unsubscribe(channels: &[String]) -> String {
    request(ids::UNSUBSCRIBE, "private/unsubscribe", json!({ "channels": channels }))
}

/// Error object of a failed reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl From<RpcError> for DbxError {
    fn from(e: RpcError) -> Self {
        DbxError::Exchange { code: e.code, message: e.message }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reply { id: u64, outcome: Result<Value, RpcError> },
    /// `test_request` heartbeats must be answered with [`heartbeat_ack`].
    Heartbeat { test_request: bool },
    Data { channel: String, data: Value },
    /// Well-formed JSON of no known shape.
    Unknown,
}

#[derive(Deserialize)]
struct Frame {
    id: Option<u64>,
    method: Option<String>,
    params: Option<Value>,
    result: Option<Value>,
    error: Option<RpcError>,
}

/// Classify one text frame.
pub fn classify(text: &str) -> Result<Inbound, DbxError> {
    let frame: Frame = serde_json::from_str(text)?;

    if let Some(id) = frame.id {
        let outcome = match (frame.error, frame.result) {
            (Some(err), _) => Err(err),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        };
        return Ok(Inbound::Reply { id, outcome });
    }

    if frame.method.as_deref() == Some("heartbeat") {
        let test_request = frame
            .params
            .as_ref()
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
            .is_some_and(|t| t == "test_request");
        return Ok(Inbound::Heartbeat { test_request });
    }

    if let Some(mut params) = frame.params {
        let channel = params.get("channel").and_then(Value::as_str).map(str::to_string);
        return match channel {
            Some(channel) => Ok(Inbound::Data { channel, data: params["data"].take() }),
            None => Err(DbxError::Parse("notification without params.channel".into())),
        };
    }

    Ok(Inbound::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_with_result() {
        let text = r#"{"jsonrpc":"2.0","id":9929,"result":{"access_token":"a"},"usIn":1}"#;
        match classify(text).unwrap() {
            Inbound::Reply { id, outcome } => {
                assert_eq!(id, ids::AUTH);
                assert_eq!(outcome.unwrap()["access_token"], "a");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reply_with_error() {
        let text = r#"{"jsonrpc":"2.0","id":9929,"error":{"code":13004,"message":"invalid_credentials"}}"#;
        let Inbound::Reply { outcome, .. } = classify(text).unwrap() else { panic!() };
        let err = outcome.unwrap_err();
        assert_eq!(err.code, 13004);
        assert!(matches!(DbxError::from(err), DbxError::Exchange { code: 13004, .. }));
    }

    #[test]
    fn heartbeat_kinds() {
        let test = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"test_request"}}"#;
        assert_eq!(classify(test).unwrap(), Inbound::Heartbeat { test_request: true });
        let plain = r#"{"jsonrpc":"2.0","method":"heartbeat","params":{"type":"heartbeat"}}"#;
        assert_eq!(classify(plain).unwrap(), Inbound::Heartbeat { test_request: false });
    }

    #[test]
    fn subscription_data() {
        let text = r#"{"jsonrpc":"2.0","method":"subscription","params":{"channel":"user.portfolio.btc","data":{"equity":1.5}}}"#;
        let Inbound::Data { channel, data } = classify(text).unwrap() else { panic!() };
        assert_eq!(channel, "user.portfolio.btc");
        assert_eq!(data["equity"], 1.5);
    }

    #[test]
    fn malformed_frames() {
        assert!(classify("not json").is_err());
        assert!(classify(r#"{"method":"subscription","params":{"data":1}}"#).is_err());
        assert_eq!(classify(r#"{"jsonrpc":"2.0"}"#).unwrap(), Inbound::Unknown);
    }

    #[test]
    fn request_shapes() {
        let v: Value = serde_json::from_str(&subscribe(&["user.trades.any.any.raw".into()])).unwrap();
        assert_eq!(v["method"], "private/subscribe");
        assert_eq!(v["id"], ids::SUBSCRIBE);
        assert_eq!(v["params"]["channels"][0], "user.trades.any.any.raw");
        let v: Value = serde_json::from_str(&set_heartbeat(30)).unwrap();
        assert_eq!(v["params"]["interval"], 30);
    }
}
