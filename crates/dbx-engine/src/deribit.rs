//! Deribit REST client (JSON-RPC over HTTP).
//!
//! Every call is `POST {rest_url}/{method}` with a JSON-RPC 2.0 body. Private
//! methods carry a bearer token obtained through `public/auth`
//! (`client_credentials` grant) and renewed shortly before it expires.
//!
//! | Operation                  | Method                            |
//! |----------------------------|-----------------------------------|
//! | Authenticate               | `public/auth`                     |
//! | Sub-account details        | `private/get_subaccounts_details` |
//! | Transaction log            | `private/get_transaction_log`     |
//! | Place order                | `private/buy` / `private/sell`    |
//! | Cancel order               | `private/cancel`                  |
//! | Open orders                | `private/get_open_orders`         |

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dbx_core::config::{Credentials, ExchangeConfig};
use dbx_core::error::DbxError;
use dbx_core::time_util::now_ms;
use dbx_core::{InstrumentKind, OrderRecord, OrderType, Side, SubAccountSnapshot, TradeRecord};
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rest::{ExchangeRest, OrderParams};
use crate::translate;

/// Upper bound on continuation pages followed by one transaction-log fetch.
const MAX_LOG_PAGES: usize = 50;

/// Error codes after which the cached token is discarded.
const TOKEN_ERROR_CODES: [i64; 3] = [13004, 13009, 13010];

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct AuthResult {
    access_token: String,
    expires_in: u64,
}

struct Token {
    access_token: String,
    refresh_at: Instant,
}

pub struct DeribitRest {
    http: reqwest::Client,
    base_url: String,
    credentials: Credentials,
    timeout: Duration,
    refresh_margin: Duration,
    token: Mutex<Option<Token>>,
    next_id: AtomicU64,
}

impl DeribitRest {
    /// Client for `config.rest_url`. No request is sent until first use.
    pub fn new(config: &ExchangeConfig) -> Result<Self, DbxError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base_url: config.rest_url.trim_end_matches('/').to_string(),
            credentials: config.credentials()?,
            timeout: config.request_timeout(),
            refresh_margin: Duration::from_secs(config.refresh_margin_secs),
            token: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    fn body(&self, method: &str, params: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        })
    }

    async fn send(&self, method: &str, params: Value, bearer: Option<&str>) -> Result<Value, DbxError> {
        let url = format!("{}/{method}", self.base_url);
        let mut req = self.http.post(&url).timeout(self.timeout).json(&self.body(method, params));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| DbxError::Rest(format!("{method}: {e}")))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| DbxError::Rest(format!("{method}: {e}")))?;
        // RPC errors arrive with a 4xx status and a JSON body.
        let parsed: RpcResponse = serde_json::from_str(&text)
            .map_err(|_| {
                DbxError::Rest(format!("{method}: HTTP {status}: {}", text.chars().take(200).collect::<String>()))
            })?;
        match (parsed.result, parsed.error) {
            (_, Some(err)) => Err(DbxError::Exchange { code: err.code, message: err.message }),
            (Some(result), None) => Ok(result),
            (None, None) => Err(DbxError::Parse(format!("{method}: response without result"))),
        }
    }

    async fn access_token(&self) -> Result<String, DbxError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| Instant::now() < t.refresh_at) {
            return Ok(token.access_token.clone());
        }
        let params = json!({
            "grant_type": "client_credentials",
            "client_id": self.credentials.client_id,
            "client_secret": self.credentials.client_secret,
        });
        let result = self.send("public/auth", params, None).await.map_err(|e| match e {
            DbxError::Exchange { code, message } => DbxError::Auth(format!("{code}: {message}")),
            other => other,
        })?;
        let auth: AuthResult = serde_json::from_value(result)?;
        let lifetime = Duration::from_secs(auth.expires_in).saturating_sub(self.refresh_margin);
        info!("[rest] authenticated, token valid for {}s", auth.expires_in);
        let access_token = auth.access_token.clone();
        *guard = Some(Token { access_token: auth.access_token, refresh_at: Instant::now() + lifetime });
        Ok(access_token)
    }

    /// Call a private method, dropping the cached token when the exchange
    /// rejects it so the next call authenticates again.
    async fn private(&self, method: &str, params: Value) -> Result<Value, DbxError> {
        let token = self.access_token().await?;
        debug!("[rest] {method} {params}");
        let outcome = self.send(method, params, Some(&token)).await;
        if let Err(DbxError::Exchange { code, .. }) = &outcome {
            if TOKEN_ERROR_CODES.contains(code) {
                warn!("[rest] {method}: token rejected ({code}), re-authenticating on next call");
                *self.token.lock().await = None;
            }
        }
        outcome
    }
}

fn order_params(params: &OrderParams) -> Value {
    let mut p = Map::new();
    p.insert("instrument_name".into(), json!(params.instrument_name));
    p.insert("amount".into(), json!(params.amount.to_f64().unwrap_or_default()));
    p.insert("type".into(), json!(params.order_type.as_str()));
    if let Some(price) = params.price.filter(|_| params.order_type != OrderType::Market) {
        p.insert("price".into(), json!(price));
    }
    if let Some(label) = &params.label {
        p.insert("label".into(), json!(label.to_string()));
    }
    if params.reduce_only {
        p.insert("reduce_only".into(), json!(true));
    }
    if params.post_only {
        p.insert("post_only".into(), json!(true));
    }
    Value::Object(p)
}

#[async_trait]
impl ExchangeRest for DeribitRest {
    async fn get_subaccounts_details(&self, currency: &str) -> Result<SubAccountSnapshot, DbxError> {
        let result = self
            .private(
                "private/get_subaccounts_details",
                json!({ "currency": currency.to_uppercase(), "with_open_orders": true }),
            )
            .await?;
        translate::subaccounts(currency, &result)
    }

    async fn get_transaction_log(
        &self,
        currency: &str,
        start_ts: u64,
        count: u32,
        query: Option<&str>,
    ) -> Result<Vec<TradeRecord>, DbxError> {
        let end_ts = now_ms();
        let mut trades = Vec::new();
        let mut continuation: Option<u64> = None;
        for page in 0..MAX_LOG_PAGES {
            let mut params = json!({
                "currency": currency.to_uppercase(),
                "start_timestamp": start_ts,
                "end_timestamp": end_ts,
                "count": count,
            });
            if let Some(q) = query {
                params["query"] = json!(q);
            }
            if let Some(c) = continuation {
                params["continuation"] = json!(c);
            }
            let result = self.private("private/get_transaction_log", params).await?;
            let page_data = translate::transaction_log(&result)?;
            trades.extend(page_data.trades);
            continuation = page_data.continuation;
            if continuation.is_none() {
                break;
            }
            if page + 1 == MAX_LOG_PAGES {
                warn!("[rest] transaction log for {currency} truncated after {MAX_LOG_PAGES} pages");
            }
        }
        debug!("[rest] transaction log {currency} from {start_ts}: {} trades", trades.len());
        Ok(trades)
    }

    async fn place_order(&self, params: &OrderParams) -> Result<OrderRecord, DbxError> {
        let method = match params.side {
            Side::Buy => "private/buy",
            Side::Sell => "private/sell",
        };
        let result = self.private(method, order_params(params)).await?;
        let order = result.get("order").ok_or_else(|| DbxError::Parse(format!("{method}: response without order")))?;
        translate::order(order)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderRecord, DbxError> {
        let result = self.private("private/cancel", json!({ "order_id": order_id })).await?;
        translate::order(&result)
    }

    async fn get_open_orders(
        &self,
        kind: Option<InstrumentKind>,
        order_type: Option<OrderType>,
    ) -> Result<Vec<OrderRecord>, DbxError> {
        let mut params = Map::new();
        if let Some(kind) = kind {
            params.insert("kind".into(), json!(kind.as_str()));
        }
        if let Some(order_type) = order_type {
            params.insert("type".into(), json!(order_type.as_str()));
        }
        let result = self.private("private/get_open_orders", Value::Object(params)).await?;
        translate::orders(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbx_core::config::AuthMode;
    use dbx_core::{Label, LabelStatus};
    use rust_decimal_macros::dec;

    fn config() -> ExchangeConfig {
        ExchangeConfig {
            rest_url: "https://test.deribit.com/api/v2/".into(),
            client_id: Some("id".into()),
            client_secret: Some("secret".into()),
            auth_mode: AuthMode::ClientCredentials,
            ..ExchangeConfig::default()
        }
    }

    #[test]
    fn request_ids_increase() {
        let rest = DeribitRest::new(&config()).unwrap();
        assert_eq!(rest.base_url, "https://test.deribit.com/api/v2");
        let a = rest.body("private/cancel", json!({"order_id": "1"}));
        let b = rest.body("private/cancel", json!({"order_id": "2"}));
        assert_eq!(a["jsonrpc"], "2.0");
        assert_eq!(a["method"], "private/cancel");
        assert_eq!(b["id"].as_u64(), a["id"].as_u64().map(|i| i + 1));
    }

    #[test]
    fn limit_order_params() {
        let params = OrderParams::limit("BTC-PERPETUAL", Side::Buy, dec!(10), 60_000.5)
            .with_label(Label::new("scalping", LabelStatus::Open, 7));
        let p = order_params(&params);
        assert_eq!(p["instrument_name"], "BTC-PERPETUAL");
        assert_eq!(p["amount"], 10.0);
        assert_eq!(p["type"], "limit");
        assert_eq!(p["price"], 60_000.5);
        assert_eq!(p["label"], "scalping-open-7");
        assert!(p.get("reduce_only").is_none());
    }

    #[test]
    fn market_order_omits_price() {
        let params = OrderParams { reduce_only: true, ..OrderParams::market("ETH-PERPETUAL", Side::Sell, dec!(1.5)) };
        let p = order_params(&params);
        assert_eq!(p["type"], "market");
        assert!(p.get("price").is_none());
        assert_eq!(p["amount"], 1.5);
        assert_eq!(p["reduce_only"], true);
    }

    #[test]
    fn missing_credentials_fail_construction() {
        let cfg = ExchangeConfig { client_id: None, client_secret: None, ..config() };
        // Only meaningful when the environment does not provide them either.
        if std::env::var("DBX_CLIENT_ID").is_err() {
            assert!(DeribitRest::new(&cfg).is_err());
        }
    }
}
