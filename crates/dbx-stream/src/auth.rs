//! `public/auth` grants and access-token lifetime.
//!
//! Three grants are supported:
//!
//! 1. **client_credentials**: client id and secret in the clear (TLS only).
//! 2. **client_signature**: HMAC-SHA256 over `"{timestamp}\n{nonce}\n{data}"`
//!    keyed by the client secret, hex encoded. The secret never leaves the
//!    process.
//! 3. **refresh_token**: renews a session without the secret.

use std::time::Duration;

use dbx_core::config::{AuthMode, Credentials};
use dbx_core::error::DbxError;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::json;
use sha2::Sha256;
use tokio::time::Instant;

use crate::protocol::{ids, request};

type HmacSha256 = Hmac<Sha256>;

/// Lower-case hex HMAC-SHA256 of `message` under `secret`.
pub fn hmac_sha256_hex(secret: &str, message: &str) -> Result<String, DbxError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|e| DbxError::Auth(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Build the initial `public/auth` request for `creds`.
pub fn auth_request(creds: &Credentials, timestamp_ms: u64) -> Result<String, DbxError> {
    let params = match creds.mode {
        AuthMode::ClientCredentials => json!({
            "grant_type": "client_credentials",
            "client_id": creds.client_id,
            "client_secret": creds.client_secret,
        }),
        AuthMode::ClientSignature => {
            let nonce = uuid::Uuid::new_v4().simple().to_string();
            let data = "";
            let signature = hmac_sha256_hex(&creds.client_secret, &format!("{timestamp_ms}\n{nonce}\n{data}"))?;
            json!({
                "grant_type": "client_signature",
                "client_id": creds.client_id,
                "timestamp": timestamp_ms,
                "nonce": nonce,
                "data": data,
                "signature": signature,
            })
        }
    };
    Ok(request(ids::AUTH, "public/auth", params))
}

pub fn refresh_request(refresh_token: &str) -> String {
    request(ids::REFRESH, "public/auth", json!({ "grant_type": "refresh_token", "refresh_token": refresh_token }))
}

/// `result` of a successful `public/auth`.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResult {
    pub access_token: String,
    pub refresh_token: String,
    /// Seconds until the access token expires.
    pub expires_in: u64,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Current tokens and when to renew them.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub access_token: String,
    pub refresh_token: String,
    refresh_at: Instant,
}

impl TokenState {
    /// Renewal is due `margin` before the reported expiry.
    pub fn new(result: AuthResult, margin: Duration, now: Instant) -> Self {
        let lifetime = Duration::from_secs(result.expires_in).saturating_sub(margin);
        Self { access_token: result.access_token, refresh_token: result.refresh_token, refresh_at: now + lifetime }
    }

    pub fn needs_refresh(&self, now: Instant) -> bool {
        now >= self.refresh_at
    }

    pub fn refresh_at(&self) -> Instant {
        self.refresh_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn creds(mode: AuthMode) -> Credentials {
        Credentials { client_id: "id".into(), client_secret: "secret".into(), mode }
    }

    #[test]
    fn hmac_is_hex_sha256() {
        let sig = hmac_sha256_hex("secret", "1\nabc\n").unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(sig, hmac_sha256_hex("secret", "1\nabc\n").unwrap());
        assert_ne!(sig, hmac_sha256_hex("other", "1\nabc\n").unwrap());
    }

    #[test]
    fn credentials_grant() {
        let v: Value = serde_json::from_str(&auth_request(&creds(AuthMode::ClientCredentials), 5).unwrap()).unwrap();
        assert_eq!(v["params"]["grant_type"], "client_credentials");
        assert_eq!(v["params"]["client_secret"], "secret");
    }

    #[test]
    fn signature_grant_signs_timestamp_and_nonce() {
        let request = auth_request(&creds(AuthMode::ClientSignature), 1_700_000_000_000).unwrap();
        let v: Value = serde_json::from_str(&request).unwrap();
        let p = &v["params"];
        assert_eq!(p["grant_type"], "client_signature");
        assert!(p.get("client_secret").is_none());
        let nonce = p["nonce"].as_str().unwrap();
        let expected = hmac_sha256_hex("secret", &format!("1700000000000\n{nonce}\n")).unwrap();
        assert_eq!(p["signature"], expected);
    }

    #[test]
    fn refresh_due_after_margin() {
        let now = Instant::now();
        let result = AuthResult { access_token: "a".into(), refresh_token: "r".into(), expires_in: 900, scope: None };
        let token = TokenState::new(result, Duration::from_secs(240), now);
        assert!(!token.needs_refresh(now + Duration::from_secs(659)));
        assert!(token.needs_refresh(now + Duration::from_secs(660)));
    }

    #[test]
    fn margin_larger_than_lifetime_refreshes_immediately() {
        let now = Instant::now();
        let result = AuthResult { access_token: "a".into(), refresh_token: "r".into(), expires_in: 60, scope: None };
        assert!(TokenState::new(result, Duration::from_secs(240), now).needs_refresh(now));
    }
}
