//! The exchange session state machine.
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Subscribing -> Streaming
//!      ^                                                            |
//!      +----------------------- error / close / silence ------------+
//! ```
//!
//! Every drop rebuilds the session from scratch (connect, auth, subscribe)
//! after a capped exponential backoff. The heartbeat monitor outlives
//! sessions so maintenance is detected even while reconnect attempts fail.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use dbx_core::backoff::ExponentialBackoff;
use dbx_core::bus::Bus;
use dbx_core::config::{AppConfig, BusConfig, Credentials, ExchangeConfig};
use dbx_core::error::DbxError;
use dbx_core::time_util::now_ms;
use dbx_core::ws::{self, Message, WsStream};
use dbx_core::{StreamEvent, topics};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::auth::{self, AuthResult, TokenState};
use crate::forwarder::{Forwarder, Outbound, OutboundSender};
use crate::heartbeat::{HeartbeatAlert, HeartbeatMonitor};
use crate::protocol::{self, Inbound, ids};
use crate::subscriptions::channels_for;

type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// How often silence is checked while streaming.
const SILENCE_CHECK: Duration = Duration::from_secs(1);

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Subscribing,
    Streaming,
}

/// Why a session ended.
enum SessionEnd {
    Shutdown,
    Dropped { reason: String, authenticated: bool },
    AuthRejected(DbxError),
}

/// Failure of a control request.
enum CallError {
    Rejected(DbxError),
    Transport(String),
}

/// Owner of the single authenticated WebSocket session.
pub struct ExchangeStream {
    exchange: ExchangeConfig,
    bus_config: BusConfig,
    channels: Vec<String>,
    bus: Arc<dyn Bus>,
    state: watch::Sender<ConnectionState>,
    monitor: HeartbeatMonitor,
    backoff: ExponentialBackoff,
}

impl ExchangeStream {
    pub fn new(config: &AppConfig, bus: Arc<dyn Bus>) -> Self {
        let exchange = config.exchange.clone();
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            monitor: HeartbeatMonitor::new(exchange.maintenance_threshold(), Instant::now()),
            backoff: ExponentialBackoff::new(exchange.backoff_base(), exchange.backoff_max()),
            channels: channels_for(&config.universe),
            bus_config: config.bus.clone(),
            exchange,
            bus,
            state,
        }
    }

    /// Channels subscribed on every session.
    pub fn channels(&self) -> &[String] {
        &self.channels
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Run sessions until `shutdown` flips to `true`.
    ///
    /// Returns an error only when the stream gives up: missing credentials or
    /// too many consecutive authentication rejections. A `suspended` status is
    /// published on `system_status` first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (out, forwarder) = Forwarder::new(Arc::clone(&self.bus), &self.bus_config).spawn();
        let result = self.run_sessions(&out, &mut shutdown).await;
        self.set_state(ConnectionState::Disconnected);

        // Flush whatever the forwarder still buffers.
        drop(out);
        match forwarder.await {
            Ok(stats) => info!(
                "[stream] stopped: {} events appended, {} dropped, {} overflowed, {} status messages",
                stats.appended, stats.dropped, stats.overflowed, stats.published
            ),
            Err(e) => warn!("[stream] forwarder task failed: {e}"),
        }
        result
    }

    async fn run_sessions(&mut self, out: &OutboundSender, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let creds = match self.exchange.credentials() {
            Ok(c) => c,
            Err(e) => {
                self.suspend(out, &e.to_string());
                return Err(e).context("exchange stream cannot authenticate");
            }
        };

        let mut auth_failures = 0u32;
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }
            self.check_silence(out);

            self.set_state(ConnectionState::Connecting);
            let end = match ws::connect(&self.exchange.ws_url, self.exchange.request_timeout()).await {
                Ok(stream) => self.session(stream, &creds, out, shutdown).await,
                Err(e) => SessionEnd::Dropped { reason: e.to_string(), authenticated: false },
            };
            self.set_state(ConnectionState::Disconnected);

            match end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Dropped { reason, authenticated } => {
                    if authenticated {
                        auth_failures = 0;
                    }
                    warn!("[stream] session dropped: {reason}");
                }
                SessionEnd::AuthRejected(e) => {
                    auth_failures += 1;
                    error!(
                        "[stream] authentication rejected ({auth_failures}/{}): {e}",
                        self.exchange.max_auth_failures
                    );
                    if auth_failures >= self.exchange.max_auth_failures {
                        let reason = format!("{auth_failures} consecutive authentication failures: {e}");
                        self.suspend(out, &reason);
                        return Err(anyhow!(reason));
                    }
                }
            }

            let delay = self.backoff.next_delay();
            info!("[stream] reconnecting in {delay:?} (attempt {})", self.backoff.attempt());
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// One connection from handshake to drop.
    async fn session(
        &mut self,
        stream: WsStream,
        creds: &Credentials,
        out: &OutboundSender,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (mut write, mut read) = stream.split();
        info!("[stream] connected to {}", self.exchange.ws_url);

        // ---- authenticate ----
        self.set_state(ConnectionState::Authenticating);
        let auth_msg = match auth::auth_request(creds, now_ms()) {
            Ok(m) => m,
            Err(e) => return SessionEnd::AuthRejected(e),
        };
        let token = match self.call(&mut write, &mut read, out, auth_msg, ids::AUTH).await {
            Ok(result) => match serde_json::from_value::<AuthResult>(result) {
                Ok(r) => TokenState::new(r, self.refresh_margin(), Instant::now()),
                Err(e) => return SessionEnd::AuthRejected(e.into()),
            },
            Err(CallError::Rejected(e)) => return SessionEnd::AuthRejected(e),
            Err(CallError::Transport(reason)) => return SessionEnd::Dropped { reason, authenticated: false },
        };
        let refresh_in = token.refresh_at().saturating_duration_since(Instant::now());
        info!("[stream] authenticated, token refresh in {refresh_in:?}");

        // ---- heartbeat + subscribe ----
        let heartbeat = protocol::set_heartbeat(self.exchange.heartbeat_interval_secs);
        if let Err(e) = self.call(&mut write, &mut read, out, heartbeat, ids::SET_HEARTBEAT).await {
            return Self::dropped_after_auth("set_heartbeat", e);
        }

        self.set_state(ConnectionState::Subscribing);
        let subscribe = protocol::subscribe(&self.channels);
        match self.call(&mut write, &mut read, out, subscribe, ids::SUBSCRIBE).await {
            Ok(Value::Array(accepted)) if accepted.len() < self.channels.len() => warn!(
                "[stream] exchange accepted {} of {} channels",
                accepted.len(),
                self.channels.len()
            ),
            Ok(_) => info!("[stream] subscribed to {} channels", self.channels.len()),
            Err(e) => return Self::dropped_after_auth("subscribe", e),
        }

        self.set_state(ConnectionState::Streaming);
        self.backoff.reset();
        self.status(out, json!({ "status": "streaming", "timestamp": now_ms() }));

        self.stream_loop(write, read, token, out, shutdown).await
    }

    fn dropped_after_auth(step: &str, e: CallError) -> SessionEnd {
        let reason = match e {
            CallError::Rejected(e) => format!("{step} rejected: {e}"),
            CallError::Transport(r) => format!("{step}: {r}"),
        };
        SessionEnd::Dropped { reason, authenticated: true }
    }

    async fn stream_loop(
        &mut self,
        mut write: WsWrite,
        mut read: WsRead,
        mut token: TokenState,
        out: &OutboundSender,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let ws_timeout = self.exchange.websocket_timeout();
        let mut refresh_check = tokio::time::interval(Duration::from_secs(self.exchange.refresh_check_secs.max(1)));
        refresh_check.tick().await;
        let mut silence_check = tokio::time::interval(SILENCE_CHECK);
        let mut last_frame = Instant::now();
        let dropped = |reason: String| SessionEnd::Dropped { reason, authenticated: true };

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("[stream] shutdown requested, closing session");
                        let _ = write.send(Message::text(protocol::unsubscribe(&self.channels))).await;
                        let _ = write.send(Message::Close(None)).await;
                        return SessionEnd::Shutdown;
                    }
                }

                _ = refresh_check.tick() => {
                    if token.needs_refresh(Instant::now()) {
                        debug!("[stream] refreshing access token");
                        if let Err(e) = write.send(Message::text(auth::refresh_request(&token.refresh_token))).await {
                            return dropped(format!("send refresh: {e}"));
                        }
                    }
                }

                _ = silence_check.tick() => {
                    let now = Instant::now();
                    if let Some(alert) = self.monitor.poll(now) {
                        self.alert(out, alert);
                    }
                    let silent_for = now.saturating_duration_since(last_frame);
                    if silent_for >= ws_timeout {
                        let _ = write.send(Message::Close(None)).await;
                        return dropped(format!("no frame for {silent_for:?}"));
                    }
                }

                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_frame = Instant::now();
                        match self.on_text(text.as_str(), out) {
                            Some(Inbound::Heartbeat { test_request: true }) => {
                                if let Err(e) = write.send(Message::text(protocol::heartbeat_ack())).await {
                                    return dropped(format!("heartbeat ack: {e}"));
                                }
                            }
                            Some(Inbound::Reply { id: ids::REFRESH, outcome }) => {
                                let refreshed = outcome
                                    .map_err(DbxError::from)
                                    .and_then(|v| serde_json::from_value::<AuthResult>(v).map_err(DbxError::from));
                                match refreshed {
                                    Ok(r) => {
                                        token = TokenState::new(r, self.refresh_margin(), Instant::now());
                                        info!("[stream] access token refreshed");
                                    }
                                    Err(e) => warn!("[stream] token refresh failed: {e}"),
                                }
                            }
                            Some(Inbound::Reply { id, outcome: Err(e) }) => {
                                warn!("[stream] request {id} failed: {} {}", e.code, e.message);
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_frame = Instant::now();
                        self.touch(out);
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            return dropped(format!("pong: {e}"));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => return dropped(format!("closed by exchange: {frame:?}")),
                    Some(Ok(_)) => {
                        last_frame = Instant::now();
                        self.touch(out);
                    }
                    Some(Err(e)) => return dropped(e.to_string()),
                    None => return dropped("stream ended".into()),
                },
            }
        }
    }

    /// Send a control request and wait for its reply, forwarding any data and
    /// answering heartbeats that arrive first.
    async fn call(
        &mut self,
        write: &mut WsWrite,
        read: &mut WsRead,
        out: &OutboundSender,
        request: String,
        id: u64,
    ) -> Result<Value, CallError> {
        write.send(Message::text(request)).await.map_err(|e| CallError::Transport(e.to_string()))?;
        let deadline = Instant::now() + self.exchange.request_timeout();
        loop {
            let msg = match tokio::time::timeout_at(deadline, read.next()).await {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => return Err(CallError::Transport(e.to_string())),
                Ok(None) => return Err(CallError::Transport("stream ended".into())),
                Err(_) => return Err(CallError::Transport(format!("no reply to request {id}"))),
            };
            let text = match msg {
                Message::Text(text) => text,
                Message::Ping(payload) => {
                    write.send(Message::Pong(payload)).await.map_err(|e| CallError::Transport(e.to_string()))?;
                    continue;
                }
                Message::Close(frame) => return Err(CallError::Transport(format!("closed by exchange: {frame:?}"))),
                _ => continue,
            };
            match self.on_text(text.as_str(), out) {
                Some(Inbound::Reply { id: got, outcome }) if got == id => {
                    return outcome.map_err(|e| CallError::Rejected(e.into()));
                }
                Some(Inbound::Heartbeat { test_request: true }) => {
                    write
                        .send(Message::text(protocol::heartbeat_ack()))
                        .await
                        .map_err(|e| CallError::Transport(e.to_string()))?;
                }
                _ => {}
            }
        }
    }

    /// Record liveness and route one text frame. Data is forwarded here;
    /// replies and heartbeats are returned for the caller to act on.
    fn on_text(&mut self, text: &str, out: &OutboundSender) -> Option<Inbound> {
        self.touch(out);
        match protocol::classify(text) {
            Ok(Inbound::Data { channel, data }) => {
                let event = StreamEvent { channel, data, timestamp: now_ms() };
                if out.send(Outbound::Event(event)).is_err() {
                    error!("[stream] forwarder gone, event lost");
                }
                None
            }
            Ok(Inbound::Unknown) => {
                debug!("[stream] ignoring frame: {text}");
                None
            }
            Ok(other) => Some(other),
            Err(e) => {
                warn!("[stream] dropping unparseable frame ({e}): {text}");
                None
            }
        }
    }

    fn touch(&mut self, out: &OutboundSender) {
        if let Some(alert) = self.monitor.record_message(Instant::now()) {
            self.alert(out, alert);
        }
    }

    fn check_silence(&mut self, out: &OutboundSender) {
        if let Some(alert) = self.monitor.poll(Instant::now()) {
            self.alert(out, alert);
        }
    }

    fn alert(&self, out: &OutboundSender, alert: HeartbeatAlert) {
        match alert {
            HeartbeatAlert::Timeout { silent_for } => {
                warn!("[stream] no exchange traffic for {silent_for:?}, maintenance suspected")
            }
            HeartbeatAlert::Resumed { silent_for } => info!("[stream] traffic resumed after {silent_for:?}"),
        }
        let payload = alert.to_json(now_ms()).to_string();
        let _ = out.send(Outbound::Topic { topic: topics::SYSTEM_ALERTS, payload });
    }

    fn status(&self, out: &OutboundSender, status: Value) {
        let _ = out.send(Outbound::Topic { topic: topics::SYSTEM_STATUS, payload: status.to_string() });
    }

    fn suspend(&self, out: &OutboundSender, reason: &str) {
        error!("[stream] suspended: {reason}");
        self.status(
            out,
            json!({ "status": "suspended", "component": "exchange_stream", "reason": reason, "timestamp": now_ms() }),
        );
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!("[stream] {previous:?} -> {state:?}");
        }
    }

    fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.exchange.refresh_margin_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbx_core::bus::MemoryBus;
    use dbx_core::config::UniverseConfig;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn config(ws_url: String, max_auth_failures: u32) -> AppConfig {
        let mut config: AppConfig = serde_json::from_value(json!({
            "universe": { "currencies": ["BTC"], "instruments": ["BTC-PERPETUAL"] }
        }))
        .unwrap();
        config.exchange.ws_url = ws_url;
        config.exchange.client_id = Some("id".into());
        config.exchange.client_secret = Some("secret".into());
        config.exchange.max_auth_failures = max_auth_failures;
        config.exchange.request_timeout_secs = 5;
        config
    }

    /// One-connection fake exchange. Accepts auth unless `reject_auth`, then
    /// sends a heartbeat test request and one portfolio notification.
    async fn fake_exchange(listener: TcpListener, reject_auth: bool, acks: mpsc::UnboundedSender<String>) {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            let id = req["id"].clone();
            let reply =
                |result: Value| Message::text(json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string());
            match req["method"].as_str().unwrap_or_default() {
                "public/auth" if reject_auth => {
                    let err = json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": 13004, "message": "invalid_credentials" }
                    });
                    ws.send(Message::text(err.to_string())).await.unwrap();
                }
                "public/auth" => {
                    let result = json!({ "access_token": "a", "refresh_token": "r", "expires_in": 900 });
                    ws.send(reply(result)).await.unwrap();
                }
                "public/set_heartbeat" => ws.send(reply(json!("ok"))).await.unwrap(),
                "private/subscribe" => {
                    ws.send(reply(req["params"]["channels"].clone())).await.unwrap();
                    let hb = json!({ "jsonrpc": "2.0", "method": "heartbeat", "params": { "type": "test_request" } });
                    ws.send(Message::text(hb.to_string())).await.unwrap();
                    let data = json!({
                        "jsonrpc": "2.0",
                        "method": "subscription",
                        "params": { "channel": "user.portfolio.btc", "data": { "currency": "BTC", "equity": 1.25 } }
                    });
                    ws.send(Message::text(data.to_string())).await.unwrap();
                }
                other => {
                    let _ = acks.send(other.to_string());
                }
            }
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..500 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn streams_events_and_answers_heartbeats() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (ack_tx, mut ack_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_exchange(listener, false, ack_tx));

        let bus = Arc::new(MemoryBus::new());
        let cfg = config(url, 3);
        let stream = ExchangeStream::new(&cfg, bus.clone());
        let mut state = stream.state();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(stream.run(shutdown_rx));

        assert_eq!(ack_rx.recv().await.unwrap(), "public/test");
        wait_for(|| bus.stream_len(&cfg.bus.stream) == 1).await;
        state.wait_for(|s| *s == ConnectionState::Streaming).await.unwrap();

        let entry: StreamEvent = serde_json::from_str(&bus.stream_entries(&cfg.bus.stream)[0]).unwrap();
        assert_eq!(entry.channel, "user.portfolio.btc");
        assert_eq!(entry.data["equity"], 1.25);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn repeated_auth_rejection_suspends() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (ack_tx, _ack_rx) = mpsc::unbounded_channel();
        tokio::spawn(fake_exchange(listener, true, ack_tx));

        let bus = Arc::new(MemoryBus::new());
        let mut status = bus.subscribe(topics::SYSTEM_STATUS).await.unwrap();
        let stream = ExchangeStream::new(&config(url, 1), bus.clone());
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let err = stream.run(shutdown_rx).await.unwrap_err();
        assert!(err.to_string().contains("authentication"));
        let msg: Value = serde_json::from_str(&status.next().await.unwrap()).unwrap();
        assert_eq!(msg["status"], "suspended");
    }

    /// Answers the handshake of one connection. A `live` connection then sends
    /// one notification; a silent one sends nothing more. Returns when the
    /// client closes.
    async fn serve_session(tcp: tokio::net::TcpStream, live: bool) {
        let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            let Message::Text(text) = msg else { continue };
            let req: Value = serde_json::from_str(text.as_str()).unwrap();
            let reply = |result: Value| {
                Message::text(json!({ "jsonrpc": "2.0", "id": req["id"], "result": result }).to_string())
            };
            match req["method"].as_str().unwrap_or_default() {
                "public/auth" => {
                    let result = json!({ "access_token": "a", "refresh_token": "r", "expires_in": 900 });
                    ws.send(reply(result)).await.unwrap();
                }
                "public/set_heartbeat" => ws.send(reply(json!("ok"))).await.unwrap(),
                "private/subscribe" => {
                    ws.send(reply(req["params"]["channels"].clone())).await.unwrap();
                    if live {
                        let data = json!({
                            "jsonrpc": "2.0",
                            "method": "subscription",
                            "params": { "channel": "user.portfolio.btc", "data": { "currency": "BTC" } }
                        });
                        ws.send(Message::text(data.to_string())).await.unwrap();
                    }
                }
                _ => {}
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_exchange_raises_maintenance_alerts_and_reconnects() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for live in [false, true] {
                let (tcp, _) = listener.accept().await.unwrap();
                let _ = conn_tx.send(Instant::now());
                serve_session(tcp, live).await;
            }
        });

        let bus = Arc::new(MemoryBus::new());
        let mut alerts = bus.subscribe(topics::SYSTEM_ALERTS).await.unwrap();
        let mut cfg = config(url, 3);
        cfg.exchange.maintenance_threshold_secs = 10;
        cfg.exchange.websocket_timeout_secs = 30;
        cfg.exchange.backoff_base_ms = 100;
        let stream = ExchangeStream::new(&cfg, bus.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(stream.run(shutdown_rx));

        let first = conn_rx.recv().await.unwrap();
        let timeout: Value = serde_json::from_str(&alerts.next().await.unwrap()).unwrap();
        assert_eq!(timeout["alert"], "heartbeat_timeout");
        assert!(timeout["silent_for_secs"].as_u64().unwrap() >= 10);

        // The transport is torn down once the silence passes websocket_timeout.
        let second = conn_rx.recv().await.unwrap();
        assert!(second.duration_since(first) >= Duration::from_secs(30));

        let resumed: Value = serde_json::from_str(&alerts.next().await.unwrap()).unwrap();
        assert_eq!(resumed["alert"], "heartbeat_resumed");
        wait_for(|| bus.stream_len(&cfg.bus.stream) == 1).await;

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();
    }

    #[test]
    fn channels_follow_universe() {
        let mut cfg = config("ws://127.0.0.1:1".into(), 1);
        cfg.universe = UniverseConfig {
            currencies: vec!["ETH".into()],
            instruments: vec![],
            chart_instruments: vec![],
            chart_resolutions: vec![],
        };
        let stream = ExchangeStream::new(&cfg, Arc::new(MemoryBus::new()));
        assert!(stream.channels().contains(&"user.portfolio.eth".to_string()));
        assert_eq!(*stream.state().borrow(), ConnectionState::Disconnected);
    }
}
