//! Hand-off from the receive loop to the bus.
//!
//! The receive loop never awaits bus I/O: it pushes [`Outbound`] items into a
//! bounded buffer with `try_send`, and a dedicated task drains it. A full
//! buffer drops the new item and counts it.
//!
//! Stream appends are retried with backoff. Once one event has spent the
//! whole retry budget the bus is considered down:
//!
//! | State | Event handling                                                  |
//! |-------|-----------------------------------------------------------------|
//! | up    | append with the full retry budget                               |
//! | down  | one attempt per event; success means up again                   |
//!
//! Going down drops everything already buffered in one go and announces it
//! with a single `stream_append_failed` alert, so the buffer never holds
//! events that would only wait behind a dead bus. Coming back is announced
//! with `stream_append_recovered`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dbx_core::backoff::ExponentialBackoff;
use dbx_core::bus::{Bus, BusError};
use dbx_core::config::BusConfig;
use dbx_core::time_util::now_ms;
use dbx_core::{StreamEvent, topics};
use serde_json::json;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Longest pause between two append attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Overflow drops are logged once per this many.
const OVERFLOW_LOG_EVERY: u64 = 1_000;

/// Work item for the forwarder task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// Exchange notification for the durable stream.
    Event(StreamEvent),
    /// Fire-and-forget topic message (status, alerts).
    Topic { topic: &'static str, payload: String },
}

/// The forwarder task has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwarderGone;

/// Non-blocking handle used by the receive loop.
#[derive(Clone)]
pub struct OutboundSender {
    tx: mpsc::Sender<Outbound>,
    overflowed: Arc<AtomicU64>,
}

impl OutboundSender {
    /// Queue `item` without waiting. When the buffer is full the item is
    /// dropped and counted; only a stopped forwarder is an error.
    pub fn send(&self, item: Outbound) -> Result<(), ForwarderGone> {
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let n = self.overflowed.fetch_add(1, Ordering::Relaxed) + 1;
                if n % OVERFLOW_LOG_EVERY == 1 {
                    error!("[forwarder] buffer full, {n} item(s) dropped so far");
                }
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ForwarderGone),
        }
    }
}

/// Counters reported when the forwarder exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub appended: u64,
    /// Events dropped after the retry budget or while the bus was down.
    pub dropped: u64,
    /// Items dropped by the sender because the buffer was full.
    pub overflowed: u64,
    pub published: u64,
}

pub struct Forwarder {
    bus: Arc<dyn Bus>,
    stream: String,
    max_len: usize,
    retries: u32,
    retry_base: Duration,
    buffer: usize,
}

impl Forwarder {
    pub fn new(bus: Arc<dyn Bus>, config: &BusConfig) -> Self {
        Self {
            bus,
            stream: config.stream.clone(),
            max_len: config.max_len,
            retries: config.publish_retries,
            retry_base: Duration::from_millis(config.publish_retry_ms),
            buffer: config.outbound_buffer.max(1),
        }
    }

    /// Start the drain task. It exits once every sender is dropped and the
    /// buffer is empty.
    pub fn spawn(self) -> (OutboundSender, JoinHandle<ForwarderStats>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let overflowed = Arc::new(AtomicU64::new(0));
        let sender = OutboundSender { tx, overflowed: Arc::clone(&overflowed) };
        (sender, tokio::spawn(self.run(rx, overflowed)))
    }

    async fn run(self, mut rx: mpsc::Receiver<Outbound>, overflowed: Arc<AtomicU64>) -> ForwarderStats {
        let mut stats = ForwarderStats::default();
        let mut down = false;
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Event(event) if down => match self.try_append(&event).await {
                    Ok(id) => {
                        down = false;
                        stats.appended += 1;
                        info!("[forwarder] stream append recovered ({} -> {id})", event.channel);
                        self.alert(json!({ "alert": "stream_append_recovered", "timestamp": now_ms() })).await;
                    }
                    Err(e) => {
                        stats.dropped += 1;
                        debug!("[forwarder] bus still down, dropping {}: {e}", event.channel);
                    }
                },
                Outbound::Event(event) => match self.append(&event).await {
                    Ok(id) => {
                        stats.appended += 1;
                        debug!("[forwarder] {} -> {id}", event.channel);
                    }
                    Err(e) => {
                        down = true;
                        let mut dropped = 1;
                        while let Ok(item) = rx.try_recv() {
                            match item {
                                Outbound::Event(_) => dropped += 1,
                                Outbound::Topic { topic, payload } => {
                                    if self.bus.publish(topic, &payload).await.is_ok() {
                                        stats.published += 1;
                                    }
                                }
                            }
                        }
                        stats.dropped += dropped;
                        error!(
                            "[forwarder] stream append failed after {} attempts ({e}), bus considered down, \
                             {dropped} buffered event(s) dropped",
                            self.retries + 1
                        );
                        self.alert(json!({
                            "alert": "stream_append_failed",
                            "channel": event.channel,
                            "dropped": dropped,
                            "error": e.to_string(),
                            "timestamp": now_ms(),
                        }))
                        .await;
                    }
                },
                Outbound::Topic { topic, payload } => match self.bus.publish(topic, &payload).await {
                    Ok(()) => stats.published += 1,
                    Err(e) => warn!("[forwarder] publish {topic}: {e}"),
                },
            }
        }
        stats.overflowed = overflowed.load(Ordering::Relaxed);
        stats
    }

    async fn alert(&self, alert: serde_json::Value) {
        if let Err(e) = self.bus.publish(topics::SYSTEM_ALERTS, &alert.to_string()).await {
            warn!("[forwarder] alert publish failed too: {e}");
        }
    }

    async fn try_append(&self, event: &StreamEvent) -> Result<String, BusError> {
        let payload = serde_json::to_string(event)?;
        self.bus.stream_append(&self.stream, &payload, self.max_len).await
    }

    /// Append with bounded retry on transient errors.
    async fn append(&self, event: &StreamEvent) -> Result<String, BusError> {
        let payload = serde_json::to_string(event)?;
        let mut backoff = ExponentialBackoff::new(self.retry_base, MAX_RETRY_DELAY);
        loop {
            match self.bus.stream_append(&self.stream, &payload, self.max_len).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && backoff.attempt() < self.retries => {
                    let delay = backoff.next_delay();
                    warn!("[forwarder] append failed ({e}), retry {}/{} in {delay:?}", backoff.attempt(), self.retries);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
