//! Pub/sub fabric and durable event stream.
//!
//! Two primitives with different guarantees:
//!
//! 1. **Topics**: fire-and-forget broadcast for cache snapshots. No replay,
//!    no acknowledgement; a subscriber only sees messages published after it
//!    subscribed.
//! 2. **Streams**: bounded, consumer-group delivery of raw exchange events.
//!    At-least-once: an entry stays pending until acknowledged, and a pending
//!    entry whose consumer went quiet can be claimed by another consumer.
//!    Downstream processing must therefore be idempotent.
//!
//! [`MemoryBus`] implements both in-process; [`RedisBus`] maps them onto Redis
//! `PUBLISH`/`SUBSCRIBE` and `XADD`/`XREADGROUP`/`XACK`/`XCLAIM`.

pub mod memory;
pub mod redis_bus;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

pub use self::memory::MemoryBus;
pub use self::redis_bus::RedisBus;

/// Errors raised by bus backends.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("consumer group {group} does not exist on {stream}")]
    NoGroup { stream: String, group: String },

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("bus closed")]
    Closed,
}

impl BusError {
    /// Whether the operation may succeed if retried after a pause.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Redis(e) => {
                e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            Self::Closed => true,
            Self::NoGroup { .. } | Self::Serialize(_) => false,
        }
    }
}

/// Messages received on a subscribed topic.
pub type Subscription = BoxStream<'static, String>;

/// One entry delivered from a durable stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    /// Content of the entry's single `data` field.
    pub data: String,
    /// 1 on first delivery, incremented by every reclaim.
    pub deliveries: u32,
}

/// The messaging contract every component depends on.
#[async_trait]
pub trait Bus: Send + Sync {
    /// Broadcast `message` to the current subscribers of `topic`.
    async fn publish(&self, topic: &str, message: &str) -> Result<(), BusError>;

    /// Receive messages published to `topic` from now on.
    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError>;

    /// Create `group` on `stream` (and the stream itself) if missing.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError>;

    /// Append an entry, trimming the stream to roughly `max_len` entries.
    async fn stream_append(&self, stream: &str, message: &str, max_len: usize) -> Result<String, BusError>;

    /// Deliver up to `count` never-delivered entries to `consumer`, waiting up
    /// to `block` for at least one. A zero `block` does not wait.
    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError>;

    /// Remove an entry from the group's pending list.
    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError>;

    /// Take over pending entries idle for at least `min_idle`.
    async fn stream_claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError>;
}

/// Serialize `value` as JSON and publish it on `topic`.
pub async fn publish_json<T: Serialize + ?Sized>(bus: &dyn Bus, topic: &str, value: &T) -> Result<(), BusError> {
    let payload = serde_json::to_string(value)?;
    bus.publish(topic, &payload).await
}
