//! Redis bus backend.
//!
//! | Contract               | Redis                                   |
//! |------------------------|-----------------------------------------|
//! | `publish`              | `PUBLISH`                               |
//! | `subscribe`            | `SUBSCRIBE` on a dedicated connection   |
//! | `ensure_group`         | `XGROUP CREATE .. 0 MKSTREAM`           |
//! | `stream_append`        | `XADD .. MAXLEN ~ n * data <msg>`       |
//! | `stream_read_group`    | `XREADGROUP GROUP g c COUNT n BLOCK ms` |
//! | `stream_ack`           | `XACK`                                  |
//! | `stream_claim_stale`   | `XPENDING` + `XCLAIM`                   |
//!
//! Blocking reads run on their own multiplexed connection so a parked
//! `XREADGROUP` never delays publishes.

use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamMaxlen, StreamPendingCountReply, StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Bus, BusError, StreamEntry, Subscription};

/// Field name of the single payload field in every stream entry.
const DATA_FIELD: &str = "data";

/// Bus backed by a Redis server.
pub struct RedisBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    blocking: Mutex<MultiplexedConnection>,
}

impl RedisBus {
    /// Open the command and blocking-read connections.
    pub async fn connect(url: &str) -> Result<Self, BusError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let blocking = client.get_multiplexed_async_connection().await?;
        info!("[bus] connected to redis at {url}");
        Ok(Self { client, conn, blocking: Mutex::new(blocking) })
    }
}

fn entry_from(id: &redis::streams::StreamId, deliveries: u32) -> StreamEntry {
    StreamEntry {
        id: id.id.clone(),
        data: id.get::<String>(DATA_FIELD).unwrap_or_default(),
        deliveries,
    }
}

#[async_trait]
impl Bus for RedisBus {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _receivers: i64 = conn.publish(topic, message).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(topic).await?;
        debug!("[bus] subscribed to {topic}");
        let messages = pubsub
            .into_on_message()
            .filter_map(|msg| async move { msg.get_payload::<String>().ok() });
        Ok(messages.boxed())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let created: Result<(), RedisError> = conn.xgroup_create_mkstream(stream, group, "0").await;
        match created {
            Ok(()) => {
                info!("[bus] created consumer group {group} on {stream}");
                Ok(())
            }
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn stream_append(&self, stream: &str, message: &str, max_len: usize) -> Result<String, BusError> {
        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd_maxlen(stream, StreamMaxlen::Approx(max_len), "*", &[(DATA_FIELD, message)])
            .await?;
        Ok(id)
    }

    async fn stream_read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut opts = StreamReadOptions::default().group(group, consumer).count(count.max(1));
        if !block.is_zero() {
            opts = opts.block(block.as_millis() as usize);
        }
        let mut conn = self.blocking.lock().await;
        let reply: Option<StreamReadReply> = conn.xread_options(&[stream], &[">"], &opts).await?;
        let Some(reply) = reply else {
            return Ok(Vec::new());
        };
        Ok(reply
            .keys
            .iter()
            .flat_map(|key| key.ids.iter())
            .map(|id| entry_from(id, 1))
            .collect())
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let _acked: i64 = conn.xack(stream, group, &[id]).await?;
        Ok(())
    }

    async fn stream_claim_stale(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.conn.clone();
        let min_idle_ms = min_idle.as_millis() as usize;

        let pending: StreamPendingCountReply = conn.xpending_count(stream, group, "-", "+", count.max(1)).await?;
        let stale: AHashMap<String, usize> = pending
            .ids
            .into_iter()
            .filter(|p| p.last_delivered_ms >= min_idle_ms)
            .map(|p| (p.id, p.times_delivered))
            .collect();
        if stale.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = stale.keys().map(String::as_str).collect();
        let claimed: StreamClaimReply = conn.xclaim(stream, group, consumer, min_idle_ms, &ids).await?;
        Ok(claimed
            .ids
            .iter()
            .map(|id| {
                let previous = stale.get(&id.id).copied().unwrap_or(1);
                entry_from(id, previous as u32 + 1)
            })
            .collect())
    }
}
