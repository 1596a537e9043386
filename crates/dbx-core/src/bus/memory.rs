//! In-process bus backend.
//!
//! Topics are `tokio::sync::broadcast` channels. Streams keep a bounded deque
//! of entries plus, per consumer group, a delivery cursor and a pending-entries
//! list, mirroring Redis stream semantics closely enough that the distributor
//! behaves the same on either backend.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::{Notify, broadcast};
use tokio::time::Instant;
use tracing::warn;

use super::{Bus, BusError, StreamEntry, Subscription};

const DEFAULT_TOPIC_CAPACITY: usize = 1024;

struct Pending {
    consumer: String,
    delivered_at: Instant,
    deliveries: u32,
}

#[derive(Default)]
struct GroupState {
    /// Highest sequence handed out by `stream_read_group`.
    last_delivered: u64,
    pending: BTreeMap<u64, Pending>,
}

#[derive(Default)]
struct StreamState {
    entries: VecDeque<(u64, String)>,
    next_seq: u64,
    groups: AHashMap<String, GroupState>,
}

impl StreamState {
    fn data_for(&self, seq: u64) -> Option<&String> {
        self.entries
            .binary_search_by_key(&seq, |(s, _)| *s)
            .ok()
            .map(|idx| &self.entries[idx].1)
    }
}

#[derive(Default)]
struct MemStream {
    state: Mutex<StreamState>,
    appended: Notify,
}

fn format_id(seq: u64) -> String {
    format!("{seq}-0")
}

fn parse_id(id: &str) -> Option<u64> {
    id.split('-').next()?.parse().ok()
}

/// Bus backend living entirely in this process.
pub struct MemoryBus {
    topics: Mutex<AHashMap<String, broadcast::Sender<String>>>,
    streams: Mutex<AHashMap<String, Arc<MemStream>>>,
    topic_capacity: usize,
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::with_topic_capacity(DEFAULT_TOPIC_CAPACITY)
    }

    /// Subscribers that fall more than `capacity` messages behind skip ahead.
    pub fn with_topic_capacity(capacity: usize) -> Self {
        Self {
            topics: Mutex::new(AHashMap::new()),
            streams: Mutex::new(AHashMap::new()),
            topic_capacity: capacity.max(1),
        }
    }

    fn stream(&self, name: &str) -> Arc<MemStream> {
        let mut streams = lock(&self.streams);
        Arc::clone(streams.entry(name.to_string()).or_default())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        let mut topics = lock(&self.topics);
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(self.topic_capacity).0)
            .clone()
    }

    /// Number of entries currently retained in `stream`.
    pub fn stream_len(&self, stream: &str) -> usize {
        lock(&self.stream(stream).state).entries.len()
    }

    /// Number of delivered-but-unacknowledged entries for `group`.
    pub fn pending_len(&self, stream: &str, group: &str) -> usize {
        lock(&self.stream(stream).state).groups.get(group).map(|g| g.pending.len()).unwrap_or(0)
    }

    /// All retained entries of `stream`, oldest first.
    pub fn stream_entries(&self, stream: &str) -> Vec<String> {
        lock(&self.stream(stream).state).entries.iter().map(|(_, d)| d.clone()).collect()
    }
}

/// A poisoned lock only means another task panicked mid-update; the maps stay
/// structurally valid, so keep going.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Bus for MemoryBus {
    async fn publish(&self, topic: &str, message: &str) -> Result<(), BusError> {
        // No receivers is not an error: nobody is listening yet.
        let _ = self.sender(topic).send(message.to_string());
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, BusError> {
        let rx = self.sender(topic).subscribe();
        let topic = topic.to_string();
        let stream = futures_util::stream::unfold((rx, topic), |(mut rx, topic)| async move {
            loop {
                match rx.recv().await {
                    Ok(msg) => return Some((msg, (rx, topic))),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[bus] subscriber on {topic} lagged, skipped {n} messages");
                    }
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let s = self.stream(stream);
        lock(&s.state).groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn stream_append(&self, stream: &str, message: &str, max_len: usize) -> Result<String, BusError> {
        let s = self.stream(stream);
        let id = {
            let mut state = lock(&s.state);
            state.next_seq += 1;
            let seq = state.next_seq;
            state.entries.push_back((seq, message.to_string()));
            while state.entries.len() > max_len.max(1) {
                state.entries.pop_front();
            }
            format_id(seq)
        };
        s.appended.notify_waiters();
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
        let s = self.stream(stream);
        let deadline = Instant::now() + block;

        loop {
            // Register interest before inspecting state so an append between
            // the check and the wait is not missed.
            let appended = s.appended.notified();
            {
                let mut state = lock(&s.state);
                let StreamState { entries, groups, .. } = &mut *state;
                let g = groups.get_mut(group).ok_or_else(|| BusError::NoGroup {
                    stream: stream.to_string(),
                    group: group.to_string(),
                })?;

                let now = Instant::now();
                let cursor = g.last_delivered;
                let mut batch = Vec::new();
                for (seq, data) in entries.iter().filter(|(seq, _)| *seq > cursor).take(count.max(1)) {
                    let pending = Pending { consumer: consumer.to_string(), delivered_at: now, deliveries: 1 };
                    g.pending.insert(*seq, pending);
                    batch.push(StreamEntry { id: format_id(*seq), data: data.clone(), deliveries: 1 });
                }
                if let Some(last) = batch.last().and_then(|e| parse_id(&e.id)) {
                    g.last_delivered = last;
                    return Ok(batch);
                }
            }

            if block.is_zero() || tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn stream_ack(&self, stream: &str, group: &str, id: &str) -> Result<(), BusError> {
        let s = self.stream(stream);
        let mut state = lock(&s.state);
        if let (Some(g), Some(seq)) = (state.groups.get_mut(group), parse_id(id)) {
            g.pending.remove(&seq);
        }
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
        let s = self.stream(stream);
        let mut state = lock(&s.state);
        let now = Instant::now();

        let stale: Vec<u64> = {
            let g = state.groups.get(group).ok_or_else(|| BusError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            })?;
            g.pending
                .iter()
                .filter(|(_, p)| now.duration_since(p.delivered_at) >= min_idle)
                .map(|(seq, _)| *seq)
                .take(count.max(1))
                .collect()
        };

        let mut claimed = Vec::with_capacity(stale.len());
        for seq in stale {
            let data = state.data_for(seq).cloned();
            let Some(g) = state.groups.get_mut(group) else { break };
            match data {
                // Trimmed away while pending: nothing left to redeliver.
                None => {
                    g.pending.remove(&seq);
                }
                Some(data) => {
                    if let Some(p) = g.pending.get_mut(&seq) {
                        p.consumer = consumer.to_string();
                        p.delivered_at = now;
                        p.deliveries += 1;
                        claimed.push(StreamEntry { id: format_id(seq), data, deliveries: p.deliveries });
                    }
                }
            }
        }
        Ok(claimed)
    }
}
