//! Feed-silence monitor and maintenance detection.
//!
//! The monitor lives for the whole process, across reconnects, and only
//! tracks when the last inbound frame arrived. It never acts on the session
//! itself: crossing the threshold yields a [`HeartbeatAlert`] that the caller
//! publishes on `system_alerts`.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;

/// Orthogonal health of an otherwise streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamHealth {
    Normal,
    /// No frame for at least the maintenance threshold.
    MaintenanceSuspected,
}

/// Health transition to announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAlert {
    Timeout { silent_for: Duration },
    Resumed { silent_for: Duration },
}

impl HeartbeatAlert {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "heartbeat_timeout",
            Self::Resumed { .. } => "heartbeat_resumed",
        }
    }

    /// Payload published on `system_alerts`.
    pub fn to_json(&self, timestamp_ms: u64) -> Value {
        let silent_for = match self {
            Self::Timeout { silent_for } | Self::Resumed { silent_for } => silent_for,
        };
        json!({
            "alert": self.kind(),
            "silent_for_secs": silent_for.as_secs(),
            "timestamp": timestamp_ms,
        })
    }
}

#[derive(Debug)]
pub struct HeartbeatMonitor {
    threshold: Duration,
    last_message: Instant,
    health: StreamHealth,
}

impl HeartbeatMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self { threshold, last_message: now, health: StreamHealth::Normal }
    }

    pub fn health(&self) -> StreamHealth {
        self.health
    }

    pub fn silence(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_message)
    }

    /// A frame arrived. Leaving maintenance yields [`HeartbeatAlert::Resumed`].
    pub fn record_message(&mut self, now: Instant) -> Option<HeartbeatAlert> {
        let silent_for = self.silence(now);
        self.last_message = now;
        match self.health {
            StreamHealth::MaintenanceSuspected => {
                self.health = StreamHealth::Normal;
                Some(HeartbeatAlert::Resumed { silent_for })
            }
            StreamHealth::Normal => None,
        }
    }

    /// Check the silence. Yields [`HeartbeatAlert::Timeout`] once per gap.
    pub fn poll(&mut self, now: Instant) -> Option<HeartbeatAlert> {
        let silent_for = self.silence(now);
        if self.health == StreamHealth::Normal && silent_for >= self.threshold {
            self.health = StreamHealth::MaintenanceSuspected;
            return Some(HeartbeatAlert::Timeout { silent_for });
        }
        None
    }
}
