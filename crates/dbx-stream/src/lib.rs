//! # dbx-stream
//!
//! The single authenticated WebSocket session to the exchange.
//!
//! - [`session`]: connect/auth/subscribe state machine and receive loop
//! - [`protocol`]: JSON-RPC request builders and inbound frame classification
//! - [`auth`]: auth grants and access-token renewal
//! - [`heartbeat`]: feed-silence monitor (maintenance detection)
//! - [`subscriptions`]: channel set derived from the universe
//! - [`forwarder`]: buffered, retrying hand-off to the durable stream
//!
//! The stream does no business logic: every data notification is appended
//! verbatim as `{channel, data, timestamp}` for the distributor.

pub mod auth;
pub mod forwarder;
pub mod heartbeat;
pub mod protocol;
pub mod session;
pub mod subscriptions;

pub use heartbeat::{HeartbeatAlert, HeartbeatMonitor, StreamHealth};
pub use session::{ConnectionState, ExchangeStream};
