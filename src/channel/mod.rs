//! Command channel to the actuator relay
//!
//! Messages are JSON text over a WebSocket. The channel registers on
//! connect, keeps the connection alive with periodic pings and reconnects
//! with a fixed backoff after any failure.

pub mod client;
pub mod protocol;
pub mod rate;
pub mod transport;

pub use client::CommandChannel;
pub use protocol::{dialect_for, ClientRole, CommandDialect, OutboundMessage};
pub use rate::Interval;
pub use transport::{Connector, Transport, WebSocketConnector, WebSocketTransport};
