//! Broker transports for the alert channel.
//!
//! Frames are JSON objects tagged by `type`. Over TCP each frame is one line.
//!
//! ```text
//! client                         broker
//!   |-- connect ------------------->|
//!   |<----------------- connected --|
//!   |-- subscribe{topic} ---------->|
//!   |-- publish{topic, body} ------>|-- message{topic, body} --> subscribers
//!   |<-> heartbeat (both ways) <--->|
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Connect,
    Connected,
    Subscribe { topic: String },
    Publish { topic: String, body: serde_json::Value },
    Message { topic: String, body: serde_json::Value },
    Heartbeat,
    Disconnect,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("broker refused connection")]
    Refused,
    #[error("connection closed")]
    Closed,
    #[error("not connected")]
    NotConnected,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("frame codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

/// A connection to a publish/subscribe broker.
///
/// `recv` must be cancel safe: the alert channel polls it inside `select!`
/// alongside heartbeats and outgoing commands.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Open the connection and complete the connect/connected handshake.
    async fn connect(&mut self) -> Result<(), TransportError>;

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Next inbound frame. An error means the session is gone.
    async fn recv(&mut self) -> Result<Frame, TransportError>;

    /// Best-effort disconnect; the transport may be connected again later.
    async fn close(&mut self);
}
