//! Hub transport boundary
//!
//! The agent only needs three things from the pub/sub link: publish a
//! message, ask for the full properties document, and poll for whatever
//! arrived. Wire encoding belongs to the implementations.

pub mod memory;
pub mod tcp;

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::engine::properties::PropertiesResponse;

pub use memory::{MemoryHub, MemoryTransport};
pub use tcp::TcpBridgeTransport;

/// Correlation id assigned to an outbound at-least-once message
pub type MessageId = u16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Telemetry,
    ReportedProperties,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    AtMostOnce,
    AtLeastOnce,
}

/// Something received from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    CloudMessage(Vec<u8>),
    Properties(PropertiesResponse),
    Ack(MessageId),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport disconnected")]
    Disconnected,

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}

#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Publish `payload`. At-least-once sends return the id their ack will carry.
    async fn send(&mut self, topic: Topic, payload: &[u8], qos: QoS) -> Result<Option<MessageId>, TransportError>;

    /// Ask for the full properties document; the response carries the returned id
    async fn request_properties(&mut self) -> Result<MessageId, TransportError>;

    /// Wait up to `timeout` for inbound traffic. An empty batch is not an error.
    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Inbound>, TransportError>;
}
