//! In-process loopback transport
//!
//! `MemoryTransport` is the device end and `MemoryHub` the service end of
//! one shared link. Tests drive the hub to deliver commands and properties
//! and inspect everything the device published.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Inbound, MessageId, QoS, Topic, Transport, TransportError};
use crate::engine::properties::{PropertiesKind, PropertiesResponse};

/// One message the device published
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub topic: Topic,
    pub payload: Vec<u8>,
    pub qos: QoS,
    pub id: Option<MessageId>,
}

#[derive(Debug)]
struct MemoryState {
    next_id: MessageId,
    inbound: VecDeque<Inbound>,
    sent: Vec<SentMessage>,
    twin: Option<Vec<u8>>,
    auto_ack: bool,
    disconnected: bool,
    protocol_fault: Option<String>,
    property_requests: usize,
}

impl MemoryState {
    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected device/hub pair. Acks are delivered automatically.
pub fn pair() -> (MemoryTransport, MemoryHub) {
    let state = Arc::new(Mutex::new(MemoryState {
        next_id: 1,
        inbound: VecDeque::new(),
        sent: Vec::new(),
        twin: None,
        auto_ack: true,
        disconnected: false,
        protocol_fault: None,
        property_requests: 0,
    }));
    (
        MemoryTransport {
            state: Arc::clone(&state),
        },
        MemoryHub { state },
    )
}

#[derive(Debug, Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn pair() -> (MemoryTransport, MemoryHub) {
        pair()
    }
}

impl Transport for MemoryTransport {
    async fn send(&mut self, topic: Topic, payload: &[u8], qos: QoS) -> Result<Option<MessageId>, TransportError> {
        let mut state = lock(&self.state);
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        let id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(state.allocate_id()),
        };
        state.sent.push(SentMessage {
            topic,
            payload: payload.to_vec(),
            qos,
            id,
        });
        if let (Some(id), true) = (id, state.auto_ack) {
            state.inbound.push_back(Inbound::Ack(id));
        }
        Ok(id)
    }

    async fn request_properties(&mut self) -> Result<MessageId, TransportError> {
        let mut state = lock(&self.state);
        if state.disconnected {
            return Err(TransportError::Disconnected);
        }
        let id = state.allocate_id();
        state.property_requests += 1;
        if let Some(twin) = state.twin.clone() {
            state.inbound.push_back(Inbound::Properties(PropertiesResponse::new(
                PropertiesKind::Full,
                Some(id),
                twin,
            )));
        }
        Ok(id)
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Inbound>, TransportError> {
        {
            let mut state = lock(&self.state);
            if state.disconnected {
                return Err(TransportError::Disconnected);
            }
            if let Some(fault) = state.protocol_fault.take() {
                return Err(TransportError::Protocol(fault));
            }
            if !state.inbound.is_empty() {
                return Ok(state.inbound.drain(..).collect());
            }
        }
        tokio::time::sleep(timeout).await;
        Ok(lock(&self.state).inbound.drain(..).collect())
    }
}

/// Service side of a memory link
#[derive(Debug, Clone)]
pub struct MemoryHub {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHub {
    /// Deliver a cloud-to-device message
    pub fn push_message(&self, payload: impl Into<Vec<u8>>) {
        lock(&self.state)
            .inbound
            .push_back(Inbound::CloudMessage(payload.into()));
    }

    /// Deliver a `{"method": ..., "payload": ...}` command
    pub fn push_command(&self, method: &str, payload: serde_json::Value) {
        let envelope = serde_json::json!({ "method": method, "payload": payload });
        self.push_message(envelope.to_string());
    }

    pub fn push_properties(&self, response: PropertiesResponse) {
        lock(&self.state)
            .inbound
            .push_back(Inbound::Properties(response));
    }

    pub fn ack(&self, id: MessageId) {
        lock(&self.state).inbound.push_back(Inbound::Ack(id));
    }

    /// Full document returned to property requests; `None` leaves them unanswered
    pub fn set_twin(&self, document: Option<Vec<u8>>) {
        lock(&self.state).twin = document;
    }

    pub fn set_auto_ack(&self, enabled: bool) {
        lock(&self.state).auto_ack = enabled;
    }

    /// Make the next poll fail with a protocol error; queued traffic is kept
    pub fn corrupt_next_poll(&self, reason: &str) {
        lock(&self.state).protocol_fault = Some(reason.to_string());
    }

    pub fn disconnect(&self) {
        lock(&self.state).disconnected = true;
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        lock(&self.state).sent.clone()
    }

    pub fn telemetry(&self) -> Vec<Vec<u8>> {
        self.payloads_on(Topic::Telemetry)
    }

    pub fn reported(&self) -> Vec<Vec<u8>> {
        self.payloads_on(Topic::ReportedProperties)
    }

    pub fn property_requests(&self) -> usize {
        lock(&self.state).property_requests
    }

    fn payloads_on(&self, topic: Topic) -> Vec<Vec<u8>> {
        lock(&self.state)
            .sent
            .iter()
            .filter(|message| message.topic == topic)
            .map(|message| message.payload.clone())
            .collect()
    }
}
