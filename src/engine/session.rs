//! Hub session
//!
//! Owns the transport, the ack tracker and the bounded inbound queues.
//! Every poll routes what arrived: acks to the tracker, commands and
//! property documents to their queues. Nothing received while waiting for
//! one thing is lost to another.

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::engine::acks::{AckError, AckTracker};
use crate::engine::config::QueueConfig;
use crate::engine::properties::{PropertiesKind, PropertiesResponse};
use crate::engine::transport::{Inbound, MessageId, QoS, Topic, Transport, TransportError};

pub struct HubSession<T: Transport> {
    transport: T,
    acks: AckTracker,
    commands: VecDeque<Vec<u8>>,
    properties: VecDeque<PropertiesResponse>,
    queues: QueueConfig,
    ack_timeout: Duration,
}

impl<T: Transport> HubSession<T> {
    pub fn new(transport: T, queues: QueueConfig, ack_timeout: Duration) -> Self {
        Self {
            transport,
            acks: AckTracker::new(),
            commands: VecDeque::with_capacity(queues.commands),
            properties: VecDeque::with_capacity(queues.properties),
            queues,
            ack_timeout,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn acks(&self) -> &AckTracker {
        &self.acks
    }

    pub fn ack_timeout(&self) -> Duration {
        self.ack_timeout
    }

    /// Poll once and route everything received. Returns how many items arrived.
    pub async fn poll(&mut self, timeout: Duration) -> Result<usize, TransportError> {
        let inbound = self.transport.poll(timeout).await?;
        let count = inbound.len();
        for item in inbound {
            self.route(item);
        }
        Ok(count)
    }

    fn route(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Ack(id) => {
                self.acks.resolve(id);
            }
            Inbound::CloudMessage(payload) => {
                if self.commands.len() >= self.queues.commands {
                    warn!(capacity = self.queues.commands, "Command queue full, dropping oldest");
                    self.commands.pop_front();
                }
                self.commands.push_back(payload);
            }
            Inbound::Properties(response) if response.kind == PropertiesKind::ReportedResponse => {
                debug!(request_id = ?response.request_id, "Reported properties accepted");
            }
            Inbound::Properties(response) => {
                if self.properties.len() >= self.queues.properties {
                    warn!(capacity = self.queues.properties, "Properties queue full, dropping oldest");
                    self.properties.pop_front();
                }
                self.properties.push_back(response);
            }
        }
    }

    /// Publish at-least-once and start tracking the ack. Records left
    /// unawaited past the ack timeout are dropped here.
    pub async fn send_tracked(&mut self, topic: Topic, payload: &[u8]) -> Result<MessageId, AckError> {
        self.acks.sweep(self.ack_timeout);
        let id = self
            .transport
            .send(topic, payload, QoS::AtLeastOnce)
            .await?
            .ok_or(AckError::MissingMessageId)?;
        self.acks.track(id);
        Ok(id)
    }

    /// Wait for the ack of `id`, routing other traffic meanwhile
    pub async fn await_ack(&mut self, id: MessageId) -> Result<(), AckError> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            if self.acks.take(id) {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                self.acks.forget(id);
                warn!(message_id = id, "Timed out waiting for ack");
                return Err(AckError::AckTimeout {
                    id,
                    waited: self.ack_timeout,
                });
            }
            if let Err(e) = self.poll(deadline - now).await {
                self.acks.forget(id);
                return Err(e.into());
            }
        }
    }

    pub async fn send_and_await(&mut self, topic: Topic, payload: &[u8]) -> Result<(), AckError> {
        let id = self.send_tracked(topic, payload).await?;
        debug!(message_id = id, ?topic, "Awaiting ack");
        self.await_ack(id).await
    }

    pub async fn send_telemetry_and_await(&mut self, payload: &[u8]) -> Result<(), AckError> {
        self.send_and_await(Topic::Telemetry, payload).await
    }

    /// Fire-and-forget telemetry
    pub async fn send_telemetry(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.transport
            .send(Topic::Telemetry, payload, QoS::AtMostOnce)
            .await?;
        Ok(())
    }

    pub async fn report_properties(&mut self, document: &[u8]) -> Result<(), AckError> {
        self.send_and_await(Topic::ReportedProperties, document).await
    }

    /// Request the full document and wait for the response to that request
    pub async fn fetch_properties(&mut self, timeout: Duration) -> Result<Option<PropertiesResponse>, TransportError> {
        let id = self.transport.request_properties().await?;
        let deadline = Instant::now() + timeout;
        loop {
            let position = self
                .properties
                .iter()
                .position(|p| p.kind == PropertiesKind::Full && p.request_id == Some(id));
            if let Some(position) = position {
                return Ok(self.properties.remove(position));
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(request_id = id, "No properties document before deadline");
                return Ok(None);
            }
            self.poll(deadline - now).await?;
        }
    }

    pub fn next_command(&mut self) -> Option<Vec<u8>> {
        self.commands.pop_front()
    }

    pub fn next_properties(&mut self) -> Option<PropertiesResponse> {
        self.properties.pop_front()
    }

    pub fn queued_commands(&self) -> usize {
        self.commands.len()
    }
}
