//! Newline-delimited JSON bridge
//!
//! A local bridge process owns the real hub connection and relays frames to
//! the agent over TCP, one JSON object per line. Payloads are base64 so
//! frames stay single-line whatever the message holds.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{Inbound, MessageId, QoS, Topic, Transport, TransportError};
use crate::engine::properties::{PropertiesKind, PropertiesResponse};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Publish {
        topic: Topic,
        qos: QoS,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        payload: String,
    },
    GetProperties {
        id: MessageId,
    },
    Ack {
        id: MessageId,
    },
    Command {
        payload: String,
    },
    Properties {
        kind: PropertiesKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
        payload: String,
    },
}

impl Frame {
    fn into_inbound(self) -> Result<Option<Inbound>, TransportError> {
        let inbound = match self {
            Frame::Ack { id } => Inbound::Ack(id),
            Frame::Command { payload } => Inbound::CloudMessage(decode_payload(&payload)?),
            Frame::Properties { kind, id, payload } => {
                Inbound::Properties(PropertiesResponse::new(kind, id, decode_payload(&payload)?))
            }
            Frame::Publish { .. } | Frame::GetProperties { .. } => {
                warn!("Ignoring device-bound frame echoed by bridge");
                return Ok(None);
            }
        };
        Ok(Some(inbound))
    }
}

fn decode_payload(payload: &str) -> Result<Vec<u8>, TransportError> {
    STANDARD
        .decode(payload)
        .map_err(|e| TransportError::Protocol(format!("payload is not base64: {}", e)))
}

fn decode_frame(line: &[u8]) -> Result<Option<Inbound>, TransportError> {
    let frame: Frame =
        serde_json::from_slice(line).map_err(|e| TransportError::Protocol(format!("bad frame: {}", e)))?;
    frame.into_inbound()
}

/// Agent end of the bridge link
pub struct TcpBridgeTransport {
    reader: OwnedReadHalf,
    writer: OwnedWriteHalf,
    buffer: Vec<u8>,
    next_id: MessageId,
}

impl TcpBridgeTransport {
    pub async fn connect(host: &str, port: u16) -> Result<Self, TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(host = %host, port, "Connected to hub bridge");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader,
            writer,
            buffer: Vec::new(),
            next_id: 1,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        id
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        line.push(b'\n');
        self.writer.write_all(&line).await?;
        Ok(())
    }

    /// Decode every complete line buffered so far. A line that fails to
    /// decode is dropped on its own.
    fn take_frames(&mut self) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        while let Some(end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            let line = &line[..line.len() - 1];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match decode_frame(line) {
                Ok(Some(message)) => inbound.push(message),
                Ok(None) => {}
                Err(e) => warn!(error = %e, bytes = line.len(), "Dropping bad bridge frame"),
            }
        }
        inbound
    }
}

impl Transport for TcpBridgeTransport {
    async fn send(&mut self, topic: Topic, payload: &[u8], qos: QoS) -> Result<Option<MessageId>, TransportError> {
        let id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.allocate_id()),
        };
        self.write_frame(&Frame::Publish {
            topic,
            qos,
            id,
            payload: STANDARD.encode(payload),
        })
        .await?;
        Ok(id)
    }

    async fn request_properties(&mut self) -> Result<MessageId, TransportError> {
        let id = self.allocate_id();
        self.write_frame(&Frame::GetProperties { id }).await?;
        Ok(id)
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Inbound>, TransportError> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 4096];
        loop {
            let inbound = self.take_frames();
            if !inbound.is_empty() {
                return Ok(inbound);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            match tokio::time::timeout(deadline - now, self.reader.read(&mut chunk)).await {
                Ok(Ok(0)) => return Err(TransportError::Disconnected),
                Ok(Ok(read)) => self.buffer.extend_from_slice(&chunk[..read]),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Ok(Vec::new()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_frame_wire_shape() {
        let frame = Frame::Publish {
            topic: Topic::Telemetry,
            qos: QoS::AtLeastOnce,
            id: Some(4),
            payload: STANDARD.encode(b"\"CONNECTED\""),
        };
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "publish");
        assert_eq!(json["topic"], "telemetry");
        assert_eq!(json["qos"], "at_least_once");
        assert_eq!(json["id"], 4);
    }

    #[tokio::test]
    async fn test_bad_frame_dropped_alone() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let bridge = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let ack = |id| serde_json::to_string(&Frame::Ack { id }).unwrap();
            let wire = format!(
                "{}\n{}\n{}\n{}\n",
                ack(1),
                r#"{"type":"bogus"}"#,
                r#"{"type":"command","payload":"%%%"}"#,
                ack(2)
            );
            stream.write_all(wire.as_bytes()).await.unwrap();
            stream.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut transport = TcpBridgeTransport::connect("127.0.0.1", port).await.unwrap();
        let mut received = Vec::new();
        while received.len() < 2 {
            received.extend(transport.poll(Duration::from_secs(2)).await.unwrap());
        }
        assert_eq!(received, vec![Inbound::Ack(1), Inbound::Ack(2)]);

        bridge.await.unwrap();
    }

    #[tokio::test]
    async fn test_bridge_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let bridge = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();

            let publish: Frame = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
            let Frame::Publish { id: Some(id), payload, .. } = publish else {
                panic!("expected publish");
            };
            assert_eq!(STANDARD.decode(payload).unwrap(), b"hello");

            // Split one frame across two writes to exercise line buffering
            let ack = serde_json::to_string(&Frame::Ack { id }).unwrap();
            let command = serde_json::to_string(&Frame::Command {
                payload: STANDARD.encode(br#"{"method":"exit"}"#),
            })
            .unwrap();
            let wire = format!("{ack}\n{command}\n");
            let (head, tail) = wire.split_at(ack.len() + 5);
            write.write_all(head.as_bytes()).await.unwrap();
            write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            write.write_all(tail.as_bytes()).await.unwrap();
            write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let mut transport = TcpBridgeTransport::connect("127.0.0.1", port).await.unwrap();
        let id = transport.send(Topic::Telemetry, b"hello", QoS::AtLeastOnce).await.unwrap();
        assert_eq!(id, Some(1));

        let mut received = Vec::new();
        while received.len() < 2 {
            received.extend(transport.poll(Duration::from_secs(2)).await.unwrap());
        }
        assert_eq!(received[0], Inbound::Ack(1));
        assert_eq!(received[1], Inbound::CloudMessage(br#"{"method":"exit"}"#.to_vec()));

        bridge.await.unwrap();
    }
}
