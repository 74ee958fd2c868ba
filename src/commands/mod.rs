//! Device Commands Module
//!
//! Cloud-issued commands arrive as `{"method": "<name>", "payload": <json>}`.
//! The name maps to exactly one [`Command`]; unknown names are rejected
//! before anything runs.

pub mod adu;
pub mod telemetry;

use serde::Deserialize;
use serde_json::value::RawValue;
use thiserror::Error;

use crate::engine::acks::AckError;
use crate::engine::agent::DeviceAgent;
use crate::engine::error::ParseError;
use crate::engine::transport::{Transport, TransportError};
use crate::engine::updater::state::StateError;
use crate::engine::updater::verify::AuthError;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ack(#[from] AckError),

    #[error(transparent)]
    State(#[from] StateError),

    #[error("No properties document received")]
    NoProperties,

    #[error("Properties document has no {0} component")]
    MissingComponent(&'static str),

    #[error("Update {update} is not compatible with this device")]
    Incompatible { update: String },
}

/// Whether the processing loop keeps going after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Echo,
    Exit,
    SendInitAduState,
    GetAduTwin,
    ApplyUpdate,
    VerifyFinalState,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Echo,
        Command::Exit,
        Command::SendInitAduState,
        Command::GetAduTwin,
        Command::ApplyUpdate,
        Command::VerifyFinalState,
    ];

    /// Exact, case-sensitive lookup
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "echo" => Some(Self::Echo),
            "exit" => Some(Self::Exit),
            "send_init_adu_state" => Some(Self::SendInitAduState),
            "get_adu_twin" => Some(Self::GetAduTwin),
            "apply_update" => Some(Self::ApplyUpdate),
            "verify_final_state" => Some(Self::VerifyFinalState),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Echo => "echo",
            Self::Exit => "exit",
            Self::SendInitAduState => "send_init_adu_state",
            Self::GetAduTwin => "get_adu_twin",
            Self::ApplyUpdate => "apply_update",
            Self::VerifyFinalState => "verify_final_state",
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    method: Option<String>,
    #[serde(borrow, default)]
    payload: Option<&'a RawValue>,
}

/// One received command, owned for the duration of a single dispatch
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub command: Command,
    /// The message exactly as received; handlers echo it back on completion
    pub raw: Vec<u8>,
    /// Raw JSON of `payload`, empty when absent
    pub payload: Vec<u8>,
}

impl CommandRequest {
    /// Build the envelope for a locally dispatched command. A non-empty
    /// payload must be valid JSON.
    pub fn new(command: Command, payload: Vec<u8>) -> Result<Self, CommandError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            let raw = serde_json::json!({ "method": command.name() });
            return Ok(Self {
                command,
                raw: raw.to_string().into_bytes(),
                payload: Vec::new(),
            });
        }

        let value: &RawValue =
            serde_json::from_slice(&payload).map_err(|e| ParseError::json("command payload", e))?;
        let raw = serde_json::json!({ "method": command.name(), "payload": value });
        Ok(Self {
            command,
            raw: raw.to_string().into_bytes(),
            payload,
        })
    }

    pub fn parse(raw: Vec<u8>) -> Result<Self, CommandError> {
        const CONTEXT: &str = "command";

        let envelope: Envelope<'_> = serde_json::from_slice(&raw).map_err(|e| ParseError::json(CONTEXT, e))?;
        let method = envelope
            .method
            .ok_or_else(|| ParseError::missing(CONTEXT, "method"))?;
        let command = Command::from_name(&method).ok_or(CommandError::NotFound(method))?;
        let payload = envelope
            .payload
            .map(|p| p.get().as_bytes().to_vec())
            .unwrap_or_default();

        Ok(Self { command, raw, payload })
    }
}

/// Run the handler for `request`
pub async fn execute<T: Transport>(agent: &mut DeviceAgent<T>, request: CommandRequest) -> Result<Flow, CommandError> {
    match request.command {
        Command::Echo => telemetry::echo(agent, &request).await,
        Command::Exit => Ok(telemetry::exit(&request)),
        Command::SendInitAduState => adu::send_init_adu_state(agent, &request).await,
        Command::GetAduTwin => adu::get_adu_twin(agent, &request).await,
        Command::ApplyUpdate => adu::apply_update(agent, &request).await,
        Command::VerifyFinalState => adu::verify_final_state(agent, &request).await,
    }
}
