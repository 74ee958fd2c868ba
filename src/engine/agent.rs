//! Device agent loop
//!
//! Announces the connection, reports the initial idle state, then polls the
//! hub: queued commands are dispatched one at a time, property documents
//! are checked for the update component until it first appears, and quiet
//! periods emit a waiting indicator until then. An `exit` command stops the
//! loop at the top of the next iteration.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::commands::{self, Command, CommandError, CommandRequest, Flow};
use crate::engine::acks::AckError;
use crate::engine::config::AgentConfig;
use crate::engine::properties::{scan, PropertiesResponse, DEVICE_UPDATE_COMPONENT};
use crate::engine::session::HubSession;
use crate::engine::transport::{Transport, TransportError};
use crate::engine::updater::report::{agent_state_report, DeviceProperties};
use crate::engine::updater::root_keys::RootKeyRegistry;
use crate::engine::updater::state::UpdateAgent;
use crate::engine::updater::verify::{AuthError, ManifestAuthenticator};

pub const CONNECTED_MESSAGE: &[u8] = b"\"CONNECTED\"";
pub const ADU_RECEIVED_MESSAGE: &[u8] = b"\"ADU-RECEIVED\"";
pub const WAITING_FOR_ADU_MESSAGE: &[u8] = b"\"Waiting for ADU\"";

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Verification setup failed: {0}")]
    Verification(#[from] AuthError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Ack(#[from] AckError),
}

pub struct DeviceAgent<T: Transport> {
    pub(crate) session: HubSession<T>,
    pub(crate) updates: UpdateAgent,
    pub(crate) authenticator: ManifestAuthenticator,
    pub(crate) device: DeviceProperties,
    pub(crate) config: AgentConfig,
    adu_received: bool,
    running: bool,
}

impl<T: Transport> DeviceAgent<T> {
    /// Fails when the verification scratch cannot hold the registry's keys
    pub fn new(config: AgentConfig, transport: T, registry: RootKeyRegistry) -> Result<Self, AgentError> {
        let authenticator = ManifestAuthenticator::new(registry, config.verification.scratch_buffer_size)?;
        let session = HubSession::new(transport, config.queues, config.timeouts.ack());
        Ok(Self {
            session,
            updates: UpdateAgent::new(config.device.current_update.clone()),
            authenticator,
            device: config.device.properties(),
            config,
            adu_received: false,
            running: true,
        })
    }

    pub fn session(&self) -> &HubSession<T> {
        &self.session
    }

    pub fn updates(&self) -> &UpdateAgent {
        &self.updates
    }

    pub fn adu_received(&self) -> bool {
        self.adu_received
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Broadcast the full agent state
    pub async fn report_agent_state(&mut self) -> Result<(), AckError> {
        let report = agent_state_report(&self.device, &self.updates.snapshot());
        self.session.report_properties(&report).await
    }

    /// Resolve `name` and run its handler with `payload`
    pub async fn dispatch(&mut self, name: &str, payload: Vec<u8>) -> Result<Flow, CommandError> {
        let command = Command::from_name(name).ok_or_else(|| CommandError::NotFound(name.to_string()))?;
        let request = CommandRequest::new(command, payload)?;
        commands::execute(self, request).await
    }

    pub async fn run(&mut self) -> Result<(), AgentError> {
        self.session.send_telemetry_and_await(CONNECTED_MESSAGE).await?;
        info!("Connected");
        self.report_agent_state().await?;

        while self.running {
            if self.step().await? == Flow::Stop {
                self.running = false;
            }
        }
        info!("Processing loop stopped");
        Ok(())
    }

    /// One loop iteration: handle a single queued command or properties document
    pub async fn step(&mut self) -> Result<Flow, AgentError> {
        match self.session.poll(self.config.timeouts.process_loop()).await {
            Ok(_) => {}
            Err(TransportError::Protocol(message)) => {
                warn!(error = %message, "Dropping undecodable inbound traffic");
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(raw) = self.session.next_command() {
            return Ok(self.handle_message(raw).await);
        }

        if let Some(response) = self.session.next_properties() {
            if !self.adu_received && self.check_for_update(&response) {
                self.adu_received = true;
                info!("Update component received");
                self.session.send_telemetry_and_await(ADU_RECEIVED_MESSAGE).await?;
            }
            return Ok(Flow::Continue);
        }

        if !self.adu_received {
            self.session.send_telemetry(WAITING_FOR_ADU_MESSAGE).await?;
            tokio::time::sleep(self.config.timeouts.waiting_interval()).await;
        }
        Ok(Flow::Continue)
    }

    /// Parse and dispatch one inbound message. Failures are logged, never fatal.
    async fn handle_message(&mut self, raw: Vec<u8>) -> Flow {
        let request = match CommandRequest::parse(raw) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable command");
                return Flow::Continue;
            }
        };
        let command = request.command;
        info!(command = %command, "Executing command");

        match commands::execute(self, request).await {
            Ok(flow) => flow,
            Err(e) => {
                error!(command = %command, error = %e, "Command failed");
                Flow::Continue
            }
        }
    }

    fn check_for_update(&self, response: &PropertiesResponse) -> bool {
        match response.document() {
            Ok(document) => scan(&document, DEVICE_UPDATE_COMPONENT).is_some(),
            Err(e) => {
                warn!(error = %e, "Dropping malformed properties document");
                false
            }
        }
    }
}
