//! Device update command handlers
//!
//! Every handler finishes by echoing the raw command as at-least-once
//! telemetry, which the service uses as its completion signal.

use tracing::{info, warn};

use super::{CommandError, CommandRequest, Flow};
use crate::engine::agent::DeviceAgent;
use crate::engine::error::ParseError;
use crate::engine::properties::{scan, DEVICE_UPDATE_COMPONENT};
use crate::engine::transport::Transport;
use crate::engine::updater::report::request_response;
use crate::engine::updater::request::{UpdateRequest, Workflow};
use crate::engine::updater::state::{AgentState, Decision, InstallOutcome, UpdateAgent};

async fn complete<T: Transport>(agent: &mut DeviceAgent<T>, request: &CommandRequest) -> Result<Flow, CommandError> {
    agent.session.send_telemetry_and_await(&request.raw).await?;
    info!(command = %request.command, "Command complete");
    Ok(Flow::Continue)
}

/// Record the rejection and report it with the evaluated version
async fn reject_offer<T: Transport>(agent: &mut DeviceAgent<T>, workflow: &Workflow, version: u32) -> Result<(), CommandError> {
    agent.updates.reject(workflow, version);
    agent
        .session
        .report_properties(&request_response(Decision::Reject, version, workflow))
        .await?;
    Ok(())
}

/// Report an idle agent with the configured current update
pub async fn send_init_adu_state<T: Transport>(
    agent: &mut DeviceAgent<T>,
    request: &CommandRequest,
) -> Result<Flow, CommandError> {
    agent.updates = UpdateAgent::new(agent.config.device.current_update.clone());
    agent.report_agent_state().await?;
    complete(agent, request).await
}

/// Fetch the full properties document; fail if none arrives in time
pub async fn get_adu_twin<T: Transport>(agent: &mut DeviceAgent<T>, request: &CommandRequest) -> Result<Flow, CommandError> {
    let timeout = agent.config.timeouts.process_loop();
    let response = agent
        .session
        .fetch_properties(timeout)
        .await?
        .ok_or(CommandError::NoProperties)?;
    let document = response.document()?;
    info!(
        version = ?document.version(),
        components = ?document.component_names().collect::<Vec<_>>(),
        "Received properties document"
    );
    complete(agent, request).await
}

/// Evaluate the offered update and accept or reject it
pub async fn apply_update<T: Transport>(agent: &mut DeviceAgent<T>, request: &CommandRequest) -> Result<Flow, CommandError> {
    const CONTEXT: &str = "properties document";

    let timeout = agent.config.timeouts.process_loop();
    let response = agent
        .session
        .fetch_properties(timeout)
        .await?
        .ok_or(CommandError::NoProperties)?;
    let document = response.document()?;
    let version = document
        .version()
        .ok_or_else(|| ParseError::missing(CONTEXT, "$version"))?;
    let component = scan(&document, DEVICE_UPDATE_COMPONENT)
        .ok_or(CommandError::MissingComponent(DEVICE_UPDATE_COMPONENT))?;
    let update_request = UpdateRequest::from_component(&component)?;
    let workflow = update_request.workflow.clone();
    info!(workflow_id = %workflow.id, version, "Authenticating update manifest");

    let authenticated = match agent.authenticator.authenticate_request(update_request) {
        Ok(update) => update,
        Err(e) => {
            warn!(workflow_id = %workflow.id, version, error = %e, "Manifest authentication failed");
            reject_offer(agent, &workflow, version).await?;
            return Err(e.into());
        }
    };

    let device = &agent.config.device;
    if !authenticated
        .manifest()
        .is_compatible_with(&device.manufacturer, &device.model)
    {
        let update = authenticated.manifest().update_id.to_string();
        warn!(update = %update, "Update is not compatible with this device");
        reject_offer(agent, &workflow, version).await?;
        return Err(CommandError::Incompatible { update });
    }

    // A busy agent still answers the offer with its version
    let accepted = match agent.updates.accept(authenticated, version) {
        Ok(accepted) => accepted,
        Err(e) => {
            warn!(workflow_id = %workflow.id, version, error = %e, "Cannot accept update in current state");
            reject_offer(agent, &workflow, version).await?;
            return Err(e.into());
        }
    };
    agent
        .session
        .report_properties(&request_response(Decision::Accept, version, accepted.workflow()))
        .await?;
    agent.updates.begin_deployment(accepted)?;
    agent.report_agent_state().await?;

    complete(agent, request).await
}

/// Adopt the installed update once the service has confirmed it
pub async fn verify_final_state<T: Transport>(
    agent: &mut DeviceAgent<T>,
    request: &CommandRequest,
) -> Result<Flow, CommandError> {
    if agent.updates.state() == AgentState::DeploymentInProgress {
        agent.updates.complete(InstallOutcome::Succeeded)?;
        agent.updates.reset()?;
    } else {
        let device = &agent.config.device;
        let installed = device
            .target_update
            .clone()
            .unwrap_or_else(|| device.current_update.clone());
        agent.updates.confirm_installed(installed)?;
    }
    info!(update = %agent.updates.current_update(), "Final state confirmed");
    agent.report_agent_state().await?;
    complete(agent, request).await
}
