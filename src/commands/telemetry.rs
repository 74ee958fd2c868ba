use tracing::info;

use super::{CommandError, CommandRequest, Flow};
use crate::engine::agent::DeviceAgent;
use crate::engine::error::ParseError;
use crate::engine::transport::Transport;

/// Send the command payload back as at-least-once telemetry
pub async fn echo<T: Transport>(agent: &mut DeviceAgent<T>, request: &CommandRequest) -> Result<Flow, CommandError> {
    if request.payload.is_empty() {
        return Err(ParseError::missing("echo command", "payload").into());
    }
    agent.session.send_telemetry_and_await(&request.payload).await?;
    info!(bytes = request.payload.len(), "Echoed payload");
    Ok(Flow::Continue)
}

pub fn exit(_request: &CommandRequest) -> Flow {
    info!("Exit requested");
    Flow::Stop
}
