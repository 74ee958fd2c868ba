//! Update Agent State Machine
//!
//! Tracks the device's update posture and the accept/reject decision for the
//! request under evaluation. Transitions run one way until an explicit reset:
//!
//! ```text
//! Idle -> DeploymentInProgress -> Succeeded | Failed -> Idle
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use super::request::{UpdateId, Workflow};
use super::verify::AuthenticatedUpdate;

/// Result code reported for a successful install
pub const RESULT_INSTALL_SUCCESS: i32 = 700;

/// Current posture of the update agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    DeploymentInProgress,
    Failed,
    Succeeded,
}

impl AgentState {
    /// Wire code; a success is reported as idle with a success result
    pub fn code(self) -> u32 {
        match self {
            Self::Idle | Self::Succeeded => 0,
            Self::DeploymentInProgress => 6,
            Self::Failed => 255,
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::DeploymentInProgress => "deployment_in_progress",
            Self::Failed => "failed",
            Self::Succeeded => "succeeded",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Accept,
    Reject,
}

impl Decision {
    pub fn response_code(self) -> u16 {
        match self {
            Self::Accept => 200,
            Self::Reject => 406,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Accept => "accepted",
            Self::Reject => "rejected",
        }
    }
}

/// Outcome of the install step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    Succeeded,
    Failed { result_code: i32 },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition { from: AgentState, to: AgentState },
}

/// An authenticated update the agent has decided to accept.
///
/// Produced only by [`UpdateAgent::accept`]; deployment cannot begin
/// without one.
#[derive(Debug)]
pub struct AcceptedUpdate {
    update: AuthenticatedUpdate,
    version: u32,
}

impl AcceptedUpdate {
    pub fn update(&self) -> &AuthenticatedUpdate {
        &self.update
    }

    /// Properties version the decision answered
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn workflow(&self) -> &Workflow {
        &self.update.request().workflow
    }

    pub fn update_id(&self) -> &UpdateId {
        &self.update.manifest().update_id
    }
}

/// Full-state view used for reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    pub state: AgentState,
    pub result_code: Option<i32>,
    pub workflow: Option<Workflow>,
    pub installed_update_id: UpdateId,
    pub installing_update_id: Option<UpdateId>,
}

/// The single agent state record
#[derive(Debug, Clone)]
pub struct UpdateAgent {
    state: AgentState,
    result_code: Option<i32>,
    current_update: UpdateId,
    installing: Option<UpdateId>,
    workflow: Option<Workflow>,
    last_decision: Option<(Decision, u32)>,
}

impl UpdateAgent {
    pub fn new(current_update: UpdateId) -> Self {
        Self {
            state: AgentState::Idle,
            result_code: None,
            current_update,
            installing: None,
            workflow: None,
            last_decision: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn current_update(&self) -> &UpdateId {
        &self.current_update
    }

    pub fn installing(&self) -> Option<&UpdateId> {
        self.installing.as_ref()
    }

    pub fn last_decision(&self) -> Option<(Decision, u32)> {
        self.last_decision
    }

    /// Accept an authenticated update answering properties `version`
    pub fn accept(&mut self, update: AuthenticatedUpdate, version: u32) -> Result<AcceptedUpdate, StateError> {
        self.require(AgentState::Idle, AgentState::DeploymentInProgress)?;
        self.last_decision = Some((Decision::Accept, version));
        info!(
            update = %update.manifest().update_id,
            workflow_id = %update.request().workflow.id,
            version,
            "Update accepted"
        );
        Ok(AcceptedUpdate { update, version })
    }

    /// Record a rejection; the state itself does not move
    pub fn reject(&mut self, workflow: &Workflow, version: u32) {
        self.last_decision = Some((Decision::Reject, version));
        info!(workflow_id = %workflow.id, version, "Update rejected");
    }

    pub fn begin_deployment(&mut self, accepted: AcceptedUpdate) -> Result<(), StateError> {
        self.require(AgentState::Idle, AgentState::DeploymentInProgress)?;
        let (request, manifest) = accepted.update.into_parts();
        self.installing = Some(manifest.update_id);
        self.workflow = Some(request.workflow);
        self.result_code = None;
        self.state = AgentState::DeploymentInProgress;
        Ok(())
    }

    pub fn complete(&mut self, outcome: InstallOutcome) -> Result<(), StateError> {
        let to = match outcome {
            InstallOutcome::Succeeded => AgentState::Succeeded,
            InstallOutcome::Failed { .. } => AgentState::Failed,
        };
        self.require(AgentState::DeploymentInProgress, to)?;
        self.result_code = Some(match outcome {
            InstallOutcome::Succeeded => RESULT_INSTALL_SUCCESS,
            InstallOutcome::Failed { result_code } => result_code,
        });
        self.state = to;
        Ok(())
    }

    /// Return to idle. A successful install becomes the current update.
    pub fn reset(&mut self) -> Result<(), StateError> {
        if self.state == AgentState::DeploymentInProgress {
            return Err(StateError::InvalidTransition {
                from: self.state,
                to: AgentState::Idle,
            });
        }
        if self.state == AgentState::Succeeded {
            if let Some(installed) = self.installing.take() {
                self.current_update = installed;
            }
        }
        self.installing = None;
        self.workflow = None;
        self.state = AgentState::Idle;
        Ok(())
    }

    /// Adopt an externally confirmed install while nothing is in progress
    pub fn confirm_installed(&mut self, update_id: UpdateId) -> Result<(), StateError> {
        self.reset()?;
        self.current_update = update_id;
        Ok(())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            state: self.state,
            result_code: self.result_code,
            workflow: self.workflow.clone(),
            installed_update_id: self.current_update.clone(),
            installing_update_id: self.installing.clone(),
        }
    }

    fn require(&self, from: AgentState, to: AgentState) -> Result<(), StateError> {
        if self.state == from {
            Ok(())
        } else {
            Err(StateError::InvalidTransition { from: self.state, to })
        }
    }
}
