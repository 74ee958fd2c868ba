//! Device Update Core
//!
//! Trust verification and state tracking for cloud-offered updates.
//!
//! Components:
//! - `root_keys` - Embedded root key registry
//! - `jws` - Compact signature envelope codec
//! - `verify` - Manifest authentication
//! - `request` - Update request and manifest model
//! - `state` - Update agent state machine
//! - `report` - Reported-property documents

pub mod jws;
pub mod report;
pub mod request;
pub mod root_keys;
pub mod state;
pub mod verify;

#[cfg(test)]
pub(crate) mod test_keys;

pub use report::DeviceProperties;
pub use request::{UpdateId, UpdateManifest, UpdateRequest, Workflow, WorkflowAction};
pub use root_keys::{RootKey, RootKeyRegistry};
pub use state::{AgentState, Decision, InstallOutcome, StateError, UpdateAgent};
pub use verify::{AuthError, AuthenticatedUpdate, ManifestAuthenticator};
