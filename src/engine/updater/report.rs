//! Reported-property documents
//!
//! Every report is a full-state document, so sending one twice is harmless.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::request::Workflow;
use super::state::{Decision, StateSnapshot};
use crate::engine::properties::DEVICE_UPDATE_COMPONENT;

pub const DEFAULT_INTERFACE_ID: &str = "dtmi:azure:iot:deviceUpdateModel;2";
pub const DEFAULT_ADU_VERSION: &str = "DU;agent/1.0.0";
const COMPAT_PROPERTY_NAMES: &str = "manufacturer,model";

/// Identity the device reports alongside every state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceProperties {
    pub manufacturer: String,
    pub model: String,
    #[serde(rename = "interfaceId")]
    pub interface_id: String,
    #[serde(rename = "aduVer")]
    pub adu_version: String,
}

impl DeviceProperties {
    pub fn new(manufacturer: &str, model: &str) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            model: model.to_string(),
            interface_id: DEFAULT_INTERFACE_ID.to_string(),
            adu_version: DEFAULT_ADU_VERSION.to_string(),
        }
    }
}

pub fn agent_state_report(device: &DeviceProperties, snapshot: &StateSnapshot) -> Vec<u8> {
    let mut agent = json!({
        "deviceProperties": device,
        "compatPropertyNames": COMPAT_PROPERTY_NAMES,
        "state": snapshot.state.code(),
        "installedUpdateId": snapshot.installed_update_id.to_json_string(),
    });

    if let Some(workflow) = &snapshot.workflow {
        agent["workflow"] = json!(workflow);
    }
    if let Some(result_code) = snapshot.result_code {
        agent["lastInstallResult"] = json!({
            "resultCode": result_code,
            "extendedResultCode": 0,
        });
    }

    component_document(json!({ "__t": "c", "agent": agent }))
}

/// Answer to an update request, naming the properties version it answers
pub fn request_response(decision: Decision, version: u32, workflow: &Workflow) -> Vec<u8> {
    component_document(json!({
        "__t": "c",
        "service": {
            "ac": decision.response_code(),
            "av": version,
            "ad": decision.description(),
            "value": { "workflow": workflow },
        }
    }))
}

fn component_document(component: serde_json::Value) -> Vec<u8> {
    let mut document = serde_json::Map::new();
    document.insert(DEVICE_UPDATE_COMPONENT.to_string(), component);
    serde_json::Value::Object(document).to_string().into_bytes()
}
