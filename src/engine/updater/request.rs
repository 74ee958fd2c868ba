//! Update Request Model
//!
//! Typed view of the `deviceUpdate` component the service writes into the
//! properties document, and of the manifest it carries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::engine::error::ParseError;
use crate::engine::properties::ComponentPayload;

/// Identity of an installable update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateId {
    pub provider: String,
    pub name: String,
    pub version: String,
}

impl UpdateId {
    pub fn new(provider: &str, name: &str, version: &str) -> Self {
        Self {
            provider: provider.to_string(),
            name: name.to_string(),
            version: version.to_string(),
        }
    }

    /// Compact JSON form used for `installedUpdateId`
    pub fn to_json_string(&self) -> String {
        format!(
            "{{\"provider\":{},\"name\":{},\"version\":{}}}",
            json_string(&self.provider),
            json_string(&self.name),
            json_string(&self.version)
        )
    }
}

fn json_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.provider, self.name, self.version)
    }
}

/// Workflow action requested by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum WorkflowAction {
    ApplyDeployment,
    Cancel,
    Other(u32),
}

impl From<u32> for WorkflowAction {
    fn from(code: u32) -> Self {
        match code {
            3 => Self::ApplyDeployment,
            255 => Self::Cancel,
            other => Self::Other(other),
        }
    }
}

impl From<WorkflowAction> for u32 {
    fn from(action: WorkflowAction) -> Self {
        match action {
            WorkflowAction::ApplyDeployment => 3,
            WorkflowAction::Cancel => 255,
            WorkflowAction::Other(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workflow {
    pub action: WorkflowAction,
    pub id: String,
    #[serde(
        rename = "retryTimestamp",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub retry_timestamp: Option<String>,
}

/// A proposed update, as extracted from the properties document.
///
/// Nothing here is trusted yet: it must go through
/// [`ManifestAuthenticator::authenticate_request`](super::verify::ManifestAuthenticator::authenticate_request)
/// before any decision is made.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateRequest {
    pub workflow: Workflow,
    /// Manifest JSON text exactly as delivered; the signed digest covers these bytes
    pub manifest: String,
    /// Compact JWS over the manifest digest
    pub signature: String,
    pub file_urls: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct DeviceUpdateComponent {
    service: Option<ServiceSection>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceSection {
    workflow: Option<Workflow>,
    update_manifest: Option<String>,
    update_manifest_signature: Option<String>,
    #[serde(default)]
    file_urls: Option<BTreeMap<String, String>>,
}

impl UpdateRequest {
    pub fn from_component(component: &ComponentPayload<'_>) -> Result<Self, ParseError> {
        const CONTEXT: &str = "deviceUpdate component";

        let parsed: DeviceUpdateComponent = component.deserialize(CONTEXT)?;
        let service = parsed
            .service
            .ok_or_else(|| ParseError::missing(CONTEXT, "service"))?;
        let workflow = service
            .workflow
            .ok_or_else(|| ParseError::missing(CONTEXT, "workflow"))?;
        let manifest = service
            .update_manifest
            .filter(|m| !m.is_empty())
            .ok_or_else(|| ParseError::missing(CONTEXT, "updateManifest"))?;
        let signature = service
            .update_manifest_signature
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ParseError::missing(CONTEXT, "updateManifestSignature"))?;

        Ok(Self {
            workflow,
            manifest,
            signature,
            file_urls: service.file_urls.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateManifest {
    pub manifest_version: String,
    pub update_id: UpdateId,
    #[serde(default)]
    pub compatibility: Vec<BTreeMap<String, String>>,
    #[serde(default)]
    pub instructions: Instructions,
    #[serde(default)]
    pub files: BTreeMap<String, ManifestFile>,
    #[serde(default)]
    pub created_date_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instructions {
    #[serde(default)]
    pub steps: Vec<InstructionStep>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionStep {
    #[serde(default, rename = "type")]
    pub step_type: Option<String>,
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub handler_properties: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFile {
    pub file_name: String,
    pub size_in_bytes: u64,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

impl UpdateManifest {
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        serde_json::from_str(text).map_err(|e| ParseError::json("update manifest", e))
    }

    /// Whether a device with these properties may install this update
    pub fn is_compatible_with(&self, manufacturer: &str, model: &str) -> bool {
        if self.compatibility.is_empty() {
            return true;
        }
        self.compatibility.iter().any(|entry| {
            entry.get("manufacturer").map_or(true, |m| m == manufacturer)
                && entry.get("model").map_or(true, |m| m == model)
        })
    }
}
