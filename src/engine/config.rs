//! Agent Configuration Module
//! Handles loading and validating adu-agent.config.json

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::engine::backoff::BackoffPolicy;
use crate::engine::updater::report::{DeviceProperties, DEFAULT_ADU_VERSION, DEFAULT_INTERFACE_ID};
use crate::engine::updater::request::UpdateId;
use crate::engine::updater::verify::DEFAULT_SCRATCH_SIZE;

pub const CONFIG_FILE_NAME: &str = "adu-agent.config.json";

/// Overrides the name of the update id adopted by `verify_final_state`
pub const UPDATE_NAME_ENV: &str = "ADU_UPDATE_NAME";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("Failed to read config: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Invalid config format: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub version: String,
    pub device: DeviceConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub backoff: BackoffPolicy,
    #[serde(default)]
    pub verification: VerificationConfig,
    #[serde(default)]
    pub queues: QueueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub manufacturer: String,
    pub model: String,
    pub current_update: UpdateId,
    /// Update id adopted when a final state is confirmed with nothing in progress
    #[serde(default)]
    pub target_update: Option<UpdateId>,
    #[serde(default = "default_interface_id")]
    pub interface_id: String,
    #[serde(default = "default_adu_version")]
    pub adu_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Bound on a single poll of the transport
    #[serde(default = "default_process_loop_ms")]
    pub process_loop_ms: u64,
    #[serde(default = "default_ack_ms")]
    pub ack_ms: u64,
    /// Interval between "Waiting for ADU" indicators
    #[serde(default = "default_waiting_interval_ms")]
    pub waiting_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default = "default_scratch_buffer_size")]
    pub scratch_buffer_size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_command_queue")]
    pub commands: usize,
    #[serde(default = "default_properties_queue")]
    pub properties: usize,
}

fn default_interface_id() -> String {
    DEFAULT_INTERFACE_ID.to_string()
}

fn default_adu_version() -> String {
    DEFAULT_ADU_VERSION.to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8883
}

fn default_process_loop_ms() -> u64 {
    2000
}

fn default_ack_ms() -> u64 {
    2000
}

fn default_waiting_interval_ms() -> u64 {
    10_000
}

fn default_scratch_buffer_size() -> usize {
    DEFAULT_SCRATCH_SIZE
}

fn default_command_queue() -> usize {
    8
}

fn default_properties_queue() -> usize {
    4
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            process_loop_ms: default_process_loop_ms(),
            ack_ms: default_ack_ms(),
            waiting_interval_ms: default_waiting_interval_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn process_loop(&self) -> Duration {
        Duration::from_millis(self.process_loop_ms)
    }

    pub fn ack(&self) -> Duration {
        Duration::from_millis(self.ack_ms)
    }

    pub fn waiting_interval(&self) -> Duration {
        Duration::from_millis(self.waiting_interval_ms)
    }
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            scratch_buffer_size: default_scratch_buffer_size(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            commands: default_command_queue(),
            properties: default_properties_queue(),
        }
    }
}

impl DeviceConfig {
    pub fn properties(&self) -> DeviceProperties {
        DeviceProperties {
            manufacturer: self.manufacturer.clone(),
            model: self.model.clone(),
            interface_id: self.interface_id.clone(),
            adu_version: self.adu_version.clone(),
        }
    }
}

impl AgentConfig {
    pub fn load(config_dir: &Path) -> Result<Self, ConfigError> {
        Self::load_file(&config_dir.join(CONFIG_FILE_NAME))
    }

    pub fn load_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::NotFound(config_path.to_path_buf()));
        }
        let content = std::fs::read_to_string(config_path)?;
        let config: AgentConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn default_for_device(manufacturer: &str, model: &str) -> Self {
        Self {
            version: "0.1.0".to_string(),
            device: DeviceConfig {
                manufacturer: manufacturer.to_string(),
                model: model.to_string(),
                current_update: UpdateId::new("ADU-E2E-Tests", "Linux-E2E-Update", "1.0"),
                target_update: Some(UpdateId::new("ADU-E2E-Tests", "Linux-E2E-Update", "1.1")),
                interface_id: default_interface_id(),
                adu_version: default_adu_version(),
            },
            hub: HubConfig::default(),
            timeouts: TimeoutConfig::default(),
            backoff: BackoffPolicy::default(),
            verification: VerificationConfig::default(),
            queues: QueueConfig::default(),
        }
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_update_name_override(std::env::var(UPDATE_NAME_ENV).ok());
    }

    /// Rename the target update, deriving one from the current update if unset
    pub fn apply_update_name_override(&mut self, name: Option<String>) {
        let Some(name) = name.filter(|n| !n.trim().is_empty()) else {
            return;
        };
        let target = self
            .device
            .target_update
            .get_or_insert_with(|| self.device.current_update.clone());
        target.name = name;
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.manufacturer.is_empty() || self.device.model.is_empty() {
            return Err(ConfigError::Invalid(
                "device.manufacturer and device.model are required".to_string(),
            ));
        }
        if self.queues.commands == 0 || self.queues.properties == 0 {
            return Err(ConfigError::Invalid("queue capacities must be at least 1".to_string()));
        }
        if self.backoff.max_attempts == 0 {
            return Err(ConfigError::Invalid("backoff.max_attempts must be at least 1".to_string()));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::Invalid(
                "backoff.base_delay_ms exceeds backoff.max_delay_ms".to_string(),
            ));
        }
        if self.timeouts.process_loop_ms == 0 || self.timeouts.ack_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let config = AgentConfig::default_for_device("PC", "Linux-E2E");
        config.save(dir.path()).unwrap();

        let loaded = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(loaded.device.manufacturer, "PC");
        assert_eq!(loaded.device.current_update.version, "1.0");
        assert_eq!(loaded.hub.port, 8883);
        assert_eq!(loaded.queues, QueueConfig::default());
    }

    #[test]
    fn test_minimal_file_gets_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{
                "version": "0.1.0",
                "device": {
                    "manufacturer": "PC",
                    "model": "Linux-E2E",
                    "current_update": {"provider": "P", "name": "N", "version": "1.0"}
                }
            }"#,
        )
        .unwrap();

        let config = AgentConfig::load(dir.path()).unwrap();
        assert_eq!(config.hub.host, "127.0.0.1");
        assert_eq!(config.timeouts.ack(), Duration::from_secs(2));
        assert_eq!(config.verification.scratch_buffer_size, DEFAULT_SCRATCH_SIZE);
        assert_eq!(config.backoff, BackoffPolicy::default());
        assert_eq!(config.device.interface_id, DEFAULT_INTERFACE_ID);
        assert!(config.device.target_update.is_none());
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            AgentConfig::load(dir.path()),
            Err(ConfigError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AgentConfig::default_for_device("PC", "Linux-E2E");
        config.queues.commands = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AgentConfig::default_for_device("PC", "Linux-E2E");
        config.backoff.base_delay_ms = config.backoff.max_delay_ms + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_update_name_override() {
        let mut config = AgentConfig::default_for_device("PC", "Linux-E2E");
        config.apply_update_name_override(Some("Custom-Update".to_string()));
        let target = config.device.target_update.clone().unwrap();
        assert_eq!(target.name, "Custom-Update");
        assert_eq!(target.version, "1.1");

        config.device.target_update = None;
        config.apply_update_name_override(Some("From-Current".to_string()));
        assert_eq!(config.device.target_update.unwrap().version, "1.0");

        let mut untouched = AgentConfig::default_for_device("PC", "Linux-E2E");
        untouched.apply_update_name_override(Some("  ".to_string()));
        assert_eq!(untouched.device.target_update.unwrap().name, "Linux-E2E-Update");
    }
}
