// ADU Agent Engine - Core module structure
pub mod acks;
pub mod agent;
pub mod backoff;
pub mod cli;
pub mod config;
pub mod error;
pub mod properties;
pub mod session;
pub mod transport;
pub mod updater;

pub use agent::DeviceAgent;
pub use config::AgentConfig;
pub use session::HubSession;
