//! ADU Agent - device-side update orchestration
//!
//! Dispatches cloud-issued commands, extracts update requests from the
//! device properties document, authenticates manifests against embedded
//! root keys and reports the update agent state.

pub mod commands;
pub mod engine;
