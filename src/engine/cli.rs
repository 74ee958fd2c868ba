//! ADU Agent CLI Module
//! Offline tooling for inspecting keys, manifests and properties documents

pub mod formatter;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::engine::properties::{PropertiesKind, DEVICE_UPDATE_COMPONENT};

#[derive(Parser, Debug)]
#[command(name = "adu-agent-cli")]
#[command(author = "ADU Agent Team")]
#[command(version)]
#[command(about = "Inspect device update keys, manifests and properties documents", long_about = None)]
pub struct Cli {
    /// Directory holding adu-agent.config.json (defaults to current directory)
    #[arg(short, long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Output format (json for scripting)
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Shape of a properties document on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DocumentKind {
    /// Full document with `desired` and `reported` sections
    Full,
    /// Writable-properties patch
    Patch,
}

impl From<DocumentKind> for PropertiesKind {
    fn from(kind: DocumentKind) -> Self {
        match kind {
            DocumentKind::Full => PropertiesKind::Full,
            DocumentKind::Patch => PropertiesKind::WritablePatch,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the embedded root keys
    Keys,

    /// Authenticate a manifest against its detached signature
    Verify {
        /// Manifest JSON file
        manifest: PathBuf,

        /// File holding the compact JWS signature
        signature: PathBuf,
    },

    /// Locate a component in a properties document
    Scan {
        /// Properties document file
        document: PathBuf,

        #[arg(short, long, default_value = "patch")]
        kind: DocumentKind,

        /// Component to look for
        #[arg(long, default_value = DEVICE_UPDATE_COMPONENT)]
        component: String,
    },

    /// Extract and authenticate the update request in a properties document
    Request {
        /// Properties document file
        document: PathBuf,

        #[arg(short, long, default_value = "patch")]
        kind: DocumentKind,
    },

    /// Agent configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write a default configuration
    Init {
        #[arg(long, default_value = "PC")]
        manufacturer: String,

        #[arg(long, default_value = "Linux-E2E")]
        model: String,
    },

    /// Show the effective configuration
    Show,
}

impl Cli {
    pub fn get_config_dir(&self) -> PathBuf {
        self.config_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
    }
}
