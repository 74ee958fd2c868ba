//! ADU Agent - device update agent
//!
//! Connects to the hub bridge with backoff, then runs the command loop
//! until the service sends `exit`.

use adu_agent::engine::{
    agent::DeviceAgent,
    backoff::connect_with_backoff,
    config::{AgentConfig, ConfigError},
    transport::TcpBridgeTransport,
    updater::root_keys::RootKeyRegistry,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "adu-agent")]
#[command(version, about = "Device update agent", long_about = None)]
struct Args {
    /// Directory holding adu-agent.config.json
    #[arg(short, long, default_value = ".")]
    config_dir: PathBuf,

    /// Override the bridge host
    #[arg(long)]
    host: Option<String>,

    /// Override the bridge port
    #[arg(long)]
    port: Option<u16>,

    /// Run with built-in defaults when no config file exists
    #[arg(long)]
    defaults: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args).await {
        error!(error = %e, "Agent stopped");
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match AgentConfig::load(&args.config_dir) {
        Ok(config) => config,
        Err(ConfigError::NotFound(path)) if args.defaults => {
            info!(path = %path.display(), "No config file, using defaults");
            AgentConfig::default_for_device("PC", "Linux-E2E")
        }
        Err(e) => return Err(e.into()),
    };
    config.apply_env_overrides();
    if let Some(host) = args.host {
        config.hub.host = host;
    }
    if let Some(port) = args.port {
        config.hub.port = port;
    }
    config.validate()?;

    let host = config.hub.host.clone();
    let port = config.hub.port;
    info!(host = %host, port, "Connecting to hub bridge");
    let transport = connect_with_backoff(
        |attempt| {
            let host = host.clone();
            async move {
                info!(attempt, "Connection attempt");
                TcpBridgeTransport::connect(&host, port).await
            }
        },
        &config.backoff,
    )
    .await?;

    let mut agent = DeviceAgent::new(config, transport, RootKeyRegistry::builtin())?;
    agent.run().await?;
    Ok(())
}
