//! ADU Agent CLI - offline inspection tool
//!
//! Verifies manifests, scans properties documents and manages the agent
//! configuration without connecting to a hub.

use adu_agent::engine::{
    cli::formatter::{format_size, truncate_middle, CliFormatter},
    cli::{Cli, Commands, ConfigAction, DocumentKind, OutputFormat},
    config::AgentConfig,
    properties::{scan, PropertiesDocument, DEVICE_UPDATE_COMPONENT},
    updater::jws::ManifestSignature,
    updater::request::UpdateRequest,
    updater::root_keys::RootKeyRegistry,
    updater::verify::ManifestAuthenticator,
};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = run_cli(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run_cli(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = cli.get_config_dir();
    let json_output = cli.format == OutputFormat::Json;

    match cli.command {
        Commands::Keys => cmd_keys(&config_dir, json_output)?,
        Commands::Verify { manifest, signature } => {
            cmd_verify(&config_dir, &manifest, &signature, json_output)?;
        }
        Commands::Scan {
            document,
            kind,
            component,
        } => cmd_scan(&document, kind, &component, json_output)?,
        Commands::Request { document, kind } => cmd_request(&config_dir, &document, kind, json_output)?,
        Commands::Config { action } => cmd_config(action, &config_dir, json_output)?,
    }

    Ok(())
}

/// Authenticator sized from the config when one exists, defaults otherwise
fn authenticator(config_dir: &Path) -> Result<ManifestAuthenticator, Box<dyn std::error::Error>> {
    let scratch = match AgentConfig::load(config_dir) {
        Ok(config) => config.verification.scratch_buffer_size,
        Err(adu_agent::engine::config::ConfigError::NotFound(_)) => {
            adu_agent::engine::updater::verify::DEFAULT_SCRATCH_SIZE
        }
        Err(e) => return Err(e.into()),
    };
    Ok(ManifestAuthenticator::new(RootKeyRegistry::builtin(), scratch)?)
}

fn cmd_keys(config_dir: &Path, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let auth = authenticator(config_dir)?;
    let registry = auth.registry();

    if json {
        let keys: Vec<_> = registry
            .iter()
            .map(|key| {
                serde_json::json!({
                    "id": key.id,
                    "bits": key.modulus_bits(),
                    "fingerprint": key.fingerprint(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::json!({
                "keys": keys,
                "scratch_size": auth.scratch_size(),
                "required_scratch": ManifestAuthenticator::required_scratch(registry),
            })
        );
    } else {
        CliFormatter::header("Root Keys");
        CliFormatter::table_header(&["ID", "Bits", "Fingerprint"]);
        for key in registry.iter() {
            let bits = key.modulus_bits().to_string();
            let fingerprint = key.fingerprint();
            CliFormatter::table_row(&[key.id.as_str(), bits.as_str(), fingerprint.as_str()]);
        }
        CliFormatter::kv("Scratch", &format_size(auth.scratch_size() as u64));
        CliFormatter::kv(
            "Required",
            &format_size(ManifestAuthenticator::required_scratch(registry) as u64),
        );
    }

    Ok(())
}

fn cmd_verify(config_dir: &Path, manifest: &PathBuf, signature: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let manifest_bytes = std::fs::read(manifest)?;
    let envelope = std::fs::read_to_string(signature)?;
    let envelope = envelope.trim();
    let auth = authenticator(config_dir)?;

    let key_id = ManifestSignature::from_envelope(envelope)?.key_id;
    let result = auth.authenticate(&manifest_bytes, envelope.as_bytes());

    if json {
        println!(
            "{}",
            serde_json::json!({
                "authenticated": result.is_ok(),
                "key_id": key_id,
                "error": result.as_ref().err().map(|e| e.to_string()),
            })
        );
    } else {
        match &result {
            Ok(root) => CliFormatter::success(&format!("Manifest authenticated (root {})", root)),
            Err(e) => CliFormatter::error(&format!("Authentication failed for key {}: {}", key_id, e)),
        }
    }

    result.map(|_| ()).map_err(Into::into)
}

fn cmd_scan(document: &PathBuf, kind: DocumentKind, component: &str, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(document)?;
    let parsed = PropertiesDocument::parse(kind.into(), &bytes)?;
    let found = scan(&parsed, component);

    if json {
        let raw = match &found {
            Some(payload) => Some(serde_json::from_str::<serde_json::Value>(payload.raw_json())?),
            None => None,
        };
        println!(
            "{}",
            serde_json::json!({
                "version": parsed.version(),
                "components": parsed.component_names().collect::<Vec<_>>(),
                "target": component,
                "found": found.is_some(),
                "payload": raw,
            })
        );
    } else {
        CliFormatter::header("Properties Document");
        CliFormatter::kv(
            "Version",
            &parsed.version().map_or_else(|| "none".to_string(), |v| v.to_string()),
        );
        for name in parsed.component_names() {
            CliFormatter::item(name);
        }
        match found {
            Some(payload) => {
                CliFormatter::success(&format!("Found {}", component));
                let pretty: serde_json::Value = serde_json::from_str(payload.raw_json())?;
                CliFormatter::json_block(&serde_json::to_string_pretty(&pretty)?);
            }
            None => CliFormatter::warning(&format!("No {} component (device keeps waiting)", component)),
        }
    }

    Ok(())
}

fn cmd_request(config_dir: &Path, document: &PathBuf, kind: DocumentKind, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(document)?;
    let parsed = PropertiesDocument::parse(kind.into(), &bytes)?;
    let component = scan(&parsed, DEVICE_UPDATE_COMPONENT)
        .ok_or_else(|| format!("No {} component in document", DEVICE_UPDATE_COMPONENT))?;
    let request = UpdateRequest::from_component(&component)?;
    let key_id = ManifestSignature::from_envelope(&request.signature)?.key_id;
    let auth = authenticator(config_dir)?;
    let workflow = request.workflow.clone();
    let signature = request.signature.clone();
    let update = auth.authenticate_request(request)?;
    let manifest = update.manifest();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "version": parsed.version(),
                "workflow": workflow,
                "update_id": manifest.update_id,
                "root_key": update.root_key_id(),
                "files": manifest.files,
            })
        );
    } else {
        CliFormatter::header("Update Request");
        CliFormatter::kv("Workflow", &workflow.id);
        CliFormatter::kv("Update", &manifest.update_id.to_string());
        CliFormatter::kv("Signature", &truncate_middle(&signature, 48));
        CliFormatter::kv("Signed by", &key_id);
        for (id, file) in &manifest.files {
            CliFormatter::item(&format!("{} {} ({})", id, file.file_name, format_size(file.size_in_bytes)));
        }
        CliFormatter::success(&format!("Manifest authenticated against {}", update.root_key_id()));
    }

    Ok(())
}

fn cmd_config(action: ConfigAction, config_dir: &PathBuf, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        ConfigAction::Init { manufacturer, model } => {
            let config = AgentConfig::default_for_device(&manufacturer, &model);
            config.validate()?;
            config.save(config_dir)?;
            if json {
                println!("{}", serde_json::json!({ "success": true, "dir": config_dir.display().to_string() }));
            } else {
                CliFormatter::success(&format!("Wrote config to {}", config_dir.display()));
            }
        }
        ConfigAction::Show => {
            let mut config = AgentConfig::load(config_dir)?;
            config.apply_env_overrides();
            if json {
                println!("{}", serde_json::to_string(&config)?);
            } else {
                CliFormatter::header("Agent Configuration");
                CliFormatter::kv("Device", &format!("{} {}", config.device.manufacturer, config.device.model));
                CliFormatter::kv("Current update", &config.device.current_update.to_string());
                if let Some(target) = &config.device.target_update {
                    CliFormatter::kv("Target update", &target.to_string());
                }
                CliFormatter::kv("Hub", &format!("{}:{}", config.hub.host, config.hub.port));
                CliFormatter::kv("Ack timeout", &format!("{}ms", config.timeouts.ack_ms));
                CliFormatter::kv(
                    "Backoff",
                    &format!(
                        "{}ms..{}ms x{}",
                        config.backoff.base_delay_ms, config.backoff.max_delay_ms, config.backoff.max_attempts
                    ),
                );
            }
        }
    }

    Ok(())
}
