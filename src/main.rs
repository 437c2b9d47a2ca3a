//! agentlink: agent channel and terminal session lifecycle

use agentlink::channel::{ChannelConfig, resolve_channel_url};
use agentlink::{
    BridgeConfig, BridgeError, Cli, Command, SharedWorkspace, TerminalSize, WorkspaceError,
    WorkspaceSource, default_snapshot_path, run_bridge,
};
use clap::Parser;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::BufReader;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// Errors surfaced by the binary.
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("machine {machine} has no {service} endpoint")]
    NoEndpoint { machine: String, service: String },

    #[error("failed to serialize output: {0}")]
    Serialize(#[source] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct MachineEntry {
    name: String,
    channel_url: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the JSON-lines stream.
    let filter = if cli.verbose {
        EnvFilter::new("agentlink=debug")
    } else {
        EnvFilter::new("agentlink=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let explicit_snapshot = cli.snapshot.is_some();
    let snapshot_path = cli.snapshot.unwrap_or_else(default_snapshot_path);

    let result = match cli.command {
        Command::Run {
            drain_ms,
            initial_size,
        } => {
            run(
                &snapshot_path,
                explicit_snapshot,
                cli.service,
                Duration::from_millis(drain_ms),
                TerminalSize::new(initial_size.0, initial_size.1),
            )
            .await
        }
        Command::Resolve { machine } => resolve(&snapshot_path, &cli.service, &machine),
        Command::Machines { json } => machines(&snapshot_path, &cli.service, json),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(
    snapshot_path: &Path,
    explicit_snapshot: bool,
    service: String,
    drain: Duration,
    initial_size: TerminalSize,
) -> Result<(), CliError> {
    // Without an explicit snapshot the bridge can start empty and be fed
    // `workspace` lines.
    let workspace = if explicit_snapshot || snapshot_path.exists() {
        SharedWorkspace::load(snapshot_path)?
    } else {
        debug!(path = %snapshot_path.display(), "No snapshot file, starting empty");
        SharedWorkspace::default()
    };

    let config = BridgeConfig {
        channel: ChannelConfig {
            service_name: service,
            ..ChannelConfig::default()
        },
        drain,
        initial_size,
        ..BridgeConfig::default()
    };

    run_bridge(
        config,
        Arc::new(workspace),
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
    )
    .await?;
    Ok(())
}

fn resolve(snapshot_path: &Path, service: &str, machine: &str) -> Result<(), CliError> {
    let workspace = SharedWorkspace::load(snapshot_path)?.snapshot();
    let url = resolve_channel_url(&workspace, machine, service).ok_or_else(|| {
        CliError::NoEndpoint {
            machine: machine.to_string(),
            service: service.to_string(),
        }
    })?;
    println!("{url}");
    Ok(())
}

fn machines(snapshot_path: &Path, service: &str, json: bool) -> Result<(), CliError> {
    let workspace = SharedWorkspace::load(snapshot_path)?.snapshot();
    let entries: Vec<MachineEntry> = workspace
        .runtime
        .iter()
        .flat_map(|runtime| runtime.machines.keys())
        .map(|name| MachineEntry {
            name: name.clone(),
            channel_url: resolve_channel_url(&workspace, name, service),
        })
        .collect();

    if json {
        let text = serde_json::to_string_pretty(&entries).map_err(CliError::Serialize)?;
        println!("{text}");
        return Ok(());
    }

    for entry in entries {
        println!(
            "{}\t{}",
            entry.name,
            entry.channel_url.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
