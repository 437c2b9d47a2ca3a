//! Command-line interface for agentlink.

use crate::channel::EXEC_AGENT_SERVICE;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Default snapshot location: `<config dir>/agentlink/workspace.json`.
#[must_use]
pub fn default_snapshot_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("agentlink")
        .join("workspace.json")
}

/// Parse a `WIDTHxHEIGHT` pair, e.g. `80x24`.
///
/// Returns None if the notation is invalid or either side is zero.
#[must_use]
pub fn parse_dimensions(s: &str) -> Option<(u16, u16)> {
    let (width, height) = s.trim().to_lowercase().split_once('x').map(|(w, h)| {
        (w.trim().parse::<u16>(), h.trim().parse::<u16>())
    })?;
    match (width, height) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Some((w, h)),
        _ => None,
    }
}

fn dimensions_arg(s: &str) -> Result<(u16, u16), String> {
    parse_dimensions(s).ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))
}

/// Agent channel and terminal session manager for workspace machines.
#[derive(Debug, Parser)]
#[command(name = "agentlink", version, about)]
pub struct Cli {
    /// Workspace snapshot file (JSON).
    #[arg(long, env = "AGENTLINK_SNAPSHOT")]
    pub snapshot: Option<PathBuf>,

    /// Service name the agent endpoint is advertised under.
    #[arg(long, env = "AGENTLINK_SERVICE", default_value = EXEC_AGENT_SERVICE)]
    pub service: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the JSON-lines bridge on stdin/stdout.
    Run {
        /// Milliseconds to keep running after input ends, so pending timers settle.
        #[arg(long, default_value = "750")]
        drain_ms: u64,

        /// Screen size of a freshly attached terminal (COLSxROWS).
        #[arg(long, default_value = "80x24", value_parser = dimensions_arg)]
        initial_size: (u16, u16),
    },

    /// Print the agent channel URL for a machine.
    Resolve {
        /// Machine name.
        machine: String,
    },

    /// List machines in the snapshot and their agent channel URLs.
    Machines {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}
