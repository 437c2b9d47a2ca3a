//! Line protocol for the `agentlink run` bridge.
//!
//! The bridge reads one JSON `Input` per line on stdin and writes one JSON
//! `Output` per line on stdout.

use crate::workspace::{ServerEndpoint, Workspace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Messages into the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Input {
    /// Replace the workspace snapshot.
    Workspace { workspace: Workspace },

    /// A machine started.
    MachineStarted {
        machine: String,
        /// Servers to record for the machine before the event is published.
        #[serde(default)]
        servers: Option<BTreeMap<String, ServerEndpoint>>,
    },

    /// A machine stopped.
    MachineStopped { machine: String },

    /// The UI finished initializing.
    UiReady,

    /// Install a fresh terminal in the container.
    AttachTerminal {
        #[serde(default)]
        focus_on_open: bool,
    },

    /// Remove the terminal.
    DetachTerminal,

    /// The container changed pixel size.
    ContainerResized { width: i32, height: i32 },

    /// Font metrics for the terminal are available.
    FontsLoaded { cell_width: u16, cell_height: u16 },

    /// The user selected or deselected text.
    Selection { active: bool },

    /// The widget gained or lost focus.
    Focus { focused: bool },

    /// Output from the remote session.
    TerminalOutput {
        /// Raw bytes (base64 encoded in JSON).
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },

    /// Ask for the current screen contents.
    Snapshot,

    /// Show an error in place of the terminal.
    ShowError { message: String },

    /// Stop the bridge.
    Shutdown,
}

/// Messages out of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Output {
    /// The transport should open a channel.
    ChannelInitialize { name: String, url: String },

    /// The transport should close a channel.
    ChannelTerminate { name: String },

    /// The terminal was attached to its container.
    TerminalOpened,

    /// The terminal took keyboard focus.
    TerminalFocused,

    /// The remote session should use this size.
    TerminalSize { cols: u16, rows: u16 },

    /// An error message replaced the terminal.
    ErrorShown { message: String },

    /// Screen contents.
    Screen {
        content: String,
        /// Screen size (cols, rows).
        size: (u16, u16),
    },

    /// The bridge could not handle an input line.
    Error { message: String },
}

impl Output {
    /// Create an error output.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Module for base64 encoding/decoding of byte vectors in serde.
mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        use base64::Engine;
        let s = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}
