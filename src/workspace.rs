//! Workspace/runtime snapshot model.
//!
//! The snapshot is owned by whoever tracks the workspace (an IDE shell, a
//! management API poller, a JSON file). The channel manager only ever reads it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

/// Errors that can occur while loading a workspace snapshot.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to read snapshot {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse snapshot {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Workspace lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkspaceStatus {
    Starting,
    Running,
    Stopping,
    #[default]
    Stopped,
}

/// A named server advertised by a machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerEndpoint {
    /// Endpoint URL, normally `http://` or `https://`.
    pub url: String,
}

impl ServerEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// A running machine and its advertised servers, keyed by service name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Machine {
    #[serde(default)]
    pub servers: BTreeMap<String, ServerEndpoint>,
}

impl Machine {
    /// Look up a server by its service name.
    #[must_use]
    pub fn server(&self, service: &str) -> Option<&ServerEndpoint> {
        self.servers.get(service)
    }

    /// Builder-style helper to add a server.
    #[must_use]
    pub fn with_server(mut self, service: impl Into<String>, url: impl Into<String>) -> Self {
        self.servers.insert(service.into(), ServerEndpoint::new(url));
        self
    }
}

/// The set of machines belonging to an active workspace instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    #[serde(default)]
    pub machines: BTreeMap<String, Machine>,
}

impl Runtime {
    #[must_use]
    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.machines.get(name)
    }
}

/// A point-in-time view of the workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    #[serde(default)]
    pub status: WorkspaceStatus,
    #[serde(default)]
    pub runtime: Option<Runtime>,
}

impl Workspace {
    /// A running workspace with an empty runtime.
    #[must_use]
    pub fn running() -> Self {
        Self {
            status: WorkspaceStatus::Running,
            runtime: Some(Runtime::default()),
        }
    }

    /// Builder-style helper to add a machine, creating the runtime if needed.
    #[must_use]
    pub fn with_machine(mut self, name: impl Into<String>, machine: Machine) -> Self {
        self.runtime
            .get_or_insert_with(Runtime::default)
            .machines
            .insert(name.into(), machine);
        self
    }

    /// Find a machine by name in the active runtime.
    #[must_use]
    pub fn machine(&self, name: &str) -> Option<&Machine> {
        self.runtime.as_ref()?.machine(name)
    }

    /// Names of all machines known to the runtime, only while the workspace is running.
    #[must_use]
    pub fn running_machine_names(&self) -> Vec<String> {
        if self.status != WorkspaceStatus::Running {
            return Vec::new();
        }
        self.runtime
            .as_ref()
            .map(|runtime| runtime.machines.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// Read-only access to the current workspace state.
pub trait WorkspaceSource: Send + Sync {
    /// Take a snapshot of the current workspace.
    fn snapshot(&self) -> Workspace;
}

/// A workspace snapshot that can be updated in place.
#[derive(Debug, Default)]
pub struct SharedWorkspace {
    inner: RwLock<Workspace>,
}

impl SharedWorkspace {
    #[must_use]
    pub const fn new(workspace: Workspace) -> Self {
        Self {
            inner: RwLock::new(workspace),
        }
    }

    /// Load a snapshot from a JSON file.
    pub fn load(path: &Path) -> Result<Self, WorkspaceError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| WorkspaceError::Read {
            path: display.clone(),
            source,
        })?;
        let workspace = serde_json::from_str(&text).map_err(|source| WorkspaceError::Parse {
            path: display,
            source,
        })?;
        Ok(Self::new(workspace))
    }

    /// Replace the whole snapshot.
    pub fn replace(&self, workspace: Workspace) {
        *self.inner.write().expect("workspace lock poisoned") = workspace;
    }

    /// Insert or replace a machine, creating the runtime if the workspace has none.
    pub fn upsert_machine(&self, name: &str, machine: Machine) {
        let mut workspace = self.inner.write().expect("workspace lock poisoned");
        workspace
            .runtime
            .get_or_insert_with(Runtime::default)
            .machines
            .insert(name.to_string(), machine);
    }
}

impl WorkspaceSource for SharedWorkspace {
    fn snapshot(&self) -> Workspace {
        self.inner.read().expect("workspace lock poisoned").clone()
    }
}
