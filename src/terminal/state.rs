//! Session state of a terminal controller.

use super::engine::TerminalEngine;
use serde::Serialize;
use std::sync::Arc;

/// A terminal installed by `set_terminal`, tagged with the installation it
/// belongs to so timers can tell whether it was replaced.
#[derive(Clone)]
pub struct InstalledTerminal {
    pub engine: Arc<dyn TerminalEngine>,
    pub epoch: u64,
}

impl std::fmt::Debug for InstalledTerminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstalledTerminal")
            .field("epoch", &self.epoch)
            .finish_non_exhaustive()
    }
}

/// Open/unopened state machine.
#[derive(Debug, Clone, Default)]
pub enum SessionState {
    /// No terminal.
    #[default]
    Unopened,
    /// Terminal set, waiting for a visible container.
    Opening {
        terminal: InstalledTerminal,
        focus_on_open: bool,
    },
    /// Terminal attached to its container.
    Open { terminal: InstalledTerminal },
}

impl SessionState {
    #[must_use]
    pub const fn phase(&self) -> SessionPhase {
        match self {
            Self::Unopened => SessionPhase::Unopened,
            Self::Opening { .. } => SessionPhase::Opening,
            Self::Open { .. } => SessionPhase::Open,
        }
    }

    /// The installed terminal, whether or not it is open yet.
    #[must_use]
    pub const fn terminal(&self) -> Option<&InstalledTerminal> {
        match self {
            Self::Unopened => None,
            Self::Opening { terminal, .. } | Self::Open { terminal } => Some(terminal),
        }
    }

    /// The engine of installation `epoch`, only if it is open.
    #[must_use]
    pub fn open_engine(&self, epoch: u64) -> Option<Arc<dyn TerminalEngine>> {
        match self {
            Self::Open { terminal } if terminal.epoch == epoch => Some(Arc::clone(&terminal.engine)),
            _ => None,
        }
    }
}

/// Tag of [`SessionState`], for callers that only need the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Unopened,
    Opening,
    Open,
}
