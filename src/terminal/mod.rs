//! Terminal session control: opening a terminal widget once it has room, and
//! negotiating its size with the remote session.

mod controller;
mod engine;
mod state;
mod virtual_term;

pub use controller::{
    DEFAULT_FOCUS_DELAY, DEFAULT_GEOMETRY_RETRY, DEFAULT_RESIZE_DEBOUNCE,
    TerminalSessionController, TerminalTimings,
};
pub use engine::{
    Geometry, PixelSize, SizeSink, TerminalContainer, TerminalEngine, TerminalSize,
};
pub use state::{InstalledTerminal, SessionPhase, SessionState};
pub use virtual_term::{CellMetrics, VirtualContainer, VirtualTerminal};
