//! agentlink: agent channel and terminal session lifecycle
//!
//! Keeps one RPC channel open per running workspace machine that exposes an
//! exec agent, and drives an interactive terminal whose size tracks both the
//! visible widget and the remote session.

// Error documentation is deferred - the errors are self-explanatory from types
#![allow(clippy::missing_errors_doc)]

pub mod bridge;
pub mod channel;
pub mod cli;
pub mod events;
pub mod protocol;
pub mod terminal;
pub mod testing;
pub mod timer;
pub mod workspace;

pub use bridge::{BridgeConfig, BridgeError, run_bridge};
pub use channel::{
    ChannelConfig, ChannelLifecycleManager, ChannelOptions, ChannelState, RpcTransport,
    TransportError,
};
pub use cli::{Cli, Command, default_snapshot_path, parse_dimensions};
pub use events::{EventKind, RuntimeEvent, RuntimeEventBus, SubscriptionHandle};
pub use protocol::{Input, Output};
pub use terminal::{
    Geometry, PixelSize, SessionPhase, SizeSink, TerminalContainer, TerminalEngine,
    TerminalSessionController, TerminalSize, TerminalTimings,
};
pub use workspace::{SharedWorkspace, Workspace, WorkspaceError, WorkspaceSource, WorkspaceStatus};
