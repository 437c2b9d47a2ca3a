//! RPC transport boundary.
//!
//! The transport owns the actual sockets. This crate only tells it which named
//! channels should exist.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors reported by an [`RpcTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel {name} could not be initialized: {reason}")]
    Initialize { name: String, reason: String },

    #[error("channel {name} could not be terminated: {reason}")]
    Terminate { name: String, reason: String },

    #[error("transport closed")]
    Closed,
}

/// Endpoint configuration passed to [`RpcTransport::initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// Websocket URL of the agent.
    pub url: String,
}

/// A named-channel RPC transport.
///
/// Both calls may fail synchronously. Neither returns anything else.
pub trait RpcTransport: Send + Sync {
    /// Open (or start opening) the channel `name`.
    fn initialize(&self, name: &str, options: &ChannelOptions) -> Result<(), TransportError>;

    /// Close the channel `name`. Closing an unknown channel is not an error.
    fn terminate(&self, name: &str) -> Result<(), TransportError>;
}
