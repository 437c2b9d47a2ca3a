//! Collaborator boundaries for the terminal session controller.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pixel size of the container hosting a terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: i32,
    pub height: i32,
}

impl PixelSize {
    #[must_use]
    pub const fn new(width: i32, height: i32) -> Self {
        Self { width, height }
    }

    /// A hidden or collapsed container reports a non-positive dimension.
    #[must_use]
    pub const fn is_visible(self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Character grid proposed by a terminal engine. May be zero or negative while
/// the engine has not finished layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Geometry {
    pub cols: i32,
    pub rows: i32,
}

impl Geometry {
    #[must_use]
    pub const fn new(cols: i32, rows: i32) -> Self {
        Self { cols, rows }
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.cols > 0 && self.rows > 0
    }

    /// Convert to a session size. `None` unless both dimensions are positive.
    #[must_use]
    pub fn to_size(self) -> Option<TerminalSize> {
        if !self.is_valid() {
            return None;
        }
        Some(TerminalSize {
            cols: u16::try_from(self.cols).unwrap_or(u16::MAX),
            rows: u16::try_from(self.rows).unwrap_or(u16::MAX),
        })
    }
}

/// A valid terminal size, as sent to the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    #[must_use]
    pub const fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

/// The widget area a terminal is opened into.
pub trait TerminalContainer: Send + Sync {
    /// Current pixel size of the terminal surface.
    fn size(&self) -> PixelSize;

    /// Show the terminal surface and hide the message surface.
    fn show_terminal(&self);

    /// Hide the terminal surface and show `message` instead.
    fn show_message(&self, message: &str);
}

/// A terminal emulator instance.
pub trait TerminalEngine: Send + Sync {
    /// Attach the terminal to its container.
    fn open(&self, container: Arc<dyn TerminalContainer>);

    /// Give keyboard focus to the terminal.
    fn focus(&self);

    /// Whether the user currently has text selected.
    fn has_selection(&self) -> bool;

    /// Propose a character grid for the container's current pixel size.
    fn propose_geometry(&self) -> Geometry;

    /// Whether the terminal has a backing element (it does once opened).
    fn has_element(&self) -> bool;
}

/// Receives the negotiated size for the remote session.
pub trait SizeSink: Send + Sync {
    fn set_terminal_size(&self, size: TerminalSize);
}
