//! In-memory terminal engine and container.
//!
//! `VirtualTerminal` keeps a vt100 screen and derives its grid from the
//! container's pixel size and the loaded cell metrics, the same way a rendering
//! engine's fit logic would. Until metrics are loaded it proposes an empty grid.

use super::engine::{Geometry, PixelSize, TerminalContainer, TerminalEngine, TerminalSize};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Pixel size of one character cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellMetrics {
    pub width: u16,
    pub height: u16,
}

/// Terminal engine backed by a vt100 screen.
pub struct VirtualTerminal {
    state: Mutex<VtState>,
}

struct VtState {
    parser: vt100::Parser,
    container: Option<Arc<dyn TerminalContainer>>,
    metrics: Option<CellMetrics>,
    focused: bool,
    selection: bool,
}

impl VirtualTerminal {
    /// Create a terminal with an initial screen size.
    #[must_use]
    pub fn new(size: TerminalSize) -> Self {
        Self {
            state: Mutex::new(VtState {
                parser: vt100::Parser::new(size.rows, size.cols, 0),
                container: None,
                metrics: None,
                focused: false,
                selection: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VtState> {
        self.state.lock().expect("virtual terminal lock poisoned")
    }

    /// Font metrics became available.
    pub fn set_cell_metrics(&self, metrics: CellMetrics) {
        self.lock().metrics = Some(metrics);
    }

    /// Feed output bytes from the remote session.
    pub fn process(&self, data: &[u8]) {
        self.lock().parser.process(data);
    }

    /// Resize the screen, keeping what is on it.
    pub fn apply_size(&self, size: TerminalSize) {
        let mut state = self.lock();
        // vt100::Parser has no in-place resize here; replay the formatted
        // contents into a parser of the new size.
        let previous = state.parser.screen().contents_formatted();
        state.parser = vt100::Parser::new(size.rows, size.cols, 0);
        state.parser.process(&previous);
    }

    /// Current screen size.
    #[must_use]
    pub fn size(&self) -> TerminalSize {
        let (rows, cols) = self.lock().parser.screen().size();
        TerminalSize::new(cols, rows)
    }

    /// Screen contents as normalized text: no formatting, no trailing blanks.
    #[must_use]
    pub fn snapshot(&self) -> String {
        let contents = self.lock().parser.screen().contents();
        let mut lines: Vec<&str> = contents.lines().collect();

        while lines.last().is_some_and(|l| l.trim().is_empty()) {
            lines.pop();
        }

        lines
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn set_selection(&self, active: bool) {
        self.lock().selection = active;
    }

    #[must_use]
    pub fn is_focused(&self) -> bool {
        self.lock().focused
    }
}

impl TerminalEngine for VirtualTerminal {
    fn open(&self, container: Arc<dyn TerminalContainer>) {
        self.lock().container = Some(container);
    }

    fn focus(&self) {
        self.lock().focused = true;
    }

    fn has_selection(&self) -> bool {
        self.lock().selection
    }

    fn propose_geometry(&self) -> Geometry {
        let state = self.lock();
        let (Some(container), Some(metrics)) = (&state.container, state.metrics) else {
            return Geometry::default();
        };
        if metrics.width == 0 || metrics.height == 0 {
            return Geometry::default();
        }
        let pixels = container.size();
        Geometry::new(
            pixels.width / i32::from(metrics.width),
            pixels.height / i32::from(metrics.height),
        )
    }

    fn has_element(&self) -> bool {
        self.lock().container.is_some()
    }
}

/// In-memory terminal container with a terminal surface and a message surface.
#[derive(Debug, Default)]
pub struct VirtualContainer {
    surface: Mutex<Surface>,
}

#[derive(Debug, Default)]
struct Surface {
    size: PixelSize,
    message: Option<String>,
    terminal_visible: bool,
}

impl VirtualContainer {
    #[must_use]
    pub fn new(size: PixelSize) -> Self {
        Self {
            surface: Mutex::new(Surface {
                size,
                message: None,
                terminal_visible: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Surface> {
        self.surface.lock().expect("container lock poisoned")
    }

    pub fn set_size(&self, size: PixelSize) {
        self.lock().size = size;
    }

    /// The message currently shown, if the message surface is visible.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        self.lock().message.clone()
    }

    #[must_use]
    pub fn terminal_visible(&self) -> bool {
        self.lock().terminal_visible
    }
}

impl TerminalContainer for VirtualContainer {
    fn size(&self) -> PixelSize {
        self.lock().size
    }

    fn show_terminal(&self) {
        let mut surface = self.lock();
        surface.message = None;
        surface.terminal_visible = true;
    }

    fn show_message(&self, message: &str) {
        let mut surface = self.lock();
        surface.message = Some(message.to_string());
        surface.terminal_visible = false;
    }
}
