//! Terminal session controller.
//!
//! Opens a terminal into its container once the container has a visible size,
//! then keeps the remote session's size in step with the widget. Resizes are
//! debounced; geometry that is not ready yet (engine laid out before font
//! metrics arrived) is polled until it becomes valid.

use super::engine::{SizeSink, TerminalContainer, TerminalEngine, TerminalSize};
use super::state::{InstalledTerminal, SessionPhase, SessionState};
use crate::timer::{Ticket, TimerSlot};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

/// Quiet period before a resize is negotiated.
pub const DEFAULT_RESIZE_DEBOUNCE: Duration = Duration::from_millis(200);
/// Poll interval while the engine proposes an empty grid.
pub const DEFAULT_GEOMETRY_RETRY: Duration = Duration::from_millis(500);
/// Delay before focusing, so same-tick layout/selection handling can't steal it back.
pub const DEFAULT_FOCUS_DELAY: Duration = Duration::from_millis(10);

/// Timer settings for a [`TerminalSessionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalTimings {
    pub resize_debounce: Duration,
    pub geometry_retry: Duration,
    pub focus_delay: Duration,
}

impl Default for TerminalTimings {
    fn default() -> Self {
        Self {
            resize_debounce: DEFAULT_RESIZE_DEBOUNCE,
            geometry_retry: DEFAULT_GEOMETRY_RETRY,
            focus_delay: DEFAULT_FOCUS_DELAY,
        }
    }
}

/// Drives one terminal widget. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TerminalSessionController {
    shared: Arc<Shared>,
}

struct Shared {
    container: Arc<dyn TerminalContainer>,
    sink: Arc<dyn SizeSink>,
    timings: TerminalTimings,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    session: SessionState,
    /// Bumped by every `set_terminal`; timers compare against it.
    epoch: u64,
    resize_timer: TimerSlot,
    focus_timer: TimerSlot,
    error: Option<String>,
    last_known_size: Option<TerminalSize>,
}

impl TerminalSessionController {
    #[must_use]
    pub fn new(
        container: Arc<dyn TerminalContainer>,
        sink: Arc<dyn SizeSink>,
        timings: TerminalTimings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                container,
                sink,
                timings,
                inner: Mutex::new(Inner::default()),
            }),
        }
    }

    /// Install a terminal, replacing any previous one.
    ///
    /// The terminal is opened on the next resize notification with a visible
    /// container. Timers aimed at a previous terminal are cancelled.
    pub fn set_terminal(&self, engine: Arc<dyn TerminalEngine>, focus_on_open: bool) {
        let epoch = {
            let mut inner = self.shared.lock();
            inner.epoch = inner.epoch.wrapping_add(1);
            let epoch = inner.epoch;
            inner.resize_timer.cancel();
            inner.focus_timer.cancel();
            inner.error = None;
            inner.session = SessionState::Opening {
                terminal: InstalledTerminal { engine, epoch },
                focus_on_open,
            };
            epoch
        };
        debug!(epoch, focus_on_open, "Terminal installed");
        self.shared.container.show_terminal();
    }

    /// Drop the terminal (e.g. its machine stopped) and go back to unopened.
    pub fn clear_terminal(&self) {
        let mut inner = self.shared.lock();
        inner.epoch = inner.epoch.wrapping_add(1);
        inner.resize_timer.cancel();
        inner.focus_timer.cancel();
        inner.session = SessionState::Unopened;
        inner.last_known_size = None;
        debug!("Terminal cleared");
    }

    /// Re-evaluate after the container changed size.
    ///
    /// Without a terminal, or with a hidden container, nothing happens. The
    /// first call with a visible container opens the terminal; later calls
    /// schedule a debounced resize.
    pub fn on_container_resize(&self) {
        let size = self.shared.container.size();

        let to_open = {
            let mut inner = self.shared.lock();
            if inner.session.terminal().is_none() {
                return;
            }
            if !size.is_visible() {
                debug!(?size, "Container not visible, deferring");
                return;
            }

            match inner.session.clone() {
                SessionState::Unopened => None,
                SessionState::Open { terminal } => {
                    let delay = self.shared.timings.resize_debounce;
                    self.shared.schedule_resize(&mut inner, terminal.epoch, delay);
                    None
                }
                SessionState::Opening {
                    terminal,
                    focus_on_open,
                } => {
                    inner.session = SessionState::Open {
                        terminal: terminal.clone(),
                    };
                    Some((terminal, focus_on_open))
                }
            }
        };

        if let Some((terminal, focus_on_open)) = to_open {
            info!(epoch = terminal.epoch, ?size, "Opening terminal");
            terminal.engine.open(Arc::clone(&self.shared.container));
            if focus_on_open {
                self.request_focus(true);
            }
        }
    }

    /// Ask for keyboard focus. Blur is never forced.
    ///
    /// Skipped when there is no terminal, the terminal has no element yet, or
    /// the user has text selected.
    pub fn request_focus(&self, focused: bool) {
        if !focused {
            return;
        }
        let Some(terminal) = self.shared.lock().session.terminal().cloned() else {
            return;
        };

        // The engine is queried without the lock held; it may call back into us.
        if !terminal.engine.has_element() {
            return;
        }
        if terminal.engine.has_selection() {
            debug!("Selection active, not focusing terminal");
            return;
        }

        let mut inner = self.shared.lock();
        if inner.epoch != terminal.epoch {
            debug!("Terminal replaced while checking focus, skipping");
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        let epoch = terminal.epoch;
        inner
            .focus_timer
            .arm(self.shared.timings.focus_delay, move |ticket| {
                if let Some(shared) = weak.upgrade() {
                    shared.focus_tick(ticket, epoch);
                }
            });
    }

    /// Replace the terminal surface with an error message.
    ///
    /// Does not touch the open/unopened state; a later `set_terminal` shows the
    /// terminal again.
    pub fn show_error(&self, message: &str) {
        self.shared.lock().error = Some(message.to_string());
        info!(%message, "Showing terminal error");
        self.shared.container.show_message(message);
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.shared.lock().session.phase()
    }

    /// The last size forwarded to the session.
    #[must_use]
    pub fn last_known_size(&self) -> Option<TerminalSize> {
        self.shared.lock().last_known_size
    }

    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        self.shared.lock().error.clone()
    }

    /// Whether a debounced resize or geometry retry is scheduled.
    #[must_use]
    pub fn has_pending_resize(&self) -> bool {
        self.shared.lock().resize_timer.is_pending()
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("terminal controller lock poisoned")
    }

    fn schedule_resize(self: &Arc<Self>, inner: &mut Inner, epoch: u64, delay: Duration) {
        let weak = Arc::downgrade(self);
        inner.resize_timer.arm(delay, move |ticket| {
            if let Some(shared) = weak.upgrade() {
                shared.resize_tick(ticket, epoch);
            }
        });
    }

    fn resize_tick(self: &Arc<Self>, ticket: Ticket, epoch: u64) {
        let engine = {
            let mut inner = self.lock();
            if !inner.resize_timer.claim(ticket) {
                return;
            }
            let Some(engine) = inner.session.open_engine(epoch) else {
                debug!(epoch, "Terminal replaced, dropping resize");
                return;
            };
            engine
        };

        let geometry = engine.propose_geometry();

        let size = {
            let mut inner = self.lock();
            if inner.session.open_engine(epoch).is_none() {
                debug!(epoch, "Terminal replaced, dropping resize");
                return;
            }
            let Some(size) = geometry.to_size() else {
                if inner.resize_timer.is_pending() {
                    // A newer resize was scheduled meanwhile; it will re-read geometry.
                    return;
                }
                debug!(?geometry, "Terminal geometry not ready, retrying");
                self.schedule_resize(&mut inner, epoch, self.timings.geometry_retry);
                return;
            };
            inner.last_known_size = Some(size);
            size
        };

        debug!(cols = size.cols, rows = size.rows, "Resizing terminal session");
        self.sink.set_terminal_size(size);
    }

    fn focus_tick(&self, ticket: Ticket, epoch: u64) {
        let engine = {
            let mut inner = self.lock();
            if !inner.focus_timer.claim(ticket) {
                return;
            }
            match inner.session.terminal() {
                Some(terminal) if terminal.epoch == epoch => Arc::clone(&terminal.engine),
                _ => return,
            }
        };
        engine.focus();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::terminal::engine::{Geometry, PixelSize};
    use crate::terminal::virtual_term::VirtualContainer;
    use crate::testing::{RecordingSizeSink, ScriptedTerminal};

    fn setup() -> (TerminalSessionController, Arc<VirtualContainer>, Arc<RecordingSizeSink>) {
        let container = Arc::new(VirtualContainer::new(PixelSize::new(800, 600)));
        let sink = Arc::new(RecordingSizeSink::new());
        let controller = TerminalSessionController::new(
            Arc::clone(&container) as Arc<dyn TerminalContainer>,
            Arc::clone(&sink) as Arc<dyn SizeSink>,
            TerminalTimings::default(),
        );
        (controller, container, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_hidden_container_defers_open() {
        let (controller, container, _) = setup();
        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(80, 24)));
        controller.set_terminal(terminal.clone(), false);

        container.set_size(PixelSize::new(0, 600));
        controller.on_container_resize();
        assert_eq!(controller.phase(), SessionPhase::Opening);
        assert_eq!(terminal.open_count(), 0);

        container.set_size(PixelSize::new(800, 600));
        controller.on_container_resize();
        assert_eq!(controller.phase(), SessionPhase::Open);
        assert_eq!(terminal.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_does_not_resize() {
        let (controller, _, sink) = setup();
        controller.set_terminal(Arc::new(ScriptedTerminal::new(Geometry::new(80, 24))), false);
        controller.on_container_resize();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink.sizes().is_empty());
        assert!(!controller.has_pending_resize());
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_without_element_is_noop() {
        let (controller, _, _) = setup();
        controller.request_focus(true);

        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(80, 24)));
        controller.set_terminal(terminal.clone(), false);
        // Not opened yet, so no element.
        controller.request_focus(true);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(terminal.focus_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_is_deferred() {
        let (controller, _, _) = setup();
        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(80, 24)));
        controller.set_terminal(terminal.clone(), false);
        controller.on_container_resize();

        controller.request_focus(true);
        assert_eq!(terminal.focus_count(), 0);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(terminal.focus_count(), 0);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(terminal.focus_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_skipped_with_selection_or_blur() {
        let (controller, _, _) = setup();
        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(80, 24)));
        controller.set_terminal(terminal.clone(), false);
        controller.on_container_resize();

        terminal.set_selection(true);
        controller.request_focus(true);
        terminal.set_selection(false);
        controller.request_focus(false);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(terminal.focus_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_error_keeps_state() {
        let (controller, container, _) = setup();
        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(80, 24)));
        controller.set_terminal(terminal.clone(), false);
        controller.on_container_resize();

        controller.show_error("agent unreachable");
        assert_eq!(controller.phase(), SessionPhase::Open);
        assert_eq!(controller.error_message().as_deref(), Some("agent unreachable"));
        assert_eq!(container.message().as_deref(), Some("agent unreachable"));
        assert!(!container.terminal_visible());

        controller.set_terminal(terminal, false);
        assert_eq!(controller.error_message(), None);
        assert!(container.terminal_visible());
        assert_eq!(controller.phase(), SessionPhase::Opening);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_terminal_cancels_resize() {
        let (controller, _, sink) = setup();
        controller.set_terminal(Arc::new(ScriptedTerminal::new(Geometry::new(80, 24))), false);
        controller.on_container_resize();
        controller.on_container_resize();
        assert!(controller.has_pending_resize());

        controller.clear_terminal();
        assert_eq!(controller.phase(), SessionPhase::Unopened);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(sink.sizes().is_empty());

        // Back to ignoring resizes.
        controller.on_container_resize();
        assert_eq!(controller.phase(), SessionPhase::Unopened);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_known_size_tracks_forwarded_geometry() {
        let (controller, _, _) = setup();
        let terminal = Arc::new(ScriptedTerminal::new(Geometry::new(100, 30)));
        controller.set_terminal(terminal.clone(), false);
        controller.on_container_resize();
        controller.on_container_resize();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(controller.last_known_size(), Some(TerminalSize::new(100, 30)));
    }

    /// Engine that reads controller state from inside every query.
    struct CallbackTerminal {
        inner: ScriptedTerminal,
        controller: Mutex<Option<TerminalSessionController>>,
        callbacks: Mutex<usize>,
    }

    impl CallbackTerminal {
        fn poke(&self) {
            let controller = self.controller.lock().unwrap().clone();
            if let Some(controller) = controller {
                let _ = controller.phase();
                let _ = controller.has_pending_resize();
                *self.callbacks.lock().unwrap() += 1;
            }
        }
    }

    impl TerminalEngine for CallbackTerminal {
        fn open(&self, container: Arc<dyn TerminalContainer>) {
            self.inner.open(container);
        }

        fn focus(&self) {
            self.poke();
            self.inner.focus();
        }

        fn has_selection(&self) -> bool {
            self.poke();
            self.inner.has_selection()
        }

        fn propose_geometry(&self) -> Geometry {
            self.poke();
            self.inner.propose_geometry()
        }

        fn has_element(&self) -> bool {
            self.poke();
            self.inner.has_element()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_may_call_back_into_controller() {
        let (controller, _, sink) = setup();
        let terminal = Arc::new(CallbackTerminal {
            inner: ScriptedTerminal::with_sequence(Geometry::new(0, 0), &[Geometry::new(90, 30)]),
            controller: Mutex::new(Some(controller.clone())),
            callbacks: Mutex::new(0),
        });
        controller.set_terminal(Arc::clone(&terminal) as Arc<dyn TerminalEngine>, true);

        controller.on_container_resize();
        controller.on_container_resize();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(terminal.inner.focus_count(), 1);
        assert_eq!(sink.sizes(), vec![TerminalSize::new(90, 30)]);
        assert!(*terminal.callbacks.lock().unwrap() >= 5);

        // Break the controller <-> engine cycle.
        terminal.controller.lock().unwrap().take();
    }
}
