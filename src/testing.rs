//! Test doubles for the channel manager and terminal controller.
//!
//! All recorders stamp calls with `tokio::time::Instant`, so under
//! `#[tokio::test(start_paused = true)]` the timestamps are virtual and spacing
//! assertions are exact:
//!
//! ```ignore
//! let transport = Arc::new(RecordingTransport::new());
//! transport.fail_next_initializes(1);
//! manager.on_machine_started("dev");
//! tokio::time::sleep(Duration::from_secs(2)).await;
//! assert_eq!(transport.initialize_count(), 2);
//! ```

use crate::channel::{ChannelOptions, RpcTransport, TransportError};
use crate::terminal::{Geometry, SizeSink, TerminalContainer, TerminalEngine, TerminalSize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

/// A call observed by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Initialize { name: String, url: String },
    Terminate { name: String },
}

/// Transport that records calls and fails on demand.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    calls: Mutex<Vec<(TransportCall, Instant)>>,
    initialize_failures: Mutex<u32>,
    fail_terminates: Mutex<bool>,
}

impl RecordingTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` initialize calls fail (they are still recorded).
    pub fn fail_next_initializes(&self, n: u32) {
        *self.initialize_failures.lock().expect("lock") = n;
    }

    pub fn fail_terminates(&self, fail: bool) {
        *self.fail_terminates.lock().expect("lock") = fail;
    }

    /// All calls in order, without timestamps.
    #[must_use]
    pub fn calls(&self) -> Vec<TransportCall> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .map(|(call, _)| call.clone())
            .collect()
    }

    /// Initialize calls as `(name, url, when)`.
    #[must_use]
    pub fn initialize_calls(&self) -> Vec<(String, String, Instant)> {
        self.calls
            .lock()
            .expect("lock")
            .iter()
            .filter_map(|(call, at)| match call {
                TransportCall::Initialize { name, url } => Some((name.clone(), url.clone(), *at)),
                TransportCall::Terminate { .. } => None,
            })
            .collect()
    }

    #[must_use]
    pub fn initialize_count(&self) -> usize {
        self.initialize_calls().len()
    }

    #[must_use]
    pub fn terminate_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Terminate { .. }))
            .count()
    }

    fn record(&self, call: TransportCall) {
        self.calls.lock().expect("lock").push((call, Instant::now()));
    }
}

impl RpcTransport for RecordingTransport {
    fn initialize(&self, name: &str, options: &ChannelOptions) -> Result<(), TransportError> {
        self.record(TransportCall::Initialize {
            name: name.to_string(),
            url: options.url.clone(),
        });

        let mut failures = self.initialize_failures.lock().expect("lock");
        if *failures > 0 {
            *failures -= 1;
            return Err(TransportError::Initialize {
                name: name.to_string(),
                reason: "agent port not listening".into(),
            });
        }
        Ok(())
    }

    fn terminate(&self, name: &str) -> Result<(), TransportError> {
        self.record(TransportCall::Terminate {
            name: name.to_string(),
        });

        if *self.fail_terminates.lock().expect("lock") {
            return Err(TransportError::Terminate {
                name: name.to_string(),
                reason: "no such channel".into(),
            });
        }
        Ok(())
    }
}

/// Size sink that records every size it receives.
#[derive(Debug, Default)]
pub struct RecordingSizeSink {
    sizes: Mutex<Vec<(TerminalSize, Instant)>>,
}

impl RecordingSizeSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sizes(&self) -> Vec<TerminalSize> {
        self.sizes
            .lock()
            .expect("lock")
            .iter()
            .map(|(size, _)| *size)
            .collect()
    }

    #[must_use]
    pub fn timed_sizes(&self) -> Vec<(TerminalSize, Instant)> {
        self.sizes.lock().expect("lock").clone()
    }
}

impl SizeSink for RecordingSizeSink {
    fn set_terminal_size(&self, size: TerminalSize) {
        self.sizes.lock().expect("lock").push((size, Instant::now()));
    }
}

/// Terminal engine with scripted geometry and call counters.
///
/// `propose_geometry` pops queued geometries; once the queue is empty it keeps
/// returning the last one.
#[derive(Debug)]
pub struct ScriptedTerminal {
    state: Mutex<ScriptState>,
}

#[derive(Debug)]
struct ScriptState {
    geometries: VecDeque<Geometry>,
    current: Geometry,
    open_count: usize,
    focus_count: usize,
    proposals: usize,
    selection: bool,
    opened: bool,
}

impl ScriptedTerminal {
    #[must_use]
    pub fn new(geometry: Geometry) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                geometries: VecDeque::new(),
                current: geometry,
                open_count: 0,
                focus_count: 0,
                proposals: 0,
                selection: false,
                opened: false,
            }),
        }
    }

    /// Start with `first`, then move through `rest` one proposal at a time.
    #[must_use]
    pub fn with_sequence(first: Geometry, rest: &[Geometry]) -> Self {
        let terminal = Self::new(first);
        terminal
            .state
            .lock()
            .expect("lock")
            .geometries
            .extend(rest.iter().copied());
        terminal
    }

    /// Change what the next proposals return.
    pub fn set_geometry(&self, geometry: Geometry) {
        let mut state = self.state.lock().expect("lock");
        state.geometries.clear();
        state.current = geometry;
    }

    pub fn set_selection(&self, active: bool) {
        self.state.lock().expect("lock").selection = active;
    }

    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().expect("lock").open_count
    }

    #[must_use]
    pub fn focus_count(&self) -> usize {
        self.state.lock().expect("lock").focus_count
    }

    #[must_use]
    pub fn proposal_count(&self) -> usize {
        self.state.lock().expect("lock").proposals
    }
}

impl TerminalEngine for ScriptedTerminal {
    fn open(&self, _container: Arc<dyn TerminalContainer>) {
        let mut state = self.state.lock().expect("lock");
        state.open_count += 1;
        state.opened = true;
    }

    fn focus(&self) {
        self.state.lock().expect("lock").focus_count += 1;
    }

    fn has_selection(&self) -> bool {
        self.state.lock().expect("lock").selection
    }

    fn propose_geometry(&self) -> Geometry {
        let mut state = self.state.lock().expect("lock");
        state.proposals += 1;
        let geometry = state.current;
        if let Some(next) = state.geometries.pop_front() {
            state.current = next;
        }
        geometry
    }

    fn has_element(&self) -> bool {
        self.state.lock().expect("lock").opened
    }
}
