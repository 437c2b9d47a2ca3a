//! JSON-lines bridge.
//!
//! Wires a [`RuntimeEventBus`], a [`ChannelLifecycleManager`] and a
//! [`TerminalSessionController`] to a line-oriented input/output pair. Channel
//! commands and terminal notifications come out as [`Output`] lines, so an
//! embedding process (or a shell script) can act on them.

use crate::channel::{
    ChannelConfig, ChannelLifecycleManager, ChannelOptions, RpcTransport, TransportError,
};
use crate::events::{RuntimeEvent, RuntimeEventBus};
use crate::protocol::{Input, Output};
use crate::terminal::{
    CellMetrics, Geometry, PixelSize, SizeSink, TerminalContainer, TerminalEngine,
    TerminalSessionController, TerminalSize, TerminalTimings, VirtualContainer, VirtualTerminal,
};
use crate::workspace::{Machine, SharedWorkspace, WorkspaceSource};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Default time to let pending timers settle after input ends.
pub const DEFAULT_DRAIN: Duration = Duration::from_millis(750);

/// Errors that can occur while running the bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to read input: {0}")]
    Read(#[source] std::io::Error),

    #[error("failed to write output: {0}")]
    Write(#[source] std::io::Error),

    #[error("output writer task failed: {0}")]
    Writer(#[source] tokio::task::JoinError),
}

/// Bridge settings.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub channel: ChannelConfig,
    pub timings: TerminalTimings,
    /// How long to keep running after input ends.
    pub drain: Duration,
    /// Screen size of a freshly attached terminal.
    pub initial_size: TerminalSize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            channel: ChannelConfig::default(),
            timings: TerminalTimings::default(),
            drain: DEFAULT_DRAIN,
            initial_size: TerminalSize::new(80, 24),
        }
    }
}

type OutputTx = mpsc::UnboundedSender<Output>;

/// Run the bridge until `input` ends or a `shutdown` line arrives.
pub async fn run_bridge<R, W>(
    config: BridgeConfig,
    workspace: Arc<SharedWorkspace>,
    input: R,
    output: W,
) -> Result<(), BridgeError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outputs(out_rx, output));

    let mut session = BridgeSession::new(&config, workspace, out_tx);
    let mut lines = input.lines();

    while let Some(line) = lines.next_line().await.map_err(BridgeError::Read)? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let input: Input = match serde_json::from_str(line) {
            Ok(input) => input,
            Err(e) => {
                session.emit(Output::error(format!("invalid input: {e}")));
                continue;
            }
        };
        debug!(?input, "Received input");

        if matches!(input, Input::Shutdown) {
            info!("Shutdown requested");
            break;
        }
        session.handle(input).await;
    }

    debug!(drain = ?config.drain, "Input ended, draining");
    tokio::time::sleep(config.drain).await;

    // Dropping the session drops every output sender, which ends the writer.
    session.manager.detach();
    drop(session);
    writer.await.map_err(BridgeError::Writer)?
}

async fn write_outputs<W>(mut rx: mpsc::UnboundedReceiver<Output>, mut writer: W) -> Result<(), BridgeError>
where
    W: AsyncWrite + Unpin,
{
    while let Some(output) = rx.recv().await {
        let mut json =
            serde_json::to_string(&output).expect("Output serialization should never fail");
        json.push('\n');
        writer
            .write_all(json.as_bytes())
            .await
            .map_err(BridgeError::Write)?;
        writer.flush().await.map_err(BridgeError::Write)?;
    }
    Ok(())
}

struct BridgeSession {
    workspace: Arc<SharedWorkspace>,
    bus: RuntimeEventBus,
    manager: ChannelLifecycleManager,
    controller: TerminalSessionController,
    container: Arc<VirtualContainer>,
    sink: Arc<SessionSink>,
    screen: Option<Arc<VirtualTerminal>>,
    metrics: Option<CellMetrics>,
    initial_size: TerminalSize,
    out: OutputTx,
}

impl BridgeSession {
    fn new(config: &BridgeConfig, workspace: Arc<SharedWorkspace>, out: OutputTx) -> Self {
        let bus = RuntimeEventBus::new();
        let manager = ChannelLifecycleManager::new(
            Arc::new(LineTransport { out: out.clone() }),
            Arc::clone(&workspace) as Arc<dyn WorkspaceSource>,
            config.channel.clone(),
        );
        manager.attach(&bus);

        let container = Arc::new(VirtualContainer::new(PixelSize::default()));
        let sink = Arc::new(SessionSink {
            out: out.clone(),
            screen: Mutex::new(None),
        });
        let controller = TerminalSessionController::new(
            Arc::clone(&container) as Arc<dyn TerminalContainer>,
            Arc::clone(&sink) as Arc<dyn SizeSink>,
            config.timings,
        );

        Self {
            workspace,
            bus,
            manager,
            controller,
            container,
            sink,
            screen: None,
            metrics: None,
            initial_size: config.initial_size,
            out,
        }
    }

    async fn publish(&self, event: RuntimeEvent) {
        if self.bus.publish_and_wait(event).await == 0 {
            warn!("No subscriber handled runtime event");
        }
    }

    fn emit(&self, output: Output) {
        if self.out.send(output).is_err() {
            warn!("Output writer gone, dropping output");
        }
    }

    /// Handle one input. Lifecycle events are fully handled before this
    /// returns, so each is resolved against the snapshot of its own line.
    async fn handle(&mut self, input: Input) {
        match input {
            Input::Workspace { workspace } => self.workspace.replace(workspace),

            Input::MachineStarted { machine, servers } => {
                if let Some(servers) = servers {
                    self.workspace.upsert_machine(&machine, Machine { servers });
                }
                self.publish(RuntimeEvent::MachineStarted { machine }).await;
            }

            Input::MachineStopped { machine } => {
                self.publish(RuntimeEvent::MachineStopped { machine }).await;
            }

            Input::UiReady => self.publish(RuntimeEvent::UiReady).await,

            Input::AttachTerminal { focus_on_open } => {
                let screen = Arc::new(VirtualTerminal::new(self.initial_size));
                if let Some(metrics) = self.metrics {
                    screen.set_cell_metrics(metrics);
                }
                self.sink.attach(Arc::clone(&screen));
                self.controller.set_terminal(
                    Arc::new(EmittingTerminal {
                        screen: Arc::clone(&screen),
                        out: self.out.clone(),
                    }),
                    focus_on_open,
                );
                self.screen = Some(screen);
            }

            Input::DetachTerminal => {
                self.controller.clear_terminal();
                self.sink.detach();
                self.screen = None;
            }

            Input::ContainerResized { width, height } => {
                self.container.set_size(PixelSize::new(width, height));
                self.controller.on_container_resize();
            }

            Input::FontsLoaded {
                cell_width,
                cell_height,
            } => {
                let metrics = CellMetrics {
                    width: cell_width,
                    height: cell_height,
                };
                self.metrics = Some(metrics);
                if let Some(screen) = &self.screen {
                    screen.set_cell_metrics(metrics);
                }
            }

            Input::Selection { active } => {
                if let Some(screen) = &self.screen {
                    screen.set_selection(active);
                }
            }

            Input::Focus { focused } => self.controller.request_focus(focused),

            Input::TerminalOutput { data } => match &self.screen {
                Some(screen) => screen.process(&data),
                None => self.emit(Output::error("no terminal attached")),
            },

            Input::Snapshot => match &self.screen {
                Some(screen) => {
                    let size = screen.size();
                    self.emit(Output::Screen {
                        content: screen.snapshot(),
                        size: (size.cols, size.rows),
                    });
                }
                None => self.emit(Output::error("no terminal attached")),
            },

            Input::ShowError { message } => {
                self.controller.show_error(&message);
                self.emit(Output::ErrorShown { message });
            }

            // Handled by the read loop.
            Input::Shutdown => {}
        }
    }
}

/// Transport that asks the embedding process to open/close channels.
struct LineTransport {
    out: OutputTx,
}

impl RpcTransport for LineTransport {
    fn initialize(&self, name: &str, options: &ChannelOptions) -> Result<(), TransportError> {
        self.out
            .send(Output::ChannelInitialize {
                name: name.to_string(),
                url: options.url.clone(),
            })
            .map_err(|_| TransportError::Closed)
    }

    fn terminate(&self, name: &str) -> Result<(), TransportError> {
        self.out
            .send(Output::ChannelTerminate {
                name: name.to_string(),
            })
            .map_err(|_| TransportError::Closed)
    }
}

/// The owning session: applies negotiated sizes to the local screen and
/// forwards them.
struct SessionSink {
    out: OutputTx,
    screen: Mutex<Option<Arc<VirtualTerminal>>>,
}

impl SessionSink {
    fn attach(&self, screen: Arc<VirtualTerminal>) {
        *self.screen.lock().expect("session sink lock poisoned") = Some(screen);
    }

    fn detach(&self) {
        *self.screen.lock().expect("session sink lock poisoned") = None;
    }
}

impl SizeSink for SessionSink {
    fn set_terminal_size(&self, size: TerminalSize) {
        if let Some(screen) = self.screen.lock().expect("session sink lock poisoned").as_ref() {
            screen.apply_size(size);
        }
        let _ = self.out.send(Output::TerminalSize {
            cols: size.cols,
            rows: size.rows,
        });
    }
}

/// Virtual terminal that reports open/focus on the output stream.
struct EmittingTerminal {
    screen: Arc<VirtualTerminal>,
    out: OutputTx,
}

impl TerminalEngine for EmittingTerminal {
    fn open(&self, container: Arc<dyn TerminalContainer>) {
        self.screen.open(container);
        let _ = self.out.send(Output::TerminalOpened);
    }

    fn focus(&self) {
        self.screen.focus();
        let _ = self.out.send(Output::TerminalFocused);
    }

    fn has_selection(&self) -> bool {
        self.screen.has_selection()
    }

    fn propose_geometry(&self) -> Geometry {
        self.screen.propose_geometry()
    }

    fn has_element(&self) -> bool {
        self.screen.has_element()
    }
}
