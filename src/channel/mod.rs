//! Channel lifecycle manager.
//!
//! Keeps one RPC channel open per running machine that advertises the agent
//! endpoint, and closes it when the machine stops. Driven by runtime events.

mod endpoint;
mod registry;
mod transport;

pub use endpoint::{AGENT_CONNECT_PATH, EXEC_AGENT_SERVICE, agent_channel_url, resolve_channel_url};
pub use registry::{ChannelRegistry, ChannelState};
pub use transport::{ChannelOptions, RpcTransport, TransportError};

use crate::events::{EventKind, RuntimeEvent, RuntimeEventBus, SubscriptionHandle};
use crate::timer::Ticket;
use crate::workspace::WorkspaceSource;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before the single initialization retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);

/// First attempt plus one retry. After that the manager waits for the next
/// `started` event for the machine.
const MAX_ATTEMPTS: u8 = 2;

/// Channel manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Service name the agent endpoint is advertised under.
    pub service_name: String,
    /// Delay before retrying a failed initialization.
    pub retry_delay: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            service_name: EXEC_AGENT_SERVICE.to_string(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Opens and closes per-machine agent channels.
///
/// Cheap to clone; clones share state. Operations never fail outward:
/// transport errors are logged and absorbed.
#[derive(Clone)]
pub struct ChannelLifecycleManager {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn RpcTransport>,
    workspace: Arc<dyn WorkspaceSource>,
    config: ChannelConfig,
    registry: Mutex<ChannelRegistry>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl ChannelLifecycleManager {
    #[must_use]
    pub fn new(
        transport: Arc<dyn RpcTransport>,
        workspace: Arc<dyn WorkspaceSource>,
        config: ChannelConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                workspace,
                config,
                registry: Mutex::new(ChannelRegistry::new()),
                subscription: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to machine lifecycle events on `bus`.
    ///
    /// Replaces any earlier subscription. The manager holds the handle; call
    /// [`detach`](Self::detach) to stop listening.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn attach(&self, bus: &RuntimeEventBus) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let handle = bus.subscribe(
            &[
                EventKind::MachineStarted,
                EventKind::MachineStopped,
                EventKind::UiReady,
            ],
            move |event| {
                if let Some(shared) = weak.upgrade() {
                    shared.handle_event(event);
                }
            },
        );
        *self.shared.subscription() = Some(handle);
    }

    /// Stop listening to the bus. Open channels are left as they are.
    pub fn detach(&self) {
        if let Some(handle) = self.shared.subscription().take() {
            handle.unsubscribe();
        }
    }

    /// A machine started: open its agent channel if it advertises one.
    pub fn on_machine_started(&self, machine: &str) {
        self.shared.start_channel(machine);
    }

    /// A machine stopped: close its channel, whether or not one was opened.
    pub fn on_machine_stopped(&self, machine: &str) {
        self.shared.stop_channel(machine);
    }

    /// Catch up with machines that were already running before we subscribed.
    pub fn on_ui_ready(&self) {
        self.shared.catch_up();
    }

    /// Current registration state for `machine`.
    #[must_use]
    pub fn channel_state(&self, machine: &str) -> Option<ChannelState> {
        self.shared.registry().state(machine).cloned()
    }

    /// Names of machines with an open channel, sorted.
    #[must_use]
    pub fn open_channels(&self) -> Vec<String> {
        self.shared.registry().open_names()
    }

    #[must_use]
    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }
}

impl Shared {
    fn registry(&self) -> MutexGuard<'_, ChannelRegistry> {
        self.registry.lock().expect("channel registry lock poisoned")
    }

    fn subscription(&self) -> MutexGuard<'_, Option<SubscriptionHandle>> {
        self.subscription
            .lock()
            .expect("channel subscription lock poisoned")
    }

    fn handle_event(self: &Arc<Self>, event: RuntimeEvent) {
        match event {
            RuntimeEvent::MachineStarted { machine } => self.start_channel(&machine),
            RuntimeEvent::MachineStopped { machine } => self.stop_channel(&machine),
            RuntimeEvent::UiReady => self.catch_up(),
        }
    }

    fn start_channel(self: &Arc<Self>, machine: &str) {
        debug!(%machine, "Agent machine started");
        if !self.registry().begin(machine) {
            debug!(%machine, "Channel already registered, ignoring start");
            return;
        }
        self.attempt(machine);
    }

    /// Resolve the endpoint against the current snapshot and ask the transport
    /// to open the channel.
    fn attempt(self: &Arc<Self>, machine: &str) {
        let workspace = self.workspace.snapshot();
        let Some(url) =
            resolve_channel_url(&workspace, machine, &self.config.service_name)
        else {
            debug!(
                %machine,
                service = %self.config.service_name,
                "No agent endpoint on machine, skipping"
            );
            self.registry().remove(machine);
            return;
        };

        let Some(attempt) = self.registry().record_attempt(machine) else {
            debug!(%machine, "Machine stopped before channel attempt");
            return;
        };

        let options = ChannelOptions { url: url.clone() };
        match self.transport.initialize(machine, &options) {
            Ok(()) => {
                if self.registry().mark_open(machine, url.clone()) {
                    info!(%machine, %url, attempt, "Agent channel initialized");
                } else {
                    debug!(%machine, "Machine stopped while channel was initializing");
                }
            }
            Err(e) if attempt < MAX_ATTEMPTS => {
                debug!(%machine, error = %e, "Channel initialization failed, will try one more time");
                let weak = Arc::downgrade(self);
                let name = machine.to_string();
                self.registry()
                    .schedule_retry(machine, self.config.retry_delay, move |ticket| {
                        if let Some(shared) = weak.upgrade() {
                            shared.retry(&name, ticket);
                        }
                    });
            }
            Err(e) => {
                warn!(%machine, error = %e, attempt, "Channel initialization failed, waiting for next start");
                self.registry().remove(machine);
            }
        }
    }

    fn retry(self: &Arc<Self>, machine: &str, ticket: Ticket) {
        if !self.registry().claim_retry(machine, ticket) {
            debug!(%machine, "Stale channel retry, ignoring");
            return;
        }
        debug!(%machine, "Retrying channel initialization");
        self.attempt(machine);
    }

    fn stop_channel(&self, machine: &str) {
        let previous = self.registry().remove(machine);
        debug!(%machine, ?previous, "Agent machine stopped");

        match self.transport.terminate(machine) {
            Ok(()) => info!(%machine, "Agent channel terminated"),
            Err(e) => debug!(%machine, error = %e, "Channel termination failed"),
        }
    }

    fn catch_up(self: &Arc<Self>) {
        let machines = self.workspace.snapshot().running_machine_names();
        debug!(count = machines.len(), "UI ready, initializing channels for running machines");
        for machine in machines {
            self.start_channel(&machine);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingTransport, TransportCall};
    use crate::workspace::{Machine, SharedWorkspace, Workspace, WorkspaceStatus};

    fn agent_machine(url: &str) -> Machine {
        Machine::default().with_server(EXEC_AGENT_SERVICE, url)
    }

    fn setup(workspace: Workspace) -> (ChannelLifecycleManager, Arc<RecordingTransport>, Arc<SharedWorkspace>) {
        let transport = Arc::new(RecordingTransport::new());
        let workspace = Arc::new(SharedWorkspace::new(workspace));
        let manager = ChannelLifecycleManager::new(
            Arc::clone(&transport) as Arc<dyn RpcTransport>,
            Arc::clone(&workspace) as Arc<dyn WorkspaceSource>,
            ChannelConfig::default(),
        );
        (manager, transport, workspace)
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_without_endpoint_is_noop() {
        let (manager, transport, _) = setup(
            Workspace::running().with_machine("db", Machine::default().with_server("mysql", "tcp://h:3306")),
        );

        manager.on_machine_started("db");
        manager.on_machine_started("unknown");

        assert_eq!(transport.initialize_count(), 0);
        assert_eq!(manager.channel_state("db"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_opens_channel() {
        let (manager, transport, _) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://host/x")));

        manager.on_machine_started("dev");

        assert_eq!(
            transport.calls(),
            vec![TransportCall::Initialize {
                name: "dev".into(),
                url: "ws://host/x/connect".into(),
            }]
        );
        assert_eq!(
            manager.channel_state("dev"),
            Some(ChannelState::Open {
                url: "ws://host/x/connect".into()
            })
        );
        assert_eq!(manager.open_channels(), vec!["dev"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_start_does_not_reinitialize() {
        let (manager, transport, _) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://host/x")));

        manager.on_machine_started("dev");
        manager.on_machine_started("dev");

        assert_eq!(transport.initialize_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_rereads_snapshot() {
        let (manager, transport, workspace) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://old/x")));
        transport.fail_next_initializes(1);

        manager.on_machine_started("dev");
        assert_eq!(manager.channel_state("dev"), Some(ChannelState::RetryPending));

        workspace.upsert_machine("dev", agent_machine("http://new/x"));
        tokio::time::sleep(Duration::from_millis(1001)).await;

        let urls: Vec<String> = transport
            .initialize_calls()
            .into_iter()
            .map(|(_, url, _)| url)
            .collect();
        assert_eq!(urls, vec!["ws://old/x/connect", "ws://new/x/connect"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_skipped_when_workspace_stopped() {
        let (manager, transport, workspace) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://h/x")));
        transport.fail_next_initializes(1);

        manager.on_machine_started("dev");
        workspace.replace(Workspace {
            status: WorkspaceStatus::Stopped,
            runtime: None,
        });
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(transport.initialize_count(), 1);
        assert_eq!(manager.channel_state("dev"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let (manager, transport, _) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://h/x")));
        transport.fail_next_initializes(1);

        manager.on_machine_started("dev");
        manager.on_machine_stopped("dev");
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(transport.initialize_count(), 1);
        assert_eq!(transport.terminate_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminate_failure_is_absorbed() {
        let (manager, transport, _) = setup(Workspace::running());
        transport.fail_terminates(true);

        manager.on_machine_stopped("dev");
        assert_eq!(transport.terminate_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ui_ready_ignores_non_running_workspace() {
        let mut workspace = Workspace::running().with_machine("dev", agent_machine("http://h/x"));
        workspace.status = WorkspaceStatus::Starting;
        let (manager, transport, _) = setup(workspace);

        manager.on_ui_ready();
        assert_eq!(transport.initialize_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_manager_cancels_retry() {
        let (manager, transport, _) =
            setup(Workspace::running().with_machine("dev", agent_machine("http://h/x")));
        transport.fail_next_initializes(1);

        manager.on_machine_started("dev");
        drop(manager);
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(transport.initialize_count(), 1);
    }
}
