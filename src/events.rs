//! Runtime lifecycle events and the bus that carries them.
//!
//! Every subscription owns an unbounded mailbox, so a burst of events is
//! queued rather than dropped, and each subscriber sees events in publish order.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

/// Machine and UI lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// A machine started and may expose an agent endpoint.
    MachineStarted { machine: String },
    /// A machine stopped.
    MachineStopped { machine: String },
    /// The UI finished initializing. Fired once.
    UiReady,
}

impl RuntimeEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::MachineStarted { .. } => EventKind::MachineStarted,
            Self::MachineStopped { .. } => EventKind::MachineStopped,
            Self::UiReady => EventKind::UiReady,
        }
    }
}

/// Discriminant of [`RuntimeEvent`], used to filter subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MachineStarted,
    MachineStopped,
    UiReady,
}

/// One queued event, optionally with a reply sent once the handler returned.
#[derive(Debug)]
struct Delivery {
    event: RuntimeEvent,
    handled: Option<oneshot::Sender<()>>,
}

#[derive(Debug)]
struct Subscriber {
    kinds: Vec<EventKind>,
    mailbox: mpsc::UnboundedSender<Delivery>,
}

/// Fan-out bus for [`RuntimeEvent`]s. Cheap to clone; clones share subscribers.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEventBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
}

impl RuntimeEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        let mut subscribers = self.subscribers.lock().expect("event bus lock poisoned");
        subscribers.retain(|s| !s.mailbox.is_closed());
        subscribers
    }

    /// Queue an event for every matching subscriber without waiting.
    /// Returns the number of subscribers it was queued for.
    pub fn publish(&self, event: RuntimeEvent) -> usize {
        debug!(?event, "Publishing runtime event");
        let kind = event.kind();
        self.subscribers()
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .filter(|s| {
                s.mailbox
                    .send(Delivery {
                        event: event.clone(),
                        handled: None,
                    })
                    .is_ok()
            })
            .count()
    }

    /// Publish an event and wait until every matching subscriber has handled it.
    ///
    /// Returns the number of subscribers that handled it. A subscription that
    /// goes away while the event is queued is not counted.
    pub async fn publish_and_wait(&self, event: RuntimeEvent) -> usize {
        debug!(?event, "Publishing runtime event, waiting for handlers");
        let kind = event.kind();
        let pending: Vec<oneshot::Receiver<()>> = self
            .subscribers()
            .iter()
            .filter(|s| s.kinds.contains(&kind))
            .filter_map(|s| {
                let (tx, rx) = oneshot::channel();
                s.mailbox
                    .send(Delivery {
                        event: event.clone(),
                        handled: Some(tx),
                    })
                    .ok()
                    .map(|()| rx)
            })
            .collect();

        let mut handled = 0;
        for rx in pending {
            if rx.await.is_ok() {
                handled += 1;
            }
        }
        handled
    }

    /// Deliver every event whose kind is in `kinds` to `handler`, in publish order.
    ///
    /// Events published after this call returns are guaranteed to be seen.
    /// Delivery stops when the returned handle is dropped or unsubscribed.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn subscribe<F>(&self, kinds: &[EventKind], mut handler: F) -> SubscriptionHandle
    where
        F: FnMut(RuntimeEvent) + Send + 'static,
    {
        let (mailbox, mut rx) = mpsc::unbounded_channel::<Delivery>();
        self.subscribers().push(Subscriber {
            kinds: kinds.to_vec(),
            mailbox,
        });

        let task = tokio::spawn(async move {
            while let Some(delivery) = rx.recv().await {
                handler(delivery.event);
                if let Some(handled) = delivery.handled {
                    let _ = handled.send(());
                }
            }
            debug!("Runtime event bus closed");
        });

        SubscriptionHandle { task: Some(task) }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

/// Keeps a subscription alive. Dropping it unsubscribes.
#[derive(Debug)]
pub struct SubscriptionHandle {
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Stop receiving events.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn started(name: &str) -> RuntimeEvent {
        RuntimeEvent::MachineStarted {
            machine: name.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_order_with_filter() {
        let bus = RuntimeEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let _handle = bus.subscribe(
            &[EventKind::MachineStarted, EventKind::MachineStopped],
            move |event| s.lock().unwrap().push(event),
        );

        bus.publish(started("a"));
        bus.publish(RuntimeEvent::UiReady);
        bus.publish(RuntimeEvent::MachineStopped {
            machine: "a".into(),
        });
        bus.publish(started("b"));

        tokio::time::sleep(Duration::from_millis(1)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                started("a"),
                RuntimeEvent::MachineStopped {
                    machine: "a".into()
                },
                started("b"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsubscribe_stops_delivery() {
        let bus = RuntimeEventBus::new();
        let seen = Arc::new(Mutex::new(0usize));

        let s = Arc::clone(&seen);
        let handle = bus.subscribe(&[EventKind::UiReady], move |_| *s.lock().unwrap() += 1);

        bus.publish(RuntimeEvent::UiReady);
        tokio::time::sleep(Duration::from_millis(1)).await;
        handle.unsubscribe();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(bus.publish(RuntimeEvent::UiReady), 0);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_not_dropped() {
        let bus = RuntimeEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let _handle = bus.subscribe(&[EventKind::MachineStarted], move |event| {
            s.lock().unwrap().push(event);
        });

        for i in 0..1000 {
            assert_eq!(bus.publish(started(&format!("m{i}"))), 1);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1000);
        assert_eq!(seen[0], started("m0"));
        assert_eq!(seen[999], started("m999"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_and_wait_returns_after_handler() {
        let bus = RuntimeEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&seen);
        let _handle = bus.subscribe(&[EventKind::MachineStarted], move |event| {
            s.lock().unwrap().push(event);
        });

        assert_eq!(bus.publish_and_wait(started("a")).await, 1);
        assert_eq!(*seen.lock().unwrap(), vec![started("a")]);

        // Filtered out: nobody to wait for.
        assert_eq!(bus.publish_and_wait(RuntimeEvent::UiReady).await, 0);

        assert_eq!(bus.publish_and_wait(started("b")).await, 1);
        assert_eq!(*seen.lock().unwrap(), vec![started("a"), started("b")]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_and_wait_after_unsubscribe() {
        let bus = RuntimeEventBus::new();
        let handle = bus.subscribe(&[EventKind::UiReady], |_| {});
        assert_eq!(bus.subscriber_count(), 1);

        handle.unsubscribe();
        assert_eq!(bus.publish_and_wait(RuntimeEvent::UiReady).await, 0);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = RuntimeEventBus::new();
        assert_eq!(bus.publish(RuntimeEvent::UiReady), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_string(&started("dev")).unwrap();
        assert_eq!(json, r#"{"event":"machine_started","machine":"dev"}"#);
    }
}
