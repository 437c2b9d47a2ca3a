//! Cancel-then-reschedule timers.
//!
//! Each logical delayed action (a channel retry, a resize debounce, a deferred
//! focus) owns one [`TimerSlot`]. Arming the slot aborts whatever was pending
//! before, so there is never more than one live timer per concern.
//!
//! A fired callback receives a [`Ticket`] and must [`TimerSlot::claim`] it under
//! the owner's lock before acting. A ticket that was superseded (the slot was
//! re-armed or cancelled after the sleep completed but before the callback got
//! the lock) fails to claim, and the callback does nothing.

use std::time::Duration;
use tokio::task::JoinHandle;

/// Proof that a callback came from the slot's current arming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// A single cancellable timer.
#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    handle: Option<JoinHandle<()>>,
}

impl TimerSlot {
    /// Create an idle slot.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            generation: 0,
            handle: None,
        }
    }

    /// Schedule `fire` to run after `delay`, cancelling any pending timer.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn arm<F>(&mut self, delay: Duration, fire: F)
    where
        F: FnOnce(Ticket) + Send + 'static,
    {
        self.cancel();
        let ticket = Ticket(self.generation);
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(ticket);
        }));
    }

    /// Cancel the pending timer, if any. Outstanding tickets become stale.
    pub fn cancel(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    /// Consume a ticket. Returns `true` only for the current, still-pending arming.
    pub fn claim(&mut self, ticket: Ticket) -> bool {
        if ticket.0 != self.generation || self.handle.is_none() {
            return false;
        }
        // The task is the caller; dropping the handle detaches it.
        self.handle = None;
        true
    }

    /// Whether a timer is armed and has not been claimed or cancelled.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
