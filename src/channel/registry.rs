//! Channel registrations, one per machine name.

use crate::timer::{Ticket, TimerSlot};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// State of a live channel registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ChannelState {
    /// An initialize call is in progress.
    Connecting,
    /// The first attempt failed; a retry is scheduled.
    RetryPending,
    /// The transport accepted the channel.
    Open { url: String },
}

/// A live registration.
#[derive(Debug)]
struct Registration {
    state: ChannelState,
    attempts: u8,
    retry: TimerSlot,
}

/// Tracks which machines have a live (or in-flight) channel.
///
/// A name is either absent or has exactly one registration.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: HashMap<String, Registration>,
}

impl ChannelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `name` as connecting. Returns `false` if it is already registered.
    pub fn begin(&mut self, name: &str) -> bool {
        if self.channels.contains_key(name) {
            return false;
        }
        self.channels.insert(
            name.to_string(),
            Registration {
                state: ChannelState::Connecting,
                attempts: 0,
                retry: TimerSlot::new(),
            },
        );
        true
    }

    /// Record an initialize attempt and return its 1-based number.
    /// Returns `None` if `name` is not registered.
    pub fn record_attempt(&mut self, name: &str) -> Option<u8> {
        let registration = self.channels.get_mut(name)?;
        registration.attempts = registration.attempts.saturating_add(1);
        Some(registration.attempts)
    }

    /// Mark `name` as open. No-op if it was removed meanwhile.
    pub fn mark_open(&mut self, name: &str, url: String) -> bool {
        match self.channels.get_mut(name) {
            Some(registration) => {
                registration.state = ChannelState::Open { url };
                true
            }
            None => false,
        }
    }

    /// Schedule a retry for `name`, replacing any pending one.
    pub fn schedule_retry<F>(&mut self, name: &str, delay: Duration, fire: F) -> bool
    where
        F: FnOnce(Ticket) + Send + 'static,
    {
        match self.channels.get_mut(name) {
            Some(registration) => {
                registration.state = ChannelState::RetryPending;
                registration.retry.arm(delay, fire);
                true
            }
            None => false,
        }
    }

    /// Claim a fired retry. On success the registration goes back to `Connecting`.
    pub fn claim_retry(&mut self, name: &str, ticket: Ticket) -> bool {
        let Some(registration) = self.channels.get_mut(name) else {
            return false;
        };
        if registration.state != ChannelState::RetryPending || !registration.retry.claim(ticket) {
            return false;
        }
        registration.state = ChannelState::Connecting;
        true
    }

    /// Drop the registration for `name`, cancelling any pending retry.
    pub fn remove(&mut self, name: &str) -> Option<ChannelState> {
        self.channels.remove(name).map(|registration| registration.state)
    }

    /// Current state of `name`, if registered.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<&ChannelState> {
        self.channels.get(name).map(|registration| &registration.state)
    }

    /// Names of open channels, sorted.
    #[must_use]
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|(_, registration)| matches!(registration.state, ChannelState::Open { .. }))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
