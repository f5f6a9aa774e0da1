//! Subscription registry
//!
//! The registry records what the application wants to be subscribed to,
//! independent of whether a session currently exists. Entries survive lost
//! links and are replayed after the next successful handshake; they go away
//! only on explicit unsubscribe or when the server rejects the subscribe.

use super::delegate::MessageHandlerFn;
use crate::protocol::channel_matches;
use std::collections::BTreeMap;
use tracing::debug;

/// Lifecycle of one subscription entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    /// Needs a `/meta/subscribe` on the next session
    PendingReplay,
    /// `/meta/subscribe` sent, waiting for the reply
    Subscribing,
    /// Server acknowledged the subscribe
    Subscribed,
    /// `/meta/unsubscribe` sent, waiting for the reply
    Unsubscribing,
}

#[derive(Clone)]
pub struct Listener {
    /// `None` means the delegate alone receives the messages
    pub handler: Option<MessageHandlerFn>,
}

#[derive(Clone)]
pub struct SubscriptionEntry {
    pub channel: String,
    pub listeners: Vec<Listener>,
    pub status: SubscriptionStatus,
}

impl std::fmt::Debug for SubscriptionEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEntry")
            .field("channel", &self.channel)
            .field("listeners", &self.listeners.len())
            .field("status", &self.status)
            .finish()
    }
}

/// What the engine must do after a subscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeAction {
    /// Send `/meta/subscribe`
    Request,
    /// A subscribe for this channel is already on the wire
    InFlight,
    /// Already subscribed, notify immediately
    AlreadyActive,
    /// Not connected; the entry is replayed after the next handshake
    Deferred,
}

/// What the engine must do after an unsubscribe call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeAction {
    /// No such subscription
    NotSubscribed,
    /// Send `/meta/unsubscribe`
    Request,
    /// Dropped without server round trip
    RemovedLocally,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: BTreeMap<String, SubscriptionEntry>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(
        &mut self,
        channel: &str,
        handler: Option<MessageHandlerFn>,
        connected: bool,
    ) -> SubscribeAction {
        let listener = Listener { handler };
        let wanted = if connected {
            SubscriptionStatus::Subscribing
        } else {
            SubscriptionStatus::PendingReplay
        };

        let Some(entry) = self.entries.get_mut(channel) else {
            self.entries.insert(
                channel.to_string(),
                SubscriptionEntry {
                    channel: channel.to_string(),
                    listeners: vec![listener],
                    status: wanted,
                },
            );
            return Self::action_for(wanted);
        };

        entry.listeners.push(listener);
        match entry.status {
            SubscriptionStatus::Subscribed => SubscribeAction::AlreadyActive,
            SubscriptionStatus::Subscribing => SubscribeAction::InFlight,
            SubscriptionStatus::PendingReplay | SubscriptionStatus::Unsubscribing => {
                entry.status = wanted;
                Self::action_for(wanted)
            }
        }
    }

    fn action_for(status: SubscriptionStatus) -> SubscribeAction {
        match status {
            SubscriptionStatus::Subscribing => SubscribeAction::Request,
            _ => SubscribeAction::Deferred,
        }
    }

    pub fn begin_unsubscribe(&mut self, channel: &str, connected: bool) -> UnsubscribeAction {
        let Some(entry) = self.entries.get_mut(channel) else {
            return UnsubscribeAction::NotSubscribed;
        };

        match entry.status {
            SubscriptionStatus::Unsubscribing => UnsubscribeAction::NotSubscribed,
            SubscriptionStatus::Subscribed | SubscriptionStatus::Subscribing if connected => {
                entry.listeners.clear();
                entry.status = SubscriptionStatus::Unsubscribing;
                UnsubscribeAction::Request
            }
            _ => {
                self.entries.remove(channel);
                UnsubscribeAction::RemovedLocally
            }
        }
    }

    /// Subscribe acknowledged; returns whether the application should hear
    /// about it
    pub fn confirm_subscribed(&mut self, channel: &str) -> bool {
        match self.entries.get_mut(channel) {
            Some(entry) if entry.status == SubscriptionStatus::Subscribing => {
                entry.status = SubscriptionStatus::Subscribed;
                true
            }
            _ => false,
        }
    }

    /// Subscribe refused by the server; drops the entry unless the
    /// application already moved on
    pub fn reject_subscribe(&mut self, channel: &str) -> bool {
        match self.entries.get(channel) {
            Some(entry) if entry.status == SubscriptionStatus::Subscribing => {
                self.entries.remove(channel);
                true
            }
            _ => false,
        }
    }

    /// Subscribe could not go out (veto, lost link); retry on next session
    pub fn mark_pending_replay(&mut self, channel: &str) {
        if let Some(entry) = self.entries.get_mut(channel) {
            if entry.status == SubscriptionStatus::Subscribing {
                entry.status = SubscriptionStatus::PendingReplay;
            }
        }
    }

    /// Unsubscribe resolved (acknowledged, refused or lost); removes the entry
    /// if no new subscribe arrived meanwhile
    pub fn finish_unsubscribe(&mut self, channel: &str) -> bool {
        match self.entries.get(channel) {
            Some(entry) if entry.status == SubscriptionStatus::Unsubscribing => {
                self.entries.remove(channel);
                true
            }
            _ => false,
        }
    }

    /// Session ended: every surviving entry needs a fresh subscribe
    pub fn reset_for_replay(&mut self) {
        self.entries
            .retain(|_, entry| entry.status != SubscriptionStatus::Unsubscribing);
        for entry in self.entries.values_mut() {
            entry.status = SubscriptionStatus::PendingReplay;
        }
    }

    /// Channels to re-subscribe after a handshake, moved to `Subscribing`
    pub fn take_replay(&mut self) -> Vec<String> {
        let channels: Vec<String> = self
            .entries
            .values_mut()
            .filter(|entry| entry.status == SubscriptionStatus::PendingReplay)
            .map(|entry| {
                entry.status = SubscriptionStatus::Subscribing;
                entry.channel.clone()
            })
            .collect();
        if !channels.is_empty() {
            debug!(count = channels.len(), "Replaying subscriptions");
        }
        channels
    }

    /// Handlers of every live entry whose pattern covers `channel`
    pub fn handlers_for(&self, channel: &str) -> Vec<MessageHandlerFn> {
        self.entries
            .values()
            .filter(|entry| entry.status != SubscriptionStatus::Unsubscribing)
            .filter(|entry| channel_matches(&entry.channel, channel))
            .flat_map(|entry| entry.listeners.iter().filter_map(|l| l.handler.clone()))
            .collect()
    }

    /// Channels the application is subscribed to (and has not unsubscribed)
    pub fn active_channels(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.status != SubscriptionStatus::Unsubscribing)
            .map(|entry| entry.channel.clone())
            .collect()
    }

    pub fn status(&self, channel: &str) -> Option<SubscriptionStatus> {
        self.entries.get(channel).map(|entry| entry.status)
    }

    pub fn get(&self, channel: &str) -> Option<&SubscriptionEntry> {
        self.entries.get(channel)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
