//! Extension (middleware) pipeline
//!
//! Extensions see every outgoing message just before it is encoded and
//! every incoming message just after it is decoded. Returning `false` from a
//! hook vetoes the message.
//!
//! The pipeline is shared between the client handle (which adds and removes
//! extensions) and the engine (which runs them). Hooks always run over a
//! snapshot of the list, so mutation during a send never affects the send
//! in progress.

use crate::protocol::Message;
use chrono::Utc;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Message hook
///
/// Hooks are re-run on replayed subscribe messages, so they must be safe to
/// apply more than once.
pub trait Extension: Send + Sync {
    /// Called before a message is sent; return `false` to veto it
    fn will_send(&self, _message: &mut Message) -> bool {
        true
    }

    /// Called after a message is received; return `false` to drop it
    fn will_receive(&self, _message: &mut Message) -> bool {
        true
    }
}

/// Returns `false` once the owner of an extension has gone away
pub type LivenessCheck = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
struct Registered {
    extension: Arc<dyn Extension>,
    liveness: Option<LivenessCheck>,
}

impl Registered {
    fn is_alive(&self) -> bool {
        self.liveness.as_ref().map_or(true, |check| check())
    }
}

/// Result of running the pipeline over one message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    Pass,
    Vetoed,
}

#[derive(Clone, Default)]
pub struct ExtensionPipeline {
    entries: Arc<RwLock<Vec<Registered>>>,
}

impl std::fmt::Debug for ExtensionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtensionPipeline")
            .field("len", &self.len())
            .finish()
    }
}

fn same_extension(a: &Arc<dyn Extension>, b: &Arc<dyn Extension>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl ExtensionPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an extension; it stays registered until removed
    pub fn add(&self, extension: Arc<dyn Extension>) {
        self.push(Registered {
            extension,
            liveness: None,
        });
    }

    /// Append an extension that is skipped and dropped once `liveness`
    /// reports `false`
    pub fn add_with_liveness(&self, extension: Arc<dyn Extension>, liveness: LivenessCheck) {
        self.push(Registered {
            extension,
            liveness: Some(liveness),
        });
    }

    fn push(&self, entry: Registered) {
        match self.entries.write() {
            Ok(mut entries) => entries.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    /// Remove by identity; returns whether anything was removed
    pub fn remove(&self, extension: &Arc<dyn Extension>) -> bool {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(|entry| !same_extension(&entry.extension, extension));
        before != entries.len()
    }

    pub fn len(&self) -> usize {
        match self.entries.read() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Registered> {
        match self.entries.read() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn prune_dead(&self) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let before = entries.len();
        entries.retain(Registered::is_alive);
        if entries.len() != before {
            debug!(removed = before - entries.len(), "Pruned dead extensions");
        }
    }

    fn run<F>(&self, message: &mut Message, hook: F) -> PipelineOutcome
    where
        F: Fn(&dyn Extension, &mut Message) -> bool,
    {
        let mut saw_dead = false;
        let mut outcome = PipelineOutcome::Pass;

        for entry in self.snapshot() {
            if !entry.is_alive() {
                saw_dead = true;
                continue;
            }
            if !hook(entry.extension.as_ref(), message) {
                outcome = PipelineOutcome::Vetoed;
                break;
            }
        }

        if saw_dead {
            self.prune_dead();
        }
        outcome
    }

    /// Run every `will_send` hook in registration order
    pub fn outgoing(&self, message: &mut Message) -> PipelineOutcome {
        let outcome = self.run(message, |ext, msg| ext.will_send(msg));
        if outcome == PipelineOutcome::Vetoed {
            warn!(channel = %message.channel, id = message.id(), "Outgoing message vetoed by extension");
        }
        outcome
    }

    /// Run every `will_receive` hook in registration order
    pub fn incoming(&self, message: &mut Message) -> PipelineOutcome {
        let outcome = self.run(message, |ext, msg| ext.will_receive(msg));
        if outcome == PipelineOutcome::Vetoed {
            debug!(channel = %message.channel, "Incoming message vetoed by extension");
        }
        outcome
    }
}

/// Stamps outgoing messages with an HTTP-date `timestamp`
#[derive(Debug, Default, Clone, Copy)]
pub struct TimestampExtension;

impl TimestampExtension {
    pub const FORMAT: &'static str = "%a, %d %b %Y %H:%M:%S GMT";
}

impl Extension for TimestampExtension {
    fn will_send(&self, message: &mut Message) -> bool {
        message.timestamp = Some(Utc::now().format(Self::FORMAT).to_string());
        true
    }
}
