//! Application callbacks
//!
//! All callbacks run on the engine task, one at a time, in the order the
//! engine produced them. They may call back into [`super::BayeuxClient`]
//! freely since handle methods only enqueue commands.

use crate::error::BayeuxError;
use crate::protocol::Message;
use std::sync::Arc;

/// Receives notifications from a [`super::BayeuxClient`]
///
/// Every method has a no-op default, implement only what you need.
#[allow(unused_variables)]
pub trait ClientDelegate: Send + Sync {
    /// Handshake succeeded and the session is live
    fn connected(&self) {}

    /// A live session ended: explicit disconnect, lost link, or a failed
    /// server-requested re-handshake (followed by `failed`)
    fn disconnected(&self) {}

    /// A message arrived on a subscribed channel
    fn message_received(&self, channel: &str, message: &Message) {}

    fn subscribed(&self, channel: &str) {}

    fn subscribe_failed(&self, channel: &str, error: &BayeuxError) {}

    fn unsubscribed(&self, channel: &str) {}

    fn unsubscribe_failed(&self, channel: &str, error: &BayeuxError) {}

    /// Outcome of a publish; `error` is `None` when the server acknowledged it
    fn published(&self, id: &str, channel: &str, error: Option<&BayeuxError>) {}

    fn serialize_failed(&self, message: &Message, error: &BayeuxError) {}

    /// An inbound frame (or one element of it) could not be decoded
    fn deserialize_failed(&self, payload: &str, error: &BayeuxError) {}

    /// Connection-level failure: handshake rejected or timed out, transport
    /// could not be opened, or the socket reported an error
    fn failed(&self, error: &BayeuxError) {}
}

/// Delegate that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDelegate;

impl ClientDelegate for NoopDelegate {}

/// Per-channel message handler
pub type MessageHandlerFn = Arc<dyn Fn(&str, &Message) + Send + Sync>;
