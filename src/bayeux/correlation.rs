//! Request/response correlation
//!
//! Every subscribe, unsubscribe and publish is registered under its message
//! id before it is transmitted. Replies resolve the entry; teardown drains
//! the table so that each operation completes exactly once.

use crate::error::BayeuxError;
use crate::protocol::Message;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Operation kinds that wait for a server reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Subscribe,
    Unsubscribe,
    Publish,
}

/// An operation awaiting its reply
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOperation {
    pub id: String,
    pub kind: OperationKind,
    /// Subscription target for subscribe/unsubscribe, target channel for publish
    pub channel: String,
}

impl PendingOperation {
    pub fn new<I: Into<String>, C: Into<String>>(id: I, kind: OperationKind, channel: C) -> Self {
        Self {
            id: id.into(),
            kind,
            channel: channel.into(),
        }
    }
}

/// A resolved operation and its outcome
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub operation: PendingOperation,
    pub outcome: Result<(), BayeuxError>,
}

impl Completion {
    fn from_reply(operation: PendingOperation, reply: &Message) -> Self {
        let outcome = if reply.is_successful() {
            Ok(())
        } else {
            let reason = reply.error_reason();
            Err(match operation.kind {
                OperationKind::Subscribe | OperationKind::Unsubscribe => {
                    BayeuxError::subscription(operation.channel.clone(), reason)
                }
                OperationKind::Publish => {
                    BayeuxError::publish_rejected(operation.channel.clone(), reason)
                }
            })
        };
        Self { operation, outcome }
    }
}

#[derive(Debug)]
struct Slot {
    sequence: u64,
    operation: PendingOperation,
}

/// Pending operations keyed by message id
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: HashMap<String, Slot>,
    next_sequence: u64,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pending operation; a duplicate id is rejected and leaves the
    /// existing entry untouched
    pub fn register(&mut self, operation: PendingOperation) -> Result<(), BayeuxError> {
        if self.pending.contains_key(&operation.id) {
            return Err(BayeuxError::protocol(format!(
                "message id {} is already pending",
                operation.id
            )));
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.pending
            .insert(operation.id.clone(), Slot { sequence, operation });
        Ok(())
    }

    /// Remove an entry without completing it (send failed before transmit)
    pub fn remove(&mut self, id: &str) -> Option<PendingOperation> {
        self.pending.remove(id).map(|slot| slot.operation)
    }

    /// Resolve the entry a reply belongs to
    ///
    /// Replies with an id must match exactly; unknown ids are dropped. A reply
    /// without an id resolves the oldest entry of the same kind and channel.
    pub fn resolve(&mut self, kind: OperationKind, reply: &Message) -> Option<Completion> {
        let operation = match reply.id.as_deref() {
            Some(id) => match self.pending.get(id) {
                Some(slot) if slot.operation.kind == kind => self.remove(id),
                Some(slot) => {
                    warn!(
                        id,
                        expected = ?slot.operation.kind,
                        got = ?kind,
                        "Reply kind does not match pending operation, dropping"
                    );
                    None
                }
                None => {
                    debug!(id, channel = %reply.channel, "Reply for unknown message id, dropping");
                    None
                }
            },
            None => {
                let target = match kind {
                    OperationKind::Publish => reply.channel.as_str(),
                    OperationKind::Subscribe | OperationKind::Unsubscribe => reply.subscription(),
                };
                let oldest = self
                    .pending
                    .values()
                    .filter(|slot| slot.operation.kind == kind && slot.operation.channel == target)
                    .min_by_key(|slot| slot.sequence)
                    .map(|slot| slot.operation.id.clone());
                match oldest {
                    Some(id) => self.remove(&id),
                    None => {
                        debug!(channel = %reply.channel, target, "Reply without id matches nothing, dropping");
                        None
                    }
                }
            }
        }?;

        Some(Completion::from_reply(operation, reply))
    }

    /// Drain every entry, oldest first, with [`BayeuxError::ConnectionLost`]
    pub fn resolve_all_with_connection_lost(&mut self) -> Vec<Completion> {
        let mut slots: Vec<Slot> = self.pending.drain().map(|(_, slot)| slot).collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots
            .into_iter()
            .map(|slot| Completion {
                operation: slot.operation,
                outcome: Err(BayeuxError::ConnectionLost),
            })
            .collect()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(channel: &str, id: Option<&str>, successful: bool) -> Message {
        Message {
            id: id.map(str::to_string),
            successful: Some(successful),
            ..Message::new(channel)
        }
    }

    #[test]
    fn test_register_rejects_duplicate_id() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("1", OperationKind::Publish, "/chat"))
            .unwrap();

        let result = table.register(PendingOperation::new("1", OperationKind::Subscribe, "/x"));

        assert!(matches!(result, Err(BayeuxError::Protocol(_))));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_resolve_success_by_id() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("4", OperationKind::Publish, "/chat"))
            .unwrap();

        let completion = table
            .resolve(OperationKind::Publish, &reply("/chat", Some("4"), true))
            .unwrap();

        assert_eq!(completion.operation.id, "4");
        assert_eq!(completion.outcome, Ok(()));
        assert!(table.is_empty());
    }

    #[test]
    fn test_resolve_failure_maps_to_operation_error() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("2", OperationKind::Subscribe, "/secret"))
            .unwrap();

        let mut rejected = reply("/meta/subscribe", Some("2"), false);
        rejected.error = Some("403::forbidden".to_string());
        let completion = table.resolve(OperationKind::Subscribe, &rejected).unwrap();

        assert_eq!(
            completion.outcome,
            Err(BayeuxError::subscription("/secret", "403::forbidden"))
        );
    }

    #[test]
    fn test_replayed_id_is_a_no_op() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("5", OperationKind::Publish, "/chat"))
            .unwrap();
        let ack = reply("/chat", Some("5"), true);

        assert!(table.resolve(OperationKind::Publish, &ack).is_some());
        assert!(table.resolve(OperationKind::Publish, &ack).is_none());
    }

    #[test]
    fn test_stray_id_leaves_table_untouched() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("1", OperationKind::Publish, "/chat"))
            .unwrap();

        assert!(table
            .resolve(OperationKind::Publish, &reply("/chat", Some("99"), true))
            .is_none());
        assert!(table.contains("1"));
    }

    #[test]
    fn test_kind_mismatch_is_dropped() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("1", OperationKind::Publish, "/chat"))
            .unwrap();

        assert!(table
            .resolve(OperationKind::Subscribe, &reply("/meta/subscribe", Some("1"), true))
            .is_none());
        assert!(table.contains("1"));
    }

    #[test]
    fn test_reply_without_id_resolves_oldest_matching() {
        let mut table = CorrelationTable::new();
        table
            .register(PendingOperation::new("1", OperationKind::Subscribe, "/a"))
            .unwrap();
        table
            .register(PendingOperation::new("2", OperationKind::Subscribe, "/b"))
            .unwrap();
        table
            .register(PendingOperation::new("3", OperationKind::Subscribe, "/b"))
            .unwrap();

        let mut ack = reply("/meta/subscribe", None, true);
        ack.subscription = Some("/b".to_string());
        let completion = table.resolve(OperationKind::Subscribe, &ack).unwrap();

        assert_eq!(completion.operation.id, "2");
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_drain_completes_every_entry_once_in_order() {
        let mut table = CorrelationTable::new();
        for (id, kind) in [
            ("10", OperationKind::Publish),
            ("11", OperationKind::Subscribe),
            ("12", OperationKind::Unsubscribe),
        ] {
            table.register(PendingOperation::new(id, kind, "/chat")).unwrap();
        }

        let drained = table.resolve_all_with_connection_lost();

        let ids: Vec<_> = drained.iter().map(|c| c.operation.id.as_str()).collect();
        assert_eq!(ids, vec!["10", "11", "12"]);
        assert!(drained
            .iter()
            .all(|c| c.outcome == Err(BayeuxError::ConnectionLost)));
        assert!(table.is_empty());
        assert!(table.resolve_all_with_connection_lost().is_empty());
    }
}
