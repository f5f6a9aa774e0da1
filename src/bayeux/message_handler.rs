//! Pure routing of inbound Bayeux messages
//!
//! The engine decodes a frame, runs the incoming extensions, then asks
//! [`MessageHandler::route`] what each surviving message is.

use crate::protocol::channels::{
    META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use crate::protocol::{is_meta, Message};

/// Where an inbound message goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRoute {
    HandshakeReply,
    ConnectReply,
    SubscribeReply,
    UnsubscribeReply,
    DisconnectReply,
    /// Reply on a meta channel this client never uses
    UnknownMeta,
    /// Acknowledgement of an application publish
    PublishReply,
    /// Data delivered on an application channel
    ChannelEvent,
}

/// Pure routing decisions for inbound messages
pub struct MessageHandler;

impl MessageHandler {
    /// Classify an inbound message (pure function)
    pub fn route(message: &Message) -> MessageRoute {
        if is_meta(&message.channel) {
            return match message.channel.as_str() {
                META_HANDSHAKE => MessageRoute::HandshakeReply,
                META_CONNECT => MessageRoute::ConnectReply,
                META_SUBSCRIBE => MessageRoute::SubscribeReply,
                META_UNSUBSCRIBE => MessageRoute::UnsubscribeReply,
                META_DISCONNECT => MessageRoute::DisconnectReply,
                _ => MessageRoute::UnknownMeta,
            };
        }

        // A publish ack echoes the channel and carries `successful`; an event
        // carries data and no `successful`
        if message.is_reply() && message.data.is_none() {
            MessageRoute::PublishReply
        } else {
            MessageRoute::ChannelEvent
        }
    }

    /// Client id carried by a successful handshake reply (pure function)
    pub fn extract_client_id(reply: &Message) -> Option<&str> {
        reply
            .client_id
            .as_deref()
            .filter(|client_id| !client_id.is_empty())
    }
}
