//! Bayeux message envelope
//!
//! A single [`Message`] type covers both directions. Fields the server may
//! omit are `Option`s so that an absent field never turns into a garbage
//! default, and unknown fields are kept in [`Message::extra`] so that an
//! envelope survives a decode/encode cycle unchanged.

use super::channels::{
    META_CONNECT, META_DISCONNECT, META_HANDSHAKE, META_SUBSCRIBE, META_UNSUBSCRIBE,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version advertised during handshake
pub const BAYEUX_VERSION: &str = "1.0";

/// Connection type advertised during handshake and used on `/meta/connect`
pub const CONNECTION_TYPE_WEBSOCKET: &str = "websocket";

/// Bayeux message envelope
///
/// # Examples
/// ```
/// use bayeux_client::protocol::Message;
/// use serde_json::json;
///
/// let message = Message::publish("7", "abc", "/chat", json!({"text": "hi"}));
/// assert_eq!(message.channel, "/chat");
/// assert_eq!(message.client_id(), "abc");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Channel the message is sent on (required)
    pub channel: String,
    /// Client-assigned message identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Server-assigned session identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Application payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Target channel of a subscribe/unsubscribe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,
    /// Present on server replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,
    /// Present on failed replies
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
    /// Extension data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    /// Fields not modelled above, preserved verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Server advice about reconnection strategy
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Advice {
    /// `retry`, `handshake` or `none`; kept raw so unknown values still decode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconnect: Option<String>,
    /// Milliseconds the client should wait before the next connect
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Milliseconds the server will hold a connect request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `advice.reconnect` values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectAdvice {
    /// Keep the session, retry `/meta/connect`
    Retry,
    /// Session is gone, handshake again
    Handshake,
    /// Stop, do not reconnect
    None,
}

impl ReconnectAdvice {
    /// Parse the wire value, `None` for anything unrecognised
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "retry" => Some(ReconnectAdvice::Retry),
            "handshake" => Some(ReconnectAdvice::Handshake),
            "none" => Some(ReconnectAdvice::None),
            _ => None,
        }
    }
}

impl Message {
    /// Empty message on `channel`
    pub fn new<S: Into<String>>(channel: S) -> Self {
        Self {
            channel: channel.into(),
            ..Default::default()
        }
    }

    /// `/meta/handshake` request
    pub fn handshake(id: &str, ext: Option<Map<String, Value>>) -> Self {
        Self {
            id: Some(id.to_string()),
            version: Some(BAYEUX_VERSION.to_string()),
            minimum_version: Some(BAYEUX_VERSION.to_string()),
            supported_connection_types: Some(vec![CONNECTION_TYPE_WEBSOCKET.to_string()]),
            ext,
            ..Self::new(META_HANDSHAKE)
        }
    }

    /// `/meta/connect` keep-alive
    pub fn connect(id: &str, client_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            client_id: Some(client_id.to_string()),
            connection_type: Some(CONNECTION_TYPE_WEBSOCKET.to_string()),
            ..Self::new(META_CONNECT)
        }
    }

    /// `/meta/disconnect` request
    pub fn disconnect(id: &str, client_id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            client_id: Some(client_id.to_string()),
            ..Self::new(META_DISCONNECT)
        }
    }

    /// `/meta/subscribe` request
    pub fn subscribe(id: &str, client_id: &str, subscription: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(META_SUBSCRIBE)
        }
    }

    /// `/meta/unsubscribe` request
    pub fn unsubscribe(id: &str, client_id: &str, subscription: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            client_id: Some(client_id.to_string()),
            subscription: Some(subscription.to_string()),
            ..Self::new(META_UNSUBSCRIBE)
        }
    }

    /// Application publish
    pub fn publish(id: &str, client_id: &str, channel: &str, data: Value) -> Self {
        Self {
            id: Some(id.to_string()),
            client_id: Some(client_id.to_string()),
            data: Some(data),
            ..Self::new(channel)
        }
    }

    /// Message id, empty when absent
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Session id, empty before handshake
    pub fn client_id(&self) -> &str {
        self.client_id.as_deref().unwrap_or_default()
    }

    /// Subscription target, empty when absent
    pub fn subscription(&self) -> &str {
        self.subscription.as_deref().unwrap_or_default()
    }

    /// True only when the server explicitly reported success
    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }

    /// True when this is a server reply rather than a delivered event
    pub fn is_reply(&self) -> bool {
        self.successful.is_some()
    }

    /// Failure reason of a reply
    pub fn error_reason(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }

    /// Reconnect advice carried by this message, if any
    pub fn reconnect_advice(&self) -> Option<ReconnectAdvice> {
        self.advice
            .as_ref()
            .and_then(|a| a.reconnect.as_deref())
            .and_then(ReconnectAdvice::parse)
    }
}
