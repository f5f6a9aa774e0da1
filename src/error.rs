//! Error taxonomy for the Bayeux client
//!
//! Every failure the client can report is a [`BayeuxError`]. Errors are
//! cheap to clone because a single teardown may need to hand the same
//! error to many pending completions.

use crate::bayeux::ConnectionState;
use thiserror::Error;

/// Main error type for Bayeux client operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BayeuxError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Subscription to {channel} failed: {reason}")]
    Subscription { channel: String, reason: String },

    #[error("Publish to {channel} rejected: {reason}")]
    PublishRejected { channel: String, reason: String },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Message vetoed by extension")]
    Vetoed,

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: ConnectionState },

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BayeuxError {
    /// Create transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport(message.into())
    }

    /// Create protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol(message.into())
    }

    /// Create subscription error
    pub fn subscription<C: Into<String>, R: Into<String>>(channel: C, reason: R) -> Self {
        Self::Subscription {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// Create publish rejection error
    pub fn publish_rejected<C: Into<String>, R: Into<String>>(channel: C, reason: R) -> Self {
        Self::PublishRejected {
            channel: channel.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the session is gone rather than that a
    /// single request was refused
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            BayeuxError::Transport(_)
                | BayeuxError::ConnectionLost
                | BayeuxError::NotConnected { .. }
        )
    }
}

impl From<serde_json::Error> for BayeuxError {
    fn from(error: serde_json::Error) -> Self {
        if error.is_data() || error.is_syntax() || error.is_eof() {
            BayeuxError::Deserialization(error.to_string())
        } else {
            BayeuxError::Serialization(error.to_string())
        }
    }
}

/// Result type for Bayeux client operations
pub type BayeuxResult<T> = Result<T, BayeuxError>;
