//! Transport layer for the Bayeux client
//!
//! The protocol engine only talks to the network through the [`Transport`]
//! trait so that the WebSocket implementation can be swapped for an
//! in-memory one in tests.
//!
//! Opening a transport yields a [`TransportLink`]: a [`TransportSink`] for
//! outgoing text frames and a channel of [`TransportEvent`]s for everything
//! the socket reports. Keeping the two halves separate lets the engine wait
//! on inbound events while it is sending.

use crate::error::BayeuxError;
use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

pub mod websocket;

pub use websocket::WebSocketTransport;

/// Events reported by an open transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Socket finished opening
    Opened,
    /// Text frame received
    Message(String),
    /// Socket closed by the peer or the network
    Closed { code: Option<u16>, reason: String },
    /// Socket-level error; usually followed by `Closed`
    Error(String),
}

/// Outgoing half of an open transport
#[async_trait]
pub trait TransportSink: Send {
    /// Send one text frame; fails if the socket is not open
    async fn send(&mut self, text: String) -> Result<(), BayeuxError>;

    /// Close the socket. Idempotent.
    async fn close(&mut self) -> Result<(), BayeuxError>;
}

/// An open connection: outgoing sink plus inbound event stream
pub struct TransportLink {
    pub sink: Box<dyn TransportSink>,
    pub events: mpsc::Receiver<TransportEvent>,
}

impl TransportLink {
    pub fn new(sink: Box<dyn TransportSink>, events: mpsc::Receiver<TransportEvent>) -> Self {
        Self { sink, events }
    }
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink").finish_non_exhaustive()
    }
}

/// Transport factory
///
/// This trait abstracts over how a socket to the Bayeux server is opened,
/// enabling dependency injection and testing.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new connection to `url`
    async fn open(&self, url: &Url) -> Result<TransportLink, BayeuxError>;
}
