//! WebSocket transport built on tokio-tungstenite
//!
//! `open` performs the WebSocket upgrade, splits the stream, and spawns a
//! reader task that turns frames into [`TransportEvent`]s. The write half is
//! handed to the engine as a [`TransportSink`].

use super::{Transport, TransportEvent, TransportLink, TransportSink};
use crate::error::BayeuxError;
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_EVENT_BUFFER: usize = 256;

/// tokio-tungstenite backed [`Transport`]
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
    event_buffer: usize,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, BayeuxError> {
        debug!(url = %url, "Opening WebSocket");

        let (stream, response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                BayeuxError::transport(format!(
                    "WebSocket connect to {url} timed out after {:?}",
                    self.connect_timeout
                ))
            })?
            .map_err(|e| BayeuxError::transport(format!("WebSocket connect to {url} failed: {e}")))?;

        debug!(url = %url, status = %response.status(), "WebSocket upgrade completed");

        let (write, read) = stream.split();
        let (events_tx, events_rx) = mpsc::channel(self.event_buffer);
        let _ = events_tx.send(TransportEvent::Opened).await;
        let reader = tokio::spawn(read_frames(read, events_tx));

        Ok(TransportLink::new(
            Box::new(WebSocketSink {
                write,
                reader,
                closed: false,
            }),
            events_rx,
        ))
    }
}

/// Forward inbound frames until the socket closes or the engine goes away
async fn read_frames(mut read: SplitStream<WsStream>, events: mpsc::Sender<TransportEvent>) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(WsMessage::Text(text)) => TransportEvent::Message(text.to_string()),
            Ok(WsMessage::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => TransportEvent::Message(text),
                Err(_) => {
                    warn!("Dropping non UTF-8 binary frame ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(WsMessage::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                    .unwrap_or((None, String::new()));
                let _ = events.send(TransportEvent::Closed { code, reason }).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                let reason = e.to_string();
                let _ = events.send(TransportEvent::Error(reason.clone())).await;
                let _ = events
                    .send(TransportEvent::Closed { code: None, reason })
                    .await;
                return;
            }
        };

        if events.send(event).await.is_err() {
            return;
        }
    }

    let _ = events
        .send(TransportEvent::Closed {
            code: None,
            reason: "stream ended".to_string(),
        })
        .await;
}

struct WebSocketSink {
    write: SplitSink<WsStream, WsMessage>,
    reader: JoinHandle<()>,
    closed: bool,
}

#[async_trait]
impl TransportSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), BayeuxError> {
        if self.closed {
            return Err(BayeuxError::transport("WebSocket is not open"));
        }
        self.write
            .send(WsMessage::text(text))
            .await
            .map_err(|e| BayeuxError::transport(format!("WebSocket send failed: {e}")))
    }

    async fn close(&mut self) -> Result<(), BayeuxError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = self
            .write
            .close()
            .await
            .map_err(|e| BayeuxError::transport(format!("WebSocket close failed: {e}")));
        self.reader.abort();
        result
    }
}

impl Drop for WebSocketSink {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
