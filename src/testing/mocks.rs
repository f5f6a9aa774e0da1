//! Mock implementations for testing
//!
//! [`MockTransport`] is an in-memory transport that plays the server side:
//! tests read what the client sent and push frames back. [`RecordingDelegate`]
//! records every callback as a [`ClientEvent`] and lets tests await them.

use crate::bayeux::ClientDelegate;
use crate::error::BayeuxError;
use crate::protocol::{codec, encode_one, Message};
use crate::transport::{Transport, TransportEvent, TransportLink, TransportSink};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

/// How long helpers wait before giving up
pub const DEFAULT_WAIT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct MockState {
    sent_tx: mpsc::UnboundedSender<String>,
    sent_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    history: Mutex<Vec<String>>,
    server: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    opened_urls: Mutex<Vec<String>>,
    fail_open: AtomicBool,
    fail_send: AtomicBool,
    closes: AtomicUsize,
}

/// Scriptable in-memory transport
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<MockState>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    pub fn new() -> Self {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(MockState {
                sent_tx,
                sent_rx: tokio::sync::Mutex::new(sent_rx),
                history: Mutex::new(Vec::new()),
                server: Mutex::new(None),
                opened_urls: Mutex::new(Vec::new()),
                fail_open: AtomicBool::new(false),
                fail_send: AtomicBool::new(false),
                closes: AtomicUsize::new(0),
            }),
        }
    }

    /// Make the next `open` calls fail
    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Make sends on the open link fail
    pub fn set_fail_send(&self, fail: bool) {
        self.state.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        lock(&self.state.opened_urls).len()
    }

    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }

    pub fn opened_urls(&self) -> Vec<String> {
        lock(&self.state.opened_urls).clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.state.server).is_some()
    }

    /// Next message the client sent, waiting up to [`DEFAULT_WAIT`]
    pub async fn next_sent(&self) -> Option<Message> {
        self.next_sent_within(DEFAULT_WAIT).await
    }

    /// Next message the client sent, waiting up to `wait`
    pub async fn next_sent_within(&self, wait: Duration) -> Option<Message> {
        let mut sent = self.state.sent_rx.lock().await;
        let text = tokio::time::timeout(wait, sent.recv()).await.ok()??;
        codec::decode(&text).messages.into_iter().next()
    }

    /// Skip sent messages until one on `channel` shows up
    pub async fn next_sent_on(&self, channel: &str) -> Option<Message> {
        self.next_sent_on_within(channel, DEFAULT_WAIT).await
    }

    pub async fn next_sent_on_within(&self, channel: &str, wait: Duration) -> Option<Message> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let message = self.next_sent_within(remaining).await?;
            if message.channel == channel {
                return Some(message);
            }
        }
    }

    /// Everything the client sent so far, oldest first
    pub fn sent_history(&self) -> Vec<Message> {
        lock(&self.state.history)
            .iter()
            .flat_map(|text| codec::decode(text).messages)
            .collect()
    }

    pub fn sent_on(&self, channel: &str) -> Vec<Message> {
        self.sent_history()
            .into_iter()
            .filter(|message| message.channel == channel)
            .collect()
    }

    /// Push a raw text frame to the client; false if no link is open
    pub async fn deliver(&self, text: &str) -> bool {
        self.push(TransportEvent::Message(text.to_string())).await
    }

    /// Push one message to the client as a one-element frame
    pub async fn deliver_message(&self, message: &Message) -> bool {
        match encode_one(message) {
            Ok(text) => self.deliver(&text).await,
            Err(_) => false,
        }
    }

    /// Close the link from the server side
    pub async fn close_from_server(&self, code: Option<u16>, reason: &str) -> bool {
        let delivered = self
            .push(TransportEvent::Closed {
                code,
                reason: reason.to_string(),
            })
            .await;
        lock(&self.state.server).take();
        delivered
    }

    /// Report a socket error without closing the link
    pub async fn error_from_server(&self, reason: &str) -> bool {
        self.push(TransportEvent::Error(reason.to_string())).await
    }

    async fn push(&self, event: TransportEvent) -> bool {
        let server = lock(&self.state.server).clone();
        match server {
            Some(server) => server.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Answer the handshake the client just sent
    pub async fn accept_handshake(&self, client_id: &str) -> Option<Message> {
        let request = self.next_sent_on("/meta/handshake").await?;
        self.deliver_message(&handshake_reply(&request, client_id))
            .await
            .then_some(request)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open(&self, url: &Url) -> Result<TransportLink, BayeuxError> {
        lock(&self.state.opened_urls).push(url.to_string());
        if self.state.fail_open.load(Ordering::SeqCst) {
            return Err(BayeuxError::transport("Mock connection failure"));
        }

        let (events_tx, events_rx) = mpsc::channel(64);
        let _ = events_tx.send(TransportEvent::Opened).await;
        *lock(&self.state.server) = Some(events_tx);

        Ok(TransportLink::new(
            Box::new(MockSink {
                state: self.state.clone(),
                closed: false,
            }),
            events_rx,
        ))
    }
}

struct MockSink {
    state: Arc<MockState>,
    closed: bool,
}

#[async_trait]
impl TransportSink for MockSink {
    async fn send(&mut self, text: String) -> Result<(), BayeuxError> {
        if self.closed {
            return Err(BayeuxError::transport("Mock link is closed"));
        }
        if self.state.fail_send.load(Ordering::SeqCst) {
            return Err(BayeuxError::transport("Mock send failure"));
        }
        lock(&self.state.history).push(text.clone());
        let _ = self.state.sent_tx.send(text);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BayeuxError> {
        if !self.closed {
            self.closed = true;
            self.state.closes.fetch_add(1, Ordering::SeqCst);
            lock(&self.state.server).take();
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Reply echoing `request`'s channel, id and subscription
pub fn reply_to(request: &Message, successful: bool) -> Message {
    Message {
        id: request.id.clone(),
        subscription: request.subscription.clone(),
        successful: Some(successful),
        ..Message::new(request.channel.clone())
    }
}

/// Failed reply carrying `error`
pub fn error_reply(request: &Message, error: &str) -> Message {
    Message {
        error: Some(error.to_string()),
        ..reply_to(request, false)
    }
}

/// Successful handshake reply assigning `client_id`
pub fn handshake_reply(request: &Message, client_id: &str) -> Message {
    Message {
        client_id: Some(client_id.to_string()),
        version: Some("1.0".to_string()),
        supported_connection_types: Some(vec!["websocket".to_string()]),
        ..reply_to(request, true)
    }
}

/// Every callback a [`RecordingDelegate`] can observe
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    MessageReceived { channel: String, message: Message },
    Subscribed(String),
    SubscribeFailed { channel: String, error: BayeuxError },
    Unsubscribed(String),
    UnsubscribeFailed { channel: String, error: BayeuxError },
    Published { id: String, channel: String, error: Option<BayeuxError> },
    SerializeFailed { message: Message, error: BayeuxError },
    DeserializeFailed { payload: String, error: BayeuxError },
    Failed(BayeuxError),
}

/// Delegate that records callbacks in order
#[derive(Debug)]
pub struct RecordingDelegate {
    events: Mutex<Vec<ClientEvent>>,
    tx: mpsc::UnboundedSender<ClientEvent>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ClientEvent>>,
}

impl RecordingDelegate {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            tx,
            rx: tokio::sync::Mutex::new(rx),
        })
    }

    fn record(&self, event: ClientEvent) {
        lock(&self.events).push(event.clone());
        let _ = self.tx.send(event);
    }

    /// Every event so far, oldest first
    pub fn events(&self) -> Vec<ClientEvent> {
        lock(&self.events).clone()
    }

    pub fn count<F: Fn(&ClientEvent) -> bool>(&self, predicate: F) -> usize {
        lock(&self.events).iter().filter(|e| predicate(e)).count()
    }

    /// Next event not yet consumed by `next_event`/`wait_for`
    pub async fn next_event(&self) -> Option<ClientEvent> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(DEFAULT_WAIT, rx.recv()).await.ok()?
    }

    /// Consume events until one matches `predicate`
    pub async fn wait_for<F: Fn(&ClientEvent) -> bool>(&self, predicate: F) -> Option<ClientEvent> {
        loop {
            let event = self.next_event().await?;
            if predicate(&event) {
                return Some(event);
            }
        }
    }

    /// Unconsumed event available right now, without waiting
    pub async fn try_next_event(&self) -> Option<ClientEvent> {
        self.rx.lock().await.try_recv().ok()
    }
}

impl ClientDelegate for RecordingDelegate {
    fn connected(&self) {
        self.record(ClientEvent::Connected);
    }

    fn disconnected(&self) {
        self.record(ClientEvent::Disconnected);
    }

    fn message_received(&self, channel: &str, message: &Message) {
        self.record(ClientEvent::MessageReceived {
            channel: channel.to_string(),
            message: message.clone(),
        });
    }

    fn subscribed(&self, channel: &str) {
        self.record(ClientEvent::Subscribed(channel.to_string()));
    }

    fn subscribe_failed(&self, channel: &str, error: &BayeuxError) {
        self.record(ClientEvent::SubscribeFailed {
            channel: channel.to_string(),
            error: error.clone(),
        });
    }

    fn unsubscribed(&self, channel: &str) {
        self.record(ClientEvent::Unsubscribed(channel.to_string()));
    }

    fn unsubscribe_failed(&self, channel: &str, error: &BayeuxError) {
        self.record(ClientEvent::UnsubscribeFailed {
            channel: channel.to_string(),
            error: error.clone(),
        });
    }

    fn published(&self, id: &str, channel: &str, error: Option<&BayeuxError>) {
        self.record(ClientEvent::Published {
            id: id.to_string(),
            channel: channel.to_string(),
            error: error.cloned(),
        });
    }

    fn serialize_failed(&self, message: &Message, error: &BayeuxError) {
        self.record(ClientEvent::SerializeFailed {
            message: message.clone(),
            error: error.clone(),
        });
    }

    fn deserialize_failed(&self, payload: &str, error: &BayeuxError) {
        self.record(ClientEvent::DeserializeFailed {
            payload: payload.to_string(),
            error: error.clone(),
        });
    }

    fn failed(&self, error: &BayeuxError) {
        self.record(ClientEvent::Failed(error.clone()));
    }
}
