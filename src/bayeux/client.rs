//! Bayeux client: public handle and protocol engine
//!
//! [`BayeuxClient`] is a cheap, cloneable handle. Every method either reads
//! shared state (connection state, client id, metrics) or enqueues a
//! [`Command`] for the engine and returns immediately.
//!
//! The engine is a single tokio task that owns all protocol state: the
//! transport link, the correlation table, the subscription registry and the
//! heartbeat timer. It multiplexes application commands, transport events,
//! heartbeat ticks and the handshake/reconnect timers with `tokio::select!`
//! and invokes the [`ClientDelegate`] from that task only.

use super::connection::{
    ConnectionMonitor, ConnectionState, DisconnectReason, ReconnectPolicy, ReconnectionDecision,
};
use super::correlation::{Completion, CorrelationTable, OperationKind, PendingOperation};
use super::delegate::{ClientDelegate, MessageHandlerFn};
use super::extensions::{Extension, ExtensionPipeline, LivenessCheck, PipelineOutcome};
use super::heartbeat::{HeartbeatEvent, HeartbeatScheduler};
use super::message_handler::{MessageHandler, MessageRoute};
use super::subscriptions::{SubscribeAction, SubscriptionRegistry, UnsubscribeAction};
use crate::error::{BayeuxError, BayeuxResult};
use crate::observability::{ClientMetrics, MetricsSnapshot};
use crate::protocol::channels::{validate_publish, validate_subscription};
use crate::protocol::{codec, Message, ReconnectAdvice};
use crate::transport::{Transport, TransportEvent, TransportSink, WebSocketTransport};
use crate::{channel_span, session_span};
use serde::Serialize;
use serde_json::{Map, Value};
use std::future::pending;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn, Instrument};
use url::Url;

/// Runtime settings for one client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub url: Url,
    pub heartbeat_interval: Duration,
    /// How long after a heartbeat tick inbound traffic must appear
    pub heartbeat_grace: Duration,
    pub handshake_timeout: Duration,
    pub connect_timeout: Duration,
    /// Sent as the handshake `ext` field
    pub handshake_ext: Option<Map<String, Value>>,
    pub reconnect: ReconnectPolicy,
}

impl ClientOptions {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_grace: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            handshake_ext: None,
            reconnect: ReconnectPolicy::default(),
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration, grace: Duration) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_grace = grace;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_handshake_ext(mut self, ext: Map<String, Value>) -> Self {
        self.handshake_ext = Some(ext);
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

/// Sequential message ids shared by the handle and the engine
#[derive(Debug, Clone, Default)]
pub struct MessageIdGenerator {
    last: Arc<AtomicU64>,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        (self.last.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

/// Work queued by the handle for the engine
enum Command {
    Connect,
    Disconnect,
    Subscribe {
        channel: String,
        handler: Option<MessageHandlerFn>,
    },
    Unsubscribe {
        channel: String,
    },
    Publish {
        id: String,
        channel: String,
        data: Value,
    },
    PublishSerializeFailed {
        id: String,
        channel: String,
        error: BayeuxError,
    },
}

/// Handle to a Bayeux client
///
/// Cloning the handle is cheap; the engine stops (disconnecting first) once
/// every clone has been dropped.
///
/// # Examples
/// ```no_run
/// use bayeux_client::bayeux::{BayeuxClient, ClientOptions, NoopDelegate};
/// use std::sync::Arc;
///
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let url = url::Url::parse("wss://example.com/cometd")?;
/// let client = BayeuxClient::new(ClientOptions::new(url), Arc::new(NoopDelegate));
/// client.subscribe("/chat/*");
/// client.connect();
/// let id = client.publish("/chat/lobby", &serde_json::json!({"text": "hi"}));
/// # let _ = id;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BayeuxClient {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    client_id_rx: watch::Receiver<Option<String>>,
    ids: MessageIdGenerator,
    extensions: ExtensionPipeline,
    metrics: Arc<ClientMetrics>,
}

impl std::fmt::Debug for BayeuxClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BayeuxClient")
            .field("state", &self.state())
            .field("client_id", &self.client_id())
            .finish_non_exhaustive()
    }
}

impl BayeuxClient {
    /// Create a client that talks WebSocket. Must be called inside a tokio
    /// runtime.
    pub fn new(options: ClientOptions, delegate: Arc<dyn ClientDelegate>) -> Self {
        let transport = Arc::new(WebSocketTransport::new(options.connect_timeout));
        Self::with_transport(options, delegate, transport)
    }

    /// Create a client over any [`Transport`]. Must be called inside a tokio
    /// runtime.
    pub fn with_transport(
        options: ClientOptions,
        delegate: Arc<dyn ClientDelegate>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (client_id_tx, client_id_rx) = watch::channel(None);
        let ids = MessageIdGenerator::new();
        let extensions = ExtensionPipeline::new();
        let metrics = Arc::new(ClientMetrics::new());

        let span = session_span!(url = %options.url);
        let engine = Engine {
            heartbeat: HeartbeatScheduler::new(options.heartbeat_interval, options.heartbeat_grace),
            options,
            transport,
            delegate,
            extensions: extensions.clone(),
            ids: ids.clone(),
            metrics: metrics.clone(),
            state_tx,
            client_id_tx,
            state: ConnectionState::Disconnected,
            client_id: None,
            sink: None,
            events: None,
            handshake: None,
            correlation: CorrelationTable::new(),
            registry: SubscriptionRegistry::new(),
            reconnect_attempts: 0,
            reconnect_at: None,
            resuming: false,
        };
        tokio::spawn(engine.run(commands_rx).instrument(span));

        Self {
            commands: commands_tx,
            state_rx,
            client_id_rx,
            ids,
            extensions,
            metrics,
        }
    }

    fn enqueue(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("Bayeux engine has stopped, dropping command");
        }
    }

    /// Open the transport and handshake. No-op unless Disconnected.
    pub fn connect(&self) {
        self.enqueue(Command::Connect);
    }

    /// End the session; pending operations complete with `ConnectionLost`
    pub fn disconnect(&self) {
        self.enqueue(Command::Disconnect);
    }

    /// Subscribe with the delegate as the only receiver
    pub fn subscribe(&self, channel: &str) {
        self.enqueue(Command::Subscribe {
            channel: channel.to_string(),
            handler: None,
        });
    }

    /// Subscribe with a per-channel handler (the delegate is still notified)
    pub fn subscribe_with_handler<F>(&self, channel: &str, handler: F)
    where
        F: Fn(&str, &Message) + Send + Sync + 'static,
    {
        self.enqueue(Command::Subscribe {
            channel: channel.to_string(),
            handler: Some(Arc::new(handler)),
        });
    }

    pub fn unsubscribe(&self, channel: &str) {
        self.enqueue(Command::Unsubscribe {
            channel: channel.to_string(),
        });
    }

    /// Publish `data` on `channel`; returns the message id that the
    /// `published` notification will carry
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &str, data: &T) -> String {
        let id = self.ids.next_id();
        let command = match serde_json::to_value(data) {
            Ok(data) => Command::Publish {
                id: id.clone(),
                channel: channel.to_string(),
                data,
            },
            Err(e) => Command::PublishSerializeFailed {
                id: id.clone(),
                channel: channel.to_string(),
                error: BayeuxError::Serialization(e.to_string()),
            },
        };
        self.enqueue(command);
        id
    }

    pub fn add_extension(&self, extension: Arc<dyn Extension>) {
        self.extensions.add(extension);
    }

    /// Add an extension that is dropped once `liveness` returns `false`
    pub fn add_extension_with_liveness(&self, extension: Arc<dyn Extension>, liveness: LivenessCheck) {
        self.extensions.add_with_liveness(extension, liveness);
    }

    pub fn remove_extension(&self, extension: &Arc<dyn Extension>) -> bool {
        self.extensions.remove(extension)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Server-assigned id of the current session
    pub fn client_id(&self) -> Option<String> {
        self.client_id_rx.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the client reaches `target`
    pub async fn wait_for_state(&self, target: ConnectionState, timeout: Duration) -> BayeuxResult<()> {
        let mut state_rx = self.state_rx.clone();
        let result = tokio::time::timeout(timeout, async {
            loop {
                if *state_rx.borrow_and_update() == target {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(BayeuxError::protocol("Bayeux engine has stopped"));
                }
            }
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(BayeuxError::protocol(format!(
                "timed out waiting for {:?}, current state {:?}",
                target,
                self.state()
            ))),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

struct PendingHandshake {
    id: String,
    deadline: Instant,
}

enum Prepared {
    Ready(String),
    Vetoed,
    Failed(BayeuxError),
}

/// Protocol engine, owned by its task
struct Engine {
    options: ClientOptions,
    transport: Arc<dyn Transport>,
    delegate: Arc<dyn ClientDelegate>,
    extensions: ExtensionPipeline,
    ids: MessageIdGenerator,
    metrics: Arc<ClientMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    client_id_tx: watch::Sender<Option<String>>,
    state: ConnectionState,
    client_id: Option<String>,
    sink: Option<Box<dyn TransportSink>>,
    events: Option<mpsc::Receiver<TransportEvent>>,
    handshake: Option<PendingHandshake>,
    correlation: CorrelationTable,
    registry: SubscriptionRegistry,
    heartbeat: HeartbeatScheduler,
    reconnect_attempts: u32,
    reconnect_at: Option<Instant>,
    /// Re-handshake in flight for a session the application saw connect
    resuming: bool,
}

async fn next_transport_event(events: &mut Option<mpsc::Receiver<TransportEvent>>) -> TransportEvent {
    match events {
        Some(events) => events.recv().await.unwrap_or(TransportEvent::Closed {
            code: None,
            reason: "transport event stream ended".to_string(),
        }),
        None => pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

impl Engine {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        debug!("Bayeux engine started");

        loop {
            let handshake_deadline = self.handshake.as_ref().map(|h| h.deadline);
            let reconnect_at = self.reconnect_at;

            tokio::select! {
                biased;

                event = next_transport_event(&mut self.events) => {
                    self.handle_transport_event(event).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                heartbeat = self.heartbeat.next_event() => {
                    self.handle_heartbeat(heartbeat).await;
                }
                _ = sleep_until_opt(handshake_deadline) => {
                    self.handle_handshake_timeout().await;
                }
                _ = sleep_until_opt(reconnect_at) => {
                    self.reconnect_at = None;
                    if ConnectionMonitor::can_start_handshake(self.state) {
                        info!(attempt = self.reconnect_attempts, "Reconnecting");
                        self.start_handshake().await;
                    }
                }
            }
        }

        info!("All client handles dropped, shutting down");
        self.disconnect().await;
        debug!("Bayeux engine stopped");
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            ConnectionMonitor::log_state_transition(self.state, new_state);
            self.state = new_state;
            self.state_tx.send_replace(new_state);
        }
    }

    fn set_client_id(&mut self, client_id: Option<String>) {
        self.client_id = client_id.clone();
        self.client_id_tx.send_replace(client_id);
    }

    fn client_id_or_empty(&self) -> String {
        self.client_id.clone().unwrap_or_default()
    }

    // Commands

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.connect().await,
            Command::Disconnect => self.disconnect().await,
            Command::Subscribe { channel, handler } => {
                let span = channel_span!(channel = %channel, op = "subscribe");
                self.subscribe(channel, handler).instrument(span).await;
            }
            Command::Unsubscribe { channel } => {
                let span = channel_span!(channel = %channel, op = "unsubscribe");
                self.unsubscribe(channel).instrument(span).await;
            }
            Command::Publish { id, channel, data } => {
                let span = channel_span!(channel = %channel, op = "publish", id = %id);
                self.publish(id, channel, data).instrument(span).await;
            }
            Command::PublishSerializeFailed { id, channel, error } => {
                warn!(id = %id, channel = %channel, error = %error, "Publish payload could not be serialized");
                let message = Message {
                    id: Some(id.clone()),
                    ..Message::new(channel.clone())
                };
                self.delegate.serialize_failed(&message, &error);
                self.metrics.publish_completed(false);
                self.delegate.published(&id, &channel, Some(&error));
            }
        }
    }

    async fn connect(&mut self) {
        if !ConnectionMonitor::can_start_handshake(self.state) {
            debug!(state = ?self.state, "connect() ignored");
            return;
        }
        self.reconnect_at = None;
        self.reconnect_attempts = 0;
        self.start_handshake().await;
    }

    async fn disconnect(&mut self) {
        self.reconnect_at = None;

        match self.state {
            ConnectionState::Connected => {
                self.set_state(ConnectionState::Disconnecting);
                self.heartbeat.stop();
                let message = Message::disconnect(&self.ids.next_id(), &self.client_id_or_empty());
                if let Err(e) = self.send_untracked(message).await {
                    debug!(error = %e, "Best-effort /meta/disconnect failed");
                }
                self.teardown().await;
                self.metrics.session_ended();
                self.delegate.disconnected();
            }
            ConnectionState::Handshaking => {
                self.teardown().await;
                self.metrics.session_ended();
                self.delegate.disconnected();
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                debug!(state = ?self.state, "disconnect() ignored");
            }
        }
    }

    async fn subscribe(&mut self, channel: String, handler: Option<MessageHandlerFn>) {
        if let Err(e) = validate_subscription(&channel) {
            self.delegate
                .subscribe_failed(&channel, &BayeuxError::InvalidChannel(e.to_string()));
            return;
        }

        let connected = self.state == ConnectionState::Connected;
        match self.registry.add_listener(&channel, handler, connected) {
            SubscribeAction::Request => self.send_subscribe(channel).await,
            SubscribeAction::InFlight => debug!("Subscribe already in flight"),
            SubscribeAction::AlreadyActive => self.delegate.subscribed(&channel),
            SubscribeAction::Deferred => debug!("Not connected, subscribe deferred until handshake"),
        }
    }

    async fn unsubscribe(&mut self, channel: String) {
        let connected = self.state == ConnectionState::Connected;
        match self.registry.begin_unsubscribe(&channel, connected) {
            UnsubscribeAction::NotSubscribed => {
                let error = BayeuxError::subscription(channel.clone(), "not subscribed");
                self.delegate.unsubscribe_failed(&channel, &error);
            }
            UnsubscribeAction::RemovedLocally => self.delegate.unsubscribed(&channel),
            UnsubscribeAction::Request => {
                let id = self.ids.next_id();
                let message = Message::unsubscribe(&id, &self.client_id_or_empty(), &channel);
                let operation = PendingOperation::new(id, OperationKind::Unsubscribe, channel);
                self.send_tracked(message, operation).await;
            }
        }
    }

    async fn publish(&mut self, id: String, channel: String, data: Value) {
        let rejection = if let Err(e) = validate_publish(&channel) {
            Some(BayeuxError::InvalidChannel(e.to_string()))
        } else if !ConnectionMonitor::can_publish(self.state) {
            Some(BayeuxError::NotConnected { state: self.state })
        } else {
            None
        };
        if let Some(error) = rejection {
            debug!(error = %error, "Publish rejected locally");
            self.metrics.publish_completed(false);
            self.delegate.published(&id, &channel, Some(&error));
            return;
        }

        let message = Message::publish(&id, &self.client_id_or_empty(), &channel, data);
        let operation = PendingOperation::new(id, OperationKind::Publish, channel);
        self.send_tracked(message, operation).await;
    }

    async fn send_subscribe(&mut self, channel: String) {
        let id = self.ids.next_id();
        let message = Message::subscribe(&id, &self.client_id_or_empty(), &channel);
        let operation = PendingOperation::new(id, OperationKind::Subscribe, channel);
        self.send_tracked(message, operation).await;
    }

    // Sending

    /// Run outgoing extensions and encode
    fn prepare(&self, message: &mut Message) -> Prepared {
        if self.extensions.outgoing(message) == PipelineOutcome::Vetoed {
            self.metrics.outgoing_vetoed();
            return Prepared::Vetoed;
        }
        match codec::encode_one(message) {
            Ok(text) => Prepared::Ready(text),
            Err(e) => {
                error!(channel = %message.channel, error = %e, "Failed to encode message");
                self.delegate.serialize_failed(message, &e);
                Prepared::Failed(e)
            }
        }
    }

    async fn write(&mut self, text: String) -> BayeuxResult<()> {
        let sink = self
            .sink
            .as_mut()
            .ok_or_else(|| BayeuxError::transport("no open transport"))?;
        trace!(frame = %text, "Sending frame");
        sink.send(text).await?;
        self.metrics.message_sent();
        Ok(())
    }

    /// Send a message that expects a reply. Extensions run first, then the
    /// operation is registered, then the frame is written.
    async fn send_tracked(&mut self, mut message: Message, operation: PendingOperation) {
        let text = match self.prepare(&mut message) {
            Prepared::Ready(text) => text,
            Prepared::Vetoed => {
                self.complete(Completion {
                    operation,
                    outcome: Err(BayeuxError::Vetoed),
                });
                return;
            }
            Prepared::Failed(e) => {
                self.complete(Completion {
                    operation,
                    outcome: Err(e),
                });
                return;
            }
        };

        if let Err(e) = self.correlation.register(operation.clone()) {
            error!(id = %operation.id, error = %e, "Could not register operation");
            self.complete(Completion {
                operation,
                outcome: Err(e),
            });
            return;
        }

        if let Err(e) = self.write(text).await {
            self.correlation.remove(&operation.id);
            self.complete(Completion {
                operation,
                outcome: Err(e.clone()),
            });
            self.link_lost(DisconnectReason::TransportFailed(e.to_string()))
                .await;
        }
    }

    /// Send a message nobody waits for. A veto is not an error.
    async fn send_untracked(&mut self, mut message: Message) -> BayeuxResult<()> {
        match self.prepare(&mut message) {
            Prepared::Ready(text) => self.write(text).await,
            Prepared::Vetoed => Ok(()),
            Prepared::Failed(e) => Err(e),
        }
    }

    /// Deliver the outcome of a tracked operation
    fn complete(&mut self, completion: Completion) {
        let Completion { operation, outcome } = completion;
        let channel = operation.channel.as_str();

        match operation.kind {
            OperationKind::Subscribe => match outcome {
                Ok(()) => {
                    if self.registry.confirm_subscribed(channel) {
                        info!(channel, "Subscribed");
                        self.delegate.subscribed(channel);
                    }
                }
                Err(error @ BayeuxError::Subscription { .. }) => {
                    if self.registry.reject_subscribe(channel) {
                        warn!(channel, error = %error, "Subscribe rejected by server");
                        self.delegate.subscribe_failed(channel, &error);
                    } else {
                        debug!(channel, "Late subscribe rejection for a channel already left");
                    }
                }
                Err(error) => {
                    debug!(channel, error = %error, "Subscribe did not complete, will replay");
                    self.registry.mark_pending_replay(channel);
                    self.delegate.subscribe_failed(channel, &error);
                }
            },
            OperationKind::Unsubscribe => {
                self.registry.finish_unsubscribe(channel);
                match outcome {
                    Ok(()) => {
                        info!(channel, "Unsubscribed");
                        self.delegate.unsubscribed(channel);
                    }
                    Err(error) => self.delegate.unsubscribe_failed(channel, &error),
                }
            }
            OperationKind::Publish => {
                self.metrics.publish_completed(outcome.is_ok());
                self.delegate
                    .published(&operation.id, channel, outcome.as_ref().err());
            }
        }
    }

    // Session lifecycle

    async fn start_handshake(&mut self) {
        self.set_state(ConnectionState::Handshaking);
        self.metrics.handshake_started();

        if self.sink.is_none() {
            match self.transport.open(&self.options.url).await {
                Ok(link) => {
                    self.sink = Some(link.sink);
                    self.events = Some(link.events);
                }
                Err(e) => {
                    let reason = DisconnectReason::TransportFailed(e.to_string());
                    self.handshake_failed(reason, e).await;
                    return;
                }
            }
        }

        self.send_handshake().await;
    }

    async fn send_handshake(&mut self) {
        let id = self.ids.next_id();
        let mut message = Message::handshake(&id, self.options.handshake_ext.clone());

        let failure = match self.prepare(&mut message) {
            Prepared::Ready(text) => match self.write(text).await {
                Ok(()) => {
                    debug!(id = %id, "Handshake sent");
                    self.handshake = Some(PendingHandshake {
                        id,
                        deadline: Instant::now() + self.options.handshake_timeout,
                    });
                    return;
                }
                Err(e) => (DisconnectReason::TransportFailed(e.to_string()), e),
            },
            Prepared::Vetoed => (
                DisconnectReason::HandshakeRejected("vetoed by extension".to_string()),
                BayeuxError::Vetoed,
            ),
            Prepared::Failed(e) => (DisconnectReason::HandshakeRejected(e.to_string()), e),
        };

        self.handshake_failed(failure.0, failure.1).await;
    }

    async fn handle_handshake_timeout(&mut self) {
        if self.handshake.is_some() {
            warn!(timeout = ?self.options.handshake_timeout, "No handshake reply");
            let reason = DisconnectReason::HandshakeTimeout;
            let error = reason.to_error();
            self.handshake_failed(reason, error).await;
        }
    }

    async fn handle_handshake_reply(&mut self, reply: Message) {
        let Some(pending) = self.handshake.as_ref() else {
            debug!("Handshake reply with no handshake outstanding, dropping");
            return;
        };
        if reply.id.as_deref().is_some_and(|id| id != pending.id) {
            debug!(id = reply.id(), "Stray handshake reply, dropping");
            return;
        }
        self.handshake = None;

        if !reply.is_successful() {
            let rejected = DisconnectReason::HandshakeRejected(reply.error_reason().to_string());
            let error = rejected.to_error();
            let reason = if reply.reconnect_advice() == Some(ReconnectAdvice::None) {
                DisconnectReason::ServerAdvisedNone
            } else {
                rejected
            };
            self.handshake_failed(reason, error).await;
            return;
        }

        let Some(client_id) = MessageHandler::extract_client_id(&reply).map(str::to_string) else {
            let reason = DisconnectReason::HandshakeRejected("reply carried no clientId".to_string());
            let error = reason.to_error();
            self.handshake_failed(reason, error).await;
            return;
        };

        info!(client_id = %client_id, "Handshake successful");
        self.resuming = false;
        self.set_client_id(Some(client_id.clone()));
        self.reconnect_attempts = 0;
        self.set_state(ConnectionState::Connected);
        self.metrics.session_established();
        self.heartbeat.start();

        if let Err(e) = self.send_untracked(Message::connect(&self.ids.next_id(), &client_id)).await {
            self.link_lost(DisconnectReason::TransportFailed(e.to_string()))
                .await;
            return;
        }

        for channel in self.registry.take_replay() {
            self.send_subscribe(channel).await;
            if self.state != ConnectionState::Connected {
                return;
            }
        }

        self.delegate.connected();
    }

    async fn handshake_failed(&mut self, reason: DisconnectReason, error: BayeuxError) {
        error!(error = %error, "Handshake failed");
        let was_live = self.resuming;
        self.teardown().await;
        self.metrics.handshake_failed();
        if was_live {
            self.delegate.disconnected();
        }
        self.delegate.failed(&error);
        self.schedule_reconnect(&reason);
    }

    /// Unexpected end of a session
    async fn link_lost(&mut self, reason: DisconnectReason) {
        match self.state {
            ConnectionState::Handshaking => {
                let error = reason.to_error();
                self.handshake_failed(reason, error).await;
            }
            ConnectionState::Connected => {
                warn!(reason = ?reason, "Bayeux link lost");
                self.teardown().await;
                self.metrics.connection_lost();
                self.delegate.disconnected();
                self.schedule_reconnect(&reason);
            }
            ConnectionState::Disconnecting | ConnectionState::Disconnected => {
                self.close_link().await;
            }
        }
    }

    /// Drop the session: stop heartbeat, close socket, fail pending
    /// operations, queue the registry for replay
    async fn teardown(&mut self) {
        self.heartbeat.stop();
        self.handshake = None;
        self.resuming = false;
        self.close_link().await;
        self.set_client_id(None);
        self.set_state(ConnectionState::Disconnected);

        let drained = self.correlation.resolve_all_with_connection_lost();
        if !drained.is_empty() {
            debug!(count = drained.len(), "Failing pending operations");
        }
        for completion in drained {
            self.complete(completion);
        }
        self.registry.reset_for_replay();
    }

    async fn close_link(&mut self) {
        self.events = None;
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing transport");
            }
        }
    }

    /// Session expired on the server: fresh handshake over the same socket
    async fn rehandshake(&mut self) {
        warn!("Server requested a new handshake");
        self.heartbeat.stop();
        self.set_client_id(None);
        self.set_state(ConnectionState::Handshaking);
        self.metrics.handshake_started();
        self.resuming = true;

        for completion in self.correlation.resolve_all_with_connection_lost() {
            self.complete(completion);
        }
        self.registry.reset_for_replay();

        self.send_handshake().await;
    }

    fn schedule_reconnect(&mut self, reason: &DisconnectReason) {
        match ConnectionMonitor::should_attempt_reconnection(
            self.reconnect_attempts,
            &self.options.reconnect,
            reason,
        ) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                info!(attempt, delay = ?delay, "Scheduling reconnection");
                self.reconnect_attempts = attempt;
                self.metrics.reconnect_attempted();
                self.reconnect_at = Some(Instant::now() + delay);
            }
            ReconnectionDecision::AbortDisabled => debug!("Reconnect policy disabled"),
            ReconnectionDecision::AbortNotAllowed => {
                info!(reason = ?reason, "Not reconnecting")
            }
            ReconnectionDecision::AbortMaxAttemptsExceeded => {
                error!(
                    attempts = self.reconnect_attempts,
                    "Giving up after maximum reconnection attempts"
                );
            }
        }
    }

    // Inbound

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => debug!("Transport opened"),
            TransportEvent::Message(text) => self.handle_frame(text).await,
            TransportEvent::Error(reason) => {
                warn!(reason = %reason, "Transport error");
                if self.state != ConnectionState::Disconnected {
                    self.delegate.failed(&BayeuxError::transport(reason));
                }
            }
            TransportEvent::Closed { code, reason } => {
                info!(?code, reason = %reason, "Transport closed");
                self.link_lost(DisconnectReason::TransportClosed { code, reason })
                    .await;
            }
        }
    }

    async fn handle_frame(&mut self, text: String) {
        trace!(frame = %text, "Received frame");
        self.heartbeat.record_activity();

        let frame = codec::decode(&text);
        for failure in frame.failures {
            warn!(error = %failure.error, "Dropping undecodable message");
            self.metrics.deserialize_failed();
            self.delegate
                .deserialize_failed(&failure.payload, &failure.error);
        }

        for mut message in frame.messages {
            self.metrics.message_received();
            if self.extensions.incoming(&mut message) == PipelineOutcome::Vetoed {
                self.metrics.incoming_vetoed();
                continue;
            }
            self.dispatch(message).await;
            if self.state == ConnectionState::Disconnected {
                break;
            }
        }
    }

    async fn dispatch(&mut self, message: Message) {
        match MessageHandler::route(&message) {
            MessageRoute::HandshakeReply => self.handle_handshake_reply(message).await,
            MessageRoute::ConnectReply => self.handle_connect_reply(message).await,
            MessageRoute::SubscribeReply => self.resolve(OperationKind::Subscribe, &message),
            MessageRoute::UnsubscribeReply => self.resolve(OperationKind::Unsubscribe, &message),
            MessageRoute::PublishReply => self.resolve(OperationKind::Publish, &message),
            MessageRoute::DisconnectReply => debug!("Disconnect acknowledged"),
            MessageRoute::UnknownMeta => {
                debug!(channel = %message.channel, "Ignoring unknown meta message")
            }
            MessageRoute::ChannelEvent => self.deliver(message),
        }
    }

    fn resolve(&mut self, kind: OperationKind, reply: &Message) {
        if let Some(completion) = self.correlation.resolve(kind, reply) {
            self.complete(completion);
        }
    }

    async fn handle_connect_reply(&mut self, reply: Message) {
        if self.state != ConnectionState::Connected {
            debug!(state = ?self.state, "Connect reply outside a session, dropping");
            return;
        }

        match reply.reconnect_advice() {
            Some(ReconnectAdvice::None) => {
                warn!("Server advised reconnect none");
                self.link_lost(DisconnectReason::ServerAdvisedNone).await;
            }
            Some(ReconnectAdvice::Handshake) => self.rehandshake().await,
            Some(ReconnectAdvice::Retry) | None => {
                if !reply.is_successful() {
                    warn!(error = reply.error_reason(), "Connect rejected");
                }
            }
        }
    }

    fn deliver(&mut self, message: Message) {
        let channel = message.channel.clone();
        self.delegate.message_received(&channel, &message);
        for handler in self.registry.handlers_for(&channel) {
            handler(&channel, &message);
        }
    }

    async fn handle_heartbeat(&mut self, event: HeartbeatEvent) {
        match event {
            HeartbeatEvent::Tick => {
                let Some(client_id) = self.client_id.clone() else {
                    return;
                };
                match self.send_untracked(Message::connect(&self.ids.next_id(), &client_id)).await {
                    Ok(()) => self.metrics.heartbeat_sent(),
                    Err(e) => {
                        self.link_lost(DisconnectReason::TransportFailed(e.to_string()))
                            .await
                    }
                }
            }
            HeartbeatEvent::Stalled => {
                warn!(grace = ?self.options.heartbeat_grace, "No traffic after heartbeat");
                self.link_lost(DisconnectReason::HeartbeatStalled).await;
            }
        }
    }
}
