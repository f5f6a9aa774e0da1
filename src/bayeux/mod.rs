//! Bayeux protocol engine
//!
//! This module is organized into focused submodules:
//! - `connection`: Pure state types, reconnect policy and decisions
//! - `correlation`: Message id to pending operation table
//! - `subscriptions`: Subscription registry that survives reconnects
//! - `heartbeat`: `/meta/connect` timer and stall detection
//! - `extensions`: Outgoing/incoming message hooks
//! - `message_handler`: Pure routing of inbound messages
//! - `delegate`: Application callbacks
//! - `client`: Public handle and the engine task

pub mod client;
pub mod connection;
pub mod correlation;
pub mod delegate;
pub mod extensions;
pub mod heartbeat;
pub mod message_handler;
pub mod subscriptions;

pub use client::{BayeuxClient, ClientOptions, MessageIdGenerator};
pub use connection::{
    ConnectionMonitor, ConnectionState, DisconnectReason, ReconnectPolicy, ReconnectionDecision,
};
pub use correlation::{Completion, CorrelationTable, OperationKind, PendingOperation};
pub use delegate::{ClientDelegate, MessageHandlerFn, NoopDelegate};
pub use extensions::{Extension, ExtensionPipeline, LivenessCheck, PipelineOutcome, TimestampExtension};
pub use heartbeat::{HeartbeatEvent, HeartbeatScheduler};
pub use message_handler::{MessageHandler, MessageRoute};
pub use subscriptions::{
    SubscribeAction, SubscriptionRegistry, SubscriptionStatus, UnsubscribeAction,
};
