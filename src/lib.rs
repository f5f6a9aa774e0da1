//! Bayeux client over WebSocket
//!
//! An asynchronous client for the Bayeux publish/subscribe protocol (as
//! spoken by CometD servers) running over a single WebSocket.
//!
//! # Overview
//!
//! This crate provides:
//! - Protocol message types, channel rules and the JSON wire codec
//! - A WebSocket transport behind a swappable [`transport::Transport`] trait
//! - Session management: handshake, `/meta/connect` heartbeats and reconnects
//! - Subscriptions that are replayed after every new session
//! - Request/reply correlation for subscribe, unsubscribe and publish
//! - Extension hooks on every outgoing and incoming message
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use bayeux_client::bayeux::{BayeuxClient, ClientOptions, NoopDelegate};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let url = url::Url::parse("wss://example.com/cometd")?;
//! let client = BayeuxClient::new(ClientOptions::new(url), Arc::new(NoopDelegate));
//!
//! client.subscribe_with_handler("/chat/**", |channel, message| {
//!     println!("{channel}: {:?}", message.data);
//! });
//! client.connect();
//! client.publish("/chat/lobby", &serde_json::json!({"text": "hello"}));
//! # Ok(())
//! # }
//! ```

pub mod bayeux;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use bayeux::{BayeuxClient, ClientDelegate, ClientOptions, ConnectionState, ReconnectPolicy};
pub use config::{ClientConfig, ConfigError};
pub use error::{BayeuxError, BayeuxResult};
pub use protocol::Message;
