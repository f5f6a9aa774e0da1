//! Bayeux command line client
//!
//! Listens on channels and prints each event as a JSON line, or publishes a
//! single message and waits for the server's acknowledgement.

use bayeux_client::bayeux::{BayeuxClient, ClientDelegate};
use bayeux_client::config::ClientConfig;
use bayeux_client::error::BayeuxError;
use bayeux_client::observability::init_default_logging;
use bayeux_client::protocol::Message;
use bayeux_client::ConnectionState;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, Notify};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["bayeux.toml", "config/bayeux.toml"];

/// Bayeux client over WebSocket
#[derive(Parser)]
#[command(name = "bayeux")]
#[command(about = "Bayeux/CometD client over WebSocket")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Server URL; overrides the configuration file
    #[arg(long, env = "BAYEUX_URL")]
    url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print every event as one JSON line
    Listen {
        /// Channels or wildcard patterns
        #[arg(required = true)]
        channels: Vec<String>,
    },
    /// Publish one JSON payload and wait for the acknowledgement
    Publish {
        channel: String,
        /// JSON payload
        data: String,
        /// Seconds to wait for the session and the acknowledgement
        #[arg(long, default_value_t = 10)]
        timeout: u64,
    },
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

/// Delegate that prints events and forwards outcomes to the command
struct CliDelegate {
    print_events: bool,
    published: mpsc::UnboundedSender<(String, Option<BayeuxError>)>,
    failed: Notify,
}

impl ClientDelegate for CliDelegate {
    fn connected(&self) {
        info!("Session established");
    }

    fn disconnected(&self) {
        warn!("Session ended");
    }

    fn message_received(&self, channel: &str, message: &Message) {
        if !self.print_events {
            return;
        }
        let line = serde_json::json!({
            "channel": channel,
            "data": message.data,
        });
        println!("{line}");
    }

    fn subscribed(&self, channel: &str) {
        info!(channel, "Subscribed");
    }

    fn subscribe_failed(&self, channel: &str, error: &BayeuxError) {
        error!(channel, error = %error, "Subscribe failed");
    }

    fn published(&self, id: &str, _channel: &str, error: Option<&BayeuxError>) {
        let _ = self.published.send((id.to_string(), error.cloned()));
    }

    fn deserialize_failed(&self, payload: &str, error: &BayeuxError) {
        warn!(payload, error = %error, "Dropped undecodable message");
    }

    fn failed(&self, error: &BayeuxError) {
        error!(error = %error, "Client failed");
        self.failed.notify_one();
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    let config = match load_configuration(&cli.config, cli.url.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Listen { channels } => run_listen(config, channels).await,
        Commands::Publish {
            channel,
            data,
            timeout,
        } => run_publish(config, channel, data, Duration::from_secs(timeout)).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
    url_override: Option<&str>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let path = match config_path {
        Some(path) => Some(path.clone()),
        None => DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists()),
    };

    let mut config = match (path, url_override) {
        (Some(path), _) => {
            info!("Loading configuration from: {}", path.display());
            ClientConfig::load_from_file(&path)?
        }
        (None, Some(url)) => return Ok(ClientConfig::for_url(url)?),
        (None, None) => {
            return Err(
                "No configuration file found. Provide one with -c/--config, create bayeux.toml, or pass --url"
                    .into(),
            )
        }
    };

    if let Some(url) = url_override {
        config.client.url = url.to_string();
        config.validate()?;
    }
    Ok(config)
}

fn start_client(
    config: &ClientConfig,
    print_events: bool,
) -> Result<
    (
        BayeuxClient,
        Arc<CliDelegate>,
        mpsc::UnboundedReceiver<(String, Option<BayeuxError>)>,
    ),
    Box<dyn std::error::Error>,
> {
    let (published_tx, published_rx) = mpsc::unbounded_channel();
    let delegate = Arc::new(CliDelegate {
        print_events,
        published: published_tx,
        failed: Notify::new(),
    });
    let client = BayeuxClient::new(config.options()?, delegate.clone());
    Ok((client, delegate, published_rx))
}

async fn run_listen(
    config: ClientConfig,
    channels: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (client, delegate, _published) = start_client(&config, true)?;

    for channel in &channels {
        client.subscribe(channel);
    }
    client.connect();

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(url = %config.client.url, "Listening on {} channel(s)", channels.len());

    let outcome = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            Ok(())
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            Ok(())
        }
        _ = delegate.failed.notified(), if !config.reconnect.is_enabled() => {
            Err("Session could not be established".into())
        }
    };

    shutdown(&client).await;
    outcome
}

async fn run_publish(
    config: ClientConfig,
    channel: String,
    data: String,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let payload: serde_json::Value = serde_json::from_str(&data)?;
    let (client, _delegate, mut published) = start_client(&config, false)?;

    client.connect();
    client.wait_for_state(ConnectionState::Connected, wait).await?;

    let id = client.publish(&channel, &payload);
    let outcome = timeout(wait, async {
        while let Some((acked, error)) = published.recv().await {
            if acked == id {
                return error;
            }
        }
        Some(BayeuxError::ConnectionLost)
    })
    .await;

    shutdown(&client).await;

    match outcome {
        Ok(None) => {
            info!(id = %id, channel = %channel, "Publish acknowledged");
            Ok(())
        }
        Ok(Some(error)) => Err(error.into()),
        Err(_) => Err(format!("No acknowledgement for message {id} within {wait:?}").into()),
    }
}

async fn shutdown(client: &BayeuxClient) {
    client.disconnect();
    if client
        .wait_for_state(ConnectionState::Disconnected, Duration::from_secs(5))
        .await
        .is_err()
    {
        warn!("Timed out waiting for disconnect");
    }
}

fn handle_config_command(
    config: ClientConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
