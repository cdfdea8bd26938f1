//! # Parley
//!
//! Terminal client for Parley chat rooms.
//!
//! ## Usage
//!
//! ```bash
//! # Join a room with settings from parley.toml
//! parley --room lobby
//!
//! # Pick the user and config file explicitly
//! parley --config ~/chat.toml --user alice --room lobby
//!
//! # Offline, against an in-process room
//! PARLEY_SERVER__WS_URL=memory://demo parley --room lobby
//! ```

mod config;
mod http;
mod metrics;
mod terminal;

use anyhow::Result;
use clap::Parser;
use parley_core::{MemoryDirectory, Room, RoomDirectory, SessionController};
use parley_protocol::{RoomId, Timestamp};
use parley_transport::{MemoryBroker, Transport, WebSocketTransport, MEMORY_SCHEME};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Room created for offline sessions.
const DEMO_ROOM: &str = "lobby";

/// Parley terminal chat client
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(about = "Join a Parley chat room from the terminal")]
#[command(version)]
struct Args {
    /// Configuration file (defaults to parley.toml or ~/.config/parley/parley.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Name to chat under
    #[arg(short, long)]
    user: Option<String>,

    /// Room to enter on startup
    #[arg(short, long)]
    room: Option<String>,
}

/// Directory and transport for the configured endpoint.
///
/// A `memory://` endpoint gets an in-process broker that echoes sends back
/// like the real server, and a directory holding the demo room plus the
/// requested one.
fn backends(
    config: &config::Config,
    room: Option<&str>,
) -> (Arc<dyn RoomDirectory>, Arc<dyn Transport>) {
    if !config.server.ws_url.starts_with(MEMORY_SCHEME) {
        let directory = http::HttpDirectory::new(config.server.api_url.clone());
        let transport = WebSocketTransport::new(config.websocket_config());
        return (Arc::new(directory), Arc::new(transport));
    }

    info!(endpoint = %config.server.ws_url, "Running offline");
    let directory = MemoryDirectory::new();
    for id in std::iter::once(DEMO_ROOM).chain(room) {
        if let Ok(id) = RoomId::parse(id) {
            let name = format!("#{id}");
            directory.add_room(Room::new(id, name, "parley", Timestamp::now()));
        }
    }
    (Arc::new(directory), Arc::new(MemoryBroker::with_chat_echo()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs on stderr keep stdout for chat output
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = config::Config::load(args.config.as_deref())?;
    if let Some(user) = args.user {
        config.user = user;
    }

    if config.metrics.enabled {
        metrics::install(config.metrics.port)?;
    }

    let (directory, transport) = backends(&config, args.room.as_deref());
    info!(
        user = %config.user,
        endpoint = %config.server.ws_url,
        transport = transport.name(),
        "Starting Parley"
    );

    let notifier = Arc::new(terminal::TerminalNotifier::new(config.notifications.sound));
    let session = SessionController::new(
        config.user.clone(),
        config.engine_config(),
        directory,
        transport,
        notifier,
    );
    session
        .attention()
        .set_permission_granted(config.notifications.enabled);

    terminal::run(session, args.room).await
}
