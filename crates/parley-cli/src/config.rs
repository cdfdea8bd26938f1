//! Client configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`--config`, `parley.toml`, `~/.config/parley/parley.toml`)
//! - Environment variables (`PARLEY_USER`, `PARLEY_SERVER__WS_URL`, ...)
//! - Command line flags, applied by `main`

use anyhow::{Context, Result};
use parley_core::EngineConfig;
use parley_protocol::Encoding;
use parley_transport::WebSocketConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Files searched when no `--config` is given, first match wins.
const CONFIG_PATHS: [&str; 2] = ["parley.toml", "~/.config/parley/parley.toml"];

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Name messages are sent under.
    #[serde(default = "default_user")]
    pub user: String,

    /// Backend addresses.
    #[serde(default)]
    pub server: ServerConfig,

    /// Session tuning.
    #[serde(default)]
    pub session: SessionConfig,

    /// Passive notifications.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Metrics export.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Backend addresses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the room and history API.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Broker endpoint. `memory://` runs an offline, in-process room.
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Frame encoding on the WebSocket link.
    #[serde(default)]
    pub encoding: Encoding,
}

/// Session tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Delay between reconnect attempts in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Number of history messages loaded on entry.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: u32,

    /// WebSocket handshake timeout in milliseconds.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_ms: u64,
}

/// Passive notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// Raise notifications while away.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ring the terminal bell with each notification.
    #[serde(default = "default_true")]
    pub sound: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

fn default_user() -> String {
    "Guest".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_ws_url() -> String {
    parley_core::config::DEFAULT_ENDPOINT.to_string()
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_history_page_size() -> u32 {
    parley_core::config::DEFAULT_HISTORY_PAGE_SIZE
}

fn default_handshake_timeout() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: default_user(),
            server: ServerConfig::default(),
            session: SessionConfig::default(),
            notifications: NotificationsConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            ws_url: default_ws_url(),
            encoding: Encoding::default(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay(),
            history_page_size: default_history_page_size(),
            handshake_timeout_ms: default_handshake_timeout(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sound: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration, layering `PARLEY_*` environment variables over
    /// the file.
    ///
    /// With `explicit` set that file must exist; otherwise the default paths
    /// are searched and a missing file means defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file cannot be read or a value has the
    /// wrong type.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();

        match explicit {
            Some(path) => {
                builder = builder.add_source(config::File::from(path).required(true));
            }
            None => {
                if let Some(path) = Self::find_default() {
                    builder = builder.add_source(config::File::from(path).required(false));
                }
            }
        }

        let layered = builder
            .add_source(
                config::Environment::with_prefix("PARLEY")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to load configuration")?;

        layered
            .try_deserialize()
            .context("Invalid configuration")
    }

    fn find_default() -> Option<PathBuf> {
        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Engine settings derived from this configuration.
    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.server.ws_url.clone())
            .with_reconnect_delay(Duration::from_millis(self.session.reconnect_delay_ms))
            .with_history_page_size(self.session.history_page_size)
    }

    /// WebSocket transport settings derived from this configuration.
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            encoding: self.server.encoding,
            handshake_timeout: Duration::from_millis(self.session.handshake_timeout_ms),
            ..WebSocketConfig::default()
        }
    }
}
