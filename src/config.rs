//! Configuration for the WebSocket server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "ws-engine")]
#[command(author = "ws-engine authors")]
#[command(version = "0.1.0")]
#[command(about = "A WebSocket server engine", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:8080)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Number of worker threads (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Maximum payload size of a single frame in bytes
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub websocket: WebSocketSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long `stop()` waits for sessions before aborting them, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            workers: None,
            max_connections: default_max_connections(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

/// Protocol limits and timeouts
#[derive(Debug, Deserialize)]
pub struct WebSocketSection {
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    #[serde(default = "default_max_handshake_bytes")]
    pub max_handshake_bytes: usize,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default = "default_writer_poll_ms")]
    pub writer_poll_ms: u64,
}

impl Default for WebSocketSection {
    fn default() -> Self {
        Self {
            max_frame_size: default_max_frame_size(),
            max_handshake_bytes: default_max_handshake_bytes(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            writer_poll_ms: default_writer_poll_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_max_handshake_bytes() -> usize {
    8 * 1024
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_close_timeout_ms() -> u64 {
    5_000
}

fn default_writer_poll_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Per-session settings, copied into every session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebSocketConfig {
    /// Largest accepted frame payload.
    pub max_frame_size: usize,
    /// Largest accepted HTTP request head.
    pub max_handshake_bytes: usize,
    /// Time allowed to complete the upgrade handshake.
    pub handshake_timeout: Duration,
    /// Grace period for the close handshake and for each task to exit.
    pub close_timeout: Duration,
    /// How often an idle writer wakes to check on the session.
    pub writer_poll_interval: Duration,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        WebSocketSection::default().into()
    }
}

impl From<WebSocketSection> for WebSocketConfig {
    fn from(section: WebSocketSection) -> Self {
        Self {
            max_frame_size: section.max_frame_size,
            max_handshake_bytes: section.max_handshake_bytes,
            handshake_timeout: Duration::from_millis(section.handshake_timeout_ms),
            close_timeout: Duration::from_millis(section.close_timeout_ms),
            writer_poll_interval: Duration::from_millis(section.writer_poll_ms),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub workers: Option<usize>,
    pub max_connections: usize,
    pub shutdown_timeout: Duration,
    pub log_level: String,
    pub websocket: WebSocketConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default_args(), TomlConfig::default())
    }
}

impl CliArgs {
    fn default_args() -> Self {
        Self {
            config: None,
            listen: None,
            workers: None,
            max_connections: None,
            max_frame_size: None,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = match cli.config {
            Some(ref path) => Self::read_file(path)?,
            None => TomlConfig::default(),
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn read_file(path: &Path) -> Result<TomlConfig, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let mut websocket = toml_config.websocket;
        if let Some(max_frame_size) = cli.max_frame_size {
            websocket.max_frame_size = max_frame_size;
        }

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            workers: cli.workers.or(toml_config.server.workers),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            shutdown_timeout: Duration::from_millis(toml_config.server.shutdown_timeout_ms),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
            websocket: websocket.into(),
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
