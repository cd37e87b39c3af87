//! Configuration module for the sync worker.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Wire protocol served by the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolType {
    #[default]
    Ping,
    Echo,
}

/// Command-line arguments for the worker
#[derive(Parser, Debug)]
#[command(name = "sync-worker")]
#[command(author = "sync-worker authors")]
#[command(version = "0.1.0")]
#[command(about = "A synchronous one-connection-at-a-time network worker", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:10826)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Protocol to serve
    #[arg(short = 'p', long, value_enum)]
    pub protocol: Option<ProtocolType>,

    /// Per-connection buffer limit in bytes
    #[arg(short = 'b', long)]
    pub max_buffer_size: Option<usize>,

    /// Seconds between stats snapshots
    #[arg(long)]
    pub stat_refresh_seconds: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Protocol to serve
    #[serde(default)]
    pub protocol: ProtocolType,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            protocol: ProtocolType::default(),
        }
    }
}

/// Worker loop configuration
#[derive(Debug, Deserialize)]
pub struct WorkerConfig {
    /// Buffered bytes allowed per connection
    #[serde(default = "default_max_buffer_size")]
    pub max_buffer_size: usize,
    /// Size hint for each socket read
    #[serde(default = "default_read_chunk")]
    pub read_chunk: usize,
    /// Seconds between stats snapshots
    #[serde(default = "default_stat_refresh_seconds")]
    pub stat_refresh_seconds: u64,
    /// Idle wait bound in milliseconds
    #[serde(default = "default_cron_interval_ms")]
    pub cron_interval_ms: u64,
    /// Per-wait bound for slow reads/writes inside a session
    #[serde(default = "default_io_wait_ms")]
    pub io_wait_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: default_max_buffer_size(),
            read_chunk: default_read_chunk(),
            stat_refresh_seconds: default_stat_refresh_seconds(),
            cron_interval_ms: default_cron_interval_ms(),
            io_wait_ms: default_io_wait_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "127.0.0.1:10826".to_string()
}

fn default_max_buffer_size() -> usize {
    4 * 1024 * 1024 // 4 MB
}

fn default_read_chunk() -> usize {
    16 * 1024
}

fn default_stat_refresh_seconds() -> u64 {
    10
}

fn default_cron_interval_ms() -> u64 {
    1000
}

fn default_io_wait_ms() -> u64 {
    100
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub protocol: ProtocolType,
    pub max_buffer_size: usize,
    pub read_chunk: usize,
    pub stat_refresh_seconds: u64,
    pub cron_interval_ms: u64,
    pub io_wait_ms: u64,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge parsed CLI args with the TOML file they point at, if any.
    /// CLI arguments take precedence over TOML file values.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            protocol: cli.protocol.unwrap_or(toml_config.server.protocol),
            max_buffer_size: cli
                .max_buffer_size
                .unwrap_or(toml_config.worker.max_buffer_size),
            read_chunk: toml_config.worker.read_chunk,
            stat_refresh_seconds: cli
                .stat_refresh_seconds
                .unwrap_or(toml_config.worker.stat_refresh_seconds),
            cron_interval_ms: toml_config.worker.cron_interval_ms,
            io_wait_ms: toml_config.worker.io_wait_ms,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.read_chunk == 0 {
            return Err(ConfigError::Invalid("read_chunk must be greater than 0"));
        }
        if self.max_buffer_size == 0 {
            return Err(ConfigError::Invalid("max_buffer_size must be greater than 0"));
        }
        if self.cron_interval_ms == 0 {
            return Err(ConfigError::Invalid("cron_interval_ms must be greater than 0"));
        }
        Ok(())
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
