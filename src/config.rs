//! # Configuration Management
//!
//! Centralized configuration for the packet transport.
//!
//! This module provides structured configuration for the server and remote
//! roles, the frame transport, LAN discovery and logging.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Environment variables via `from_env()` (`PEERLINK_*`)
//! - Direct instantiation with defaults
//!
//! ## Defaults
//! - Heartbeats every second, eviction after five silent seconds
//! - Beacon every second on UDP 15000, discovery gives up after ten seconds
//! - zstd at level 19 with a 32767 byte packet cap

use crate::error::{ProtocolError, Result};
use crate::utils::compression::CompressionKind;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Largest uncompressed payload (type id + body) a frame may carry
pub const MAX_PACKET_SIZE: usize = 32767;

/// Largest compressed frame accepted from the wire
pub const MAX_FRAME_LEN: usize = 64 * 1024;

/// Default TCP port a server listens on
pub const DEFAULT_SERVER_PORT: u16 = 8080;

/// Default UDP port for discovery beacons
pub const DEFAULT_DISCOVERY_PORT: u16 = 15000;

/// Default service name carried in discovery beacons
pub const DEFAULT_SERVICE_NAME: &str = "peerlink";

/// Main network configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Server role configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Remote role configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Frame transport configuration
    #[serde(default)]
    pub transport: TransportConfig,

    /// LAN discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    ///
    /// Unset variables keep their defaults. A variable that is set but does
    /// not parse is reported instead of being ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("PEERLINK_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }
        if let Some(port) = env_parse::<u16>("PEERLINK_SERVER_PORT")? {
            config.server.port = port;
        }
        if let Some(max) = env_parse::<usize>("PEERLINK_MAX_CONNECTIONS")? {
            config.server.max_connections = max;
        }
        if let Some(ms) = env_parse::<u64>("PEERLINK_LIVENESS_TIMEOUT_MS")? {
            config.server.liveness_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("PEERLINK_CONNECTION_TIMEOUT_MS")? {
            config.client.connection_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse::<u64>("PEERLINK_HEARTBEAT_INTERVAL_MS")? {
            config.client.heartbeat_interval = Duration::from_millis(ms);
        }
        if let Ok(kind) = std::env::var("PEERLINK_COMPRESSION") {
            config.transport.compression = match kind.to_ascii_lowercase().as_str() {
                "lz4" => CompressionKind::Lz4,
                "zstd" => CompressionKind::Zstd,
                other => {
                    return Err(ProtocolError::ConfigError(format!(
                        "PEERLINK_COMPRESSION: unknown compression '{other}'"
                    )))
                }
            };
        }
        if let Some(limit) = env_parse::<usize>("PEERLINK_SEND_QUEUE_LIMIT")? {
            config.transport.send_queue_limit = limit;
        }
        if let Some(enabled) = env_parse::<bool>("PEERLINK_DISCOVERY_ENABLED")? {
            config.discovery.enabled = enabled;
        }
        if let Some(port) = env_parse::<u16>("PEERLINK_DISCOVERY_PORT")? {
            config.discovery.port = port;
        }
        if let Ok(name) = std::env::var("PEERLINK_SERVICE_NAME") {
            config.discovery.service_name = name;
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.discovery.validate());
        errors.extend(self.logging.validate());

        // A remote must heartbeat well inside the server's eviction window
        if self.server.liveness_timeout <= self.client.heartbeat_interval {
            errors.push(format!(
                "Liveness timeout ({}ms) must be longer than the heartbeat interval ({}ms)",
                self.server.liveness_timeout.as_millis(),
                self.client.heartbeat_interval.as_millis()
            ));
        }

        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ProtocolError::ConfigError(format!("{name}: invalid value '{raw}': {e}"))),
        Err(_) => Ok(None),
    }
}

/// Server role configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface the listener binds to
    pub bind_address: String,

    /// Port used by `ConnectTarget::Integrated` when this socket hosts no server
    pub port: u16,

    /// Maximum number of concurrent remote connections
    pub max_connections: usize,

    /// Silence after which a remote channel is evicted
    #[serde(with = "duration_serde")]
    pub liveness_timeout: Duration,

    /// How often `tick()` sweeps for silent channels
    #[serde(with = "duration_serde")]
    pub sweep_interval: Duration,

    /// Upper bound for joining I/O tasks on stop
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_SERVER_PORT,
            max_connections: 1000,
            liveness_timeout: timeout::LIVENESS_TIMEOUT,
            sweep_interval: timeout::SWEEP_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Server bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.liveness_timeout.as_millis() < 100 {
            errors.push("Liveness timeout too short (minimum: 100ms)".to_string());
        } else if self.liveness_timeout.as_secs() > 3600 {
            errors.push("Liveness timeout too long (maximum: 1 hour)".to_string());
        }

        if self.sweep_interval.as_millis() < 100 {
            errors.push("Sweep interval too short (minimum: 100ms)".to_string());
        } else if self.sweep_interval > self.liveness_timeout {
            errors.push("Sweep interval cannot be longer than the liveness timeout".to_string());
        }

        if self.shutdown_timeout.as_millis() < 100 {
            errors.push("Shutdown timeout too short (minimum: 100ms)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Remote role configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Timeout for connection attempts
    #[serde(with = "duration_serde")]
    pub connection_timeout: Duration,

    /// Interval for sending heartbeat packets to the server
    #[serde(with = "duration_serde")]
    pub heartbeat_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_timeout: timeout::DEFAULT_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.connection_timeout.as_millis() < 100 {
            errors.push("Connection timeout too short (minimum: 100ms)".to_string());
        } else if self.connection_timeout.as_secs() > 300 {
            errors.push("Connection timeout too long (maximum: 300s)".to_string());
        }

        if self.heartbeat_interval.as_millis() < 100 {
            errors.push("Heartbeat interval too short (minimum: 100ms)".to_string());
        } else if self.heartbeat_interval.as_secs() > 3600 {
            errors.push("Heartbeat interval too long (maximum: 1 hour)".to_string());
        }

        errors
    }
}

/// Frame transport configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Algorithm applied to every frame payload
    pub compression: CompressionKind,

    /// zstd level (ignored by lz4)
    pub compression_level: i32,

    /// Largest uncompressed payload (type id + body) in bytes
    pub max_packet_size: usize,

    /// Frames queued per channel before senders block; 0 means unbounded
    pub send_queue_limit: usize,

    /// Worker threads in the socket's I/O runtime
    pub io_threads: usize,

    /// Initial capacity of each channel's read buffer
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            compression: CompressionKind::Zstd,
            compression_level: 19,
            max_packet_size: MAX_PACKET_SIZE,
            send_queue_limit: 0,
            io_threads: 1,
            read_buffer_size: 8 * 1024,
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_packet_size < 4 {
            errors.push("Max packet size must leave room for the 4 byte type id".to_string());
        } else if self.max_packet_size > MAX_PACKET_SIZE {
            errors.push(format!(
                "Max packet size too large: {} bytes (maximum: {MAX_PACKET_SIZE})",
                self.max_packet_size
            ));
        }

        if self.compression == CompressionKind::Zstd
            && (self.compression_level < 1 || self.compression_level > 22)
        {
            errors.push(format!(
                "Invalid compression level: {} (valid range: 1-22)",
                self.compression_level
            ));
        }

        if self.send_queue_limit > 1_000_000 {
            errors.push(format!(
                "Send queue limit too large: {} (max recommended: 1,000,000)",
                self.send_queue_limit
            ));
        }

        if self.io_threads == 0 {
            errors.push("I/O threads must be greater than 0".to_string());
        } else if self.io_threads > 64 {
            errors.push(format!("Too many I/O threads: {} (maximum: 64)", self.io_threads));
        }

        if self.read_buffer_size < 512 {
            errors.push("Read buffer size too small (minimum: 512 bytes)".to_string());
        }

        errors
    }
}

/// LAN discovery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Whether a started server announces itself
    pub enabled: bool,

    /// Service name carried in beacons; listeners ignore other services
    pub service_name: String,

    /// UDP port beacons are sent to and listened on
    pub port: u16,

    /// Destination address for beacons
    pub broadcast_address: String,

    /// Time between beacons
    #[serde(with = "duration_serde")]
    pub interval: Duration,

    /// How long `discover()` listens before giving up
    #[serde(with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: String::from(DEFAULT_SERVICE_NAME),
            port: DEFAULT_DISCOVERY_PORT,
            broadcast_address: String::from("255.255.255.255"),
            interval: timeout::KEEPALIVE_INTERVAL,
            timeout: timeout::DISCOVERY_TIMEOUT,
        }
    }
}

impl DiscoveryConfig {
    /// Validate discovery configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.service_name.is_empty() {
            errors.push("Discovery service name cannot be empty".to_string());
        } else if self.service_name.chars().any(char::is_whitespace) {
            errors.push(format!(
                "Discovery service name cannot contain whitespace: '{}'",
                self.service_name
            ));
        }

        if self.port == 0 {
            errors.push("Discovery port cannot be 0".to_string());
        }

        if self.broadcast_address.parse::<std::net::Ipv4Addr>().is_err() {
            errors.push(format!(
                "Invalid broadcast address: '{}' (expected an IPv4 address)",
                self.broadcast_address
            ));
        }

        if self.interval.as_millis() < 100 {
            errors.push("Discovery interval too short (minimum: 100ms)".to_string());
        }

        if self.timeout.as_millis() < 100 {
            errors.push("Discovery timeout too short (minimum: 100ms)".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("peerlink"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
