//! # Error Types
//!
//! Error handling for the packet transport.
//!
//! This module defines every error variant that can occur while encoding,
//! decoding and moving packets between peers.
//!
//! ## Error Categories
//! - **I/O Errors**: connect, bind, read and write failures. These tear down the
//!   affected connection and nothing else.
//! - **Protocol Errors**: unregistered packet types, unknown type ids, oversized
//!   or malformed frames. These point at a registration or version mismatch
//!   between peers and are always surfaced, never swallowed.
//! - **Lifecycle Errors**: using a role that is not active, or starting one twice.
//! - **Compression Errors**: compressor failures and decompression limit violations.
//!
//! ## Example Usage
//! ```rust
//! use peerlink::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn parse_port(text: &str) -> Result<u16> {
//!     text.trim()
//!         .parse()
//!         .map_err(|e| ProtocolError::ConfigError(format!("bad port {text:?}: {e}")))
//! }
//!
//! match parse_port("8080") {
//!     Ok(port) => info!(port, "Parsed port"),
//!     Err(e) => error!(error = %e, "Invalid port"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Registry-related error messages
    pub const ERR_REGISTRY_WRITE_LOCK: &str = "Failed to acquire write lock on packet registry";
    pub const ERR_REGISTRY_READ_LOCK: &str = "Failed to acquire read lock on packet registry";

    /// Frame validation errors
    pub const ERR_NEGATIVE_FRAME_LENGTH: &str = "Negative frame length";
    pub const ERR_TRUNCATED_TYPE_ID: &str = "Frame payload too short for a packet type id";
    pub const ERR_TRUNCATED_BODY: &str = "Packet body ended early";
    pub const ERR_INVALID_UTF8: &str = "String field is not valid UTF-8";

    /// Runtime errors
    pub const ERR_RUNTIME_START: &str = "Failed to start the I/O runtime";
}

/// ProtocolError is the primary error type for all transport operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Serialize error: {0}")]
    SerializeError(String),

    #[error("Deserialize error: {0}")]
    DeserializeError(String),

    #[error("Packet type '{0}' was never registered")]
    UnregisteredPacket(String),

    #[error("Unknown packet type id: {0}")]
    UnknownPacketType(u32),

    #[error("Packet type '{0}' is already registered")]
    DuplicatePacket(String),

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Remote is not connected to a server")]
    NotConnected,

    #[error("Remote is already connected")]
    AlreadyConnected,

    #[error("Server is already running")]
    AlreadyRunning,

    #[error("Outbound queue is full")]
    Backpressure,

    #[error("Compression failed")]
    CompressionFailure,

    #[error("Decompression failed")]
    DecompressionFailure,

    #[error("Timeout occurred")]
    Timeout,

    #[error("No LAN server found before the discovery deadline")]
    DiscoveryTimeout,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error means the peers disagree about the wire protocol
    /// (packet registration, framing or compression) rather than a transient fault.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            ProtocolError::UnregisteredPacket(_)
                | ProtocolError::UnknownPacketType(_)
                | ProtocolError::OversizedPacket(_)
                | ProtocolError::InvalidFrame(_)
                | ProtocolError::DecompressionFailure
                | ProtocolError::DeserializeError(_)
                | ProtocolError::Serialization(_)
        )
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
