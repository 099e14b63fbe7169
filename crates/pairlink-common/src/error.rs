//! Error types for pairlink
//!
//! We use `thiserror` for structured error types that can be matched on,
//! and `anyhow` for error propagation in application code.
//!
//! Note that peers never surface these across their public API once a
//! handshake has started: failures become a [`CloseReason`] delivered to the
//! close callback. `LinkError` covers the codec, configuration, and API
//! misuse.
//!
//! [`CloseReason`]: crate::types::CloseReason

use thiserror::Error;

/// Central error type for pairlink operations
#[derive(Error, Debug)]
pub enum LinkError {
    // === Framing Errors ===
    #[error("Malformed length prefix: expected 4 bytes, got {0}")]
    MalformedLength(usize),

    #[error("Invalid frame size: {size} bytes (allowed: 1..={max})")]
    InvalidFrameSize { size: u32, max: u32 },

    #[error("Unknown frame tag: {0:#04x}")]
    UnknownTag(u8),

    // === Handshake Errors ===
    #[error("Shared secret too long: {len} bytes (max: {max})")]
    SecretTooLong { len: usize, max: usize },

    // === Peer Lifecycle ===
    #[error("Peer has already been started")]
    AlreadyStarted,

    // === I/O Errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // === Configuration ===
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // === Internal ===
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using LinkError
pub type Result<T> = std::result::Result<T, LinkError>;

impl From<config::ConfigError> for LinkError {
    fn from(err: config::ConfigError) -> Self {
        LinkError::ConfigError(err.to_string())
    }
}
