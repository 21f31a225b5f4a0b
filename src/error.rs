//! # Error Types
//!
//! Custom error types for NMEA Courier using `thiserror`.

use thiserror::Error;

/// Main error type for NMEA Courier
#[derive(Debug, Error)]
pub enum CourierError {
    /// Serial device could not be opened or read
    #[error("Serial error: {0}")]
    Serial(String),

    /// Serial device reported end of stream
    #[error("Serial device closed")]
    SerialClosed,

    /// A line grew past the reassembly limit
    #[error("Line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// A line carried bytes outside ASCII
    #[error("Line of {length} bytes contains non-ASCII data")]
    NonAsciiLine { length: usize },

    /// Appending a line would exceed the bundle capacity
    #[error("Bundle overflow: {needed} bytes needed, capacity is {capacity}")]
    BundleOverflow { needed: usize, capacity: usize },

    /// Name resolution, connection or send failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Liveness endpoint answered with something other than a pong
    #[error("Unexpected liveness response: {0:?}")]
    UnexpectedPong(String),

    /// Session endpoint did not answer
    #[error("Session handshake failed: {0}")]
    Handshake(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for NMEA Courier
pub type Result<T> = std::result::Result<T, CourierError>;
