//! Common error types for SIMQ

use thiserror::Error;

/// Common result type for SIMQ operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across SIMQ crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration has the wrong shape
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed TOML configuration
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Protocol message could not be encoded or decoded
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message channel is gone (far end dropped the receiver)
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
}
