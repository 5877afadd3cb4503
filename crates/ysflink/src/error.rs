//! Error types for the YSF suite.

use std::io;

/// Result type for YSF operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway, reflector or parrot.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error from socket or file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON error from the hosts file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A hostname could not be resolved to a usable address.
    #[error("cannot resolve address: {host}")]
    Resolve {
        /// The host that failed to resolve.
        host: String,
    },

    /// A network link is not in a state where the operation makes sense.
    #[error("link is not open")]
    NotOpen,

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid value for a configuration key.
    #[error("invalid value for {key}: {value}")]
    ConfigValue {
        /// The offending key.
        key: String,
        /// The rejected value.
        value: String,
    },

    /// Hosts file was structurally invalid.
    #[error("invalid hosts file: {0}")]
    Hosts(String),
}

impl Error {
    /// Create a resolution error for a host.
    pub fn resolve(host: impl Into<String>) -> Self {
        Self::Resolve { host: host.into() }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
