//! Error types for proxy operations.
//!
//! This module defines structured error types for the intercepting proxy:
//! - Server errors (binding, accept)
//! - Request errors (no extractable target)
//! - Upstream errors (connect, forwarding)

use thiserror::Error;

/// Unified error type for proxy operations.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// I/O error (socket operations).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Hyper HTTP error.
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// The inbound request does not name a destination.
    #[error("Malformed request target: {0}")]
    MalformedTarget(String),

    /// Failed to connect to upstream server.
    #[error("Failed to connect to upstream '{addr}': {message}")]
    UpstreamConnect {
        /// The address we tried to connect to.
        addr: String,
        /// Error message.
        message: String,
    },

    /// Upstream failed after the connection was established.
    #[error("Upstream '{addr}' failed: {message}")]
    UpstreamIo {
        /// The upstream address.
        addr: String,
        /// Error message.
        message: String,
    },
}

/// Result type for proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
