//! Error types for the device link.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening a transport
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Socket could not be opened
    #[error("connect failed: {0}")]
    Connect(String),

    /// Opening the socket took longer than allowed
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// Endpoint scheme needs support that is not compiled in
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),
}

/// Errors returned synchronously by link operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Endpoint failed validation
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// Rejected input
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },

    /// The link driver task is no longer running
    #[error("link driver stopped")]
    DriverStopped,
}
