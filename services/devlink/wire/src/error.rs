//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Frame text is not valid JSON
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Command could not be serialized
    #[error("command encode failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Custom command carries an empty action name
    #[error("empty action name")]
    EmptyAction,
}
