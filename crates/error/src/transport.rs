//! Errors produced when talking to a remote completion backend.
//!
//! These never escape the completion adapter. They exist so that transports
//! can describe their failures precisely for logging.

use thiserror::Error;

/// The result type for use in completion transports.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures to obtain completions from a remote backend.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Invalid endpoint `{_0}`")]
    InvalidEndpoint(String),

    #[error("Could not connect to `{endpoint}`: {message}")]
    Connection { endpoint: String, message: String },

    #[error("Request timed out after {_0} ms")]
    Timeout(u64),

    #[error("Backend responded with status {_0}")]
    Status(u16),

    #[error("Malformed response: {_0}")]
    MalformedResponse(String),
}
