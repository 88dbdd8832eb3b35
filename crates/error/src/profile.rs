//! Errors produced while loading chain profiles for simulation.

use thiserror::Error;

/// The result type for use when loading chain profiles.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures to load or validate a chain profile.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Could not parse chain profiles: {_0}")]
    Malformed(String),

    #[error("Chain profile `{name}` is invalid: {reason}")]
    Invalid { name: String, reason: String },
}
