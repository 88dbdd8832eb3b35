//! Errors produced by individual analysis passes.
//!
//! A failing pass never aborts its siblings. The pass manager turns each of
//! these into an advisory issue instead.

use thiserror::Error;

/// The result type for use in analysis passes.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of a single scanner or verifier pass.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    /// Emitted when a pass runs out of its step budget before completing.
    #[error("Pass `{pass}` exhausted its budget of {budget} steps")]
    BudgetExhausted { pass: String, budget: u64 },

    /// Emitted when a pass needs the data of another pass that did not produce
    /// any, usually because it failed itself.
    #[error("Pass `{pass}` is missing the results of `{dependency}`")]
    MissingDependency { pass: String, dependency: String },

    /// Emitted when code tries to construct an invalid ordering of passes.
    #[error("Invalid Pass Ordering: {_0}")]
    InvalidPassOrdering(String),

    /// Emitted when a pass panics. The message is the panic payload if it
    /// could be recovered.
    #[error("Pass `{pass}` panicked: {message}")]
    Panicked { pass: String, message: String },

    /// A generic pass failure with a string message.
    #[error("Pass `{pass}` failed: {message}")]
    Failure { pass: String, message: String },
}
