//! Errors produced when running code on one of the abstract machines.
//!
//! Note that a contract reverting is _not_ an error, but an ordinary outcome of
//! execution. These errors describe executions that could not be completed at
//! all.

use thiserror::Error;

/// The result type for use when executing code.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of an execution.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Execution ran out of fuel after {_0} steps")]
    OutOfFuel(u64),

    #[error("Call depth exceeded the limit of {_0}")]
    CallDepthExceeded(usize),

    #[error("No function named `{_0}` exists")]
    UnknownFunction(String),

    #[error("No contract named `{_0}` exists")]
    UnknownContract(String),

    #[error("`{function}` expects {expected} argument(s) but was given {found}")]
    ArityMismatch {
        function: String,
        expected: usize,
        found:    usize,
    },

    /// Emitted when the code being executed is itself malformed, such as reading
    /// a value that was never defined.
    #[error("Malformed code: {_0}")]
    Malformed(String),
}
