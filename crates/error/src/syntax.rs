//! Diagnostics produced while tokenising and parsing Aurion source.

use serde::Serialize;
use thiserror::Error;

use crate::location::{Location, Span};

/// A single syntax problem found in a source file.
///
/// These are never fatal to a request as a whole. The parser recovers after
/// each one where it can, and callers receive every diagnostic it found.
#[derive(Clone, Debug, Eq, Error, PartialEq, Serialize)]
#[error("{location}: {message}")]
pub struct SyntaxDiagnostic {
    /// A human-readable description of the problem.
    pub message: String,

    /// The position of the start of the offending text.
    pub location: Location,

    /// The characters that the diagnostic is about.
    pub span: Span,

    /// An optional hint about what was expected instead.
    pub hint: Option<String>,
}

impl SyntaxDiagnostic {
    /// Creates a new diagnostic at `location` covering `span`.
    #[must_use]
    pub fn new(message: impl Into<String>, location: Location, span: Span) -> Self {
        let message = message.into();
        let hint = None;
        Self {
            message,
            location,
            span,
            hint,
        }
    }

    /// Attaches a hint to the diagnostic.
    #[must_use]
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}
