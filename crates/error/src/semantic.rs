//! Errors produced while lowering a syntax tree to the IR.

use serde::Serialize;
use thiserror::Error;

use crate::location::{Location, Span};

/// A semantic error, anchored to the place in the source where it occurs.
///
/// These are fatal to the lowering of the function (or contract-level
/// declaration) in which they occur, but never to the module as a whole.
#[derive(Clone, Debug, Eq, Error, PartialEq, Serialize)]
#[error("{location}: {kind}")]
pub struct SemanticError {
    /// What went wrong.
    pub kind: SemanticErrorKind,

    /// The contract in which the error occurred.
    pub contract: String,

    /// The function in which the error occurred, if it occurred inside one.
    pub function: Option<String>,

    /// The position of the start of the offending text.
    pub location: Location,

    /// The characters that the error is about.
    pub span: Span,
}

/// The kinds of semantic error that lowering can encounter.
#[derive(Clone, Debug, Eq, Error, PartialEq, Serialize)]
pub enum SemanticErrorKind {
    #[error("Field `{_0}` is declared more than once")]
    DuplicateField(String),

    #[error("Function `{_0}` is declared more than once")]
    DuplicateFunction(String),

    #[error("Event `{_0}` is declared more than once")]
    DuplicateEvent(String),

    #[error("Contract `{_0}` is declared more than once")]
    DuplicateContract(String),

    #[error("Contract declares more than one `init` handler")]
    DuplicateInit,

    #[error("Parameter `{_0}` is declared more than once")]
    DuplicateParameter(String),

    #[error("Variable `{_0}` is already declared in this function")]
    DuplicateVariable(String),

    #[error("Unknown field `{_0}`")]
    UnknownField(String),

    #[error("Unknown function `{_0}`")]
    UnknownFunction(String),

    #[error("Unknown variable `{_0}`")]
    UnknownVariable(String),

    /// Emitted when the operands of an operation, or a value and the place it
    /// is being stored into, do not agree on their types.
    #[error("Type mismatch: expected `{expected}` but found `{found}`")]
    TypeError { expected: String, found: String },

    #[error("Operator `{operator}` cannot be applied to `{ty}`")]
    InvalidOperand { operator: String, ty: String },

    #[error("`{name}` expects {expected} argument(s) but was given {found}")]
    ArityMismatch {
        name:     String,
        expected: usize,
        found:    usize,
    },

    #[error("Field `{_0}` is not a map and cannot be indexed")]
    NotAMap(String),

    #[error("Field `{_0}` is a map and must be indexed")]
    MapNotIndexed(String),

    #[error("Literal `{literal}` does not fit in `{ty}`")]
    LiteralOutOfRange { literal: String, ty: String },

    #[error("Function `{_0}` does not return a value")]
    NoReturnValue(String),

    #[error("Function `{_0}` must return a value on every path")]
    MissingReturn(String),

    #[error("Maps can only be used as storage fields")]
    MapOutsideStorage,

    #[error("Expression cannot be used as a statement")]
    UnusedExpression,
}
