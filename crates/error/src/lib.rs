//! Error handling types and utilities for the Aurion engine.
//!
//! # Error Conventions
//!
//! As we are providing a library that editors and tooling interact with from
//! _code_ as well as from the CLI, we keep our errors strongly typed at all
//! times. While libraries like [anyhow](https://docs.rs/anyhow/latest/anyhow/)
//! are well-suited for application code, they make it more difficult than is
//! necessary to handle specific errors in library code. To that end, we make
//! sure that our errors are kept strongly typed within the library as much as
//! is possible.
//!
//! # Error Taxonomy
//!
//! - [`syntax`] errors come from the parser and are always reported as
//!   diagnostics, never as a fatal failure.
//! - [`semantic`] errors come from lowering and are fatal only to the function
//!   in which they occur.
//! - [`analysis`] errors are failures of individual scanner or verifier passes,
//!   which degrade to advisory issues.
//! - [`execution`] errors come from running code on one of the abstract
//!   machines.
//! - [`bytecode`] errors come from decoding and encoding bytecode buffers.
//! - [`transport`] errors come from talking to a remote completion backend.
//! - [`profile`] errors come from loading chain profiles.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod analysis;
pub mod bytecode;
pub mod execution;
pub mod location;
pub mod profile;
pub mod report;
pub mod semantic;
pub mod syntax;
pub mod transport;

use thiserror::Error;

/// The result type to be used at the boundaries of the library.
pub type Result<T> = std::result::Result<T, Error>;

/// The root of the error hierarchy for the engine.
///
/// All errors should be able to be implicitly converted to this error type as
/// this is the type that is used at the boundaries of the library.
#[derive(Clone, Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Analysis(#[from] analysis::Error),

    #[error(transparent)]
    Bytecode(#[from] bytecode::Error),

    #[error(transparent)]
    Execution(#[from] execution::Error),

    #[error(transparent)]
    Profile(#[from] profile::Error),

    #[error(transparent)]
    Transport(#[from] transport::Error),

    /// The source could not be parsed. The diagnostics are carried in full so
    /// that callers can render them.
    #[error("Source contained {} syntax error(s)", _0.len())]
    Syntax(Vec<syntax::SyntaxDiagnostic>),

    /// The source could not be lowered.
    #[error("Source contained {} semantic error(s)", _0.len())]
    Semantic(Vec<semantic::SemanticError>),

    #[error("An unknown error occurred: {_0}")]
    Miscellaneous(String),
}
