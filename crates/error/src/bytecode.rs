//! Errors produced while decoding or encoding bytecode buffers.

use thiserror::Error;

/// The result type for use when working with bytecode.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures to decode or encode a bytecode buffer.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Buffer does not start with a valid header")]
    MissingHeader,

    #[error("Unsupported bytecode version {_0}")]
    UnsupportedVersion(u8),

    #[error("Unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode { opcode: u8, offset: usize },

    #[error("Instruction at offset {_0} is truncated")]
    Truncated(usize),

    #[error("Jump at offset {offset} targets {target}, which is not a jump destination")]
    InvalidJumpTarget { offset: usize, target: usize },

    #[error("Program is too large to encode: {_0} bytes")]
    ProgramTooLarge(usize),

    #[error("Instruction {index} jumps to instruction {target}, which is not a jump destination")]
    UnknownLabel { index: usize, target: usize },

    /// Emitted when textual assembly cannot be turned into a program.
    #[error("Line {line}: {message}")]
    Assembly { line: usize, message: String },
}
