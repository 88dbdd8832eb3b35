//! The Aurlink Virtual Machine (`AVM`) bytecode format is the compact,
//! stack-based instruction encoding that the engine's optimizer consumes and
//! produces.
//!
//! The crate provides:
//!
//! - [`instruction`]: the instruction set and its operand widths.
//! - [`program`]: decoding and encoding of complete buffers.
//! - [`asm`]: a small textual assembly language for writing programs by hand.
//! - [`machine`]: the reference abstract machine that defines the observable
//!   behavior of a program.
//!
//! # Buffer Layout
//!
//! Every buffer starts with the three magic bytes `AVM` followed by a single
//! version byte. The remainder is a sequence of instructions, each a one-byte
//! opcode followed by any little-endian immediate operands. Jump targets are
//! byte offsets into the instruction stream (that is, not counting the header)
//! and must land on a `JUMPDEST`.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod asm;
pub mod instruction;
pub mod machine;
pub mod program;

pub use instruction::{Instruction, Width};
pub use machine::{Machine, MachineInput, Observation};
pub use program::Program;

/// The magic bytes at the start of every buffer.
pub const MAGIC: [u8; 3] = *b"AVM";

/// The only version of the format that this crate understands.
pub const VERSION: u8 = 1;

/// The size of the buffer header in bytes.
pub const HEADER_LEN: usize = MAGIC.len() + 1;
