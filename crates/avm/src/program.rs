//! Decoding and encoding of complete bytecode buffers.

use std::collections::HashMap;

use aurion_errors::bytecode::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::{
    instruction::{Instruction, Width},
    HEADER_LEN,
    MAGIC,
    VERSION,
};

/// Opcode assignments for the encoded form.
mod opcode {
    pub const STOP: u8 = 0x00;
    pub const ADD: u8 = 0x01;
    pub const SUB: u8 = 0x02;
    pub const MUL: u8 = 0x03;
    pub const DIV: u8 = 0x04;
    pub const MOD: u8 = 0x05;
    pub const LT: u8 = 0x06;
    pub const GT: u8 = 0x07;
    pub const EQ: u8 = 0x08;
    pub const ISZERO: u8 = 0x09;
    pub const AND: u8 = 0x0a;
    pub const OR: u8 = 0x0b;
    pub const NOT: u8 = 0x0c;
    pub const POP: u8 = 0x10;
    pub const DUP: u8 = 0x11;
    pub const SWAP: u8 = 0x12;
    pub const PUSH1: u8 = 0x20;
    pub const PUSH2: u8 = 0x21;
    pub const PUSH4: u8 = 0x22;
    pub const PUSH8: u8 = 0x23;
    pub const SLOAD1: u8 = 0x30;
    pub const SSTORE1: u8 = 0x31;
    pub const SLOAD4: u8 = 0x32;
    pub const SSTORE4: u8 = 0x33;
    pub const ARG: u8 = 0x40;
    pub const CALLER: u8 = 0x41;
    pub const TIMESTAMP: u8 = 0x42;
    pub const CALLVALUE: u8 = 0x43;
    pub const JUMP: u8 = 0x50;
    pub const JUMPI: u8 = 0x51;
    pub const JUMPDEST: u8 = 0x52;
    pub const EMIT: u8 = 0x60;
    pub const CALL: u8 = 0x61;
    pub const RETURN: u8 = 0x70;
    pub const REVERT: u8 = 0x71;
}

/// A decoded program: an ordered list of instructions whose jumps refer to
/// other instructions by index.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct Program {
    pub instructions: Vec<Instruction>,
}

impl Program {
    /// Wraps the provided `instructions` into a program.
    #[must_use]
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self { instructions }
    }

    /// The number of instructions in the program.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Checks if the program has no instructions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// The size of the encoded buffer, header included.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.instructions.iter().map(Instruction::encoded_len).sum::<usize>()
    }

    /// Gets the byte offset of every instruction within the instruction
    /// stream, plus one trailing entry for the end of the stream.
    #[must_use]
    pub fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.instructions.len() + 1);
        let mut offset = 0;
        for instruction in &self.instructions {
            offsets.push(offset);
            offset += instruction.encoded_len();
        }
        offsets.push(offset);
        offsets
    }

    /// Checks that every jump in the program targets a `JUMPDEST`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownLabel`] if any jump targets an instruction that is
    ///   out of range or is not a `JUMPDEST`.
    pub fn validate(&self) -> Result<()> {
        for (index, instruction) in self.instructions.iter().enumerate() {
            if let Some(target) = instruction.jump_target() {
                if self.instructions.get(target) != Some(&Instruction::JumpDest) {
                    Err(Error::UnknownLabel { index, target })?;
                }
            }
        }
        Ok(())
    }

    /// Decodes a buffer into a program.
    ///
    /// # Errors
    ///
    /// - [`Error::MissingHeader`] if the buffer does not start with the magic
    ///   bytes.
    /// - [`Error::UnsupportedVersion`] if the version byte is not
    ///   [`VERSION`].
    /// - [`Error::UnknownOpcode`] or [`Error::Truncated`] if an instruction
    ///   cannot be read.
    /// - [`Error::InvalidJumpTarget`] if a jump does not land on a
    ///   `JUMPDEST`.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || bytes[..MAGIC.len()] != MAGIC {
            Err(Error::MissingHeader)?;
        }
        let version = bytes[MAGIC.len()];
        if version != VERSION {
            Err(Error::UnsupportedVersion(version))?;
        }

        let code = &bytes[HEADER_LEN..];
        let mut reader = Reader { code, offset: 0 };
        let mut raw = Vec::new();
        let mut index_of_offset = HashMap::new();
        while !reader.is_done() {
            let offset = reader.offset;
            index_of_offset.insert(offset, raw.len());
            raw.push((offset, reader.instruction()?));
        }

        // Jumps are decoded with byte offsets in place of instruction indices, so we
        // translate them now that every instruction boundary is known.
        let instructions = raw
            .iter()
            .map(|(offset, instruction)| {
                let Some(target) = instruction.jump_target() else {
                    return Ok(*instruction);
                };
                match index_of_offset.get(&target) {
                    Some(&index) if raw[index].1 == Instruction::JumpDest => {
                        Ok(instruction.map_target(|_| index))
                    }
                    _ => Err(Error::InvalidJumpTarget {
                        offset: *offset,
                        target,
                    }),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { instructions })
    }

    /// Encodes the program into a buffer, header included.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownLabel`] if the program fails [`Self::validate`].
    /// - [`Error::ProgramTooLarge`] if a jump target does not fit in the
    ///   two-byte jump operand.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let offsets = self.offsets();
        let mut out = Vec::with_capacity(self.encoded_len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);

        for instruction in &self.instructions {
            match *instruction {
                Instruction::Stop => out.push(opcode::STOP),
                Instruction::Add => out.push(opcode::ADD),
                Instruction::Sub => out.push(opcode::SUB),
                Instruction::Mul => out.push(opcode::MUL),
                Instruction::Div => out.push(opcode::DIV),
                Instruction::Mod => out.push(opcode::MOD),
                Instruction::Lt => out.push(opcode::LT),
                Instruction::Gt => out.push(opcode::GT),
                Instruction::Eq => out.push(opcode::EQ),
                Instruction::IsZero => out.push(opcode::ISZERO),
                Instruction::And => out.push(opcode::AND),
                Instruction::Or => out.push(opcode::OR),
                Instruction::Not => out.push(opcode::NOT),
                Instruction::Pop => out.push(opcode::POP),
                Instruction::Dup => out.push(opcode::DUP),
                Instruction::Swap => out.push(opcode::SWAP),
                Instruction::Push { value, width } => {
                    let (op, len) = match width {
                        Width::W1 => (opcode::PUSH1, 1),
                        Width::W2 => (opcode::PUSH2, 2),
                        Width::W4 => (opcode::PUSH4, 4),
                        Width::W8 => (opcode::PUSH8, 8),
                    };
                    out.push(op);
                    out.extend_from_slice(&value.to_le_bytes()[..len]);
                }
                Instruction::SLoad { slot, wide } => {
                    Self::encode_slot(&mut out, slot, wide, opcode::SLOAD1, opcode::SLOAD4);
                }
                Instruction::SStore { slot, wide } => {
                    Self::encode_slot(&mut out, slot, wide, opcode::SSTORE1, opcode::SSTORE4);
                }
                Instruction::Arg(index) => out.extend_from_slice(&[opcode::ARG, index]),
                Instruction::Caller => out.push(opcode::CALLER),
                Instruction::Timestamp => out.push(opcode::TIMESTAMP),
                Instruction::CallValue => out.push(opcode::CALLVALUE),
                Instruction::Jump(target) | Instruction::JumpI(target) => {
                    let op = if matches!(instruction, Instruction::Jump(_)) {
                        opcode::JUMP
                    } else {
                        opcode::JUMPI
                    };
                    let offset = u16::try_from(offsets[target])
                        .map_err(|_| Error::ProgramTooLarge(offsets[target]))?;
                    out.push(op);
                    out.extend_from_slice(&offset.to_le_bytes());
                }
                Instruction::JumpDest => out.push(opcode::JUMPDEST),
                Instruction::Emit(topic) => out.extend_from_slice(&[opcode::EMIT, topic]),
                Instruction::Call => out.push(opcode::CALL),
                Instruction::Return => out.push(opcode::RETURN),
                Instruction::Revert => out.push(opcode::REVERT),
            }
        }

        Ok(out)
    }

    /// Writes a storage access, using the narrow opcode where the slot fits.
    ///
    /// A narrow instruction whose slot does not fit in a byte is written in the
    /// wide form instead, so the encoding is always faithful to the slot.
    fn encode_slot(out: &mut Vec<u8>, slot: u32, wide: bool, narrow_op: u8, wide_op: u8) {
        match u8::try_from(slot) {
            Ok(byte) if !wide => out.extend_from_slice(&[narrow_op, byte]),
            _ => {
                out.push(wide_op);
                out.extend_from_slice(&slot.to_le_bytes());
            }
        }
    }
}

/// A cursor over the instruction stream of a buffer.
struct Reader<'a> {
    code:   &'a [u8],
    offset: usize,
}

impl Reader<'_> {
    fn is_done(&self) -> bool {
        self.offset >= self.code.len()
    }

    /// Reads `N` immediate bytes following the opcode at `start`.
    fn immediate<const N: usize>(&mut self, start: usize) -> Result<[u8; N]> {
        let bytes = self
            .code
            .get(self.offset..self.offset + N)
            .ok_or(Error::Truncated(start))?;
        self.offset += N;
        let mut out = [0; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Reads a little-endian immediate of `len` bytes, zero-extended to 64 bits.
    fn word(&mut self, start: usize, len: usize) -> Result<u64> {
        let bytes = self
            .code
            .get(self.offset..self.offset + len)
            .ok_or(Error::Truncated(start))?;
        self.offset += len;
        let mut out = [0; 8];
        out[..len].copy_from_slice(bytes);
        Ok(u64::from_le_bytes(out))
    }

    /// Reads a single instruction. Jump targets are left as byte offsets.
    fn instruction(&mut self) -> Result<Instruction> {
        let start = self.offset;
        let op = self.code[start];
        self.offset += 1;

        let instruction = match op {
            opcode::STOP => Instruction::Stop,
            opcode::ADD => Instruction::Add,
            opcode::SUB => Instruction::Sub,
            opcode::MUL => Instruction::Mul,
            opcode::DIV => Instruction::Div,
            opcode::MOD => Instruction::Mod,
            opcode::LT => Instruction::Lt,
            opcode::GT => Instruction::Gt,
            opcode::EQ => Instruction::Eq,
            opcode::ISZERO => Instruction::IsZero,
            opcode::AND => Instruction::And,
            opcode::OR => Instruction::Or,
            opcode::NOT => Instruction::Not,
            opcode::POP => Instruction::Pop,
            opcode::DUP => Instruction::Dup,
            opcode::SWAP => Instruction::Swap,
            opcode::PUSH1 | opcode::PUSH2 | opcode::PUSH4 | opcode::PUSH8 => {
                let width = match op {
                    opcode::PUSH1 => Width::W1,
                    opcode::PUSH2 => Width::W2,
                    opcode::PUSH4 => Width::W4,
                    _ => Width::W8,
                };
                let value = self.word(start, width.bytes())?;
                Instruction::Push { value, width }
            }
            opcode::SLOAD1 => Instruction::SLoad {
                slot: u32::from(self.immediate::<1>(start)?[0]),
                wide: false,
            },
            opcode::SSTORE1 => Instruction::SStore {
                slot: u32::from(self.immediate::<1>(start)?[0]),
                wide: false,
            },
            opcode::SLOAD4 => Instruction::SLoad {
                slot: u32::from_le_bytes(self.immediate::<4>(start)?),
                wide: true,
            },
            opcode::SSTORE4 => Instruction::SStore {
                slot: u32::from_le_bytes(self.immediate::<4>(start)?),
                wide: true,
            },
            opcode::ARG => Instruction::Arg(self.immediate::<1>(start)?[0]),
            opcode::CALLER => Instruction::Caller,
            opcode::TIMESTAMP => Instruction::Timestamp,
            opcode::CALLVALUE => Instruction::CallValue,
            opcode::JUMP => Instruction::Jump(usize::from(u16::from_le_bytes(
                self.immediate::<2>(start)?,
            ))),
            opcode::JUMPI => Instruction::JumpI(usize::from(u16::from_le_bytes(
                self.immediate::<2>(start)?,
            ))),
            opcode::JUMPDEST => Instruction::JumpDest,
            opcode::EMIT => Instruction::Emit(self.immediate::<1>(start)?[0]),
            opcode::CALL => Instruction::Call,
            opcode::RETURN => Instruction::Return,
            opcode::REVERT => Instruction::Revert,
            opcode => Err(Error::UnknownOpcode {
                opcode,
                offset: start,
            })?,
        };

        Ok(instruction)
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::bytecode::Error;

    use crate::{instruction::Instruction, program::Program};

    #[test]
    fn decodes_what_it_encodes() -> anyhow::Result<()> {
        let program = Program::new(vec![
            Instruction::Arg(0),
            Instruction::JumpI(4),
            Instruction::push(70_000),
            Instruction::Return,
            Instruction::JumpDest,
            Instruction::SLoad { slot: 3, wide: true },
            Instruction::sstore(1),
            Instruction::Stop,
        ]);
        let bytes = program.encode()?;
        assert_eq!(bytes.len(), program.encoded_len());
        assert_eq!(Program::decode(&bytes)?, program);

        Ok(())
    }

    #[test]
    fn rejects_buffers_without_header() {
        assert_eq!(Program::decode(b"EVM\x01"), Err(Error::MissingHeader));
        assert_eq!(Program::decode(b"AV"), Err(Error::MissingHeader));
        assert_eq!(Program::decode(b"AVM\x07"), Err(Error::UnsupportedVersion(7)));
    }

    #[test]
    fn rejects_truncated_and_unknown_instructions() {
        assert_eq!(Program::decode(b"AVM\x01\x23\x01"), Err(Error::Truncated(0)));
        assert_eq!(
            Program::decode(b"AVM\x01\x01\xff"),
            Err(Error::UnknownOpcode {
                opcode: 0xff,
                offset: 1,
            })
        );
    }

    #[test]
    fn rejects_jumps_into_the_middle_of_nowhere() {
        // JUMP 1 lands inside its own operand.
        assert_eq!(
            Program::decode(b"AVM\x01\x50\x01\x00"),
            Err(Error::InvalidJumpTarget {
                offset: 0,
                target: 1,
            })
        );
    }

    #[test]
    fn empty_programs_are_valid() -> anyhow::Result<()> {
        let program = Program::decode(b"AVM\x01")?;
        assert!(program.is_empty());
        assert_eq!(program.encode()?, b"AVM\x01".to_vec());

        Ok(())
    }
}
