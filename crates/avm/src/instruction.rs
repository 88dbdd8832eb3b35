//! The instruction set of the abstract machine.
//!
//! Jump instructions refer to their targets by _instruction index_ within a
//! [`crate::Program`], rather than by byte offset. This keeps programs easy to
//! transform, as removing or shrinking an instruction never requires patching
//! every jump by hand. The byte offsets only exist in the encoded form.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The width of an immediate operand in bytes.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Width {
    W1,
    W2,
    W4,
    W8,
}

impl Width {
    /// The number of bytes the operand occupies when encoded.
    #[must_use]
    pub fn bytes(self) -> usize {
        match self {
            Width::W1 => 1,
            Width::W2 => 2,
            Width::W4 => 4,
            Width::W8 => 8,
        }
    }

    /// The narrowest width that can hold `value`.
    #[must_use]
    pub fn smallest_for(value: u64) -> Self {
        [Width::W1, Width::W2, Width::W4]
            .into_iter()
            .find(|w| w.fits(value))
            .unwrap_or(Width::W8)
    }

    /// Checks whether `value` can be represented in this width.
    #[must_use]
    pub fn fits(self, value: u64) -> bool {
        match self {
            Width::W1 => value <= u64::from(u8::MAX),
            Width::W2 => value <= u64::from(u16::MAX),
            Width::W4 => value <= u64::from(u32::MAX),
            Width::W8 => true,
        }
    }
}

/// A single machine instruction.
///
/// Binary operations pop the right-hand operand first and then the left-hand
/// operand, so `PUSH a; PUSH b; SUB` computes `a - b`. All arithmetic wraps at
/// 64 bits, and division or remainder by zero produces zero.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Instruction {
    Stop,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Gt,
    Eq,
    IsZero,
    And,
    Or,
    Not,
    Pop,
    Dup,
    Swap,

    /// Pushes an immediate `value`, encoded in `width` bytes.
    Push { value: u64, width: Width },

    /// Pushes the value of storage `slot`. Wide loads encode the slot in four
    /// bytes, and narrow ones in a single byte.
    SLoad { slot: u32, wide: bool },

    /// Pops a value and writes it to storage `slot`.
    SStore { slot: u32, wide: bool },

    /// Pushes the call argument with the given index, or zero if absent.
    Arg(u8),
    Caller,
    Timestamp,
    CallValue,

    /// Jumps unconditionally to the instruction at the given index.
    Jump(usize),

    /// Pops a condition and jumps to the instruction at the given index if it
    /// is non-zero.
    JumpI(usize),
    JumpDest,

    /// Pops a value and emits it as an event with the given topic.
    Emit(u8),

    /// Pops an amount and then a target, records an outgoing value transfer,
    /// and pushes `1` to signal success.
    Call,
    Return,
    Revert,
}

impl Instruction {
    /// Creates a push of `value` using the narrowest possible encoding.
    #[must_use]
    pub fn push(value: u64) -> Self {
        let width = Width::smallest_for(value);
        Self::Push { value, width }
    }

    /// Creates a storage load using the narrowest possible slot encoding.
    #[must_use]
    pub fn sload(slot: u32) -> Self {
        let wide = slot > u32::from(u8::MAX);
        Self::SLoad { slot, wide }
    }

    /// Creates a storage store using the narrowest possible slot encoding.
    #[must_use]
    pub fn sstore(slot: u32) -> Self {
        let wide = slot > u32::from(u8::MAX);
        Self::SStore { slot, wide }
    }

    /// The number of bytes this instruction occupies when encoded.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Self::Push { width, .. } => width.bytes(),
            Self::SLoad { slot, wide } | Self::SStore { slot, wide } => {
                // Slots that do not fit in a byte are always encoded wide.
                if *wide || *slot > u32::from(u8::MAX) {
                    4
                } else {
                    1
                }
            }
            Self::Arg(_) | Self::Emit(_) => 1,
            Self::Jump(_) | Self::JumpI(_) => 2,
            _ => 0,
        }
    }

    /// Checks if control never falls through to the next instruction.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stop | Self::Return | Self::Revert | Self::Jump(_))
    }

    /// Gets the index of the instruction this instruction may jump to.
    #[must_use]
    pub fn jump_target(&self) -> Option<usize> {
        match self {
            Self::Jump(target) | Self::JumpI(target) => Some(*target),
            _ => None,
        }
    }

    /// Returns a copy of this instruction with its jump target rewritten by
    /// `remap`. Instructions that do not jump are returned unchanged.
    #[must_use]
    pub fn map_target(self, remap: impl FnOnce(usize) -> usize) -> Self {
        match self {
            Self::Jump(target) => Self::Jump(remap(target)),
            Self::JumpI(target) => Self::JumpI(remap(target)),
            other => other,
        }
    }

    /// Checks if the instruction is a pure binary operation over two stack
    /// values.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Self::Add
                | Self::Sub
                | Self::Mul
                | Self::Div
                | Self::Mod
                | Self::Lt
                | Self::Gt
                | Self::Eq
                | Self::And
                | Self::Or
        )
    }

    /// Checks if the instruction is a pure unary operation over one stack
    /// value.
    #[must_use]
    pub fn is_unary(&self) -> bool {
        matches!(self, Self::IsZero | Self::Not)
    }

    /// The textual mnemonic used by the assembler.
    #[must_use]
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Self::Stop => "STOP",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Mul => "MUL",
            Self::Div => "DIV",
            Self::Mod => "MOD",
            Self::Lt => "LT",
            Self::Gt => "GT",
            Self::Eq => "EQ",
            Self::IsZero => "ISZERO",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Not => "NOT",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::Push { width, .. } => match width {
                Width::W1 => "PUSH1",
                Width::W2 => "PUSH2",
                Width::W4 => "PUSH4",
                Width::W8 => "PUSH8",
            },
            Self::SLoad { wide: false, .. } => "SLOAD1",
            Self::SLoad { wide: true, .. } => "SLOAD4",
            Self::SStore { wide: false, .. } => "SSTORE1",
            Self::SStore { wide: true, .. } => "SSTORE4",
            Self::Arg(_) => "ARG",
            Self::Caller => "CALLER",
            Self::Timestamp => "TIMESTAMP",
            Self::CallValue => "CALLVALUE",
            Self::Jump(_) => "JUMP",
            Self::JumpI(_) => "JUMPI",
            Self::JumpDest => "JUMPDEST",
            Self::Emit(_) => "EMIT",
            Self::Call => "CALL",
            Self::Return => "RETURN",
            Self::Revert => "REVERT",
        }
    }
}

/// Evaluates a pure binary instruction on its operands.
///
/// This is shared between the machine and anything that wants to fold
/// constants, so that the two can never disagree. Returns `None` if `op` is
/// not a binary instruction.
#[must_use]
pub fn eval_binary(op: Instruction, lhs: u64, rhs: u64) -> Option<u64> {
    let result = match op {
        Instruction::Add => lhs.wrapping_add(rhs),
        Instruction::Sub => lhs.wrapping_sub(rhs),
        Instruction::Mul => lhs.wrapping_mul(rhs),
        Instruction::Div => lhs.checked_div(rhs).unwrap_or(0),
        Instruction::Mod => lhs.checked_rem(rhs).unwrap_or(0),
        Instruction::Lt => u64::from(lhs < rhs),
        Instruction::Gt => u64::from(lhs > rhs),
        Instruction::Eq => u64::from(lhs == rhs),
        Instruction::And => lhs & rhs,
        Instruction::Or => lhs | rhs,
        _ => return None,
    };
    Some(result)
}

/// Evaluates a pure unary instruction on its operand, returning `None` if `op`
/// is not a unary instruction.
#[must_use]
pub fn eval_unary(op: Instruction, operand: u64) -> Option<u64> {
    match op {
        Instruction::IsZero => Some(u64::from(operand == 0)),
        Instruction::Not => Some(!operand),
        _ => None,
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.mnemonic();
        match self {
            Self::Push { value, .. } => write!(f, "{mnemonic} {value}"),
            Self::SLoad { slot, .. } | Self::SStore { slot, .. } => write!(f, "{mnemonic} {slot}"),
            Self::Arg(index) => write!(f, "{mnemonic} {index}"),
            Self::Emit(topic) => write!(f, "{mnemonic} {topic}"),
            Self::Jump(target) | Self::JumpI(target) => write!(f, "{mnemonic} L{target}"),
            _ => write!(f, "{mnemonic}"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::instruction::{eval_binary, Instruction, Width};

    #[test]
    fn picks_the_narrowest_width() {
        assert_eq!(Width::smallest_for(0), Width::W1);
        assert_eq!(Width::smallest_for(255), Width::W1);
        assert_eq!(Width::smallest_for(256), Width::W2);
        assert_eq!(Width::smallest_for(70_000), Width::W4);
        assert_eq!(Width::smallest_for(u64::MAX), Width::W8);
    }

    #[test]
    fn computes_encoded_lengths() {
        assert_eq!(Instruction::Add.encoded_len(), 1);
        assert_eq!(Instruction::push(300).encoded_len(), 3);
        assert_eq!(Instruction::SLoad { slot: 1, wide: true }.encoded_len(), 5);
        assert_eq!(Instruction::sload(1).encoded_len(), 2);
        assert_eq!(Instruction::Jump(0).encoded_len(), 3);
    }

    #[test]
    fn binary_operations_wrap_and_never_trap() {
        assert_eq!(eval_binary(Instruction::Sub, 0, 1), Some(u64::MAX));
        assert_eq!(eval_binary(Instruction::Div, 7, 0), Some(0));
        assert_eq!(eval_binary(Instruction::Mod, 7, 0), Some(0));
        assert_eq!(eval_binary(Instruction::Lt, 1, 2), Some(1));
        assert_eq!(eval_binary(Instruction::Pop, 1, 2), None);
    }
}
