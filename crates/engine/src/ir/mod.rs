//! The intermediate representation that every analysis in the engine works on.
//!
//! Each function is lowered to a control-flow graph of [`BasicBlock`]s. The
//! instructions in a block read and write _values_, which are registers that
//! are only ever live inside the block that defines them. State that crosses
//! block boundaries always goes through a function local or contract storage,
//! which keeps the dataflow in each block trivially local.
//!
//! `require` and `assert` are not lowered to ordinary branches but to the
//! [`Terminator::Guard`] terminator, so that downstream passes can tell a path
//! that is _protected_ by a condition apart from ordinary control flow.

pub mod cfg;
pub mod dataflow;
pub mod interp;
pub mod lower;
pub mod types;

use aurion_errors::location::Location;
use bimap::BiMap;
use serde::Serialize;

use crate::{
    ir::types::Type,
    syntax::ast::{BinaryOp, EnvVar, ExternalKind, UnaryOp},
};

/// A register holding the result of an instruction, only valid within the
/// block that defines it.
pub type ValueId = u32;

/// The index of a local variable in [`IrFunction::locals`].
pub type LocalId = u32;

/// The index of a block in [`IrFunction::blocks`].
pub type BlockId = usize;

/// An IR node together with the source location it was lowered from.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Located<T> {
    pub node:     T,
    pub location: Location,
}

impl<T> Located<T> {
    #[must_use]
    pub fn new(node: T, location: Location) -> Self {
        Self { node, location }
    }
}

/// A whole lowered program.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct IrModule {
    pub contracts: Vec<IrContract>,
}

impl IrModule {
    /// Gets the contract with the provided `name`, if it exists.
    #[must_use]
    pub fn contract(&self, name: &str) -> Option<&IrContract> {
        self.contracts.iter().find(|c| c.name == name)
    }

    /// Iterates over every function in the module with its contract.
    pub fn functions(&self) -> impl Iterator<Item = (&IrContract, &IrFunction)> {
        self.contracts
            .iter()
            .flat_map(|contract| contract.functions.iter().map(move |f| (contract, f)))
    }

    /// Iterates over the functions that can be invoked from outside the
    /// contract, including the `init` handlers.
    pub fn entry_points(&self) -> impl Iterator<Item = (&IrContract, &IrFunction)> {
        self.functions().filter(|(_, f)| f.is_entry_point())
    }
}

/// A storage field of a contract.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IrField {
    pub name:     String,
    pub ty:       Type,
    pub slot:     u32,
    pub location: Location,
}

/// An event that a contract can emit.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IrEvent {
    pub name:   String,
    pub params: Vec<(String, Type)>,
}

/// A lowered contract.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IrContract {
    pub name:     String,
    pub fields:   Vec<IrField>,

    /// The storage layout, mapping each field name to its slot.
    pub layout:    BiMap<String, u32>,
    pub events:    Vec<IrEvent>,
    pub functions: Vec<IrFunction>,
    pub location:  Location,
}

impl IrContract {
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&IrField> {
        self.fields.iter().find(|f| f.name == name)
    }

    #[must_use]
    pub fn event(&self, name: &str) -> Option<&IrEvent> {
        self.events.iter().find(|e| e.name == name)
    }

    /// Gets the function called `name`. The `init` handler is found under the
    /// name `init`.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Gets the `init` handler of the contract, if it declares one.
    #[must_use]
    pub fn init(&self) -> Option<&IrFunction> {
        self.functions.iter().find(|f| f.kind == FunctionKind::Init)
    }

    /// Iterates over the functions that can be invoked from outside the
    /// contract.
    pub fn entry_points(&self) -> impl Iterator<Item = &IrFunction> {
        self.functions.iter().filter(|f| f.is_entry_point())
    }
}

/// How a function can be invoked.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum FunctionKind {
    /// The handler run once when the contract is deployed.
    Init,

    /// A function callable by anybody.
    Public,

    /// A function callable only from within the contract.
    Private,
}

/// A local variable slot of a function.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Local {
    pub name: String,
    pub ty:   Type,
}

/// A lowered function.
///
/// The parameters occupy the first locals of the function, in order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct IrFunction {
    pub name:       String,
    pub kind:       FunctionKind,
    pub params:     Vec<(String, Type)>,
    pub returns:    Option<Type>,
    pub decorators: Vec<String>,
    pub locals:     Vec<Local>,
    pub entry:      BlockId,
    pub blocks:     Vec<BasicBlock>,
    pub location:   Location,
}

impl IrFunction {
    /// Checks if the function can be invoked from outside the contract.
    #[must_use]
    pub fn is_entry_point(&self) -> bool {
        matches!(self.kind, FunctionKind::Init | FunctionKind::Public)
    }

    /// Checks if the function is annotated with `@name`.
    #[must_use]
    pub fn has_decorator(&self, name: &str) -> bool {
        self.decorators.iter().any(|d| d == name)
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id)
    }

    /// Iterates over every instruction in the function with its block.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, &Located<Instruction>)> {
        self.blocks
            .iter()
            .flat_map(|block| block.instructions.iter().map(move |i| (block.id, i)))
    }
}

/// A straight-line sequence of instructions ending in a terminator.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct BasicBlock {
    pub id:           BlockId,
    pub instructions: Vec<Located<Instruction>>,
    pub terminator:   Located<Terminator>,
}

impl BasicBlock {
    /// Finds the instruction defining `value` in this block.
    #[must_use]
    pub fn definition(&self, value: ValueId) -> Option<&Located<Instruction>> {
        self.instructions
            .iter()
            .find(|i| i.node.dest() == Some(value))
    }
}

/// A typed IR instruction.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Instruction {
    Const {
        dest:  ValueId,
        value: u128,
        ty:    Type,
    },
    Env {
        dest: ValueId,
        var:  EnvVar,
    },
    LoadLocal {
        dest:  ValueId,
        local: LocalId,
    },
    StoreLocal {
        local: LocalId,
        value: ValueId,
    },

    /// Reads a storage field, or the entry at `key` if the field is a map.
    LoadField {
        dest:  ValueId,
        field: String,
        key:   Option<ValueId>,
    },

    /// Writes a storage field, or the entry at `key` if the field is a map.
    StoreField {
        field: String,
        key:   Option<ValueId>,
        value: ValueId,
    },

    /// A binary operation whose operands both have type `ty`. Arithmetic wraps
    /// at the width of `ty`, and division or modulo by zero reverts.
    Binary {
        dest: ValueId,
        op:   BinaryOp,
        ty:   Type,
        lhs:  ValueId,
        rhs:  ValueId,
    },
    Unary {
        dest:    ValueId,
        op:      UnaryOp,
        operand: ValueId,
    },

    /// A call to another function of the same contract.
    Call {
        dest:     Option<ValueId>,
        function: String,
        args:     Vec<ValueId>,
    },

    /// A call out of the contract. For [`ExternalKind::Call`], `dest` holds
    /// whether the call succeeded.
    ExternalCall {
        dest:   ValueId,
        kind:   ExternalKind,
        target: ValueId,
        amount: ValueId,
    },
    Emit {
        event: String,
        args:  Vec<ValueId>,
    },
}

impl Instruction {
    /// The value defined by the instruction, if any.
    #[must_use]
    pub fn dest(&self) -> Option<ValueId> {
        match self {
            Instruction::Const { dest, .. }
            | Instruction::Env { dest, .. }
            | Instruction::LoadLocal { dest, .. }
            | Instruction::LoadField { dest, .. }
            | Instruction::Binary { dest, .. }
            | Instruction::Unary { dest, .. }
            | Instruction::ExternalCall { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::StoreLocal { .. }
            | Instruction::StoreField { .. }
            | Instruction::Emit { .. } => None,
        }
    }

    /// The values read by the instruction.
    #[must_use]
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Instruction::Const { .. } | Instruction::Env { .. } | Instruction::LoadLocal { .. } => {
                Vec::new()
            }
            Instruction::StoreLocal { value, .. } => vec![*value],
            Instruction::LoadField { key, .. } => key.iter().copied().collect(),
            Instruction::StoreField { key, value, .. } => {
                key.iter().copied().chain([*value]).collect()
            }
            Instruction::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Unary { operand, .. } => vec![*operand],
            Instruction::Call { args, .. } | Instruction::Emit { args, .. } => args.clone(),
            Instruction::ExternalCall { target, amount, .. } => vec![*target, *amount],
        }
    }

    /// Checks if the instruction writes contract storage.
    #[must_use]
    pub fn is_storage_write(&self) -> bool {
        matches!(self, Instruction::StoreField { .. })
    }
}

/// Which statement a guard was lowered from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
pub enum GuardKind {
    Require,
    Assert,
}

/// The instruction that ends a block and transfers control.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond:       ValueId,
        then_block: BlockId,
        else_block: BlockId,
    },

    /// Continues at `next` if `cond` holds, and reverts with `message`
    /// otherwise.
    Guard {
        cond:    ValueId,
        kind:    GuardKind,
        message: Option<String>,
        next:    BlockId,
    },
    Return(Option<ValueId>),
    Revert(Option<String>),
}

impl Terminator {
    /// The blocks control can continue at after this terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Guard { next, .. } => vec![*next],
            Terminator::Return(_) | Terminator::Revert(_) => Vec::new(),
        }
    }

    /// The value read by the terminator, if any.
    #[must_use]
    pub fn operand(&self) -> Option<ValueId> {
        match self {
            Terminator::Branch { cond, .. } | Terminator::Guard { cond, .. } => Some(*cond),
            Terminator::Return(value) => *value,
            Terminator::Jump(_) | Terminator::Revert(_) => None,
        }
    }
}
