//! A concrete interpreter for the IR.
//!
//! The interpreter is the ground truth for the behaviour of a program. The
//! verifier replays every counterexample it finds through it, the test
//! generator uses it to find arguments that succeed, and the simulator uses it
//! to exercise each function under a chain's profile.
//!
//! Execution is transactional: if a call reverts, its storage writes, events
//! and external calls are all discarded and only its trace survives.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use aurion_errors::{
    execution::{Error, Result},
    location::Location,
};
use serde::{Serialize, Serializer};

use crate::{
    constant::{DEFAULT_CALL_DEPTH, DEFAULT_EXECUTION_FUEL},
    fuel::Fuel,
    ir::{
        types::Type,
        BlockId,
        Instruction,
        IrContract,
        IrFunction,
        IrModule,
        Located,
        Terminator,
        ValueId,
    },
    syntax::ast::{BinaryOp, EnvVar, ExternalKind, UnaryOp},
};

/// Evaluates a binary operator on operands of type `ty`.
///
/// Arithmetic wraps at the width of `ty`. Returns `None` for a division or
/// modulo by zero, which reverts.
#[must_use]
pub fn eval_binary(op: BinaryOp, ty: &Type, lhs: u128, rhs: u128) -> Option<u128> {
    let value = match op {
        BinaryOp::Add => lhs.wrapping_add(rhs),
        BinaryOp::Sub => lhs.wrapping_sub(rhs),
        BinaryOp::Mul => lhs.wrapping_mul(rhs),
        BinaryOp::Div => lhs.checked_div(rhs)?,
        BinaryOp::Mod => lhs.checked_rem(rhs)?,
        BinaryOp::Eq => u128::from(lhs == rhs),
        BinaryOp::Ne => u128::from(lhs != rhs),
        BinaryOp::Lt => u128::from(lhs < rhs),
        BinaryOp::Le => u128::from(lhs <= rhs),
        BinaryOp::Gt => u128::from(lhs > rhs),
        BinaryOp::Ge => u128::from(lhs >= rhs),
        BinaryOp::And => u128::from(lhs != 0 && rhs != 0),
        BinaryOp::Or => u128::from(lhs != 0 || rhs != 0),
    };
    Some(if op.is_arithmetic() { ty.wrap(value) } else { value })
}

/// The values the environment provides to an execution.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq, Serialize)]
pub struct Environment {
    pub sender:       u128,
    pub value:        u128,
    pub timestamp:    u128,
    pub block_number: u128,
    pub origin:       u128,
}

impl Environment {
    /// Gets the value of `var` in this environment.
    #[must_use]
    pub fn get(&self, var: EnvVar) -> u128 {
        match var {
            EnvVar::Sender => self.sender,
            EnvVar::Value => self.value,
            EnvVar::Timestamp => self.timestamp,
            EnvVar::BlockNumber => self.block_number,
            EnvVar::Origin => self.origin,
        }
    }

    /// Sets the value of `var` in this environment.
    pub fn set(&mut self, var: EnvVar, value: u128) {
        match var {
            EnvVar::Sender => self.sender = value,
            EnvVar::Value => self.value = value,
            EnvVar::Timestamp => self.timestamp = value,
            EnvVar::BlockNumber => self.block_number = value,
            EnvVar::Origin => self.origin = value,
        }
    }
}

/// A single storage location: a scalar field, or one entry of a map field.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct StorageKey {
    pub field: String,
    pub key:   Option<u128>,
}

impl StorageKey {
    #[must_use]
    pub fn field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            key:   None,
        }
    }

    #[must_use]
    pub fn entry(field: impl Into<String>, key: u128) -> Self {
        Self {
            field: field.into(),
            key:   Some(key),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key {
            Some(key) => write!(f, "{}[{key:#x}]", self.field),
            None => write!(f, "{}", self.field),
        }
    }
}

// Storage keys are used as the keys of JSON objects, so they serialize as
// strings.
impl Serialize for StorageKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// The contents of contract storage. Absent keys read as zero.
pub type Storage = BTreeMap<StorageKey, u128>;

/// Everything needed to run a function.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ConcreteInputs {
    pub args:    Vec<u128>,
    pub env:     Environment,
    pub storage: Storage,

    /// Whether calls out of the contract succeed.
    pub calls_succeed: bool,
}

impl Default for ConcreteInputs {
    fn default() -> Self {
        Self {
            args:          Vec::new(),
            env:           Environment::default(),
            storage:       Storage::new(),
            calls_succeed: true,
        }
    }
}

/// How an execution ended.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub enum ExecutionOutcome {
    Returned(Option<u128>),
    Reverted(Option<String>),
}

impl ExecutionOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Returned(_))
    }
}

/// One observable step of an execution.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TraceStep {
    pub function: String,
    pub block:    BlockId,
    pub location: Location,

    /// A description of what happened, such as `self.claimed = 0x1e`.
    pub action: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct EmittedEvent {
    pub name: String,
    pub args: Vec<u128>,
}

/// A write to storage that was committed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StoreRecord {
    pub key:   StorageKey,
    pub value: u128,

    /// Whether the stored value was derived from a subtraction that wrapped
    /// below zero.
    pub underflowed: bool,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExternalCallRecord {
    pub kind:   ExternalKind,
    pub target: u128,
    pub amount: u128,
}

/// The complete result of running a function.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ExecutionReport {
    pub outcome: ExecutionOutcome,
    pub trace:   Vec<TraceStep>,

    /// The storage after the execution, which is the initial storage if it
    /// reverted.
    pub storage: Storage,
    pub events:  Vec<EmittedEvent>,
    pub stores:  Vec<StoreRecord>,
    pub calls:   Vec<ExternalCallRecord>,
}

/// Runs the functions of a single contract.
#[derive(Clone, Debug)]
pub struct Interpreter<'a> {
    contract:   &'a IrContract,
    fuel:       u64,
    call_depth: usize,
}

impl<'a> Interpreter<'a> {
    /// Creates an interpreter for `contract` with the default limits.
    #[must_use]
    pub fn new(contract: &'a IrContract) -> Self {
        Self {
            contract,
            fuel: DEFAULT_EXECUTION_FUEL,
            call_depth: DEFAULT_CALL_DEPTH,
        }
    }

    /// Creates an interpreter for the contract called `name` in `module`.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownContract`] if no such contract exists.
    pub fn for_contract(module: &'a IrModule, name: &str) -> Result<Self> {
        let contract = module
            .contract(name)
            .ok_or_else(|| Error::UnknownContract(name.to_string()))?;
        Ok(Self::new(contract))
    }

    /// Sets the step budget of each execution.
    #[must_use]
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Sets the maximum depth of nested internal calls.
    #[must_use]
    pub fn with_call_depth(mut self, call_depth: usize) -> Self {
        self.call_depth = call_depth;
        self
    }

    /// Runs the function called `function` with `inputs`.
    ///
    /// A revert is an ordinary outcome and is reported in the result.
    ///
    /// # Errors
    ///
    /// - [`Error::UnknownFunction`] if the function does not exist.
    /// - [`Error::ArityMismatch`] if the wrong number of arguments is provided.
    /// - [`Error::OutOfFuel`] if the execution exceeds its step budget.
    /// - [`Error::CallDepthExceeded`] if internal calls nest too deeply.
    /// - [`Error::Malformed`] if the IR is malformed.
    pub fn run(&self, function: &str, inputs: &ConcreteInputs) -> Result<ExecutionReport> {
        let target = self
            .contract
            .function(function)
            .ok_or_else(|| Error::UnknownFunction(function.to_string()))?;
        if target.params.len() != inputs.args.len() {
            Err(Error::ArityMismatch {
                function: function.to_string(),
                expected: target.params.len(),
                found:    inputs.args.len(),
            })?;
        }

        let args = target
            .params
            .iter()
            .zip(&inputs.args)
            .map(|((_, ty), arg)| Val::clean(ty.wrap(*arg)))
            .collect();

        let mut execution = Execution {
            contract:      self.contract,
            fuel:          Fuel::new(self.fuel),
            max_depth:     self.call_depth,
            env:           inputs.env,
            calls_succeed: inputs.calls_succeed,
            storage:       inputs.storage.clone(),
            tainted:       HashSet::new(),
            trace:         Vec::new(),
            events:        Vec::new(),
            stores:        Vec::new(),
            calls:         Vec::new(),
        };

        let report = match execution.call(target, args, 0)? {
            Exit::Return(value) => ExecutionReport {
                outcome: ExecutionOutcome::Returned(value.map(|v| v.value)),
                trace:   execution.trace,
                storage: execution.storage,
                events:  execution.events,
                stores:  execution.stores,
                calls:   execution.calls,
            },
            Exit::Revert(reason) => ExecutionReport {
                outcome: ExecutionOutcome::Reverted(reason),
                trace:   execution.trace,
                storage: inputs.storage.clone(),
                events:  Vec::new(),
                stores:  Vec::new(),
                calls:   Vec::new(),
            },
        };
        Ok(report)
    }
}

/// A runtime value, tracking whether it derives from a subtraction that
/// wrapped below zero.
#[derive(Clone, Copy, Debug, Default)]
struct Val {
    value:       u128,
    underflowed: bool,
}

impl Val {
    fn clean(value: u128) -> Self {
        Self {
            value,
            underflowed: false,
        }
    }
}

enum Exit {
    Return(Option<Val>),
    Revert(Option<String>),
}

struct Execution<'a> {
    contract:      &'a IrContract,
    fuel:          Fuel,
    max_depth:     usize,
    env:           Environment,
    calls_succeed: bool,
    storage:       Storage,
    tainted:       HashSet<StorageKey>,
    trace:         Vec<TraceStep>,
    events:        Vec<EmittedEvent>,
    stores:        Vec<StoreRecord>,
    calls:         Vec<ExternalCallRecord>,
}

impl Execution<'_> {
    fn tick(&mut self) -> Result<()> {
        self.fuel
            .tick()
            .map_err(|out| Error::OutOfFuel(out.budget))
    }

    fn record(&mut self, function: &IrFunction, block: BlockId, location: Location, action: String) {
        self.trace.push(TraceStep {
            function: function.name.clone(),
            block,
            location,
            action,
        });
    }

    fn call(&mut self, function: &IrFunction, args: Vec<Val>, depth: usize) -> Result<Exit> {
        if depth > self.max_depth {
            Err(Error::CallDepthExceeded(self.max_depth))?;
        }

        let mut locals = vec![Val::default(); function.locals.len()];
        for (slot, arg) in locals.iter_mut().zip(args) {
            *slot = arg;
        }

        let mut block_id = function.entry;
        loop {
            let block = function.block(block_id).ok_or_else(|| {
                Error::Malformed(format!("`{}` has no block {block_id}", function.name))
            })?;

            let mut values = HashMap::new();
            for instruction in &block.instructions {
                self.tick()?;
                let frame = Frame {
                    function,
                    block: block_id,
                    depth,
                };
                if let Some(exit) = self.step(&frame, instruction, &mut values, &mut locals)? {
                    return Ok(exit);
                }
            }

            self.tick()?;
            let location = block.terminator.location;
            match &block.terminator.node {
                Terminator::Jump(target) => block_id = *target,
                Terminator::Branch {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let taken = get(&values, *cond)?.value != 0;
                    block_id = if taken { *then_block } else { *else_block };
                    self.record(function, block.id, location, format!("branch {taken}"));
                }
                Terminator::Guard {
                    cond,
                    kind,
                    message,
                    next,
                } => {
                    let holds = get(&values, *cond)?.value != 0;
                    let status = if holds { "passed" } else { "failed" };
                    self.record(function, block.id, location, format!("{kind:?} {status}").to_lowercase());
                    if !holds {
                        return Ok(Exit::Revert(message.clone()));
                    }
                    block_id = *next;
                }
                Terminator::Return(value) => {
                    let value = value.map(|v| get(&values, v)).transpose()?;
                    let action = match value {
                        Some(v) => format!("return {:#x}", v.value),
                        None => "return".to_string(),
                    };
                    self.record(function, block.id, location, action);
                    return Ok(Exit::Return(value));
                }
                Terminator::Revert(message) => {
                    self.record(function, block.id, location, "revert".to_string());
                    return Ok(Exit::Revert(message.clone()));
                }
            }
        }
    }

    /// Executes a single instruction, returning `Some` if it ends the call.
    fn step(
        &mut self,
        frame: &Frame<'_>,
        instruction: &Located<Instruction>,
        values: &mut HashMap<ValueId, Val>,
        locals: &mut [Val],
    ) -> Result<Option<Exit>> {
        let location = instruction.location;
        match &instruction.node {
            Instruction::Const { dest, value, .. } => {
                values.insert(*dest, Val::clean(*value));
            }
            Instruction::Env { dest, var } => {
                values.insert(*dest, Val::clean(self.env.get(*var)));
            }
            Instruction::LoadLocal { dest, local } => {
                let value = locals
                    .get(*local as usize)
                    .copied()
                    .ok_or_else(|| Error::Malformed(format!("local {local} does not exist")))?;
                values.insert(*dest, value);
            }
            Instruction::StoreLocal { local, value } => {
                let value = get(values, *value)?;
                let slot = locals
                    .get_mut(*local as usize)
                    .ok_or_else(|| Error::Malformed(format!("local {local} does not exist")))?;
                *slot = value;
                let name = frame
                    .function
                    .locals
                    .get(*local as usize)
                    .map_or("?", |l| l.name.as_str());
                self.record(frame.function, frame.block, location, format!("{name} = {:#x}", value.value));
            }
            Instruction::LoadField { dest, field, key } => {
                let key = self.storage_key(field, *key, values)?;
                let value = Val {
                    value:       self.storage.get(&key).copied().unwrap_or_default(),
                    underflowed: self.tainted.contains(&key),
                };
                values.insert(*dest, value);
            }
            Instruction::StoreField { field, key, value } => {
                let key = self.storage_key(field, *key, values)?;
                let value = get(values, *value)?;
                if value.underflowed {
                    self.tainted.insert(key.clone());
                } else {
                    self.tainted.remove(&key);
                }
                self.record(frame.function, frame.block, location, format!("self.{key} = {:#x}", value.value));
                self.storage.insert(key.clone(), value.value);
                self.stores.push(StoreRecord {
                    key,
                    value: value.value,
                    underflowed: value.underflowed,
                });
            }
            Instruction::Binary {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => {
                let lhs = get(values, *lhs)?;
                let rhs = get(values, *rhs)?;
                let Some(result) = eval_binary(*op, ty, lhs.value, rhs.value) else {
                    self.record(frame.function, frame.block, location, "division by zero".to_string());
                    return Ok(Some(Exit::Revert(Some("division by zero".to_string()))));
                };
                let wrapped = *op == BinaryOp::Sub && lhs.value < rhs.value;
                values.insert(*dest, Val {
                    value:       result,
                    underflowed: lhs.underflowed || rhs.underflowed || wrapped,
                });
            }
            Instruction::Unary { dest, op, operand } => {
                let operand = get(values, *operand)?;
                let value = match op {
                    UnaryOp::Not => u128::from(operand.value == 0),
                };
                values.insert(*dest, Val::clean(value));
            }
            Instruction::Call {
                dest,
                function,
                args,
            } => {
                let callee = self
                    .contract
                    .function(function)
                    .ok_or_else(|| Error::UnknownFunction(function.clone()))?;
                let args = args
                    .iter()
                    .map(|a| get(values, *a))
                    .collect::<Result<Vec<_>>>()?;
                self.record(frame.function, frame.block, location, format!("call {function}"));
                match self.call(callee, args, frame.depth + 1)? {
                    Exit::Return(value) => {
                        if let Some(dest) = dest {
                            values.insert(*dest, value.unwrap_or_default());
                        }
                    }
                    Exit::Revert(reason) => return Ok(Some(Exit::Revert(reason))),
                }
            }
            Instruction::ExternalCall {
                dest,
                kind,
                target,
                amount,
            } => {
                let target = get(values, *target)?.value;
                let amount = get(values, *amount)?.value;
                self.calls.push(ExternalCallRecord {
                    kind: *kind,
                    target,
                    amount,
                });
                let name = match kind {
                    ExternalKind::Transfer => "transfer",
                    ExternalKind::Call => "call",
                };
                self.record(
                    frame.function,
                    frame.block,
                    location,
                    format!("{name}({target:#x}, {amount:#x}) -> {}", self.calls_succeed),
                );
                if *kind == ExternalKind::Transfer && !self.calls_succeed {
                    return Ok(Some(Exit::Revert(Some("transfer failed".to_string()))));
                }
                values.insert(*dest, Val::clean(u128::from(self.calls_succeed)));
            }
            Instruction::Emit { event, args } => {
                let args = args
                    .iter()
                    .map(|a| get(values, *a).map(|v| v.value))
                    .collect::<Result<Vec<_>>>()?;
                self.record(frame.function, frame.block, location, format!("emit {event}"));
                self.events.push(EmittedEvent {
                    name: event.clone(),
                    args,
                });
            }
        }
        Ok(None)
    }

    fn storage_key(
        &self,
        field: &str,
        key: Option<ValueId>,
        values: &HashMap<ValueId, Val>,
    ) -> Result<StorageKey> {
        Ok(match key {
            Some(key) => StorageKey::entry(field, get(values, key)?.value),
            None => StorageKey::field(field),
        })
    }
}

/// Where an instruction is executing.
struct Frame<'f> {
    function: &'f IrFunction,
    block:    BlockId,
    depth:    usize,
}

fn get(values: &HashMap<ValueId, Val>, value: ValueId) -> Result<Val> {
    values
        .get(&value)
        .copied()
        .ok_or_else(|| Error::Malformed(format!("value %{value} is used before it is defined")))
}

#[cfg(test)]
mod test {
    use aurion_errors::{execution::Error, location::LineIndex};

    use crate::{
        ir::{
            interp::{ConcreteInputs, ExecutionOutcome, Interpreter, StorageKey},
            lower::lower,
            IrModule,
        },
        syntax::parse,
    };

    const BANK: &str = r#"
        contract Bank {
            owner: address
            balances: map<address, u64>
            total: u64

            event Withdrawn(who: address, amount: u64)

            init() {
                self.owner = msg.sender
            }

            deposit(amount: u64) {
                self.balances[msg.sender] += amount
                self.total = self.total + amount
            }

            withdraw(amount: u64) {
                require(self.balances[msg.sender] >= amount, "insufficient")
                self.balances[msg.sender] -= amount
                transfer(msg.sender, amount)
                emit Withdrawn(msg.sender, amount)
            }

            drain(amount: u64) {
                self.total -= amount
            }

            ratio(a: u64, b: u64) -> u64 {
                return a / b
            }

            spin() {
                while true { }
            }

            private again() {
                self.again()
            }

            recurse() {
                self.again()
            }
        }
    "#;

    fn module() -> anyhow::Result<IrModule> {
        let ast = parse(BANK).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(BANK)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn commits_storage_on_success() -> anyhow::Result<()> {
        let module = module()?;
        let interpreter = Interpreter::for_contract(&module, "Bank")?;
        let mut inputs = ConcreteInputs {
            args: vec![40],
            ..ConcreteInputs::default()
        };
        inputs.env.sender = 7;

        let report = interpreter.run("deposit", &inputs)?;
        assert_eq!(report.outcome, ExecutionOutcome::Returned(None));
        assert_eq!(report.storage.get(&StorageKey::entry("balances", 7)), Some(&40));
        assert_eq!(report.storage.get(&StorageKey::field("total")), Some(&40));

        Ok(())
    }

    #[test]
    fn rolls_back_on_revert() -> anyhow::Result<()> {
        let module = module()?;
        let interpreter = Interpreter::for_contract(&module, "Bank")?;
        let mut inputs = ConcreteInputs {
            args: vec![10],
            ..ConcreteInputs::default()
        };
        inputs.env.sender = 7;
        inputs.storage.insert(StorageKey::entry("balances", 7), 10);
        inputs.calls_succeed = false;

        let report = interpreter.run("withdraw", &inputs)?;
        assert_eq!(report.outcome, ExecutionOutcome::Reverted(Some("transfer failed".to_string())));
        assert_eq!(report.storage, inputs.storage);
        assert!(report.stores.is_empty());
        assert!(!report.trace.is_empty());

        inputs.calls_succeed = true;
        let report = interpreter.run("withdraw", &inputs)?;
        assert!(report.outcome.is_success());
        assert_eq!(report.events.len(), 1);
        assert_eq!(report.calls.len(), 1);

        Ok(())
    }

    #[test]
    fn tracks_wrapped_subtraction() -> anyhow::Result<()> {
        let module = module()?;
        let interpreter = Interpreter::for_contract(&module, "Bank")?;
        let inputs = ConcreteInputs {
            args: vec![1],
            ..ConcreteInputs::default()
        };

        let report = interpreter.run("drain", &inputs)?;
        assert_eq!(report.storage.get(&StorageKey::field("total")), Some(&u128::from(u64::MAX)));
        assert!(report.stores[0].underflowed);

        Ok(())
    }

    #[test]
    fn division_by_zero_reverts() -> anyhow::Result<()> {
        let module = module()?;
        let interpreter = Interpreter::for_contract(&module, "Bank")?;
        let inputs = ConcreteInputs {
            args: vec![1, 0],
            ..ConcreteInputs::default()
        };

        let report = interpreter.run("ratio", &inputs)?;
        assert!(matches!(report.outcome, ExecutionOutcome::Reverted(_)));

        Ok(())
    }

    #[test]
    fn enforces_budgets() -> anyhow::Result<()> {
        let module = module()?;
        let interpreter = Interpreter::for_contract(&module, "Bank")?.with_fuel(1_000);

        assert_eq!(
            interpreter.run("spin", &ConcreteInputs::default()),
            Err(Error::OutOfFuel(1_000))
        );
        assert_eq!(
            interpreter.run("recurse", &ConcreteInputs::default()),
            Err(Error::CallDepthExceeded(8))
        );
        assert!(matches!(
            interpreter.run("deposit", &ConcreteInputs::default()),
            Err(Error::ArityMismatch { .. })
        ));

        Ok(())
    }
}
