//! The reference abstract machine.
//!
//! The machine defines what it means for two programs to behave the same: two
//! programs are equivalent on an input if running them produces equal
//! [`Observation`]s. Anything not captured by an observation (such as the
//! number of steps taken or the peak stack depth) is not observable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    instruction::{eval_binary, eval_unary, Instruction},
    program::Program,
};

/// The default number of instructions the machine executes before giving up.
pub const DEFAULT_FUEL: u64 = 100_000;

/// The maximum number of values on the stack.
pub const STACK_LIMIT: usize = 1024;

/// The environment a program runs in.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct MachineInput {
    pub args:      Vec<u64>,
    pub caller:    u64,
    pub timestamp: u64,
    pub value:     u64,

    /// The storage contents before execution. Absent slots read as zero.
    pub storage: BTreeMap<u32, u64>,
}

/// How an execution finished.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Outcome {
    /// Execution reached `STOP` or ran off the end of the program.
    Stopped,

    /// Execution reached `RETURN`.
    Returned,

    /// Execution reached `REVERT`.
    Reverted,

    /// The program misused the stack.
    Fault(Fault),

    /// The program did not finish within the machine's fuel.
    OutOfFuel,
}

/// The ways in which a program can misuse the stack.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Fault {
    StackUnderflow,
    StackOverflow,
}

/// An externally visible side effect of execution.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Effect {
    Event { topic: u8, value: u64 },
    Transfer { target: u64, amount: u64 },
}

/// Everything about an execution that is observable from outside the machine.
///
/// Only successful executions commit their storage writes and effects. For any
/// other outcome both are empty.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Observation {
    pub outcome:       Outcome,
    pub storage_delta: BTreeMap<u32, u64>,
    pub effects:       Vec<Effect>,
    pub return_value:  Option<u64>,
}

/// The abstract machine itself.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Machine {
    fuel: u64,
}

impl Default for Machine {
    fn default() -> Self {
        Self::new(DEFAULT_FUEL)
    }
}

impl Machine {
    /// Creates a machine that executes at most `fuel` instructions per run.
    #[must_use]
    pub fn new(fuel: u64) -> Self {
        Self { fuel }
    }

    /// Runs `program` against `input`, returning what could be observed.
    #[must_use]
    pub fn run(&self, program: &Program, input: &MachineInput) -> Observation {
        let mut state = State {
            stack:   Vec::new(),
            storage: input.storage.clone(),
            effects: Vec::new(),
        };

        let outcome = state.execute(program, input, self.fuel);
        match outcome {
            Ok((outcome, return_value)) => {
                let storage_delta = state
                    .storage
                    .iter()
                    .filter(|(slot, value)| input.storage.get(slot).copied().unwrap_or(0) != **value)
                    .map(|(slot, value)| (*slot, *value))
                    .collect();
                Observation {
                    outcome,
                    storage_delta,
                    effects: state.effects,
                    return_value,
                }
            }
            Err(outcome) => Observation {
                outcome,
                storage_delta: BTreeMap::new(),
                effects: Vec::new(),
                return_value: None,
            },
        }
    }
}

/// The mutable state of a single run.
struct State {
    stack:   Vec<u64>,
    storage: BTreeMap<u32, u64>,
    effects: Vec<Effect>,
}

impl State {
    fn pop(&mut self) -> Result<u64, Outcome> {
        self.stack.pop().ok_or(Outcome::Fault(Fault::StackUnderflow))
    }

    fn push(&mut self, value: u64) -> Result<(), Outcome> {
        if self.stack.len() >= STACK_LIMIT {
            return Err(Outcome::Fault(Fault::StackOverflow));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Executes the program, returning either a committed outcome with its
    /// return value, or an outcome whose effects must be discarded.
    fn execute(
        &mut self,
        program: &Program,
        input: &MachineInput,
        fuel: u64,
    ) -> Result<(Outcome, Option<u64>), Outcome> {
        let mut pc = 0;
        let mut steps = 0;

        while let Some(instruction) = program.instructions.get(pc) {
            if steps >= fuel {
                return Err(Outcome::OutOfFuel);
            }
            steps += 1;
            pc += 1;

            match *instruction {
                op if op.is_binary() => {
                    let rhs = self.pop()?;
                    let lhs = self.pop()?;
                    self.push(eval_binary(op, lhs, rhs).unwrap_or(0))?;
                }
                op if op.is_unary() => {
                    let operand = self.pop()?;
                    self.push(eval_unary(op, operand).unwrap_or(0))?;
                }
                Instruction::Stop => return Ok((Outcome::Stopped, None)),
                Instruction::Pop => {
                    self.pop()?;
                }
                Instruction::Dup => {
                    let top = self.pop()?;
                    self.push(top)?;
                    self.push(top)?;
                }
                Instruction::Swap => {
                    let a = self.pop()?;
                    let b = self.pop()?;
                    self.push(a)?;
                    self.push(b)?;
                }
                Instruction::Push { value, .. } => self.push(value)?,
                Instruction::SLoad { slot, .. } => {
                    let value = self.storage.get(&slot).copied().unwrap_or(0);
                    self.push(value)?;
                }
                Instruction::SStore { slot, .. } => {
                    let value = self.pop()?;
                    self.storage.insert(slot, value);
                }
                Instruction::Arg(index) => {
                    let value = input.args.get(usize::from(index)).copied().unwrap_or(0);
                    self.push(value)?;
                }
                Instruction::Caller => self.push(input.caller)?,
                Instruction::Timestamp => self.push(input.timestamp)?,
                Instruction::CallValue => self.push(input.value)?,
                Instruction::Jump(target) => pc = target,
                Instruction::JumpI(target) => {
                    if self.pop()? != 0 {
                        pc = target;
                    }
                }
                Instruction::Emit(topic) => {
                    let value = self.pop()?;
                    self.effects.push(Effect::Event { topic, value });
                }
                Instruction::Call => {
                    let amount = self.pop()?;
                    let target = self.pop()?;
                    self.effects.push(Effect::Transfer { target, amount });
                    self.push(1)?;
                }
                Instruction::Return => {
                    let value = self.pop()?;
                    return Ok((Outcome::Returned, Some(value)));
                }
                Instruction::Revert => return Err(Outcome::Reverted),
                // The only remaining instruction is the jump destination marker, as the
                // pure operations are handled by the guards above.
                _ => {}
            }
        }

        Ok((Outcome::Stopped, None))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::{
        instruction::Instruction,
        machine::{Effect, Fault, Machine, MachineInput, Outcome},
        program::Program,
    };

    #[test]
    fn commits_storage_and_effects_on_success() {
        let program = Program::new(vec![
            Instruction::Arg(0),
            Instruction::push(2),
            Instruction::Mul,
            Instruction::Dup,
            Instruction::sstore(1),
            Instruction::Emit(7),
            Instruction::push(1),
            Instruction::Return,
        ]);
        let input = MachineInput {
            args: vec![21],
            ..MachineInput::default()
        };
        let observation = Machine::default().run(&program, &input);

        assert_eq!(observation.outcome, Outcome::Returned);
        assert_eq!(observation.return_value, Some(1));
        assert_eq!(observation.storage_delta, BTreeMap::from([(1, 42)]));
        assert_eq!(observation.effects, vec![Effect::Event {
            topic: 7,
            value: 42,
        }]);
    }

    #[test]
    fn discards_writes_on_revert() {
        let program = Program::new(vec![
            Instruction::push(5),
            Instruction::sstore(0),
            Instruction::Revert,
        ]);
        let observation = Machine::default().run(&program, &MachineInput::default());

        assert_eq!(observation.outcome, Outcome::Reverted);
        assert!(observation.storage_delta.is_empty());
    }

    #[test]
    fn unchanged_slots_are_not_part_of_the_delta() {
        let program = Program::new(vec![Instruction::sload(0), Instruction::sstore(0)]);
        let input = MachineInput {
            storage: BTreeMap::from([(0, 9)]),
            ..MachineInput::default()
        };
        let observation = Machine::default().run(&program, &input);

        assert_eq!(observation.outcome, Outcome::Stopped);
        assert!(observation.storage_delta.is_empty());
    }

    #[test]
    fn reports_stack_faults_and_fuel_exhaustion() {
        let underflow = Program::new(vec![Instruction::Add]);
        assert_eq!(
            Machine::default().run(&underflow, &MachineInput::default()).outcome,
            Outcome::Fault(Fault::StackUnderflow)
        );

        let spin = Program::new(vec![Instruction::JumpDest, Instruction::Jump(0)]);
        assert_eq!(
            Machine::new(50).run(&spin, &MachineInput::default()).outcome,
            Outcome::OutOfFuel
        );
    }
}
