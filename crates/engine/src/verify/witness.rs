//! The concrete search for counterexamples.
//!
//! When the explorer cannot prove a property for a function, the verifier
//! looks for concrete inputs that break it. Candidates are drawn from boundary
//! values: zero, one, the maximum of each type, and every constant the function
//! mentions together with its neighbours. The first candidate uses the first
//! value of every pool, the next ones vary a single input at a time, and the
//! rest combine values pseudo-randomly but deterministically.
//!
//! A candidate only counts if the interpreter, which is the ground truth for
//! the semantics of the IR, actually exhibits the violation, so every reported
//! counterexample can be replayed.

use std::collections::{BTreeSet, HashSet};

use crate::{
    ir::{
        interp::{ConcreteInputs, Environment, ExecutionOutcome, Interpreter, Storage, StorageKey},
        types::Type,
        FunctionKind,
        Instruction,
        IrContract,
        IrFunction,
    },
    syntax::ast::EnvVar,
    verify::{Bound, Counterexample, Property, VerifierLimits},
};

/// The addresses that inputs of address type are drawn from.
const ADDRESSES: [u128; 3] = [0xa11ce, 0xb0b, 0];

/// An input that the search chooses a value for.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Slot {
    Arg(usize),
    Env(EnvVar),
    Field(String),

    /// The entries of a map field at the sender and at every argument.
    Entries(String),
}

/// Searches for concrete inputs violating a property.
#[derive(Clone, Debug)]
pub struct WitnessSearch<'a> {
    contract:    &'a IrContract,
    interpreter: Interpreter<'a>,
    attempts:    usize,
}

impl<'a> WitnessSearch<'a> {
    #[must_use]
    pub fn new(contract: &'a IrContract, limits: &VerifierLimits) -> Self {
        let interpreter = Interpreter::new(contract).with_call_depth(limits.max_call_depth);
        Self {
            contract,
            interpreter,
            attempts: limits.witness_attempts,
        }
    }

    /// Looks for inputs to `function` that violate `property`.
    #[must_use]
    pub fn search(&self, function: &IrFunction, property: &Property) -> Option<Counterexample> {
        let constants = self.constants(function);
        let mut slots = function
            .params
            .iter()
            .enumerate()
            .map(|(index, (_, ty))| (Slot::Arg(index), pool(ty, &constants)))
            .collect::<Vec<_>>();
        for var in [EnvVar::Sender, EnvVar::Value, EnvVar::Timestamp] {
            slots.push((Slot::Env(var), pool(&Type::of_env(var), &constants)));
        }
        if function.kind != FunctionKind::Init {
            for field in &self.contract.fields {
                let slot = match &field.ty {
                    Type::Map(_, value) => (Slot::Entries(field.name.clone()), pool(value, &constants)),
                    ty => (Slot::Field(field.name.clone()), pool(ty, &constants)),
                };
                slots.push(slot);
            }
        }

        let singles = slots.iter().map(|(_, p)| p.len() - 1).sum::<usize>();
        (0..self.attempts).find_map(|attempt| {
            let choice = choose(attempt, singles, &slots);
            let inputs = self.inputs(&slots, &choice);
            self.violates(function, property, &inputs)
        })
    }

    /// Runs `function` on `inputs`, returning a counterexample if it violates
    /// `property`.
    fn violates(
        &self,
        function: &IrFunction,
        property: &Property,
        inputs: &ConcreteInputs,
    ) -> Option<Counterexample> {
        let read = |storage: &Storage, field: &str| {
            storage.get(&StorageKey::field(field)).copied().unwrap_or(0)
        };

        if let Property::FieldBoundedBy { field, bound } = property {
            if function.kind != FunctionKind::Init {
                let limit = self.bound(bound, &inputs.env, &inputs.storage)?;
                if read(&inputs.storage, field) > limit {
                    return None;
                }
            }
        }

        let report = self.interpreter.run(&function.name, inputs).ok()?;
        if !report.outcome.is_success() {
            return None;
        }

        let violated = match property {
            Property::FieldBoundedBy { field, bound } => {
                let limit = self.bound(bound, &inputs.env, &report.storage)?;
                read(&report.storage, field) > limit
            }
            Property::NoUnderflow { field } => report
                .stores
                .iter()
                .any(|s| s.key.field == *field && s.underflowed),
            Property::OwnerOnlyMutation { field, owner } => {
                inputs.env.sender != read(&inputs.storage, owner)
                    && report.stores.iter().any(|s| s.key.field == *field)
            }
        };

        violated.then(|| Counterexample {
            function: function.name.clone(),
            inputs:   inputs.clone(),
            trace:    report.trace,
        })
    }

    /// Evaluates `bound` against `storage`.
    fn bound(&self, bound: &Bound, env: &Environment, storage: &Storage) -> Option<u128> {
        match bound {
            Bound::Field(field) => Some(storage.get(&StorageKey::field(field)).copied().unwrap_or(0)),
            Bound::Function(function) => {
                let inputs = ConcreteInputs {
                    args: Vec::new(),
                    env: *env,
                    storage: storage.clone(),
                    calls_succeed: true,
                };
                match self.interpreter.run(function, &inputs).ok()?.outcome {
                    ExecutionOutcome::Returned(value) => value,
                    ExecutionOutcome::Reverted(_) => None,
                }
            }
        }
    }

    /// Builds the inputs that assign the `choice`th value of each pool to its
    /// slot.
    fn inputs(&self, slots: &[(Slot, Vec<u128>)], choice: &[usize]) -> ConcreteInputs {
        let mut inputs = ConcreteInputs::default();
        let value = |index: usize| slots[index].1[choice[index]];

        for (index, (slot, _)) in slots.iter().enumerate() {
            match slot {
                Slot::Arg(_) => inputs.args.push(value(index)),
                Slot::Env(var) => inputs.env.set(*var, value(index)),
                Slot::Field(_) | Slot::Entries(_) => {}
            }
        }
        inputs.env.origin = inputs.env.sender;
        inputs.env.block_number = 1;

        for (index, (slot, _)) in slots.iter().enumerate() {
            match slot {
                Slot::Field(field) => {
                    inputs.storage.insert(StorageKey::field(field), value(index));
                }
                Slot::Entries(field) => {
                    let keys = std::iter::once(inputs.env.sender).chain(inputs.args.iter().copied());
                    for key in keys.collect::<Vec<_>>() {
                        inputs.storage.insert(StorageKey::entry(field, key), value(index));
                    }
                }
                Slot::Arg(_) | Slot::Env(_) => {}
            }
        }
        inputs
    }

    /// Collects the constants mentioned by `function` and everything it calls.
    fn constants(&self, function: &IrFunction) -> Vec<u128> {
        let mut constants = BTreeSet::new();
        let mut seen = HashSet::new();
        let mut stack = vec![function];
        while let Some(function) = stack.pop() {
            if !seen.insert(&function.name) {
                continue;
            }
            for (_, instruction) in function.instructions() {
                match &instruction.node {
                    Instruction::Const { value, .. } => {
                        constants.insert(*value);
                    }
                    Instruction::Call { function, .. } => {
                        stack.extend(self.contract.function(function));
                    }
                    _ => {}
                }
            }
        }
        constants.into_iter().collect()
    }
}

/// The candidate values for an input of type `ty`, most interesting first.
fn pool(ty: &Type, constants: &[u128]) -> Vec<u128> {
    let mut values = match ty {
        Type::Address => ADDRESSES.to_vec(),
        Type::Bool => vec![0, 1],
        _ => {
            let max = ty.max_value();
            let mut values = vec![0, 1];
            for c in constants {
                values.extend([*c, c.wrapping_add(1), c.wrapping_sub(1)].map(|v| ty.wrap(v)));
            }
            values.extend([max, max - 1, max / 2]);
            values
        }
    };
    let mut seen = HashSet::new();
    values.retain(|v| seen.insert(*v));
    values
}

/// Picks the index into each pool for the `attempt`th candidate.
fn choose(attempt: usize, singles: usize, slots: &[(Slot, Vec<u128>)]) -> Vec<usize> {
    let mut choice = vec![0; slots.len()];
    if attempt == 0 {
        return choice;
    }
    if attempt <= singles {
        let mut rest = attempt - 1;
        for (index, (_, pool)) in slots.iter().enumerate() {
            if rest < pool.len() - 1 {
                choice[index] = rest + 1;
                break;
            }
            rest -= pool.len() - 1;
        }
        return choice;
    }
    for (index, (_, pool)) in slots.iter().enumerate() {
        choice[index] = usize::try_from(mix(attempt as u64, index as u64) % pool.len() as u64).unwrap_or(0);
    }
    choice
}

/// Scrambles `attempt` and `slot` into a well distributed value.
fn mix(attempt: u64, slot: u64) -> u64 {
    let mut x = attempt.wrapping_mul(0x9e37_79b9_7f4a_7c15) ^ slot.rotate_left(32);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

#[cfg(test)]
mod test {
    use crate::{
        ir::types::Type,
        verify::witness::{choose, pool, Slot},
    };

    #[test]
    fn pools_start_at_the_boundaries() {
        let values = pool(&Type::Uint(8), &[10]);
        assert_eq!(&values[..5], &[0, 1, 10, 11, 9]);
        assert!(values.contains(&255));
        assert_eq!(pool(&Type::Bool, &[10]), vec![0, 1]);
    }

    #[test]
    fn single_variations_come_first() {
        let slots = vec![
            (Slot::Arg(0), vec![0, 1, 2]),
            (Slot::Arg(1), vec![0, 1]),
        ];
        assert_eq!(choose(0, 3, &slots), vec![0, 0]);
        assert_eq!(choose(2, 3, &slots), vec![2, 0]);
        assert_eq!(choose(3, 3, &slots), vec![0, 1]);
    }
}
