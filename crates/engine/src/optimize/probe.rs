//! The fixed inputs that optimizer rewrites are validated against.
//!
//! The probes are derived from the program before it is optimized, so that
//! every round is checked against the same inputs. They exercise each argument
//! and storage slot the program touches with boundary values and with every
//! immediate the program contains, so that comparisons against those
//! immediates are seen to go both ways.

use std::collections::{BTreeMap, BTreeSet};

use aurion_avm::{Instruction, Machine, MachineInput, Program};

/// The number of probes in every set, besides the all-zero input.
const PROBES: usize = 24;

/// The callers that probes run as.
const CALLERS: [u64; 2] = [0xa11ce, 0xb0b];

/// A fixed set of inputs to compare programs on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProbeSet {
    inputs: Vec<MachineInput>,
}

impl ProbeSet {
    /// Derives the probes for `program`.
    #[must_use]
    pub fn for_program(program: &Program) -> Self {
        let mut args = 0;
        let mut slots = BTreeSet::new();
        let mut values = BTreeSet::from([0, 1, 2, u64::MAX]);
        for instruction in &program.instructions {
            match *instruction {
                Instruction::Arg(index) => args = args.max(usize::from(index) + 1),
                Instruction::SLoad { slot, .. } | Instruction::SStore { slot, .. } => {
                    slots.insert(slot);
                }
                Instruction::Push { value, .. } => {
                    values.extend([value, value.wrapping_add(1), value.wrapping_sub(1)]);
                }
                _ => {}
            }
        }
        let values = values.into_iter().collect::<Vec<_>>();
        let pick = |seed: usize| values[seed % values.len()];

        let mut inputs = vec![MachineInput::default()];
        for probe in 0..PROBES {
            let storage = slots
                .iter()
                .enumerate()
                .map(|(n, slot)| (*slot, pick(probe * 5 + n * 3 + 1)))
                .collect::<BTreeMap<_, _>>();
            inputs.push(MachineInput {
                args: (0..args).map(|n| pick(probe + n * 7)).collect(),
                caller: CALLERS[probe % CALLERS.len()],
                timestamp: pick(probe * 3 + 2),
                value: pick(probe * 11 + 5),
                storage,
            });
        }
        Self { inputs }
    }

    #[must_use]
    pub fn inputs(&self) -> &[MachineInput] {
        &self.inputs
    }

    /// Runs both programs on every probe, returning the index of the first
    /// probe on which they can be told apart.
    #[must_use]
    pub fn first_difference(&self, before: &Program, after: &Program, machine: &Machine) -> Option<usize> {
        self.inputs
            .iter()
            .position(|input| machine.run(before, input) != machine.run(after, input))
    }
}

#[cfg(test)]
mod test {
    use aurion_avm::{Instruction, Machine, Program};

    use crate::optimize::probe::ProbeSet;

    #[test]
    fn probes_cover_arguments_and_slots() {
        let program = Program::new(vec![
            Instruction::Arg(1),
            Instruction::sstore(4),
            Instruction::Stop,
        ]);
        let probes = ProbeSet::for_program(&program);

        assert!(probes.inputs().iter().skip(1).all(|i| i.args.len() == 2));
        assert!(probes.inputs().iter().skip(1).all(|i| i.storage.contains_key(&4)));
    }

    #[test]
    fn notices_changed_behavior() {
        let program = Program::new(vec![Instruction::Arg(0), Instruction::push(10), Instruction::Lt, Instruction::Return]);
        let broken = Program::new(vec![Instruction::push(1), Instruction::Return]);
        let probes = ProbeSet::for_program(&program);

        assert!(probes.first_difference(&program, &broken, &Machine::default()).is_some());
        assert!(probes.first_difference(&program, &program, &Machine::default()).is_none());
    }
}
