//! The bytecode optimizer, which shrinks AVM buffers without changing what
//! they observably do.
//!
//! # Transformations
//!
//! A [`Transformation`] is a self-contained rewrite of a decoded [`Program`].
//! The optimizer runs its transformations in a fixed order:
//!
//! 1. [`dce::DeadCodeElimination`] removes code that can never run or whose
//!    result is discarded.
//! 2. [`fold::ConstantFolding`] evaluates operations on immediates ahead of
//!    time.
//! 3. [`pack::SlotPacking`] narrows storage slot and immediate encodings.
//! 4. [`loads::RedundantLoads`] forwards stored values to the loads that
//!    follow them and reuses repeated loads.
//!
//! The sequence repeats until a round changes nothing, or until the limit on
//! rounds is reached. Running the optimizer on its own output is therefore a
//! no-op as long as the limit was not hit.
//!
//! # Validation
//!
//! Transformations are written to be correct, but are not trusted to be. Every
//! rewrite is checked by running both programs on the reference machine over a
//! fixed [`probe::ProbeSet`], and is discarded if any probe observes a
//! difference, if the program grows, or if it no longer encodes.

pub mod dce;
pub mod fold;
pub mod loads;
pub mod pack;
pub mod probe;

use std::{collections::BTreeMap, fmt::Debug};

use aurion_avm::{Instruction, Machine, Program};
use serde::{Deserialize, Serialize};

use crate::{
    constant::{DEFAULT_OPTIMIZER_ROUNDS, DEFAULT_PROBE_FUEL},
    optimize::probe::ProbeSet,
};

/// A rewrite of a program.
pub type Rewrite = (Program, Vec<String>);

/// A single transformation of the optimization pipeline.
pub trait Transformation: Debug + Send + Sync {
    /// The name of the transformation, used to attribute its notes.
    fn name(&self) -> &'static str;

    /// Rewrites `program`, returning the new program with a description of
    /// each change, or `None` if there was nothing to do.
    fn apply(&self, program: &Program) -> Option<Rewrite>;
}

/// The resource limits of the optimizer.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct OptimizerLimits {
    /// The number of times the whole pipeline may run.
    pub max_rounds: usize,

    /// The number of instructions the machine may execute per probe.
    pub probe_fuel: u64,
}

impl Default for OptimizerLimits {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_OPTIMIZER_ROUNDS,
            probe_fuel: DEFAULT_PROBE_FUEL,
        }
    }
}

/// The outcome of optimizing a buffer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct OptimizationResult {
    /// The size of the input buffer in bytes.
    pub original_size: usize,

    /// The size of [`Self::bytes`].
    pub optimized_size: usize,

    /// A description of every change that was made, in order.
    pub notes: Vec<String>,

    /// The optimized buffer.
    pub bytes: Vec<u8>,
}

impl OptimizationResult {
    /// A result that leaves `bytes` as they are.
    #[must_use]
    pub fn unchanged(bytes: &[u8]) -> Self {
        Self {
            original_size:  bytes.len(),
            optimized_size: bytes.len(),
            notes:          Vec::new(),
            bytes:          bytes.to_vec(),
        }
    }

    /// The number of bytes saved.
    #[must_use]
    pub fn savings(&self) -> usize {
        self.original_size.saturating_sub(self.optimized_size)
    }
}

/// Optimizes AVM buffers.
#[derive(Debug)]
pub struct Optimizer {
    limits:          OptimizerLimits,
    transformations: Vec<Box<dyn Transformation>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(OptimizerLimits::default())
    }
}

impl Optimizer {
    /// Creates an optimizer running the [`default_transformations`].
    #[must_use]
    pub fn new(limits: OptimizerLimits) -> Self {
        Self::with_transformations(default_transformations(), limits)
    }

    /// Creates an optimizer running the provided `transformations` in order.
    #[must_use]
    pub fn with_transformations(
        transformations: Vec<Box<dyn Transformation>>,
        limits: OptimizerLimits,
    ) -> Self {
        Self {
            limits,
            transformations,
        }
    }

    /// Optimizes `bytes`.
    ///
    /// A buffer that does not decode is returned unchanged, with no notes.
    #[must_use]
    pub fn optimize(&self, bytes: &[u8]) -> OptimizationResult {
        let _span = tracing::debug_span!("optimize", size = bytes.len()).entered();
        let mut program = match Program::decode(bytes) {
            Ok(program) => program,
            Err(error) => {
                tracing::warn!(%error, "buffer is not valid bytecode, leaving it unchanged");
                return OptimizationResult::unchanged(bytes);
            }
        };

        let machine = Machine::new(self.limits.probe_fuel);
        let probes = ProbeSet::for_program(&program);
        let mut notes = Vec::new();

        for round in 0..self.limits.max_rounds {
            let mut changed = false;
            for transformation in &self.transformations {
                let Some((candidate, changes)) = transformation.apply(&program) else {
                    continue;
                };
                if let Err(reason) = accept(&program, &candidate, &probes, &machine) {
                    tracing::debug!(
                        transformation = transformation.name(),
                        %reason,
                        "rejected rewrite"
                    );
                    continue;
                }
                tracing::debug!(transformation = transformation.name(), round, "applied rewrite");
                notes.extend(
                    changes
                        .into_iter()
                        .map(|change| format!("{}: {change}", transformation.name())),
                );
                program = candidate;
                changed = true;
            }
            if !changed {
                break;
            }
        }

        if notes.is_empty() {
            return OptimizationResult::unchanged(bytes);
        }
        match program.encode() {
            Ok(optimized) => OptimizationResult {
                original_size: bytes.len(),
                optimized_size: optimized.len(),
                notes,
                bytes: optimized,
            },
            Err(error) => {
                tracing::warn!(%error, "optimized program failed to encode");
                OptimizationResult::unchanged(bytes)
            }
        }
    }
}

/// Optimizes `bytes` with the default limits.
#[must_use]
pub fn optimize(bytes: &[u8]) -> OptimizationResult {
    Optimizer::default().optimize(bytes)
}

/// The transformations that the optimizer runs by default, in order.
#[must_use]
pub fn default_transformations() -> Vec<Box<dyn Transformation>> {
    vec![
        Box::new(dce::DeadCodeElimination),
        Box::new(fold::ConstantFolding),
        Box::new(pack::SlotPacking),
        Box::new(loads::RedundantLoads),
    ]
}

/// Checks whether `candidate` may replace `program`.
fn accept(
    program: &Program,
    candidate: &Program,
    probes: &ProbeSet,
    machine: &Machine,
) -> Result<(), String> {
    candidate.validate().map_err(|e| e.to_string())?;
    if candidate.encoded_len() > program.encoded_len() {
        return Err(format!(
            "the program grew from {} to {} bytes",
            program.encoded_len(),
            candidate.encoded_len()
        ));
    }
    if candidate == program {
        return Err("the program did not change".to_string());
    }
    match probes.first_difference(program, candidate, machine) {
        Some(index) => Err(format!("probe {index} observed a difference")),
        None => Ok(()),
    }
}

/// Replaces instructions of `program` by index, keeping jumps pointed at the
/// same instructions.
///
/// Every index in `edits` is replaced by the instructions it maps to, which
/// may be none. Jump targets, both in kept and in inserted instructions, are
/// given as indices into the original program. Instructions that are jumped
/// to must not be removed.
#[must_use]
pub fn splice(program: &Program, edits: &BTreeMap<usize, Vec<Instruction>>) -> Program {
    let mut position = Vec::with_capacity(program.len() + 1);
    let mut emitted = Vec::with_capacity(program.len());
    for (index, instruction) in program.instructions.iter().enumerate() {
        position.push(emitted.len());
        match edits.get(&index) {
            Some(replacement) => emitted.extend(replacement.iter().copied()),
            None => emitted.push(*instruction),
        }
    }
    position.push(emitted.len());

    let instructions = emitted
        .into_iter()
        .map(|i| i.map_target(|target| position.get(target).copied().unwrap_or(target)))
        .collect();
    Program::new(instructions)
}

/// Splits `program` into the index ranges of its straight-line runs, that is,
/// the maximal sequences that contain no jump destination.
#[must_use]
pub fn runs(program: &Program) -> Vec<std::ops::Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    for (index, instruction) in program.instructions.iter().enumerate() {
        if *instruction == Instruction::JumpDest {
            if start < index {
                runs.push(start..index);
            }
            start = index + 1;
        }
    }
    if start < program.len() {
        runs.push(start..program.len());
    }
    runs
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use aurion_avm::{asm::assemble, Instruction, Program};

    use crate::optimize::{optimize, splice};

    #[test]
    fn splicing_keeps_jumps_on_target() {
        let program = Program::new(vec![
            Instruction::push(1),
            Instruction::push(2),
            Instruction::Jump(3),
            Instruction::JumpDest,
            Instruction::Stop,
        ]);
        let edits = BTreeMap::from([(0, Vec::new()), (1, Vec::new())]);
        let spliced = splice(&program, &edits);

        assert_eq!(spliced.instructions, vec![
            Instruction::Jump(1),
            Instruction::JumpDest,
            Instruction::Stop,
        ]);
    }

    #[test]
    fn leaves_invalid_buffers_alone() {
        let result = optimize(b"not bytecode");
        assert_eq!(result.bytes, b"not bytecode");
        assert!(result.notes.is_empty());
        assert_eq!(result.original_size, result.optimized_size);
    }

    #[test]
    fn shrinks_and_reaches_a_fixpoint() -> anyhow::Result<()> {
        let program = assemble(
            "PUSH 2
             PUSH 3
             ADD
             SSTORE4 1
             SLOAD4 1
             RETURN
             PUSH 9
             POP",
        )?;
        let bytes = program.encode()?;

        let first = optimize(&bytes);
        assert!(first.optimized_size < first.original_size);
        assert!(!first.notes.is_empty());

        let second = optimize(&first.bytes);
        assert!(second.notes.is_empty());
        assert_eq!(second.bytes, first.bytes);

        Ok(())
    }
}
