//! Redundant-load elimination.
//!
//! Within a straight-line run, a load from the slot that was just stored to
//! can reuse the stored value, and a load immediately repeated can reuse the
//! first one:
//!
//! - `SSTORE s; SLOAD s` becomes `DUP; SSTORE s`.
//! - `SLOAD s; SLOAD s` becomes `SLOAD s; DUP`.

use std::collections::BTreeMap;

use aurion_avm::{Instruction, Program};

use crate::optimize::{runs, splice, Rewrite, Transformation};

#[derive(Clone, Copy, Debug, Default)]
pub struct RedundantLoads;

impl Transformation for RedundantLoads {
    fn name(&self) -> &'static str {
        "redundant-load-elimination"
    }

    fn apply(&self, program: &Program) -> Option<Rewrite> {
        let mut edits = BTreeMap::new();
        let mut notes = Vec::new();

        for run in runs(program) {
            let mut index = run.start;
            while index + 1 < run.end {
                let (first, second) = (program.instructions[index], program.instructions[index + 1]);
                let rewrite = match (first, second) {
                    (Instruction::SStore { slot: stored, .. }, Instruction::SLoad { slot, .. })
                        if stored == slot =>
                    {
                        notes.push(format!("forwarded the value stored to slot {slot}"));
                        Some([Instruction::Dup, first])
                    }
                    (Instruction::SLoad { slot: loaded, .. }, Instruction::SLoad { slot, .. })
                        if loaded == slot =>
                    {
                        notes.push(format!("reused a repeated load of slot {slot}"));
                        Some([first, Instruction::Dup])
                    }
                    _ => None,
                };
                match rewrite {
                    Some([a, b]) => {
                        edits.insert(index, vec![a, b]);
                        edits.insert(index + 1, Vec::new());
                        index += 2;
                    }
                    None => index += 1,
                }
            }
        }

        if edits.is_empty() {
            return None;
        }
        Some((splice(program, &edits), notes))
    }
}

#[cfg(test)]
mod test {
    use aurion_avm::{asm::assemble, Instruction};

    use crate::optimize::{loads::RedundantLoads, Transformation};

    #[test]
    fn forwards_stores_and_reuses_loads() -> anyhow::Result<()> {
        let program = assemble(
            "ARG 0
             SSTORE 1
             SLOAD 1
             SLOAD 2
             SLOAD 2
             ADD
             RETURN",
        )?;
        let (optimized, notes) = RedundantLoads
            .apply(&program)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;

        assert_eq!(optimized.instructions, vec![
            Instruction::Arg(0),
            Instruction::Dup,
            Instruction::sstore(1),
            Instruction::sload(2),
            Instruction::Dup,
            Instruction::Add,
            Instruction::Return,
        ]);
        assert_eq!(notes.len(), 2);

        Ok(())
    }
}
