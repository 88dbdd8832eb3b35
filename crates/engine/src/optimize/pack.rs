//! Storage-slot packing.
//!
//! Rewrites wide storage accesses to slots that fit in a byte into their
//! narrow forms, and pushes of immediates into the narrowest width that holds
//! them. Slots themselves are never renumbered, as the contents of storage are
//! observable.

use std::collections::BTreeMap;

use aurion_avm::{Instruction, Program, Width};

use crate::optimize::{splice, Rewrite, Transformation};

#[derive(Clone, Copy, Debug, Default)]
pub struct SlotPacking;

impl Transformation for SlotPacking {
    fn name(&self) -> &'static str {
        "slot-packing"
    }

    fn apply(&self, program: &Program) -> Option<Rewrite> {
        let mut edits = BTreeMap::new();
        let (mut slots, mut immediates) = (0, 0);
        for (index, instruction) in program.instructions.iter().enumerate() {
            let narrow = match *instruction {
                Instruction::SLoad { slot, wide: true } if slot <= u32::from(u8::MAX) => {
                    slots += 1;
                    Instruction::sload(slot)
                }
                Instruction::SStore { slot, wide: true } if slot <= u32::from(u8::MAX) => {
                    slots += 1;
                    Instruction::sstore(slot)
                }
                Instruction::Push { value, width } if Width::smallest_for(value) < width => {
                    immediates += 1;
                    Instruction::push(value)
                }
                _ => continue,
            };
            edits.insert(index, vec![narrow]);
        }

        if edits.is_empty() {
            return None;
        }
        let mut notes = Vec::new();
        if slots > 0 {
            notes.push(format!("{slots} storage access(es) narrowed to one-byte slots"));
        }
        if immediates > 0 {
            notes.push(format!("{immediates} immediate(s) narrowed"));
        }
        Some((splice(program, &edits), notes))
    }
}

#[cfg(test)]
mod test {
    use aurion_avm::{asm::assemble, Instruction};

    use crate::optimize::{pack::SlotPacking, Transformation};

    #[test]
    fn narrows_small_slots_only() -> anyhow::Result<()> {
        let program = assemble(
            "SLOAD4 3
             SSTORE4 300
             PUSH8 7
             STOP",
        )?;
        let (packed, notes) = SlotPacking
            .apply(&program)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;

        assert_eq!(packed.instructions, vec![
            Instruction::sload(3),
            Instruction::SStore {
                slot: 300,
                wide: true,
            },
            Instruction::push(7),
            Instruction::Stop,
        ]);
        assert_eq!(notes.len(), 2);
        assert!(packed.encoded_len() < program.encoded_len());

        Ok(())
    }
}
