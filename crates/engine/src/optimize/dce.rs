//! Dead-code elimination.
//!
//! Removes instructions that can never execute, jump destinations that nothing
//! jumps to, jumps to the instruction that follows anyway, and values that are
//! pushed only to be popped.

use std::collections::{BTreeMap, BTreeSet};

use aurion_avm::{Instruction, Program};

use crate::optimize::{splice, Rewrite, Transformation};

#[derive(Clone, Copy, Debug, Default)]
pub struct DeadCodeElimination;

impl Transformation for DeadCodeElimination {
    fn name(&self) -> &'static str {
        "dead-code-elimination"
    }

    fn apply(&self, program: &Program) -> Option<Rewrite> {
        let reachable = reachable(program);
        let targets = program
            .instructions
            .iter()
            .enumerate()
            .filter(|(index, _)| reachable[*index])
            .filter_map(|(_, i)| i.jump_target())
            .collect::<BTreeSet<_>>();

        let mut edits = BTreeMap::new();
        let (mut unreachable, mut markers, mut jumps, mut discarded) = (0, 0, 0, 0);
        let instructions = &program.instructions;
        let mut index = 0;
        while index < instructions.len() {
            let instruction = instructions[index];
            if !reachable[index] {
                edits.insert(index, Vec::new());
                unreachable += 1;
            } else if instruction == Instruction::JumpDest && !targets.contains(&index) {
                edits.insert(index, Vec::new());
                markers += 1;
            } else if instruction
                .jump_target()
                .is_some_and(|t| matches!(instruction, Instruction::Jump(_)) && t == index + 1)
            {
                edits.insert(index, Vec::new());
                jumps += 1;
            } else if is_pure_push(instruction) && instructions.get(index + 1) == Some(&Instruction::Pop) {
                edits.insert(index, Vec::new());
                edits.insert(index + 1, Vec::new());
                discarded += 1;
                index += 1;
            }
            index += 1;
        }

        if edits.is_empty() {
            return None;
        }
        let notes = [
            (unreachable, "unreachable instruction(s) removed"),
            (markers, "unused jump destination(s) removed"),
            (jumps, "jump(s) to the next instruction removed"),
            (discarded, "discarded value(s) no longer computed"),
        ]
        .into_iter()
        .filter(|(count, _)| *count > 0)
        .map(|(count, what)| format!("{count} {what}"))
        .collect();
        Some((splice(program, &edits), notes))
    }
}

/// Checks if `instruction` pushes a single value without any other effect.
fn is_pure_push(instruction: Instruction) -> bool {
    matches!(
        instruction,
        Instruction::Push { .. }
            | Instruction::Arg(_)
            | Instruction::Caller
            | Instruction::Timestamp
            | Instruction::CallValue
    )
}

/// Finds the instructions that execution can reach from the start.
fn reachable(program: &Program) -> Vec<bool> {
    let mut reachable = vec![false; program.len()];
    let mut stack = vec![0];
    while let Some(index) = stack.pop() {
        let Some(instruction) = program.instructions.get(index) else {
            continue;
        };
        if std::mem::replace(&mut reachable[index], true) {
            continue;
        }
        if !instruction.is_terminal() {
            stack.push(index + 1);
        }
        stack.extend(instruction.jump_target());
    }
    reachable
}

#[cfg(test)]
mod test {
    use aurion_avm::{asm::assemble, Instruction};

    use crate::optimize::{dce::DeadCodeElimination, Transformation};

    #[test]
    fn removes_code_after_terminators() -> anyhow::Result<()> {
        let program = assemble(
            "PUSH 1
             JUMPI skip
             STOP
             PUSH 3
             skip:
             PUSH 4
             RETURN",
        )?;
        let (optimized, notes) = DeadCodeElimination
            .apply(&program)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;

        assert!(!optimized.instructions.contains(&Instruction::push(3)));
        assert_eq!(optimized.instructions[1], Instruction::JumpI(3));
        assert_eq!(notes, vec!["1 unreachable instruction(s) removed"]);

        Ok(())
    }

    #[test]
    fn keeps_jump_destinations_in_use() -> anyhow::Result<()> {
        let program = assemble(
            "top:
             ARG 0
             JUMPI top
             STOP",
        )?;
        assert!(DeadCodeElimination.apply(&program).is_none());

        Ok(())
    }
}
