//! Constant folding.
//!
//! Evaluates operations whose operands are immediates, resolves conditional
//! jumps on immediate conditions, and drops operations with an identity
//! operand such as `PUSH 0; ADD`. The evaluation is shared with the machine,
//! so folded results are exactly what execution would have produced.

use std::collections::BTreeMap;

use aurion_avm::{
    instruction::{eval_binary, eval_unary},
    Instruction,
    Program,
};

use crate::optimize::{runs, splice, Rewrite, Transformation};

#[derive(Clone, Copy, Debug, Default)]
pub struct ConstantFolding;

impl Transformation for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant-folding"
    }

    fn apply(&self, program: &Program) -> Option<Rewrite> {
        let mut edits = BTreeMap::new();
        let mut notes = Vec::new();

        for run in runs(program) {
            let code = &program.instructions[run.clone()];
            let mut offset = 0;
            while offset < code.len() {
                let at = run.start + offset;
                match fold_at(&code[offset..]).filter(|(consumed, replacement, _)| {
                    size(replacement) <= size(&code[offset..offset + consumed])
                }) {
                    Some((consumed, replacement, note)) => {
                        for index in at..at + consumed {
                            edits.insert(index, Vec::new());
                        }
                        edits.insert(at, replacement);
                        notes.push(format!("{note} at instruction {at}"));
                        offset += consumed;
                    }
                    None => offset += 1,
                }
            }
        }

        if edits.is_empty() {
            return None;
        }
        Some((splice(program, &edits), notes))
    }
}

/// Tries to fold the instructions at the start of `code`, returning how many
/// were consumed, what replaces them, and a description of the change.
fn fold_at(code: &[Instruction]) -> Option<(usize, Vec<Instruction>, String)> {
    let immediate = |i: &Instruction| match i {
        Instruction::Push { value, .. } => Some(*value),
        _ => None,
    };

    match code {
        [a, b, op, ..] if op.is_binary() && immediate(a).is_some() && immediate(b).is_some() => {
            let (lhs, rhs) = (immediate(a)?, immediate(b)?);
            let value = eval_binary(*op, lhs, rhs)?;
            Some((3, vec![Instruction::push(value)], format!("folded {lhs} {op} {rhs}")))
        }
        [a, op, ..] if op.is_unary() && immediate(a).is_some() => {
            let operand = immediate(a)?;
            let value = eval_unary(*op, operand)?;
            Some((2, vec![Instruction::push(value)], format!("folded {op} {operand}")))
        }
        [a, Instruction::JumpI(target), ..] if immediate(a).is_some() => {
            let (replacement, note) = if immediate(a)? == 0 {
                (Vec::new(), "removed a jump that is never taken")
            } else {
                (vec![Instruction::Jump(*target)], "made a jump that is always taken unconditional")
            };
            Some((2, replacement, note.to_string()))
        }
        [a, op, ..] if immediate(a).is_some_and(|value| is_identity(value, *op)) => {
            Some((2, Vec::new(), format!("removed {op} of an identity operand")))
        }
        _ => None,
    }
}

fn size(code: &[Instruction]) -> usize {
    code.iter().map(Instruction::encoded_len).sum()
}

/// Checks if applying `op` with `value` as its right-hand operand leaves the
/// left-hand operand unchanged.
fn is_identity(value: u64, op: Instruction) -> bool {
    matches!(
        (value, op),
        (0, Instruction::Add | Instruction::Sub | Instruction::Or)
            | (1, Instruction::Mul | Instruction::Div)
    )
}

#[cfg(test)]
mod test {
    use aurion_avm::{asm::assemble, Instruction};

    use crate::optimize::{fold::ConstantFolding, Transformation};

    #[test]
    fn folds_nested_arithmetic_in_rounds() -> anyhow::Result<()> {
        let program = assemble(
            "PUSH 2
             PUSH 3
             ADD
             PUSH 4
             MUL
             RETURN",
        )?;
        let (once, _) = ConstantFolding
            .apply(&program)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;
        let (twice, _) = ConstantFolding
            .apply(&once)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;

        assert_eq!(twice.instructions, vec![Instruction::push(20), Instruction::Return]);

        Ok(())
    }

    #[test]
    fn resolves_constant_conditions() -> anyhow::Result<()> {
        let program = assemble(
            "PUSH 0
             JUMPI end
             ARG 0
             PUSH 0
             ADD
             RETURN
             end:
             STOP",
        )?;
        let (folded, notes) = ConstantFolding
            .apply(&program)
            .ok_or_else(|| anyhow::anyhow!("no rewrite"))?;

        assert_eq!(folded.instructions[..2], [Instruction::Arg(0), Instruction::Return]);
        assert_eq!(notes.len(), 2);

        Ok(())
    }

    #[test]
    fn never_folds_across_jump_destinations() -> anyhow::Result<()> {
        let program = assemble(
            "PUSH 1
             mid:
             PUSH 2
             ADD
             JUMP mid",
        )?;
        assert!(ConstantFolding.apply(&program).is_none());

        Ok(())
    }
}
