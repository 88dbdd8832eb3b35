//! A small textual assembly language for writing programs by hand.
//!
//! Each non-empty line holds either a single instruction, such as `PUSH 5` or
//! `SLOAD4 3`, or a label definition such as `done:`. A label definition
//! assembles to a `JUMPDEST` and can be named as the operand of `JUMP` and
//! `JUMPI`. Comments start with `;` or `#` and run to the end of the line.
//!
//! The unsuffixed `PUSH`, `SLOAD` and `SSTORE` mnemonics pick the narrowest
//! encoding for their operand, while the suffixed forms force a width.

use std::collections::HashMap;

use aurion_errors::bytecode::{Error, Result};
use itertools::Itertools;

use crate::{
    instruction::{Instruction, Width},
    program::Program,
};

/// Assembles `source` into a program.
///
/// # Errors
///
/// - [`Error::Assembly`] if any line cannot be assembled, naming the first
///   offending line.
pub fn assemble(source: &str) -> Result<Program> {
    let lines = source
        .lines()
        .enumerate()
        .map(|(number, line)| {
            let code = line.split([';', '#']).next().unwrap_or_default().trim();
            (number + 1, code)
        })
        .filter(|(_, code)| !code.is_empty())
        .collect_vec();

    // The first pass assigns every label the index of the `JUMPDEST` that it
    // becomes, so that forward jumps can be resolved in the second pass.
    let mut labels = HashMap::new();
    for (index, (line, code)) in lines.iter().enumerate() {
        if let Some(label) = code.strip_suffix(':') {
            let label = label.trim();
            if label.is_empty() || label.contains(char::is_whitespace) {
                Err(assembly_error(*line, format!("Invalid label `{label}`")))?;
            }
            if labels.insert(label.to_string(), index).is_some() {
                Err(assembly_error(*line, format!("Label `{label}` is defined twice")))?;
            }
        }
    }

    let instructions = lines
        .iter()
        .map(|(line, code)| {
            if code.ends_with(':') {
                return Ok(Instruction::JumpDest);
            }
            parse_instruction(*line, code, &labels)
        })
        .collect::<Result<Vec<_>>>()?;

    let program = Program::new(instructions);
    program.validate()?;
    Ok(program)
}

/// Renders `program` as assembly that [`assemble`] turns back into the same
/// program.
#[must_use]
pub fn disassemble(program: &Program) -> String {
    let targets = program
        .instructions
        .iter()
        .filter_map(Instruction::jump_target)
        .collect::<std::collections::HashSet<_>>();

    program
        .instructions
        .iter()
        .enumerate()
        .map(|(index, instruction)| match instruction {
            Instruction::JumpDest if targets.contains(&index) => format!("L{index}:"),
            other => format!("    {other}"),
        })
        .join("\n")
}

fn assembly_error(line: usize, message: impl Into<String>) -> Error {
    Error::Assembly {
        line,
        message: message.into(),
    }
}

/// Parses a numeric operand in either decimal or `0x`-prefixed hexadecimal.
fn parse_number(line: usize, operand: Option<&str>) -> Result<u64> {
    let operand = operand.ok_or_else(|| assembly_error(line, "Missing operand"))?;
    let parsed = match operand.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => operand.parse::<u64>(),
    };
    parsed.map_err(|_| assembly_error(line, format!("Invalid number `{operand}`")))
}

fn parse_narrow<T: TryFrom<u64>>(line: usize, operand: Option<&str>, what: &str) -> Result<T> {
    let value = parse_number(line, operand)?;
    T::try_from(value).map_err(|_| assembly_error(line, format!("{what} {value} is out of range")))
}

fn parse_instruction(
    line: usize,
    code: &str,
    labels: &HashMap<String, usize>,
) -> Result<Instruction> {
    let mut parts = code.split_whitespace();
    let mnemonic = parts.next().unwrap_or_default().to_ascii_uppercase();
    let operand = parts.next();
    if let Some(extra) = parts.next() {
        Err(assembly_error(line, format!("Unexpected `{extra}`")))?;
    }

    let label = |operand: Option<&str>| -> Result<usize> {
        let name = operand.ok_or_else(|| assembly_error(line, "Missing jump label"))?;
        labels
            .get(name)
            .copied()
            .ok_or_else(|| assembly_error(line, format!("Unknown label `{name}`")))
    };

    let push = |width: Width| -> Result<Instruction> {
        let value = parse_number(line, operand)?;
        if !width.fits(value) {
            Err(assembly_error(line, format!("{value} does not fit in {} byte(s)", width.bytes())))?;
        }
        Ok(Instruction::Push { value, width })
    };

    let instruction = match mnemonic.as_str() {
        "STOP" => Instruction::Stop,
        "ADD" => Instruction::Add,
        "SUB" => Instruction::Sub,
        "MUL" => Instruction::Mul,
        "DIV" => Instruction::Div,
        "MOD" => Instruction::Mod,
        "LT" => Instruction::Lt,
        "GT" => Instruction::Gt,
        "EQ" => Instruction::Eq,
        "ISZERO" => Instruction::IsZero,
        "AND" => Instruction::And,
        "OR" => Instruction::Or,
        "NOT" => Instruction::Not,
        "POP" => Instruction::Pop,
        "DUP" => Instruction::Dup,
        "SWAP" => Instruction::Swap,
        "PUSH" => Instruction::push(parse_number(line, operand)?),
        "PUSH1" => push(Width::W1)?,
        "PUSH2" => push(Width::W2)?,
        "PUSH4" => push(Width::W4)?,
        "PUSH8" => push(Width::W8)?,
        "SLOAD" => Instruction::sload(parse_narrow(line, operand, "Slot")?),
        "SSTORE" => Instruction::sstore(parse_narrow(line, operand, "Slot")?),
        "SLOAD1" => Instruction::SLoad {
            slot: u32::from(parse_narrow::<u8>(line, operand, "Slot")?),
            wide: false,
        },
        "SSTORE1" => Instruction::SStore {
            slot: u32::from(parse_narrow::<u8>(line, operand, "Slot")?),
            wide: false,
        },
        "SLOAD4" => Instruction::SLoad {
            slot: parse_narrow(line, operand, "Slot")?,
            wide: true,
        },
        "SSTORE4" => Instruction::SStore {
            slot: parse_narrow(line, operand, "Slot")?,
            wide: true,
        },
        "ARG" => Instruction::Arg(parse_narrow(line, operand, "Argument index")?),
        "CALLER" => Instruction::Caller,
        "TIMESTAMP" => Instruction::Timestamp,
        "CALLVALUE" => Instruction::CallValue,
        "JUMP" => Instruction::Jump(label(operand)?),
        "JUMPI" => Instruction::JumpI(label(operand)?),
        "JUMPDEST" => Instruction::JumpDest,
        "EMIT" => Instruction::Emit(parse_narrow(line, operand, "Event topic")?),
        "CALL" => Instruction::Call,
        "RETURN" => Instruction::Return,
        "REVERT" => Instruction::Revert,
        other => Err(assembly_error(line, format!("Unknown mnemonic `{other}`")))?,
    };

    let takes_operand = matches!(
        instruction,
        Instruction::Push { .. }
            | Instruction::SLoad { .. }
            | Instruction::SStore { .. }
            | Instruction::Arg(_)
            | Instruction::Emit(_)
            | Instruction::Jump(_)
            | Instruction::JumpI(_)
    );
    if !takes_operand {
        if let Some(operand) = operand {
            Err(assembly_error(line, format!("`{mnemonic}` takes no operand but got `{operand}`")))?;
        }
    }

    Ok(instruction)
}

#[cfg(test)]
mod test {
    use aurion_errors::bytecode::Error;

    use crate::{
        asm::{assemble, disassemble},
        instruction::{Instruction, Width},
    };

    #[test]
    fn can_assemble_labels_and_widths() -> anyhow::Result<()> {
        let program = assemble(
            "
            ARG 0          ; the amount
            JUMPI nonzero
            REVERT
            nonzero:
            PUSH4 7
            SLOAD4 3
            ADD
            SSTORE 3
            STOP
            ",
        )?;

        assert_eq!(program.instructions, vec![
            Instruction::Arg(0),
            Instruction::JumpI(3),
            Instruction::Revert,
            Instruction::JumpDest,
            Instruction::Push {
                value: 7,
                width: Width::W4,
            },
            Instruction::SLoad { slot: 3, wide: true },
            Instruction::Add,
            Instruction::SStore {
                slot: 3,
                wide: false,
            },
            Instruction::Stop,
        ]);

        Ok(())
    }

    #[test]
    fn disassembly_reassembles_to_the_same_program() -> anyhow::Result<()> {
        let program = assemble("top:\nCALLER\nPUSH8 1\nEQ\nJUMPI top\nPUSH 300\nRETURN\nJUMPDEST")?;
        assert_eq!(assemble(&disassemble(&program))?, program);

        Ok(())
    }

    #[test]
    fn reports_the_offending_line() {
        let result = assemble("PUSH 1\nFROB\n");
        assert_eq!(
            result,
            Err(Error::Assembly {
                line:    2,
                message: "Unknown mnemonic `FROB`".to_string(),
            })
        );

        assert!(matches!(
            assemble("JUMP nowhere"),
            Err(Error::Assembly { line: 1, .. })
        ));
        assert!(matches!(
            assemble("PUSH1 300"),
            Err(Error::Assembly { line: 1, .. })
        ));
        assert!(matches!(assemble("ADD 1"), Err(Error::Assembly { line: 1, .. })));
    }
}
