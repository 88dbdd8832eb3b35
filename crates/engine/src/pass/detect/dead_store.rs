//! Detects writes to storage that are always overwritten before anything can
//! observe them.
//!
//! Storage writes are the most expensive operation on every supported chain, so
//! a write that is guaranteed to be replaced is wasted gas even where it is not
//! a bug. Only scalar fields are considered, as two writes to a map only
//! overwrite each other if their keys are equal.

use std::collections::HashSet;

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{cfg::Cfg, BlockId, Instruction, IrFunction, IrModule, Terminator},
    issue::{Issue, Severity},
    pass::{
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
};

/// Detects storage writes that are always overwritten.
#[derive(Clone, Debug, PartialEq)]
pub struct DeadStore {
    depends: Vec<PassKey>,
}

impl DeadStore {
    /// Creates a new instance of the dead store detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for DeadStore {
    fn name(&self) -> &'static str {
        "dead-store"
    }

    fn run(
        &mut self,
        module: &IrModule,
        _pass_data: &PassFacts,
        fuel: &mut Fuel,
    ) -> Result<PassOutput> {
        let mut issues = Vec::new();
        for (_, function) in module.functions() {
            let cfg = Cfg::new(function);
            for block in function.blocks.iter().filter(|b| cfg.is_reachable(b.id)) {
                for (index, instruction) in block.instructions.iter().enumerate() {
                    let Instruction::StoreField {
                        field, key: None, ..
                    } = &instruction.node
                    else {
                        continue;
                    };
                    consume(fuel, self.name(), function.blocks.len() as u64)?;
                    if is_dead(function, field, block.id, index + 1) {
                        issues.push(
                            Issue::new(
                                self.name(),
                                Severity::Low,
                                format!(
                                    "The value written to `{field}` here is always overwritten \
                                     before it is read"
                                ),
                            )
                            .at(instruction.location)
                            .in_function(&function.name),
                        );
                    }
                }
            }
        }

        Ok(PassOutput::issues(issues))
    }

    fn depends(&self) -> &[PassKey] {
        self.depends.as_slice()
    }

    fn dupe(&self) -> Pass {
        Box::new(self.clone())
    }
}

impl ConcretePass for DeadStore {
    type Data = NoData;
}

/// What a single path from a store ends with.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PathEnd {
    /// Something may read the stored value.
    Observed,

    /// The field is written again.
    Overwritten,
}

/// Checks if the value stored to the scalar `field` before position `start` in
/// `block` is overwritten on some path and never observed on any.
fn is_dead(function: &IrFunction, field: &str, block: BlockId, start: usize) -> bool {
    let mut overwritten = false;
    let mut visited = HashSet::new();
    let mut stack = vec![(block, start)];

    while let Some((block, start)) = stack.pop() {
        let Some(current) = function.block(block) else {
            continue;
        };
        match scan_block(current.instructions.iter().skip(start).map(|i| &i.node), field) {
            Some(PathEnd::Observed) => return false,
            Some(PathEnd::Overwritten) => {
                overwritten = true;
                continue;
            }
            None => {}
        }

        // A revert, including a failed guard, discards the write along with
        // everything else.
        match &current.terminator.node {
            Terminator::Return(_) => return false,
            Terminator::Revert(_) => {}
            terminator => {
                for successor in terminator.successors() {
                    if visited.insert(successor) {
                        stack.push((successor, 0));
                    }
                }
            }
        }
    }

    overwritten
}

/// Finds the first instruction that decides the fate of a store to `field`.
fn scan_block<'a>(
    instructions: impl Iterator<Item = &'a Instruction>,
    field: &str,
) -> Option<PathEnd> {
    for instruction in instructions {
        match instruction {
            Instruction::LoadField { field: read, .. } if read == field => {
                return Some(PathEnd::Observed);
            }
            Instruction::Call { .. } | Instruction::ExternalCall { .. } => {
                return Some(PathEnd::Observed);
            }
            Instruction::StoreField {
                field: written,
                key: None,
                ..
            } if written == field => return Some(PathEnd::Overwritten),
            _ => {}
        }
    }

    None
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{dead_store::DeadStore, test::scan_with},
    };

    #[test]
    fn flags_a_store_that_is_overwritten() -> anyhow::Result<()> {
        let issues = scan_with(
            DeadStore::new(),
            "contract A {\n x: u64\n f(n: u64) {\n self.x = 1\n self.x = n\n }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Low);
        assert_eq!(issues[0].location.map(|l| l.line), Some(4));

        Ok(())
    }

    #[test]
    fn accepts_stores_that_may_be_observed() -> anyhow::Result<()> {
        let issues = scan_with(
            DeadStore::new(),
            "contract A {\n x: u64\n a(n: u64) {\n self.x = 1\n let y = self.x + n\n self.x = y\n }\n b(c: bool) {\n self.x = 1\n if c { return }\n self.x = 2\n }\n c() {\n self.x = 1\n self.helper()\n self.x = 2\n }\n private helper() { }\n}",
        )?;
        assert!(issues.is_empty(), "{issues:?}");

        Ok(())
    }

    #[test]
    fn reverting_paths_do_not_observe_the_store() -> anyhow::Result<()> {
        let issues = scan_with(
            DeadStore::new(),
            "contract A {\n x: u64\n f(n: u64) {\n self.x = 1\n require(n > 0)\n if n > 9 { revert(\"big\") }\n self.x = n\n }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].function.as_deref(), Some("f"));
        assert_eq!(issues[0].location.map(|l| l.line), Some(4));

        Ok(())
    }
}
