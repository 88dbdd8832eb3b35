//! Value provenance queries over a single function.
//!
//! Values never cross block boundaries, so all dataflow between blocks happens
//! through locals. The queries here treat locals flow-insensitively: a load of
//! a local may observe any value ever stored into it. That over-approximates
//! what a value can depend on, which is the right direction for the questions
//! the detectors ask ("does this condition mention the sender?", "can this
//! value reach storage?").

use std::collections::{BTreeSet, HashSet};

use crate::{
    ir::{BlockId, Instruction, IrFunction, LocalId, Terminator, ValueId},
    syntax::ast::EnvVar,
};

/// A source that a value can be derived from.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Origin {
    Env(EnvVar),

    /// A storage field, or any entry of a map field.
    Field(String),

    /// The parameter with the given index.
    Param(LocalId),
    Const(u128),

    /// The return value of the named internal function.
    Call(String),

    /// The success flag of a call out of the contract.
    External,
}

impl Origin {
    #[must_use]
    pub fn is_const(&self) -> bool {
        matches!(self, Origin::Const(_))
    }
}

/// A value, identified by the block that defines it.
pub type Site = (BlockId, ValueId);

/// Def-use information for a function.
#[derive(Clone, Debug)]
pub struct DefUse<'f> {
    function: &'f IrFunction,

    /// The values stored into each local.
    local_defs: Vec<Vec<Site>>,
}

impl<'f> DefUse<'f> {
    /// Computes the def-use information for `function`.
    #[must_use]
    pub fn new(function: &'f IrFunction) -> Self {
        let mut local_defs = vec![Vec::new(); function.locals.len()];
        for (block, instruction) in function.instructions() {
            if let Instruction::StoreLocal { local, value } = &instruction.node {
                if let Some(defs) = local_defs.get_mut(*local as usize) {
                    defs.push((block, *value));
                }
            }
        }
        Self {
            function,
            local_defs,
        }
    }

    #[must_use]
    pub fn function(&self) -> &'f IrFunction {
        self.function
    }

    fn definition(&self, (block, value): Site) -> Option<&'f Instruction> {
        self.function
            .block(block)
            .and_then(|b| b.definition(value))
            .map(|i| &i.node)
    }

    /// Computes everything that `value` in `block` may be derived from.
    #[must_use]
    pub fn origins(&self, block: BlockId, value: ValueId) -> BTreeSet<Origin> {
        let mut origins = BTreeSet::new();
        let mut seen_sites = HashSet::new();
        let mut seen_locals = HashSet::new();
        let mut stack = vec![(block, value)];

        while let Some(site) = stack.pop() {
            if !seen_sites.insert(site) {
                continue;
            }
            let Some(instruction) = self.definition(site) else {
                continue;
            };
            match instruction {
                Instruction::Const { value, .. } => {
                    origins.insert(Origin::Const(*value));
                }
                Instruction::Env { var, .. } => {
                    origins.insert(Origin::Env(*var));
                }
                Instruction::LoadLocal { local, .. } => {
                    if !seen_locals.insert(*local) {
                        continue;
                    }
                    if (*local as usize) < self.function.params.len() {
                        origins.insert(Origin::Param(*local));
                    }
                    if let Some(defs) = self.local_defs.get(*local as usize) {
                        stack.extend(defs.iter().copied());
                    }
                }
                Instruction::LoadField { field, .. } => {
                    origins.insert(Origin::Field(field.clone()));
                }
                Instruction::Binary { lhs, rhs, .. } => {
                    stack.push((site.0, *lhs));
                    stack.push((site.0, *rhs));
                }
                Instruction::Unary { operand, .. } => stack.push((site.0, *operand)),
                Instruction::Call { function, .. } => {
                    origins.insert(Origin::Call(function.clone()));
                }
                Instruction::ExternalCall { .. } => {
                    origins.insert(Origin::External);
                }
                Instruction::StoreLocal { .. }
                | Instruction::StoreField { .. }
                | Instruction::Emit { .. } => {}
            }
        }

        origins
    }

    /// Computes every value that is derived from `value` in `block`, including
    /// itself, following arithmetic and locals forwards.
    #[must_use]
    pub fn derived(&self, block: BlockId, value: ValueId) -> HashSet<Site> {
        let mut sites = HashSet::from([(block, value)]);
        let mut locals = HashSet::<LocalId>::new();

        let mut changed = true;
        while changed {
            changed = false;
            for (block, instruction) in self.function.instructions() {
                let tainted = |v: &ValueId| sites.contains(&(block, *v));
                let newly = match &instruction.node {
                    Instruction::Binary { dest, lhs, rhs, .. } if tainted(lhs) || tainted(rhs) => {
                        Some(*dest)
                    }
                    Instruction::Unary { dest, operand, .. } if tainted(operand) => Some(*dest),
                    Instruction::LoadLocal { dest, local } if locals.contains(local) => Some(*dest),
                    Instruction::StoreLocal { local, value } if tainted(value) => {
                        changed |= locals.insert(*local);
                        None
                    }
                    _ => None,
                };
                if let Some(dest) = newly {
                    changed |= sites.insert((block, dest));
                }
            }
        }

        sites
    }

    /// Checks if `value` in `block` can flow into a value written to storage.
    #[must_use]
    pub fn reaches_store(&self, block: BlockId, value: ValueId) -> bool {
        let derived = self.derived(block, value);
        self.function.instructions().any(|(b, i)| match &i.node {
            Instruction::StoreField { value, .. } => derived.contains(&(b, *value)),
            _ => false,
        })
    }

    /// Checks if `value` in `block` can flow into the condition of a branch or
    /// guard.
    #[must_use]
    pub fn reaches_condition(&self, block: BlockId, value: ValueId) -> bool {
        let derived = self.derived(block, value);
        self.conditions()
            .into_iter()
            .any(|(b, cond, _)| derived.contains(&(b, cond)))
    }

    /// Every branch or guard condition in the function, with the terminator it
    /// belongs to.
    #[must_use]
    pub fn conditions(&self) -> Vec<(BlockId, ValueId, &'f Terminator)> {
        self.function
            .blocks
            .iter()
            .filter_map(|block| match &block.terminator.node {
                t @ (Terminator::Branch { cond, .. } | Terminator::Guard { cond, .. }) => {
                    Some((block.id, *cond, t))
                }
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{
            dataflow::{DefUse, Origin},
            lower::lower,
            Instruction,
            IrModule,
        },
        syntax::{ast::EnvVar, parse},
    };

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn origins_follow_locals_across_blocks() -> anyhow::Result<()> {
        let module = module(
            "contract A { owner: address\n x: u64\n f(n: u64) { let s = msg.sender\n if n > 1 { self.x = 1 }\n require(s == self.owner) } }",
        )?;
        let function = &module.contracts[0].functions[0];
        let def_use = DefUse::new(function);
        let (block, cond, _) = def_use
            .conditions()
            .into_iter()
            .last()
            .ok_or_else(|| anyhow::anyhow!("no guard"))?;

        let origins = def_use.origins(block, cond);
        assert!(origins.contains(&Origin::Env(EnvVar::Sender)));
        assert!(origins.contains(&Origin::Field("owner".to_string())));
        assert!(!origins.contains(&Origin::Param(0)));

        Ok(())
    }

    #[test]
    fn tracks_values_into_storage() -> anyhow::Result<()> {
        let module = module("contract A { x: u64\n f(n: u64) { let m = n * 2\n self.x = m + 1 } }")?;
        let function = &module.contracts[0].functions[0];
        let def_use = DefUse::new(function);
        let (block, mul) = function
            .instructions()
            .find_map(|(b, i)| match i.node {
                Instruction::Binary { dest, .. } => Some((b, dest)),
                _ => None,
            })
            .ok_or_else(|| anyhow::anyhow!("no multiplication"))?;

        assert!(def_use.reaches_store(block, mul));
        assert!(!def_use.reaches_condition(block, mul));

        Ok(())
    }
}
