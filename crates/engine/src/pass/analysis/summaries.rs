//! This pass computes a summary of what each function does to storage and to
//! the outside world, including everything done by the functions it calls.
//!
//! The detectors use the summaries to see through internal calls: a call to a
//! helper that transfers funds is as dangerous as the transfer itself, and a
//! call to a helper that checks the sender protects the code after it.

use std::collections::{BTreeMap, BTreeSet};

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{
        cfg::Cfg,
        dataflow::{DefUse, Origin},
        types::Type,
        BlockId,
        Instruction,
        IrContract,
        IrFunction,
        IrModule,
        Terminator,
        ValueId,
    },
    pass::{
        consume,
        data::{ConcretePassData, PassDataOps, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
    syntax::ast::EnvVar,
};

/// Computes a [`FunctionSummary`] for every function in the module.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionSummaries {
    depends: Vec<PassKey>,
}

impl FunctionSummaries {
    /// Creates a new instance of the function summary pass.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for FunctionSummaries {
    fn name(&self) -> &'static str {
        "function-summaries"
    }

    fn run(
        &mut self,
        module: &IrModule,
        _pass_data: &PassFacts,
        fuel: &mut Fuel,
    ) -> Result<PassOutput> {
        let data = summarize(module, fuel, self.name())?;
        Ok(PassOutput::facts(data))
    }

    fn depends(&self) -> &[PassKey] {
        self.depends.as_slice()
    }

    fn dupe(&self) -> Pass {
        Box::new(self.clone())
    }
}

impl ConcretePass for FunctionSummaries {
    type Data = FunctionSummariesData;
}

/// What a function does, including through the functions it calls.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct FunctionSummary {
    /// The fields the function reads.
    pub reads: BTreeSet<String>,

    /// The fields the function writes.
    pub writes: BTreeSet<String>,

    /// The fields the function writes other than through map entries keyed by
    /// the sender, which every caller may write to freely.
    pub shared_writes: BTreeSet<String>,

    /// Whether the function may call out of the contract.
    pub external_calls: bool,

    /// Whether every successful return from the function has checked the
    /// sender against an address stored by the contract.
    pub checks_sender: bool,

    /// The functions called directly.
    pub callees: BTreeSet<String>,
}

/// The summaries of every function, keyed by contract and function name.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionSummariesData {
    summaries: BTreeMap<(String, String), FunctionSummary>,
}

impl FunctionSummariesData {
    /// Gets the summary of `function` in `contract`.
    #[must_use]
    pub fn get(&self, contract: &str, function: &str) -> Option<&FunctionSummary> {
        self.summaries
            .get(&(contract.to_string(), function.to_string()))
    }

    /// Checks if calling `function` in `contract` always checks the sender.
    #[must_use]
    pub fn checks_sender(&self, contract: &str, function: &str) -> bool {
        self.get(contract, function).is_some_and(|s| s.checks_sender)
    }
}

impl PassDataOps for FunctionSummariesData {}
impl ConcretePassData for FunctionSummariesData {}

/// A point in a function from which the sender is known to have been checked.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Checkpoint {
    pub block: BlockId,

    /// The index of the instruction that performs the check, if the check is
    /// an instruction rather than the entry to `block`.
    pub after: Option<usize>,
}

impl Checkpoint {
    /// Checks if the instruction at `index` in `block` can only execute after
    /// this checkpoint has been passed. An `index` equal to the number of
    /// instructions in the block refers to its terminator.
    #[must_use]
    pub fn covers(&self, cfg: &Cfg, block: BlockId, index: usize) -> bool {
        if self.block == block {
            self.after.map_or(true, |after| index > after)
        } else {
            cfg.dominates(self.block, block)
        }
    }
}

/// Checks if a condition with the provided `origins` compares the sender with
/// an address that the contract stores, either in an address field or as the
/// key of a map.
#[must_use]
pub fn is_sender_check(contract: &IrContract, origins: &BTreeSet<Origin>) -> bool {
    origins.contains(&Origin::Env(EnvVar::Sender))
        && origins.iter().any(|origin| match origin {
            Origin::Field(field) => contract
                .field(field)
                .is_some_and(|f| matches!(f.ty, Type::Address | Type::Map(..))),
            _ => false,
        })
}

/// Checks if `block` unconditionally reverts.
#[must_use]
pub fn is_revert_block(function: &IrFunction, block: BlockId) -> bool {
    function
        .block(block)
        .is_some_and(|b| matches!(b.terminator.node, Terminator::Revert(_)))
}

/// Finds every point in `function` after which the sender has been checked.
///
/// A check is a `require` or `assert` on a sender comparison, a branch on a
/// sender comparison one side of which reverts, or a call to a function for
/// which `callee_checks` holds.
pub fn sender_checkpoints(
    contract: &IrContract,
    function: &IrFunction,
    def_use: &DefUse<'_>,
    callee_checks: impl Fn(&str) -> bool,
) -> Vec<Checkpoint> {
    let mut checkpoints = Vec::new();
    for (block, cond, terminator) in def_use.conditions() {
        if !is_sender_check(contract, &def_use.origins(block, cond)) {
            continue;
        }
        match terminator {
            Terminator::Guard { next, .. } => checkpoints.push(Checkpoint {
                block: *next,
                after: None,
            }),
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                let continues = match (
                    is_revert_block(function, *then_block),
                    is_revert_block(function, *else_block),
                ) {
                    (true, false) => Some(*else_block),
                    (false, true) => Some(*then_block),
                    _ => None,
                };
                if let Some(block) = continues {
                    checkpoints.push(Checkpoint { block, after: None });
                }
            }
            _ => {}
        }
    }

    for block in &function.blocks {
        for (index, instruction) in block.instructions.iter().enumerate() {
            if let Instruction::Call { function, .. } = &instruction.node {
                if callee_checks(function) {
                    checkpoints.push(Checkpoint {
                        block: block.id,
                        after: Some(index),
                    });
                }
            }
        }
    }

    checkpoints
}

/// Checks if the map key written at `key` in `block` is exactly the sender.
#[must_use]
pub fn is_sender_keyed(def_use: &DefUse<'_>, block: BlockId, key: Option<ValueId>) -> bool {
    key.is_some_and(|key| {
        let origins = def_use.origins(block, key);
        origins.len() == 1 && origins.contains(&Origin::Env(EnvVar::Sender))
    })
}

/// Computes the summaries of every function in `module`, outside of a pass
/// manager.
///
/// # Errors
///
/// - [`aurion_errors::analysis::Error::BudgetExhausted`] if `fuel` runs out,
///   attributed to `pass`.
pub fn summarize(module: &IrModule, fuel: &mut Fuel, pass: &str) -> Result<FunctionSummariesData> {
    let mut data = FunctionSummariesData::default();
    for contract in &module.contracts {
        for (name, summary) in summarize_contract(contract, fuel, pass)? {
            data.summaries.insert((contract.name.clone(), name), summary);
        }
    }
    Ok(data)
}

/// Computes the summaries of every function in `contract`.
fn summarize_contract(
    contract: &IrContract,
    fuel: &mut Fuel,
    pass: &str,
) -> Result<BTreeMap<String, FunctionSummary>> {
    let mut summaries = BTreeMap::new();
    for function in &contract.functions {
        consume(fuel, pass, function.blocks.len() as u64 + 1)?;
        summaries.insert(function.name.clone(), summarize_locally(function));
    }

    // Effects propagate from callees to callers until nothing changes, which
    // takes at most one round per function in a chain of calls.
    for _ in 0..=contract.functions.len() {
        consume(fuel, pass, summaries.len() as u64)?;
        let mut changed = false;
        let snapshot = summaries.clone();
        for summary in summaries.values_mut() {
            for callee in summary.callees.clone() {
                let Some(callee) = snapshot.get(&callee) else {
                    continue;
                };
                let before = (
                    summary.reads.len(),
                    summary.writes.len(),
                    summary.shared_writes.len(),
                    summary.external_calls,
                );
                summary.reads.extend(callee.reads.iter().cloned());
                summary.writes.extend(callee.writes.iter().cloned());
                summary.shared_writes.extend(callee.shared_writes.iter().cloned());
                summary.external_calls |= callee.external_calls;
                let after = (
                    summary.reads.len(),
                    summary.writes.len(),
                    summary.shared_writes.len(),
                    summary.external_calls,
                );
                changed |= before != after;
            }
        }
        if !changed {
            break;
        }
    }

    // Checking the sender is a property of every path rather than of some, so
    // it starts out false everywhere and grows.
    for _ in 0..=contract.functions.len() {
        let mut changed = false;
        for function in &contract.functions {
            consume(fuel, pass, function.blocks.len() as u64 + 1)?;
            let checks = always_checks_sender(contract, function, |callee| {
                summaries.get(callee).is_some_and(|s| s.checks_sender)
            });
            if let Some(summary) = summaries.get_mut(&function.name) {
                if checks && !summary.checks_sender {
                    summary.checks_sender = true;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    Ok(summaries)
}

/// Summarizes what `function` does by itself.
fn summarize_locally(function: &IrFunction) -> FunctionSummary {
    let def_use = DefUse::new(function);
    let mut summary = FunctionSummary::default();
    for (block, instruction) in function.instructions() {
        match &instruction.node {
            Instruction::LoadField { field, .. } => {
                summary.reads.insert(field.clone());
            }
            Instruction::StoreField { field, key, .. } => {
                summary.writes.insert(field.clone());
                if !is_sender_keyed(&def_use, block, *key) {
                    summary.shared_writes.insert(field.clone());
                }
            }
            Instruction::ExternalCall { .. } => summary.external_calls = true,
            Instruction::Call { function, .. } => {
                summary.callees.insert(function.clone());
            }
            _ => {}
        }
    }
    summary
}

/// Checks if every reachable return from `function` has passed a sender
/// check.
fn always_checks_sender(
    contract: &IrContract,
    function: &IrFunction,
    callee_checks: impl Fn(&str) -> bool,
) -> bool {
    let cfg = Cfg::new(function);
    let def_use = DefUse::new(function);
    let checkpoints = sender_checkpoints(contract, function, &def_use, callee_checks);
    function
        .blocks
        .iter()
        .filter(|b| cfg.is_reachable(b.id) && matches!(b.terminator.node, Terminator::Return(_)))
        .all(|b| {
            checkpoints
                .iter()
                .any(|c| c.covers(&cfg, b.id, b.instructions.len()))
        })
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        fuel::Fuel,
        ir::{lower::lower, IrModule},
        pass::{
            analysis::summaries::{FunctionSummaries, FunctionSummariesData},
            data::PassFacts,
            PassOps,
        },
        syntax::parse,
    };

    fn summarize(source: &str) -> anyhow::Result<FunctionSummariesData> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let module: IrModule =
            lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let returned = FunctionSummaries::new().run(&module, &PassFacts::new(), &mut Fuel::new(10_000))?;
        returned
            .data_as::<FunctionSummariesData>()
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("summaries missing"))
    }

    #[test]
    fn effects_propagate_through_calls() -> anyhow::Result<()> {
        let data = summarize(
            "contract A {\n balances: map<address, u64>\n total: u64\n f() { self.g() }\n private g() { self.h() }\n private h() { self.balances[msg.sender] = self.total\n transfer(msg.sender, 1) }\n}",
        )?;
        let f = data.get("A", "f").ok_or_else(|| anyhow::anyhow!("no summary"))?;
        assert!(f.external_calls);
        assert!(f.reads.contains("total"));
        assert!(f.writes.contains("balances"));
        assert!(f.shared_writes.is_empty());

        Ok(())
    }

    #[test]
    fn recognises_helpers_that_check_the_sender() -> anyhow::Result<()> {
        let data = summarize(
            "contract A {\n owner: address\n x: u64\n private only_owner() { require(msg.sender == self.owner) }\n private maybe(c: bool) { if c { require(msg.sender == self.owner) } }\n private via() { self.only_owner() }\n private manual() { if msg.sender != self.owner { revert(\"no\") } }\n}",
        )?;
        assert!(data.checks_sender("A", "only_owner"));
        assert!(!data.checks_sender("A", "maybe"));
        assert!(data.checks_sender("A", "via"));
        assert!(data.checks_sender("A", "manual"));

        Ok(())
    }
}
