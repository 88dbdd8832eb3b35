//! Detects functions that call out of the contract and then write storage that
//! they read before the call.
//!
//! The callee of an external call may call back into the contract before the
//! write happens, and will then observe the stale value that the function read.
//! This is the classic withdrawal bug: checking a balance, transferring funds,
//! and only then reducing the balance.

use std::collections::BTreeSet;

use aurion_errors::analysis::{Error, Result};

use crate::{
    fuel::Fuel,
    ir::{
        cfg::Cfg,
        dataflow::{DefUse, Origin},
        types::Type,
        BlockId,
        FunctionKind,
        Instruction,
        IrContract,
        IrFunction,
        IrModule,
        Terminator,
    },
    issue::{Issue, Severity},
    pass::{
        analysis::summaries::{FunctionSummaries, FunctionSummariesData},
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
};

/// The decorator that declares a function to be protected against reentrancy
/// by means outside of the contract.
pub const NON_REENTRANT: &str = "nonReentrant";

/// Detects storage writes after external calls.
#[derive(Clone, Debug, PartialEq)]
pub struct Reentrancy {
    depends: Vec<PassKey>,
}

impl Reentrancy {
    /// Creates a new instance of the reentrancy detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![FunctionSummaries::key()];
        Box::new(Self { depends })
    }
}

impl PassOps for Reentrancy {
    fn name(&self) -> &'static str {
        "reentrancy"
    }

    fn run(
        &mut self,
        module: &IrModule,
        pass_data: &PassFacts,
        fuel: &mut Fuel,
    ) -> Result<PassOutput> {
        let summaries = pass_data
            .get::<FunctionSummaries>()
            .ok_or_else(|| Error::MissingDependency {
                pass:       self.name().to_string(),
                dependency: "function-summaries".to_string(),
            })?;

        let mut issues = Vec::new();
        for contract in &module.contracts {
            for function in contract.functions.iter().filter(|f| f.kind == FunctionKind::Public) {
                consume(fuel, self.name(), function.blocks.len() as u64 + 1)?;
                if let Some(field) = stale_field(contract, function, summaries) {
                    issues.push(
                        Issue::new(
                            self.name(),
                            Severity::High,
                            format!(
                                "`{}` calls out of the contract before writing `{field}`, which it \
                                 read before the call, so a reentrant call can observe the stale \
                                 value",
                                function.name
                            ),
                        )
                        .at(function.location)
                        .in_function(&function.name),
                    );
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

impl ConcretePass for Reentrancy {
    type Data = NoData;
}

/// The position of an instruction within a function.
type Position = (BlockId, usize);

/// Finds a field that `function` reads before an external call and writes
/// after it, if there is one.
fn stale_field(
    contract: &IrContract,
    function: &IrFunction,
    summaries: &FunctionSummariesData,
) -> Option<String> {
    if function.has_decorator(NON_REENTRANT) {
        return None;
    }

    let summary_of = |callee: &str| summaries.get(&contract.name, callee);
    let cfg = Cfg::new(function);
    let def_use = DefUse::new(function);

    let mut calls = Vec::new();
    let mut reads = Vec::<(Position, BTreeSet<String>)>::new();
    let mut writes = Vec::<(Position, BTreeSet<String>)>::new();
    for block in function.blocks.iter().filter(|b| cfg.is_reachable(b.id)) {
        for (index, instruction) in block.instructions.iter().enumerate() {
            let position = (block.id, index);
            match &instruction.node {
                Instruction::ExternalCall { .. } => calls.push(position),
                Instruction::LoadField { field, .. } => {
                    reads.push((position, BTreeSet::from([field.clone()])));
                }
                Instruction::StoreField { field, .. } => {
                    writes.push((position, BTreeSet::from([field.clone()])));
                }
                Instruction::Call { function, .. } => {
                    if let Some(summary) = summary_of(function) {
                        if summary.external_calls {
                            calls.push(position);
                        }
                        reads.push((position, summary.reads.clone()));
                        writes.push((position, summary.writes.clone()));
                    }
                }
                _ => {}
            }
        }
    }

    let locks = lock_stores(contract, function, &def_use);
    let precedes = |(from_block, from_index): Position, (to_block, to_index): Position| {
        (from_block == to_block && from_index < to_index) || cfg.reachable_from(from_block)[to_block]
    };

    calls
        .iter()
        .filter(|call| !locks.iter().any(|lock| covers(&cfg, *lock, **call)))
        .find_map(|call| {
            let read_before = reads
                .iter()
                .filter(|(position, _)| position == call || precedes(*position, *call))
                .flat_map(|(_, fields)| fields.iter().cloned())
                .collect::<BTreeSet<_>>();
            writes
                .iter()
                .filter(|(position, _)| position != call && precedes(*call, *position))
                .flat_map(|(_, fields)| fields.iter())
                .find(|field| read_before.contains(*field))
                .cloned()
        })
}

/// Checks if the instruction at `lock` always executes before the one at
/// `position`.
fn covers(cfg: &Cfg, (lock_block, lock_index): Position, (block, index): Position) -> bool {
    if lock_block == block {
        lock_index < index
    } else {
        cfg.dominates(lock_block, block)
    }
}

/// Finds the stores that take a lock: writes of `true` to a boolean field that
/// the function also requires to be unset.
fn lock_stores(contract: &IrContract, function: &IrFunction, def_use: &DefUse<'_>) -> Vec<Position> {
    let guarded = def_use
        .conditions()
        .into_iter()
        .filter(|(_, _, terminator)| matches!(terminator, Terminator::Guard { .. }))
        .flat_map(|(block, cond, _)| def_use.origins(block, cond))
        .filter_map(|origin| match origin {
            Origin::Field(field) => Some(field),
            _ => None,
        })
        .filter(|field| contract.field(field).is_some_and(|f| f.ty == Type::Bool))
        .collect::<BTreeSet<_>>();

    let mut stores = Vec::new();
    for block in &function.blocks {
        for (index, instruction) in block.instructions.iter().enumerate() {
            if let Instruction::StoreField {
                field,
                key: None,
                value,
            } = &instruction.node
            {
                let takes_lock = guarded.contains(field)
                    && def_use.origins(block.id, *value) == BTreeSet::from([Origin::Const(1)]);
                if takes_lock {
                    stores.push((block.id, index));
                }
            }
        }
    }
    stores
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::{detect::test::scan_with, detect::reentrancy::Reentrancy},
    };

    #[test]
    fn flags_a_transfer_before_the_balance_update() -> anyhow::Result<()> {
        let issues = scan_with(
            Reentrancy::new(),
            "contract Bank {\n balances: map<address, u64>\n withdraw(amount: u64) {\n require(self.balances[msg.sender] >= amount)\n transfer(msg.sender, amount)\n self.balances[msg.sender] -= amount\n }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].function.as_deref(), Some("withdraw"));
        assert_eq!(issues[0].location.map(|l| l.line), Some(3));

        Ok(())
    }

    #[test]
    fn accepts_checks_effects_interactions() -> anyhow::Result<()> {
        let issues = scan_with(
            Reentrancy::new(),
            "contract Bank {\n balances: map<address, u64>\n withdraw(amount: u64) {\n require(self.balances[msg.sender] >= amount)\n self.balances[msg.sender] -= amount\n transfer(msg.sender, amount)\n }\n}",
        )?;
        assert!(issues.is_empty());

        Ok(())
    }

    #[test]
    fn sees_through_helpers() -> anyhow::Result<()> {
        let issues = scan_with(
            Reentrancy::new(),
            "contract Bank {\n balances: map<address, u64>\n withdraw() {\n let amount = self.balances[msg.sender]\n self.pay(amount)\n self.balances[msg.sender] = 0\n }\n private pay(amount: u64) { transfer(msg.sender, amount) }\n}",
        )?;
        assert_eq!(issues.len(), 1);

        Ok(())
    }

    #[test]
    fn respects_locks_and_decorators() -> anyhow::Result<()> {
        let locked = scan_with(
            Reentrancy::new(),
            "contract Bank {\n balances: map<address, u64>\n lock: bool\n withdraw(amount: u64) {\n require(!self.lock)\n self.lock = true\n require(self.balances[msg.sender] >= amount)\n transfer(msg.sender, amount)\n self.balances[msg.sender] -= amount\n self.lock = false\n }\n}",
        )?;
        assert!(locked.is_empty());

        let decorated = scan_with(
            Reentrancy::new(),
            "contract Bank {\n balances: map<address, u64>\n @nonReentrant\n withdraw(amount: u64) {\n require(self.balances[msg.sender] >= amount)\n transfer(msg.sender, amount)\n self.balances[msg.sender] -= amount\n }\n}",
        )?;
        assert!(decorated.is_empty());

        Ok(())
    }
}
