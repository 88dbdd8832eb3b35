//! Detects public functions that mutate shared state without checking who is
//! calling them.
//!
//! A write is protected if it can only execute after the sender has been
//! compared against an address that the contract stores. Writes to map entries
//! keyed by the sender itself are not shared state, as every caller can only
//! ever touch their own entry.

use aurion_errors::analysis::{Error, Result};

use crate::{
    fuel::Fuel,
    ir::{cfg::Cfg, dataflow::DefUse, FunctionKind, Instruction, IrContract, IrFunction, IrModule},
    issue::{Issue, Severity},
    pass::{
        analysis::summaries::{
            is_sender_keyed,
            sender_checkpoints,
            FunctionSummaries,
            FunctionSummariesData,
        },
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
};

/// Detects unprotected writes to shared storage.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessControl {
    depends: Vec<PassKey>,
}

impl AccessControl {
    /// Creates a new instance of the access control detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![FunctionSummaries::key()];
        Box::new(Self { depends })
    }
}

impl PassOps for AccessControl {
    fn name(&self) -> &'static str {
        "missing-access-control"
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
                if let Some(field) = unprotected_write(contract, function, summaries) {
                    issues.push(
                        Issue::new(
                            self.name(),
                            Severity::High,
                            format!(
                                "`{}` writes `{field}` but anybody can call it, as it never \
                                 checks `msg.sender` against a stored address",
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

impl ConcretePass for AccessControl {
    type Data = NoData;
}

/// Finds a field of shared storage that `function` can write before checking
/// the sender, if there is one.
fn unprotected_write(
    contract: &IrContract,
    function: &IrFunction,
    summaries: &FunctionSummariesData,
) -> Option<String> {
    let cfg = Cfg::new(function);
    let def_use = DefUse::new(function);
    let checkpoints = sender_checkpoints(contract, function, &def_use, |callee| {
        summaries.checks_sender(&contract.name, callee)
    });

    for block in function.blocks.iter().filter(|b| cfg.is_reachable(b.id)) {
        for (index, instruction) in block.instructions.iter().enumerate() {
            let written = match &instruction.node {
                Instruction::StoreField { field, key, .. } => {
                    (!is_sender_keyed(&def_use, block.id, *key)).then(|| field.clone())
                }
                Instruction::Call { function: callee, .. } => summaries
                    .get(&contract.name, callee)
                    .filter(|s| !s.checks_sender)
                    .and_then(|s| s.shared_writes.first().cloned()),
                _ => None,
            };
            let Some(field) = written else {
                continue;
            };
            if !checkpoints.iter().any(|c| c.covers(&cfg, block.id, index)) {
                return Some(field);
            }
        }
    }

    None
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{access_control::AccessControl, test::scan_with},
    };

    #[test]
    fn flags_an_unguarded_owner_change() -> anyhow::Result<()> {
        let issues = scan_with(
            AccessControl::new(),
            "contract A {\n owner: address\n set_owner(o: address) { self.owner = o }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::High);
        assert_eq!(issues[0].function.as_deref(), Some("set_owner"));

        Ok(())
    }

    #[test]
    fn accepts_the_ways_of_checking_the_sender() -> anyhow::Result<()> {
        let issues = scan_with(
            AccessControl::new(),
            "contract A {\n owner: address\n x: u64\n balances: map<address, u64>\n init() { self.owner = msg.sender }\n a() { require(msg.sender == self.owner)\n self.x = 1 }\n b() { if msg.sender != self.owner { revert(\"no\") }\n self.x = 2 }\n c() { self.only_owner()\n self.x = 3 }\n d() { self.balances[msg.sender] = 4 }\n private only_owner() { require(msg.sender == self.owner) }\n}",
        )?;
        assert!(issues.is_empty(), "{issues:?}");

        Ok(())
    }

    #[test]
    fn a_check_on_one_branch_does_not_protect_the_other() -> anyhow::Result<()> {
        let issues = scan_with(
            AccessControl::new(),
            "contract A {\n owner: address\n x: u64\n f(c: bool) {\n if c { require(msg.sender == self.owner) }\n self.x = 1\n }\n}",
        )?;
        assert_eq!(issues.len(), 1);

        Ok(())
    }

    #[test]
    fn sees_writes_through_helpers() -> anyhow::Result<()> {
        let issues = scan_with(
            AccessControl::new(),
            "contract A {\n x: u64\n f() { self.set() }\n private set() { self.x = 1 }\n}",
        )?;
        assert_eq!(issues.len(), 1);

        Ok(())
    }
}
