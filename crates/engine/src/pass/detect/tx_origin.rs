//! Detects authorization decisions based on `tx.origin`.
//!
//! `tx.origin` is the account that started the transaction, not the one calling
//! the contract, so any contract the owner interacts with can act on their
//! behalf when a check relies on it.

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{cfg::Cfg, dataflow::{DefUse, Origin}, IrModule},
    issue::{Issue, Severity},
    pass::{
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
    syntax::ast::EnvVar,
};

/// Detects conditions that depend on `tx.origin`.
#[derive(Clone, Debug, PartialEq)]
pub struct TxOrigin {
    depends: Vec<PassKey>,
}

impl TxOrigin {
    /// Creates a new instance of the `tx.origin` detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for TxOrigin {
    fn name(&self) -> &'static str {
        "tx-origin"
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
            let def_use = DefUse::new(function);
            for (block, cond, _) in def_use.conditions() {
                consume(fuel, self.name(), 1)?;
                if !cfg.is_reachable(block)
                    || !def_use.origins(block, cond).contains(&Origin::Env(EnvVar::Origin))
                {
                    continue;
                }
                let Some(location) = function.block(block).map(|b| b.terminator.location) else {
                    continue;
                };
                issues.push(
                    Issue::new(
                        self.name(),
                        Severity::High,
                        format!(
                            "`{}` makes a decision based on `tx.origin`, which any contract the \
                             originator calls can exploit; use `msg.sender` instead",
                            function.name
                        ),
                    )
                    .at(location)
                    .in_function(&function.name),
                );
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

impl ConcretePass for TxOrigin {
    type Data = NoData;
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{test::scan_with, tx_origin::TxOrigin},
    };

    #[test]
    fn flags_checks_on_the_origin() -> anyhow::Result<()> {
        let issues = scan_with(
            TxOrigin::new(),
            "contract A {\n owner: address\n x: u64\n f() {\n require(tx.origin == self.owner)\n self.x = 1\n }\n g() {\n let o = tx.origin\n if o == self.owner { self.x = 2 }\n }\n}",
        )?;

        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::High));
        assert_eq!(issues[0].location.map(|l| l.line), Some(5));
        assert_eq!(issues[1].function.as_deref(), Some("g"));

        Ok(())
    }

    #[test]
    fn ignores_uses_outside_of_conditions() -> anyhow::Result<()> {
        let issues = scan_with(
            TxOrigin::new(),
            "contract A {\n owner: address\n f() { self.owner = tx.origin }\n}",
        )?;
        assert!(issues.is_empty());

        Ok(())
    }
}
