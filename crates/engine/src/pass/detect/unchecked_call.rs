//! Detects low-level calls whose success flag is ignored.
//!
//! Unlike `transfer`, a failing `call` does not revert the transaction. If the
//! result never influences a branch or guard, the function carries on as though
//! the funds had been delivered.

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{cfg::Cfg, dataflow::DefUse, Instruction, IrModule},
    issue::{Issue, Severity},
    pass::{
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
    syntax::ast::ExternalKind,
};

/// Detects calls whose result is never checked.
#[derive(Clone, Debug, PartialEq)]
pub struct UncheckedCall {
    depends: Vec<PassKey>,
}

impl UncheckedCall {
    /// Creates a new instance of the unchecked call detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for UncheckedCall {
    fn name(&self) -> &'static str {
        "unchecked-call"
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
            for (block, instruction) in function.instructions() {
                consume(fuel, self.name(), 1)?;
                let Instruction::ExternalCall {
                    dest,
                    kind: ExternalKind::Call,
                    ..
                } = &instruction.node
                else {
                    continue;
                };
                if !cfg.is_reachable(block) || def_use.reaches_condition(block, *dest) {
                    continue;
                }
                issues.push(
                    Issue::new(
                        self.name(),
                        Severity::Medium,
                        "The result of this `call` is never checked, so a failed call goes \
                         unnoticed",
                    )
                    .at(instruction.location)
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

impl ConcretePass for UncheckedCall {
    type Data = NoData;
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{test::scan_with, unchecked_call::UncheckedCall},
    };

    #[test]
    fn flags_ignored_results() -> anyhow::Result<()> {
        let issues = scan_with(
            UncheckedCall::new(),
            "contract A {\n pay(to: address, amount: u64) {\n call(to, amount)\n }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].location.map(|l| l.line), Some(3));

        Ok(())
    }

    #[test]
    fn accepts_checked_results_and_transfers() -> anyhow::Result<()> {
        let issues = scan_with(
            UncheckedCall::new(),
            "contract A {\n pay(to: address, amount: u64) {\n let ok = call(to, amount)\n require(ok)\n transfer(to, amount)\n }\n}",
        )?;
        assert!(issues.is_empty());

        Ok(())
    }
}
