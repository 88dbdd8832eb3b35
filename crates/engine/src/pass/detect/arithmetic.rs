//! Detects wrapping arithmetic whose result is persisted without any bounds
//! check.
//!
//! Arithmetic in Aurion wraps at the declared width. An addition, subtraction
//! or multiplication is considered checked if some `require`, `assert` or
//! branch condition mentions one of the things its operands are derived from,
//! and that condition is evaluated on every path to the operation or on every
//! path from it.

use std::collections::BTreeSet;

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{
        cfg::Cfg,
        dataflow::{DefUse, Origin},
        BlockId,
        Instruction,
        IrModule,
    },
    issue::{Issue, Severity},
    pass::{
        consume,
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
        Pass,
        PassKey,
        PassOps,
    },
    syntax::ast::BinaryOp,
};

/// Detects unchecked arithmetic that reaches storage.
#[derive(Clone, Debug, PartialEq)]
pub struct UncheckedArithmetic {
    depends: Vec<PassKey>,
}

impl UncheckedArithmetic {
    /// Creates a new instance of the unchecked arithmetic detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for UncheckedArithmetic {
    fn name(&self) -> &'static str {
        "unchecked-arithmetic"
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
            let conditions = def_use
                .conditions()
                .into_iter()
                .map(|(block, cond, _)| (block, def_use.origins(block, cond)))
                .collect::<Vec<_>>();

            for (block, instruction) in function.instructions() {
                consume(fuel, self.name(), 1)?;
                let Instruction::Binary {
                    dest,
                    op,
                    ty,
                    lhs,
                    rhs,
                } = &instruction.node
                else {
                    continue;
                };
                let wraps = matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul);
                if !wraps || !cfg.is_reachable(block) {
                    continue;
                }

                let origins = def_use
                    .origins(block, *lhs)
                    .into_iter()
                    .chain(def_use.origins(block, *rhs))
                    .filter(|o| !o.is_const())
                    .collect::<BTreeSet<_>>();
                if origins.is_empty() || !def_use.reaches_store(block, *dest) {
                    continue;
                }
                if is_checked(&cfg, block, &origins, &conditions) {
                    continue;
                }

                issues.push(
                    Issue::new(
                        self.name(),
                        Severity::Medium,
                        format!(
                            "`{}` on `{ty}` in `{}` can wrap around, and its result is stored \
                             without a bounds check",
                            op.as_str(),
                            function.name
                        ),
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

impl ConcretePass for UncheckedArithmetic {
    type Data = NoData;
}

/// Checks if an operation in `block` deriving from `origins` is bounded by
/// one of the `conditions`.
fn is_checked(
    cfg: &Cfg,
    block: BlockId,
    origins: &BTreeSet<Origin>,
    conditions: &[(BlockId, BTreeSet<Origin>)],
) -> bool {
    conditions.iter().any(|(cond_block, cond_origins)| {
        !cond_origins.is_disjoint(origins)
            && (cfg.dominates(*cond_block, block) || cfg.dominates(block, *cond_block))
    })
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{arithmetic::UncheckedArithmetic, test::scan_with},
    };

    #[test]
    fn flags_unbounded_accumulation() -> anyhow::Result<()> {
        let issues = scan_with(
            UncheckedArithmetic::new(),
            "contract A {\n total: u64\n add(n: u64) {\n self.total = self.total + n\n }\n}",
        )?;

        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Medium);
        assert_eq!(issues[0].location.map(|l| l.line), Some(4));

        Ok(())
    }

    #[test]
    fn accepts_guarded_or_unstored_arithmetic() -> anyhow::Result<()> {
        let issues = scan_with(
            UncheckedArithmetic::new(),
            "contract A {\n total: u64\n add(n: u64) {\n require(n < 100)\n self.total += n\n }\n sub(n: u64) {\n let t = self.total - n\n require(t < self.total)\n self.total = t\n }\n peek(n: u64) -> u64 { return self.total * n }\n reset() { self.total = 1 + 2 }\n}",
        )?;
        assert!(issues.is_empty(), "{issues:?}");

        Ok(())
    }
}
