//! Detects loops in public functions whose trip count is controlled by the
//! caller or by storage.
//!
//! A loop bounded by a value that callers can grow without limit, such as the
//! length of a list kept in storage, eventually costs more gas than fits in a
//! block, and every transaction calling the function then fails.

use aurion_errors::analysis::Result;

use crate::{
    fuel::Fuel,
    ir::{
        cfg::Cfg,
        dataflow::{DefUse, Origin},
        BasicBlock,
        FunctionKind,
        IrModule,
        Terminator,
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
};

/// Detects loops without a constant bound.
#[derive(Clone, Debug, PartialEq)]
pub struct UnboundedLoop {
    depends: Vec<PassKey>,
}

impl UnboundedLoop {
    /// Creates a new instance of the unbounded loop detector.
    #[must_use]
    pub fn new() -> Box<Self> {
        let depends = vec![];
        Box::new(Self { depends })
    }
}

impl PassOps for UnboundedLoop {
    fn name(&self) -> &'static str {
        "unbounded-loop"
    }

    fn run(
        &mut self,
        module: &IrModule,
        _pass_data: &PassFacts,
        fuel: &mut Fuel,
    ) -> Result<PassOutput> {
        let mut issues = Vec::new();
        let public = module
            .functions()
            .filter(|(_, f)| f.kind == FunctionKind::Public);

        for (_, function) in public {
            let cfg = Cfg::new(function);
            let def_use = DefUse::new(function);
            let mut headers = cfg
                .back_edges()
                .into_iter()
                .map(|(_, header)| header)
                .collect::<Vec<_>>();
            headers.sort_unstable();
            headers.dedup();

            for header in headers {
                consume(fuel, self.name(), 1)?;
                let Some(block) = function.block(header) else {
                    continue;
                };
                if is_unbounded(&def_use, block) {
                    issues.push(
                        Issue::new(
                            self.name(),
                            Severity::Medium,
                            format!(
                                "This loop in `{}` runs for as long as a value that callers or \
                                 storage control allows, which can exceed the gas limit",
                                function.name
                            ),
                        )
                        .at(block.terminator.location)
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

impl ConcretePass for UnboundedLoop {
    type Data = NoData;
}

/// Checks if the condition of the loop whose header is `header` depends on
/// anything but constants and the loop's own locals.
fn is_unbounded(def_use: &DefUse<'_>, header: &BasicBlock) -> bool {
    let Terminator::Branch { cond, .. } = &header.terminator.node else {
        return false;
    };

    def_use
        .origins(header.id, *cond)
        .iter()
        .any(|origin| !matches!(origin, Origin::Const(_)))
}

#[cfg(test)]
mod test {
    use crate::{
        issue::Severity,
        pass::detect::{test::scan_with, unbounded_loop::UnboundedLoop},
    };

    #[test]
    fn flags_loops_bounded_by_storage_or_arguments() -> anyhow::Result<()> {
        let issues = scan_with(
            UnboundedLoop::new(),
            "contract A {\n count: u64\n total: u64\n f() {\n let i = 0\n while i < self.count {\n self.total += i\n i += 1\n }\n }\n g(n: u64) {\n let i = 0\n while i < n { i += 1 }\n }\n}",
        )?;

        assert_eq!(issues.len(), 2);
        assert!(issues.iter().all(|i| i.severity == Severity::Medium));
        assert_eq!(issues[0].location.map(|l| l.line), Some(6));

        Ok(())
    }

    #[test]
    fn accepts_constant_bounds_and_private_helpers() -> anyhow::Result<()> {
        let issues = scan_with(
            UnboundedLoop::new(),
            "contract A {\n total: u64\n f() {\n let i = 0\n while i < 10 {\n self.total += i\n i += 1\n }\n }\n private g(n: u64) {\n let i = 0\n while i < n { i += 1 }\n }\n}",
        )?;
        assert!(issues.is_empty(), "{issues:?}");

        Ok(())
    }
}
