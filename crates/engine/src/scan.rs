//! The vulnerability scanner, which runs every detector over a lowered module.
//!
//! The scanner is a thin layer over the [`PassManager`]: it owns a prototype
//! manager configured with the default passes and clones it for every scan, so
//! that a single scanner can serve concurrent requests.

use aurion_errors::analysis::Result;
use serde::{Deserialize, Serialize};

use crate::{
    constant::DEFAULT_PASS_FUEL,
    ir::IrModule,
    issue::Issue,
    pass::{
        analysis::summaries::FunctionSummaries,
        detect::{
            access_control::AccessControl,
            arithmetic::UncheckedArithmetic,
            dead_store::DeadStore,
            reentrancy::Reentrancy,
            tx_origin::TxOrigin,
            unbounded_loop::UnboundedLoop,
            unchecked_call::UncheckedCall,
        },
        Pass,
        PassManager,
    },
};

/// The resource limits of the scanner.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct ScannerLimits {
    /// The number of steps each pass may take on a single module.
    pub pass_fuel: u64,
}

impl Default for ScannerLimits {
    fn default() -> Self {
        Self {
            pass_fuel: DEFAULT_PASS_FUEL,
        }
    }
}

/// The passes that the scanner runs by default: the function summary analysis
/// and every detector.
#[must_use]
pub fn default_passes() -> Vec<Pass> {
    vec![
        FunctionSummaries::new(),
        Reentrancy::new(),
        AccessControl::new(),
        UncheckedArithmetic::new(),
        DeadStore::new(),
        TxOrigin::new(),
        UncheckedCall::new(),
        UnboundedLoop::new(),
    ]
}

/// Runs the detectors over lowered modules.
#[derive(Clone, Debug)]
pub struct Scanner {
    passes: PassManager,
}

impl Scanner {
    /// Creates a scanner running the [`default_passes`] within `limits`.
    ///
    /// # Errors
    ///
    /// - [`aurion_errors::analysis::Error::InvalidPassOrdering`] if the
    ///   default passes cannot be ordered, which indicates a bug.
    pub fn new(limits: ScannerLimits) -> Result<Self> {
        Self::with_passes(default_passes(), limits)
    }

    /// Creates a scanner running the provided `passes` within `limits`.
    ///
    /// # Errors
    ///
    /// - [`aurion_errors::analysis::Error::InvalidPassOrdering`] if the passes
    ///   have duplicates, missing dependencies or dependency cycles.
    pub fn with_passes(passes: Vec<Pass>, limits: ScannerLimits) -> Result<Self> {
        let passes = PassManager::new(passes)?.with_fuel(limits.pass_fuel);
        Ok(Self { passes })
    }

    /// Scans `module`, returning every issue found sorted by location.
    ///
    /// A detector that fails is reported as a single low-severity issue, and
    /// never prevents the other detectors from reporting.
    #[must_use]
    pub fn scan(&self, module: &IrModule) -> Vec<Issue> {
        let _span = tracing::debug_span!("scan", contracts = module.contracts.len()).entered();
        let mut passes = self.passes.clone();
        passes.run(module).issues
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::lower::lower,
        issue::Severity,
        pass::ANALYSIS_INCOMPLETE,
        scan::{Scanner, ScannerLimits},
        syntax::parse,
    };

    const WITHDRAW: &str = "contract Bank {
  balances: map<address, u64>

  deposit() {
    self.balances[msg.sender] += msg.value
  }

  withdraw(amount: u64) {
    require(self.balances[msg.sender] >= amount)
    transfer(msg.sender, amount)
    self.balances[msg.sender] -= amount
  }
}";

    #[test]
    fn reports_the_withdraw_bug_once() -> anyhow::Result<()> {
        let ast = parse(WITHDRAW).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let module = lower(&ast, &LineIndex::new(WITHDRAW)).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let scanner = Scanner::new(ScannerLimits::default())?;

        let issues = scanner.scan(&module);
        let high = issues
            .iter()
            .filter(|i| i.severity == Severity::High)
            .collect::<Vec<_>>();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].id, "reentrancy");
        assert!(issues.iter().all(|i| i.id != ANALYSIS_INCOMPLETE));

        assert_eq!(scanner.scan(&module), issues);

        Ok(())
    }

    #[test]
    fn starved_passes_degrade_to_advisories() -> anyhow::Result<()> {
        let ast = parse(WITHDRAW).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let module = lower(&ast, &LineIndex::new(WITHDRAW)).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let scanner = Scanner::new(ScannerLimits { pass_fuel: 1 })?;

        let issues = scanner.scan(&module);
        assert!(!issues.is_empty());
        assert!(issues
            .iter()
            .all(|i| i.id == ANALYSIS_INCOMPLETE && i.severity == Severity::Low));

        Ok(())
    }
}
