//! The vulnerability detectors run by the scanner.
//!
//! Each detector is an independent pass producing [`crate::issue::Issue`]s and
//! no data, so that the pass manager is free to run all of them in parallel
//! once the analyses they depend on have finished.

pub mod access_control;
pub mod arithmetic;
pub mod dead_store;
pub mod reentrancy;
pub mod tx_origin;
pub mod unbounded_loop;
pub mod unchecked_call;

#[cfg(test)]
pub mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::lower::lower,
        issue::Issue,
        pass::{analysis::summaries::FunctionSummaries, Pass, PassManager},
        syntax::parse,
    };

    /// Runs `pass` on `source`, together with the analyses the detectors
    /// depend on, and returns the issues found.
    pub fn scan_with(pass: Pass, source: &str) -> anyhow::Result<Vec<Issue>> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        let module = lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let mut manager = PassManager::new(vec![FunctionSummaries::new(), pass])?;

        Ok(manager.run(&module).issues)
    }
}
