//! This library implements the code intelligence engine behind the Aurion
//! smart contract language: everything an editor needs to check, improve and
//! exercise an Aurion contract without deploying it anywhere.
//!
//! # Process Overview
//!
//! While more information can be found in the module-level documentation of
//! each part of this codebase, a brief overview of how a request is served can
//! be stated as follows:
//!
//! 1. We parse the source text into an [`syntax::ast::Ast`], recovering from
//!    errors so that one typo does not hide the rest of the diagnostics.
//! 2. We lower that tree into the typed control-flow graph IR of the [`ir`]
//!    module, resolving names and checking types along the way.
//! 3. We run analyses over the IR: the vulnerability [`scan`]ner, the bounded
//!    property [`verify`]er, the test generator in [`testgen`] and the
//!    multi-chain [`simulate`]or.
//!
//! Two operations stand apart from this pipeline. The [`optimize`]r works on
//! AVM bytecode buffers produced elsewhere, and [`complete`]ion works on the
//! raw text of the file being edited.
//!
//! # Partial Results
//!
//! The source the engine works on is untrusted and usually incomplete, as it
//! is being edited. Every stage therefore degrades instead of failing: a
//! stage that cannot finish reports why in the [`AnalysisReport`], and the
//! stages after it work with whatever it did produce.

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming
#![allow(clippy::multiple_crate_versions)] // Enforced by our dependencies

pub mod assess;
pub mod complete;
pub mod config;
pub mod constant;
pub mod fuel;
pub mod ir;
pub mod issue;
pub mod optimize;
pub mod pass;
pub mod scan;
pub mod simulate;
pub mod source;
pub mod syntax;
pub mod testgen;
pub mod verify;

use std::{collections::BTreeMap, fmt, sync::Arc};

use aurion_errors::{
    location::LineIndex,
    semantic::SemanticError,
    syntax::SyntaxDiagnostic,
    Error,
    Result,
};
use serde::Serialize;

use crate::{
    assess::{assess, Assessment},
    complete::{CompletionProvider, FileContext, Suggestion},
    config::EngineConfig,
    constant::HOME_CHAIN,
    ir::{lower::lower_partial, IrModule},
    issue::Issue,
    optimize::{OptimizationResult, Optimizer},
    pass::ANALYSIS_INCOMPLETE,
    scan::Scanner,
    simulate::{ChainDescriptor, DeclarativeProfiles, GasReport, ProfileSource, SimulationResult, Simulator},
    source::{ParseCache, SourceFile},
    syntax::ast::Ast,
    testgen::TestSuite,
    verify::{PropertySpec, VerificationResult, Verifier},
};

/// How far a stage of an analysis got.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "kebab-case")]
pub enum StageStatus {
    Completed,

    /// The stage finished, but its results are partial.
    Degraded(String),

    /// The stage did not run.
    Skipped(String),
}

/// The status of one named stage of an analysis.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct StageReport {
    pub stage:  &'static str,
    pub status: StageStatus,
}

impl StageReport {
    fn new(stage: &'static str, status: StageStatus) -> Self {
        Self { stage, status }
    }
}

impl fmt::Display for StageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            StageStatus::Completed => write!(f, "{}: completed", self.stage),
            StageStatus::Degraded(reason) => write!(f, "{}: degraded ({reason})", self.stage),
            StageStatus::Skipped(reason) => write!(f, "{}: skipped ({reason})", self.stage),
        }
    }
}

/// Everything an analysis of a source file found.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisReport {
    pub issues:          Vec<Issue>,
    pub verification:    Vec<VerificationResult>,
    pub diagnostics:     Vec<SyntaxDiagnostic>,
    pub semantic_errors: Vec<SemanticError>,

    /// The worst-case gas of every entry point on the home chain.
    pub gas: Option<GasReport>,

    /// The scores and recommendations derived from the issues and gas.
    pub assessment: Assessment,

    /// The status of each stage, in the order they ran.
    pub stages: Vec<StageReport>,
}

impl AnalysisReport {
    /// Checks if every stage completed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stages.iter().all(|s| s.status == StageStatus::Completed)
    }
}

/// The result of a request that covers whatever parts of a file lowered.
///
/// The functions named in `semantic_errors` are missing from the `value`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Partial<T> {
    pub value:           T,
    pub semantic_errors: Vec<SemanticError>,
}

impl<T> Partial<T> {
    /// Checks if every part of the file contributed to the value.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.semantic_errors.is_empty()
    }
}

/// The entry point to the engine, serving every request on source files,
/// bytecode buffers and editor contexts.
///
/// An engine holds no per-request state and can serve concurrent requests
/// from many threads. The only thing it shares between requests is a cache of
/// parse results, which never changes what a request returns.
#[derive(Debug)]
pub struct Engine {
    config:     EngineConfig,
    scanner:    Scanner,
    verifier:   Verifier,
    optimizer:  Optimizer,
    simulator:  Simulator,
    completion: Arc<dyn CompletionProvider>,
    cache:      ParseCache,
}

impl Engine {
    /// The configuration the engine was built with.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parses `file` into a tree.
    ///
    /// # Errors
    ///
    /// - Every syntax diagnostic found in the file, if there is at least one.
    pub fn parse(&self, file: &SourceFile) -> std::result::Result<Ast, Vec<SyntaxDiagnostic>> {
        let outcome = self.cache.parse(file);
        if outcome.is_ok() {
            Ok(outcome.ast.clone())
        } else {
            Err(outcome.diagnostics.clone())
        }
    }

    /// Parses and lowers `file`.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] if the file does not parse.
    /// - [`Error::Semantic`] if any part of the file does not lower.
    pub fn lower(&self, file: &SourceFile) -> Result<IrModule> {
        let (module, errors) = self.lower_what_we_can(file)?;
        if errors.is_empty() {
            Ok(module)
        } else {
            Err(Error::Semantic(errors))
        }
    }

    /// Lowers `file` and then scans it, and verifies the properties inferred
    /// from it.
    #[must_use]
    pub fn analyze(&self, file: &SourceFile) -> AnalysisReport {
        self.analyze_with(file, &[])
    }

    /// Lowers `file` and then scans it, and verifies the provided
    /// `properties` as well as those inferred from it.
    ///
    /// Syntax and semantic errors do not stop the analysis, which continues
    /// on whatever parts of the file could be lowered.
    #[must_use]
    pub fn analyze_with(&self, file: &SourceFile, properties: &[PropertySpec]) -> AnalysisReport {
        let _span = tracing::info_span!("analyze", path = %file.path).entered();
        let mut report = AnalysisReport::default();

        let outcome = self.cache.parse(file);
        report.diagnostics.clone_from(&outcome.diagnostics);
        report.stages.push(StageReport::new("parse", match outcome.diagnostics.len() {
            0 => StageStatus::Completed,
            n => StageStatus::Degraded(format!("{n} syntax error(s)")),
        }));

        let (module, errors) = lower_partial(&outcome.ast, &LineIndex::new(&file.content));
        report.stages.push(StageReport::new("lower", match errors.len() {
            0 => StageStatus::Completed,
            n => StageStatus::Degraded(format!("{n} semantic error(s)")),
        }));
        report.semantic_errors = errors;

        if module.contracts.is_empty() {
            for stage in ["scan", "verify"] {
                let status = StageStatus::Skipped("there is nothing to analyze".to_string());
                report.stages.push(StageReport::new(stage, status));
            }
            report.assessment = assess(&report.issues, None);
            return report;
        }

        report.issues = self.scanner.scan(&module);
        let incomplete = report
            .issues
            .iter()
            .filter(|i| i.id == ANALYSIS_INCOMPLETE)
            .count();
        report.stages.push(StageReport::new("scan", match incomplete {
            0 => StageStatus::Completed,
            n => StageStatus::Degraded(format!("{n} pass(es) did not complete")),
        }));

        let mut properties = properties.to_vec();
        for inferred in PropertySpec::infer(&module) {
            if !properties.contains(&inferred) {
                properties.push(inferred);
            }
        }
        report.verification = self.verifier.verify(&module, &properties);
        let unknown = report
            .verification
            .iter()
            .filter(|r| matches!(r, VerificationResult::Unknown { .. }))
            .count();
        report.stages.push(StageReport::new("verify", match unknown {
            0 => StageStatus::Completed,
            n => StageStatus::Degraded(format!("{n} propert(ies) could not be decided")),
        }));

        report.gas = self
            .simulator
            .estimate_gas(&module, &ChainDescriptor::new(HOME_CHAIN, ""));
        report.assessment = assess(&report.issues, report.gas.as_ref());
        tracing::debug!(
            security = report.assessment.security_score,
            overall = report.assessment.overall_score,
            "assessed analysis"
        );

        for stage in &report.stages {
            if stage.status != StageStatus::Completed {
                tracing::warn!(%stage, "analysis stage did not complete");
            }
        }
        report
    }

    /// Optimizes the AVM bytecode in `bytes`.
    #[must_use]
    pub fn optimize(&self, bytes: &[u8]) -> OptimizationResult {
        self.optimizer.optimize(bytes)
    }

    /// Offers completions for the file and cursor in `context`.
    #[must_use]
    pub fn complete(&self, context: &FileContext) -> Vec<Suggestion> {
        self.completion.complete(context)
    }

    /// Generates a test suite for `file`, with adversarial tests for the
    /// issues and violated properties that an analysis finds.
    ///
    /// Functions that do not lower are left out of the suite and reported
    /// alongside it.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] if the file does not parse.
    pub fn generate_tests(&self, file: &SourceFile) -> Result<Partial<TestSuite>> {
        let (module, semantic_errors) = self.lower_what_we_can(file)?;
        let issues = self.scanner.scan(&module);
        let results = self.verifier.verify(&module, &PropertySpec::infer(&module));
        Ok(Partial {
            value: testgen::generate_tests_with(&module, &issues, &results),
            semantic_errors,
        })
    }

    /// Simulates `file` against each of `chains`.
    ///
    /// Functions that do not lower are left out of the simulation and
    /// reported alongside the results.
    ///
    /// # Errors
    ///
    /// - [`Error::Syntax`] if the file does not parse.
    pub fn simulate(
        &self,
        file: &SourceFile,
        chains: &[ChainDescriptor],
    ) -> Result<Partial<BTreeMap<String, SimulationResult>>> {
        let (module, semantic_errors) = self.lower_what_we_can(file)?;
        Ok(Partial {
            value: self.simulator.simulate(&module, chains),
            semantic_errors,
        })
    }

    fn lower_what_we_can(&self, file: &SourceFile) -> Result<(IrModule, Vec<SemanticError>)> {
        let ast = self.parse(file).map_err(Error::Syntax)?;
        let (module, errors) = lower_partial(&ast, &LineIndex::new(&file.content));
        if !errors.is_empty() {
            tracing::warn!(path = %file.path, errors = errors.len(), "parts of the file did not lower");
        }
        Ok((module, errors))
    }
}

/// Allows for building an [`Engine`] instance while retaining the defaults
/// for anything that does not need to be customized.
#[derive(Debug, Default)]
pub struct EngineBuilder {
    config:     EngineConfig,
    completion: Option<Arc<dyn CompletionProvider>>,
    profiles:   Option<Arc<dyn ProfileSource>>,
    optimizer:  Option<Optimizer>,
}

impl EngineBuilder {
    /// Creates a new builder with the default configuration.
    ///
    /// # API Style
    ///
    /// Please note that the API for the builder consumes `self` and is hence
    /// designed to have calls chained in the "fluent" API style.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Specifies the configuration for the engine.
    ///
    /// # API Style
    ///
    /// Please note that the API for the builder consumes `self` and is hence
    /// designed to have calls chained in the "fluent" API style.
    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Specifies the completion provider, overriding the one that the
    /// configuration selects.
    #[must_use]
    pub fn with_completion(mut self, provider: Arc<dyn CompletionProvider>) -> Self {
        self.completion = Some(provider);
        self
    }

    /// Specifies where chain profiles come from, instead of the built-in
    /// [`DeclarativeProfiles`].
    #[must_use]
    pub fn with_profiles(mut self, profiles: Arc<dyn ProfileSource>) -> Self {
        self.profiles = Some(profiles);
        self
    }

    /// Specifies the optimizer, instead of one running the default
    /// transformations within the configured limits.
    #[must_use]
    pub fn with_optimizer(mut self, optimizer: Optimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    /// Builds an engine from the specified configuration.
    ///
    /// # Errors
    ///
    /// - [`Error::Analysis`] if the scanner's passes cannot be ordered, which
    ///   indicates a bug.
    pub fn build(self) -> Result<Engine> {
        let config = self.config;
        let profiles = self
            .profiles
            .unwrap_or_else(|| Arc::new(DeclarativeProfiles::builtin()));
        Ok(Engine {
            scanner:    Scanner::new(config.scanner)?,
            verifier:   Verifier::new(config.verifier),
            optimizer:  self.optimizer.unwrap_or_else(|| Optimizer::new(config.optimizer)),
            simulator:  Simulator::new(profiles).with_loop_bound(config.simulation.loop_bound),
            completion: self.completion.unwrap_or_else(|| config.completion.provider()),
            cache:      ParseCache::new(),
            config,
        })
    }
}

#[cfg(test)]
mod test {
    use crate::{simulate::ChainDescriptor, source::SourceFile, EngineBuilder, StageStatus};

    const HALF_BROKEN: &str = "contract A {\n  x: u64\n  good() { self.x = 1 }\n  bad() { self.x = nope }\n}";

    #[test]
    fn engines_can_be_shared_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<crate::Engine>();
    }

    #[test]
    fn analysis_degrades_on_broken_source() -> anyhow::Result<()> {
        let engine = EngineBuilder::new().build()?;
        let file = SourceFile::new(
            "broken.aur",
            "contrct A { }\ncontract B {\n  y: u64\n  g() {\n    self.y = 2\n  }\n}",
        );
        let report = engine.analyze(&file);

        assert!(!report.diagnostics.is_empty());
        assert!(matches!(report.stages[0].status, StageStatus::Degraded(_)));
        assert!(!report.is_complete());
        assert!(report.issues.iter().any(|i| i.function.as_deref() == Some("g")));

        Ok(())
    }

    #[test]
    fn empty_files_skip_the_analyses() -> anyhow::Result<()> {
        let engine = EngineBuilder::new().build()?;
        let report = engine.analyze(&SourceFile::new("empty.aur", ""));

        assert!(report.diagnostics.is_empty());
        assert_eq!(report.stages.len(), 4);
        assert!(matches!(report.stages[2].status, StageStatus::Skipped(_)));

        Ok(())
    }

    #[test]
    fn test_generation_covers_the_functions_that_lower() -> anyhow::Result<()> {
        let engine = EngineBuilder::new().build()?;
        let suite = engine.generate_tests(&SourceFile::new("half.aur", HALF_BROKEN))?;

        assert!(!suite.is_complete());
        assert_eq!(suite.semantic_errors.len(), 1);
        assert_eq!(suite.semantic_errors[0].function.as_deref(), Some("bad"));
        assert!(suite.value.targets().contains(&("A", "good")));
        assert!(!suite.value.targets().contains(&("A", "bad")));

        Ok(())
    }

    #[test]
    fn simulation_covers_the_functions_that_lower() -> anyhow::Result<()> {
        let engine = EngineBuilder::new().build()?;
        let file = SourceFile::new("half.aur", HALF_BROKEN);
        let results = engine.simulate(&file, &[ChainDescriptor::new("Aurlink VM", "")])?;

        assert_eq!(results.semantic_errors.len(), 1);
        assert!(results.value["Aurlink VM"].passed);

        Ok(())
    }

    #[test]
    fn analysis_scores_and_prices_the_contract() -> anyhow::Result<()> {
        let engine = EngineBuilder::new().build()?;
        let file = SourceFile::new("owned.aur", "contract A {\n  owner: address\n  set(o: address) {\n    self.owner = o\n  }\n}");
        let report = engine.analyze(&file);

        let gas = report.gas.as_ref().ok_or_else(|| anyhow::anyhow!("no gas report"))?;
        assert!(gas.functions.get("A.set").is_some_and(|g| *g > 0));
        assert!(report.assessment.security_score < 100);
        assert!(report
            .assessment
            .recommendations
            .iter()
            .any(|r| r.contains("sender")));

        Ok(())
    }
}
