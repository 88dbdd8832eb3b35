//! This module contains both the definition of the [`Pass`] type and the
//! [`PassManager`] object that the vulnerability scanner is built on.
//!
//! Every Pass should implement [`ConcretePass`], as this provides the full set
//! of features required of a pass. It is also expected that each pass provide a
//! type-specific constructor function called `new`.
//!
//! # Passes
//!
//! A pass is a self-contained unit of functionality that examines the IR. They
//! tend to fall into the following two categories:
//!
//! - **Analysis:** These examine the structure of the IR to infer information
//!   about it that other passes build on, and return it as pass data.
//! - **Detection:** These look for a specific class of problem in the IR and
//!   report each occurrence as an [`Issue`].
//!
//! # Isolation
//!
//! The IR that passes examine is untrusted, so each pass runs in isolation: it
//! draws on its own [`Fuel`] budget, and a pass that fails, runs out of fuel,
//! panics, or depends on a pass that did any of these is reported as a single
//! low-severity `analysis-incomplete` issue. Its siblings are unaffected.

pub mod analysis;
pub mod data;
pub mod detect;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt::Debug,
    panic::{catch_unwind, AssertUnwindSafe},
};

use aurion_errors::analysis::{Error, Result};
use downcast_rs::Downcast;
use rayon::prelude::*;

use crate::{
    constant::DEFAULT_PASS_FUEL,
    fuel::Fuel,
    ir::IrModule,
    issue::{Issue, Severity},
    pass::data::{ConcretePassData, PassFacts, PassOutput},
};

/// A pass is a self-contained unit of functionality that performs some
/// operation over the IR.
pub type Pass = Box<dyn PassOps>;

/// A handle that uniquely identifies the pass.
pub type PassKey = TypeId;

/// The identifier of the issue that reports a pass failure.
pub const ANALYSIS_INCOMPLETE: &str = "analysis-incomplete";

/// The operations that we expect one of our passes to have.
///
/// The implementation is designed to be used via dynamic dispatch, and hence
/// can provide the requisite operations however it is able.
///
/// # Self Bounds
///
/// The bounds on `Self` are required by these traits for the following reasons:
///
/// - [`Any`] allows downcasting to concrete implementations of the pass if
///   needed.
/// - [`Debug`] to provide representations to aid in debugging. It is
///   recommended to use the derive feature for this.
/// - [`Downcast`] for easy conversions _to_ [`Any`] for downcasting.
/// - [`Send`] and [`Sync`] as the passes in a wave run on separate threads.
///
/// In addition, it is required but not enforced that implementors of this
/// trait also implement [`ConcretePass`].
pub trait PassOps
where
    Self: Any + Debug + Downcast + Send + Sync,
{
    /// A short, stable name for the pass, used in logs and in the issues that
    /// report its failure.
    fn name(&self) -> &'static str;

    /// Executes the pass on the provided `module`, returning the issues it
    /// found and any data it produced.
    ///
    /// It takes a map of `pass_data` that allows the running pass to get at the
    /// data produced by the passes it depends on, and the `fuel` that bounds
    /// the work it may do.
    ///
    /// # Errors
    ///
    /// - [`Error`] if pass execution fails for any reason.
    fn run(
        &mut self,
        module: &IrModule,
        pass_data: &PassFacts,
        fuel: &mut Fuel,
    ) -> Result<PassOutput>;

    /// Gets a slice containing the keys of the passes whose output this pass
    /// depends on.
    fn depends(&self) -> &[PassKey];

    /// Returns a duplicate of this pass.
    fn dupe(&self) -> Pass;

    /// Gets a key that uniquely represents the pass.
    ///
    /// This **must** return the same value as [`ConcretePass::key`].
    fn key_dyn(&self) -> PassKey {
        self.type_id()
    }
}

/// Provides extra operations that can be called when operating on a concrete
/// instance of a specific pass, rather than on any instance of a pass.
pub trait ConcretePass
where
    Self: Clone + Debug + PassOps,
{
    /// The type of data returned by the pass.
    type Data: ConcretePassData;

    /// Gets a key that uniquely represents the pass.
    ///
    /// This **must** return the same value as [`PassOps::key_dyn`].
    #[must_use]
    fn key() -> PassKey {
        TypeId::of::<Self>()
    }
}

/// Draws `steps` from `fuel` on behalf of the pass called `pass`.
///
/// # Errors
///
/// - [`Error::BudgetExhausted`] if the fuel runs out.
pub fn consume(fuel: &mut Fuel, pass: &str, steps: u64) -> Result<()> {
    fuel.consume(steps).map_err(|out| Error::BudgetExhausted {
        pass:   pass.to_string(),
        budget: out.budget,
    })
}

/// The data returned when executing all passes via the pass manager.
#[derive(Debug)]
pub struct PassManagerOutput {
    /// Every issue found, sorted, including those reporting pass failures.
    pub issues: Vec<Issue>,

    /// A mapping from pass key to the data returned by the pass.
    pub data: PassFacts,
}

impl PassManagerOutput {
    /// Creates a new pass manager return data element wrapping the `issues` and
    /// the result `data` from all the passes.
    #[must_use]
    pub fn new(issues: Vec<Issue>, data: PassFacts) -> Self {
        Self { issues, data }
    }
}

/// A manager for the passes of the scanner.
///
/// The primary task of this pass manager is to automatically resolve a pass
/// ordering based on dependencies between passes. This ensures that pass
/// orderings are correct, without the need for costly manual validation. The
/// ordering is a sequence of _waves_: every pass in a wave depends only on
/// passes in earlier waves, so the passes of a wave can run in parallel.
#[derive(Debug)]
pub struct PassManager {
    waves: Vec<Vec<Pass>>,
    fuel:  u64,
}

impl PassManager {
    /// Creates a new pass manager wrapping the provided passes, each of which
    /// is given [`DEFAULT_PASS_FUEL`] steps per run.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPassOrdering`] if no valid pass ordering can be
    ///   generated from the provided `passes`.
    pub fn new(passes: Vec<Pass>) -> Result<Self> {
        let waves = Self::generate_pass_ordering(passes)?;
        let fuel = DEFAULT_PASS_FUEL;
        Ok(Self { waves, fuel })
    }

    /// Sets the number of steps each pass may take per run.
    #[must_use]
    pub fn with_fuel(mut self, fuel: u64) -> Self {
        self.fuel = fuel;
        self
    }

    /// Executes the passes on the provided `module`.
    ///
    /// This never fails as a whole. A pass that fails is reported as an issue
    /// with the id [`ANALYSIS_INCOMPLETE`] and produces no data.
    pub fn run(&mut self, module: &IrModule) -> PassManagerOutput {
        let names = self
            .passes()
            .map(|p| (p.key_dyn(), p.name()))
            .collect::<HashMap<_, _>>();
        let mut facts = PassFacts::new();
        let mut issues = Vec::new();

        for wave in &mut self.waves {
            let budget = self.fuel;
            let data = &facts;
            let results = wave
                .par_iter_mut()
                .map(|pass| {
                    let result = run_isolated(pass, module, data, budget, &names);
                    (pass.key_dyn(), pass.name(), result)
                })
                .collect::<Vec<_>>();

            for (key, name, result) in results {
                match result {
                    Ok(returned) => {
                        tracing::debug!(pass = name, issues = returned.issues.len(), "Pass completed");
                        issues.extend(returned.issues);
                        facts.record(key, returned.data);
                    }
                    Err(error) => {
                        tracing::warn!(pass = name, %error, "Pass did not complete");
                        issues.push(Issue::new(ANALYSIS_INCOMPLETE, Severity::Low, error.to_string()));
                    }
                }
            }
        }

        issues.sort();
        issues.dedup();
        PassManagerOutput::new(issues, facts)
    }

    /// Gets the current pass ordering.
    ///
    /// This method is always guaranteed to return a valid pass ordering that
    /// respects the requirements of the passes.
    pub fn passes(&self) -> impl Iterator<Item = &Pass> {
        self.waves.iter().flatten()
    }

    /// Gets the waves of the current pass ordering.
    #[must_use]
    pub fn waves(&self) -> &[Vec<Pass>] {
        &self.waves
    }

    /// Generates a valid pass ordering from `passes` wherever possible.
    ///
    /// Passes are grouped into waves, and each pass lands in the first wave
    /// after all of its dependencies. Within a wave passes keep the order in
    /// which they were provided.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidPassOrdering`] if no valid pass ordering can be
    ///   generated from the provided `passes`. This will occur due to circular
    ///   dependencies between passes, a dependency on a pass that was not
    ///   provided, or the same pass being provided twice.
    pub fn generate_pass_ordering(passes: Vec<Pass>) -> Result<Vec<Vec<Pass>>> {
        let mut keys = HashMap::new();
        for pass in &passes {
            if keys.insert(pass.key_dyn(), pass.name()).is_some() {
                Err(Error::InvalidPassOrdering(format!(
                    "Pass `{}` was provided more than once",
                    pass.name()
                )))?;
            }
        }
        for pass in &passes {
            if let Some(missing) = pass.depends().iter().find(|k| !keys.contains_key(k)) {
                Err(Error::InvalidPassOrdering(format!(
                    "Pass `{}` depends on {missing:?}, which was not provided",
                    pass.name()
                )))?;
            }
        }

        let mut placed = HashMap::<PassKey, usize>::new();
        let mut remaining = passes;
        let mut waves: Vec<Vec<Pass>> = Vec::new();
        while !remaining.is_empty() {
            let (ready, blocked): (Vec<_>, Vec<_>) = remaining
                .into_iter()
                .partition(|p| p.depends().iter().all(|k| placed.contains_key(k)));
            if ready.is_empty() {
                let names = blocked.iter().map(|p| p.name()).collect::<Vec<_>>();
                Err(Error::InvalidPassOrdering(format!(
                    "Passes {names:?} have circular dependencies"
                )))?;
            }

            let wave = waves.len();
            for pass in &ready {
                placed.insert(pass.key_dyn(), wave);
            }
            waves.push(ready);
            remaining = blocked;
        }

        Ok(waves)
    }
}

impl Clone for PassManager {
    fn clone(&self) -> Self {
        let waves = self
            .waves
            .iter()
            .map(|wave| wave.iter().map(|p| p.dupe()).collect())
            .collect();
        Self {
            waves,
            fuel: self.fuel,
        }
    }
}

/// Runs a single `pass`, turning every way in which it can fail into an error.
fn run_isolated(
    pass: &mut Pass,
    module: &IrModule,
    pass_data: &PassFacts,
    budget: u64,
    names: &HashMap<PassKey, &'static str>,
) -> Result<PassOutput> {
    let name = pass.name();
    if let Some(missing) = pass.depends().iter().find(|k| !pass_data.has(**k)) {
        Err(Error::MissingDependency {
            pass:       name.to_string(),
            dependency: names.get(missing).copied().unwrap_or("unknown").to_string(),
        })?;
    }

    let mut fuel = Fuel::new(budget);
    match catch_unwind(AssertUnwindSafe(|| pass.run(module, pass_data, &mut fuel))) {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked {
            pass:    name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    }
}

/// Recovers the message from a panic payload where it is a string.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod test {
    use aurion_errors::analysis::{Error, Result};

    use crate::{
        fuel::Fuel,
        ir::IrModule,
        issue::{Issue, Severity},
        pass::{
            consume,
            data::{NoData, PassFacts, PassOutput},
            ConcretePass,
            Pass,
            PassKey,
            PassManager,
            PassOps,
            ANALYSIS_INCOMPLETE,
        },
    };

    /// A pass whose behaviour is chosen by the test.
    #[derive(Clone, Debug)]
    struct Scripted<const N: usize> {
        depends:  Vec<PassKey>,
        behavior: Behavior,
    }

    #[derive(Clone, Copy, Debug)]
    enum Behavior {
        Report,
        Fail,
        Panic,
        Spin,
    }

    impl<const N: usize> Scripted<N> {
        fn new(behavior: Behavior, depends: Vec<PassKey>) -> Box<Self> {
            Box::new(Self { depends, behavior })
        }
    }

    impl<const N: usize> PassOps for Scripted<N> {
        fn name(&self) -> &'static str {
            ["zero", "one", "two", "three"][N]
        }

        fn run(
            &mut self,
            _module: &IrModule,
            _pass_data: &PassFacts,
            fuel: &mut Fuel,
        ) -> Result<PassOutput> {
            match self.behavior {
                Behavior::Report => Ok(PassOutput::issues(vec![Issue::new(
                    self.name(),
                    Severity::Medium,
                    "found something",
                )])),
                Behavior::Fail => Err(Error::Failure {
                    pass:    self.name().to_string(),
                    message: "scripted".to_string(),
                }),
                Behavior::Panic => panic!("scripted panic"),
                Behavior::Spin => loop {
                    consume(fuel, self.name(), 1)?;
                },
            }
        }

        fn depends(&self) -> &[PassKey] {
            &self.depends
        }

        fn dupe(&self) -> Pass {
            Box::new(self.clone())
        }
    }

    impl<const N: usize> ConcretePass for Scripted<N> {
        type Data = NoData;
    }

    #[test]
    fn orders_passes_into_waves() -> anyhow::Result<()> {
        let passes: Vec<Pass> = vec![
            Scripted::<2>::new(Behavior::Report, vec![Scripted::<1>::key()]),
            Scripted::<1>::new(Behavior::Report, vec![Scripted::<0>::key()]),
            Scripted::<0>::new(Behavior::Report, vec![]),
            Scripted::<3>::new(Behavior::Report, vec![]),
        ];
        let manager = PassManager::new(passes)?;
        let waves = manager
            .waves()
            .iter()
            .map(|w| w.iter().map(|p| p.name()).collect::<Vec<_>>())
            .collect::<Vec<_>>();
        assert_eq!(waves, vec![vec!["zero", "three"], vec!["one"], vec!["two"]]);

        Ok(())
    }

    #[test]
    fn rejects_cycles_and_missing_dependencies() {
        let cycle: Vec<Pass> = vec![
            Scripted::<0>::new(Behavior::Report, vec![Scripted::<1>::key()]),
            Scripted::<1>::new(Behavior::Report, vec![Scripted::<0>::key()]),
        ];
        assert!(matches!(PassManager::new(cycle), Err(Error::InvalidPassOrdering(_))));

        let missing: Vec<Pass> = vec![Scripted::<0>::new(Behavior::Report, vec![
            Scripted::<3>::key(),
        ])];
        assert!(matches!(PassManager::new(missing), Err(Error::InvalidPassOrdering(_))));
    }

    #[test]
    fn failures_are_isolated() -> anyhow::Result<()> {
        let passes: Vec<Pass> = vec![
            Scripted::<0>::new(Behavior::Fail, vec![]),
            Scripted::<1>::new(Behavior::Panic, vec![]),
            Scripted::<2>::new(Behavior::Spin, vec![]),
            Scripted::<3>::new(Behavior::Report, vec![]),
        ];
        let mut manager = PassManager::new(passes)?.with_fuel(100);
        let result = manager.run(&IrModule::default());

        let incomplete = result
            .issues
            .iter()
            .filter(|i| i.id == ANALYSIS_INCOMPLETE && i.severity == Severity::Low)
            .count();
        assert_eq!(incomplete, 3);
        assert!(result.issues.iter().any(|i| i.id == "three"));

        Ok(())
    }

    #[test]
    fn dependents_of_failed_passes_are_incomplete() -> anyhow::Result<()> {
        let passes: Vec<Pass> = vec![
            Scripted::<0>::new(Behavior::Fail, vec![]),
            Scripted::<1>::new(Behavior::Report, vec![Scripted::<0>::key()]),
        ];
        let mut manager = PassManager::new(passes)?;
        let result = manager.run(&IrModule::default());

        assert_eq!(result.issues.len(), 2);
        assert!(result.issues.iter().all(|i| i.id == ANALYSIS_INCOMPLETE));
        assert!(result.issues.iter().any(|i| i.message.contains("missing the results of `zero`")));

        Ok(())
    }
}
