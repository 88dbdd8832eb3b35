//! The facts that analysis passes hand on to the detectors that depend on
//! them.
//!
//! A fact is anything a pass learns about a module that is not itself a
//! finding, such as which functions check the sender. Facts are stored type
//! erased and are recovered as their concrete type by the pass that asks for
//! them, keyed by the [`PassKey`] of the pass that produced them.

use std::{any::Any, collections::HashMap, fmt::Debug};

use derivative::Derivative;
use downcast_rs::Downcast;

use crate::{
    issue::Issue,
    pass::{ConcretePass, PassKey},
};

/// The type-erased facts produced by a single pass.
pub type PassData = Box<dyn PassDataOps>;

/// The operations that every kind of pass data supports.
///
/// # Self Bounds
///
/// - [`Any`] and [`Downcast`] so that the data can be recovered as its
///   concrete type.
/// - [`Debug`] so that the scanner's state can be logged.
/// - [`Send`] and [`Sync`] as the passes of a wave read the facts of earlier
///   waves from several threads at once.
pub trait PassDataOps
where
    Self: Any + Debug + Downcast + Send + Sync,
{
}

/// Marks a concrete kind of pass data, as opposed to a type-erased one.
pub trait ConcretePassData
where
    Self: Clone + Debug + PassDataOps,
{
}

/// The data of a detector, which only reports issues.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct NoData;

impl PassDataOps for NoData {}
impl ConcretePassData for NoData {}

/// What a single run of a pass produces.
#[derive(Derivative)]
#[derivative(Debug(bound = "T: Debug"), Default(bound = "T: Default"))]
pub struct PassOutput<T = PassData> {
    /// The issues found by the pass.
    pub issues: Vec<Issue>,

    /// The facts for dependent passes.
    pub data: T,
}

impl PassOutput {
    /// The output of a detector that found `issues`.
    #[must_use]
    pub fn issues(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            data: Box::new(NoData),
        }
    }

    /// The output of an analysis that learned `data`.
    #[must_use]
    pub fn facts<D: ConcretePassData>(data: D) -> Self {
        Self {
            issues: Vec::new(),
            data:   Box::new(data),
        }
    }

    /// Recovers the data as the concrete type `D`, if that is its type.
    #[must_use]
    pub fn data_as<D: ConcretePassData>(&self) -> Option<&D> {
        self.data.as_ref().as_any().downcast_ref::<D>()
    }
}

/// The facts recorded by every pass that has run so far in a scan.
///
/// A pass that failed records nothing, which is how the passes that depend on
/// it find out.
#[derive(Debug, Default)]
pub struct PassFacts {
    recorded: HashMap<PassKey, PassData>,
}

impl PassFacts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the `data` produced by the pass with the provided `key`.
    pub fn record(&mut self, key: PassKey, data: PassData) {
        self.recorded.insert(key, data);
    }

    /// Checks if the pass with the provided `key` has recorded its facts.
    #[must_use]
    pub fn has(&self, key: PassKey) -> bool {
        self.recorded.contains_key(&key)
    }

    /// Gets the facts recorded by the pass `P`, as its concrete data type.
    #[must_use]
    pub fn get<P: ConcretePass>(&self) -> Option<&P::Data> {
        self.recorded
            .get(&P::key())?
            .as_ref()
            .as_any()
            .downcast_ref::<P::Data>()
    }
}

#[cfg(test)]
mod test {
    use crate::pass::{
        analysis::summaries::{FunctionSummaries, FunctionSummariesData},
        data::{NoData, PassFacts, PassOutput},
        ConcretePass,
    };

    #[test]
    fn recorded_facts_come_back_as_their_own_type() {
        let mut facts = PassFacts::new();
        assert!(facts.get::<FunctionSummaries>().is_none());

        let output = PassOutput::facts(FunctionSummariesData::default());
        assert_eq!(output.data_as::<FunctionSummariesData>(), Some(&FunctionSummariesData::default()));
        assert!(output.data_as::<NoData>().is_none());

        facts.record(FunctionSummaries::key(), output.data);
        assert!(facts.has(FunctionSummaries::key()));
        assert_eq!(facts.get::<FunctionSummaries>(), Some(&FunctionSummariesData::default()));
    }
}
