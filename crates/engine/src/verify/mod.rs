//! The bounded property verifier.
//!
//! Each property is checked per entry point that could break it. The function
//! is explored symbolically from an arbitrary state in which the property
//! holds, and the property must hold again at the end of every successful
//! path. Because the explorer is bounded, a property is only ever reported as
//! [`VerificationResult::Verified`] if every path was explored to completion.
//!
//! When a function cannot be proven safe, the verifier searches for concrete
//! inputs that make it break the property, reporting them as a
//! [`Counterexample`] that replays through the IR interpreter. If neither a
//! proof nor a counterexample is found the result is
//! [`VerificationResult::Unknown`], with the reason.

pub mod explore;
pub mod linear;
pub mod sym;
pub mod witness;

use std::{
    collections::{BTreeSet, HashSet},
    fmt,
};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    constant::{
        DEFAULT_CALL_DEPTH,
        DEFAULT_LOOP_UNROLL,
        DEFAULT_MAX_BLOCKS_PER_PATH,
        DEFAULT_MAX_PATHS,
        DEFAULT_VERIFIER_FUEL,
        DEFAULT_WITNESS_ATTEMPTS,
    },
    fuel::Fuel,
    ir::{
        dataflow::{DefUse, Origin},
        interp::{ConcreteInputs, TraceStep},
        types::Type,
        FunctionKind,
        Instruction,
        IrContract,
        IrFunction,
        IrModule,
    },
    pass::analysis::summaries::{summarize, FunctionSummariesData},
    syntax::ast::{BinaryOp, EnvVar},
    verify::{
        explore::{Explorer, PathState},
        sym::Node,
        witness::WitnessSearch,
    },
};

/// The upper bound of a [`Property::FieldBoundedBy`] property.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Bound {
    /// The value of another scalar field.
    Field(String),

    /// The value returned by a read-only function taking no arguments.
    Function(String),
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::Field(field) => write!(f, "self.{field}"),
            Bound::Function(function) => write!(f, "self.{function}()"),
        }
    }
}

/// A safety property of a contract.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Property {
    /// The scalar `field` never exceeds `bound`.
    FieldBoundedBy { field: String, bound: Bound },

    /// No value stored into `field` is the result of a subtraction that
    /// wrapped below zero.
    NoUnderflow { field: String },

    /// Only the address stored in `owner` can change `field`.
    OwnerOnlyMutation { field: String, owner: String },
}

impl Property {
    /// A short name for the kind of property.
    #[must_use]
    pub fn id(&self) -> &'static str {
        match self {
            Property::FieldBoundedBy { .. } => "field-bounded-by",
            Property::NoUnderflow { .. } => "no-underflow",
            Property::OwnerOnlyMutation { .. } => "owner-only-mutation",
        }
    }

    /// The field that the property constrains.
    #[must_use]
    pub fn field(&self) -> &str {
        match self {
            Property::FieldBoundedBy { field, .. }
            | Property::NoUnderflow { field }
            | Property::OwnerOnlyMutation { field, .. } => field,
        }
    }
}

/// A property of the named contract.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct PropertySpec {
    pub contract: String,
    pub property: Property,
}

impl PropertySpec {
    #[must_use]
    pub fn new(contract: impl Into<String>, property: Property) -> Self {
        Self {
            contract: contract.into(),
            property,
        }
    }

    /// Infers the properties that `module` evidently intends to uphold.
    ///
    /// - A guard in a function that writes a field, comparing it against the
    ///   result of a read-only function, suggests that the field is bounded by
    ///   that function.
    /// - Storing the result of a subtraction suggests that it must not
    ///   underflow.
    /// - A field written by a function that checks the sender against the
    ///   address recorded by `init` suggests that only that address may change
    ///   it.
    #[must_use]
    pub fn infer(module: &IrModule) -> Vec<PropertySpec> {
        let mut fuel = Fuel::new(DEFAULT_VERIFIER_FUEL);
        let Ok(summaries) = summarize(module, &mut fuel, "property-inference") else {
            return Vec::new();
        };

        let mut properties = BTreeSet::new();
        for contract in &module.contracts {
            let explorer = Explorer::new(contract, &summaries, VerifierLimits::default());
            let spec = |property| PropertySpec::new(&contract.name, property);

            for function in &contract.functions {
                let def_use = DefUse::new(function);
                let writes = summaries
                    .get(&contract.name, &function.name)
                    .map(|s| s.writes.clone())
                    .unwrap_or_default();

                for (block, cond, _) in def_use.conditions() {
                    let origins = def_use.origins(block, cond);
                    for bound in origins.iter().filter_map(|o| match o {
                        Origin::Call(callee) if is_bound_function(contract, &explorer, callee) => {
                            Some(callee)
                        }
                        _ => None,
                    }) {
                        for field in origins.iter().filter_map(|o| match o {
                            Origin::Field(field) if writes.contains(field) => Some(field),
                            _ => None,
                        }) {
                            if contract.field(field).is_some_and(|f| f.ty.is_integer()) {
                                properties.insert(spec(Property::FieldBoundedBy {
                                    field: field.clone(),
                                    bound: Bound::Function(bound.clone()),
                                }));
                            }
                        }
                    }
                }

                for field in stored_differences(contract, function, &def_use) {
                    properties.insert(spec(Property::NoUnderflow { field }));
                }
            }

            for owner in owners(contract) {
                for function in contract.entry_points() {
                    if function.kind != FunctionKind::Public
                        || !checks_sender_against(contract, function, &owner)
                    {
                        continue;
                    }
                    let Some(summary) = summaries.get(&contract.name, &function.name) else {
                        continue;
                    };
                    for field in summary.shared_writes.iter().filter(|f| **f != owner) {
                        properties.insert(spec(Property::OwnerOnlyMutation {
                            field: field.clone(),
                            owner: owner.clone(),
                        }));
                    }
                }
            }
        }
        properties.into_iter().collect()
    }
}

impl fmt::Display for PropertySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let contract = &self.contract;
        match &self.property {
            Property::FieldBoundedBy { field, bound } => {
                write!(f, "{contract}.{field} never exceeds {bound}")
            }
            Property::NoUnderflow { field } => write!(f, "{contract}.{field} never underflows"),
            Property::OwnerOnlyMutation { field, owner } => {
                write!(f, "{contract}.{field} is only changed by self.{owner}")
            }
        }
    }
}

/// Concrete inputs under which a function breaks a property.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Counterexample {
    pub function: String,
    pub inputs:   ConcreteInputs,

    /// The trace of the violating execution.
    pub trace: Vec<TraceStep>,
}

/// The outcome of verifying a single property.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    Verified {
        property: PropertySpec,
    },
    Violated {
        property:       PropertySpec,
        counterexample: Counterexample,
    },
    Unknown {
        property: PropertySpec,
        reason:   String,
    },
}

impl VerificationResult {
    /// The property this is the result for.
    #[must_use]
    pub fn property(&self) -> &PropertySpec {
        match self {
            VerificationResult::Verified { property }
            | VerificationResult::Violated { property, .. }
            | VerificationResult::Unknown { property, .. } => property,
        }
    }

    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationResult::Verified { .. })
    }
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerificationResult::Verified { property } => write!(f, "verified: {property}"),
            VerificationResult::Violated {
                property,
                counterexample,
            } => write!(
                f,
                "violated: {property} (by `{}` with arguments {:?})",
                counterexample.function, counterexample.inputs.args
            ),
            VerificationResult::Unknown { property, reason } => {
                write!(f, "unknown: {property} ({reason})")
            }
        }
    }
}

/// The resource limits of the verifier. Exceeding any of them makes the
/// affected property [`VerificationResult::Unknown`] unless a counterexample
/// is found regardless.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct VerifierLimits {
    /// The number of paths explored per function.
    pub max_paths: usize,

    /// The number of blocks a single path may visit.
    pub max_blocks_per_path: usize,

    /// The number of times a path may go around a loop.
    pub loop_unroll: usize,

    /// How deeply internal calls may nest.
    pub max_call_depth: usize,

    /// The number of symbolic steps per function.
    pub fuel: u64,

    /// The number of concrete candidates tried when looking for a
    /// counterexample.
    pub witness_attempts: usize,
}

impl Default for VerifierLimits {
    fn default() -> Self {
        Self {
            max_paths:           DEFAULT_MAX_PATHS,
            max_blocks_per_path: DEFAULT_MAX_BLOCKS_PER_PATH,
            loop_unroll:         DEFAULT_LOOP_UNROLL,
            max_call_depth:      DEFAULT_CALL_DEPTH,
            fuel:                DEFAULT_VERIFIER_FUEL,
            witness_attempts:    DEFAULT_WITNESS_ATTEMPTS,
        }
    }
}

/// Checks properties of lowered modules.
#[derive(Clone, Debug, Default)]
pub struct Verifier {
    limits: VerifierLimits,
}

impl Verifier {
    #[must_use]
    pub fn new(limits: VerifierLimits) -> Self {
        Self { limits }
    }

    /// Verifies each of `properties` against `module`, returning one result
    /// per property in the same order.
    #[must_use]
    pub fn verify(&self, module: &IrModule, properties: &[PropertySpec]) -> Vec<VerificationResult> {
        let _span = tracing::debug_span!("verify", properties = properties.len()).entered();

        let mut fuel = Fuel::new(self.limits.fuel);
        let summaries = match summarize(module, &mut fuel, "verifier") {
            Ok(summaries) => summaries,
            Err(error) => {
                return properties
                    .iter()
                    .map(|property| VerificationResult::Unknown {
                        property: property.clone(),
                        reason:   error.to_string(),
                    })
                    .collect();
            }
        };

        properties
            .par_iter()
            .map(|property| {
                let result = self.check(module, &summaries, property);
                tracing::debug!(%result, "checked property");
                result
            })
            .collect()
    }

    fn check(
        &self,
        module: &IrModule,
        summaries: &FunctionSummariesData,
        spec: &PropertySpec,
    ) -> VerificationResult {
        let unknown = |reason: String| VerificationResult::Unknown {
            property: spec.clone(),
            reason,
        };
        let Some(contract) = module.contract(&spec.contract) else {
            return unknown(format!("there is no contract named `{}`", spec.contract));
        };
        if let Err(reason) = validate(contract, summaries, &spec.property) {
            return unknown(reason);
        }

        let mut reason = None;
        for function in relevant_functions(contract, summaries, &spec.property) {
            let mut explorer = Explorer::new(contract, summaries, self.limits);
            let mut start = explorer.start(function);
            if function.kind != FunctionKind::Init {
                assume_invariant(&mut explorer, &mut start, &spec.property);
            }

            let exploration = explorer.explore(start);
            let proven = exploration.incomplete.is_none()
                && exploration
                    .paths
                    .into_iter()
                    .all(|mut path| holds(&mut explorer, &mut path, &spec.property));
            if proven {
                continue;
            }

            let search = WitnessSearch::new(contract, &self.limits);
            if let Some(counterexample) = search.search(function, &spec.property) {
                return VerificationResult::Violated {
                    property: spec.clone(),
                    counterexample,
                };
            }
            reason.get_or_insert_with(|| match exploration.incomplete {
                Some(why) => format!("the exploration of `{}` stopped early: {why}", function.name),
                None => format!(
                    "`{}` could not be proven safe and no counterexample was found",
                    function.name
                ),
            });
        }

        match reason {
            Some(reason) => unknown(reason),
            None => VerificationResult::Verified {
                property: spec.clone(),
            },
        }
    }
}

/// Verifies `properties` against `module` with the default limits.
#[must_use]
pub fn verify(module: &IrModule, properties: &[PropertySpec]) -> Vec<VerificationResult> {
    Verifier::default().verify(module, properties)
}

/// Checks that `property` makes sense for `contract`.
fn validate(
    contract: &IrContract,
    summaries: &FunctionSummariesData,
    property: &Property,
) -> Result<(), String> {
    let field = |name: &str| {
        contract
            .field(name)
            .ok_or_else(|| format!("`{}` has no field `{name}`", contract.name))
    };
    let scalar_integer = |name: &str| {
        let declared = field(name)?;
        if declared.ty.is_integer() {
            Ok(())
        } else {
            Err(format!("`{name}` is of type `{}`, not an integer", declared.ty))
        }
    };

    match property {
        Property::FieldBoundedBy { field, bound } => {
            scalar_integer(field)?;
            match bound {
                Bound::Field(bound) => scalar_integer(bound),
                Bound::Function(bound) => {
                    let explorer = Explorer::new(contract, summaries, VerifierLimits::default());
                    if is_bound_function(contract, &explorer, bound) {
                        Ok(())
                    } else {
                        Err(format!(
                            "`{bound}` must take no arguments, return an integer, and have no \
                             effects"
                        ))
                    }
                }
            }
        }
        Property::NoUnderflow { field: name } => match &field(name)?.ty {
            Type::Map(_, value) if value.is_integer() => Ok(()),
            ty if ty.is_integer() => Ok(()),
            ty => Err(format!("`{name}` is of type `{ty}`, which cannot underflow")),
        },
        Property::OwnerOnlyMutation { field: name, owner } => {
            field(name)?;
            match &field(owner)?.ty {
                Type::Address => Ok(()),
                ty => Err(format!("`{owner}` is of type `{ty}`, not an address")),
            }
        }
    }
}

/// Checks if `name` can serve as a [`Bound::Function`].
fn is_bound_function(contract: &IrContract, explorer: &Explorer<'_>, name: &str) -> bool {
    contract.function(name).is_some_and(|f| {
        f.params.is_empty() && f.returns.as_ref().is_some_and(Type::is_integer)
    }) && explorer.is_opaque(name)
}

/// The functions that may break `property`: the entry points that write a
/// field it depends on.
fn relevant_functions<'a>(
    contract: &'a IrContract,
    summaries: &FunctionSummariesData,
    property: &Property,
) -> Vec<&'a IrFunction> {
    let mut touched = HashSet::from([property.field().to_string()]);
    if let Property::FieldBoundedBy { bound, .. } = property {
        match bound {
            Bound::Field(field) => {
                touched.insert(field.clone());
            }
            Bound::Function(function) => {
                touched.extend(
                    summaries
                        .get(&contract.name, function)
                        .into_iter()
                        .flat_map(|s| s.reads.iter().cloned()),
                );
            }
        }
    }
    let public_only = matches!(property, Property::OwnerOnlyMutation { .. });

    contract
        .entry_points()
        .filter(|f| !public_only || f.kind == FunctionKind::Public)
        .filter(|f| {
            summaries
                .get(&contract.name, &f.name)
                .is_some_and(|s| s.writes.iter().any(|w| touched.contains(w)))
        })
        .collect()
}

/// Assumes at the start of a path that `property` already holds.
fn assume_invariant<'a>(explorer: &mut Explorer<'a>, state: &mut PathState<'a>, property: &Property) {
    if let Property::FieldBoundedBy { field, bound } = property {
        if let Some(margin) = margin(explorer, state, field, bound) {
            explorer.assume(state, (margin, Vec::new()));
        }
    }
}

/// Computes `bound - field` in `state` as a linear expression.
fn margin<'a>(
    explorer: &mut Explorer<'a>,
    state: &mut PathState<'a>,
    field: &str,
    bound: &Bound,
) -> Option<linear::Linear> {
    let value = explorer.field_value(state, field, None).ok()?;
    let limit = match bound {
        Bound::Field(bound) => explorer.field_value(state, bound, None).ok()?,
        Bound::Function(bound) => explorer.call_value(state, bound, Vec::new()).ok()?,
    };
    let value = explorer.linear(state, value)?;
    explorer.linear(state, limit)?.sub(&value)
}

/// Checks if `property` holds at the end of `path`.
fn holds<'a>(explorer: &mut Explorer<'a>, path: &mut PathState<'a>, property: &Property) -> bool {
    match property {
        Property::FieldBoundedBy { field, bound } => {
            margin(explorer, path, field, bound).is_some_and(|m| path.facts.entails(&m))
        }
        Property::NoUnderflow { field } => path
            .stores
            .iter()
            .filter(|s| s.field == *field)
            .all(|s| !explorer.arena().has_underflow(s.value)),
        Property::OwnerOnlyMutation { field, owner } => {
            if !path.stores.iter().any(|s| s.field == *field) {
                return true;
            }
            let Some(owner) = explorer
                .contract()
                .field(owner)
                .map(|f| f.ty.clone())
                .map(|ty| {
                    let node = Node::Field {
                        field:   owner.clone(),
                        key:     None,
                        version: 0,
                    };
                    explorer.intern(node, ty)
                })
            else {
                return false;
            };
            let sender = explorer.intern(Node::Env(EnvVar::Sender), Type::Address);
            let (Some(sender), Some(owner)) = (explorer.linear(path, sender), explorer.linear(path, owner))
            else {
                return false;
            };
            [sender.sub(&owner), owner.sub(&sender)]
                .into_iter()
                .all(|d| d.is_some_and(|d| path.facts.entails(&d)))
        }
    }
}

/// The fields that `function` stores a difference into.
fn stored_differences(contract: &IrContract, function: &IrFunction, def_use: &DefUse<'_>) -> Vec<String> {
    let stores = function
        .instructions()
        .filter_map(|(block, i)| match &i.node {
            Instruction::StoreField { field, value, .. } => Some((block, field, *value)),
            _ => None,
        })
        .collect::<Vec<_>>();

    let mut fields = Vec::new();
    for (block, instruction) in function.instructions() {
        let Instruction::Binary {
            dest,
            op: BinaryOp::Sub,
            ..
        } = &instruction.node
        else {
            continue;
        };
        let derived = def_use.derived(block, *dest);
        for (store_block, field, value) in &stores {
            let integer = contract.field(field).is_some_and(|f| match &f.ty {
                Type::Map(_, value) => value.is_integer(),
                ty => ty.is_integer(),
            });
            if integer && derived.contains(&(*store_block, *value)) {
                fields.push((*field).clone());
            }
        }
    }
    fields
}

/// The address fields that `init` sets to the sender.
fn owners(contract: &IrContract) -> Vec<String> {
    let Some(init) = contract.init() else {
        return Vec::new();
    };
    let def_use = DefUse::new(init);
    init.instructions()
        .filter_map(|(block, i)| match &i.node {
            Instruction::StoreField {
                field,
                key: None,
                value,
            } if contract.field(field).is_some_and(|f| f.ty == Type::Address)
                && def_use.origins(block, *value) == BTreeSet::from([Origin::Env(EnvVar::Sender)]) =>
            {
                Some(field.clone())
            }
            _ => None,
        })
        .collect()
}

/// Checks if `function`, or a function it calls directly, compares the sender
/// with `owner`.
fn checks_sender_against(contract: &IrContract, function: &IrFunction, owner: &str) -> bool {
    let callees = function.instructions().filter_map(|(_, i)| match &i.node {
        Instruction::Call { function, .. } => contract.function(function),
        _ => None,
    });
    std::iter::once(function).chain(callees).any(|f| {
        let def_use = DefUse::new(f);
        def_use.conditions().into_iter().any(|(block, cond, _)| {
            let origins = def_use.origins(block, cond);
            origins.contains(&Origin::Env(EnvVar::Sender))
                && origins.contains(&Origin::Field(owner.to_string()))
        })
    })
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{interp::Interpreter, lower::lower, IrModule},
        syntax::parse,
        verify::{verify, Bound, Property, PropertySpec, VerificationResult},
    };

    const VESTING: &str = include_str!("../../tests/data/vesting.aur");

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn proves_the_vesting_bound() -> anyhow::Result<()> {
        let module = module(VESTING)?;
        let property = PropertySpec::new(
            "SimpleVesting",
            Property::FieldBoundedBy {
                field: "claimed".to_string(),
                bound: Bound::Function("calculate_vested".to_string()),
            },
        );

        assert_eq!(PropertySpec::infer(&module), vec![property.clone()]);
        let results = verify(&module, &[property]);
        assert!(results[0].is_verified(), "{}", results[0]);

        Ok(())
    }

    #[test]
    fn finds_a_replayable_underflow() -> anyhow::Result<()> {
        let module = module(
            "contract Ledger {\n  credit: u64\n\n  spend(amount: u64) {\n    self.credit -= amount\n  }\n}",
        )?;
        let property = PropertySpec::new(
            "Ledger",
            Property::NoUnderflow {
                field: "credit".to_string(),
            },
        );
        assert_eq!(PropertySpec::infer(&module), vec![property.clone()]);

        let results = verify(&module, &[property]);
        let VerificationResult::Violated { counterexample, .. } = &results[0] else {
            anyhow::bail!("expected a violation, got {}", results[0]);
        };
        assert_eq!(counterexample.function, "spend");

        let contract = &module.contracts[0];
        let replay = Interpreter::new(contract).run("spend", &counterexample.inputs)?;
        assert!(replay.stores.iter().any(|s| s.underflowed));
        assert_eq!(replay.trace, counterexample.trace);

        Ok(())
    }

    #[test]
    fn reports_unguarded_owner_fields() -> anyhow::Result<()> {
        let module = module(
            "contract Fees {\n  owner: address\n  fee: u64\n\n  init() {\n    self.owner = msg.sender\n  }\n\n  \
             set_fee(fee: u64) {\n    require(msg.sender == self.owner)\n    self.fee = fee\n  }\n\n  \
             reset() {\n    self.fee = 0\n  }\n}",
        )?;
        let property = PropertySpec::new(
            "Fees",
            Property::OwnerOnlyMutation {
                field: "fee".to_string(),
                owner: "owner".to_string(),
            },
        );
        assert!(PropertySpec::infer(&module).contains(&property));

        let results = verify(&module, &[property]);
        let VerificationResult::Violated { counterexample, .. } = &results[0] else {
            anyhow::bail!("expected a violation, got {}", results[0]);
        };
        assert_eq!(counterexample.function, "reset");

        Ok(())
    }

    #[test]
    fn rejects_properties_of_missing_fields() -> anyhow::Result<()> {
        let module = module(VESTING)?;
        let property = PropertySpec::new(
            "SimpleVesting",
            Property::NoUnderflow {
                field: "missing".to_string(),
            },
        );

        let results = verify(&module, &[property]);
        assert!(matches!(results[0], VerificationResult::Unknown { .. }));

        Ok(())
    }
}
