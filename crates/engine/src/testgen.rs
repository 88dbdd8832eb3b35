//! Generation of test-suite skeletons from lowered contracts.
//!
//! Every public entry point gets a happy-path test. Its inputs are found by
//! deploying the contract with `init` and then searching candidate arguments
//! and senders with the interpreter until the function succeeds, and its
//! assertions record what that successful run did.
//!
//! Every scanner issue and every violated property that touches a function
//! adds an adversarial test for that specific condition, starting from the
//! happy-path inputs and perturbing them: a stranger calling a guarded
//! function, a failing external call, a boundary argument, or the replay of a
//! counterexample.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::{
    constant::DEFAULT_EXECUTION_FUEL,
    ir::{
        interp::{
            ConcreteInputs,
            EmittedEvent,
            ExecutionOutcome,
            ExecutionReport,
            Interpreter,
            Storage,
            StorageKey,
        },
        types::Type,
        FunctionKind,
        Instruction,
        IrContract,
        IrFunction,
        IrModule,
    },
    issue::Issue,
    pass::ANALYSIS_INCOMPLETE,
    scan::{Scanner, ScannerLimits},
    verify::{verify, PropertySpec, VerificationResult},
};

/// The address that deploys the contract in generated tests.
pub const DEPLOYER: u128 = 0xa11ce;

/// An address that the contract has never seen.
pub const STRANGER: u128 = 0xbad;

/// The timestamp at which the contract is deployed.
const DEPLOYED_AT: u128 = 1_700_000_000;

/// How long after deployment the other functions are called.
const CALLED_AFTER: u128 = 365 * 24 * 60 * 60;

/// The number of candidate inputs tried per function.
const MAX_CANDIDATES: usize = 512;

/// What a test case exercises.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestKind {
    HappyPath,
    ReentrancyProbe,
    AccessControlBypass,
    TxOriginPhishing,
    OverflowBoundary,
    UncheckedCallFailure,
    LoopBound,
    CounterexampleReplay,
}

impl TestKind {
    fn suffix(self) -> &'static str {
        match self {
            TestKind::HappyPath => "happy_path",
            TestKind::ReentrancyProbe => "reentrancy_probe",
            TestKind::AccessControlBypass => "access_control_bypass",
            TestKind::TxOriginPhishing => "tx_origin_phishing",
            TestKind::OverflowBoundary => "overflow_boundary",
            TestKind::UncheckedCallFailure => "unchecked_call_failure",
            TestKind::LoopBound => "loop_bound",
            TestKind::CounterexampleReplay => "counterexample_replay",
        }
    }
}

/// An expectation about the outcome of a test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "expect", rename_all = "kebab-case")]
pub enum Assertion {
    Succeeds,
    Reverts,
    Returns { value: Option<u128> },
    StorageEquals { key: StorageKey, value: u128 },
    Emits { event: EmittedEvent },

    /// No storage is written after the first call out of the contract.
    NoStoreAfterExternalCall,

    /// No value written to storage wrapped around.
    NoWrapAround,

    /// The call finishes within the execution budget.
    Terminates,

    /// The named property still holds afterwards.
    PropertyHolds { property: String },
}

/// A single generated test.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct TestCase {
    pub name:            String,
    pub contract:        String,
    pub target_function: String,
    pub kind:            TestKind,

    /// The arguments, sender, environment and storage to run with.
    pub inputs:     ConcreteInputs,
    pub assertions: Vec<Assertion>,
}

impl TestCase {
    #[must_use]
    pub fn arguments(&self) -> &[u128] {
        &self.inputs.args
    }

    #[must_use]
    pub fn sender(&self) -> u128 {
        self.inputs.env.sender
    }
}

/// A generated test suite.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct TestSuite {
    pub name:  String,
    pub tests: Vec<TestCase>,
}

impl TestSuite {
    /// The `(contract, function)` pairs that the suite has tests for.
    #[must_use]
    pub fn targets(&self) -> BTreeSet<(&str, &str)> {
        self.tests
            .iter()
            .map(|t| (t.contract.as_str(), t.target_function.as_str()))
            .collect()
    }
}

/// Generates tests for `module`, scanning it and verifying its inferred
/// properties to find the conditions that deserve adversarial tests.
#[must_use]
pub fn generate_tests(module: &IrModule) -> TestSuite {
    let issues = Scanner::new(ScannerLimits::default())
        .map(|scanner| scanner.scan(module))
        .unwrap_or_default();
    let results = verify(module, &PropertySpec::infer(module));
    generate_tests_with(module, &issues, &results)
}

/// Generates tests for `module`, adding adversarial tests for the provided
/// `issues` and violated `results`.
#[must_use]
pub fn generate_tests_with(
    module: &IrModule,
    issues: &[Issue],
    results: &[VerificationResult],
) -> TestSuite {
    let _span = tracing::debug_span!("generate_tests", issues = issues.len()).entered();
    let name = match module.contracts.as_slice() {
        [contract] => format!("{} tests", contract.name),
        _ => "generated tests".to_string(),
    };

    let mut tests = Vec::new();
    for contract in &module.contracts {
        let generator = Generator::new(contract);
        for function in contract.entry_points() {
            let happy = generator.happy_path(function);
            let adversarial = generator.adversarial(function, &happy, issues, results);
            tests.push(happy);
            tests.extend(adversarial);
        }
    }
    TestSuite { name, tests }
}

/// Generates the tests for a single contract.
struct Generator<'a> {
    contract:    &'a IrContract,
    interpreter: Interpreter<'a>,

    /// The storage right after deployment.
    deployed: Storage,
}

impl<'a> Generator<'a> {
    fn new(contract: &'a IrContract) -> Self {
        let mut generator = Self {
            contract,
            interpreter: Interpreter::new(contract).with_fuel(DEFAULT_EXECUTION_FUEL),
            deployed: Storage::new(),
        };
        if let Some(init) = contract.init() {
            if let Some((inputs, report)) = generator.search(init) {
                tracing::debug!(contract = %contract.name, args = ?inputs.args, "deployed contract");
                generator.deployed = report.storage;
            }
        }
        generator
    }

    fn happy_path(&self, function: &IrFunction) -> TestCase {
        let (inputs, assertions) = match self.search(function) {
            Some((inputs, report)) => {
                let assertions = describe(&inputs, &report);
                (inputs, assertions)
            }
            None => {
                tracing::debug!(function = %function.name, "found no successful inputs");
                (self.candidate(function, 0), vec![Assertion::Succeeds])
            }
        };
        self.case(function, TestKind::HappyPath, inputs, assertions)
    }

    fn adversarial(
        &self,
        function: &IrFunction,
        happy: &TestCase,
        issues: &[Issue],
        results: &[VerificationResult],
    ) -> Vec<TestCase> {
        let mut kinds = BTreeSet::new();
        let mut tests = Vec::new();

        for issue in issues {
            if issue.function.as_deref() != Some(function.name.as_str()) || issue.id == ANALYSIS_INCOMPLETE {
                continue;
            }
            let Some((kind, inputs, assertions)) = probe(function, happy, &issue.id) else {
                continue;
            };
            if kinds.insert(kind) {
                tests.push(self.case(function, kind, inputs, assertions));
            }
        }

        for result in results {
            let VerificationResult::Violated {
                property,
                counterexample,
            } = result
            else {
                continue;
            };
            if property.contract != self.contract.name || counterexample.function != function.name {
                continue;
            }
            if kinds.insert(TestKind::CounterexampleReplay) {
                let assertions = vec![Assertion::PropertyHolds {
                    property: property.to_string(),
                }];
                let inputs = counterexample.inputs.clone();
                tests.push(self.case(function, TestKind::CounterexampleReplay, inputs, assertions));
            }
        }
        tests
    }

    fn case(
        &self,
        function: &IrFunction,
        kind: TestKind,
        inputs: ConcreteInputs,
        assertions: Vec<Assertion>,
    ) -> TestCase {
        TestCase {
            name: format!("test_{}_{}", function.name, kind.suffix()),
            contract: self.contract.name.clone(),
            target_function: function.name.clone(),
            kind,
            inputs,
            assertions,
        }
    }

    /// Searches for inputs on which `function` succeeds.
    fn search(&self, function: &IrFunction) -> Option<(ConcreteInputs, ExecutionReport)> {
        (0..MAX_CANDIDATES).find_map(|attempt| {
            let inputs = self.candidate(function, attempt);
            let report = self.interpreter.run(&function.name, &inputs).ok()?;
            report.outcome.is_success().then_some((inputs, report))
        })
    }

    /// Builds the `attempt`th candidate inputs for `function`, enumerating
    /// senders fastest and then each argument in turn.
    fn candidate(&self, function: &IrFunction, attempt: usize) -> ConcreteInputs {
        let senders = self.senders();
        let mut rest = attempt / senders.len();
        let mut inputs = ConcreteInputs::default();

        inputs.env.sender = senders[attempt % senders.len()];
        inputs.env.origin = inputs.env.sender;
        inputs.env.block_number = 1;
        if function.kind == FunctionKind::Init {
            inputs.env.timestamp = DEPLOYED_AT;
        } else {
            inputs.env.timestamp = DEPLOYED_AT + CALLED_AFTER;
            inputs.storage = self.deployed.clone();
        }

        let constants = constants(function);
        for (_, ty) in &function.params {
            let pool = self.pool(ty, &constants);
            inputs.args.push(pool[rest % pool.len()]);
            rest /= pool.len();
        }
        inputs
    }

    /// The senders to try: the deployer, then every address in storage.
    fn senders(&self) -> Vec<u128> {
        let mut senders = vec![DEPLOYER];
        for (key, value) in &self.deployed {
            let is_address = self
                .contract
                .field(&key.field)
                .is_some_and(|f| f.ty == Type::Address);
            if is_address && !senders.contains(value) {
                senders.push(*value);
            }
        }
        senders
    }

    /// The candidate values for an argument of type `ty`.
    fn pool(&self, ty: &Type, constants: &[u128]) -> Vec<u128> {
        let mut pool = match ty {
            Type::Address => vec![0xb0b, DEPLOYER],
            Type::Bool => vec![1, 0],
            _ => {
                let mut pool = vec![1, 10, 0];
                pool.extend(constants.iter().flat_map(|c| [*c, c.saturating_add(1)]));
                pool.extend(self.deployed.values().copied());
                pool.retain(|v| ty.wrap(*v) == *v);
                pool
            }
        };
        let mut seen = BTreeSet::new();
        pool.retain(|v| seen.insert(*v));
        pool
    }
}

/// Builds the adversarial inputs for an issue with the id `issue`.
fn probe(
    function: &IrFunction,
    happy: &TestCase,
    issue: &str,
) -> Option<(TestKind, ConcreteInputs, Vec<Assertion>)> {
    let mut inputs = happy.inputs.clone();
    let probe = match issue {
        "reentrancy" => (TestKind::ReentrancyProbe, vec![Assertion::NoStoreAfterExternalCall]),
        "missing-access-control" => {
            inputs.env.sender = STRANGER;
            inputs.env.origin = STRANGER;
            (TestKind::AccessControlBypass, vec![Assertion::Reverts])
        }
        "tx-origin" => {
            inputs.env.sender = STRANGER;
            (TestKind::TxOriginPhishing, vec![Assertion::Reverts])
        }
        "unchecked-arithmetic" => {
            inputs.args = boundary_arguments(function);
            (TestKind::OverflowBoundary, vec![Assertion::NoWrapAround])
        }
        "unchecked-call" => {
            inputs.calls_succeed = false;
            (TestKind::UncheckedCallFailure, vec![Assertion::Reverts])
        }
        "unbounded-loop" => {
            inputs.args = boundary_arguments(function);
            (TestKind::LoopBound, vec![Assertion::Terminates])
        }
        _ => return None,
    };
    Some((probe.0, inputs, probe.1))
}

/// Records what a successful run did as assertions.
fn describe(inputs: &ConcreteInputs, report: &ExecutionReport) -> Vec<Assertion> {
    let mut assertions = vec![Assertion::Succeeds];
    if let ExecutionOutcome::Returned(Some(value)) = report.outcome {
        assertions.push(Assertion::Returns { value: Some(value) });
    }
    for (key, value) in &report.storage {
        if inputs.storage.get(key) != Some(value) {
            assertions.push(Assertion::StorageEquals {
                key:   key.clone(),
                value: *value,
            });
        }
    }
    assertions.extend(report.events.iter().map(|event| Assertion::Emits {
        event: event.clone(),
    }));
    assertions
}

/// The largest value of every parameter.
fn boundary_arguments(function: &IrFunction) -> Vec<u128> {
    function
        .params
        .iter()
        .map(|(_, ty)| match ty {
            Type::Address => STRANGER,
            Type::Bool => 1,
            ty => ty.max_value(),
        })
        .collect()
}

/// The constants that `function` mentions.
fn constants(function: &IrFunction) -> Vec<u128> {
    function
        .instructions()
        .filter_map(|(_, i)| match &i.node {
            Instruction::Const { value, .. } => Some(*value),
            _ => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{interp::StorageKey, lower::lower, IrModule},
        issue::{Issue, Severity},
        syntax::parse,
        testgen::{generate_tests, generate_tests_with, Assertion, TestKind, STRANGER},
    };

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn covers_every_public_function() -> anyhow::Result<()> {
        let source = include_str!("../tests/data/vesting.aur");
        let module = module(source)?;
        let suite = generate_tests(&module);

        let targets = suite.targets().into_iter().map(|(_, f)| f).collect::<Vec<_>>();
        assert_eq!(targets, vec!["calculate_vested", "claim", "init"]);

        let claim = suite
            .tests
            .iter()
            .find(|t| t.target_function == "claim" && t.kind == TestKind::HappyPath)
            .ok_or_else(|| anyhow::anyhow!("no claim test"))?;
        assert!(claim.assertions.contains(&Assertion::Succeeds));
        assert!(claim
            .assertions
            .iter()
            .any(|a| matches!(a, Assertion::StorageEquals { key, .. } if *key == StorageKey::field("claimed"))));

        Ok(())
    }

    #[test]
    fn adds_adversarial_tests_for_issues() -> anyhow::Result<()> {
        let module = module(
            "contract Admin {\n  fee: u64\n\n  set_fee(fee: u64) {\n    self.fee = fee\n  }\n}",
        )?;
        let issue = Issue::new("missing-access-control", Severity::High, "anyone can set the fee")
            .in_function("set_fee");
        let suite = generate_tests_with(&module, &[issue], &[]);

        assert_eq!(suite.tests.len(), 2);
        assert_eq!(suite.tests[0].kind, TestKind::HappyPath);
        let bypass = &suite.tests[1];
        assert_eq!(bypass.kind, TestKind::AccessControlBypass);
        assert_eq!(bypass.sender(), STRANGER);
        assert_eq!(bypass.assertions, vec![Assertion::Reverts]);

        Ok(())
    }
}
