//! The multi-chain simulator.
//!
//! Each chain is checked independently against its [`ChainProfile`]: whether
//! it can represent the addresses and integers the contracts use, whether it
//! supports the events and native value transfers they rely on, and whether
//! the worst-case gas of every entry point fits within its transaction limit.
//! Any mismatch is reported as a discrepancy, and a chain passes when there
//! are none.

pub mod gas;
pub mod profile;

use std::{collections::BTreeMap, sync::Arc};

use rayon::prelude::*;
use serde::Serialize;

pub use crate::simulate::profile::{ChainDescriptor, ChainProfile, DeclarativeProfiles, ProfileSource};
use crate::{
    constant::{ADDRESS_WIDTH, DEFAULT_SIMULATION_LOOP_BOUND},
    ir::{types::Type, Instruction, IrContract, IrFunction, IrModule},
    simulate::gas::GasEstimator,
    syntax::ast::EnvVar,
};

/// The outcome of simulating against one chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct SimulationResult {
    pub passed:        bool,
    pub discrepancies: Vec<String>,
}

impl SimulationResult {
    #[must_use]
    pub fn new(discrepancies: Vec<String>) -> Self {
        Self {
            passed: discrepancies.is_empty(),
            discrepancies,
        }
    }
}

/// The worst-case gas of every entry point of a module on one chain.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct GasReport {
    pub chain:     String,
    pub gas_limit: u64,

    /// The most gas a transaction can use, keyed by `Contract.function`.
    pub functions: BTreeMap<String, u64>,
}

impl GasReport {
    /// The most expensive entry point and its worst-case gas.
    #[must_use]
    pub fn most_expensive(&self) -> Option<(&str, u64)> {
        self.functions
            .iter()
            .max_by_key(|(_, gas)| **gas)
            .map(|(name, gas)| (name.as_str(), *gas))
    }

    /// How much of the gas limit the most expensive entry point leaves
    /// unused, as a percentage.
    #[must_use]
    pub fn efficiency(&self) -> u8 {
        let Some((_, worst)) = self.most_expensive() else {
            return 100;
        };
        if self.gas_limit == 0 || worst >= self.gas_limit {
            return 0;
        }
        let used = u128::from(worst) * 100 / u128::from(self.gas_limit);
        u8::try_from(100 - used).unwrap_or(0)
    }
}

/// Simulates modules against chains whose profiles come from a
/// [`ProfileSource`].
#[derive(Clone, Debug)]
pub struct Simulator {
    profiles:   Arc<dyn ProfileSource>,
    loop_bound: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new(Arc::new(DeclarativeProfiles::builtin()))
    }
}

impl Simulator {
    #[must_use]
    pub fn new(profiles: Arc<dyn ProfileSource>) -> Self {
        Self {
            profiles,
            loop_bound: DEFAULT_SIMULATION_LOOP_BOUND,
        }
    }

    /// Sets how many times each loop is assumed to run when estimating gas.
    #[must_use]
    pub fn with_loop_bound(mut self, loop_bound: u64) -> Self {
        self.loop_bound = loop_bound;
        self
    }

    /// Simulates `module` against every chain in `chains`, returning the
    /// result for each chain by name.
    #[must_use]
    pub fn simulate(&self, module: &IrModule, chains: &[ChainDescriptor]) -> BTreeMap<String, SimulationResult> {
        let _span = tracing::debug_span!("simulate", chains = chains.len()).entered();
        chains
            .par_iter()
            .map(|chain| (chain.name.clone(), self.simulate_chain(module, chain)))
            .collect()
    }

    /// Estimates the worst-case gas of every entry point in `module` on
    /// `chain`, or [`None`] if the chain has no profile.
    #[must_use]
    pub fn estimate_gas(&self, module: &IrModule, chain: &ChainDescriptor) -> Option<GasReport> {
        let profile = self.profiles.profile(chain)?;
        let mut functions = BTreeMap::new();
        for contract in &module.contracts {
            let mut estimator = GasEstimator::new(contract, profile.gas, self.loop_bound);
            for function in contract.entry_points() {
                let gas = estimator.transaction(function);
                functions.insert(format!("{}.{}", contract.name, function.name), gas);
            }
        }
        Some(GasReport {
            chain: profile.name,
            gas_limit: profile.gas_limit,
            functions,
        })
    }

    fn simulate_chain(&self, module: &IrModule, chain: &ChainDescriptor) -> SimulationResult {
        let Some(profile) = self.profiles.profile(chain) else {
            tracing::warn!(chain = %chain.name, "no profile for chain");
            return SimulationResult::new(vec![format!("No profile is known for chain `{}`", chain.name)]);
        };

        let discrepancies = module
            .contracts
            .iter()
            .flat_map(|contract| self.check(contract, &profile))
            .collect::<Vec<_>>();
        tracing::debug!(chain = %chain.name, discrepancies = discrepancies.len(), "simulated chain");
        SimulationResult::new(discrepancies)
    }

    fn check(&self, contract: &IrContract, profile: &ChainProfile) -> Vec<String> {
        let chain = &profile.name;
        let name = &contract.name;
        let mut discrepancies = Vec::new();

        let types = types(contract);
        if types.iter().any(|ty| *ty == Type::Address) && profile.address_width < ADDRESS_WIDTH {
            discrepancies.push(format!(
                "{name} uses {ADDRESS_WIDTH}-bit addresses but {chain} addresses are {} bits wide",
                profile.address_width
            ));
        }
        if let Some(widest) = types.iter().filter(|ty| ty.is_integer()).map(Type::width).max() {
            if widest > profile.max_integer_width {
                discrepancies.push(format!(
                    "{name} uses u{widest} but {chain} integers are at most {} bits wide",
                    profile.max_integer_width
                ));
            }
        }

        let mut estimator = GasEstimator::new(contract, profile.gas, self.loop_bound);
        for function in contract.entry_points() {
            let instructions = function.instructions().map(|(_, i)| &i.node).collect::<Vec<_>>();
            let emits = instructions.iter().any(|i| matches!(i, Instruction::Emit { .. }));
            if emits && !profile.supports_events {
                discrepancies.push(format!("{name}.{} emits events but {chain} has none", function.name));
            }
            if moves_value(&instructions) && !profile.native_value_transfer {
                discrepancies.push(format!(
                    "{name}.{} moves native value but {chain} has no native currency",
                    function.name
                ));
            }

            let gas = estimator.transaction(function);
            if gas > profile.gas_limit {
                discrepancies.push(format!(
                    "{name}.{} needs up to {gas} gas but {chain} allows {} per transaction",
                    function.name, profile.gas_limit
                ));
            }
        }
        discrepancies
    }
}

/// Simulates `module` against `chains` using the built-in chain profiles.
#[must_use]
pub fn simulate(module: &IrModule, chains: &[ChainDescriptor]) -> BTreeMap<String, SimulationResult> {
    Simulator::default().simulate(module, chains)
}

/// Every type that values in `contract` can have, with map types broken up
/// into their keys and values.
fn types(contract: &IrContract) -> Vec<Type> {
    let declared = contract
        .fields
        .iter()
        .map(|f| &f.ty)
        .chain(contract.events.iter().flat_map(|e| e.params.iter().map(|(_, ty)| ty)))
        .cloned()
        .chain(contract.functions.iter().flat_map(function_types));

    let mut types = Vec::new();
    let mut pending = declared.collect::<Vec<_>>();
    while let Some(ty) = pending.pop() {
        if let Type::Map(key, value) = ty {
            pending.extend([*key, *value]);
        } else if !types.contains(&ty) {
            types.push(ty);
        }
    }
    types
}

fn function_types(function: &IrFunction) -> Vec<Type> {
    let env = function.instructions().filter_map(|(_, i)| match &i.node {
        Instruction::Env {
            var: EnvVar::Sender | EnvVar::Origin,
            ..
        } => Some(Type::Address),
        Instruction::Binary { ty, .. } | Instruction::Const { ty, .. } => Some(ty.clone()),
        _ => None,
    });
    function
        .params
        .iter()
        .map(|(_, ty)| ty)
        .chain(&function.returns)
        .chain(function.locals.iter().map(|l| &l.ty))
        .cloned()
        .chain(env)
        .collect()
}

fn moves_value(instructions: &[&Instruction]) -> bool {
    instructions.iter().any(|i| {
        matches!(
            i,
            Instruction::ExternalCall { .. }
                | Instruction::Env {
                    var: EnvVar::Value,
                    ..
                }
        )
    })
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{lower::lower, IrModule},
        simulate::{
            profile::GasSchedule,
            simulate,
            ChainDescriptor,
            ChainProfile,
            DeclarativeProfiles,
            GasReport,
            Simulator,
        },
        syntax::parse,
    };

    const VESTING: &str = include_str!("../../tests/data/vesting.aur");

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn no_chains_means_no_results() -> anyhow::Result<()> {
        assert!(simulate(&module(VESTING)?, &[]).is_empty());

        Ok(())
    }

    #[test]
    fn reports_each_chain_independently() -> anyhow::Result<()> {
        let module = module(VESTING)?;
        let chains = [
            ChainDescriptor::new("Aurlink VM", "http://localhost:8545"),
            ChainDescriptor::new("Ethereum", "https://eth.example"),
            ChainDescriptor::new("Nowhere", ""),
        ];
        let results = simulate(&module, &chains);

        assert_eq!(results.len(), 3);
        assert!(results["Aurlink VM"].passed);
        assert!(!results["Ethereum"].passed);
        assert!(results["Ethereum"].discrepancies[0].contains("160 bits"));
        assert!(!results["Nowhere"].passed);
        assert_eq!(results["Nowhere"].discrepancies.len(), 1);

        Ok(())
    }

    #[test]
    fn reports_gas_and_value_transfer() -> anyhow::Result<()> {
        let module = module(
            "contract Pay {
  paid: u64

  pay(to: address, n: u64) {
    while n > 0 {
      self.paid += 1
      n -= 1
    }
    transfer(to, n)
  }
}",
        )?;
        let mut profiles = DeclarativeProfiles::empty();
        profiles.insert(ChainProfile {
            name:                  "Tiny".to_string(),
            address_width:         256,
            max_integer_width:     64,
            supports_events:       true,
            native_value_transfer: false,
            gas_limit:             1_000,
            gas:                   GasSchedule::default(),
        });
        let simulator = Simulator::new(Arc::new(profiles)).with_loop_bound(4);
        let results = simulator.simulate(&module, &[ChainDescriptor::new("tiny", "")]);
        let result = &results["tiny"];

        assert!(!result.passed);
        assert_eq!(result.discrepancies.len(), 2);
        assert!(result.discrepancies[0].contains("native value"));
        assert!(result.discrepancies[1].contains("gas"));

        Ok(())
    }

    #[test]
    fn estimates_gas_for_every_entry_point() -> anyhow::Result<()> {
        let module = module(VESTING)?;
        let simulator = Simulator::default();

        let report = simulator
            .estimate_gas(&module, &ChainDescriptor::new("aurlink-vm", ""))
            .ok_or_else(|| anyhow::anyhow!("no gas report"))?;
        assert_eq!(report.chain, "Aurlink VM");
        assert!(report.functions.contains_key("SimpleVesting.claim"));
        assert!(report.functions.values().all(|gas| *gas > 0 && *gas < report.gas_limit));
        assert!(report.efficiency() > 90);

        let starved = GasReport {
            gas_limit: 10,
            ..report.clone()
        };
        assert_eq!(starved.efficiency(), 0);
        assert_eq!(GasReport::default().efficiency(), 100);

        assert!(simulator
            .estimate_gas(&module, &ChainDescriptor::new("Nowhere", ""))
            .is_none());

        Ok(())
    }
}
