//! Worst-case gas estimation over the IR.
//!
//! The estimate is the cost of the most expensive path through a function,
//! with every loop assumed to run its whole body a fixed number of times and
//! every internal call charged the worst case of its callee. Recursive calls
//! are charged only the call itself.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{cfg::Cfg, BasicBlock, Instruction, IrContract, IrFunction, Terminator},
    simulate::profile::GasSchedule,
};

/// Estimates worst-case gas for the functions of a single contract.
#[derive(Clone, Debug)]
pub struct GasEstimator<'a> {
    contract:   &'a IrContract,
    schedule:   GasSchedule,
    loop_bound: u64,

    /// The worst case of each function already estimated, without the
    /// transaction base cost.
    known: HashMap<String, u64>,
}

impl<'a> GasEstimator<'a> {
    #[must_use]
    pub fn new(contract: &'a IrContract, schedule: GasSchedule, loop_bound: u64) -> Self {
        Self {
            contract,
            schedule,
            loop_bound,
            known: HashMap::new(),
        }
    }

    /// The most gas a transaction calling `function` can use.
    pub fn transaction(&mut self, function: &IrFunction) -> u64 {
        let mut active = HashSet::new();
        self.schedule
            .base
            .saturating_add(self.function(function, &mut active))
    }

    fn function(&mut self, function: &IrFunction, active: &mut HashSet<String>) -> u64 {
        if let Some(cost) = self.known.get(&function.name) {
            return *cost;
        }
        if !active.insert(function.name.clone()) {
            return 0;
        }

        let cfg = Cfg::new(function);
        let costs = function
            .blocks
            .iter()
            .map(|block| self.block(block, active))
            .collect::<Vec<_>>();

        let back_edges = cfg.back_edges();
        let mut loops = vec![0u64; costs.len()];
        for &(from, header) in &back_edges {
            let body = cfg
                .natural_loop(from, header)
                .iter()
                .fold(0u64, |sum, b| sum.saturating_add(costs[*b]));
            loops[header] = loops[header].saturating_add(body.saturating_mul(self.loop_bound));
        }

        let mut worst = vec![0u64; costs.len()];
        for &block in cfg.reverse_post_order().iter().rev() {
            let next = cfg
                .successors(block)
                .iter()
                .filter(|s| !back_edges.contains(&(block, **s)))
                .map(|s| worst[*s])
                .max()
                .unwrap_or(0);
            worst[block] = costs[block].saturating_add(loops[block]).saturating_add(next);
        }

        let cost = worst.get(cfg.entry()).copied().unwrap_or(0);
        active.remove(&function.name);
        self.known.insert(function.name.clone(), cost);
        cost
    }

    fn block(&mut self, block: &BasicBlock, active: &mut HashSet<String>) -> u64 {
        let schedule = self.schedule;
        let mut cost = match block.terminator.node {
            Terminator::Branch { .. } | Terminator::Guard { .. } => schedule.branch,
            Terminator::Jump(_) | Terminator::Return(_) | Terminator::Revert(_) => 0,
        };
        for instruction in &block.instructions {
            let step = match &instruction.node {
                Instruction::LoadField { .. } => schedule.storage_read,
                Instruction::StoreField { .. } => schedule.storage_write,
                Instruction::ExternalCall { .. } => schedule.external_call,
                Instruction::Emit { args, .. } => {
                    let args = u64::try_from(args.len()).unwrap_or(u64::MAX);
                    schedule.event.saturating_add(schedule.event_arg.saturating_mul(args))
                }
                Instruction::Call { function, .. } => {
                    let callee = match self.contract.function(function) {
                        Some(callee) => self.function(callee, active),
                        None => 0,
                    };
                    schedule.internal_call.saturating_add(callee)
                }
                Instruction::Const { .. }
                | Instruction::Env { .. }
                | Instruction::LoadLocal { .. }
                | Instruction::StoreLocal { .. }
                | Instruction::Binary { .. }
                | Instruction::Unary { .. } => schedule.operation,
            };
            cost = cost.saturating_add(step);
        }
        cost
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{lower::lower, IrModule},
        simulate::{gas::GasEstimator, profile::GasSchedule},
        syntax::parse,
    };

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    /// Charges only for storage writes, so that costs are easy to count.
    fn writes_only() -> GasSchedule {
        GasSchedule {
            base:          0,
            operation:     0,
            storage_read:  0,
            storage_write: 1,
            event:         0,
            event_arg:     0,
            internal_call: 0,
            external_call: 0,
            branch:        0,
        }
    }

    #[test]
    fn takes_the_most_expensive_branch() -> anyhow::Result<()> {
        let module = module(
            "contract A {
  x: u64
  y: u64

  f(c: bool) {
    if c {
      self.x = 1
      self.y = 2
    } else {
      self.x = 3
    }
    self.x = 4
  }
}",
        )?;
        let contract = &module.contracts[0];
        let f = contract.function("f").ok_or_else(|| anyhow::anyhow!("no f"))?;

        assert_eq!(GasEstimator::new(contract, writes_only(), 10).transaction(f), 3);

        Ok(())
    }

    #[test]
    fn charges_loops_and_callees() -> anyhow::Result<()> {
        let module = module(
            "contract A {
  x: u64

  f(n: u64) {
    while n > 0 {
      self.x = n
      n = n - 1
    }
    self.g()
  }

  private g() {
    self.x = 0
  }
}",
        )?;
        let contract = &module.contracts[0];
        let f = contract.function("f").ok_or_else(|| anyhow::anyhow!("no f"))?;

        let bounded = GasEstimator::new(contract, writes_only(), 10).transaction(f);
        let unbounded = GasEstimator::new(contract, writes_only(), 20).transaction(f);
        assert!(bounded >= 11);
        assert_eq!(unbounded - bounded, 10);

        Ok(())
    }
}
