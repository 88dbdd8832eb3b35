//! Bounded symbolic execution of a single function.
//!
//! The explorer executes the IR one instruction at a time over symbolic values,
//! forking the path at every branch and at every arithmetic operation that may
//! wrap around. Each path carries the linear facts that led to it, and paths
//! whose facts are contradictory are pruned. Paths that revert are dropped, as
//! a revert undoes everything the path did.
//!
//! Internal calls are inlined, with one exception: a call to a function that
//! neither writes storage nor calls out of the contract is kept as an opaque
//! [`Node::Call`] atom. The atom records the versions of the fields the callee
//! reads, so two calls see the same value exactly when nothing they depend on
//! was written in between. An opaque call never reverts, which can only add
//! paths that the real function would not take.
//!
//! Exploration is bounded by the [`VerifierLimits`]. Hitting any of the limits
//! stops the exploration and marks it as incomplete, so that the verifier can
//! never claim a property holds on the strength of a partial exploration.

use std::collections::{BTreeMap, HashMap};

use crate::{
    fuel::Fuel,
    ir::{
        types::Type,
        BlockId,
        FunctionKind,
        Instruction,
        IrContract,
        IrFunction,
        Terminator,
        ValueId,
    },
    pass::analysis::summaries::FunctionSummariesData,
    syntax::ast::{BinaryOp, ExternalKind},
    verify::{
        linear::{Facts, Linear},
        sym::{Arena, Node, SymId},
        VerifierLimits,
    },
};

/// A write to storage made on a path.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StoreEvent {
    pub field: String,
    pub key:   Option<SymId>,
    pub value: SymId,
}

#[derive(Clone, Debug)]
struct Frame<'a> {
    function: &'a IrFunction,
    block:    BlockId,
    index:    usize,
    values:   HashMap<ValueId, SymId>,
    locals:   Vec<Option<SymId>>,

    /// The value in the caller that receives the result of this frame.
    dest: Option<ValueId>,
}

/// The state of a single path through a function.
#[derive(Clone, Debug)]
pub struct PathState<'a> {
    frames: Vec<Frame<'a>>,

    /// The facts that hold on this path.
    pub facts: Facts,

    /// Whether storage starts out zeroed rather than unknown.
    zeroed: bool,

    scalars:  BTreeMap<String, SymId>,
    entries:  BTreeMap<String, Vec<(SymId, SymId)>>,
    versions: BTreeMap<String, usize>,

    /// Every write to storage, in order.
    pub stores: Vec<StoreEvent>,

    visits:    HashMap<(usize, String, BlockId), usize>,
    blocks:    usize,
    externals: usize,

    /// The value returned by the function once the path has finished.
    pub returned: Option<SymId>,
}

impl<'a> PathState<'a> {
    /// The number of writes to `field` so far.
    #[must_use]
    pub fn version(&self, field: &str) -> usize {
        self.versions.get(field).copied().unwrap_or(0)
    }

    fn frame(&mut self) -> Result<&mut Frame<'a>, String> {
        self.frames
            .last_mut()
            .ok_or_else(|| "the path has no active function".to_string())
    }

    fn get(&self, value: ValueId) -> Result<SymId, String> {
        self.frames
            .last()
            .and_then(|f| f.values.get(&value).copied())
            .ok_or_else(|| format!("value %{value} is used before it is defined"))
    }

    fn set(&mut self, value: ValueId, sym: SymId) -> Result<(), String> {
        self.frame()?.values.insert(value, sym);
        Ok(())
    }

    fn advance(&mut self) -> Result<(), String> {
        self.frame()?.index += 1;
        Ok(())
    }

    fn write(&mut self, field: &str, key: Option<SymId>, value: SymId) {
        match key {
            None => {
                self.scalars.insert(field.to_string(), value);
            }
            Some(key) => self.entries.entry(field.to_string()).or_default().push((key, value)),
        }
        *self.versions.entry(field.to_string()).or_insert(0) += 1;
        self.stores.push(StoreEvent {
            field: field.to_string(),
            key,
            value,
        });
    }
}

/// What a step produced.
enum Next<'a> {
    Pending(PathState<'a>),
    Finished(PathState<'a>),
}

/// The result of exploring a function.
#[derive(Debug)]
pub struct Exploration<'a> {
    /// Every path that returned successfully.
    pub paths: Vec<PathState<'a>>,

    /// Why the exploration stopped early, if it did.
    pub incomplete: Option<String>,
}

/// Explores the functions of a single contract symbolically.
#[derive(Debug)]
pub struct Explorer<'a> {
    contract:  &'a IrContract,
    summaries: &'a FunctionSummariesData,
    limits:    VerifierLimits,
    arena:     Arena,
    fuel:      Fuel,
}

impl<'a> Explorer<'a> {
    #[must_use]
    pub fn new(
        contract: &'a IrContract,
        summaries: &'a FunctionSummariesData,
        limits: VerifierLimits,
    ) -> Self {
        Self {
            contract,
            summaries,
            limits,
            arena: Arena::new(),
            fuel: Fuel::new(limits.fuel),
        }
    }

    #[must_use]
    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    #[must_use]
    pub fn contract(&self) -> &'a IrContract {
        self.contract
    }

    /// Interns `node` at type `ty` in the arena of the explorer.
    pub fn intern(&mut self, node: Node, ty: Type) -> SymId {
        self.arena.intern(node, ty)
    }

    /// Creates the state at the entry of `function`, with its parameters bound
    /// to symbolic arguments. Storage starts zeroed for the `init` handler.
    pub fn start(&mut self, function: &'a IrFunction) -> PathState<'a> {
        let mut locals = vec![None; function.locals.len()];
        for (index, (_, ty)) in function.params.iter().enumerate() {
            if let Some(local) = locals.get_mut(index) {
                *local = Some(self.arena.intern(Node::Param(index), ty.clone()));
            }
        }

        PathState {
            frames:    vec![Frame {
                function,
                block: function.entry,
                index: 0,
                values: HashMap::new(),
                locals,
                dest: None,
            }],
            facts:     Facts::new(),
            zeroed:    function.kind == FunctionKind::Init,
            scalars:   BTreeMap::new(),
            entries:   BTreeMap::new(),
            versions:  BTreeMap::new(),
            stores:    Vec::new(),
            visits:    HashMap::new(),
            blocks:    1,
            externals: 0,
            returned:  None,
        }
    }

    /// Explores every path from `start`.
    pub fn explore(&mut self, start: PathState<'a>) -> Exploration<'a> {
        let mut pending = vec![start];
        let mut paths = Vec::new();
        let mut spawned = 1;

        while let Some(state) = pending.pop() {
            let next = match self.step(state) {
                Ok(next) => next,
                Err(reason) => {
                    return Exploration {
                        paths,
                        incomplete: Some(reason),
                    }
                }
            };

            spawned += next.len().saturating_sub(1);
            if spawned > self.limits.max_paths {
                let reason = format!("the function has more than {} paths", self.limits.max_paths);
                return Exploration {
                    paths,
                    incomplete: Some(reason),
                };
            }
            for next in next {
                match next {
                    Next::Pending(state) => pending.push(state),
                    Next::Finished(state) => paths.push(state),
                }
            }
        }

        Exploration {
            paths,
            incomplete: None,
        }
    }

    /// Adds `fact ≥ 0` to the facts of `state`, returning `false` if that
    /// makes them contradictory.
    pub fn assume(&self, state: &mut PathState<'a>, (fact, atoms): (Linear, Vec<(SymId, u128)>)) -> bool {
        for (atom, max) in atoms {
            state.facts.declare(atom, max);
        }
        state.facts.assume(fact);
        state.facts.is_feasible()
    }

    /// Gets the linear form of `sym`, registering the ranges of its atoms with
    /// the facts of `state`.
    pub fn linear(&self, state: &mut PathState<'a>, sym: SymId) -> Option<Linear> {
        let (linear, atoms) = self.arena.linear(sym)?;
        for (atom, max) in atoms {
            state.facts.declare(atom, max);
        }
        Some(linear)
    }

    /// Gets the current value of `field`, or of its entry at `key` if it is a
    /// map.
    ///
    /// # Errors
    ///
    /// If the contract has no such field.
    pub fn field_value(
        &mut self,
        state: &PathState<'a>,
        field: &str,
        key: Option<SymId>,
    ) -> Result<SymId, String> {
        let declared = self
            .contract
            .field(field)
            .ok_or_else(|| format!("`{}` has no field `{field}`", self.contract.name))?;
        let ty = match &declared.ty {
            Type::Map(_, value) => (**value).clone(),
            other => other.clone(),
        };

        let initial = |arena: &mut Arena, key: Option<SymId>, version: usize| {
            if state.zeroed && version == 0 {
                arena.constant(0, ty.clone())
            } else {
                let node = Node::Field {
                    field: field.to_string(),
                    key,
                    version,
                };
                arena.intern(node, ty.clone())
            }
        };

        let Some(key) = key else {
            return Ok(match state.scalars.get(field) {
                Some(value) => *value,
                None => initial(&mut self.arena, None, 0),
            });
        };

        for (written, value) in state.entries.get(field).into_iter().flatten().rev() {
            if *written == key {
                return Ok(*value);
            }
            match (self.arena.as_const(*written), self.arena.as_const(key)) {
                (Some(a), Some(b)) if a != b => {}
                // The keys may or may not be equal, so the entry is unknown.
                _ => return Ok(initial(&mut self.arena, Some(key), state.version(field))),
            }
        }
        Ok(initial(&mut self.arena, Some(key), 0))
    }

    /// Gets the value returned by a call to the read-only `function` with
    /// `args` in the state of `path`.
    ///
    /// # Errors
    ///
    /// If the function does not exist or returns nothing.
    pub fn call_value(
        &mut self,
        state: &PathState<'a>,
        function: &str,
        args: Vec<SymId>,
    ) -> Result<SymId, String> {
        let ty = self
            .contract
            .function(function)
            .and_then(|f| f.returns.clone())
            .ok_or_else(|| format!("`{function}` does not return a value"))?;
        let reads = self
            .summaries
            .get(&self.contract.name, function)
            .map(|s| s.reads.iter().map(|f| (f.clone(), state.version(f))).collect())
            .unwrap_or_default();
        let node = Node::Call {
            function: function.to_string(),
            args,
            reads,
        };
        Ok(self.arena.intern(node, ty))
    }

    /// Checks if calls to `function` can be treated as opaque values: it
    /// returns a value and has no effects.
    #[must_use]
    pub fn is_opaque(&self, function: &str) -> bool {
        let returns = self
            .contract
            .function(function)
            .is_some_and(|f| f.returns.is_some());
        returns
            && self
                .summaries
                .get(&self.contract.name, function)
                .is_some_and(|s| s.writes.is_empty() && !s.external_calls)
    }

    fn step(&mut self, state: PathState<'a>) -> Result<Vec<Next<'a>>, String> {
        self.fuel
            .tick()
            .map_err(|out| format!("the step budget of {} was exhausted", out.budget))?;

        let Some(frame) = state.frames.last() else {
            return Ok(vec![Next::Finished(state)]);
        };
        let (function, block, index) = (frame.function, frame.block, frame.index);
        let block = function
            .block(block)
            .ok_or_else(|| format!("`{}` has no block {block}", function.name))?;

        match block.instructions.get(index) {
            Some(instruction) => self.instruction(state, &instruction.node),
            None => self.terminator(state, &block.terminator.node),
        }
    }

    fn instruction(
        &mut self,
        mut state: PathState<'a>,
        instruction: &'a Instruction,
    ) -> Result<Vec<Next<'a>>, String> {
        match instruction {
            Instruction::Const { dest, value, ty } => {
                let sym = self.arena.constant(*value, ty.clone());
                state.set(*dest, sym)?;
            }
            Instruction::Env { dest, var } => {
                let sym = self.arena.intern(Node::Env(*var), Type::of_env(*var));
                state.set(*dest, sym)?;
            }
            Instruction::LoadLocal { dest, local } => {
                let frame = state.frame()?;
                let value = frame.locals.get(*local as usize).copied().flatten();
                let ty = frame
                    .function
                    .locals
                    .get(*local as usize)
                    .map_or(Type::DEFAULT_INTEGER, |l| l.ty.clone());
                let sym = match value {
                    Some(sym) => sym,
                    None => self.arena.constant(0, ty),
                };
                state.set(*dest, sym)?;
            }
            Instruction::StoreLocal { local, value } => {
                let sym = state.get(*value)?;
                let frame = state.frame()?;
                let index = *local as usize;
                if frame.locals.len() <= index {
                    frame.locals.resize(index + 1, None);
                }
                frame.locals[index] = Some(sym);
            }
            Instruction::LoadField { dest, field, key } => {
                let key = key.map(|k| state.get(k)).transpose()?;
                let sym = self.field_value(&state, field, key)?;
                state.set(*dest, sym)?;
            }
            Instruction::StoreField { field, key, value } => {
                let key = key.map(|k| state.get(k)).transpose()?;
                let value = state.get(*value)?;
                state.write(field, key, value);
            }
            Instruction::Binary {
                dest,
                op,
                ty,
                lhs,
                rhs,
            } => return self.binary(state, *dest, *op, ty, *lhs, *rhs),
            Instruction::Unary { dest, operand, .. } => {
                let operand = state.get(*operand)?;
                let sym = self.arena.intern(Node::Not(operand), Type::Bool);
                state.set(*dest, sym)?;
            }
            Instruction::Call {
                dest,
                function,
                args,
            } => return self.call(state, *dest, function, args),
            Instruction::ExternalCall { dest, kind, .. } => {
                let sym = match kind {
                    ExternalKind::Transfer => self.arena.constant(1, Type::Bool),
                    ExternalKind::Call => {
                        state.externals += 1;
                        self.arena.intern(Node::External(state.externals), Type::Bool)
                    }
                };
                state.set(*dest, sym)?;
            }
            Instruction::Emit { .. } => {}
        }

        state.advance()?;
        Ok(vec![Next::Pending(state)])
    }

    fn binary(
        &mut self,
        mut state: PathState<'a>,
        dest: ValueId,
        op: BinaryOp,
        ty: &Type,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<Vec<Next<'a>>, String> {
        let (lhs, rhs) = (state.get(lhs)?, state.get(rhs)?);
        let result_ty = if op.is_comparison() || op.is_logical() {
            Type::Bool
        } else {
            ty.clone()
        };
        let exact = self.arena.intern(Node::Binary { op, lhs, rhs }, result_ty.clone());
        state.advance()?;

        if self.arena.as_const(exact).is_some() {
            state.set(dest, exact)?;
            return Ok(vec![Next::Pending(state)]);
        }

        match op {
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => {
                let Some(linear) = self.linear(&mut state, exact) else {
                    state.set(dest, exact)?;
                    return Ok(vec![Next::Pending(state)]);
                };

                // A subtraction wraps below zero, the others above the maximum.
                let (fits, wraps) = if op == BinaryOp::Sub {
                    (Some(linear.clone()), linear.scale(-1).and_then(|l| l.offset(-1)))
                } else {
                    let Ok(max) = i128::try_from(ty.max_value()) else {
                        state.set(dest, exact)?;
                        return Ok(vec![Next::Pending(state)]);
                    };
                    (
                        linear.scale(-1).and_then(|l| l.offset(max)),
                        linear.offset(-max).and_then(|l| l.offset(-1)),
                    )
                };
                let wrapped = self.arena.intern(Node::Wrapped { op, lhs, rhs }, result_ty);

                let mut next = Vec::new();
                for (fact, value) in [(fits, exact), (wraps, wrapped)] {
                    let Some(fact) = fact else {
                        continue;
                    };
                    let mut path = state.clone();
                    if self.assume(&mut path, (fact, Vec::new())) {
                        path.set(dest, value)?;
                        next.push(Next::Pending(path));
                    }
                }
                Ok(next)
            }
            BinaryOp::Div | BinaryOp::Mod => {
                match self.arena.as_const(rhs) {
                    Some(0) => return Ok(Vec::new()),
                    Some(_) => {}
                    None => {
                        // Division by zero reverts, so the path continues only
                        // if the divisor is positive.
                        let Some(divisor) = self.linear(&mut state, rhs) else {
                            state.set(dest, exact)?;
                            return Ok(vec![Next::Pending(state)]);
                        };
                        let Some(positive) = divisor.offset(-1) else {
                            return Err("a divisor is out of range".to_string());
                        };
                        if !self.assume(&mut state, (positive, Vec::new())) {
                            return Ok(Vec::new());
                        }
                    }
                }
                state.set(dest, exact)?;
                Ok(vec![Next::Pending(state)])
            }
            _ => {
                state.set(dest, exact)?;
                Ok(vec![Next::Pending(state)])
            }
        }
    }

    fn call(
        &mut self,
        mut state: PathState<'a>,
        dest: Option<ValueId>,
        name: &str,
        args: &[ValueId],
    ) -> Result<Vec<Next<'a>>, String> {
        let callee = self
            .contract
            .function(name)
            .ok_or_else(|| format!("`{}` has no function `{name}`", self.contract.name))?;
        let args = args
            .iter()
            .map(|a| state.get(*a))
            .collect::<Result<Vec<_>, _>>()?;
        state.advance()?;

        if self.is_opaque(name) {
            let value = self.call_value(&state, name, args)?;
            if let Some(dest) = dest {
                state.set(dest, value)?;
            }
            return Ok(vec![Next::Pending(state)]);
        }

        if state.frames.len() >= self.limits.max_call_depth {
            return Err(format!(
                "internal calls nest deeper than {}",
                self.limits.max_call_depth
            ));
        }
        let mut locals = vec![None; callee.locals.len().max(args.len())];
        for (local, arg) in locals.iter_mut().zip(args) {
            *local = Some(arg);
        }
        state.frames.push(Frame {
            function: callee,
            block: callee.entry,
            index: 0,
            values: HashMap::new(),
            locals,
            dest,
        });
        self.enter(&mut state, callee.entry)?;

        Ok(vec![Next::Pending(state)])
    }

    fn terminator(
        &mut self,
        mut state: PathState<'a>,
        terminator: &'a Terminator,
    ) -> Result<Vec<Next<'a>>, String> {
        match terminator {
            Terminator::Jump(target) => {
                self.goto(&mut state, *target)?;
                Ok(vec![Next::Pending(state)])
            }
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => self.branch(&state, *cond, &[(true, *then_block), (false, *else_block)]),
            Terminator::Guard { cond, next, .. } => self.branch(&state, *cond, &[(true, *next)]),
            Terminator::Return(value) => {
                let value = value.map(|v| state.get(v)).transpose()?;
                let Some(frame) = state.frames.pop() else {
                    return Err("the path has no active function".to_string());
                };
                match state.frames.last_mut() {
                    None => {
                        state.returned = value;
                        Ok(vec![Next::Finished(state)])
                    }
                    Some(caller) => {
                        if let (Some(dest), Some(value)) = (frame.dest, value) {
                            caller.values.insert(dest, value);
                        }
                        Ok(vec![Next::Pending(state)])
                    }
                }
            }
            Terminator::Revert(_) => Ok(Vec::new()),
        }
    }

    /// Continues `state` at each of `targets` on which the condition `cond`
    /// may take the paired truth value.
    fn branch(
        &mut self,
        state: &PathState<'a>,
        cond: ValueId,
        targets: &[(bool, BlockId)],
    ) -> Result<Vec<Next<'a>>, String> {
        let cond = state.get(cond)?;
        let mut next = Vec::new();
        for (truth, target) in targets {
            let Some(facts) = self.arena.implied(cond, *truth) else {
                continue;
            };
            let mut path = state.clone();
            let mut feasible = true;
            for fact in facts {
                feasible &= self.assume(&mut path, fact);
            }
            if feasible {
                self.goto(&mut path, *target)?;
                next.push(Next::Pending(path));
            }
        }
        Ok(next)
    }

    fn goto(&self, state: &mut PathState<'a>, target: BlockId) -> Result<(), String> {
        let frame = state.frame()?;
        frame.block = target;
        frame.index = 0;
        frame.values.clear();
        self.enter(state, target)
    }

    /// Accounts for entering `block` in the innermost frame of `state`.
    fn enter(&self, state: &mut PathState<'a>, block: BlockId) -> Result<(), String> {
        let depth = state.frames.len();
        let function = state.frame()?.function.name.clone();
        state.blocks += 1;
        if state.blocks > self.limits.max_blocks_per_path {
            return Err(format!(
                "a path visits more than {} blocks",
                self.limits.max_blocks_per_path
            ));
        }

        let visits = state.visits.entry((depth, function, block)).or_insert(0);
        *visits += 1;
        if *visits > self.limits.loop_unroll + 1 {
            return Err(format!(
                "a loop runs more than {} times",
                self.limits.loop_unroll
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        fuel::Fuel,
        ir::{lower::lower, IrModule},
        pass::analysis::summaries::summarize,
        syntax::parse,
        verify::{explore::Explorer, VerifierLimits},
    };

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn prunes_paths_that_contradict_guards() -> anyhow::Result<()> {
        let module = module(
            "contract A {\n x: u8\n f(n: u8) {\n require(n < 10)\n if n > 20 { self.x = 1 } else { self.x = 2 }\n }\n}",
        )?;
        let summaries = summarize(&module, &mut Fuel::new(10_000), "test")?;
        let contract = &module.contracts[0];
        let function = contract.function("f").ok_or_else(|| anyhow::anyhow!("no f"))?;

        let mut explorer = Explorer::new(contract, &summaries, VerifierLimits::default());
        let start = explorer.start(function);
        let exploration = explorer.explore(start);

        assert!(exploration.incomplete.is_none());
        assert_eq!(exploration.paths.len(), 1);
        let store = &exploration.paths[0].stores[0];
        assert_eq!(explorer.arena().as_const(store.value), Some(2));

        Ok(())
    }

    #[test]
    fn forks_on_wrap_around() -> anyhow::Result<()> {
        let module = module("contract A {\n x: u8\n f(n: u8) { self.x = self.x - n }\n}")?;
        let summaries = summarize(&module, &mut Fuel::new(10_000), "test")?;
        let contract = &module.contracts[0];
        let function = contract.function("f").ok_or_else(|| anyhow::anyhow!("no f"))?;

        let mut explorer = Explorer::new(contract, &summaries, VerifierLimits::default());
        let start = explorer.start(function);
        let exploration = explorer.explore(start);

        assert_eq!(exploration.paths.len(), 2);
        let underflows = exploration
            .paths
            .iter()
            .filter(|p| explorer.arena().has_underflow(p.stores[0].value))
            .count();
        assert_eq!(underflows, 1);

        Ok(())
    }

    #[test]
    fn gives_up_on_long_loops() -> anyhow::Result<()> {
        let module = module(
            "contract A {\n x: u64\n f(n: u64) {\n let i = 0\n while i < n { i += 1 }\n self.x = i\n }\n}",
        )?;
        let summaries = summarize(&module, &mut Fuel::new(10_000), "test")?;
        let contract = &module.contracts[0];
        let function = contract.function("f").ok_or_else(|| anyhow::anyhow!("no f"))?;

        let mut explorer = Explorer::new(contract, &summaries, VerifierLimits::default());
        let start = explorer.start(function);
        let exploration = explorer.explore(start);

        assert!(exploration.incomplete.is_some());

        Ok(())
    }
}
