//! Control-flow graph utilities over lowered functions.
//!
//! A [`Cfg`] is computed once per function and answers the structural
//! questions that the scanner and verifier ask repeatedly: predecessors,
//! reachability, a reverse post-order and dominance.

use crate::ir::{BlockId, IrFunction};

/// The control-flow graph of a single function.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Cfg {
    entry:        BlockId,
    successors:   Vec<Vec<BlockId>>,
    predecessors: Vec<Vec<BlockId>>,

    /// The reachable blocks in reverse post-order.
    rpo: Vec<BlockId>,

    /// The position of each block in `rpo`, or `None` if it is unreachable.
    rpo_index: Vec<Option<usize>>,

    /// The immediate dominator of each reachable block. The entry block is its
    /// own immediate dominator.
    idom: Vec<Option<BlockId>>,
}

impl Cfg {
    /// Computes the control-flow graph of `function`.
    #[must_use]
    pub fn new(function: &IrFunction) -> Self {
        let count = function.blocks.len();
        let successors = function
            .blocks
            .iter()
            .map(|block| {
                block
                    .terminator
                    .node
                    .successors()
                    .into_iter()
                    .filter(|s| *s < count)
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();

        let mut predecessors = vec![Vec::new(); count];
        for (block, succs) in successors.iter().enumerate() {
            for succ in succs {
                if !predecessors[*succ].contains(&block) {
                    predecessors[*succ].push(block);
                }
            }
        }

        let mut cfg = Self {
            entry: function.entry,
            successors,
            predecessors,
            rpo: Vec::new(),
            rpo_index: vec![None; count],
            idom: vec![None; count],
        };
        if function.entry < count {
            cfg.compute_rpo();
            cfg.compute_dominators();
        }
        cfg
    }

    fn compute_rpo(&mut self) {
        let count = self.successors.len();
        let mut visited = vec![false; count];
        let mut post_order = Vec::with_capacity(count);

        // An explicit stack of (block, next successor to visit) keeps deep
        // graphs from exhausting the native stack.
        let mut stack = vec![(self.entry, 0usize)];
        visited[self.entry] = true;
        while let Some((block, next)) = stack.pop() {
            if let Some(&succ) = self.successors[block].get(next) {
                stack.push((block, next + 1));
                if !visited[succ] {
                    visited[succ] = true;
                    stack.push((succ, 0));
                }
            } else {
                post_order.push(block);
            }
        }

        post_order.reverse();
        for (index, block) in post_order.iter().enumerate() {
            self.rpo_index[*block] = Some(index);
        }
        self.rpo = post_order;
    }

    /// Computes immediate dominators with the iterative algorithm of Cooper,
    /// Harvey and Kennedy.
    fn compute_dominators(&mut self) {
        self.idom[self.entry] = Some(self.entry);
        let mut changed = true;
        while changed {
            changed = false;
            for &block in self.rpo.iter().skip(1) {
                let mut new_idom = None;
                for &pred in &self.predecessors[block] {
                    if self.idom[pred].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(current) => self.intersect(pred, current),
                    });
                }
                if new_idom.is_some() && self.idom[block] != new_idom {
                    self.idom[block] = new_idom;
                    changed = true;
                }
            }
        }
    }

    fn intersect(&self, mut a: BlockId, mut b: BlockId) -> BlockId {
        let index = |block: BlockId| self.rpo_index[block].unwrap_or(usize::MAX);
        while a != b {
            while index(a) > index(b) {
                match self.idom[a] {
                    Some(next) if next != a => a = next,
                    _ => return b,
                }
            }
            while index(b) > index(a) {
                match self.idom[b] {
                    Some(next) if next != b => b = next,
                    _ => return a,
                }
            }
        }
        a
    }

    /// The entry block of the function.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// The number of blocks in the function.
    #[must_use]
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    /// Checks if the function has no blocks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    #[must_use]
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(block).map_or(&[], Vec::as_slice)
    }

    #[must_use]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(block).map_or(&[], Vec::as_slice)
    }

    /// The blocks reachable from the entry in reverse post-order.
    #[must_use]
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Checks if `block` is reachable from the entry block.
    #[must_use]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.get(block).is_some_and(Option::is_some)
    }

    /// The immediate dominator of `block`, or `None` for the entry block and
    /// unreachable blocks.
    #[must_use]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom
            .get(block)
            .copied()
            .flatten()
            .filter(|idom| *idom != block)
    }

    /// Checks if `a` dominates `b`. Every block dominates itself.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(next) => current = next,
                None => return false,
            }
        }
    }

    /// The edges `(from, to)` where `to` dominates `from`, which are exactly
    /// the back edges of the natural loops in the function.
    #[must_use]
    pub fn back_edges(&self) -> Vec<(BlockId, BlockId)> {
        self.rpo
            .iter()
            .flat_map(|&from| {
                self.successors(from)
                    .iter()
                    .filter(move |&&to| self.dominates(to, from))
                    .map(move |&to| (from, to))
            })
            .collect()
    }

    /// The blocks in the natural loop with the back edge `from -> header`.
    #[must_use]
    pub fn natural_loop(&self, from: BlockId, header: BlockId) -> Vec<BlockId> {
        let mut body = vec![header];
        let mut stack = vec![from];
        while let Some(block) = stack.pop() {
            if body.contains(&block) {
                continue;
            }
            body.push(block);
            stack.extend(self.predecessors(block).iter().copied());
        }
        body.sort_unstable();
        body
    }

    /// The blocks reachable from `start` by following at least one edge.
    #[must_use]
    pub fn reachable_from(&self, start: BlockId) -> Vec<bool> {
        let mut seen = vec![false; self.len()];
        let mut stack = self.successors(start).to_vec();
        while let Some(block) = stack.pop() {
            if seen.get(block).copied().unwrap_or(true) {
                continue;
            }
            seen[block] = true;
            stack.extend(self.successors(block).iter().copied());
        }
        seen
    }
}

#[cfg(test)]
mod test {
    use aurion_errors::location::LineIndex;

    use crate::{
        ir::{cfg::Cfg, lower::lower, IrModule},
        syntax::parse,
    };

    fn module(source: &str) -> anyhow::Result<IrModule> {
        let ast = parse(source).map_err(|d| anyhow::anyhow!("{d:?}"))?;
        lower(&ast, &LineIndex::new(source)).map_err(|e| anyhow::anyhow!("{e:?}"))
    }

    #[test]
    fn computes_dominators_of_a_diamond() -> anyhow::Result<()> {
        let module = module("contract A { x: u64\n f(c: bool) { if c { self.x = 1 } else { self.x = 2 }\n self.x = 3 } }")?;
        let cfg = Cfg::new(&module.contracts[0].functions[0]);

        // entry = 0, then = 1, join = 2, else = 3
        assert_eq!(cfg.idom(1), Some(0));
        assert_eq!(cfg.idom(3), Some(0));
        assert_eq!(cfg.idom(2), Some(0));
        assert!(cfg.dominates(0, 2));
        assert!(!cfg.dominates(1, 2));
        assert_eq!(cfg.predecessors(2).len(), 2);
        assert!(cfg.back_edges().is_empty());

        Ok(())
    }

    #[test]
    fn finds_loops() -> anyhow::Result<()> {
        let module = module("contract A { f(n: u64) { let i = 0\n while i < n { i += 1 } } }")?;
        let cfg = Cfg::new(&module.contracts[0].functions[0]);

        let back_edges = cfg.back_edges();
        assert_eq!(back_edges, vec![(2, 1)]);
        assert_eq!(cfg.natural_loop(2, 1), vec![1, 2]);
        assert!(cfg.reachable_from(2)[1]);

        Ok(())
    }

    #[test]
    fn unreachable_blocks_are_not_dominated() -> anyhow::Result<()> {
        let module = module("contract A { x: u64\n f() { revert()\n self.x = 1 } }")?;
        let cfg = Cfg::new(&module.contracts[0].functions[0]);

        assert!(cfg.is_reachable(0));
        assert!(!cfg.is_reachable(1));
        assert!(!cfg.dominates(0, 1));

        Ok(())
    }
}
