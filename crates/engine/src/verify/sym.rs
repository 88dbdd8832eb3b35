//! Symbolic values.
//!
//! Every symbolic value is interned in an [`Arena`], so that two computations
//! of the same expression over the same inputs share a [`SymId`]. This is what
//! lets the verifier relate the value of a bound before and after a function
//! runs: if nothing the bound depends on has changed, both evaluations are the
//! same atom.

use std::collections::HashMap;

use crate::{
    ir::{interp::eval_binary, types::Type},
    syntax::ast::{BinaryOp, EnvVar},
    verify::linear::Linear,
};

/// The identity of an interned symbolic value.
pub type SymId = usize;

/// A symbolic expression.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Node {
    Const(u128),

    /// The argument with the given index of the function being verified.
    Param(usize),
    Env(EnvVar),

    /// A storage location as it was before the `version`th write to the
    /// field, for locations whose value the explorer does not track.
    Field {
        field:   String,
        key:     Option<SymId>,
        version: usize,
    },

    /// An operation that did not wrap on the path that computed it.
    Binary {
        op:  BinaryOp,
        lhs: SymId,
        rhs: SymId,
    },

    /// An addition, subtraction or multiplication that wrapped around.
    Wrapped {
        op:  BinaryOp,
        lhs: SymId,
        rhs: SymId,
    },
    Not(SymId),

    /// The result of calling a read-only function, given the versions of the
    /// fields it reads.
    Call {
        function: String,
        args:     Vec<SymId>,
        reads:    Vec<(String, usize)>,
    },

    /// The success flag of the call out of the contract with the given index.
    External(usize),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct Sym {
    node: Node,
    ty:   Type,
}

/// The interning store for symbolic values.
#[derive(Clone, Debug, Default)]
pub struct Arena {
    syms:  Vec<Sym>,
    index: HashMap<Sym, SymId>,
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `node` at type `ty`, folding operations on constants.
    pub fn intern(&mut self, node: Node, ty: Type) -> SymId {
        let node = self.fold(node, &ty);
        let sym = Sym { node, ty };
        if let Some(id) = self.index.get(&sym) {
            return *id;
        }
        let id = self.syms.len();
        self.syms.push(sym.clone());
        self.index.insert(sym, id);
        id
    }

    /// Interns the constant `value` at type `ty`.
    pub fn constant(&mut self, value: u128, ty: Type) -> SymId {
        let value = ty.wrap(value);
        self.intern(Node::Const(value), ty)
    }

    /// Gets the expression `id` stands for.
    ///
    /// # Panics
    ///
    /// If `id` was not produced by this arena.
    #[must_use]
    pub fn node(&self, id: SymId) -> &Node {
        &self.syms[id].node
    }

    /// Gets the type of `id`.
    ///
    /// # Panics
    ///
    /// If `id` was not produced by this arena.
    #[must_use]
    pub fn ty(&self, id: SymId) -> &Type {
        &self.syms[id].ty
    }

    #[must_use]
    pub fn as_const(&self, id: SymId) -> Option<u128> {
        match self.node(id) {
            Node::Const(value) => Some(*value),
            _ => None,
        }
    }

    fn fold(&self, node: Node, ty: &Type) -> Node {
        match &node {
            Node::Binary { op, lhs, rhs } => {
                let operand_ty = self.ty(*lhs).clone();
                match (self.as_const(*lhs), self.as_const(*rhs)) {
                    (Some(l), Some(r)) => eval_binary(*op, &operand_ty, l, r)
                        .map_or(node, |value| Node::Const(ty.wrap(value))),
                    _ => node,
                }
            }
            Node::Not(operand) => self
                .as_const(*operand)
                .map_or(node, |value| Node::Const(u128::from(value == 0))),
            _ => node,
        }
    }

    /// Converts `id` into a linear expression over atoms, together with the
    /// atoms it mentions and their maximum values. Returns `None` if a
    /// constant does not fit the coefficient domain.
    #[must_use]
    pub fn linear(&self, id: SymId) -> Option<(Linear, Vec<(SymId, u128)>)> {
        let mut atoms = Vec::new();
        let linear = self.linear_into(id, &mut atoms)?;
        Some((linear, atoms))
    }

    fn linear_into(&self, id: SymId, atoms: &mut Vec<(SymId, u128)>) -> Option<Linear> {
        let ty = self.ty(id);
        let modulus = || i128::try_from(ty.max_value()).ok()?.checked_add(1);
        let as_atom = |atoms: &mut Vec<(SymId, u128)>| {
            atoms.push((id, ty.max_value()));
            Some(Linear::atom(id))
        };

        match self.node(id) {
            Node::Const(value) => i128::try_from(*value).ok().map(Linear::constant),
            Node::Binary { op, lhs, rhs } | Node::Wrapped { op, lhs, rhs }
                if matches!(op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul) =>
            {
                let wrapped = matches!(self.node(id), Node::Wrapped { .. });
                let (l, r) = (self.linear_into(*lhs, atoms)?, self.linear_into(*rhs, atoms)?);
                let exact = match op {
                    BinaryOp::Add => l.add(&r)?,
                    BinaryOp::Sub => l.sub(&r)?,
                    _ => match (l.as_constant(), r.as_constant()) {
                        (Some(k), _) => r.scale(k)?,
                        (_, Some(k)) => l.scale(k)?,
                        _ => return as_atom(atoms),
                    },
                };
                match (wrapped, op) {
                    (false, _) => Some(exact),
                    (true, BinaryOp::Add) => exact.offset(-modulus()?),
                    (true, BinaryOp::Sub) => exact.offset(modulus()?),
                    (true, _) => as_atom(atoms),
                }
            }
            _ => as_atom(atoms),
        }
    }

    /// Checks if `id` is derived from a subtraction that wrapped below zero.
    #[must_use]
    pub fn has_underflow(&self, id: SymId) -> bool {
        match self.node(id) {
            Node::Wrapped {
                op: BinaryOp::Sub, ..
            } => true,
            Node::Binary { lhs, rhs, .. } | Node::Wrapped { lhs, rhs, .. } => {
                self.has_underflow(*lhs) || self.has_underflow(*rhs)
            }
            Node::Not(operand) => self.has_underflow(*operand),
            _ => false,
        }
    }

    /// Computes the facts implied by the boolean `id` evaluating to `truth`.
    ///
    /// Returns `None` if `id` is a constant other than `truth`, meaning that
    /// the path is impossible. Conditions that cannot be expressed as linear
    /// facts imply nothing.
    #[must_use]
    pub fn implied(&self, id: SymId, truth: bool) -> Option<Vec<(Linear, Vec<(SymId, u128)>)>> {
        let mut facts = Vec::new();
        match self.node(id) {
            Node::Const(value) => return ((*value != 0) == truth).then_some(facts),
            Node::Not(operand) => return self.implied(*operand, !truth),
            Node::Binary { op, lhs, rhs } => match (op, truth) {
                (BinaryOp::And, true) | (BinaryOp::Or, false) => {
                    facts.extend(self.implied(*lhs, truth)?);
                    facts.extend(self.implied(*rhs, truth)?);
                }
                (BinaryOp::And | BinaryOp::Or, _) => {}
                (op, truth) if op.is_comparison() => {
                    let Some(((l, mut atoms), (r, rhs_atoms))) = self.linear(*lhs).zip(self.linear(*rhs))
                    else {
                        return Some(facts);
                    };
                    atoms.extend(rhs_atoms);
                    let op = if truth { *op } else { negate(*op) };
                    let differences = match op {
                        BinaryOp::Lt => vec![r.sub(&l).and_then(|d| d.offset(-1))],
                        BinaryOp::Le => vec![r.sub(&l)],
                        BinaryOp::Gt => vec![l.sub(&r).and_then(|d| d.offset(-1))],
                        BinaryOp::Ge => vec![l.sub(&r)],
                        BinaryOp::Eq => vec![l.sub(&r), r.sub(&l)],
                        _ => Vec::new(),
                    };
                    facts.extend(
                        differences
                            .into_iter()
                            .flatten()
                            .map(|fact| (fact, atoms.clone())),
                    );
                }
                _ => {}
            },
            _ if *self.ty(id) == Type::Bool => {
                let fact = if truth {
                    Linear::atom(id).offset(-1)
                } else {
                    Linear::atom(id).scale(-1)
                };
                facts.extend(fact.map(|fact| (fact, vec![(id, 1)])));
            }
            _ => {}
        }
        Some(facts)
    }
}

/// The comparison that holds exactly when `op` does not.
fn negate(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Ge,
        BinaryOp::Le => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Le,
        BinaryOp::Ge => BinaryOp::Lt,
        BinaryOp::Eq => BinaryOp::Ne,
        BinaryOp::Ne => BinaryOp::Eq,
        other => other,
    }
}

#[cfg(test)]
mod test {
    use crate::{
        ir::types::Type,
        syntax::ast::{BinaryOp, EnvVar},
        verify::sym::{Arena, Node},
    };

    #[test]
    fn interning_shares_identical_expressions() {
        let mut arena = Arena::new();
        let sender = arena.intern(Node::Env(EnvVar::Sender), Type::Address);
        let again = arena.intern(Node::Env(EnvVar::Sender), Type::Address);
        assert_eq!(sender, again);

        let two = arena.constant(2, Type::Uint(8));
        let three = arena.constant(3, Type::Uint(8));
        let sum = arena.intern(
            Node::Binary {
                op:  BinaryOp::Add,
                lhs: two,
                rhs: three,
            },
            Type::Uint(8),
        );
        assert_eq!(arena.as_const(sum), Some(5));
    }

    #[test]
    fn wrapped_subtraction_is_offset_by_the_modulus() -> anyhow::Result<()> {
        let mut arena = Arena::new();
        let x = arena.intern(Node::Param(0), Type::Uint(8));
        let y = arena.intern(Node::Param(1), Type::Uint(8));
        let wrapped = arena.intern(
            Node::Wrapped {
                op:  BinaryOp::Sub,
                lhs: x,
                rhs: y,
            },
            Type::Uint(8),
        );

        let (linear, atoms) = arena
            .linear(wrapped)
            .ok_or_else(|| anyhow::anyhow!("not linear"))?;
        assert_eq!(linear.constant, 256);
        assert_eq!(linear.terms.get(&y), Some(&-1));
        assert_eq!(atoms.len(), 2);
        assert!(arena.has_underflow(wrapped));

        Ok(())
    }

    #[test]
    fn negated_equality_implies_nothing() -> anyhow::Result<()> {
        let mut arena = Arena::new();
        let sender = arena.intern(Node::Env(EnvVar::Sender), Type::Address);
        let owner = arena.intern(
            Node::Field {
                field:   "owner".to_string(),
                key:     None,
                version: 0,
            },
            Type::Address,
        );
        let eq = arena.intern(
            Node::Binary {
                op:  BinaryOp::Eq,
                lhs: sender,
                rhs: owner,
            },
            Type::Bool,
        );

        let holds = arena.implied(eq, true).ok_or_else(|| anyhow::anyhow!("impossible"))?;
        assert_eq!(holds.len(), 2);
        let fails = arena.implied(eq, false).ok_or_else(|| anyhow::anyhow!("impossible"))?;
        assert!(fails.is_empty());

        Ok(())
    }
}
