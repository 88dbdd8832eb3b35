//! Linear integer constraints over symbolic atoms.
//!
//! A path condition is a conjunction of facts of the form `Σ cᵢ·xᵢ + k ≥ 0`,
//! where each atom `xᵢ` is an opaque symbolic value with a known range. The
//! decision procedure is Fourier-Motzkin elimination with integer tightening.
//! It is sound for infeasibility: whenever it claims that a set of facts has no
//! solution, none exists. It may fail to notice infeasibility, and it gives up
//! (answering "feasible") when the problem grows beyond a fixed size or a
//! coefficient overflows.

use std::collections::BTreeMap;

use itertools::Itertools;

use crate::verify::sym::SymId;

/// The maximum number of constraints that elimination will hold at once before
/// giving up.
const MAX_CONSTRAINTS: usize = 400;

/// A linear expression `Σ cᵢ·xᵢ + k` over atoms.
#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Linear {
    pub terms:    BTreeMap<SymId, i128>,
    pub constant: i128,
}

impl Linear {
    #[must_use]
    pub fn constant(constant: i128) -> Self {
        Self {
            terms: BTreeMap::new(),
            constant,
        }
    }

    #[must_use]
    pub fn atom(atom: SymId) -> Self {
        Self {
            terms:    BTreeMap::from([(atom, 1)]),
            constant: 0,
        }
    }

    /// The value of the expression if it mentions no atoms.
    #[must_use]
    pub fn as_constant(&self) -> Option<i128> {
        self.terms.is_empty().then_some(self.constant)
    }

    /// Computes `self + other`, or `None` on overflow.
    #[must_use]
    pub fn add(&self, other: &Linear) -> Option<Linear> {
        let mut result = self.clone();
        for (atom, coefficient) in &other.terms {
            let entry = result.terms.entry(*atom).or_insert(0);
            *entry = entry.checked_add(*coefficient)?;
        }
        result.terms.retain(|_, c| *c != 0);
        result.constant = result.constant.checked_add(other.constant)?;
        Some(result)
    }

    /// Computes `self - other`, or `None` on overflow.
    #[must_use]
    pub fn sub(&self, other: &Linear) -> Option<Linear> {
        self.add(&other.scale(-1)?)
    }

    /// Computes `factor · self`, or `None` on overflow.
    #[must_use]
    pub fn scale(&self, factor: i128) -> Option<Linear> {
        if factor == 0 {
            return Some(Linear::default());
        }
        let terms = self
            .terms
            .iter()
            .map(|(atom, c)| Some((*atom, c.checked_mul(factor)?)))
            .collect::<Option<BTreeMap<_, _>>>()?;
        let constant = self.constant.checked_mul(factor)?;
        Some(Linear { terms, constant })
    }

    /// Computes `self + offset`, or `None` on overflow.
    #[must_use]
    pub fn offset(&self, offset: i128) -> Option<Linear> {
        let mut result = self.clone();
        result.constant = result.constant.checked_add(offset)?;
        Some(result)
    }

    /// Divides the fact `self ≥ 0` through by the greatest common divisor of
    /// its coefficients, rounding the constant down. Over the integers the
    /// result has exactly the same solutions.
    fn tighten(mut self) -> Linear {
        let divisor = self
            .terms
            .values()
            .map(|c| c.unsigned_abs())
            .fold(0, gcd);
        if divisor > 1 {
            if let Ok(divisor) = i128::try_from(divisor) {
                for c in self.terms.values_mut() {
                    *c /= divisor;
                }
                self.constant = self.constant.div_euclid(divisor);
            }
        }
        self
    }
}

fn gcd(a: u128, b: u128) -> u128 {
    if b == 0 { a } else { gcd(b, a % b) }
}

/// A conjunction of facts `e ≥ 0`, together with the range of every atom they
/// mention.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Facts {
    facts: Vec<Linear>,

    /// The largest value of each atom, if it is representable. Every atom is
    /// at least zero.
    ranges: BTreeMap<SymId, Option<i128>>,
}

impl Facts {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `atom` lies between zero and `max`.
    pub fn declare(&mut self, atom: SymId, max: u128) {
        self.ranges
            .entry(atom)
            .or_insert_with(|| i128::try_from(max).ok());
    }

    /// Adds the fact `fact ≥ 0`.
    pub fn assume(&mut self, fact: Linear) {
        if !self.facts.contains(&fact) {
            self.facts.push(fact);
        }
    }

    /// The facts assumed so far.
    #[must_use]
    pub fn facts(&self) -> &[Linear] {
        &self.facts
    }

    /// Checks if the facts may have a solution. A `false` answer is definite.
    #[must_use]
    pub fn is_feasible(&self) -> bool {
        feasible(self.with_ranges(self.facts.clone()))
    }

    /// Checks if `goal ≥ 0` follows from the facts. A `true` answer is
    /// definite.
    #[must_use]
    pub fn entails(&self, goal: &Linear) -> bool {
        // The goal follows if its negation, `-goal - 1 ≥ 0`, is infeasible.
        let Some(negated) = goal.scale(-1).and_then(|g| g.offset(-1)) else {
            return false;
        };
        let mut facts = self.facts.clone();
        facts.push(negated);
        !feasible(self.with_ranges(facts))
    }

    /// Adds the range facts of every atom mentioned in `facts`.
    fn with_ranges(&self, mut facts: Vec<Linear>) -> Vec<Linear> {
        let atoms = facts
            .iter()
            .flat_map(|f| f.terms.keys().copied())
            .sorted_unstable()
            .dedup()
            .collect::<Vec<_>>();
        for atom in atoms {
            facts.push(Linear::atom(atom));
            if let Some(Some(max)) = self.ranges.get(&atom) {
                facts.push(Linear {
                    terms:    BTreeMap::from([(atom, -1)]),
                    constant: *max,
                });
            }
        }
        facts
    }
}

/// Decides whether `facts` may have a solution by eliminating one atom at a
/// time.
fn feasible(facts: Vec<Linear>) -> bool {
    let mut facts = facts.into_iter().map(Linear::tighten).collect::<Vec<_>>();

    loop {
        let mut remaining = Vec::with_capacity(facts.len());
        for fact in facts {
            match fact.as_constant() {
                Some(constant) if constant < 0 => return false,
                Some(_) => {}
                None => remaining.push(fact),
            }
        }
        facts = remaining.into_iter().sorted().dedup().collect();

        // Eliminate the atom that produces the fewest new constraints.
        let Some(atom) = facts
            .iter()
            .flat_map(|f| f.terms.keys().copied())
            .sorted_unstable()
            .dedup()
            .min_by_key(|atom| {
                let positive = facts.iter().filter(|f| f.terms.get(atom).is_some_and(|c| *c > 0)).count();
                let negative = facts.iter().filter(|f| f.terms.get(atom).is_some_and(|c| *c < 0)).count();
                positive * negative
            })
        else {
            return true;
        };

        let (mut positive, mut negative, mut next) = (Vec::new(), Vec::new(), Vec::new());
        for fact in facts {
            match fact.terms.get(&atom).copied() {
                Some(c) if c > 0 => positive.push((c, fact)),
                Some(c) => negative.push((c, fact)),
                None => next.push(fact),
            }
        }
        if next.len() + positive.len() * negative.len() > MAX_CONSTRAINTS {
            return true;
        }

        for ((p, upper), (n, lower)) in positive.iter().cartesian_product(&negative) {
            // `-n·upper + p·lower` cancels the atom, as `p > 0` and `n < 0`.
            let combined = upper
                .scale(-n)
                .zip(lower.scale(*p))
                .and_then(|(u, l)| u.add(&l));
            match combined {
                Some(fact) => next.push(fact.tighten()),
                None => return true,
            }
        }
        facts = next;
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use crate::verify::linear::{Facts, Linear};

    fn linear(terms: &[(usize, i128)], constant: i128) -> Linear {
        Linear {
            terms: terms.iter().copied().collect::<BTreeMap<_, _>>(),
            constant,
        }
    }

    #[test]
    fn detects_contradictory_bounds() {
        let mut facts = Facts::new();
        // x - y - 1 ≥ 0 and y - x ≥ 0
        facts.assume(linear(&[(0, 1), (1, -1)], -1));
        facts.assume(linear(&[(0, -1), (1, 1)], 0));
        assert!(!facts.is_feasible());
    }

    #[test]
    fn uses_atom_ranges() {
        let mut facts = Facts::new();
        facts.declare(0, 255);
        facts.assume(linear(&[(0, 1)], -256));
        assert!(!facts.is_feasible());

        let mut facts = Facts::new();
        facts.declare(0, 255);
        facts.assume(linear(&[(0, 1)], -255));
        assert!(facts.is_feasible());
    }

    #[test]
    fn entails_the_vesting_bound() {
        // With vested v, claimed c and amount a, the guard a ≤ v - c means that
        // c + a ≤ v after the claim.
        let (v, c, a) = (0, 1, 2);
        let mut facts = Facts::new();
        for atom in [v, c, a] {
            facts.declare(atom, u128::from(u64::MAX));
        }
        facts.assume(linear(&[(v, 1), (c, -1)], 0));
        facts.assume(linear(&[(v, 1), (c, -1), (a, -1)], 0));

        assert!(facts.entails(&linear(&[(v, 1), (c, -1), (a, -1)], 0)));
        assert!(!facts.entails(&linear(&[(c, 1), (a, 1), (v, -1)], -1)));
    }

    #[test]
    fn integer_tightening_closes_gaps() {
        // 2x - 1 ≥ 0 and 1 - 2x ≥ 0 only hold for x = 1/2.
        let mut facts = Facts::new();
        facts.assume(linear(&[(0, 2)], -1));
        facts.assume(linear(&[(0, -2)], 1));
        assert!(!facts.is_feasible());
    }
}
