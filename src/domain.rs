//! Core abstract-domain traits.
//!
//! Every abstract value is value-typed: cloning is explicit and no aliasing
//! is observable. Lattice operations are total on valid inputs.
//!
//! # Lattice Properties
//!
//! An abstract domain must satisfy:
//! - Reflexivity: `∀a. a ⊑ a`
//! - Transitivity: `∀a,b,c. a ⊑ b ∧ b ⊑ c ⇒ a ⊑ c`
//! - `⊥ ⊑ a` and `a ⊑ ⊤` for every `a`
//! - `join` is a least upper bound, `meet` a greatest lower bound
//! - `a ⊑ a ∇ b`, and widening every step terminates any ascending chain
//! - `a ⊓ b ⊑ a ∆ b ⊑ a`

use std::fmt::{Debug, Display};

use num_bigint::BigInt;

use crate::expr::{LinearConstraint, LinearExpr, Op, Var};
use crate::interval::Interval;

/// Abstract domain interface: the uniform lattice contract.
pub trait AbstractDomain: Clone + Debug + Display {
    /// Whether `join` distributes over `meet`. Lets graph-shaped clients
    /// reach canonical form in a single transitive-tightening pass.
    const DISTRIBUTIVE: bool = false;

    /// The bottom element (`⊥`): the empty set of states.
    fn bottom() -> Self;

    /// The top element (`⊤`): all possible states.
    fn top() -> Self;

    fn is_bottom(&self) -> bool;

    /// May be over-approximate (answer `false` for a top value) where an
    /// exact check is costly.
    fn is_top(&self) -> bool;

    /// Partial order: `self ⊑ other`.
    fn leq(&self, other: &Self) -> bool;

    /// Join (`⊔`): least upper bound, merges control-flow paths.
    fn join(&self, other: &Self) -> Self;

    /// Meet (`⊓`): greatest lower bound, refines at conditionals.
    fn meet(&self, other: &Self) -> Self;

    /// Widening (`∇`): must satisfy `self ⊑ self ∇ other` and force
    /// termination of ascending chains.
    ///
    /// **Why no default?** Widening must extrapolate (e.g. to ±∞); using
    /// join would not guarantee termination on infinite-height lattices.
    fn widen(&self, other: &Self) -> Self;

    /// Widening against a sorted jump set of thresholds. Domains without a
    /// threshold notion fall back to plain widening.
    fn widen_with_thresholds(&self, other: &Self, _thresholds: &[BigInt]) -> Self {
        self.widen(other)
    }

    /// Narrowing (`∆`): refines a widened value without endangering
    /// termination. Meet is a safe default because descending rounds are
    /// externally bounded.
    fn narrow(&self, other: &Self) -> Self {
        self.meet(other)
    }

    /// Force canonical form before sharing or comparison.
    fn normalize(&mut self) {}

    /// Semantic equality up to canonical form.
    fn equiv(&self, other: &Self) -> bool {
        self.leq(other) && other.leq(self)
    }

    /// Join many elements.
    fn join_all<I>(elems: I) -> Self
    where
        I: IntoIterator<Item = Self>,
    {
        elems.into_iter().fold(Self::bottom(), |acc, e| acc.join(&e))
    }
}

/// Numerical abstract domain: an `AbstractDomain` that tracks integer
/// variables and understands linear arithmetic.
pub trait NumericalDomain: AbstractDomain {
    /// `x := e`.
    fn assign(&mut self, x: &Var, e: &LinearExpr);

    /// `x := y op z`.
    fn apply(&mut self, op: Op, x: &Var, y: &Var, z: &Var);

    /// `x := y op k`.
    fn apply_k(&mut self, op: Op, x: &Var, y: &Var, k: &BigInt);

    /// Conjoin a system of linear constraints. An unsatisfiable system
    /// yields bottom.
    fn add_constraints(&mut self, csts: &[LinearConstraint]);

    /// Projection: remove `x`, equivalent to joining over all its values.
    fn forget(&mut self, x: &Var);

    /// Dual of `forget`: keep only the given variables.
    fn project(&mut self, vars: &[Var]);

    /// The interval approximation of `x` (the indexing operator).
    fn get(&self, x: &Var) -> Interval;

    /// Bind `x` to exactly the given interval, dropping prior constraints
    /// on `x`.
    fn set(&mut self, x: &Var, value: Interval);

    /// Refine `x` with an interval (meet semantics, prior constraints on
    /// `x` are kept).
    fn refine(&mut self, x: &Var, value: &Interval) {
        let met = self.get(x).meet(value);
        self.set(x, met);
    }

    /// Duplicate the constraints of `x` onto the fresh variable `new_x`.
    fn expand(&mut self, x: &Var, new_x: &Var);

    /// Apply a simultaneous variable substitution.
    fn rename(&mut self, subst: &[(Var, Var)]) {
        for (old, new) in subst {
            self.expand(old, new);
            self.forget(old);
        }
    }

    /// A sound (possibly loose) constraint representation of this value.
    fn to_constraints(&self) -> Vec<LinearConstraint>;
}

/// Array operations layered over a numerical domain.
///
/// The defaults are the coarsest sound semantics for domains that do not
/// track array contents at all: loads forget the destination and stores are
/// dropped (an untracked array already reads as top).
pub trait ArrayDomain: NumericalDomain {
    /// `a := {v1, ..., vn}`: initialize every element from the constants.
    fn array_init(&mut self, _a: &Var, _values: &[BigInt]) {}

    /// `lhs := a[i]`.
    fn array_load(&mut self, lhs: &Var, _a: &Var, _i: &Var) {
        self.forget(lhs);
    }

    /// `a[i] := val`; `is_singleton` tells whether the store provably
    /// touches exactly one concrete cell.
    fn array_store(&mut self, _a: &Var, _i: &Var, _val: &LinearExpr, _is_singleton: bool) {}
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Validate the basic lattice axioms on a sample of elements.
    pub fn check_lattice_axioms<D: AbstractDomain>(samples: &[D]) {
        let bot = D::bottom();
        let top = D::top();
        assert!(bot.is_bottom());
        assert!(bot.leq(&top));

        for a in samples {
            assert!(a.leq(a), "reflexivity failed for {}", a);
            assert!(bot.leq(a), "bottom is not least for {}", a);
            assert!(a.leq(&top), "top is not greatest for {}", a);

            let joined = a.join(&bot);
            assert!(a.equiv(&joined), "a ⊔ ⊥ ≠ a for {}", a);
            let met = a.meet(&top);
            assert!(a.equiv(&met), "a ⊓ ⊤ ≠ a for {}", a);

            assert!(a.equiv(&a.join(a)), "join is not idempotent for {}", a);
        }

        for a in samples {
            for b in samples {
                let ab = a.join(b);
                let ba = b.join(a);
                assert!(ab.equiv(&ba), "join not commutative: {} vs {}", a, b);
                assert!(a.leq(&ab) && b.leq(&ab), "join not an upper bound");

                let met = a.meet(b);
                assert!(met.equiv(&b.meet(a)), "meet not commutative");
                assert!(met.leq(a) && met.leq(b), "meet not a lower bound");

                let widened = a.widen(b);
                assert!(a.leq(&widened), "widening does not cover {} for {}", a, b);

                let narrowed = widened.narrow(b);
                assert!(narrowed.leq(&widened), "narrowing must descend");
            }
        }

        for a in samples {
            for b in samples {
                for c in samples {
                    let left = a.join(b).join(c);
                    let right = a.join(&b.join(c));
                    assert!(left.equiv(&right), "join not associative");
                }
            }
        }
    }
}
