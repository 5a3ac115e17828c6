//! Array smashing: one summarized cell per array.
//!
//! Every element of an array is folded into a single symbolic variable
//! of the underlying numerical domain. Stores to a provably unique cell
//! update the summary strongly; any other store joins the new value with
//! the previous contents. Loads copy through a fresh ghost variable so
//! that the summarized cell is never aliased directly into a scalar,
//! which would be unsound in a non-relational base domain.

use std::fmt;

use log::debug;
use num_bigint::BigInt;

use crate::domain::{AbstractDomain, ArrayDomain, NumericalDomain};
use crate::expr::{LinearConstraint, LinearExpr, Op, Var};
use crate::interval::Interval;

/// Ghost used to copy out of a summarized cell.
const LOAD_GHOST: &str = "$smash.tmp";

/// Array-smashing functor over a numerical domain.
#[derive(Debug, Clone)]
pub struct ArraySmashing<D> {
    inv: D,
}

impl<D: NumericalDomain> ArraySmashing<D> {
    pub fn content_domain(&self) -> &D {
        &self.inv
    }

    fn strong_update(&mut self, a: &Var, val: &LinearExpr) {
        self.inv.assign(a, val);
    }

    fn weak_update(&mut self, a: &Var, val: &LinearExpr) {
        let mut other = self.inv.clone();
        other.assign(a, val);
        self.inv = self.inv.join(&other);
    }
}

impl<D: NumericalDomain> AbstractDomain for ArraySmashing<D> {
    fn bottom() -> Self {
        ArraySmashing { inv: D::bottom() }
    }

    fn top() -> Self {
        ArraySmashing { inv: D::top() }
    }

    fn is_bottom(&self) -> bool {
        self.inv.is_bottom()
    }

    fn is_top(&self) -> bool {
        self.inv.is_top()
    }

    fn leq(&self, other: &Self) -> bool {
        self.inv.leq(&other.inv)
    }

    fn join(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.join(&other.inv),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.meet(&other.inv),
        }
    }

    fn widen(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.widen(&other.inv),
        }
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[BigInt]) -> Self {
        ArraySmashing {
            inv: self.inv.widen_with_thresholds(&other.inv, thresholds),
        }
    }

    fn narrow(&self, other: &Self) -> Self {
        ArraySmashing {
            inv: self.inv.narrow(&other.inv),
        }
    }

    fn normalize(&mut self) {
        self.inv.normalize();
    }
}

impl<D: NumericalDomain> NumericalDomain for ArraySmashing<D> {
    fn assign(&mut self, x: &Var, e: &LinearExpr) {
        self.inv.assign(x, e);
    }

    fn apply(&mut self, op: Op, x: &Var, y: &Var, z: &Var) {
        self.inv.apply(op, x, y, z);
    }

    fn apply_k(&mut self, op: Op, x: &Var, y: &Var, k: &BigInt) {
        self.inv.apply_k(op, x, y, k);
    }

    fn add_constraints(&mut self, csts: &[LinearConstraint]) {
        self.inv.add_constraints(csts);
    }

    fn forget(&mut self, x: &Var) {
        self.inv.forget(x);
    }

    fn project(&mut self, vars: &[Var]) {
        self.inv.project(vars);
    }

    fn get(&self, x: &Var) -> Interval {
        self.inv.get(x)
    }

    fn set(&mut self, x: &Var, value: Interval) {
        self.inv.set(x, value);
    }

    fn refine(&mut self, x: &Var, value: &Interval) {
        self.inv.refine(x, value);
    }

    fn expand(&mut self, x: &Var, new_x: &Var) {
        self.inv.expand(x, new_x);
    }

    fn rename(&mut self, subst: &[(Var, Var)]) {
        self.inv.rename(subst);
    }

    fn to_constraints(&self) -> Vec<LinearConstraint> {
        self.inv.to_constraints()
    }
}

impl<D: NumericalDomain> ArrayDomain for ArraySmashing<D> {
    fn array_init(&mut self, a: &Var, values: &[BigInt]) {
        if values.is_empty() {
            return;
        }
        let mut init = Interval::bottom();
        for v in values {
            init = init.join(&Interval::constant(v.clone()));
        }
        self.inv.set(a, init);
        debug!("array init: {}", self.inv);
    }

    fn array_load(&mut self, lhs: &Var, a: &Var, _i: &Var) {
        // copy through a ghost so the summarized cell is never aliased
        let ghost = LOAD_GHOST.to_string();
        self.inv.expand(a, &ghost);
        self.inv.assign(lhs, &LinearExpr::var(ghost.clone()));
        self.inv.forget(&ghost);
        debug!("array load: {}", self.inv);
    }

    fn array_store(&mut self, a: &Var, _i: &Var, val: &LinearExpr, is_singleton: bool) {
        if is_singleton {
            self.strong_update(a, val);
        } else {
            self.weak_update(a, val);
        }
        debug!("array store: {}", self.inv);
    }
}

impl<D: NumericalDomain> fmt::Display for ArraySmashing<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inv)
    }
}
