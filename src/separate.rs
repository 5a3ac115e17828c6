//! Separate domain functor: a variable environment over any value lattice.
//!
//! `Env<W>` maps variables to elements of `W`, with missing bindings read
//! as top and an explicit bottom that swallows the whole environment as
//! soon as any binding becomes infeasible. All lattice operations are
//! pointwise. The representation is a plain ordered map with value
//! semantics; bindings equal to top are never stored.

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;

use crate::domain::{AbstractDomain, ArrayDomain, NumericalDomain};
use crate::expr::{ConstraintKind, LinearConstraint, LinearExpr, Op, Var};
use crate::interval::Interval;
use crate::solver;

/// Value lattices that support linear arithmetic and conversion to and
/// from intervals. Implemented by intervals and disjunctive intervals;
/// this is what makes a value usable inside a numerical environment.
pub trait NumValue: AbstractDomain {
    fn from_constant(k: &BigInt) -> Self;
    fn from_interval(itv: Interval) -> Self;
    /// Outer interval approximation.
    fn to_interval(&self) -> Interval;
    /// Disequality refinement: remove the value `c` where representable.
    fn trim(&self, c: &BigInt) -> Self;
    fn add(&self, other: &Self) -> Self;
    fn sub(&self, other: &Self) -> Self;
    fn mul(&self, other: &Self) -> Self;
    fn div(&self, other: &Self) -> Self;
    fn rem(&self, other: &Self) -> Self;
    fn neg(&self) -> Self;
}

impl NumValue for Interval {
    fn from_constant(k: &BigInt) -> Self {
        Interval::constant(k.clone())
    }

    fn from_interval(itv: Interval) -> Self {
        itv
    }

    fn to_interval(&self) -> Interval {
        self.clone()
    }

    fn trim(&self, c: &BigInt) -> Self {
        self.trim_bound(c)
    }

    fn add(&self, other: &Self) -> Self {
        Interval::add(self, other)
    }

    fn sub(&self, other: &Self) -> Self {
        Interval::sub(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        Interval::mul(self, other)
    }

    fn div(&self, other: &Self) -> Self {
        Interval::div(self, other)
    }

    fn rem(&self, other: &Self) -> Self {
        Interval::rem(self, other)
    }

    fn neg(&self) -> Self {
        Interval::neg(self)
    }
}

/// Environment: variable -> `W`, with explicit bottom.
#[derive(Debug, Clone, PartialEq)]
pub enum Env<W> {
    Bottom,
    Map(BTreeMap<Var, W>),
}

impl<W: AbstractDomain> Env<W> {
    pub fn value_of(&self, v: &Var) -> W {
        match self {
            Env::Bottom => W::bottom(),
            Env::Map(m) => m.get(v).cloned().unwrap_or_else(W::top),
        }
    }

    /// Bind `v` to `w`. Binding a bottom value collapses the environment.
    pub fn bind(&mut self, v: &Var, w: W) {
        match self {
            Env::Bottom => {}
            Env::Map(m) => {
                if w.is_bottom() {
                    *self = Env::Bottom;
                } else if w.is_top() {
                    m.remove(v);
                } else {
                    m.insert(v.clone(), w);
                }
            }
        }
    }

    pub fn remove(&mut self, v: &Var) {
        if let Env::Map(m) = self {
            m.remove(v);
        }
    }

    pub fn bindings(&self) -> impl Iterator<Item = (&Var, &W)> {
        let inner = match self {
            Env::Bottom => None,
            Env::Map(m) => Some(m.iter()),
        };
        inner.into_iter().flatten()
    }

    pub fn variables(&self) -> Vec<Var> {
        self.bindings().map(|(v, _)| v.clone()).collect()
    }

    fn pointwise<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(&W, &W) -> W,
    {
        match (self, other) {
            (Env::Bottom, _) | (_, Env::Bottom) => {
                unreachable!("bottom handled by callers")
            }
            (Env::Map(m1), Env::Map(m2)) => {
                let mut res = BTreeMap::new();
                for v in m1.keys().chain(m2.keys()) {
                    if res.contains_key(v) {
                        continue;
                    }
                    let w = f(&self.value_of(v), &other.value_of(v));
                    if w.is_bottom() {
                        return Env::Bottom;
                    }
                    if !w.is_top() {
                        res.insert(v.clone(), w);
                    }
                }
                Env::Map(res)
            }
        }
    }
}

impl<W: AbstractDomain> AbstractDomain for Env<W> {
    fn bottom() -> Self {
        Env::Bottom
    }

    fn top() -> Self {
        Env::Map(BTreeMap::new())
    }

    fn is_bottom(&self) -> bool {
        matches!(self, Env::Bottom)
    }

    fn is_top(&self) -> bool {
        match self {
            Env::Bottom => false,
            Env::Map(m) => m.values().all(|w| w.is_top()),
        }
    }

    fn leq(&self, other: &Self) -> bool {
        match (self, other) {
            (Env::Bottom, _) => true,
            (_, Env::Bottom) => false,
            (_, Env::Map(m2)) => m2.iter().all(|(v, w2)| self.value_of(v).leq(w2)),
        }
    }

    fn join(&self, other: &Self) -> Self {
        match (self, other) {
            (Env::Bottom, e) => e.clone(),
            (e, Env::Bottom) => e.clone(),
            _ => self.pointwise(other, |a, b| a.join(b)),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        match (self, other) {
            (Env::Bottom, _) | (_, Env::Bottom) => Env::Bottom,
            _ => self.pointwise(other, |a, b| a.meet(b)),
        }
    }

    fn widen(&self, other: &Self) -> Self {
        match (self, other) {
            (Env::Bottom, e) => e.clone(),
            (e, Env::Bottom) => e.clone(),
            _ => self.pointwise(other, |a, b| a.widen(b)),
        }
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[BigInt]) -> Self {
        match (self, other) {
            (Env::Bottom, e) => e.clone(),
            (e, Env::Bottom) => e.clone(),
            _ => self.pointwise(other, |a, b| a.widen_with_thresholds(b, thresholds)),
        }
    }

    fn narrow(&self, other: &Self) -> Self {
        match (self, other) {
            (Env::Bottom, _) | (_, Env::Bottom) => Env::Bottom,
            _ => self.pointwise(other, |a, b| a.narrow(b)),
        }
    }

    fn normalize(&mut self) {
        if let Env::Map(m) = self {
            let mut bot = false;
            let mut dead = Vec::new();
            for (v, w) in m.iter_mut() {
                w.normalize();
                if w.is_bottom() {
                    bot = true;
                    break;
                }
                if w.is_top() {
                    dead.push(v.clone());
                }
            }
            if bot {
                *self = Env::Bottom;
            } else {
                for v in dead {
                    m.remove(&v);
                }
            }
        }
    }
}

impl<W: NumValue> Env<W> {
    fn eval(&self, e: &LinearExpr) -> W {
        let mut res = W::from_constant(e.const_term());
        for (v, c) in e.terms() {
            res = res.add(&W::from_constant(c).mul(&self.value_of(v)));
        }
        res
    }
}

impl<W: NumValue> NumericalDomain for Env<W> {
    fn assign(&mut self, x: &Var, e: &LinearExpr) {
        if self.is_bottom() {
            return;
        }
        // a plain copy keeps the full precision of the value lattice
        if let Some(y) = e.as_variable() {
            let w = self.value_of(y);
            self.bind(x, w);
        } else {
            let w = self.eval(e);
            self.bind(x, w);
        }
    }

    fn apply(&mut self, op: Op, x: &Var, y: &Var, z: &Var) {
        if self.is_bottom() {
            return;
        }
        let yi = self.value_of(y);
        let zi = self.value_of(z);
        let w = match op {
            Op::Add => yi.add(&zi),
            Op::Sub => yi.sub(&zi),
            Op::Mul => yi.mul(&zi),
            Op::Div => yi.div(&zi),
            Op::Rem => yi.rem(&zi),
        };
        self.bind(x, w);
    }

    fn apply_k(&mut self, op: Op, x: &Var, y: &Var, k: &BigInt) {
        if self.is_bottom() {
            return;
        }
        let yi = self.value_of(y);
        let zi = W::from_constant(k);
        let w = match op {
            Op::Add => yi.add(&zi),
            Op::Sub => yi.sub(&zi),
            Op::Mul => yi.mul(&zi),
            Op::Div => yi.div(&zi),
            Op::Rem => yi.rem(&zi),
        };
        self.bind(x, w);
    }

    fn add_constraints(&mut self, csts: &[LinearConstraint]) {
        if self.is_bottom() {
            return;
        }
        solver::propagate(self, csts);
    }

    fn forget(&mut self, x: &Var) {
        self.remove(x);
    }

    fn project(&mut self, vars: &[Var]) {
        if let Env::Map(m) = self {
            m.retain(|v, _| vars.contains(v));
        }
    }

    fn get(&self, x: &Var) -> Interval {
        self.value_of(x).to_interval()
    }

    fn set(&mut self, x: &Var, value: Interval) {
        self.bind(x, W::from_interval(value));
    }

    fn refine(&mut self, x: &Var, value: &Interval) {
        let met = self.value_of(x).meet(&W::from_interval(value.clone()));
        self.bind(x, met);
    }

    fn expand(&mut self, x: &Var, new_x: &Var) {
        let w = self.value_of(x);
        self.bind(new_x, w);
    }

    // simultaneous substitution: read every source before writing
    fn rename(&mut self, subst: &[(Var, Var)]) {
        if self.is_bottom() {
            return;
        }
        let values: Vec<(Var, W)> = subst
            .iter()
            .map(|(old, new)| (new.clone(), self.value_of(old)))
            .collect();
        for (old, _) in subst {
            self.remove(old);
        }
        for (new, w) in values {
            self.bind(&new, w);
        }
    }

    fn to_constraints(&self) -> Vec<LinearConstraint> {
        let mut csts = Vec::new();
        for (v, w) in self.bindings() {
            let itv = w.to_interval();
            if let Some(k) = itv.singleton() {
                csts.push(LinearConstraint::new(
                    LinearExpr::var(v.clone()).add_const(-k.clone()),
                    ConstraintKind::Eq,
                ));
                continue;
            }
            if let Some(lb) = itv.lb().as_finite() {
                // lb <= v
                csts.push(LinearConstraint::new(
                    LinearExpr::term(-1, v.clone()).add_const(lb.clone()),
                    ConstraintKind::Le,
                ));
            }
            if let Some(ub) = itv.ub().as_finite() {
                // v <= ub
                csts.push(LinearConstraint::new(
                    LinearExpr::var(v.clone()).add_const(-ub.clone()),
                    ConstraintKind::Le,
                ));
            }
        }
        csts
    }
}

impl<W: NumValue> ArrayDomain for Env<W> {}

impl<W: AbstractDomain> fmt::Display for Env<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Env::Bottom => write!(f, "_|_"),
            Env::Map(m) => {
                write!(f, "{{")?;
                let mut it = m.iter().peekable();
                while let Some((v, w)) = it.next() {
                    write!(f, "{} -> {}", v, w)?;
                    if it.peek().is_some() {
                        write!(f, "; ")?;
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

/// Interval environment: the classical non-relational box domain.
pub type IntervalEnv = Env<Interval>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tests::check_lattice_axioms;

    fn env(bindings: &[(&str, i64, i64)]) -> IntervalEnv {
        let mut e = IntervalEnv::top();
        for (v, lo, hi) in bindings {
            e.set(&v.to_string(), Interval::range(*lo, *hi));
        }
        e
    }

    #[test]
    fn test_lattice_axioms() {
        let samples = vec![
            IntervalEnv::bottom(),
            IntervalEnv::top(),
            env(&[("x", 0, 10)]),
            env(&[("x", 5, 5)]),
            env(&[("x", -10, 0), ("y", 1, 2)]),
            env(&[("y", 0, 100)]),
        ];
        check_lattice_axioms(&samples);
    }

    #[test]
    fn test_assign_and_apply() {
        let mut e = env(&[("x", 0, 10)]);
        // y := 2*x + 1
        e.assign(
            &"y".to_string(),
            &LinearExpr::term(2, "x").add_const(1),
        );
        assert_eq!(e.get(&"y".to_string()), Interval::range(1, 21));

        // z := y - x  (non-relational: [1,21] - [0,10])
        e.apply(Op::Sub, &"z".to_string(), &"y".to_string(), &"x".to_string());
        assert_eq!(e.get(&"z".to_string()), Interval::range(-9, 21));

        e.apply_k(Op::Mul, &"w".to_string(), &"x".to_string(), &BigInt::from(3));
        assert_eq!(e.get(&"w".to_string()), Interval::range(0, 30));
    }

    #[test]
    fn test_constraints() {
        let mut e = env(&[("x", 0, 100)]);
        e.add_constraints(&[LinearExpr::var("x").le(10)]);
        assert_eq!(e.get(&"x".to_string()), Interval::range(0, 10));

        // x >= 5 && x <= 3 is infeasible
        let mut e = env(&[("x", 0, 100)]);
        e.add_constraints(&[LinearExpr::var("x").ge(5), LinearExpr::var("x").le(3)]);
        assert!(e.is_bottom());
    }

    #[test]
    fn test_relational_constraint_propagation() {
        // x <= y - 1 with y in [0, 10] bounds x from above
        let mut e = env(&[("y", 0, 10)]);
        e.add_constraints(&[LinearExpr::var("x").lt("y")]);
        let x = e.get(&"x".to_string());
        assert_eq!(x.ub(), &crate::bound::Bound::from(9));
        assert_eq!(x.lb(), &crate::bound::Bound::NegInf);
    }

    #[test]
    fn test_forget_and_project() {
        let mut e = env(&[("x", 0, 1), ("y", 2, 3), ("z", 4, 5)]);
        e.forget(&"x".to_string());
        assert!(e.get(&"x".to_string()).is_top());
        e.project(&["y".to_string()]);
        assert!(e.get(&"z".to_string()).is_top());
        assert_eq!(e.get(&"y".to_string()), Interval::range(2, 3));
    }

    #[test]
    fn test_display() {
        let e = env(&[("x", 0, 10)]);
        assert_eq!(e.to_string(), "{x -> [0, 10]}");
        assert_eq!(IntervalEnv::bottom().to_string(), "_|_");
    }
}
