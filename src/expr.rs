//! Variables, linear expressions and linear constraints.
//!
//! Expressions are affine: a sum of integer-coefficient terms plus a
//! constant. A constraint compares an expression against zero; strict
//! comparisons are normalized away at construction (over the integers,
//! `e < 0` is `e + 1 <= 0`).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::interval::Interval;

/// Program variable.
pub type Var = String;

/// Arithmetic operations of the three-address IR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Rem => "%",
        };
        write!(f, "{}", s)
    }
}

/// Affine expression: `c1*x1 + ... + cn*xn + k`.
///
/// Zero-coefficient terms are never stored.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearExpr {
    terms: BTreeMap<Var, BigInt>,
    constant: BigInt,
}

impl LinearExpr {
    pub fn constant(k: impl Into<BigInt>) -> Self {
        LinearExpr {
            terms: BTreeMap::new(),
            constant: k.into(),
        }
    }

    pub fn var(v: impl Into<Var>) -> Self {
        LinearExpr::term(1, v)
    }

    pub fn term(coeff: impl Into<BigInt>, v: impl Into<Var>) -> Self {
        let mut e = LinearExpr::default();
        e.add_term(coeff, v);
        e
    }

    pub fn add_term(&mut self, coeff: impl Into<BigInt>, v: impl Into<Var>) {
        let coeff = coeff.into();
        if coeff.is_zero() {
            return;
        }
        let v = v.into();
        let entry = self.terms.entry(v.clone()).or_insert_with(BigInt::zero);
        *entry += coeff;
        if entry.is_zero() {
            self.terms.remove(&v);
        }
    }

    pub fn plus(mut self, other: &LinearExpr) -> Self {
        for (v, c) in &other.terms {
            self.add_term(c.clone(), v.clone());
        }
        self.constant += &other.constant;
        self
    }

    pub fn minus(self, other: &LinearExpr) -> Self {
        self.plus(&other.clone().negate())
    }

    pub fn negate(mut self) -> Self {
        for c in self.terms.values_mut() {
            *c = -&*c;
        }
        self.constant = -self.constant;
        self
    }

    pub fn times(mut self, k: impl Into<BigInt>) -> Self {
        let k = k.into();
        if k.is_zero() {
            return LinearExpr::constant(0);
        }
        for c in self.terms.values_mut() {
            *c *= &k;
        }
        self.constant *= &k;
        self
    }

    pub fn add_const(mut self, k: impl Into<BigInt>) -> Self {
        self.constant += k.into();
        self
    }

    pub fn const_term(&self) -> &BigInt {
        &self.constant
    }

    pub fn terms(&self) -> impl Iterator<Item = (&Var, &BigInt)> {
        self.terms.iter()
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        self.terms.keys().cloned().collect()
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    /// If the expression is exactly one variable with coefficient one and
    /// no constant, return it.
    pub fn as_variable(&self) -> Option<&Var> {
        if self.constant.is_zero() && self.terms.len() == 1 {
            let (v, c) = self.terms.iter().next().unwrap();
            if c.is_one() {
                return Some(v);
            }
        }
        None
    }

    pub fn coeff_of(&self, v: &Var) -> BigInt {
        self.terms.get(v).cloned().unwrap_or_else(BigInt::zero)
    }

    /// Evaluate over an interval environment.
    pub fn eval<F>(&self, env: F) -> Interval
    where
        F: Fn(&Var) -> Interval,
    {
        let mut res = Interval::constant(self.constant.clone());
        for (v, c) in &self.terms {
            let t = Interval::constant(c.clone()).mul(&env(v));
            res = res.add(&t);
        }
        res
    }

    pub fn le(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::new(self.minus(&other.into()), ConstraintKind::Le)
    }

    pub fn lt(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::new(
            self.minus(&other.into()).add_const(1),
            ConstraintKind::Le,
        )
    }

    pub fn ge(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        let other = other.into();
        LinearConstraint::new(other.minus(&self), ConstraintKind::Le)
    }

    pub fn gt(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        let other = other.into();
        LinearConstraint::new(other.minus(&self).add_const(1), ConstraintKind::Le)
    }

    pub fn eq(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::new(self.minus(&other.into()), ConstraintKind::Eq)
    }

    pub fn neq(self, other: impl Into<LinearExpr>) -> LinearConstraint {
        LinearConstraint::new(self.minus(&other.into()), ConstraintKind::Neq)
    }
}

impl From<i32> for LinearExpr {
    fn from(k: i32) -> Self {
        LinearExpr::constant(k)
    }
}

impl From<i64> for LinearExpr {
    fn from(k: i64) -> Self {
        LinearExpr::constant(k)
    }
}

impl From<BigInt> for LinearExpr {
    fn from(k: BigInt) -> Self {
        LinearExpr::constant(k)
    }
}

impl From<&str> for LinearExpr {
    fn from(v: &str) -> Self {
        LinearExpr::var(v)
    }
}

impl From<Var> for LinearExpr {
    fn from(v: Var) -> Self {
        LinearExpr::var(v)
    }
}

impl fmt::Display for LinearExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if first {
                if c.is_one() {
                    write!(f, "{}", v)?;
                } else if (-c).is_one() {
                    write!(f, "-{}", v)?;
                } else {
                    write!(f, "{}*{}", c, v)?;
                }
                first = false;
            } else if c.is_negative() {
                if (-c).is_one() {
                    write!(f, " - {}", v)?;
                } else {
                    write!(f, " - {}*{}", -c, v)?;
                }
            } else if c.is_one() {
                write!(f, " + {}", v)?;
            } else {
                write!(f, " + {}*{}", c, v)?;
            }
        }
        if first {
            write!(f, "{}", self.constant)?;
        } else if self.constant.is_positive() {
            write!(f, " + {}", self.constant)?;
        } else if self.constant.is_negative() {
            write!(f, " - {}", -&self.constant)?;
        }
        Ok(())
    }
}

/// How a constraint expression relates to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstraintKind {
    /// `e <= 0`
    Le,
    /// `e == 0`
    Eq,
    /// `e != 0`
    Neq,
}

/// Linear constraint: `expr REL 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    expr: LinearExpr,
    kind: ConstraintKind,
}

impl LinearConstraint {
    pub fn new(expr: LinearExpr, kind: ConstraintKind) -> Self {
        LinearConstraint { expr, kind }
    }

    pub fn always_true() -> Self {
        LinearConstraint::new(LinearExpr::constant(0), ConstraintKind::Eq)
    }

    pub fn always_false() -> Self {
        LinearConstraint::new(LinearExpr::constant(0), ConstraintKind::Neq)
    }

    pub fn expr(&self) -> &LinearExpr {
        &self.expr
    }

    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    pub fn variables(&self) -> BTreeSet<Var> {
        self.expr.variables()
    }

    /// A constraint with no variables is decided immediately.
    pub fn constant_value(&self) -> Option<bool> {
        if !self.expr.is_constant() {
            return None;
        }
        let k = self.expr.const_term();
        Some(match self.kind {
            ConstraintKind::Le => !k.is_positive(),
            ConstraintKind::Eq => k.is_zero(),
            ConstraintKind::Neq => !k.is_zero(),
        })
    }

    /// Logical negation, exact over the integers.
    pub fn negate(&self) -> LinearConstraint {
        match self.kind {
            // !(e <= 0)  <=>  e >= 1  <=>  -e + 1 <= 0
            ConstraintKind::Le => LinearConstraint::new(
                self.expr.clone().negate().add_const(1),
                ConstraintKind::Le,
            ),
            ConstraintKind::Eq => LinearConstraint::new(self.expr.clone(), ConstraintKind::Neq),
            ConstraintKind::Neq => LinearConstraint::new(self.expr.clone(), ConstraintKind::Eq),
        }
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rel = match self.kind {
            ConstraintKind::Le => "<=",
            ConstraintKind::Eq => "==",
            ConstraintKind::Neq => "!=",
        };
        write!(f, "{} {} 0", self.expr, rel)
    }
}
