//! Closed integer intervals with infinite endpoints.
//!
//! The interval lattice is the workhorse value of the framework: it is the
//! element of the interval environment, the offset abstraction of the
//! pointer analysis, and the box every relational domain falls back to.
//!
//! # Lattice Structure
//!
//! - **Order** (`⊑`): `[l₁, u₁] ⊑ [l₂, u₂]` iff `l₂ ≤ l₁` and `u₁ ≤ u₂`
//! - **Join** (`⊔`): convex hull
//! - **Meet** (`⊓`): intersection
//! - **Bottom** (`⊥`): any pair with `l > u`, canonically `[+oo, -oo]`
//! - **Top** (`⊤`): `[-oo, +oo]`
//!
//! Widening pushes unstable endpoints to infinity (optionally to the next
//! threshold from a jump set); narrowing refines only infinite endpoints.

use std::fmt;

use num_bigint::BigInt;
use num_traits::{One, Signed, Zero};

use crate::bound::Bound;
use crate::domain::AbstractDomain;

/// Interval `[lb, ub]`; empty when `lb > ub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Interval {
    lb: Bound,
    ub: Bound,
}

impl Interval {
    pub fn new(lb: Bound, ub: Bound) -> Self {
        if lb > ub {
            Self::bottom()
        } else {
            Interval { lb, ub }
        }
    }

    pub fn constant(n: impl Into<BigInt>) -> Self {
        let n = n.into();
        Interval {
            lb: Bound::Finite(n.clone()),
            ub: Bound::Finite(n),
        }
    }

    pub fn range(lb: impl Into<BigInt>, ub: impl Into<BigInt>) -> Self {
        Interval::new(Bound::Finite(lb.into()), Bound::Finite(ub.into()))
    }

    pub fn lb(&self) -> &Bound {
        &self.lb
    }

    pub fn ub(&self) -> &Bound {
        &self.ub
    }

    pub fn contains(&self, n: &BigInt) -> bool {
        let b = Bound::Finite(n.clone());
        self.lb <= b && b <= self.ub
    }

    /// The single value of the interval, if there is exactly one.
    pub fn singleton(&self) -> Option<&BigInt> {
        match (&self.lb, &self.ub) {
            (Bound::Finite(l), Bound::Finite(u)) if l == u => Some(l),
            _ => None,
        }
    }

    pub fn lower_half_line(&self) -> Interval {
        if self.is_bottom() {
            return Self::bottom();
        }
        Interval {
            lb: Bound::NegInf,
            ub: self.ub.clone(),
        }
    }

    pub fn upper_half_line(&self) -> Interval {
        if self.is_bottom() {
            return Self::bottom();
        }
        Interval {
            lb: self.lb.clone(),
            ub: Bound::PosInf,
        }
    }

    /// Remove the value `c` when it sits at an endpoint. Interior holes are
    /// not representable and leave the interval unchanged.
    pub fn trim_bound(&self, c: &BigInt) -> Interval {
        if self.is_bottom() {
            return Self::bottom();
        }
        if let Some(n) = self.singleton() {
            if n == c {
                return Self::bottom();
            }
            return self.clone();
        }
        if self.lb.as_finite() == Some(c) {
            Interval::new(Bound::Finite(c + 1u8), self.ub.clone())
        } else if self.ub.as_finite() == Some(c) {
            Interval::new(self.lb.clone(), Bound::Finite(c - 1u8))
        } else {
            self.clone()
        }
    }

    pub fn add(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        Interval::new(self.lb.add(&other.lb), self.ub.add(&other.ub))
    }

    pub fn sub(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        Interval::new(self.lb.sub(&other.ub), self.ub.sub(&other.lb))
    }

    pub fn neg(&self) -> Interval {
        if self.is_bottom() {
            return Self::bottom();
        }
        Interval {
            lb: self.ub.neg(),
            ub: self.lb.neg(),
        }
    }

    pub fn mul(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        let corners = [
            self.lb.mul(&other.lb),
            self.lb.mul(&other.ub),
            self.ub.mul(&other.lb),
            self.ub.mul(&other.ub),
        ];
        let lb = corners.iter().min().cloned().unwrap();
        let ub = corners.iter().max().cloned().unwrap();
        Interval { lb, ub }
    }

    /// Truncated integer division. A denominator containing zero is split
    /// into its strictly negative and strictly positive parts; the faulty
    /// subinterval `[0, 0]` is excluded from the result.
    pub fn div(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        let zero = BigInt::zero();
        if other.contains(&zero) {
            let neg_part = other.meet(&Interval::new(Bound::NegInf, Bound::from(-1)));
            let pos_part = other.meet(&Interval::new(Bound::from(1), Bound::PosInf));
            let mut res = Self::bottom();
            if !neg_part.is_bottom() {
                res = res.join(&self.div_nonzero(&neg_part));
            }
            if !pos_part.is_bottom() {
                res = res.join(&self.div_nonzero(&pos_part));
            }
            res
        } else {
            self.div_nonzero(other)
        }
    }

    // pre: other does not contain zero
    fn div_nonzero(&self, other: &Interval) -> Interval {
        let corners = [
            self.lb.div(&other.lb),
            self.lb.div(&other.ub),
            self.ub.div(&other.lb),
            self.ub.div(&other.ub),
        ];
        let lb = corners.iter().min().cloned().unwrap();
        let ub = corners.iter().max().cloned().unwrap();
        Interval { lb, ub }
    }

    /// Truncated remainder (sign follows the dividend).
    pub fn rem(&self, other: &Interval) -> Interval {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        if let (Some(a), Some(b)) = (self.singleton(), other.singleton()) {
            if b.is_zero() {
                return Self::bottom();
            }
            return Interval::constant(a % b);
        }
        // |r| < max(|lb|, |ub|) of the divisor
        let divisor_mag = match (&other.lb, &other.ub) {
            (Bound::Finite(l), Bound::Finite(u)) => {
                let m = l.abs().max(u.abs());
                if m.is_zero() {
                    return Self::bottom();
                }
                Bound::Finite(m - BigInt::one())
            }
            _ => Bound::PosInf,
        };
        let mut res = Interval::new(divisor_mag.neg(), divisor_mag);
        // refine by the dividend's sign
        if self.lb >= Bound::zero() {
            res = res.meet(&Interval::new(Bound::zero(), self.ub.clone()));
        } else if self.ub <= Bound::zero() {
            res = res.meet(&Interval::new(self.lb.clone(), Bound::zero()));
        }
        res
    }

    /// Widening that jumps to the closest enclosing threshold instead of
    /// straight to infinity.
    pub fn widen_with_thresholds(&self, other: &Interval, thresholds: &[BigInt]) -> Interval {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let lb = if other.lb < self.lb {
            thresholds
                .iter()
                .rev()
                .find(|t| Bound::Finite((*t).clone()) <= other.lb)
                .map(|t| Bound::Finite(t.clone()))
                .unwrap_or(Bound::NegInf)
        } else {
            self.lb.clone()
        };
        let ub = if other.ub > self.ub {
            thresholds
                .iter()
                .find(|t| Bound::Finite((*t).clone()) >= other.ub)
                .map(|t| Bound::Finite(t.clone()))
                .unwrap_or(Bound::PosInf)
        } else {
            self.ub.clone()
        };
        Interval { lb, ub }
    }
}

impl AbstractDomain for Interval {
    fn bottom() -> Self {
        Interval {
            lb: Bound::PosInf,
            ub: Bound::NegInf,
        }
    }

    fn top() -> Self {
        Interval {
            lb: Bound::NegInf,
            ub: Bound::PosInf,
        }
    }

    fn is_bottom(&self) -> bool {
        self.lb > self.ub
    }

    fn is_top(&self) -> bool {
        self.lb == Bound::NegInf && self.ub == Bound::PosInf
    }

    fn leq(&self, other: &Self) -> bool {
        if self.is_bottom() {
            return true;
        }
        if other.is_bottom() {
            return false;
        }
        other.lb <= self.lb && self.ub <= other.ub
    }

    fn join(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        Interval {
            lb: Bound::min(&self.lb, &other.lb),
            ub: Bound::max(&self.ub, &other.ub),
        }
    }

    fn meet(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        Interval::new(
            Bound::max(&self.lb, &other.lb),
            Bound::min(&self.ub, &other.ub),
        )
    }

    fn widen(&self, other: &Self) -> Self {
        if self.is_bottom() {
            return other.clone();
        }
        if other.is_bottom() {
            return self.clone();
        }
        let lb = if other.lb < self.lb {
            Bound::NegInf
        } else {
            self.lb.clone()
        };
        let ub = if other.ub > self.ub {
            Bound::PosInf
        } else {
            self.ub.clone()
        };
        Interval { lb, ub }
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[BigInt]) -> Self {
        Interval::widen_with_thresholds(self, other, thresholds)
    }

    fn narrow(&self, other: &Self) -> Self {
        if self.is_bottom() || other.is_bottom() {
            return Self::bottom();
        }
        // refine only the endpoints that widening pushed to infinity
        let lb = if self.lb == Bound::NegInf {
            other.lb.clone()
        } else {
            self.lb.clone()
        };
        let ub = if self.ub == Bound::PosInf {
            other.ub.clone()
        } else {
            self.ub.clone()
        };
        Interval::new(lb, ub)
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_bottom() {
            write!(f, "_|_")
        } else {
            write!(f, "[{}, {}]", self.lb, self.ub)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lattice_ops() {
        let a = Interval::range(0, 10);
        let b = Interval::range(5, 15);
        assert_eq!(a.join(&b), Interval::range(0, 15));
        assert_eq!(a.meet(&b), Interval::range(5, 10));
        assert!(a.meet(&Interval::range(20, 30)).is_bottom());
        assert!(Interval::bottom().leq(&a));
        assert!(a.leq(&Interval::top()));
        assert!(Interval::range(2, 3).leq(&a));
        assert!(!a.leq(&b));
    }

    #[test]
    fn test_widen_narrow() {
        let a = Interval::range(0, 10);
        let b = Interval::range(0, 15);
        let w = a.widen(&b);
        assert_eq!(w, Interval::new(Bound::from(0), Bound::PosInf));
        // narrowing recovers the refined upper bound
        assert_eq!(w.narrow(&Interval::range(0, 100)), Interval::range(0, 100));
        // stable bounds survive narrowing
        assert_eq!(a.narrow(&Interval::range(5, 8)), a);
    }

    #[test]
    fn test_widen_thresholds() {
        let ts = vec![BigInt::from(0), BigInt::from(64), BigInt::from(512)];
        let a = Interval::range(0, 10);
        let b = Interval::range(0, 70);
        assert_eq!(a.widen_with_thresholds(&b, &ts), Interval::range(0, 512));
        let c = Interval::range(0, 600);
        assert_eq!(
            a.widen_with_thresholds(&c, &ts),
            Interval::new(Bound::from(0), Bound::PosInf)
        );
    }

    #[test]
    fn test_arithmetic() {
        let a = Interval::range(1, 2);
        let b = Interval::range(3, 4);
        assert_eq!(a.add(&b), Interval::range(4, 6));
        assert_eq!(b.sub(&a), Interval::range(1, 3));
        assert_eq!(a.mul(&b), Interval::range(3, 8));
        assert_eq!(Interval::range(-2, 3).mul(&b), Interval::range(-8, 12));
    }

    #[test]
    fn test_division_splits_zero() {
        // [8, 8] / [-2, 2]: the zero subinterval is excluded
        let n = Interval::constant(8);
        let d = Interval::range(-2, 2);
        assert_eq!(n.div(&d), Interval::range(-8, 8));
        // division by exactly zero is infeasible
        assert!(n.div(&Interval::constant(0)).is_bottom());
        // unbounded numerator stays unbounded in the right direction
        let top_div = Interval::top().div(&Interval::constant(2));
        assert!(top_div.is_top());
    }

    #[test]
    fn test_remainder() {
        assert_eq!(
            Interval::constant(7).rem(&Interval::constant(3)),
            Interval::constant(1)
        );
        assert_eq!(
            Interval::constant(-7).rem(&Interval::constant(3)),
            Interval::constant(-1)
        );
        let r = Interval::range(0, 100).rem(&Interval::constant(10));
        assert_eq!(r, Interval::range(0, 9));
    }

    #[test]
    fn test_trim_bound() {
        let a = Interval::range(0, 10);
        assert_eq!(a.trim_bound(&BigInt::from(0)), Interval::range(1, 10));
        assert_eq!(a.trim_bound(&BigInt::from(10)), Interval::range(0, 9));
        assert_eq!(a.trim_bound(&BigInt::from(5)), a);
        assert!(Interval::constant(3).trim_bound(&BigInt::from(3)).is_bottom());
    }
}
