//! Extended integer bounds: `-∞`, arbitrary-precision finite values, `+∞`.
//!
//! Bounds are the endpoints of intervals and the edge weights of the
//! difference-bound domain. Arithmetic is total except for the undefined
//! form `(-∞) + (+∞)`, which is a programmer error.

use std::fmt;

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};

/// Bound of an interval: `-∞`, a finite integer, or `+∞`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Bound {
    NegInf,
    Finite(BigInt),
    PosInf,
}

impl Bound {
    pub fn finite(n: impl Into<BigInt>) -> Self {
        Bound::Finite(n.into())
    }

    pub fn zero() -> Self {
        Bound::Finite(BigInt::zero())
    }

    pub fn is_finite(&self) -> bool {
        matches!(self, Bound::Finite(_))
    }

    pub fn as_finite(&self) -> Option<&BigInt> {
        match self {
            Bound::Finite(n) => Some(n),
            _ => None,
        }
    }

    pub fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a + b),
            (Bound::NegInf, Bound::PosInf) | (Bound::PosInf, Bound::NegInf) => {
                panic!("undefined bound addition: -oo + +oo")
            }
            (Bound::NegInf, _) | (_, Bound::NegInf) => Bound::NegInf,
            (Bound::PosInf, _) | (_, Bound::PosInf) => Bound::PosInf,
        }
    }

    pub fn sub(&self, other: &Bound) -> Bound {
        self.add(&other.neg())
    }

    pub fn neg(&self) -> Bound {
        match self {
            Bound::NegInf => Bound::PosInf,
            Bound::Finite(n) => Bound::Finite(-n),
            Bound::PosInf => Bound::NegInf,
        }
    }

    /// Multiplication with the convention `0 * ±∞ = 0`.
    pub fn mul(&self, other: &Bound) -> Bound {
        if self.is_zero() || other.is_zero() {
            return Bound::zero();
        }
        match (self, other) {
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a * b),
            _ => {
                if self.is_negative() == other.is_negative() {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    /// Truncated division of finite bounds; infinities keep their sign.
    ///
    /// The divisor must be a non-zero finite number or an infinity.
    pub fn div(&self, other: &Bound) -> Bound {
        match (self, other) {
            (_, b) if b.is_zero() => panic!("bound division by zero"),
            (Bound::Finite(a), Bound::Finite(b)) => Bound::Finite(a / b),
            // finite / ±oo tends to zero
            (Bound::Finite(_), _) => Bound::zero(),
            _ => {
                if self.is_negative() == other.is_negative() {
                    Bound::PosInf
                } else {
                    Bound::NegInf
                }
            }
        }
    }

    /// Division by a finite non-zero constant, rounding toward `-∞`.
    pub fn div_floor(&self, k: &BigInt) -> Bound {
        assert!(!k.is_zero(), "bound division by zero");
        match self {
            Bound::Finite(n) => Bound::Finite(n.div_floor(k)),
            inf => {
                if k.is_negative() {
                    inf.neg()
                } else {
                    inf.clone()
                }
            }
        }
    }

    /// Division by a finite non-zero constant, rounding toward `+∞`.
    pub fn div_ceil(&self, k: &BigInt) -> Bound {
        assert!(!k.is_zero(), "bound division by zero");
        match self {
            Bound::Finite(n) => Bound::Finite(n.div_ceil(k)),
            inf => {
                if k.is_negative() {
                    inf.neg()
                } else {
                    inf.clone()
                }
            }
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Bound::Finite(n) if n.is_zero())
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Bound::NegInf => true,
            Bound::Finite(n) => n.is_negative(),
            Bound::PosInf => false,
        }
    }

    pub fn min(a: &Bound, b: &Bound) -> Bound {
        if a <= b {
            a.clone()
        } else {
            b.clone()
        }
    }

    pub fn max(a: &Bound, b: &Bound) -> Bound {
        if a >= b {
            a.clone()
        } else {
            b.clone()
        }
    }
}

impl From<i32> for Bound {
    fn from(n: i32) -> Self {
        Bound::Finite(BigInt::from(n))
    }
}

impl From<i64> for Bound {
    fn from(n: i64) -> Self {
        Bound::Finite(BigInt::from(n))
    }
}

impl From<BigInt> for Bound {
    fn from(n: BigInt) -> Self {
        Bound::Finite(n)
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Bound::NegInf => write!(f, "-oo"),
            Bound::Finite(n) => write!(f, "{}", n),
            Bound::PosInf => write!(f, "+oo"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(Bound::NegInf < Bound::finite(-1000));
        assert!(Bound::finite(0) < Bound::finite(1));
        assert!(Bound::finite(1000) < Bound::PosInf);
        assert!(Bound::NegInf < Bound::PosInf);
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(Bound::finite(2).add(&Bound::finite(3)), Bound::finite(5));
        assert_eq!(Bound::finite(2).add(&Bound::PosInf), Bound::PosInf);
        assert_eq!(Bound::finite(2).sub(&Bound::PosInf), Bound::NegInf);
        assert_eq!(Bound::finite(-2).mul(&Bound::PosInf), Bound::NegInf);
        assert_eq!(Bound::zero().mul(&Bound::PosInf), Bound::zero());
        assert_eq!(Bound::finite(7).div(&Bound::finite(2)), Bound::finite(3));
        assert_eq!(Bound::finite(-7).div(&Bound::finite(2)), Bound::finite(-3));
    }

    #[test]
    fn test_rounded_division() {
        let two = BigInt::from(2);
        assert_eq!(Bound::finite(7).div_floor(&two), Bound::finite(3));
        assert_eq!(Bound::finite(7).div_ceil(&two), Bound::finite(4));
        assert_eq!(Bound::finite(-7).div_floor(&two), Bound::finite(-4));
        assert_eq!(Bound::finite(-7).div_ceil(&two), Bound::finite(-3));
        assert_eq!(Bound::PosInf.div_floor(&BigInt::from(-1)), Bound::NegInf);
    }

    #[test]
    #[should_panic(expected = "undefined bound addition")]
    fn test_undefined_addition() {
        let _ = Bound::NegInf.add(&Bound::PosInf);
    }
}
