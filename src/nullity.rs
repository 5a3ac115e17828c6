//! Flat nullity lattice for pointer variables.
//!
//! ```text
//!           Top
//!           / \
//!        Null  NonNull
//!           \ /
//!          Bottom
//! ```
//!
//! The four elements live in two bits, so join is bit-or, meet is bit-and
//! and the partial order is bit inclusion. The lattice has finite ascending
//! and descending chains, so join doubles as widening and meet as
//! narrowing.

use std::fmt;

use crate::domain::AbstractDomain;
use crate::expr::Var;
use crate::separate::Env;

/// Nullity of a single pointer: bottom, null, non-null, or unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NullityValue(u8);

const BOTTOM: u8 = 0b00;
const NULL: u8 = 0b01;
const NON_NULL: u8 = 0b10;
const TOP: u8 = 0b11;

impl NullityValue {
    pub fn null() -> Self {
        NullityValue(NULL)
    }

    pub fn non_null() -> Self {
        NullityValue(NON_NULL)
    }

    pub fn is_null(&self) -> bool {
        self.0 == NULL
    }

    pub fn is_non_null(&self) -> bool {
        self.0 == NON_NULL
    }
}

impl AbstractDomain for NullityValue {
    fn bottom() -> Self {
        NullityValue(BOTTOM)
    }

    fn top() -> Self {
        NullityValue(TOP)
    }

    fn is_bottom(&self) -> bool {
        self.0 == BOTTOM
    }

    fn is_top(&self) -> bool {
        self.0 == TOP
    }

    fn leq(&self, other: &Self) -> bool {
        self.0 & other.0 == self.0
    }

    fn join(&self, other: &Self) -> Self {
        NullityValue(self.0 | other.0)
    }

    fn meet(&self, other: &Self) -> Self {
        NullityValue(self.0 & other.0)
    }

    // finite ascending chains: join is a widening
    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }

    // finite descending chains: meet is a narrowing
    fn narrow(&self, other: &Self) -> Self {
        self.meet(other)
    }
}

impl fmt::Display for NullityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            BOTTOM => write!(f, "_|_"),
            NULL => write!(f, "N"),
            NON_NULL => write!(f, "NN"),
            _ => write!(f, "T"),
        }
    }
}

/// Nullity environment: pointer variable -> nullity value.
pub type NullityEnv = Env<NullityValue>;

impl NullityEnv {
    pub fn assign(&mut self, x: &Var, y: &Var) {
        if self.is_bottom() {
            return;
        }
        let v = self.value_of(y);
        self.bind(x, v);
    }

    /// Refine under `p == q`.
    pub fn equality(&mut self, p: &Var, q: &Var) {
        if self.is_bottom() {
            return;
        }
        let met = self.value_of(p).meet(&self.value_of(q));
        self.bind(p, met);
        self.bind(q, met);
    }

    /// Refine under `p == v`.
    pub fn equality_value(&mut self, p: &Var, v: NullityValue) {
        if self.is_bottom() {
            return;
        }
        let met = self.value_of(p).meet(&v);
        self.bind(p, met);
    }

    /// Refine under `p != q`.
    pub fn disequality(&mut self, p: &Var, q: &Var) {
        if self.is_bottom() {
            return;
        }
        let (vp, vq) = (self.value_of(p), self.value_of(q));
        if vp.is_null() && vq.is_null() {
            *self = NullityEnv::bottom();
        } else if vp.is_top() && vq.is_null() {
            self.bind(p, NullityValue::non_null());
        } else if vq.is_top() && vp.is_null() {
            self.bind(q, NullityValue::non_null());
        }
    }

    /// Refine under `p != v`.
    pub fn disequality_value(&mut self, p: &Var, v: NullityValue) {
        if self.is_bottom() {
            return;
        }
        let vp = self.value_of(p);
        if vp.is_null() && v.is_null() {
            *self = NullityEnv::bottom();
        } else if vp.is_top() && v.is_null() {
            self.bind(p, NullityValue::non_null());
        }
    }
}
