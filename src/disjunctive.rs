//! Disjunctions of intervals with bounded cardinality.
//!
//! A value is bottom, top, or a finite list of intervals in canonical
//! form: non-empty, strictly sorted, pairwise non-overlapping and
//! non-consecutive (`[0,2] | [3,5]` fuses to `[0,5]`), and a singleton
//! list is neither top nor bottom. The number of disjuncts is capped; on
//! overflow the list collapses to its convex hull.
//!
//! Widening widens the two outer hulls and keeps the interior intervals
//! verbatim, relying on normalization and the cardinality cap for
//! convergence. Narrowing is replaced with meet.

use std::fmt;
use std::sync::Once;

use log::{debug, warn};
use num_bigint::BigInt;

use crate::bound::Bound;
use crate::domain::AbstractDomain;
use crate::interval::Interval;
use crate::separate::{Env, NumValue};

/// Finite disjunction of intervals. `MAX` caps the number of disjuncts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisInterval<const MAX: usize = 50> {
    Bottom,
    Finite(Vec<Interval>),
    Top,
}

/// Environment of disjunctive intervals.
pub type DisIntervalEnv = Env<DisInterval>;

static NARROW_WARNING: Once = Once::new();

impl<const MAX: usize> DisInterval<MAX> {
    pub fn from_interval(itv: Interval) -> Self {
        if itv.is_bottom() {
            DisInterval::Bottom
        } else if itv.is_top() {
            DisInterval::Top
        } else {
            DisInterval::Finite(vec![itv])
        }
    }

    pub fn constant(n: impl Into<BigInt>) -> Self {
        DisInterval::from_interval(Interval::constant(n))
    }

    /// Build from an arbitrary list, normalizing and applying the cap.
    pub fn from_list(list: Vec<Interval>) -> Self {
        let mut res = match normalize_list(list) {
            None => return DisInterval::Top,
            Some(l) if l.is_empty() => return DisInterval::Bottom,
            Some(l) => l,
        };
        if res.len() >= MAX {
            warn!(
                "reached maximum allowed number of disjunctions ({}); merging all intervals",
                MAX
            );
            let hull = res[0].join(&res[res.len() - 1]);
            res = vec![hull];
        }
        DisInterval::Finite(res)
    }

    pub fn intervals(&self) -> &[Interval] {
        match self {
            DisInterval::Finite(l) => l,
            _ => &[],
        }
    }

    /// Convex hull of the disjunction.
    pub fn approx(&self) -> Interval {
        match self {
            DisInterval::Bottom => Interval::bottom(),
            DisInterval::Top => Interval::top(),
            DisInterval::Finite(l) => l[0].join(&l[l.len() - 1]),
        }
    }

    pub fn singleton(&self) -> Option<&BigInt> {
        match self {
            DisInterval::Finite(l) if l.len() == 1 => l[0].singleton(),
            _ => None,
        }
    }

    pub fn lower_half_line(&self) -> Self {
        self.unary_op(|i| i.lower_half_line())
    }

    pub fn upper_half_line(&self) -> Self {
        self.unary_op(|i| i.upper_half_line())
    }

    /// Remove the value `c`, splitting the disjunct that contains it.
    pub fn trim_bound(&self, c: &BigInt) -> Self {
        match self {
            DisInterval::Bottom => DisInterval::Bottom,
            DisInterval::Top => {
                let below = Interval::new(Bound::NegInf, Bound::Finite(c - 1u8));
                let above = Interval::new(Bound::Finite(c + 1u8), Bound::PosInf);
                DisInterval::from_list(vec![below, above])
            }
            DisInterval::Finite(l) => {
                let mut res = Vec::with_capacity(l.len() + 1);
                for itv in l {
                    if !itv.contains(c) {
                        res.push(itv.clone());
                        continue;
                    }
                    if itv.lb().as_finite() == Some(c) {
                        res.push(Interval::new(Bound::Finite(c + 1u8), itv.ub().clone()));
                    } else if itv.ub().as_finite() == Some(c) {
                        res.push(Interval::new(itv.lb().clone(), Bound::Finite(c - 1u8)));
                    } else {
                        res.push(Interval::new(itv.lb().clone(), Bound::Finite(c - 1u8)));
                        res.push(Interval::new(Bound::Finite(c + 1u8), itv.ub().clone()));
                    }
                }
                DisInterval::from_list(res)
            }
        }
    }

    fn unary_op<F>(&self, op: F) -> Self
    where
        F: Fn(&Interval) -> Interval,
    {
        match self {
            DisInterval::Bottom => DisInterval::Bottom,
            DisInterval::Top => DisInterval::Top,
            DisInterval::Finite(l) => {
                let mut res = Vec::with_capacity(l.len());
                for itv in l {
                    let r = op(itv);
                    if r.is_bottom() {
                        continue;
                    }
                    if r.is_top() {
                        return DisInterval::Top;
                    }
                    res.push(r);
                }
                DisInterval::from_list(res)
            }
        }
    }

    // When `shortcut_top` is set, any top operand makes the result top;
    // otherwise top operands are threaded through the interval operation.
    fn binary_op<F>(&self, other: &Self, op: F, shortcut_top: bool) -> Self
    where
        F: Fn(&Interval, &Interval) -> Interval,
    {
        use DisInterval::*;
        match (self, other) {
            (Bottom, _) | (_, Bottom) => return Bottom,
            (Top, Top) => return Top,
            (Top, _) | (_, Top) if shortcut_top => return Top,
            _ => {}
        }
        let mut res = Vec::new();
        let lists: Vec<(Interval, Interval)> = match (self, other) {
            (Finite(l1), Finite(l2)) => l1
                .iter()
                .flat_map(|a| l2.iter().map(move |b| (a.clone(), b.clone())))
                .collect(),
            (Finite(l1), Top) => l1.iter().map(|a| (a.clone(), Interval::top())).collect(),
            (Top, Finite(l2)) => l2.iter().map(|b| (Interval::top(), b.clone())).collect(),
            _ => unreachable!(),
        };
        for (a, b) in lists {
            let r = op(&a, &b);
            if r.is_bottom() {
                continue;
            }
            if r.is_top() {
                return Top;
            }
            res.push(r);
        }
        if res.is_empty() {
            Bottom
        } else {
            DisInterval::from_list(res)
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a.add(b), true)
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a.sub(b), true)
    }

    pub fn mul(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a.mul(b), true)
    }

    pub fn div(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a.div(b), false)
    }

    pub fn rem(&self, other: &Self) -> Self {
        self.binary_op(other, |a, b| a.rem(b), false)
    }

    pub fn neg(&self) -> Self {
        self.unary_op(|i| i.neg())
    }

    fn widening<F>(&self, other: &Self, widen_op: F) -> Self
    where
        F: Fn(&Interval, &Interval) -> Interval,
    {
        use DisInterval::*;
        match (self, other) {
            (Bottom, o) => o.clone(),
            (s, Bottom) => s.clone(),
            (Top, _) => Top,
            (_, Top) => Top,
            (Finite(l1), Finite(l2)) => {
                if l1.len() == 1 && l2.len() == 1 {
                    return DisInterval::from_interval(widen_op(&l1[0], &l2[0]));
                }
                if l1.len() == 1 {
                    return DisInterval::from_interval(widen_op(&l1[0], &other.approx()));
                }
                if l2.len() == 1 {
                    return DisInterval::from_interval(widen_op(&self.approx(), &l2[0]));
                }
                // widen the extremes, keep every interior interval and let
                // normalization (plus the cardinality cap) recover shape
                let lb_widen = widen_op(&l1[0], &l2[0]);
                let ub_widen = widen_op(&l1[l1.len() - 1], &l2[l2.len() - 1]);
                let mut res = Vec::with_capacity(l1.len() + l2.len());
                res.push(lb_widen);
                res.extend_from_slice(&l1[1..l1.len() - 1]);
                res.extend_from_slice(&l2[1..l2.len() - 1]);
                res.push(ub_widen);
                DisInterval::from_list(res)
            }
        }
    }
}

fn overlap(i1: &Interval, i2: &Interval) -> bool {
    i2.lb() <= i1.ub() && i1.lb() <= i2.ub()
}

fn consecutive(i1: &Interval, i2: &Interval) -> bool {
    match (i1.ub().as_finite(), i2.lb().as_finite()) {
        (Some(u), Some(l)) => u + 1u8 == *l,
        _ => false,
    }
}

// Append `intv` to a sorted, canonical prefix, fusing backward as needed.
fn push_merged(res: &mut Vec<Interval>, mut intv: Interval) {
    while let Some(prev) = res.last() {
        if overlap(prev, &intv) || consecutive(prev, &intv) || consecutive(&intv, prev) {
            intv = prev.join(&intv);
            res.pop();
        } else if intv.leq(prev) {
            return;
        } else {
            break;
        }
    }
    res.push(intv);
}

// None encodes top (a top member swallows the list); an empty result is
// bottom.
fn normalize_list(list: Vec<Interval>) -> Option<Vec<Interval>> {
    let mut sorted: Vec<Interval> = list.into_iter().filter(|i| !i.is_bottom()).collect();
    for itv in &sorted {
        if itv.is_top() {
            return None;
        }
    }
    sorted.sort_by(|a, b| (a.lb(), a.ub()).cmp(&(b.lb(), b.ub())));
    let mut res = Vec::with_capacity(sorted.len());
    for itv in sorted {
        push_merged(&mut res, itv);
    }
    if res.len() == 1 && res[0].is_top() {
        return None;
    }
    Some(res)
}

impl<const MAX: usize> AbstractDomain for DisInterval<MAX> {
    fn bottom() -> Self {
        DisInterval::Bottom
    }

    fn top() -> Self {
        DisInterval::Top
    }

    fn is_bottom(&self) -> bool {
        matches!(self, DisInterval::Bottom)
    }

    fn is_top(&self) -> bool {
        matches!(self, DisInterval::Top)
    }

    fn leq(&self, other: &Self) -> bool {
        use DisInterval::*;
        match (self, other) {
            (Bottom, _) => true,
            (_, Bottom) => false,
            (_, Top) => true,
            (Top, _) => false,
            (Finite(l1), Finite(l2)) => {
                // every disjunct must be covered by some disjunct of `other`;
                // both lists are sorted, so the scan never restarts
                let mut j = 0;
                'outer: for i1 in l1 {
                    while j < l2.len() {
                        if i1.leq(&l2[j]) {
                            continue 'outer;
                        }
                        j += 1;
                    }
                    return false;
                }
                true
            }
        }
    }

    fn join(&self, other: &Self) -> Self {
        use DisInterval::*;
        match (self, other) {
            (Bottom, o) => o.clone(),
            (s, Bottom) => s.clone(),
            (Top, _) | (_, Top) => Top,
            (Finite(l1), Finite(l2)) => {
                debug!("join of {} and {}", self, other);
                // single merge pass over the two sorted lists
                let mut res = Vec::with_capacity(l1.len() + l2.len());
                let (mut i, mut j) = (0, 0);
                while i < l1.len() && j < l2.len() {
                    if (l1[i].lb(), l1[i].ub()) <= (l2[j].lb(), l2[j].ub()) {
                        push_merged(&mut res, l1[i].clone());
                        i += 1;
                    } else {
                        push_merged(&mut res, l2[j].clone());
                        j += 1;
                    }
                }
                for itv in &l1[i..] {
                    push_merged(&mut res, itv.clone());
                }
                for itv in &l2[j..] {
                    push_merged(&mut res, itv.clone());
                }
                DisInterval::from_list(res)
            }
        }
    }

    fn meet(&self, other: &Self) -> Self {
        use DisInterval::*;
        match (self, other) {
            (Bottom, _) | (_, Bottom) => Bottom,
            (Top, o) => o.clone(),
            (s, Top) => s.clone(),
            (Finite(l1), Finite(l2)) => {
                let mut res = Vec::new();
                for i1 in l1 {
                    for i2 in l2 {
                        let m = i1.meet(i2);
                        if !m.is_bottom() {
                            res.push(m);
                        }
                    }
                }
                if res.is_empty() {
                    Bottom
                } else {
                    DisInterval::from_list(res)
                }
            }
        }
    }

    fn widen(&self, other: &Self) -> Self {
        self.widening(other, |a, b| a.widen(b))
    }

    fn widen_with_thresholds(&self, other: &Self, thresholds: &[BigInt]) -> Self {
        self.widening(other, |a, b| a.widen_with_thresholds(b, thresholds))
    }

    fn narrow(&self, other: &Self) -> Self {
        NARROW_WARNING.call_once(|| {
            warn!("disjunctive-interval narrowing replaced with meet");
        });
        self.meet(other)
    }

    fn normalize(&mut self) {
        if let DisInterval::Finite(l) = self {
            *self = DisInterval::<MAX>::from_list(std::mem::take(l));
        }
    }
}

impl<const MAX: usize> NumValue for DisInterval<MAX> {
    fn from_constant(k: &BigInt) -> Self {
        DisInterval::constant(k.clone())
    }

    fn from_interval(itv: Interval) -> Self {
        DisInterval::from_interval(itv)
    }

    fn to_interval(&self) -> Interval {
        self.approx()
    }

    fn trim(&self, c: &BigInt) -> Self {
        self.trim_bound(c)
    }

    fn add(&self, other: &Self) -> Self {
        DisInterval::add(self, other)
    }

    fn sub(&self, other: &Self) -> Self {
        DisInterval::sub(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        DisInterval::mul(self, other)
    }

    fn div(&self, other: &Self) -> Self {
        DisInterval::div(self, other)
    }

    fn rem(&self, other: &Self) -> Self {
        DisInterval::rem(self, other)
    }

    fn neg(&self) -> Self {
        DisInterval::neg(self)
    }
}

impl<const MAX: usize> fmt::Display for DisInterval<MAX> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisInterval::Bottom => write!(f, "_|_"),
            DisInterval::Top => write!(f, "[-oo, +oo]"),
            DisInterval::Finite(l) => {
                let mut it = l.iter().peekable();
                while let Some(itv) = it.next() {
                    write!(f, "{}", itv)?;
                    if it.peek().is_some() {
                        write!(f, " | ")?;
                    }
                }
                Ok(())
            }
        }
    }
}
