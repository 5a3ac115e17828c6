//! Iterative linear-constraint propagation over variable environments.
//!
//! Each constraint is used to refine every variable it mentions: the
//! variable is isolated, the rest of the expression is evaluated to an
//! interval, and the implied bound is met into the variable's value.
//! Propagation repeats until a pass changes nothing or a fixed number
//! of passes has run.

use log::debug;
use num_traits::{Signed, Zero};

use crate::bound::Bound;
use crate::domain::{AbstractDomain, NumericalDomain};
use crate::expr::{ConstraintKind, LinearConstraint, LinearExpr, Var};
use crate::interval::Interval;
use crate::separate::{Env, NumValue};

/// Refinement passes before giving up on reaching a local fixpoint.
const MAX_PASSES: usize = 10;

/// Conjoin `csts` into `env`, refining bindings in place. Sets `env` to
/// bottom when the system is unsatisfiable.
pub fn propagate<W: NumValue>(env: &mut Env<W>, csts: &[LinearConstraint]) {
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        for cst in csts {
            if !step(env, cst, &mut changed) {
                *env = Env::Bottom;
                return;
            }
        }
        if !changed {
            return;
        }
    }
    debug!("constraint propagation stopped after {} passes", MAX_PASSES);
}

/// Interval-box refinement of a single constraint through the generic
/// `get`/`refine` interface. This is the fallback of relational domains
/// for constraint shapes they cannot represent exactly. Returns `false`
/// when the constraint is infeasible.
pub fn refine_box<D: NumericalDomain>(dom: &mut D, cst: &LinearConstraint) -> bool {
    if let Some(value) = cst.constant_value() {
        return value;
    }
    let expr = cst.expr();
    let whole = expr.eval(|v| dom.get(v));
    match cst.kind() {
        ConstraintKind::Le => {
            if whole.lb() > &Bound::zero() {
                return false;
            }
        }
        ConstraintKind::Eq => {
            if !whole.contains(&0.into()) {
                return false;
            }
        }
        ConstraintKind::Neq => {
            if whole.singleton().map(|n| n.is_zero()) == Some(true) {
                return false;
            }
        }
    }
    for x in cst.variables() {
        let coeff = expr.coeff_of(&x);
        let residual = {
            let mut rest = expr.clone();
            rest.add_term(-&coeff, x.clone());
            rest.eval(|v| dom.get(v))
        };
        let rhs = residual.neg();
        let refined = match cst.kind() {
            ConstraintKind::Le => {
                if coeff.is_positive() {
                    Interval::new(Bound::NegInf, rhs.ub().div_floor(&coeff))
                } else {
                    Interval::new(rhs.ub().div_ceil(&coeff), Bound::PosInf)
                }
            }
            ConstraintKind::Eq => {
                if coeff.is_positive() {
                    Interval::new(rhs.lb().div_ceil(&coeff), rhs.ub().div_floor(&coeff))
                } else {
                    Interval::new(rhs.ub().div_ceil(&coeff), rhs.lb().div_floor(&coeff))
                }
            }
            ConstraintKind::Neq => match rhs.singleton() {
                Some(k) if (k % &coeff).is_zero() => dom.get(&x).trim_bound(&(k / &coeff)),
                _ => continue,
            },
        };
        let met = dom.get(&x).meet(&refined);
        if met.is_bottom() {
            return false;
        }
        dom.refine(&x, &refined);
    }
    true
}

// Returns false when the constraint is infeasible under `env`.
fn step<W: NumValue>(env: &mut Env<W>, cst: &LinearConstraint, changed: &mut bool) -> bool {
    if let Some(value) = cst.constant_value() {
        return value;
    }

    let expr = cst.expr();
    let whole = expr.eval(|v| env.value_of(v).to_interval());
    match cst.kind() {
        ConstraintKind::Le => {
            if whole.lb() > &Bound::zero() {
                return false;
            }
        }
        ConstraintKind::Eq => {
            if !whole.contains(&0.into()) {
                return false;
            }
        }
        ConstraintKind::Neq => {
            if whole.singleton().map(|n| n.is_zero()) == Some(true) {
                return false;
            }
        }
    }

    for x in cst.variables() {
        let refined = refine_var(env, expr, cst.kind(), &x);
        if refined.is_bottom() {
            return false;
        }
        let old = env.value_of(&x);
        if !old.leq(&refined) {
            *changed = true;
        }
        env.bind(&x, refined);
    }
    true
}

// Isolate `x` in `expr REL 0` and meet the implied bound into its value.
fn refine_var<W: NumValue>(
    env: &Env<W>,
    expr: &LinearExpr,
    kind: ConstraintKind,
    x: &Var,
) -> W {
    let coeff = expr.coeff_of(x);
    debug_assert!(!coeff.is_zero());
    let current = env.value_of(x);

    // residual = expr - coeff*x, evaluated in the environment
    let residual = {
        let mut rest = expr.clone();
        rest.add_term(-&coeff, x.clone());
        rest.eval(|v| env.value_of(v).to_interval())
    };
    if residual.is_bottom() {
        return W::bottom();
    }
    // coeff*x REL -residual
    let rhs = residual.neg();

    match kind {
        ConstraintKind::Le => {
            // coeff*x <= max(rhs)
            let limit = rhs.ub();
            let refined = if coeff.is_positive() {
                Interval::new(Bound::NegInf, limit.div_floor(&coeff))
            } else {
                Interval::new(limit.div_ceil(&coeff), Bound::PosInf)
            };
            current.meet(&W::from_interval(refined))
        }
        ConstraintKind::Eq => {
            // coeff*x is inside rhs
            let refined = if coeff.is_positive() {
                Interval::new(rhs.lb().div_ceil(&coeff), rhs.ub().div_floor(&coeff))
            } else {
                Interval::new(rhs.ub().div_ceil(&coeff), rhs.lb().div_floor(&coeff))
            };
            current.meet(&W::from_interval(refined))
        }
        ConstraintKind::Neq => {
            // only a definite excluded value can refine
            if let Some(k) = rhs.singleton() {
                if (k % &coeff).is_zero() {
                    return current.trim(&(k / &coeff));
                }
            }
            current
        }
    }
}
