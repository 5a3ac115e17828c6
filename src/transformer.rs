//! Abstract transfer functions for the statement kinds.
//!
//! `NumAbsTransformer` gives every statement its semantics over a
//! numerical (array-capable) domain; pointer statements are no-ops
//! there. `NullityAbsTransformer` is its dual for the nullity
//! environment: it interprets the pointer statements and ignores the
//! numeric ones.

use log::debug;

use crate::cfg::Statement;
use crate::domain::{AbstractDomain, ArrayDomain, NumericalDomain};
use crate::expr::{LinearExpr, Var};
use crate::inter::{CallCtxTable, SummaryTable};
use crate::nullity::{NullityEnv, NullityValue};

/// Ghost variable carrying a callee's return value into the caller.
const RET_GHOST: &str = "$call.ret";

/// Statement-level abstract semantics over a domain `D`.
pub trait StatementVisitor<D> {
    fn exec(&mut self, st: &Statement, inv: &mut D);
}

/// Numerical abstract transformer, optionally wired to the
/// interprocedural tables.
pub struct NumAbsTransformer<'t, D> {
    summaries: Option<&'t SummaryTable<D>>,
    call_ctxs: Option<&'t mut CallCtxTable<D>>,
}

impl<'t, D: ArrayDomain> NumAbsTransformer<'t, D> {
    /// Intra-procedural transformer: calls havoc their result.
    pub fn new() -> Self {
        NumAbsTransformer {
            summaries: None,
            call_ctxs: None,
        }
    }

    pub fn with_tables(
        summaries: Option<&'t SummaryTable<D>>,
        call_ctxs: Option<&'t mut CallCtxTable<D>>,
    ) -> Self {
        NumAbsTransformer {
            summaries,
            call_ctxs,
        }
    }

    fn exec_call(
        &mut self,
        lhs: &Option<(Var, crate::cfg::VarType)>,
        func: &str,
        args: &[(Var, crate::cfg::VarType)],
        inv: &mut D,
    ) {
        let summary = self.summaries.and_then(|t| t.get(func));
        let Some(summary) = summary else {
            // unknown callee: the result can be anything
            if let Some((x, _)) = lhs {
                inv.forget(x);
            }
            return;
        };

        let formals = summary.decl.param_names();
        assert_eq!(
            formals.len(),
            args.len(),
            "call to {} with {} arguments, expected {}",
            func,
            args.len(),
            formals.len()
        );
        let actuals: Vec<Var> = args.iter().map(|(v, _)| v.clone()).collect();

        // record the caller-side context over the formals
        if let Some(ctx_tbl) = self.call_ctxs.as_deref_mut() {
            let mut ctx = inv.clone();
            ctx.project(&actuals);
            let subst: Vec<(Var, Var)> = actuals
                .iter()
                .cloned()
                .zip(formals.iter().cloned())
                .collect();
            ctx.rename(&subst);
            ctx_tbl.record(func, ctx);
        }

        // instantiate the summary on the actuals
        let mut rel = summary.relation.clone();
        let mut subst: Vec<(Var, Var)> = formals
            .into_iter()
            .zip(actuals.iter().cloned())
            .collect();
        if let Some(rv) = &summary.ret_var {
            subst.push((rv.clone(), RET_GHOST.to_string()));
        }
        rel.rename(&subst);
        let mut keep = actuals;
        keep.push(RET_GHOST.to_string());
        rel.project(&keep);

        if let Some((x, _)) = lhs {
            inv.forget(x);
        }
        *inv = inv.meet(&rel);

        if let Some((x, _)) = lhs {
            if summary.ret_var.is_some() {
                inv.assign(x, &LinearExpr::var(RET_GHOST));
            }
        }
        inv.forget(&RET_GHOST.to_string());
        debug!("call {} applied through summary: {}", func, inv);
    }
}

impl<'t, D: ArrayDomain> Default for NumAbsTransformer<'t, D> {
    fn default() -> Self {
        NumAbsTransformer::new()
    }
}

impl<'t, D: ArrayDomain> StatementVisitor<D> for NumAbsTransformer<'t, D> {
    fn exec(&mut self, st: &Statement, inv: &mut D) {
        if inv.is_bottom() {
            return;
        }
        match st {
            Statement::BinOp {
                op,
                lhs,
                left,
                right,
            } => match right {
                crate::cfg::Operand::Var(z) => inv.apply(*op, lhs, left, z),
                crate::cfg::Operand::Const(k) => inv.apply_k(*op, lhs, left, k),
            },
            Statement::Assign { lhs, rhs } => inv.assign(lhs, rhs),
            Statement::Assume(c) => inv.add_constraints(std::slice::from_ref(c)),
            Statement::Havoc(v) => inv.forget(v),
            Statement::Unreachable => *inv = D::bottom(),
            Statement::Select {
                lhs,
                cond,
                on_true,
                on_false,
            } => {
                let mut then_inv = inv.clone();
                then_inv.add_constraints(std::slice::from_ref(cond));
                then_inv.assign(lhs, on_true);

                let neg = cond.negate();
                let mut else_inv = inv.clone();
                else_inv.add_constraints(std::slice::from_ref(&neg));
                else_inv.assign(lhs, on_false);

                *inv = then_inv.join(&else_inv);
            }
            Statement::FuncDecl(_) => {}
            Statement::CallSite { lhs, func, args } => self.exec_call(lhs, func, args, inv),
            Statement::Return { .. } => {}
            Statement::ArrayInit { arr, values } => inv.array_init(arr, values),
            Statement::ArrayLoad { lhs, arr, idx } => inv.array_load(lhs, arr, idx),
            Statement::ArrayStore {
                arr,
                idx,
                val,
                is_singleton,
            } => inv.array_store(arr, idx, val, *is_singleton),
            // pointer statements are not tracked by numerical domains
            Statement::PtrNew { .. }
            | Statement::PtrAssign { .. }
            | Statement::PtrLoad { .. }
            | Statement::PtrStore { .. } => {}
        }
    }
}

/// Nullity transformer: interprets the pointer statements.
#[derive(Debug, Default)]
pub struct NullityAbsTransformer;

impl StatementVisitor<NullityEnv> for NullityAbsTransformer {
    fn exec(&mut self, st: &Statement, inv: &mut NullityEnv) {
        if inv.is_bottom() {
            return;
        }
        match st {
            Statement::PtrNew { lhs, .. } => {
                inv.bind(lhs, NullityValue::non_null());
            }
            Statement::PtrAssign { lhs, rhs, .. } => {
                inv.assign(lhs, rhs);
            }
            Statement::PtrLoad { lhs, rhs, .. } => {
                // a successful dereference proves the source non-null
                inv.equality_value(rhs, NullityValue::non_null());
                inv.bind(lhs, NullityValue::top());
            }
            Statement::PtrStore { lhs, .. } => {
                inv.equality_value(lhs, NullityValue::non_null());
            }
            Statement::Havoc(v) => inv.remove(v),
            Statement::Unreachable => *inv = NullityEnv::bottom(),
            Statement::CallSite { lhs, .. } => {
                if let Some((x, _)) = lhs {
                    inv.remove(x);
                }
            }
            _ => {}
        }
    }
}
