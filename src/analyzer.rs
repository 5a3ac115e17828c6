//! Forward flow-sensitive analyzers.
//!
//! `FwdAnalyzer` bundles a CFG, the numerical abstract transformer, the
//! optional liveness information and the fixpoint parameters, runs the
//! WTO iterator and keeps the per-block pre/post invariant maps for
//! querying. `NullityAnalyzer` is the pointer-nullity twin.
//! Nullity currently runs separately from the numerical analysis; a
//! reduced product of the two would need pointer operations in the
//! numerical transformer first.

use std::collections::BTreeSet;

use num_bigint::BigInt;
use num_traits::Zero;
use rustc_hash::FxHashMap;

use crate::cfg::{Cfg, Label, Statement};
use crate::domain::{AbstractDomain, ArrayDomain, NumericalDomain};
use crate::expr::{LinearConstraint, Var};
use crate::fixpoint::{BlockTransfer, FixpointParams, FwdFixpointIterator};
use crate::inter::{CallCtxTable, SummaryTable};
use crate::liveness::Liveness;
use crate::nullity::NullityEnv;
use crate::transformer::{NullityAbsTransformer, NumAbsTransformer, StatementVisitor};

/// Collect widening thresholds from the constants of the CFG's guards.
fn harvest_thresholds(cfg: &Cfg) -> Vec<BigInt> {
    let mut ts = Vec::new();
    let mut from_constraint = |c: &LinearConstraint| {
        let expr = c.expr();
        let vars = expr.variables();
        if vars.len() != 1 {
            return;
        }
        let v = vars.iter().next().unwrap();
        let coeff = expr.coeff_of(v);
        if coeff.is_zero() {
            return;
        }
        // expr = coeff*v + k REL 0, so the guard pivots around -k/coeff
        let pivot = -(expr.const_term()) / &coeff;
        ts.push(pivot.clone());
        ts.push(pivot + 1);
    };
    for b in cfg.blocks() {
        for st in b.statements() {
            match st {
                Statement::Assume(c) => from_constraint(c),
                Statement::Select { cond, .. } => from_constraint(cond),
                _ => {}
            }
        }
    }
    ts
}

struct NumCallback<'c, 't, D> {
    cfg: &'c Cfg,
    live: Option<&'c Liveness>,
    formals: &'c BTreeSet<Var>,
    tx: NumAbsTransformer<'t, D>,
}

impl<'c, 't, D: ArrayDomain> BlockTransfer<Label, D> for NumCallback<'c, 't, D> {
    fn analyze(&mut self, label: &Label, state: &mut D) {
        for st in self.cfg.block(label).statements() {
            self.tx.exec(st, state);
        }
        if let Some(live) = self.live {
            if state.is_bottom() || state.is_top() {
                return;
            }
            let dead = live.dead_exit(label);
            for v in dead.iter() {
                if !self.formals.contains(v) {
                    state.forget(v);
                }
            }
        }
    }
}

/// Forward numerical analyzer over one CFG.
pub struct FwdAnalyzer<'a, D> {
    cfg: &'a Cfg,
    live: Option<&'a Liveness>,
    params: FixpointParams,
    formals: BTreeSet<Var>,
    pre: FxHashMap<Label, D>,
    post: FxHashMap<Label, D>,
}

impl<'a, D: ArrayDomain> FwdAnalyzer<'a, D> {
    /// `live` may be `None` when no liveness information is available.
    pub fn new(cfg: &'a Cfg, live: Option<&'a Liveness>, params: FixpointParams) -> Self {
        // formal parameters and the return value must survive pruning
        let mut formals = BTreeSet::new();
        if let Some(decl) = cfg.decl() {
            formals.extend(decl.param_names());
        }
        if let Some(ret) = cfg.return_var() {
            formals.insert(ret);
        }
        FwdAnalyzer {
            cfg,
            live,
            params,
            formals,
            pre: FxHashMap::default(),
            post: FxHashMap::default(),
        }
    }

    /// Run the intra-procedural fixpoint from the given entry state.
    pub fn run(&mut self, seed: D) {
        self.run_with_tables(seed, None, None);
    }

    /// Run with interprocedural tables: call sites apply summaries and
    /// record calling contexts.
    pub fn run_with_tables(
        &mut self,
        seed: D,
        summaries: Option<&SummaryTable<D>>,
        call_ctxs: Option<&mut CallCtxTable<D>>,
    ) {
        let thresholds = if self.params.jump_set_size > 0 {
            harvest_thresholds(self.cfg)
        } else {
            Vec::new()
        };
        let callback = NumCallback {
            cfg: self.cfg,
            live: self.live,
            formals: &self.formals,
            tx: NumAbsTransformer::with_tables(summaries, call_ctxs),
        };
        let mut it = FwdFixpointIterator::new(self.cfg, callback, self.params.clone())
            .with_thresholds(thresholds);
        it.run(seed);
        let (_, pre, post) = it.into_parts();
        self.pre = pre;
        self.post = post;
    }

    /// Invariant at the entry of `label`; top for unknown labels. This is
    /// also the indexing operator of the analyzer.
    pub fn get_pre(&self, label: &Label) -> D {
        self.pre.get(label).cloned().unwrap_or_else(D::top)
    }

    /// Invariant at the exit of `label`; top for unknown labels.
    pub fn get_post(&self, label: &Label) -> D {
        self.post.get(label).cloned().unwrap_or_else(D::top)
    }
}

struct NullityCallback<'c> {
    cfg: &'c Cfg,
    live: Option<&'c Liveness>,
    tx: NullityAbsTransformer,
}

impl<'c> BlockTransfer<Label, NullityEnv> for NullityCallback<'c> {
    fn analyze(&mut self, label: &Label, state: &mut NullityEnv) {
        for st in self.cfg.block(label).statements() {
            self.tx.exec(st, state);
        }
        if let Some(live) = self.live {
            if state.is_bottom() {
                return;
            }
            let dead = live.dead_exit(label);
            for v in dead.iter() {
                state.remove(v);
            }
        }
    }
}

/// Forward nullity analyzer.
pub struct NullityAnalyzer<'a> {
    cfg: &'a Cfg,
    live: Option<&'a Liveness>,
    params: FixpointParams,
    pre: FxHashMap<Label, NullityEnv>,
    post: FxHashMap<Label, NullityEnv>,
}

impl<'a> NullityAnalyzer<'a> {
    pub fn new(cfg: &'a Cfg, live: Option<&'a Liveness>, params: FixpointParams) -> Self {
        NullityAnalyzer {
            cfg,
            live,
            params,
            pre: FxHashMap::default(),
            post: FxHashMap::default(),
        }
    }

    pub fn run(&mut self, seed: NullityEnv) {
        let callback = NullityCallback {
            cfg: self.cfg,
            live: self.live,
            tx: NullityAbsTransformer,
        };
        let mut it = FwdFixpointIterator::new(self.cfg, callback, self.params.clone());
        it.run(seed);
        let (_, pre, post) = it.into_parts();
        self.pre = pre;
        self.post = post;
    }

    pub fn get_pre(&self, label: &Label) -> NullityEnv {
        self.pre.get(label).cloned().unwrap_or_else(NullityEnv::top)
    }

    pub fn get_post(&self, label: &Label) -> NullityEnv {
        self.post
            .get(label)
            .cloned()
            .unwrap_or_else(NullityEnv::top)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disjunctive::DisIntervalEnv;
    use crate::expr::LinearExpr;
    use crate::interval::Interval;
    use crate::separate::IntervalEnv;

    // i := 0; while (i <= 99) { havoc nd; inc := nd >= 1 ? 1 : 2; i += inc }
    fn nondet_loop() -> Cfg {
        let mut cfg = Cfg::new("x0", "ret");
        cfg.insert("x0").assign("k", 2147483648i64);
        cfg.insert("entry").assign("i", 0);
        cfg.insert("bb1");
        cfg.insert("bb1_t").assume(LinearExpr::var("i").le(99));
        cfg.insert("bb1_f").assume(LinearExpr::var("i").ge(100));
        let bb2 = cfg.insert("bb2");
        bb2.havoc("nd");
        bb2.select("inc", LinearExpr::var("nd").ge(1), 1, 2);
        bb2.add("i", "i", "inc");
        cfg.insert("ret");
        cfg.add_edge("x0", "entry");
        cfg.add_edge("entry", "bb1");
        cfg.add_edge("bb1", "bb1_t");
        cfg.add_edge("bb1", "bb1_f");
        cfg.add_edge("bb1_t", "bb2");
        cfg.add_edge("bb2", "bb1");
        cfg.add_edge("bb1_f", "ret");
        cfg
    }

    #[test]
    fn test_intervals_on_nondet_loop() {
        let cfg = nondet_loop();
        let mut a: FwdAnalyzer<IntervalEnv> =
            FwdAnalyzer::new(&cfg, None, FixpointParams::default());
        a.run(IntervalEnv::top());

        let i = "i".to_string();
        let k = "k".to_string();
        // the loop counter overshoots by at most one increment
        assert_eq!(a.get_pre(&"ret".to_string()).get(&i), Interval::range(100, 101));
        // an untouched large constant is preserved exactly
        assert_eq!(
            a.get_pre(&"ret".to_string()).get(&k),
            Interval::constant(2147483648i64)
        );
    }

    #[test]
    fn test_liveness_prunes_invariants() {
        let cfg = nondet_loop();
        let live = Liveness::new(&cfg);
        let mut a: FwdAnalyzer<IntervalEnv> =
            FwdAnalyzer::new(&cfg, Some(&live), FixpointParams::default());
        a.run(IntervalEnv::top());

        // the scratch variables of the loop body are dead at its exit
        let body_post = a.get_post(&"bb2".to_string());
        assert!(body_post.get(&"nd".to_string()).is_top());
        // soundness is unaffected
        let i = "i".to_string();
        assert_eq!(a.get_pre(&"ret".to_string()).get(&i), Interval::range(100, 101));
    }

    #[test]
    fn test_disjunctive_on_nondet_loop() {
        let cfg = nondet_loop();
        let params = FixpointParams {
            widening_delay: 1,
            descending_iters: Some(2),
            jump_set_size: 20,
        };
        let mut a: FwdAnalyzer<DisIntervalEnv> = FwdAnalyzer::new(&cfg, None, params);
        a.run(DisIntervalEnv::top());

        let i = "i".to_string();
        let at_exit = a.get_pre(&"ret".to_string()).get(&i);
        // sound: contains both exit values
        assert!(at_exit.contains(&100.into()));
        assert!(at_exit.contains(&101.into()));
    }

    #[test]
    fn test_jump_set_keeps_large_thresholds() {
        // a wide loop plus several small guard constants: the loop bound
        // must survive the jump-set cap for widening to land on it
        let mut cfg = Cfg::new("entry", "ret");
        let entry = cfg.insert("entry");
        entry.assign("i", 0);
        entry.assume(LinearExpr::var("a").le(1));
        entry.assume(LinearExpr::var("b").le(2));
        entry.assume(LinearExpr::var("c").le(3));
        cfg.insert("head");
        cfg.insert("body").assume(LinearExpr::var("i").le(9999));
        cfg.insert("body").add("i", "i", 1);
        cfg.insert("ret").assume(LinearExpr::var("i").ge(10000));
        cfg.add_edge("entry", "head");
        cfg.add_edge("head", "body");
        cfg.add_edge("body", "head");
        cfg.add_edge("head", "ret");

        // no descending rounds: only threshold widening can keep the
        // upper bound finite
        let params = FixpointParams {
            widening_delay: 1,
            descending_iters: Some(0),
            jump_set_size: 4,
        };
        let mut a: FwdAnalyzer<IntervalEnv> = FwdAnalyzer::new(&cfg, None, params);
        a.run(IntervalEnv::top());

        let i = "i".to_string();
        let at_head = a.get_pre(&"head".to_string()).get(&i);
        assert!(at_head.ub().is_finite(), "widening lost the loop bound");
        // the result is still sound
        let after = a.get_post(&"ret".to_string()).get(&i);
        assert!(after.contains(&10000.into()));
    }

    #[test]
    fn test_nullity_analyzer() {
        let mut cfg = Cfg::new("b0", "b3");
        cfg.insert("b0").new_object("p", 1);
        cfg.insert("b1").ptr_assign("q", "p", 0);
        cfg.insert("b2"); // q untouched on this path
        cfg.insert("b3").ptr_store("p", "q", Interval::range(0, 3));
        cfg.add_edge("b0", "b1");
        cfg.add_edge("b0", "b2");
        cfg.add_edge("b1", "b3");
        cfg.add_edge("b2", "b3");

        let mut a = NullityAnalyzer::new(&cfg, None, FixpointParams::default());
        a.run(NullityEnv::top());

        // p is non-null on every path; q only on one
        let at_join = a.get_pre(&"b3".to_string());
        assert!(at_join.value_of(&"p".to_string()).is_non_null());
        assert!(at_join.value_of(&"q".to_string()).is_top());
        // after the store through p, p is (still) non-null
        assert!(a
            .get_post(&"b3".to_string())
            .value_of(&"p".to_string())
            .is_non_null());
    }
}
