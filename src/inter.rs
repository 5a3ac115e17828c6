//! Interprocedural layer: function summaries, call contexts and the call
//! graph.
//!
//! A summary is the input/output abstract relation of a function over its
//! formal parameters and return variable. Summaries are computed bottom-up
//! in reverse topological order of the call-graph condensation; recursive
//! components iterate their summaries under widening until stable.
//! The call-context table accumulates, per callee, the join of the caller
//! states projected onto the arguments.

use std::collections::BTreeSet;

use log::debug;
use rustc_hash::FxHashMap;

use crate::analyzer::FwdAnalyzer;
use crate::cfg::{Cfg, FunctionDecl, Statement};
use crate::domain::{AbstractDomain, ArrayDomain};
use crate::expr::Var;
use crate::fixpoint::FixpointParams;
use crate::graph::{DirectedGraph, SccGraph};
use crate::liveness::Liveness;

/// Input/output relation of one function.
#[derive(Debug, Clone)]
pub struct Summary<D> {
    pub decl: FunctionDecl,
    pub ret_var: Option<Var>,
    /// Abstract relation over the formals and the return variable.
    pub relation: D,
}

/// Summaries keyed by function name.
#[derive(Debug)]
pub struct SummaryTable<D> {
    map: FxHashMap<String, Summary<D>>,
}

impl<D: AbstractDomain> SummaryTable<D> {
    pub fn new() -> Self {
        SummaryTable {
            map: FxHashMap::default(),
        }
    }

    pub fn get(&self, func: &str) -> Option<&Summary<D>> {
        self.map.get(func)
    }

    pub fn insert(&mut self, summary: Summary<D>) {
        self.map.insert(summary.decl.name.clone(), summary);
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Joined caller-side contexts, keyed by callee.
#[derive(Debug)]
pub struct CallCtxTable<D> {
    map: FxHashMap<String, D>,
}

impl<D: AbstractDomain> CallCtxTable<D> {
    pub fn new() -> Self {
        CallCtxTable {
            map: FxHashMap::default(),
        }
    }

    pub fn record(&mut self, callee: &str, ctx: D) {
        match self.map.get_mut(callee) {
            Some(old) => *old = old.join(&ctx),
            None => {
                self.map.insert(callee.to_string(), ctx);
            }
        }
    }

    pub fn get(&self, callee: &str) -> Option<&D> {
        self.map.get(callee)
    }
}

/// Call graph over function names.
#[derive(Debug, Default)]
pub struct CallGraph {
    funcs: Vec<String>,
    succs: FxHashMap<String, BTreeSet<String>>,
    preds: FxHashMap<String, BTreeSet<String>>,
}

impl CallGraph {
    pub fn build<'c>(cfgs: impl IntoIterator<Item = &'c Cfg>) -> Self {
        let mut cg = CallGraph::default();
        let cfgs: Vec<&Cfg> = cfgs.into_iter().collect();
        for cfg in &cfgs {
            let name = cg.func_key(cfg);
            if !cg.funcs.contains(&name) {
                cg.funcs.push(name.clone());
            }
            cg.succs.entry(name.clone()).or_default();
            cg.preds.entry(name).or_default();
        }
        for cfg in &cfgs {
            let caller = cg.func_key(cfg);
            for b in cfg.blocks() {
                for st in b.statements() {
                    if let Statement::CallSite { func, .. } = st {
                        if cg.funcs.contains(func) {
                            cg.succs.get_mut(&caller).unwrap().insert(func.clone());
                            cg.preds.get_mut(func).unwrap().insert(caller.clone());
                        }
                    }
                }
            }
        }
        cg
    }

    fn func_key(&self, cfg: &Cfg) -> String {
        cfg.func_name()
            .map(str::to_string)
            .unwrap_or_else(|| cfg.entry_label().clone())
    }
}

impl DirectedGraph for CallGraph {
    type NodeId = String;

    fn nodes(&self) -> Vec<String> {
        self.funcs.clone()
    }

    fn succs(&self, n: &String) -> Vec<String> {
        self.succs
            .get(n)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn preds(&self, n: &String) -> Vec<String> {
        self.preds
            .get(n)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Bottom-up interprocedural analysis of a module of CFGs.
pub struct InterFwdAnalyzer<'a, D> {
    cfgs: Vec<&'a Cfg>,
    params: FixpointParams,
    use_liveness: bool,
    pub summaries: SummaryTable<D>,
    pub call_ctxs: CallCtxTable<D>,
    invariants: FxHashMap<String, FxHashMap<String, D>>,
}

impl<'a, D: ArrayDomain> InterFwdAnalyzer<'a, D> {
    pub fn new(cfgs: Vec<&'a Cfg>, params: FixpointParams, use_liveness: bool) -> Self {
        InterFwdAnalyzer {
            cfgs,
            params,
            use_liveness,
            summaries: SummaryTable::new(),
            call_ctxs: CallCtxTable::new(),
            invariants: FxHashMap::default(),
        }
    }

    fn cfg_of(&self, name: &str) -> Option<&'a Cfg> {
        self.cfgs.iter().copied().find(|c| {
            c.func_name().map(str::to_string).unwrap_or_else(|| c.entry_label().clone()) == name
        })
    }

    /// Analyze every function, callees before callers; recursive
    /// components iterate their summaries under widening.
    pub fn run(&mut self) {
        let cg = CallGraph::build(self.cfgs.iter().copied());
        let scc = SccGraph::build(&cg);

        for c in scc.rev_topo_order() {
            if !scc.is_recursive(c) {
                for name in scc.members(c).to_vec() {
                    self.analyze_function(&name);
                }
                continue;
            }
            // recursive component: stabilize summaries under widening
            loop {
                let mut stable = true;
                for name in scc.members(c).to_vec() {
                    let old = self.summaries.get(&name).map(|s| s.relation.clone());
                    self.analyze_function(&name);
                    let new = self.summaries.get(&name).map(|s| s.relation.clone());
                    match (old, new) {
                        (Some(o), Some(n)) => {
                            if !n.leq(&o) {
                                stable = false;
                                let widened = o.widen(&n);
                                if let Some(s) = self.summaries.map.get_mut(&name) {
                                    s.relation = widened;
                                }
                            }
                        }
                        (None, Some(_)) => stable = false,
                        _ => {}
                    }
                }
                if stable {
                    break;
                }
            }
        }
    }

    fn analyze_function(&mut self, name: &str) {
        let Some(cfg) = self.cfg_of(name) else {
            return;
        };
        debug!("interprocedural: analyzing {}", name);
        let live = if self.use_liveness {
            Some(Liveness::new(cfg))
        } else {
            None
        };
        let mut analyzer = FwdAnalyzer::new(cfg, live.as_ref(), self.params.clone());
        analyzer.run_with_tables(D::top(), Some(&self.summaries), Some(&mut self.call_ctxs));

        // materialize the summary from the exit post-state
        if let Some(decl) = cfg.decl().cloned() {
            let ret_var = cfg.return_var();
            let relation = match cfg.exit_label() {
                Some(exit) => {
                    let mut rel = analyzer.get_post(exit);
                    let mut keep = decl.param_names();
                    keep.extend(ret_var.clone());
                    rel.project(&keep);
                    rel
                }
                None => D::top(),
            };
            self.summaries.insert(Summary {
                decl,
                ret_var,
                relation,
            });
        }

        let mut pre = FxHashMap::default();
        for l in cfg.labels() {
            pre.insert(l.clone(), analyzer.get_pre(l));
        }
        self.invariants.insert(name.to_string(), pre);
    }

    /// Pre-state invariants of a function's blocks, once analyzed.
    pub fn invariants(&self, func: &str) -> Option<&FxHashMap<String, D>> {
        self.invariants.get(func)
    }
}
