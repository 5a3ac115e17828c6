//! Live-variable analysis.
//!
//! Classical backward kill/gen dataflow. Kill and gen sets are
//! precomputed per block by walking statements in reverse; the fixpoint
//! iterates blocks in reverse topological order of the SCC condensation,
//! looping inside each component until stable. The analysis keeps only
//! the per-block dead-at-exit sets; the in/out working maps are released
//! when construction finishes.

use std::collections::BTreeSet;
use std::fmt;

use log::debug;
use rustc_hash::FxHashMap;

use crate::cfg::{Cfg, Label};
use crate::expr::Var;
use crate::graph::{DirectedGraph, SccGraph};

/// Discrete set lattice over variables: finite sets ordered by inclusion,
/// with a distinguished top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VarSet {
    Top,
    Set(BTreeSet<Var>),
}

impl VarSet {
    pub fn empty() -> Self {
        VarSet::Set(BTreeSet::new())
    }

    pub fn from_iter<I: IntoIterator<Item = Var>>(vars: I) -> Self {
        VarSet::Set(vars.into_iter().collect())
    }

    pub fn is_top(&self) -> bool {
        matches!(self, VarSet::Top)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, VarSet::Set(s) if s.is_empty())
    }

    pub fn len(&self) -> usize {
        match self {
            VarSet::Top => panic!("size of the top variable set is undefined"),
            VarSet::Set(s) => s.len(),
        }
    }

    pub fn contains(&self, v: &Var) -> bool {
        match self {
            VarSet::Top => true,
            VarSet::Set(s) => s.contains(v),
        }
    }

    pub fn insert(&mut self, v: Var) {
        if let VarSet::Set(s) = self {
            s.insert(v);
        }
    }

    pub fn remove(&mut self, v: &Var) {
        match self {
            VarSet::Top => panic!("set difference undefined when the first operand is top"),
            VarSet::Set(s) => {
                s.remove(v);
            }
        }
    }

    pub fn union(&self, other: &VarSet) -> VarSet {
        match (self, other) {
            (VarSet::Top, _) | (_, VarSet::Top) => VarSet::Top,
            (VarSet::Set(a), VarSet::Set(b)) => VarSet::Set(a.union(b).cloned().collect()),
        }
    }

    pub fn intersect(&self, other: &VarSet) -> VarSet {
        match (self, other) {
            (VarSet::Top, o) => o.clone(),
            (s, VarSet::Top) => s.clone(),
            (VarSet::Set(a), VarSet::Set(b)) => {
                VarSet::Set(a.intersection(b).cloned().collect())
            }
        }
    }

    /// Set difference. The first operand must not be top.
    pub fn minus(&self, other: &VarSet) -> VarSet {
        match (self, other) {
            (VarSet::Top, _) => {
                panic!("set difference undefined when the first operand is top")
            }
            (_, VarSet::Top) => VarSet::empty(),
            (VarSet::Set(a), VarSet::Set(b)) => {
                VarSet::Set(a.difference(b).cloned().collect())
            }
        }
    }

    pub fn leq(&self, other: &VarSet) -> bool {
        match (self, other) {
            (_, VarSet::Top) => true,
            (VarSet::Top, _) => false,
            (VarSet::Set(a), VarSet::Set(b)) => a.is_subset(b),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Var> {
        match self {
            VarSet::Top => panic!("cannot enumerate the top variable set"),
            VarSet::Set(s) => s.iter(),
        }
    }
}

impl fmt::Display for VarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarSet::Top => write!(f, "{{...}}"),
            VarSet::Set(s) => {
                write!(f, "{{")?;
                let mut it = s.iter().peekable();
                while let Some(v) = it.next() {
                    write!(f, "{}", v)?;
                    if it.peek().is_some() {
                        write!(f, "; ")?;
                    }
                }
                write!(f, "}}")
            }
        }
    }
}

/// Live-variable analysis over one CFG.
pub struct Liveness {
    dead_map: FxHashMap<Label, VarSet>,
    max_live: usize,
    total_live: usize,
    total_blocks: usize,
}

impl Liveness {
    /// Run the analysis. The in/out maps live only inside this function;
    /// the result keeps the dead-at-exit sets.
    pub fn new(cfg: &Cfg) -> Self {
        // kill = defs, gen = upward-exposed uses, per block in reverse
        let mut kill_gen: FxHashMap<Label, (VarSet, VarSet)> = FxHashMap::default();
        for b in cfg.blocks() {
            let mut kill = VarSet::empty();
            let mut gen = VarSet::empty();
            for st in b.statements().iter().rev() {
                for d in st.defs() {
                    kill.insert(d.clone());
                    gen.remove(&d);
                }
                for u in st.uses() {
                    gen.insert(u);
                }
            }
            kill_gen.insert(b.label().clone(), (kill, gen));
        }

        let scc = SccGraph::build(cfg);
        let order = scc.rev_topo_nodes();
        debug!("liveness fixpoint ordering: {:?}", order);

        let mut in_map: FxHashMap<Label, VarSet> = FxHashMap::default();
        let mut out_map: FxHashMap<Label, VarSet> = FxHashMap::default();
        let mut changed = true;
        let mut iterations = 0;
        while changed {
            changed = false;
            iterations += 1;
            for n in &order {
                let mut out = VarSet::empty();
                for s in cfg.succs(n) {
                    if let Some(live_in) = in_map.get(&s) {
                        out = out.union(live_in);
                    }
                }
                let (kill, gen) = &kill_gen[n];
                let live_in = out.minus(kill).union(gen);
                let old_in = in_map.get(n).cloned().unwrap_or_else(VarSet::empty);
                if !live_in.leq(&old_in) {
                    in_map.insert(n.clone(), live_in.union(&old_in));
                    changed = true;
                }
                out_map.insert(n.clone(), out);
            }
        }
        debug!("liveness fixpoint reached in {} iterations", iterations);

        let mut live = Liveness {
            dead_map: FxHashMap::default(),
            max_live: 0,
            total_live: 0,
            total_blocks: 0,
        };
        for b in cfg.blocks() {
            let out = out_map
                .get(b.label())
                .cloned()
                .unwrap_or_else(VarSet::empty);
            if out.is_empty() {
                continue;
            }
            let dead = VarSet::from_iter(b.variables()).minus(&out);
            live.total_live += out.len();
            live.max_live = live.max_live.max(out.len());
            live.total_blocks += 1;
            live.dead_map.insert(b.label().clone(), dead);
        }
        live
    }

    /// Variables dead at the exit of `label`; empty for unknown labels.
    pub fn dead_exit(&self, label: &Label) -> VarSet {
        self.dead_map
            .get(label)
            .cloned()
            .unwrap_or_else(VarSet::empty)
    }

    /// (total live, max live per block, average live per block)
    pub fn stats(&self) -> (usize, usize, usize) {
        let avg = if self.total_blocks == 0 {
            0
        } else {
            self.total_live / self.total_blocks
        };
        (self.total_live, self.max_live, avg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::LinearExpr;

    #[test]
    fn test_varset_lattice() {
        let a = VarSet::from_iter(["x".to_string(), "y".to_string()]);
        let b = VarSet::from_iter(["y".to_string(), "z".to_string()]);
        assert_eq!(
            a.union(&b),
            VarSet::from_iter(["x".to_string(), "y".to_string(), "z".to_string()])
        );
        assert_eq!(a.intersect(&b), VarSet::from_iter(["y".to_string()]));
        assert_eq!(a.minus(&b), VarSet::from_iter(["x".to_string()]));
        assert!(VarSet::empty().leq(&a));
        assert!(a.leq(&VarSet::Top));
    }

    #[test]
    #[should_panic(expected = "set difference undefined")]
    fn test_difference_from_top_is_an_error() {
        let _ = VarSet::Top.minus(&VarSet::empty());
    }

    #[test]
    fn test_dead_at_exit() {
        // entry: x := 1; y := 2  |  use: z := x  (y never used again)
        let mut cfg = Cfg::new("entry", "use");
        cfg.insert("entry").assign("x", 1);
        cfg.insert("entry").assign("y", 2);
        cfg.insert("use")
            .assign("z", LinearExpr::var("x"));
        cfg.add_edge("entry", "use");

        let live = Liveness::new(&cfg);
        let dead = live.dead_exit(&"entry".to_string());
        assert!(dead.contains(&"y".to_string()));
        assert!(!dead.contains(&"x".to_string()));
    }

    #[test]
    fn test_loop_keeps_counter_live() {
        let mut cfg = Cfg::new("entry", "ret");
        cfg.insert("entry").assign("i", 0);
        cfg.insert("entry").assign("dead", 7);
        cfg.insert("head");
        cfg.insert("body").assume(LinearExpr::var("i").le(9));
        cfg.insert("body")
            .assign("i", LinearExpr::var("i").add_const(1));
        cfg.insert("ret").assume(LinearExpr::var("i").ge(10));
        cfg.add_edge("entry", "head");
        cfg.add_edge("head", "body");
        cfg.add_edge("body", "head");
        cfg.add_edge("head", "ret");

        let live = Liveness::new(&cfg);
        let dead_entry = live.dead_exit(&"entry".to_string());
        assert!(dead_entry.contains(&"dead".to_string()));
        assert!(!dead_entry.contains(&"i".to_string()));
        // inside the loop the counter stays live
        assert!(!live.dead_exit(&"body".to_string()).contains(&"i".to_string()));
    }
}
