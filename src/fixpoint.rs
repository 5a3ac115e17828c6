//! Interleaved forward fixpoint iteration over a weak topological order.
//!
//! Blocks outside any cycle are visited once in order. Each cycle is
//! stabilized around its head: ascending iterations join the incoming
//! states until the widening delay runs out, then widen (optionally
//! against a jump set of thresholds) until the head's pre-state stops
//! growing; a bounded descending phase then narrows the result back
//! down. Invariant-map writes are monotone during ascent and only refine
//! during descent.

use log::debug;
use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::domain::AbstractDomain;
use crate::graph::FlowGraph;
use crate::wto::{Wto, WtoComponent, WtoCycle};

/// Tuning knobs of the fixpoint iteration.
#[derive(Debug, Clone)]
pub struct FixpointParams {
    /// Ascending iterations that join before widening kicks in.
    pub widening_delay: u32,
    /// Cap on descending (narrowing) rounds per cycle; `None` iterates
    /// until the narrowing sequence stabilizes.
    pub descending_iters: Option<u32>,
    /// Maximum number of widening thresholds harvested from the program.
    /// Zero disables widening with thresholds.
    pub jump_set_size: usize,
}

impl Default for FixpointParams {
    fn default() -> Self {
        FixpointParams {
            widening_delay: 1,
            descending_iters: None,
            jump_set_size: 0,
        }
    }
}

/// Per-block abstract semantics, handed to the iterator.
///
/// `analyze` turns a block's pre-state into its post-state in place.
/// The `process_*` hooks observe the settled states.
pub trait BlockTransfer<L, D> {
    fn analyze(&mut self, label: &L, state: &mut D);

    fn process_pre(&mut self, _label: &L, _state: &D) {}

    fn process_post(&mut self, _label: &L, _state: &D) {}
}

/// WTO-based forward fixpoint iterator.
pub struct FwdFixpointIterator<'g, G: FlowGraph, D, T> {
    graph: &'g G,
    transfer: T,
    params: FixpointParams,
    thresholds: Vec<BigInt>,
    pre: FxHashMap<G::NodeId, D>,
    post: FxHashMap<G::NodeId, D>,
}

impl<'g, G, D, T> FwdFixpointIterator<'g, G, D, T>
where
    G: FlowGraph,
    D: AbstractDomain,
    T: BlockTransfer<G::NodeId, D>,
{
    pub fn new(graph: &'g G, transfer: T, params: FixpointParams) -> Self {
        FwdFixpointIterator {
            graph,
            transfer,
            params,
            thresholds: Vec::new(),
            pre: FxHashMap::default(),
            post: FxHashMap::default(),
        }
    }

    /// Install the jump set used by widening with thresholds.
    ///
    /// An oversized set is thinned to an evenly spaced selection that
    /// keeps the smallest and largest thresholds: a loop bounded by the
    /// largest guard constant must still find it in the jump set.
    pub fn with_thresholds(mut self, mut thresholds: Vec<BigInt>) -> Self {
        thresholds.sort();
        thresholds.dedup();
        let cap = self.params.jump_set_size;
        if cap > 0 && thresholds.len() > cap {
            let last = thresholds.len() - 1;
            let mut picked: Vec<BigInt> = if cap == 1 {
                vec![thresholds[last].clone()]
            } else {
                (0..cap)
                    .map(|k| thresholds[k * last / (cap - 1)].clone())
                    .collect()
            };
            picked.dedup();
            thresholds = picked;
        }
        self.thresholds = thresholds;
        self
    }

    /// Run the iteration from the given entry state.
    pub fn run(&mut self, seed: D) {
        let wto = Wto::build(self.graph);
        debug!("fixpoint over wto: {:?}", wto);
        for comp in wto.components() {
            self.visit_component(comp, &seed);
        }
    }

    /// Invariant holding at the entry of a block; top for unknown labels.
    pub fn get_pre(&self, label: &G::NodeId) -> D {
        self.pre.get(label).cloned().unwrap_or_else(D::top)
    }

    /// Invariant holding at the exit of a block; top for unknown labels.
    pub fn get_post(&self, label: &G::NodeId) -> D {
        self.post.get(label).cloned().unwrap_or_else(D::top)
    }

    pub fn transfer(&self) -> &T {
        &self.transfer
    }

    /// Release the transformer and both invariant maps.
    pub fn into_parts(self) -> (T, FxHashMap<G::NodeId, D>, FxHashMap<G::NodeId, D>) {
        (self.transfer, self.pre, self.post)
    }

    fn post_or_bottom(&self, label: &G::NodeId) -> D {
        self.post.get(label).cloned().unwrap_or_else(D::bottom)
    }

    // Join of the predecessors' post-states; the entry also joins the seed.
    fn compute_pre(&self, v: &G::NodeId, seed: &D) -> D {
        let mut pre = if *v == self.graph.entry() {
            seed.clone()
        } else {
            D::bottom()
        };
        for p in self.graph.preds(v) {
            pre = pre.join(&self.post_or_bottom(&p));
        }
        pre
    }

    fn visit_component(&mut self, comp: &WtoComponent<G::NodeId>, seed: &D) {
        match comp {
            WtoComponent::Vertex(v) => self.visit_vertex(v, seed),
            WtoComponent::Cycle(c) => self.visit_cycle(c, seed),
        }
    }

    fn visit_vertex(&mut self, v: &G::NodeId, seed: &D) {
        let mut state = self.compute_pre(v, seed);
        self.transfer.process_pre(v, &state);
        self.pre.insert(v.clone(), state.clone());
        self.transfer.analyze(v, &mut state);
        self.transfer.process_post(v, &state);
        self.post.insert(v.clone(), state);
    }

    fn propagate_through(&mut self, cycle: &WtoCycle<G::NodeId>, head_pre: &D, seed: &D) {
        self.pre.insert(cycle.head().clone(), head_pre.clone());
        let mut post = head_pre.clone();
        self.transfer.analyze(cycle.head(), &mut post);
        self.post.insert(cycle.head().clone(), post);
        for comp in cycle.components() {
            self.visit_component(comp, seed);
        }
    }

    fn visit_cycle(&mut self, cycle: &WtoCycle<G::NodeId>, seed: &D) {
        let head = cycle.head();
        let mut pre = self.compute_pre(head, seed);

        // ascending phase: join for the delay, then widen to convergence
        let mut iteration: u32 = 0;
        loop {
            self.propagate_through(cycle, &pre, seed);
            let new_pre = self.compute_pre(head, seed);
            if new_pre.leq(&pre) {
                break;
            }
            iteration += 1;
            pre = if iteration <= self.params.widening_delay {
                pre.join(&new_pre)
            } else if self.thresholds.is_empty() {
                pre.widen(&new_pre)
            } else {
                pre.widen_with_thresholds(&new_pre, &self.thresholds)
            };
        }
        debug!(
            "cycle at {:?} stabilized after {} ascending iterations",
            head, iteration
        );

        // descending phase: narrow until a fixed point or the cap
        let mut rounds: u32 = 0;
        loop {
            if let Some(cap) = self.params.descending_iters {
                if rounds >= cap {
                    break;
                }
            }
            let new_pre = self.compute_pre(head, seed);
            let refined = pre.narrow(&new_pre);
            if pre.leq(&refined) {
                break;
            }
            pre = refined;
            self.propagate_through(cycle, &pre, seed);
            rounds += 1;
        }
        debug!(
            "cycle at {:?} refined by {} descending iterations",
            head, rounds
        );

        self.transfer.process_pre(head, &pre);
        let post = self.post_or_bottom(head);
        self.transfer.process_post(head, &post);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::{Cfg, Label};
    use crate::domain::NumericalDomain;
    use crate::expr::LinearExpr;
    use crate::interval::Interval;
    use crate::separate::IntervalEnv;

    // Minimal transfer used to exercise the iterator without the full
    // statement dispatcher.
    struct CountingLoop<'c> {
        cfg: &'c Cfg,
    }

    impl<'c> BlockTransfer<Label, IntervalEnv> for CountingLoop<'c> {
        fn analyze(&mut self, label: &Label, state: &mut IntervalEnv) {
            for st in self.cfg.block(label).statements() {
                match st {
                    crate::cfg::Statement::Assign { lhs, rhs } => state.assign(lhs, rhs),
                    crate::cfg::Statement::Assume(c) => {
                        state.add_constraints(std::slice::from_ref(c))
                    }
                    _ => {}
                }
            }
        }
    }

    fn counting_cfg() -> Cfg {
        // i := 0; while (i <= 99) i := i + 1
        let mut cfg = Cfg::new("entry", "ret");
        cfg.insert("entry").assign("i", 0);
        cfg.insert("head");
        cfg.insert("body").assume(LinearExpr::var("i").le(99));
        cfg.insert("body")
            .assign("i", LinearExpr::var("i").add_const(1));
        cfg.insert("ret").assume(LinearExpr::var("i").ge(100));
        cfg.add_edge("entry", "head");
        cfg.add_edge("head", "body");
        cfg.add_edge("body", "head");
        cfg.add_edge("head", "ret");
        cfg
    }

    #[test]
    fn test_loop_invariant_with_narrowing() {
        let cfg = counting_cfg();
        let transfer = CountingLoop { cfg: &cfg };
        let mut it = FwdFixpointIterator::new(&cfg, transfer, FixpointParams::default());
        it.run(IntervalEnv::top());

        let i = "i".to_string();
        assert_eq!(it.get_pre(&"head".to_string()).get(&i), Interval::range(0, 100));
        assert_eq!(it.get_pre(&"ret".to_string()).get(&i), Interval::range(0, 100));
        assert_eq!(it.get_post(&"ret".to_string()).get(&i), Interval::constant(100));
    }

    #[test]
    fn test_post_fixpoint_property() {
        let cfg = counting_cfg();
        let transfer = CountingLoop { cfg: &cfg };
        let mut it = FwdFixpointIterator::new(&cfg, transfer, FixpointParams::default());
        it.run(IntervalEnv::top());

        // join of predecessors' posts is below every block's pre
        for b in cfg.blocks() {
            let mut joined = IntervalEnv::bottom();
            for p in b.preds() {
                joined = joined.join(&it.get_post(p));
            }
            if b.label() != "entry" {
                assert!(joined.leq(&it.get_pre(b.label())));
            }
        }
    }

    #[test]
    fn test_larger_delay_is_at_least_as_precise() {
        let cfg = counting_cfg();
        let run = |delay: u32| {
            let transfer = CountingLoop { cfg: &cfg };
            let params = FixpointParams {
                widening_delay: delay,
                ..Default::default()
            };
            let mut it = FwdFixpointIterator::new(&cfg, transfer, params);
            it.run(IntervalEnv::top());
            it.get_pre(&"head".to_string())
        };
        let d1 = run(1);
        let d2 = run(2);
        assert!(d2.leq(&d1));
    }

    #[test]
    fn test_unknown_label_is_top() {
        let cfg = counting_cfg();
        let transfer = CountingLoop { cfg: &cfg };
        let it = FwdFixpointIterator::new(&cfg, transfer, FixpointParams::default());
        assert!(it.get_pre(&"nowhere".to_string()).is_top());
    }
}
