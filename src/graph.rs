//! Graph iteration interfaces and the SCC condensation.
//!
//! The analyses address a CFG (or a call graph) only through these
//! traits. `SccGraph` computes Tarjan's strongly connected components
//! with `petgraph`, builds the condensation, and enumerates it in
//! topological or reverse-topological order; members keep a stable order
//! inside each component.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use rustc_hash::FxHashMap;

/// Directed graph addressed by opaque node ids.
pub trait DirectedGraph {
    type NodeId: Clone + Eq + Ord + Hash + Debug;

    fn nodes(&self) -> Vec<Self::NodeId>;
    fn succs(&self, n: &Self::NodeId) -> Vec<Self::NodeId>;
    fn preds(&self, n: &Self::NodeId) -> Vec<Self::NodeId>;
}

/// A directed graph with a distinguished entry node.
pub trait FlowGraph: DirectedGraph {
    fn entry(&self) -> Self::NodeId;
}

/// Condensation of a directed graph into strongly connected components.
#[derive(Debug)]
pub struct SccGraph<N> {
    // stored in reverse topological order, as produced by Tarjan
    components: Vec<Vec<N>>,
    comp_of: FxHashMap<N, usize>,
    succs: Vec<BTreeSet<usize>>,
    preds: Vec<BTreeSet<usize>>,
    recursive: Vec<bool>,
}

impl<N: Clone + Eq + Ord + Hash + Debug> SccGraph<N> {
    pub fn build<G: DirectedGraph<NodeId = N>>(g: &G) -> Self {
        let mut pg: DiGraph<N, ()> = DiGraph::new();
        let mut idx: FxHashMap<N, NodeIndex> = FxHashMap::default();
        for n in g.nodes() {
            let i = pg.add_node(n.clone());
            idx.insert(n, i);
        }
        for n in g.nodes() {
            for s in g.succs(&n) {
                pg.add_edge(idx[&n], idx[&s], ());
            }
        }

        let sccs = tarjan_scc(&pg);
        let mut components = Vec::with_capacity(sccs.len());
        let mut comp_of = FxHashMap::default();
        for (c, scc) in sccs.iter().enumerate() {
            let mut members: Vec<N> = scc.iter().map(|&i| pg[i].clone()).collect();
            members.sort();
            for m in &members {
                comp_of.insert(m.clone(), c);
            }
            components.push(members);
        }

        let k = components.len();
        let mut succs = vec![BTreeSet::new(); k];
        let mut preds = vec![BTreeSet::new(); k];
        let mut recursive = vec![false; k];
        for (c, members) in components.iter().enumerate() {
            for m in members {
                for s in g.succs(m) {
                    let cs = comp_of[&s];
                    if cs == c {
                        recursive[c] = true;
                    } else {
                        succs[c].insert(cs);
                        preds[cs].insert(c);
                    }
                }
            }
            if members.len() > 1 {
                recursive[c] = true;
            }
        }

        SccGraph {
            components,
            comp_of,
            succs,
            preds,
            recursive,
        }
    }

    pub fn num_components(&self) -> usize {
        self.components.len()
    }

    pub fn members(&self, c: usize) -> &[N] {
        &self.components[c]
    }

    pub fn component_of(&self, n: &N) -> usize {
        self.comp_of[n]
    }

    /// Whether the component is a genuine cycle (more than one member, or
    /// a self edge).
    pub fn is_recursive(&self, c: usize) -> bool {
        self.recursive[c]
    }

    pub fn comp_succs(&self, c: usize) -> impl Iterator<Item = usize> + '_ {
        self.succs[c].iter().copied()
    }

    pub fn comp_preds(&self, c: usize) -> impl Iterator<Item = usize> + '_ {
        self.preds[c].iter().copied()
    }

    /// Component ids with every component before its predecessors
    /// (successors first).
    pub fn rev_topo_order(&self) -> Vec<usize> {
        (0..self.components.len()).collect()
    }

    /// Component ids with every component before its successors.
    pub fn topo_order(&self) -> Vec<usize> {
        (0..self.components.len()).rev().collect()
    }

    /// Node enumeration following the reverse topological component
    /// order, members in their stable internal order.
    pub fn rev_topo_nodes(&self) -> Vec<N> {
        self.rev_topo_order()
            .into_iter()
            .flat_map(|c| self.components[c].iter().cloned())
            .collect()
    }
}
