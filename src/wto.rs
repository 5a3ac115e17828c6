//! Weak topological ordering of a flow graph.
//!
//! Bourdoncle's recursive-strategy construction: vertices outside any
//! cycle appear as plain elements; each strongly connected subgraph
//! becomes a component with a designated head and a nested ordering of
//! its body. The fixpoint iterator stabilizes each component around its
//! head, innermost components first.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::graph::FlowGraph;

/// One element of a weak topological order.
#[derive(Debug, Clone)]
pub enum WtoComponent<L> {
    Vertex(L),
    Cycle(WtoCycle<L>),
}

/// A cycle: the head vertex plus the nested ordering of the body.
#[derive(Debug, Clone)]
pub struct WtoCycle<L> {
    head: L,
    components: Vec<WtoComponent<L>>,
}

impl<L> WtoCycle<L> {
    pub fn head(&self) -> &L {
        &self.head
    }

    pub fn components(&self) -> &[WtoComponent<L>] {
        &self.components
    }
}

/// Weak topological order over the nodes of a flow graph.
#[derive(Debug, Clone)]
pub struct Wto<L> {
    components: Vec<WtoComponent<L>>,
}

impl<L: Clone + Eq + Ord + std::hash::Hash + std::fmt::Debug> Wto<L> {
    pub fn build<G: FlowGraph<NodeId = L>>(graph: &G) -> Self {
        let mut builder = Builder {
            graph,
            dfn: FxHashMap::default(),
            stack: Vec::new(),
            num: 0,
        };
        let mut components = Vec::new();
        builder.visit(&graph.entry(), &mut components);
        Wto { components }
    }

    pub fn components(&self) -> &[WtoComponent<L>] {
        &self.components
    }
}

const UNVISITED: u64 = 0;
const DONE: u64 = u64::MAX;

struct Builder<'g, G: FlowGraph> {
    graph: &'g G,
    dfn: FxHashMap<G::NodeId, u64>,
    stack: Vec<G::NodeId>,
    num: u64,
}

impl<'g, G: FlowGraph> Builder<'g, G> {
    fn dfn(&self, v: &G::NodeId) -> u64 {
        self.dfn.get(v).copied().unwrap_or(UNVISITED)
    }

    fn visit(&mut self, v: &G::NodeId, partition: &mut Vec<WtoComponent<G::NodeId>>) -> u64 {
        self.stack.push(v.clone());
        self.num += 1;
        self.dfn.insert(v.clone(), self.num);
        let mut head = self.num;
        let mut in_loop = false;

        for succ in self.graph.succs(v) {
            let min = match self.dfn(&succ) {
                UNVISITED => self.visit(&succ, partition),
                n => n,
            };
            if min <= head {
                head = min;
                in_loop = true;
            }
        }

        if head == self.dfn[v] {
            self.dfn.insert(v.clone(), DONE);
            let mut element = self.stack.pop().expect("dfs stack underflow");
            if in_loop {
                while element != *v {
                    self.dfn.insert(element, UNVISITED);
                    element = self.stack.pop().expect("dfs stack underflow");
                }
                let cycle = self.component(v);
                partition.insert(0, WtoComponent::Cycle(cycle));
            } else {
                partition.insert(0, WtoComponent::Vertex(v.clone()));
            }
        }
        head
    }

    fn component(&mut self, head: &G::NodeId) -> WtoCycle<G::NodeId> {
        let mut components = Vec::new();
        for succ in self.graph.succs(head) {
            if self.dfn(&succ) == UNVISITED {
                self.visit(&succ, &mut components);
            }
        }
        WtoCycle {
            head: head.clone(),
            components,
        }
    }
}

impl<L: fmt::Display> fmt::Display for WtoComponent<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WtoComponent::Vertex(l) => write!(f, "{}", l),
            WtoComponent::Cycle(c) => {
                write!(f, "({}", c.head)?;
                for comp in &c.components {
                    write!(f, " {}", comp)?;
                }
                write!(f, ")")
            }
        }
    }
}

impl<L: fmt::Display> fmt::Display for Wto<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut it = self.components.iter().peekable();
        while let Some(comp) = it.next() {
            write!(f, "{}", comp)?;
            if it.peek().is_some() {
                write!(f, " ")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::Cfg;

    fn wto_string(cfg: &Cfg) -> String {
        Wto::build(cfg).to_string()
    }

    #[test]
    fn test_straight_line() {
        let mut cfg = Cfg::new("a", "c");
        cfg.add_edge("a", "b");
        cfg.add_edge("b", "c");
        assert_eq!(wto_string(&cfg), "a b c");
    }

    #[test]
    fn test_single_loop() {
        let mut cfg = Cfg::new("entry", "ret");
        cfg.add_edge("entry", "head");
        cfg.add_edge("head", "body");
        cfg.add_edge("body", "head");
        cfg.add_edge("head", "ret");
        assert_eq!(wto_string(&cfg), "entry (head body) ret");
    }

    #[test]
    fn test_nested_loops() {
        // entry -> h1 -> h2 -> b2 -> h2, h2 -> t1 -> h1, h1 -> ret
        let mut cfg = Cfg::new("entry", "ret");
        cfg.add_edge("entry", "h1");
        cfg.add_edge("h1", "h2");
        cfg.add_edge("h2", "b2");
        cfg.add_edge("b2", "h2");
        cfg.add_edge("h2", "t1");
        cfg.add_edge("t1", "h1");
        cfg.add_edge("h1", "ret");
        assert_eq!(wto_string(&cfg), "entry (h1 (h2 b2) t1) ret");
    }
}
