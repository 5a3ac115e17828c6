//! Abstract interpretation over control-flow graphs.
//!
//! This crate computes sound, flow-sensitive invariants for a
//! three-address imperative IR. A family of abstract domains shares one
//! lattice interface ([`AbstractDomain`] and its numerical extension
//! [`NumericalDomain`]), and a forward fixpoint engine propagates facts
//! over the CFG in weak topological order until a post-fixpoint is
//! reached.
//!
//! # Domains
//!
//! * [`IntervalEnv`] — classical boxes, one interval per variable.
//! * [`DisIntervalEnv`] — bounded disjunctions of intervals.
//! * [`Dbm`] — difference bounds (`x - y <= c`) with shortest-path
//!   closure.
//! * [`ArraySmashing`] — every array folded into one summarized cell,
//!   over any numerical base domain.
//! * [`ArrayGraphDomain`] — relational array contents over a partial
//!   order of index variables.
//! * [`NullityEnv`] — a flat four-point lattice per pointer variable.
//!
//! # Analyses
//!
//! * [`FwdAnalyzer`] — WTO-based forward fixpoint with configurable
//!   widening delay, descending iterations and widening thresholds
//!   ([`FixpointParams`]).
//! * [`Liveness`] — backward kill/gen dataflow feeding dead-variable
//!   pruning into the forward analyzers.
//! * [`InterFwdAnalyzer`] — bottom-up interprocedural analysis over
//!   function summaries.
//! * [`PtaSystem`] — position-sensitive pointer analysis with
//!   interval-valued offsets.
//!
//! # Example
//!
//! ```
//! use absint::{Cfg, FixpointParams, FwdAnalyzer, IntervalEnv, LinearExpr};
//! use absint::{AbstractDomain, NumericalDomain};
//!
//! // i := 0; while (i <= 99) { i := i + 1 }
//! let mut cfg = Cfg::new("entry", "ret");
//! cfg.insert("entry").assign("i", 0);
//! cfg.insert("head");
//! cfg.insert("body").assume(LinearExpr::var("i").le(99));
//! cfg.insert("body").assign("i", LinearExpr::var("i").add_const(1));
//! cfg.insert("ret").assume(LinearExpr::var("i").ge(100));
//! cfg.add_edge("entry", "head");
//! cfg.add_edge("head", "body");
//! cfg.add_edge("body", "head");
//! cfg.add_edge("head", "ret");
//!
//! let mut analyzer: FwdAnalyzer<IntervalEnv> =
//!     FwdAnalyzer::new(&cfg, None, FixpointParams::default());
//! analyzer.run(IntervalEnv::top());
//!
//! let at_head = analyzer.get_pre(&"head".to_string());
//! assert_eq!(at_head.get(&"i".to_string()).to_string(), "[0, 100]");
//! ```

pub mod analyzer;
pub mod array_graph;
pub mod array_smashing;
pub mod bound;
pub mod cfg;
pub mod dbm;
pub mod disjunctive;
pub mod domain;
pub mod expr;
pub mod fixpoint;
pub mod graph;
pub mod inter;
pub mod interval;
pub mod liveness;
pub mod nullity;
pub mod pointsto;
pub mod separate;
pub mod solver;
pub mod transformer;
pub mod wto;

// Re-exports for convenience
pub use analyzer::{FwdAnalyzer, NullityAnalyzer};
pub use array_graph::{ArrayGraph, ArrayGraphDomain};
pub use array_smashing::ArraySmashing;
pub use bound::Bound;
pub use cfg::{BasicBlock, Cfg, FunctionDecl, Label, Operand, Statement, VarType};
pub use dbm::Dbm;
pub use disjunctive::{DisInterval, DisIntervalEnv};
pub use domain::{AbstractDomain, ArrayDomain, NumericalDomain};
pub use expr::{ConstraintKind, LinearConstraint, LinearExpr, Op, Var};
pub use fixpoint::{BlockTransfer, FixpointParams, FwdFixpointIterator};
pub use graph::{DirectedGraph, FlowGraph, SccGraph};
pub use inter::{CallCtxTable, CallGraph, InterFwdAnalyzer, Summary, SummaryTable};
pub use interval::Interval;
pub use liveness::{Liveness, VarSet};
pub use nullity::{NullityEnv, NullityValue};
pub use pointsto::{
    AddressSet, ObjectId, PointerConstraintGen, PointerVar, PtaConstraint, PtaInfo, PtaRef,
    PtaSystem,
};
pub use separate::{Env, IntervalEnv, NumValue};
pub use transformer::{NullityAbsTransformer, NumAbsTransformer, StatementVisitor};
pub use wto::{Wto, WtoComponent, WtoCycle};
