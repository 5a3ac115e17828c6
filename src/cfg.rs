//! Control-flow graph of a three-address imperative IR.
//!
//! A CFG is a directed graph of basic blocks with a distinguished entry
//! and an optional exit. Each block carries an ordered statement sequence;
//! the statement kinds form a closed set and every statement exposes its
//! defined and used variable sets for the dataflow analyses. The CFG is
//! built once by a front-end (or a test) and is immutable while a
//! fixpoint runs over it.

use std::collections::BTreeSet;
use std::fmt;

use num_bigint::BigInt;
use rustc_hash::FxHashMap;

use crate::expr::{LinearConstraint, LinearExpr, Op, Var};
use crate::graph::{DirectedGraph, FlowGraph};
use crate::interval::Interval;

/// Basic-block label.
pub type Label = String;

/// Static type of a variable, as declared by the front-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarType {
    Int,
    Ptr,
    Array,
}

/// Function signature attached to a CFG and referenced by call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<(Var, VarType)>,
    pub ret_ty: VarType,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>, params: Vec<(Var, VarType)>, ret_ty: VarType) -> Self {
        FunctionDecl {
            name: name.into(),
            params,
            ret_ty,
        }
    }

    pub fn param_names(&self) -> Vec<Var> {
        self.params.iter().map(|(v, _)| v.clone()).collect()
    }
}

/// Right operand of a binary operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Var(Var),
    Const(BigInt),
}

impl From<&str> for Operand {
    fn from(v: &str) -> Self {
        Operand::Var(v.to_string())
    }
}

impl From<Var> for Operand {
    fn from(v: Var) -> Self {
        Operand::Var(v)
    }
}

impl From<i32> for Operand {
    fn from(k: i32) -> Self {
        Operand::Const(BigInt::from(k))
    }
}

impl From<i64> for Operand {
    fn from(k: i64) -> Self {
        Operand::Const(BigInt::from(k))
    }
}

impl From<BigInt> for Operand {
    fn from(k: BigInt) -> Self {
        Operand::Const(k)
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Var(v) => write!(f, "{}", v),
            Operand::Const(k) => write!(f, "{}", k),
        }
    }
}

/// The closed set of statement kinds.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `lhs := left op right`
    BinOp {
        op: Op,
        lhs: Var,
        left: Var,
        right: Operand,
    },
    /// `lhs := e`
    Assign { lhs: Var, rhs: LinearExpr },
    /// Refine the state with a linear constraint.
    Assume(LinearConstraint),
    /// Forget everything about a variable.
    Havoc(Var),
    /// The program point is infeasible.
    Unreachable,
    /// `lhs := cond ? on_true : on_false`
    Select {
        lhs: Var,
        cond: LinearConstraint,
        on_true: LinearExpr,
        on_false: LinearExpr,
    },
    /// Function signature marker (also carried by the CFG itself).
    FuncDecl(FunctionDecl),
    /// `lhs := func(args)`
    CallSite {
        lhs: Option<(Var, VarType)>,
        func: String,
        args: Vec<(Var, VarType)>,
    },
    /// `return var`
    Return { var: Var, ty: VarType },
    /// `arr := {v1, ..., vn}`
    ArrayInit { arr: Var, values: Vec<BigInt> },
    /// `lhs := arr[idx]`
    ArrayLoad { lhs: Var, arr: Var, idx: Var },
    /// `arr[idx] := val`
    ArrayStore {
        arr: Var,
        idx: Var,
        val: LinearExpr,
        is_singleton: bool,
    },
    /// `lhs := new(object)`
    PtrNew { lhs: Var, object: u64 },
    /// `lhs := rhs + offset`
    PtrAssign { lhs: Var, rhs: Var, offset: BigInt },
    /// `lhs := *rhs`, accessing the given offset range
    PtrLoad { lhs: Var, rhs: Var, range: Interval },
    /// `*lhs := rhs`, accessing the given offset range
    PtrStore { lhs: Var, rhs: Var, range: Interval },
}

impl Statement {
    /// Variables written by the statement.
    pub fn defs(&self) -> BTreeSet<Var> {
        let mut s = BTreeSet::new();
        match self {
            Statement::BinOp { lhs, .. }
            | Statement::Assign { lhs, .. }
            | Statement::Select { lhs, .. }
            | Statement::ArrayLoad { lhs, .. }
            | Statement::PtrNew { lhs, .. }
            | Statement::PtrAssign { lhs, .. }
            | Statement::PtrLoad { lhs, .. } => {
                s.insert(lhs.clone());
            }
            Statement::Havoc(v) => {
                s.insert(v.clone());
            }
            Statement::FuncDecl(decl) => {
                s.extend(decl.param_names());
            }
            Statement::CallSite { lhs, .. } => {
                if let Some((v, _)) = lhs {
                    s.insert(v.clone());
                }
            }
            Statement::ArrayInit { arr, .. } | Statement::ArrayStore { arr, .. } => {
                s.insert(arr.clone());
            }
            Statement::Assume(_)
            | Statement::Unreachable
            | Statement::Return { .. }
            | Statement::PtrStore { .. } => {}
        }
        s
    }

    /// Variables read by the statement.
    pub fn uses(&self) -> BTreeSet<Var> {
        let mut s = BTreeSet::new();
        match self {
            Statement::BinOp { left, right, .. } => {
                s.insert(left.clone());
                if let Operand::Var(v) = right {
                    s.insert(v.clone());
                }
            }
            Statement::Assign { rhs, .. } => {
                s.extend(rhs.variables());
            }
            Statement::Assume(c) => {
                s.extend(c.variables());
            }
            Statement::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                s.extend(cond.variables());
                s.extend(on_true.variables());
                s.extend(on_false.variables());
            }
            Statement::CallSite { args, .. } => {
                s.extend(args.iter().map(|(v, _)| v.clone()));
            }
            Statement::Return { var, .. } => {
                s.insert(var.clone());
            }
            Statement::ArrayLoad { arr, idx, .. } => {
                s.insert(arr.clone());
                s.insert(idx.clone());
            }
            Statement::ArrayStore { arr, idx, val, .. } => {
                // a weak update reads the previous contents
                s.insert(arr.clone());
                s.insert(idx.clone());
                s.extend(val.variables());
            }
            Statement::PtrAssign { rhs, .. } | Statement::PtrLoad { rhs, .. } => {
                s.insert(rhs.clone());
            }
            Statement::PtrStore { lhs, rhs, .. } => {
                s.insert(lhs.clone());
                s.insert(rhs.clone());
            }
            Statement::Havoc(_)
            | Statement::Unreachable
            | Statement::FuncDecl(_)
            | Statement::ArrayInit { .. }
            | Statement::PtrNew { .. } => {}
        }
        s
    }

    /// All variables the statement mentions.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut s = self.defs();
        s.extend(self.uses());
        s
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::BinOp {
                op,
                lhs,
                left,
                right,
            } => write!(f, "{} := {} {} {}", lhs, left, op, right),
            Statement::Assign { lhs, rhs } => write!(f, "{} := {}", lhs, rhs),
            Statement::Assume(c) => write!(f, "assume({})", c),
            Statement::Havoc(v) => write!(f, "havoc({})", v),
            Statement::Unreachable => write!(f, "unreachable"),
            Statement::Select {
                lhs,
                cond,
                on_true,
                on_false,
            } => write!(f, "{} := ({}) ? {} : {}", lhs, cond, on_true, on_false),
            Statement::FuncDecl(d) => write!(f, "decl {}", d.name),
            Statement::CallSite { lhs, func, args } => {
                if let Some((v, _)) = lhs {
                    write!(f, "{} := ", v)?;
                }
                write!(f, "call {}(", func)?;
                for (i, (a, _)) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            Statement::Return { var, .. } => write!(f, "return {}", var),
            Statement::ArrayInit { arr, values } => {
                write!(f, "{} := {{", arr)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "}}")
            }
            Statement::ArrayLoad { lhs, arr, idx } => write!(f, "{} := {}[{}]", lhs, arr, idx),
            Statement::ArrayStore { arr, idx, val, .. } => {
                write!(f, "{}[{}] := {}", arr, idx, val)
            }
            Statement::PtrNew { lhs, object } => write!(f, "{} := new({})", lhs, object),
            Statement::PtrAssign { lhs, rhs, offset } => {
                write!(f, "{} := {} + {}", lhs, rhs, offset)
            }
            Statement::PtrLoad { lhs, rhs, .. } => write!(f, "{} := *{}", lhs, rhs),
            Statement::PtrStore { lhs, rhs, .. } => write!(f, "*{} := {}", lhs, rhs),
        }
    }
}

/// Basic block: a label, an ordered statement list and its CFG edges.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    label: Label,
    stmts: Vec<Statement>,
    succs: Vec<Label>,
    preds: Vec<Label>,
}

impl BasicBlock {
    fn new(label: Label) -> Self {
        BasicBlock {
            label,
            stmts: Vec::new(),
            succs: Vec::new(),
            preds: Vec::new(),
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn statements(&self) -> &[Statement] {
        &self.stmts
    }

    pub fn succs(&self) -> &[Label] {
        &self.succs
    }

    pub fn preds(&self) -> &[Label] {
        &self.preds
    }

    /// All variables mentioned anywhere in the block.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut s = BTreeSet::new();
        for st in &self.stmts {
            s.extend(st.variables());
        }
        s
    }

    pub fn push(&mut self, st: Statement) {
        self.stmts.push(st);
    }

    pub fn assign(&mut self, lhs: impl Into<Var>, rhs: impl Into<LinearExpr>) {
        self.push(Statement::Assign {
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
    }

    pub fn assume(&mut self, c: LinearConstraint) {
        self.push(Statement::Assume(c));
    }

    pub fn havoc(&mut self, v: impl Into<Var>) {
        self.push(Statement::Havoc(v.into()));
    }

    pub fn unreachable(&mut self) {
        self.push(Statement::Unreachable);
    }

    pub fn binop(
        &mut self,
        op: Op,
        lhs: impl Into<Var>,
        left: impl Into<Var>,
        right: impl Into<Operand>,
    ) {
        self.push(Statement::BinOp {
            op,
            lhs: lhs.into(),
            left: left.into(),
            right: right.into(),
        });
    }

    pub fn add(&mut self, lhs: impl Into<Var>, left: impl Into<Var>, right: impl Into<Operand>) {
        self.binop(Op::Add, lhs, left, right);
    }

    pub fn sub(&mut self, lhs: impl Into<Var>, left: impl Into<Var>, right: impl Into<Operand>) {
        self.binop(Op::Sub, lhs, left, right);
    }

    pub fn mul(&mut self, lhs: impl Into<Var>, left: impl Into<Var>, right: impl Into<Operand>) {
        self.binop(Op::Mul, lhs, left, right);
    }

    pub fn div(&mut self, lhs: impl Into<Var>, left: impl Into<Var>, right: impl Into<Operand>) {
        self.binop(Op::Div, lhs, left, right);
    }

    pub fn select(
        &mut self,
        lhs: impl Into<Var>,
        cond: LinearConstraint,
        on_true: impl Into<LinearExpr>,
        on_false: impl Into<LinearExpr>,
    ) {
        self.push(Statement::Select {
            lhs: lhs.into(),
            cond,
            on_true: on_true.into(),
            on_false: on_false.into(),
        });
    }

    pub fn callsite(
        &mut self,
        lhs: Option<(Var, VarType)>,
        func: impl Into<String>,
        args: Vec<(Var, VarType)>,
    ) {
        self.push(Statement::CallSite {
            lhs,
            func: func.into(),
            args,
        });
    }

    pub fn ret(&mut self, var: impl Into<Var>, ty: VarType) {
        self.push(Statement::Return {
            var: var.into(),
            ty,
        });
    }

    pub fn array_init(&mut self, arr: impl Into<Var>, values: Vec<BigInt>) {
        self.push(Statement::ArrayInit {
            arr: arr.into(),
            values,
        });
    }

    pub fn array_load(&mut self, lhs: impl Into<Var>, arr: impl Into<Var>, idx: impl Into<Var>) {
        self.push(Statement::ArrayLoad {
            lhs: lhs.into(),
            arr: arr.into(),
            idx: idx.into(),
        });
    }

    pub fn array_store(
        &mut self,
        arr: impl Into<Var>,
        idx: impl Into<Var>,
        val: impl Into<LinearExpr>,
        is_singleton: bool,
    ) {
        self.push(Statement::ArrayStore {
            arr: arr.into(),
            idx: idx.into(),
            val: val.into(),
            is_singleton,
        });
    }

    pub fn new_object(&mut self, lhs: impl Into<Var>, object: u64) {
        self.push(Statement::PtrNew {
            lhs: lhs.into(),
            object,
        });
    }

    pub fn ptr_assign(&mut self, lhs: impl Into<Var>, rhs: impl Into<Var>, offset: impl Into<BigInt>) {
        self.push(Statement::PtrAssign {
            lhs: lhs.into(),
            rhs: rhs.into(),
            offset: offset.into(),
        });
    }

    pub fn ptr_load(&mut self, lhs: impl Into<Var>, rhs: impl Into<Var>, range: Interval) {
        self.push(Statement::PtrLoad {
            lhs: lhs.into(),
            rhs: rhs.into(),
            range,
        });
    }

    pub fn ptr_store(&mut self, lhs: impl Into<Var>, rhs: impl Into<Var>, range: Interval) {
        self.push(Statement::PtrStore {
            lhs: lhs.into(),
            rhs: rhs.into(),
            range,
        });
    }
}

/// Control-flow graph with a builder interface.
#[derive(Debug, Clone)]
pub struct Cfg {
    entry: Label,
    exit: Option<Label>,
    blocks: Vec<BasicBlock>,
    index: FxHashMap<Label, usize>,
    decl: Option<FunctionDecl>,
}

impl Cfg {
    pub fn new(entry: impl Into<Label>, exit: impl Into<Label>) -> Self {
        let mut cfg = Cfg::without_exit(entry);
        cfg.exit = Some(exit.into());
        cfg
    }

    pub fn without_exit(entry: impl Into<Label>) -> Self {
        Cfg {
            entry: entry.into(),
            exit: None,
            blocks: Vec::new(),
            index: FxHashMap::default(),
            decl: None,
        }
    }

    pub fn with_decl(
        entry: impl Into<Label>,
        exit: impl Into<Label>,
        decl: FunctionDecl,
    ) -> Self {
        let mut cfg = Cfg::new(entry, exit);
        cfg.decl = Some(decl);
        cfg
    }

    /// Get or create the block with the given label.
    pub fn insert(&mut self, label: impl Into<Label>) -> &mut BasicBlock {
        let label = label.into();
        if let Some(&i) = self.index.get(&label) {
            return &mut self.blocks[i];
        }
        let i = self.blocks.len();
        self.index.insert(label.clone(), i);
        self.blocks.push(BasicBlock::new(label));
        &mut self.blocks[i]
    }

    pub fn add_edge(&mut self, src: impl Into<Label>, dst: impl Into<Label>) {
        let src = src.into();
        let dst = dst.into();
        self.insert(dst.clone());
        let s = self.insert(src.clone());
        if !s.succs.contains(&dst) {
            s.succs.push(dst.clone());
        }
        let d = self.insert(dst);
        if !d.preds.contains(&src) {
            d.preds.push(src);
        }
    }

    pub fn block(&self, label: &Label) -> &BasicBlock {
        let i = *self
            .index
            .get(label)
            .unwrap_or_else(|| panic!("no basic block labelled {}", label));
        &self.blocks[i]
    }

    pub fn has_block(&self, label: &Label) -> bool {
        self.index.contains_key(label)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BasicBlock> {
        self.blocks.iter()
    }

    pub fn labels(&self) -> impl Iterator<Item = &Label> {
        self.blocks.iter().map(|b| b.label())
    }

    pub fn entry_label(&self) -> &Label {
        &self.entry
    }

    pub fn exit_label(&self) -> Option<&Label> {
        self.exit.as_ref()
    }

    pub fn decl(&self) -> Option<&FunctionDecl> {
        self.decl.as_ref()
    }

    /// Name of this CFG's function, when it has a declaration.
    pub fn func_name(&self) -> Option<&str> {
        self.decl.as_ref().map(|d| d.name.as_str())
    }

    /// The variable returned at the exit block, if any.
    pub fn return_var(&self) -> Option<Var> {
        let exit = self.exit.as_ref()?;
        if !self.has_block(exit) {
            return None;
        }
        self.block(exit).statements().iter().find_map(|st| match st {
            Statement::Return { var, .. } => Some(var.clone()),
            _ => None,
        })
    }

    /// All variables mentioned in the CFG.
    pub fn variables(&self) -> BTreeSet<Var> {
        let mut s = BTreeSet::new();
        for b in &self.blocks {
            s.extend(b.variables());
        }
        s
    }

    /// Remove blocks unreachable from the entry and merge trivial chains
    /// (`a -> b` where `a` is `b`'s only predecessor and `b` is `a`'s only
    /// successor). Entry and exit labels are preserved.
    pub fn simplify(&mut self) {
        // drop unreachable blocks
        let mut reachable = BTreeSet::new();
        let mut stack = vec![self.entry.clone()];
        while let Some(l) = stack.pop() {
            if !reachable.insert(l.clone()) || !self.has_block(&l) {
                continue;
            }
            for s in self.block(&l).succs() {
                stack.push(s.clone());
            }
        }
        let dead: Vec<Label> = self
            .labels()
            .filter(|l| !reachable.contains(*l))
            .cloned()
            .collect();
        for l in &dead {
            self.remove_block(l);
        }

        // merge single-successor / single-predecessor chains
        loop {
            let mut candidate = None;
            for b in &self.blocks {
                if b.succs.len() != 1 {
                    continue;
                }
                let succ = b.succs[0].clone();
                if succ == self.entry || succ == *b.label() {
                    continue;
                }
                if self.block(&succ).preds.len() == 1 {
                    candidate = Some((b.label().clone(), succ));
                    break;
                }
            }
            let Some((a, b)) = candidate else { break };
            self.merge_into(&a, &b);
        }
    }

    fn remove_block(&mut self, label: &Label) {
        let Some(&i) = self.index.get(label) else {
            return;
        };
        let removed = self.blocks.remove(i);
        self.index.remove(label);
        for idx in self.index.values_mut() {
            if *idx > i {
                *idx -= 1;
            }
        }
        for s in removed.succs {
            if let Some(&j) = self.index.get(&s) {
                self.blocks[j].preds.retain(|p| p != label);
            }
        }
        for p in removed.preds {
            if let Some(&j) = self.index.get(&p) {
                self.blocks[j].succs.retain(|s| s != label);
            }
        }
    }

    // Append b's statements to a, rewire a's successors, delete b.
    fn merge_into(&mut self, a: &Label, b: &Label) {
        let bi = self.index[b];
        let b_block = self.blocks[bi].clone();
        let ai = self.index[a];
        self.blocks[ai].stmts.extend(b_block.stmts.clone());
        self.blocks[ai].succs = b_block.succs.clone();
        for s in &b_block.succs {
            let si = self.index[s];
            for p in self.blocks[si].preds.iter_mut() {
                if p == b {
                    *p = a.clone();
                }
            }
        }
        let bi = self.index[b];
        self.blocks.remove(bi);
        self.index.remove(b);
        for idx in self.index.values_mut() {
            if *idx > bi {
                *idx -= 1;
            }
        }
        if self.exit.as_ref() == Some(b) {
            self.exit = Some(a.clone());
        }
    }
}

impl DirectedGraph for Cfg {
    type NodeId = Label;

    fn nodes(&self) -> Vec<Label> {
        self.labels().cloned().collect()
    }

    fn succs(&self, n: &Label) -> Vec<Label> {
        self.block(n).succs().to_vec()
    }

    fn preds(&self, n: &Label) -> Vec<Label> {
        self.block(n).preds().to_vec()
    }
}

impl FlowGraph for Cfg {
    fn entry(&self) -> Label {
        self.entry.clone()
    }
}

impl fmt::Display for Cfg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.blocks {
            writeln!(f, "{}:", b.label())?;
            for st in b.statements() {
                writeln!(f, "  {}", st)?;
            }
            writeln!(f, "  --> [{}]", b.succs().join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> Cfg {
        let mut cfg = Cfg::new("entry", "ret");
        cfg.insert("entry").assign("x", 0);
        cfg.insert("then").assume(LinearExpr::var("x").ge(0));
        cfg.insert("else").assume(LinearExpr::var("x").lt(0));
        cfg.insert("ret");
        cfg.add_edge("entry", "then");
        cfg.add_edge("entry", "else");
        cfg.add_edge("then", "ret");
        cfg.add_edge("else", "ret");
        cfg
    }

    #[test]
    fn test_builder_and_edges() {
        let cfg = diamond();
        assert_eq!(cfg.succs(&"entry".to_string()), vec!["then", "else"]);
        assert_eq!(cfg.preds(&"ret".to_string()), vec!["then", "else"]);
        assert_eq!(cfg.entry_label(), "entry");
        assert_eq!(cfg.exit_label(), Some(&"ret".to_string()));
    }

    #[test]
    fn test_defs_uses() {
        let mut b = BasicBlock::new("b".to_string());
        b.add("x", "y", "z");
        let st = &b.statements()[0];
        assert!(st.defs().contains("x"));
        assert!(st.uses().contains("y") && st.uses().contains("z"));

        let mut b = BasicBlock::new("b".to_string());
        b.array_store("a", "i", LinearExpr::var("v"), false);
        let st = &b.statements()[0];
        assert!(st.defs().contains("a"));
        assert!(st.uses().contains("a") && st.uses().contains("i") && st.uses().contains("v"));
    }

    #[test]
    fn test_simplify_removes_unreachable() {
        let mut cfg = diamond();
        cfg.insert("orphan").havoc("w");
        assert!(cfg.has_block(&"orphan".to_string()));
        cfg.simplify();
        assert!(!cfg.has_block(&"orphan".to_string()));
    }

    #[test]
    fn test_simplify_merges_chains() {
        let mut cfg = Cfg::new("a", "c");
        cfg.insert("a").assign("x", 1);
        cfg.insert("b").assign("y", 2);
        cfg.insert("c").assign("z", 3);
        cfg.add_edge("a", "b");
        cfg.add_edge("b", "c");
        cfg.simplify();
        // the chain collapses into the entry block
        assert_eq!(cfg.blocks().count(), 1);
        let a = cfg.block(&"a".to_string());
        assert_eq!(a.statements().len(), 3);
        assert_eq!(cfg.exit_label(), Some(&"a".to_string()));
    }

    #[test]
    fn test_return_var() {
        let mut cfg = Cfg::new("entry", "ret");
        cfg.insert("entry");
        cfg.insert("ret").ret("r", VarType::Int);
        cfg.add_edge("entry", "ret");
        assert_eq!(cfg.return_var(), Some("r".to_string()));
    }
}
