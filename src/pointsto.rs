//! Position-sensitive pointer analysis.
//!
//! A constraint system over pointer variables: each node carries a set of
//! object identifiers and an interval of byte offsets. Constraints are
//! `assign(lhs, ref)`, `store(ref, rhs)` and `load(lhs, ref)`, where a
//! reference is a pointer plus offset, an object plus offset, a function,
//! or the parameter/return node of the functions a pointer may denote.
//!
//! Solving runs an outer extrapolation pass to a fixpoint (joining
//! offsets until an iteration threshold, widening after it), then a fixed
//! number of refinement passes. Refinement keeps a descending offset and
//! joins otherwise; it is not a narrowing, so only the iteration cap
//! bounds it. Dereferencing an object or function literal is a
//! programmer error.

use std::collections::BTreeSet;
use std::fmt;

use log::debug;
use rustc_hash::FxHashMap;

use crate::cfg::{Cfg, Statement, VarType};
use crate::domain::AbstractDomain;
use crate::interval::Interval;

/// Pointer variable of the constraint system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointerVar(u32);

/// Object (or function) identifiers.
pub type ObjectId = u64;

/// Set of object identifiers a pointer may target.
pub type AddressSet = BTreeSet<ObjectId>;

/// Answer of a pointer query: targets plus offset range.
pub type PtaInfo = (AddressSet, Interval);

/// Right-hand side of an assignment or the location of a memory access.
#[derive(Debug, Clone)]
pub enum PtaRef {
    /// `p + offset`
    Pointer(PointerVar, Interval),
    /// `&object + offset`
    Object(ObjectId, Interval),
    /// a function address
    Function(ObjectId),
    /// the i-th parameter of the functions `p` may denote
    Param(PointerVar, u32),
    /// the return value of the functions `p` may denote
    Return(PointerVar),
}

/// One constraint of the system.
#[derive(Debug, Clone)]
pub enum PtaConstraint {
    /// `lhs ⊇ ref`
    Assign(PointerVar, PtaRef),
    /// `*(ref) ⊇ rhs`
    Store(PtaRef, PointerVar),
    /// `lhs ⊇ *(ref)`
    Load(PointerVar, PtaRef),
}

// Internal node keys of the solution maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Node {
    Ptr(PointerVar),
    Obj(ObjectId),
    Param(ObjectId, u32),
    Ret(ObjectId),
}

// Join/widen/refine policies applied when an offset reaches a node.
trait OffsetOp {
    fn converged(&self, before: &Interval, after: &Interval) -> bool;
    fn apply(&self, before: &Interval, after: &Interval, iteration: usize) -> Interval;
}

struct Extrapolate {
    threshold: usize,
}

impl OffsetOp for Extrapolate {
    fn converged(&self, before: &Interval, after: &Interval) -> bool {
        after.leq(before)
    }

    fn apply(&self, before: &Interval, after: &Interval, iteration: usize) -> Interval {
        if iteration < self.threshold {
            before.join(after)
        } else {
            before.widen(after)
        }
    }
}

// Not a narrowing: convergence is never reported and termination comes
// from the caller's iteration cap.
struct Refine;

impl OffsetOp for Refine {
    fn converged(&self, _before: &Interval, _after: &Interval) -> bool {
        false
    }

    fn apply(&self, before: &Interval, after: &Interval, _iteration: usize) -> Interval {
        if after.leq(before) {
            after.clone()
        } else {
            before.join(after)
        }
    }
}

/// The constraint system and its solution.
pub struct PtaSystem {
    csts: Vec<PtaConstraint>,
    names: Vec<String>,
    var_index: FxHashMap<String, PointerVar>,
    functions: BTreeSet<ObjectId>,
    addresses: FxHashMap<Node, AddressSet>,
    offsets: FxHashMap<Node, Interval>,
    change_seen: bool,
}

impl PtaSystem {
    pub fn new() -> Self {
        PtaSystem {
            csts: Vec::new(),
            names: Vec::new(),
            var_index: FxHashMap::default(),
            functions: BTreeSet::new(),
            addresses: FxHashMap::default(),
            offsets: FxHashMap::default(),
            change_seen: false,
        }
    }

    /// Intern a named pointer variable.
    pub fn var(&mut self, name: impl Into<String>) -> PointerVar {
        let name = name.into();
        if let Some(&v) = self.var_index.get(&name) {
            return v;
        }
        let v = PointerVar(self.names.len() as u32);
        self.names.push(name.clone());
        self.var_index.insert(name, v);
        v
    }

    /// Register a function identifier.
    pub fn function(&mut self, id: ObjectId) -> PtaRef {
        self.functions.insert(id);
        PtaRef::Function(id)
    }

    pub fn add_constraint(&mut self, cst: PtaConstraint) {
        self.csts.push(cst);
    }

    fn address_set(&self, node: Node) -> AddressSet {
        self.addresses.get(&node).cloned().unwrap_or_default()
    }

    fn offset(&self, node: Node) -> Interval {
        self.offsets
            .get(&node)
            .cloned()
            .unwrap_or_else(Interval::bottom)
    }

    fn add_addresses(&mut self, node: Node, addrs: &AddressSet) {
        if addrs.is_empty() {
            return;
        }
        let set = self.addresses.entry(node).or_default();
        for a in addrs {
            if set.insert(*a) {
                self.change_seen = true;
            }
        }
    }

    fn add_offset(&mut self, node: Node, o: Interval, op: &dyn OffsetOp, iteration: usize) {
        let before = self.offset(node);
        if op.converged(&before, &o) {
            return;
        }
        self.change_seen = true;
        let after = op.apply(&before, &o, iteration);
        self.offsets.insert(node, after);
    }

    // Resolve a reference into (addresses, offset).
    fn process_ref(&self, r: &PtaRef) -> PtaInfo {
        match r {
            PtaRef::Pointer(p, o) => {
                let addrs = self.address_set(Node::Ptr(*p));
                let off = self.offset(Node::Ptr(*p)).add(o);
                (addrs, off)
            }
            PtaRef::Object(a, o) => {
                let mut addrs = AddressSet::new();
                addrs.insert(*a);
                (addrs, o.clone())
            }
            PtaRef::Function(id) => {
                let mut addrs = AddressSet::new();
                addrs.insert(*id);
                (addrs, Interval::top())
            }
            PtaRef::Param(fptr, i) => {
                let fids = self.address_set(Node::Ptr(*fptr));
                let mut addrs = AddressSet::new();
                let mut off = Interval::bottom();
                for fid in fids {
                    addrs.extend(self.address_set(Node::Param(fid, *i)));
                    off = off.join(&self.offset(Node::Param(fid, *i)));
                }
                (addrs, off)
            }
            PtaRef::Return(fptr) => {
                let fids = self.address_set(Node::Ptr(*fptr));
                let mut addrs = AddressSet::new();
                let mut off = Interval::bottom();
                for fid in fids {
                    addrs.extend(self.address_set(Node::Ret(fid)));
                    off = off.join(&self.offset(Node::Ret(fid)));
                }
                (addrs, off)
            }
        }
    }

    // Target nodes of a store through (or load from) a reference.
    fn deref_targets(&self, r: &PtaRef, access: &str) -> Vec<Node> {
        match r {
            PtaRef::Pointer(p, _) => self
                .address_set(Node::Ptr(*p))
                .into_iter()
                .map(Node::Obj)
                .collect(),
            PtaRef::Object(_, _) => {
                panic!("cannot {} through a memory object literal", access)
            }
            PtaRef::Function(_) => {
                panic!("cannot {} through a function literal", access)
            }
            PtaRef::Param(fptr, i) => self
                .address_set(Node::Ptr(*fptr))
                .into_iter()
                .map(|fid| Node::Param(fid, *i))
                .collect(),
            PtaRef::Return(fptr) => self
                .address_set(Node::Ptr(*fptr))
                .into_iter()
                .map(Node::Ret)
                .collect(),
        }
    }

    fn process_constraint(&mut self, cst: &PtaConstraint, op: &dyn OffsetOp, iteration: usize) {
        match cst {
            PtaConstraint::Assign(lhs, r) => {
                let (addrs, off) = self.process_ref(r);
                self.add_addresses(Node::Ptr(*lhs), &addrs);
                self.add_offset(Node::Ptr(*lhs), off, op, iteration);
            }
            PtaConstraint::Store(r, rhs) => {
                let addrs = self.address_set(Node::Ptr(*rhs));
                let off = self.offset(Node::Ptr(*rhs));
                for target in self.deref_targets(r, "store") {
                    self.add_addresses(target, &addrs);
                    self.add_offset(target, off.clone(), op, iteration);
                }
            }
            PtaConstraint::Load(lhs, r) => {
                for source in self.deref_targets(r, "load") {
                    let addrs = self.address_set(source);
                    let off = self.offset(source);
                    self.add_addresses(Node::Ptr(*lhs), &addrs);
                    self.add_offset(Node::Ptr(*lhs), off, op, iteration);
                }
            }
        }
    }

    fn step(&mut self, op: &dyn OffsetOp, iteration: usize) {
        let csts = std::mem::take(&mut self.csts);
        for cst in &csts {
            self.process_constraint(cst, op, iteration);
        }
        self.csts = csts;
    }

    /// Solve the system: extrapolate to a fixpoint, then run exactly
    /// `narrow_threshold` refinement passes.
    pub fn solve(&mut self, widen_threshold: usize, narrow_threshold: usize) {
        let widen_op = Extrapolate {
            threshold: widen_threshold,
        };
        let mut iteration = 0;
        loop {
            iteration += 1;
            self.change_seen = false;
            self.step(&widen_op, iteration);
            if !self.change_seen {
                break;
            }
        }
        debug!("pointer analysis extrapolation took {} passes", iteration);

        let refine_op = Refine;
        for iteration in 0..narrow_threshold {
            self.step(&refine_op, iteration);
        }
    }

    /// Targets and offset of a pointer variable.
    pub fn get(&self, p: PointerVar) -> PtaInfo {
        (self.address_set(Node::Ptr(p)), self.offset(Node::Ptr(p)))
    }

    /// Targets and offset of a named pointer variable.
    pub fn get_by_name(&self, name: &str) -> Option<PtaInfo> {
        self.var_index.get(name).map(|&v| self.get(v))
    }
}

impl Default for PtaSystem {
    fn default() -> Self {
        PtaSystem::new()
    }
}

impl fmt::Display for PtaSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, &v) in self.var_index.iter() {
            let (addrs, off) = self.get(v);
            write!(f, "{} -> ({{", name)?;
            let mut it = addrs.iter().peekable();
            while let Some(a) = it.next() {
                write!(f, "{}", a)?;
                if it.peek().is_some() {
                    write!(f, "; ")?;
                }
            }
            writeln!(f, "}}, {})", off)?;
        }
        Ok(())
    }
}

/// Generate pointer constraints from the pointer statements, call sites
/// and returns of a CFG. Function identifiers are interned here.
pub struct PointerConstraintGen {
    func_ids: FxHashMap<String, ObjectId>,
    next_func_id: ObjectId,
}

impl PointerConstraintGen {
    pub fn new() -> Self {
        PointerConstraintGen {
            func_ids: FxHashMap::default(),
            // function ids live above any program object id
            next_func_id: 1 << 32,
        }
    }

    fn func_id(&mut self, name: &str) -> ObjectId {
        if let Some(&id) = self.func_ids.get(name) {
            return id;
        }
        let id = self.next_func_id;
        self.next_func_id += 1;
        self.func_ids.insert(name.to_string(), id);
        id
    }

    pub fn gen_constraints(&mut self, cfg: &Cfg, sys: &mut PtaSystem) {
        // the function itself, its formals and its return node
        let fvar = cfg.func_name().map(|name| {
            let id = self.func_id(name);
            let v = sys.var(name);
            let fref = sys.function(id);
            sys.add_constraint(PtaConstraint::Assign(v, fref));
            if let Some(decl) = cfg.decl() {
                for (i, (param, ty)) in decl.params.iter().enumerate() {
                    if *ty == VarType::Ptr {
                        let pv = sys.var(param.clone());
                        sys.add_constraint(PtaConstraint::Assign(
                            pv,
                            PtaRef::Param(v, i as u32),
                        ));
                    }
                }
            }
            v
        });

        for block in cfg.blocks() {
            for st in block.statements() {
                match st {
                    Statement::PtrNew { lhs, object } => {
                        let v = sys.var(lhs.clone());
                        sys.add_constraint(PtaConstraint::Assign(
                            v,
                            PtaRef::Object(*object, Interval::constant(0)),
                        ));
                    }
                    Statement::PtrAssign { lhs, rhs, offset } => {
                        let l = sys.var(lhs.clone());
                        let r = sys.var(rhs.clone());
                        sys.add_constraint(PtaConstraint::Assign(
                            l,
                            PtaRef::Pointer(r, Interval::constant(offset.clone())),
                        ));
                    }
                    Statement::PtrLoad { lhs, rhs, range } => {
                        let l = sys.var(lhs.clone());
                        let r = sys.var(rhs.clone());
                        sys.add_constraint(PtaConstraint::Load(
                            l,
                            PtaRef::Pointer(r, range.clone()),
                        ));
                    }
                    Statement::PtrStore { lhs, rhs, range } => {
                        let l = sys.var(lhs.clone());
                        let r = sys.var(rhs.clone());
                        sys.add_constraint(PtaConstraint::Store(
                            PtaRef::Pointer(l, range.clone()),
                            r,
                        ));
                    }
                    Statement::CallSite { lhs, func, args } => {
                        let fid = self.func_id(func);
                        let fv = sys.var(func.clone());
                        let fref = sys.function(fid);
                        sys.add_constraint(PtaConstraint::Assign(fv, fref));
                        for (i, (arg, ty)) in args.iter().enumerate() {
                            if *ty == VarType::Ptr {
                                let av = sys.var(arg.clone());
                                sys.add_constraint(PtaConstraint::Store(
                                    PtaRef::Param(fv, i as u32),
                                    av,
                                ));
                            }
                        }
                        if let Some((x, VarType::Ptr)) = lhs {
                            let xv = sys.var(x.clone());
                            sys.add_constraint(PtaConstraint::Assign(xv, PtaRef::Return(fv)));
                        }
                    }
                    Statement::Return { var, ty } => {
                        if *ty == VarType::Ptr {
                            if let Some(fv) = fvar {
                                let rv = sys.var(var.clone());
                                sys.add_constraint(PtaConstraint::Store(
                                    PtaRef::Return(fv),
                                    rv,
                                ));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }
}

impl Default for PointerConstraintGen {
    fn default() -> Self {
        PointerConstraintGen::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_store_load() {
        // p := new(1); q := new(2); *p := q; r := *p
        let mut sys = PtaSystem::new();
        let p = sys.var("p");
        let q = sys.var("q");
        let r = sys.var("r");
        let zero = Interval::constant(0);
        sys.add_constraint(PtaConstraint::Assign(p, PtaRef::Object(1, zero.clone())));
        sys.add_constraint(PtaConstraint::Assign(q, PtaRef::Object(2, zero.clone())));
        sys.add_constraint(PtaConstraint::Store(
            PtaRef::Pointer(p, zero.clone()),
            q,
        ));
        sys.add_constraint(PtaConstraint::Load(r, PtaRef::Pointer(p, zero)));
        sys.solve(100, 1);

        let (addrs, _) = sys.get(r);
        assert_eq!(addrs, AddressSet::from([2]));
    }

    #[test]
    fn test_branching_targets_join() {
        // p := new(1) or p := new(2), then q := p
        let mut sys = PtaSystem::new();
        let p = sys.var("p");
        let q = sys.var("q");
        sys.add_constraint(PtaConstraint::Assign(
            p,
            PtaRef::Object(1, Interval::constant(0)),
        ));
        sys.add_constraint(PtaConstraint::Assign(
            p,
            PtaRef::Object(2, Interval::constant(4)),
        ));
        sys.add_constraint(PtaConstraint::Assign(
            q,
            PtaRef::Pointer(p, Interval::constant(0)),
        ));
        sys.solve(100, 1);

        let (addrs, off) = sys.get(q);
        assert_eq!(addrs, AddressSet::from([1, 2]));
        assert_eq!(off, Interval::range(0, 4));
    }

    #[test]
    fn test_offsets_widen_then_refine() {
        // a self-feeding pointer increment: p := p + 8
        let mut sys = PtaSystem::new();
        let p = sys.var("p");
        sys.add_constraint(PtaConstraint::Assign(
            p,
            PtaRef::Object(1, Interval::constant(0)),
        ));
        sys.add_constraint(PtaConstraint::Assign(
            p,
            PtaRef::Pointer(p, Interval::constant(8)),
        ));
        sys.solve(3, 1);

        let (addrs, off) = sys.get(p);
        assert_eq!(addrs, AddressSet::from([1]));
        // extrapolation widened the offset to [0, +oo); the refinement
        // pass then rebuilt one step from the base object, landing on
        // [0, 8] (refinement is not a narrowing)
        assert_eq!(off, Interval::range(0, 8));
    }

    #[test]
    #[should_panic(expected = "cannot store through a function literal")]
    fn test_store_through_function_is_an_error() {
        let mut sys = PtaSystem::new();
        let q = sys.var("q");
        let fref = sys.function(7);
        sys.add_constraint(PtaConstraint::Store(fref, q));
        sys.solve(10, 1);
    }

    #[test]
    fn test_interprocedural_param_and_return() {
        // foo's formal x receives the caller's argument; foo returns it
        let mut sys = PtaSystem::new();
        let foo = sys.var("foo");
        let x = sys.var("x");
        let arg = sys.var("arg");
        let res = sys.var("res");
        let fref = sys.function(100);
        sys.add_constraint(PtaConstraint::Assign(foo, fref));
        // callee side
        sys.add_constraint(PtaConstraint::Assign(x, PtaRef::Param(foo, 0)));
        sys.add_constraint(PtaConstraint::Store(PtaRef::Return(foo), x));
        // caller side
        sys.add_constraint(PtaConstraint::Assign(
            arg,
            PtaRef::Object(5, Interval::constant(0)),
        ));
        sys.add_constraint(PtaConstraint::Store(PtaRef::Param(foo, 0), arg));
        sys.add_constraint(PtaConstraint::Assign(res, PtaRef::Return(foo)));
        sys.solve(100, 1);

        let (addrs, _) = sys.get(res);
        assert_eq!(addrs, AddressSet::from([5]));
    }
}
