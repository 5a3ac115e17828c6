//! End-to-end analyses over hand-built CFGs.

use std::sync::Once;

use absint::{
    AbstractDomain, ArrayGraphDomain, ArraySmashing, Cfg, Dbm, DisIntervalEnv, FixpointParams,
    FunctionDecl, FwdAnalyzer, Interval, IntervalEnv, LinearExpr, Liveness, NumericalDomain,
    PointerConstraintGen, PtaSystem, VarType,
};
use num_bigint::BigInt;

fn v(name: &str) -> String {
    name.to_string()
}

static LOGGER: Once = Once::new();

// RUST_LOG-style verbosity for debugging failing scenarios:
// run with `cargo test -- --nocapture` after raising the level here.
fn init_logger() {
    LOGGER.call_once(|| {
        let _ = simplelog::SimpleLogger::init(
            simplelog::LevelFilter::Warn,
            simplelog::Config::default(),
        );
    });
}

/// i := 0; while (i <= 99) { i := i + 1 }
fn counting_loop() -> Cfg {
    let mut cfg = Cfg::new("entry", "ret");
    cfg.insert("entry").assign("i", 0);
    cfg.insert("head");
    cfg.insert("body").assume(LinearExpr::var("i").le(99));
    cfg.insert("body").add("i", "i", 1);
    cfg.insert("ret").assume(LinearExpr::var("i").ge(100));
    cfg.add_edge("entry", "head");
    cfg.add_edge("head", "body");
    cfg.add_edge("body", "head");
    cfg.add_edge("head", "ret");
    cfg
}

/// The nondeterministic-increment loop: k stays untouched at 2^31 while
/// i grows by 1 or 2 per iteration.
fn nondet_increment_loop() -> Cfg {
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
fn intervals_on_counting_loop() {
    init_logger();
    let cfg = counting_loop();
    let mut a: FwdAnalyzer<IntervalEnv> = FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    a.run(IntervalEnv::top());

    // at the loop head i is in [0, 100]; after the loop i is exactly 100
    assert_eq!(a.get_pre(&v("head")).get(&v("i")), Interval::range(0, 100));
    assert_eq!(a.get_post(&v("ret")).get(&v("i")), Interval::constant(100));
}

#[test]
fn dbm_preserves_untouched_constants_across_widening() {
    let cfg = nondet_increment_loop();
    let mut a: FwdAnalyzer<Dbm> = FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    a.run(Dbm::top());

    let at_ret = a.get_pre(&v("ret"));
    // k was never assigned in the loop: widening must not touch it
    assert_eq!(
        at_ret.get(&v("k")),
        Interval::constant(BigInt::from(2147483648u64))
    );
    // the descending phase recovers a finite upper bound for i
    assert_eq!(at_ret.get(&v("i")), Interval::range(100, 101));
}

#[test]
fn dbm_with_liveness_pruning() {
    let cfg = nondet_increment_loop();
    let live = Liveness::new(&cfg);
    let mut a: FwdAnalyzer<Dbm> = FwdAnalyzer::new(&cfg, Some(&live), FixpointParams::default());
    a.run(Dbm::top());

    // pruning the loop scratch variables does not change the result
    assert_eq!(a.get_pre(&v("ret")).get(&v("i")), Interval::range(100, 101));
}

#[test]
fn disjunctive_intervals_refine_beyond_the_hull() {
    // then: x := 0 | else: x := 10, then assume x <= 9
    let mut cfg = Cfg::new("entry", "ret");
    cfg.insert("entry").havoc("nd");
    cfg.insert("then").assume(LinearExpr::var("nd").ge(1));
    cfg.insert("then").assign("x", 0);
    cfg.insert("else").assume(LinearExpr::var("nd").le(0));
    cfg.insert("else").assign("x", 10);
    cfg.insert("join");
    cfg.insert("ret").assume(LinearExpr::var("x").le(9));
    cfg.add_edge("entry", "then");
    cfg.add_edge("entry", "else");
    cfg.add_edge("then", "join");
    cfg.add_edge("else", "join");
    cfg.add_edge("join", "ret");

    let mut dis: FwdAnalyzer<DisIntervalEnv> =
        FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    dis.run(DisIntervalEnv::top());

    // the join keeps both branches apart ...
    let at_join = dis.get_pre(&v("ret"));
    assert_eq!(at_join.value_of(&v("x")).to_string(), "[0, 0] | [10, 10]");
    // ... so the guard prunes the second disjunct exactly
    assert_eq!(
        dis.get_post(&v("ret")).get(&v("x")),
        Interval::constant(0)
    );

    // the convex interval domain can only keep the hull
    let mut boxes: FwdAnalyzer<IntervalEnv> =
        FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    boxes.run(IntervalEnv::top());
    assert_eq!(boxes.get_post(&v("ret")).get(&v("x")), Interval::range(0, 9));
}

#[test]
fn pointer_analysis_store_then_load() {
    // p := new(1); q := new(2); *p := q; r := *p  ==>  r -> {2}
    let mut cfg = Cfg::new("b0", "b0");
    let b0 = cfg.insert("b0");
    b0.new_object("p", 1);
    b0.new_object("q", 2);
    b0.ptr_store("p", "q", Interval::range(0, 3));
    b0.ptr_load("r", "p", Interval::range(0, 3));

    let mut sys = PtaSystem::new();
    PointerConstraintGen::new().gen_constraints(&cfg, &mut sys);
    sys.solve(100, 1);

    let (targets, _) = sys.get_by_name("r").unwrap();
    assert_eq!(targets, [2].into_iter().collect());
}

#[test]
fn pointer_analysis_joins_branches() {
    // two stores on different branches reach the same load
    let mut cfg = Cfg::new("b0", "b3");
    let b0 = cfg.insert("b0");
    b0.new_object("p", 1);
    b0.new_object("q1", 2);
    b0.new_object("q2", 3);
    b0.havoc("nd");
    cfg.insert("b1").assume(LinearExpr::var("nd").ge(1));
    cfg.insert("b1").ptr_store("p", "q1", Interval::range(0, 3));
    cfg.insert("b2").assume(LinearExpr::var("nd").le(0));
    cfg.insert("b2").ptr_store("p", "q2", Interval::range(0, 3));
    cfg.insert("b3").ptr_load("r", "p", Interval::range(0, 3));
    cfg.add_edge("b0", "b1");
    cfg.add_edge("b0", "b2");
    cfg.add_edge("b1", "b3");
    cfg.add_edge("b2", "b3");

    let mut sys = PtaSystem::new();
    PointerConstraintGen::new().gen_constraints(&cfg, &mut sys);
    sys.solve(100, 1);

    let (targets, _) = sys.get_by_name("r").unwrap();
    assert_eq!(targets, [2, 3].into_iter().collect());
}

#[test]
fn pointer_analysis_through_calls() {
    // bar(x1, x2) returns either argument; foo passes p in {1,2} and
    // q in {3,4}, so foo's r sees all four objects
    let foo_decl = FunctionDecl::new(
        "foo",
        vec![(v("p0"), VarType::Ptr), (v("q0"), VarType::Ptr)],
        VarType::Ptr,
    );
    let mut foo = Cfg::with_decl("f0", "f6", foo_decl);
    foo.insert("f0").havoc("nd");
    foo.insert("f1").assume(LinearExpr::var("nd").ge(1));
    foo.insert("f1").new_object("p", 1);
    foo.insert("f2").assume(LinearExpr::var("nd").le(0));
    foo.insert("f2").new_object("p", 2);
    foo.insert("f3").havoc("nd");
    foo.insert("f4").assume(LinearExpr::var("nd").ge(1));
    foo.insert("f4").new_object("q", 3);
    foo.insert("f5").assume(LinearExpr::var("nd").le(0));
    foo.insert("f5").new_object("q", 4);
    let f6 = foo.insert("f6");
    f6.callsite(
        Some((v("r"), VarType::Ptr)),
        "bar",
        vec![(v("p"), VarType::Ptr), (v("q"), VarType::Ptr)],
    );
    f6.ret("r", VarType::Ptr);
    foo.add_edge("f0", "f1");
    foo.add_edge("f0", "f2");
    foo.add_edge("f1", "f3");
    foo.add_edge("f2", "f3");
    foo.add_edge("f3", "f4");
    foo.add_edge("f3", "f5");
    foo.add_edge("f4", "f6");
    foo.add_edge("f5", "f6");

    let bar_decl = FunctionDecl::new(
        "bar",
        vec![(v("x1"), VarType::Ptr), (v("x2"), VarType::Ptr)],
        VarType::Ptr,
    );
    let mut bar = Cfg::with_decl("b0", "b1", bar_decl);
    bar.insert("b0").ptr_assign("x3", "x1", 0);
    bar.insert("b0").ptr_assign("x3", "x2", 0);
    bar.insert("b1").ret("x3", VarType::Ptr);
    bar.add_edge("b0", "b1");

    let mut sys = PtaSystem::new();
    let mut gen = PointerConstraintGen::new();
    gen.gen_constraints(&foo, &mut sys);
    gen.gen_constraints(&bar, &mut sys);
    sys.solve(100, 1);

    let (targets, _) = sys.get_by_name("r").unwrap();
    assert_eq!(targets, [1, 2, 3, 4].into_iter().collect());
}

#[test]
fn array_smashing_strong_and_weak_stores() {
    // a[i] := 3 at a known singleton cell, then a[j] := 5 somewhere
    let mut cfg = Cfg::new("b0", "b0");
    let b0 = cfg.insert("b0");
    b0.array_store("a", "i", LinearExpr::constant(3), true);
    b0.array_load("r1", "a", "k");
    b0.array_store("a", "j", LinearExpr::constant(5), false);
    b0.array_load("r2", "a", "k");

    let mut a: FwdAnalyzer<ArraySmashing<IntervalEnv>> =
        FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    a.run(ArraySmashing::top());

    let out = a.get_post(&v("b0"));
    assert_eq!(out.get(&v("r1")), Interval::constant(3));
    assert_eq!(out.get(&v("r2")), Interval::range(3, 5));
}

#[test]
fn array_graph_summarizes_scanned_prefix() {
    // i := 0; while (i < n) { a[i] := 5; i := i + 1 }
    let mut cfg = Cfg::new("entry", "ret");
    cfg.insert("entry").assign("i", 0);
    cfg.insert("head");
    cfg.insert("body").assume(LinearExpr::var("i").lt("n"));
    cfg.insert("body")
        .array_store("a", "i", LinearExpr::constant(5), false);
    cfg.insert("body").add("i", "i", 1);
    cfg.insert("ret").assume(LinearExpr::var("i").ge("n"));
    cfg.add_edge("entry", "head");
    cfg.add_edge("head", "body");
    cfg.add_edge("body", "head");
    cfg.add_edge("head", "ret");

    let mut a: FwdAnalyzer<ArrayGraphDomain<Dbm>> =
        FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    a.run(ArrayGraphDomain::top());

    // after the loop the whole scanned range [0, n) carries the stored
    // value: the edge from the zero vertex to n holds a = 5
    let at_exit = a.get_post(&v("ret"));
    assert!(!at_exit.is_bottom());
    let w = at_exit.graph().weight(&v("$0"), &v("n"));
    assert_eq!(w.get(&v("a")), Interval::constant(5));
}

#[test]
fn randomized_interval_lattice_laws() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(0x5eed);
    let mut sample = |rng: &mut StdRng| -> Interval {
        let a: i64 = rng.gen_range(-1000..1000);
        let b: i64 = rng.gen_range(-1000..1000);
        Interval::range(a.min(b), a.max(b))
    };

    for _ in 0..200 {
        let x = sample(&mut rng);
        let y = sample(&mut rng);
        let z = sample(&mut rng);

        // join/meet laws
        assert!(x.leq(&x.join(&y)) && y.leq(&x.join(&y)));
        assert!(x.meet(&y).leq(&x));
        assert!(x.join(&y).equiv(&y.join(&x)));
        assert!(x.join(&y).join(&z).equiv(&x.join(&y.join(&z))));
        // widening covers, narrowing descends
        let w = x.widen(&y);
        assert!(x.leq(&w) && y.leq(&w));
        let n = w.narrow(&y);
        assert!(n.leq(&w));
        // the hull of a meet is inside both operands
        let m = x.meet(&y);
        if !m.is_bottom() {
            assert!(m.leq(&x) && m.leq(&y));
        }
    }
}

#[test]
fn results_are_post_fixpoints() {
    use absint::DirectedGraph;

    let cfg = nondet_increment_loop();
    let mut a: FwdAnalyzer<IntervalEnv> = FwdAnalyzer::new(&cfg, None, FixpointParams::default());
    a.run(IntervalEnv::top());

    for b in cfg.blocks() {
        if b.label() == cfg.entry_label() {
            continue;
        }
        let mut joined = IntervalEnv::bottom();
        for p in cfg.preds(b.label()) {
            joined = joined.join(&a.get_post(&p));
        }
        assert!(
            joined.leq(&a.get_pre(b.label())),
            "pre-state of {} is not a post-fixpoint",
            b.label()
        );
    }
}
