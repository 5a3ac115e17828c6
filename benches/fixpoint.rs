//! Fixpoint-engine benchmarks.
//!
//! Measures the forward analyzer on chains of loops, the shape that
//! drives both the WTO construction and the widening/narrowing phases.
//!
//! Run with:
//! ```bash
//! cargo bench --bench fixpoint
//! ```

use absint::{
    AbstractDomain, Cfg, Dbm, FixpointParams, FwdAnalyzer, IntervalEnv, LinearExpr, Liveness,
};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

/// A chain of `n` independent counting loops sharing one counter each.
fn loop_chain(n: usize) -> Cfg {
    let mut cfg = Cfg::new("entry", "ret");
    cfg.insert("entry").assign("t", 0);
    let mut prev = "entry".to_string();
    for k in 0..n {
        let head = format!("head{}", k);
        let body = format!("body{}", k);
        let exit = format!("exit{}", k);
        let i = format!("i{}", k);
        cfg.insert(head.clone());
        cfg.insert(body.clone())
            .assume(LinearExpr::var(i.clone()).le(99));
        cfg.insert(body.clone()).add(i.clone(), i.clone(), 1);
        cfg.insert(exit.clone())
            .assume(LinearExpr::var(i.clone()).ge(100));
        cfg.insert(prev.clone()).assign(i.clone(), 0);
        cfg.add_edge(prev.clone(), head.clone());
        cfg.add_edge(head.clone(), body.clone());
        cfg.add_edge(body.clone(), head.clone());
        cfg.add_edge(head, exit.clone());
        prev = exit;
    }
    cfg.add_edge(prev, "ret");
    cfg
}

fn bench_interval_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("interval_fixpoint");
    for n in [1usize, 4, 16] {
        let cfg = loop_chain(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cfg, |b, cfg| {
            b.iter(|| {
                let mut a: FwdAnalyzer<IntervalEnv> =
                    FwdAnalyzer::new(cfg, None, FixpointParams::default());
                a.run(IntervalEnv::top());
                a.get_pre(&"ret".to_string())
            })
        });
    }
    group.finish();
}

fn bench_dbm_analysis(c: &mut Criterion) {
    let mut group = c.benchmark_group("dbm_fixpoint");
    for n in [1usize, 4] {
        let cfg = loop_chain(n);
        let live = Liveness::new(&cfg);
        group.bench_with_input(BenchmarkId::from_parameter(n), &cfg, |b, cfg| {
            b.iter(|| {
                let mut a: FwdAnalyzer<Dbm> =
                    FwdAnalyzer::new(cfg, Some(&live), FixpointParams::default());
                a.run(Dbm::top());
                a.get_pre(&"ret".to_string())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_interval_analysis, bench_dbm_analysis);
criterion_main!(benches);
