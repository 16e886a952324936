// SPDX-License-Identifier: GPL-2.0

//! Performance benchmarks for the analysis core
//!
//! Run with: cargo bench
//! Results are saved to target/criterion/

use bpf_analyzer::analysis::cfg::Cfg;
use bpf_analyzer::analysis::fixpoint::{run_forward_analyzer, Transformer};
use bpf_analyzer::analysis::wto::Wto;
use bpf_analyzer::bounds::expr::LinearExpression;
use bpf_analyzer::bounds::interval::{Bound, Interval, Number};
use bpf_analyzer::core::types::{Label, Statement, Terminator, Variable};
use bpf_analyzer::domain::split_dbm::SplitDbm;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

#[derive(Debug, Clone)]
enum Insn {
    SetConst(Variable, Number),
    AddConst(Variable, Number),
}

impl Statement for Insn {
    fn terminator(&self) -> Terminator {
        Terminator::FallThrough
    }
}

struct ToyDomain;

impl Transformer<Insn> for ToyDomain {
    fn setup_entry(&self) -> SplitDbm {
        SplitDbm::top()
    }

    fn transfer(&self, state: &mut SplitDbm, stmt: &Insn) {
        match stmt {
            Insn::SetConst(x, k) => state.set(*x, &Interval::constant(*k)),
            Insn::AddConst(x, k) => {
                let e = LinearExpression::variable(*x).plus_constant(*k);
                state.assign(*x, &e);
            }
        }
    }
}

/// Straight-line CFG of `n` single-statement blocks.
fn linear_cfg(n: u32) -> Cfg<Insn> {
    let mut cfg = Cfg::new(Label(0), Label(n));
    cfg.get_mut(Label(0)).insert(Insn::SetConst(Variable(0), 0));
    for i in 1..n {
        cfg.insert(Label(i)).insert(Insn::AddConst(Variable(0), 1));
        cfg.connect(Label(i - 1), Label(i));
    }
    cfg.connect(Label(n - 1), Label(n));
    cfg
}

/// CFG with `n` sequential self-loops, each a widening point.
fn loopy_cfg(n: u32) -> Cfg<Insn> {
    let mut cfg = Cfg::new(Label(0), Label(n + 1));
    cfg.get_mut(Label(0)).insert(Insn::SetConst(Variable(0), 0));
    for i in 1..=n {
        cfg.insert(Label(i)).insert(Insn::AddConst(Variable(0), 1));
        cfg.connect(Label(i - 1), Label(i));
        cfg.connect(Label(i), Label(i));
    }
    cfg.connect(Label(n), Label(n + 1));
    cfg
}

/// State relating `k` variables in a chain.
fn chained_state(k: u32) -> SplitDbm {
    let mut d = SplitDbm::top();
    d.set(
        Variable(0),
        &Interval::new(Bound::Finite(0), Bound::Finite(100)),
    );
    for i in 1..k {
        let e = LinearExpression::variable(Variable(i - 1)).plus_constant(1);
        d.assign(Variable(i), &e);
    }
    d
}

fn bench_simplify(c: &mut Criterion) {
    let mut group = c.benchmark_group("cfg_simplify");
    for size in [16u32, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let mut cfg = linear_cfg(size);
                cfg.simplify();
                black_box(cfg.size())
            })
        });
    }
    group.finish();
}

fn bench_wto(c: &mut Criterion) {
    let mut group = c.benchmark_group("wto_build");
    for size in [8u32, 32, 128] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cfg = loopy_cfg(size);
            b.iter(|| black_box(Wto::new(&cfg).components().len()))
        });
    }
    group.finish();
}

fn bench_fixpoint(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward_analyzer");
    for size in [4u32, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let cfg = loopy_cfg(size);
            b.iter(|| {
                let (pre, post) = run_forward_analyzer(&cfg, &ToyDomain);
                black_box((pre.len(), post.len()))
            })
        });
    }
    group.finish();
}

fn bench_domain_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("splitdbm_join");
    for vars in [4u32, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(vars), &vars, |b, &vars| {
            let a = chained_state(vars);
            let mut shifted = chained_state(vars);
            shifted.set(
                Variable(0),
                &Interval::new(Bound::Finite(50), Bound::Finite(200)),
            );
            b.iter(|| black_box(a.join(&shifted).is_top()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_simplify,
    bench_wto,
    bench_fixpoint,
    bench_domain_join
);
criterion_main!(benches);
