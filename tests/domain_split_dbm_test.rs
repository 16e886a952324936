// SPDX-License-Identifier: GPL-2.0
//! Tests for bpf_analyzer::domain::split_dbm

use bpf_analyzer::bounds::expr::{LinearConstraint, LinearExpression};
use bpf_analyzer::bounds::interval::{Bound, Interval, Number};
use bpf_analyzer::core::types::Variable;
use bpf_analyzer::domain::split_dbm::{ArithBinop, BitwiseBinop, SplitDbm};

fn x() -> Variable {
    Variable(1)
}
fn y() -> Variable {
    Variable(2)
}
fn z() -> Variable {
    Variable(3)
}

/// `v <= k`
fn le(v: Variable, k: Number) -> LinearConstraint {
    LinearConstraint::le_zero(LinearExpression::variable(v).plus_constant(-k))
}

/// `v >= k`
fn ge(v: Variable, k: Number) -> LinearConstraint {
    LinearConstraint::le_zero(LinearExpression::constant(k).plus_term(v, -1))
}

/// `a - b <= k`
fn diff_le(a: Variable, b: Variable, k: Number) -> LinearConstraint {
    LinearConstraint::le_zero(
        LinearExpression::variable(a).plus_term(b, -1).plus_constant(-k),
    )
}

fn with_range(v: Variable, lo: Number, hi: Number) -> SplitDbm {
    let mut d = SplitDbm::top();
    d.set(v, &Interval::new(Bound::Finite(lo), Bound::Finite(hi)));
    d
}

fn assert_equiv(a: &SplitDbm, b: &SplitDbm) {
    assert!(a.leq(b) && b.leq(a), "states differ: {} vs {}", a, b);
}

#[test]
fn test_bounds_and_difference_propagation() {
    let mut d = SplitDbm::top();
    d.add_constraint(&le(x(), 5));
    d.add_constraint(&ge(x(), 2));
    d.add_constraint(&diff_le(y(), x(), 3));

    assert_eq!(d.interval_of(y()).ub(), Bound::Finite(8));
    assert_eq!(d.interval_of(y()).lb(), Bound::MinusInfinity);
    assert_eq!(
        d.interval_of(x()),
        Interval::new(Bound::Finite(2), Bound::Finite(5))
    );
    assert!(d.closure_holds());
    assert!(d.potential_feasible());

    // Forgetting x drops x entirely; the bound already derived onto y's own
    // vertex survives, which is sound (it was entailed by the conjunction).
    d.forget(x());
    assert!(d.interval_of(x()).is_top());
    assert_eq!(d.interval_of(y()).ub(), Bound::Finite(8));
    assert!(d.potential_feasible());
}

#[test]
fn test_join_recovers_deferred_bounds() {
    // A: x, y both in [0, 10] with no relation.
    let mut a = with_range(x(), 0, 10);
    a.set(y(), &Interval::new(Bound::Finite(0), Bound::Finite(10)));

    // B: x, y in [20, 30] with y - x <= 0.
    let mut b = with_range(x(), 20, 30);
    b.set(y(), &Interval::new(Bound::Finite(20), Bound::Finite(30)));
    b.add_constraint(&diff_le(y(), x(), 0));

    let j = a.join(&b);

    assert!(a.leq(&j));
    assert!(b.leq(&j));
    assert_eq!(
        j.interval_of(x()),
        Interval::new(Bound::Finite(0), Bound::Finite(30))
    );
    assert_eq!(
        j.interval_of(y()),
        Interval::new(Bound::Finite(0), Bound::Finite(30))
    );

    // The join must entail y - x <= 30 even though neither unary bound set
    // alone carries the relation.
    let mut rel = SplitDbm::top();
    rel.add_constraint(&diff_le(y(), x(), 30));
    assert!(j.leq(&rel));

    assert!(j.closure_holds());
    assert!(j.potential_feasible());
}

#[test]
fn test_join_with_bottom_and_top() {
    let a = with_range(x(), 0, 4);
    assert_equiv(&a.join(&SplitDbm::bottom()), &a);
    assert_equiv(&SplitDbm::bottom().join(&a), &a);
    assert!(a.join(&SplitDbm::top()).is_top());
}

#[test]
fn test_lattice_laws() {
    let a = with_range(x(), 0, 4);
    let b = with_range(x(), 2, 9);
    let c = with_range(x(), -3, 1);

    // a <= a | b, a & b <= a.
    assert!(a.leq(&a.join(&b)));
    assert!(b.leq(&a.join(&b)));
    assert!(a.meet(&b).leq(&a));
    assert!(a.meet(&b).leq(&b));

    // Commutativity.
    assert_equiv(&a.join(&b), &b.join(&a));
    assert_equiv(&a.meet(&b), &b.meet(&a));

    // Associativity.
    assert_equiv(&a.join(&b).join(&c), &a.join(&b.join(&c)));
    assert_equiv(&a.meet(&b).meet(&c), &a.meet(&b.meet(&c)));
}

#[test]
fn test_monotonicity() {
    let a = with_range(x(), 1, 3);
    let b = with_range(x(), 0, 5); // a <= b
    let c = with_range(x(), 2, 8);
    assert!(a.leq(&b));
    assert!(a.join(&c).leq(&b.join(&c)));
    assert!(a.meet(&c).leq(&b.meet(&c)));
}

#[test]
fn test_meet_combines_relations() {
    let mut a = SplitDbm::top();
    a.add_constraint(&diff_le(y(), x(), 0)); // y <= x
    let mut b = SplitDbm::top();
    b.add_constraint(&diff_le(x(), y(), 0)); // x <= y

    let m = a.meet(&b);
    assert!(!m.is_bottom());
    // x == y now; pinning x pins y.
    let mut m2 = m.clone();
    m2.add_constraint(&le(x(), 7));
    m2.add_constraint(&ge(x(), 7));
    assert_eq!(m2.interval_of(y()).singleton(), Some(7));
}

#[test]
fn test_meet_detects_infeasible_cycle() {
    let mut a = SplitDbm::top();
    a.add_constraint(&diff_le(y(), x(), -1)); // y < x
    let mut b = SplitDbm::top();
    b.add_constraint(&diff_le(x(), y(), -1)); // x < y

    assert!(a.meet(&b).is_bottom());
}

#[test]
fn test_meet_disjoint_intervals_bottom() {
    let a = with_range(x(), 0, 3);
    let b = with_range(x(), 10, 12);
    assert!(a.meet(&b).is_bottom());
}

#[test]
fn test_widening_chain_stabilizes() {
    // Ever-growing iterates; the widening chain must stop moving in a
    // bounded number of steps.
    let mut s = with_range(x(), 0, 0);
    let mut steps = 0;
    loop {
        steps += 1;
        assert!(steps <= 5, "widening chain failed to stabilize");
        let t = with_range(x(), 0, steps as Number);
        let next = s.widen(&s.join(&t));
        if next.leq(&s) && s.leq(&next) {
            break;
        }
        s = next;
    }
    // The stable state keeps the lower bound and gives up the upper.
    assert_eq!(s.interval_of(x()).lb(), Bound::Finite(0));
    assert_eq!(s.interval_of(x()).ub(), Bound::PlusInfinity);
}

#[test]
fn test_widening_upper_bounds_join() {
    let a = with_range(x(), 0, 10);
    let b = with_range(x(), 0, 20);
    let w = a.widen(&b);
    assert!(a.join(&b).leq(&w));
}

#[test]
fn test_narrowing_is_sound_noop() {
    let a = with_range(x(), 0, 10);
    let b = with_range(x(), 0, 5);
    let n = a.narrow(&b);
    assert_equiv(&n, &a);

    assert!(a.narrow(&SplitDbm::bottom()).is_bottom());
    assert!(SplitDbm::bottom().narrow(&a).is_bottom());
    assert_equiv(&SplitDbm::top().narrow(&b), &b);
}

#[test]
fn test_relational_assign_and_meet() {
    // y := x + 2 under x in [0, 5]; then learning x = 5 forces y = 7.
    let mut d = with_range(x(), 0, 5);
    d.assign(y(), &LinearExpression::variable(x()).plus_constant(2));
    assert_eq!(
        d.interval_of(y()),
        Interval::new(Bound::Finite(2), Bound::Finite(7))
    );
    d.add_constraint(&ge(x(), 5));
    assert_eq!(d.interval_of(y()).singleton(), Some(7));
    assert!(d.potential_feasible());
}

#[test]
fn test_three_way_difference_chain() {
    let mut d = with_range(x(), 0, 3);
    d.add_constraint(&diff_le(y(), x(), 1)); // y <= x + 1
    d.add_constraint(&diff_le(z(), y(), 1)); // z <= y + 1
    // Closure must propagate z <= x + 2 and hence z <= 5.
    let mut rel = SplitDbm::top();
    rel.add_constraint(&diff_le(z(), x(), 2));
    assert!(d.leq(&rel));
    assert_eq!(d.interval_of(z()).ub(), Bound::Finite(5));
    assert!(d.closure_holds());
}

#[test]
fn test_forget_after_widen_normalizes() {
    // forget() runs normalize() first; exercise it right after a widening
    // left unstable vertices behind.
    let a = with_range(x(), 0, 10);
    let b = with_range(x(), 0, 20);
    let mut w = a.widen(&b);
    w.forget(y()); // y absent: only normalization happens
    assert_eq!(w.interval_of(x()).lb(), Bound::Finite(0));
    w.forget(x());
    assert!(w.is_top());
}

#[test]
fn test_apply_add_stays_relational() {
    let mut d = with_range(x(), 0, 5);
    d.set(y(), &Interval::new(Bound::Finite(1), Bound::Finite(2)));
    d.apply_arith(ArithBinop::Add, z(), x(), y());
    assert_eq!(
        d.interval_of(z()),
        Interval::new(Bound::Finite(1), Bound::Finite(7))
    );
    // Tightening x narrows z through the retained relation.
    d.add_constraint(&ge(x(), 5));
    assert_eq!(d.interval_of(z()).lb(), Bound::Finite(6));
}

#[test]
fn test_apply_imm_mul_and_div() {
    let mut d = with_range(x(), 1, 4);
    d.apply_arith_imm(ArithBinop::Mul, y(), x(), 3);
    assert_eq!(
        d.interval_of(y()),
        Interval::new(Bound::Finite(3), Bound::Finite(12))
    );
    d.apply_arith_imm(ArithBinop::SDiv, z(), y(), 3);
    assert_eq!(
        d.interval_of(z()),
        Interval::new(Bound::Finite(1), Bound::Finite(4))
    );
}

#[test]
fn test_apply_rem_and_bitwise_fallbacks() {
    let mut d = with_range(x(), 0, 100);
    d.apply_arith_imm(ArithBinop::URem, y(), x(), 8);
    let yi = d.interval_of(y());
    assert!(yi.lb() >= Bound::Finite(0));
    assert!(yi.ub() <= Bound::Finite(7));

    d.apply_bitwise_imm(BitwiseBinop::And, z(), x(), 0xf);
    let zi = d.interval_of(z());
    assert!(zi.lb() >= Bound::Finite(0));
    assert!(zi.ub() <= Bound::Finite(0xf));
}

#[test]
fn test_forget_all() {
    let mut d = with_range(x(), 0, 1);
    d.set(y(), &Interval::constant(2));
    d.forget_all(&[x(), y()]);
    assert!(d.is_top());
}

#[test]
fn test_display_forms() {
    assert_eq!(SplitDbm::bottom().to_string(), "_|_");
    assert_eq!(SplitDbm::top().to_string(), "{}");
    let d = with_range(x(), 1, 2);
    let s = d.to_string();
    assert!(s.contains("v1"), "unexpected rendering: {}", s);
}
