// SPDX-License-Identifier: GPL-2.0

//! Closure and potential maintenance over weighted digraphs.
//!
//! Shortest-path based primitives shared by the DBM lattice operations. All
//! of them rely on a valid potential function (`pot[u] + w(u,v) >= pot[v]`
//! for every edge of the view), which makes Dijkstra over reduced costs
//! applicable. Distances accumulate in the wide potential type; an edge whose
//! materialized weight does not fit the edge-weight type is dropped, which
//! only loses precision.

use crate::domain::graph::{GraphView, Potential, VertId, Weight, WeightedGraph};
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, VecDeque};

/// Batch of edge tightenings `(src, dst, weight)` to apply at once.
///
/// Closure passes compute their tightenings against the unmodified graph and
/// apply them afterwards, so enumeration never observes its own writes.
pub type EdgeVector = Vec<(VertId, VertId, Weight)>;

/// Apply a batch of tightenings, keeping minima over existing edges.
pub fn apply_delta(g: &mut WeightedGraph, delta: &EdgeVector) {
    for &(s, d, w) in delta {
        g.update_edge(s, w, d);
    }
}

/// Reversed view of a graph; a valid potential for it is the negated one.
struct RevView<'a, G: GraphView>(&'a G);

impl<G: GraphView> GraphView for RevView<'_, G> {
    fn size(&self) -> usize {
        self.0.size()
    }
    fn is_vertex(&self, v: VertId) -> bool {
        self.0.is_vertex(v)
    }
    fn verts(&self) -> Vec<VertId> {
        self.0.verts()
    }
    fn lookup(&self, s: VertId, d: VertId) -> Option<Weight> {
        self.0.lookup(d, s)
    }
    fn e_succs(&self, v: VertId) -> Vec<(VertId, Weight)> {
        self.0.e_preds(v)
    }
    fn e_preds(&self, v: VertId) -> Vec<(VertId, Weight)> {
        self.0.e_succs(v)
    }
}

/// Single-source shortest path distances from `src` under reduced costs.
///
/// Returns true distances (not reduced ones); unreachable vertices are
/// `None`. Requires `pot` valid on `g`.
fn dijkstra<G: GraphView>(g: &G, pot: &[Potential], src: VertId) -> Vec<Option<Potential>> {
    let mut rdist: Vec<Option<Potential>> = vec![None; g.size()];
    let mut heap: BinaryHeap<Reverse<(Potential, VertId)>> = BinaryHeap::new();
    rdist[src] = Some(0);
    heap.push(Reverse((0, src)));

    while let Some(Reverse((du, u))) = heap.pop() {
        if rdist[u] != Some(du) {
            continue;
        }
        for (v, w) in g.e_succs(u) {
            let rw = pot[u] + Potential::from(w) - pot[v];
            debug_assert!(rw >= 0, "invalid potential on edge {} -> {}", u, v);
            let cand = du + rw.max(0);
            if rdist[v].map_or(true, |dv| cand < dv) {
                rdist[v] = Some(cand);
                heap.push(Reverse((cand, v)));
            }
        }
    }

    rdist
        .into_iter()
        .enumerate()
        .map(|(v, rd)| rd.map(|r| r - pot[src] + pot[v]))
        .collect()
}

/// Record a tightening of `s -> d` to `dist` when it improves on the graph.
fn push_improvement<G: GraphView>(
    g: &G,
    s: VertId,
    d: VertId,
    dist: Potential,
    delta: &mut EdgeVector,
) {
    let Ok(w) = Weight::try_from(dist) else { return };
    match g.lookup(s, d) {
        Some(old) if old <= w => {}
        _ => delta.push((s, d, w)),
    }
}

/// Re-close all edges incident to `v` after its constraints changed.
///
/// Materializes the shortest path from `v` to every reachable vertex and
/// from every co-reachable vertex to `v`. Run from the zero vertex on the
/// full graph this re-derives the unary bounds; run from a fresh vertex on
/// `g \ {0}` it closes a new assignment's difference constraints.
pub fn close_after_assign<G: GraphView>(
    g: &G,
    pot: &[Potential],
    v: VertId,
    delta: &mut EdgeVector,
) {
    let fwd = dijkstra(g, pot, v);
    for (u, du) in fwd.iter().enumerate() {
        if u == v {
            continue;
        }
        if let Some(d) = du {
            push_improvement(g, v, u, *d, delta);
        }
    }

    let neg_pot: Vec<Potential> = pot.iter().map(|p| -p).collect();
    let bwd = dijkstra(&RevView(g), &neg_pot, v);
    for (u, du) in bwd.iter().enumerate() {
        if u == v {
            continue;
        }
        if let Some(d) = du {
            push_improvement(g, u, v, *d, delta);
        }
    }
}

/// Restore full closure after a syntactic meet of two closed graphs.
pub fn close_after_meet<G: GraphView>(g: &G, pot: &[Potential], delta: &mut EdgeVector) {
    for s in g.verts() {
        let dist = dijkstra(g, pot, s);
        for (u, du) in dist.iter().enumerate() {
            if u == s {
                continue;
            }
            if let Some(d) = du {
                push_improvement(g, s, u, *d, delta);
            }
        }
    }
}

/// Restore closure around the vertices destabilized by a widening.
///
/// Widening only drops edges, so closure can only be broken on paths leaving
/// a vertex that lost an edge; forward re-closure from each suffices.
pub fn close_after_widen<G: GraphView>(
    g: &G,
    pot: &[Potential],
    unstable: &BTreeSet<VertId>,
    delta: &mut EdgeVector,
) {
    for &v in unstable {
        if v >= g.size() || !g.is_vertex(v) {
            continue;
        }
        let dist = dijkstra(g, pot, v);
        for (u, du) in dist.iter().enumerate() {
            if u == v {
                continue;
            }
            if let Some(d) = du {
                push_improvement(g, v, u, *d, delta);
            }
        }
    }
}

/// Solve for a valid potential on `g`, warm-starting from `pot`.
///
/// Bellman-Ford with a queue; every vertex acts as a source with its current
/// potential as initial label. Returns `false` on a negative cycle, in which
/// case `pot` is meaningless.
pub fn select_potentials(g: &WeightedGraph, pot: &mut [Potential]) -> bool {
    debug_assert!(pot.len() >= g.size());
    let verts = g.verts();
    let n = verts.len();
    let mut in_queue = vec![false; g.size()];
    let mut pops = vec![0usize; g.size()];
    let mut queue: VecDeque<VertId> = VecDeque::new();
    for &v in &verts {
        queue.push_back(v);
        in_queue[v] = true;
    }

    while let Some(u) = queue.pop_front() {
        in_queue[u] = false;
        pops[u] += 1;
        if pops[u] > n + 1 {
            return false;
        }
        for (v, w) in g.e_succs(u) {
            if pot[u] + Potential::from(w) < pot[v] {
                pot[v] = pot[u] + Potential::from(w);
                if !in_queue[v] {
                    queue.push_back(v);
                    in_queue[v] = true;
                }
            }
        }
    }
    true
}

/// Repair the potential after tightening the edge `src -> dst`.
///
/// Relaxation is confined to the part of the graph the new edge can improve.
/// Returns `false` iff the tightening created a negative cycle (which must
/// pass through `src`), leaving the state infeasible.
pub fn repair_potential(
    g: &WeightedGraph,
    pot: &mut [Potential],
    src: VertId,
    dst: VertId,
) -> bool {
    let w = Potential::from(g.edge_val(src, dst));
    if pot[src] + w >= pot[dst] {
        return true;
    }
    pot[dst] = pot[src] + w;
    let mut queue: VecDeque<VertId> = VecDeque::new();
    queue.push_back(dst);

    while let Some(u) = queue.pop_front() {
        for (v, wv) in g.e_succs(u) {
            if pot[u] + Potential::from(wv) < pot[v] {
                if v == src {
                    return false;
                }
                pot[v] = pot[u] + Potential::from(wv);
                queue.push_back(v);
            }
        }
    }
    true
}

/// Syntactic meet: edge-wise minimum of two graphs over shared numbering.
///
/// The flag reports whether the result is already closed (it coincides with
/// one closed operand); otherwise the caller re-closes.
pub fn meet_graphs<A: GraphView, B: GraphView>(gx: &A, gy: &B) -> (WeightedGraph, bool) {
    let sz = gx.size().max(gy.size());
    let mut out = WeightedGraph::new();
    out.grow_to(sz);
    let mut eq_x = true;
    let mut eq_y = true;

    for s in 0..sz {
        for (d, wx) in gx.e_succs(s) {
            match gy.lookup(s, d) {
                Some(wy) => {
                    out.set_edge(s, wx.min(wy), d);
                    if wx < wy {
                        eq_y = false;
                    }
                    if wy < wx {
                        eq_x = false;
                    }
                }
                None => {
                    out.set_edge(s, wx, d);
                    eq_y = false;
                }
            }
        }
        for (d, wy) in gy.e_succs(s) {
            if gx.lookup(s, d).is_none() {
                out.set_edge(s, wy, d);
                eq_x = false;
            }
        }
    }
    (out, eq_x || eq_y)
}

/// Edge-wise join: keep edges present in both graphs at the larger weight.
pub fn join_graphs<A: GraphView, B: GraphView>(gx: &A, gy: &B) -> WeightedGraph {
    let sz = gx.size().max(gy.size());
    let mut out = WeightedGraph::new();
    out.grow_to(sz);
    for s in 0..sz {
        for (d, wx) in gx.e_succs(s) {
            if let Some(wy) = gy.lookup(s, d) {
                out.set_edge(s, wx.max(wy), d);
            }
        }
    }
    out
}

/// Graph widening: keep the old edge iff the new iterate still implies it.
///
/// Sources that lost at least one edge are reported in `unstable`; their
/// closure is repaired lazily by the next `normalize`.
pub fn widen_graphs<A: GraphView, B: GraphView>(
    gx: &A,
    gy: &B,
    unstable: &mut Vec<VertId>,
) -> WeightedGraph {
    let sz = gx.size().max(gy.size());
    let mut out = WeightedGraph::new();
    out.grow_to(sz);
    for s in gx.verts() {
        let mut stable = true;
        for (d, wx) in gx.e_succs(s) {
            match gy.lookup(s, d) {
                Some(wy) if wy <= wx => out.set_edge(s, wx, d),
                _ => stable = false,
            }
        }
        if !stable {
            unstable.push(s);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path_graph() -> (WeightedGraph, Vec<Potential>) {
        // 0 -> 1 -> 2 with weights 2 and 3, plus a loose direct 0 -> 2.
        let mut g = WeightedGraph::new();
        for _ in 0..3 {
            g.new_vertex();
        }
        g.add_edge(0, 2, 1);
        g.add_edge(1, 3, 2);
        g.add_edge(0, 10, 2);
        let mut pot = vec![0; 3];
        assert!(select_potentials(&g, &mut pot));
        (g, pot)
    }

    #[test]
    fn test_close_after_assign_tightens() {
        let (mut g, pot) = path_graph();
        let mut delta = EdgeVector::new();
        close_after_assign(&g, &pot, 0, &mut delta);
        apply_delta(&mut g, &delta);
        assert_eq!(g.lookup(0, 2), Some(5));
    }

    #[test]
    fn test_close_after_meet_full_closure() {
        let (mut g, pot) = path_graph();
        let mut delta = EdgeVector::new();
        close_after_meet(&g, &pot, &mut delta);
        apply_delta(&mut g, &delta);
        assert_eq!(g.lookup(0, 2), Some(5));
        // Triple inequality holds everywhere.
        for i in g.verts() {
            for (k, a) in g.e_succs(i) {
                for (j, b) in g.e_succs(k) {
                    if i != j {
                        assert!(g.edge_val(i, j) <= a + b);
                    }
                }
            }
        }
    }

    #[test]
    fn test_select_potentials_negative_cycle() {
        let mut g = WeightedGraph::new();
        g.new_vertex();
        g.new_vertex();
        g.add_edge(0, 1, 1);
        g.add_edge(1, -2, 0);
        let mut pot = vec![0; 2];
        assert!(!select_potentials(&g, &mut pot));
    }

    #[test]
    fn test_repair_potential_detects_cycle() {
        let mut g = WeightedGraph::new();
        g.new_vertex();
        g.new_vertex();
        g.add_edge(0, 1, 1);
        let mut pot = vec![0; 2];
        assert!(select_potentials(&g, &mut pot));
        // Adding 1 -> 0 with weight -3 creates a negative cycle.
        g.set_edge(1, -3, 0);
        assert!(!repair_potential(&g, &mut pot, 1, 0));
    }

    #[test]
    fn test_repair_potential_ok() {
        let mut g = WeightedGraph::new();
        g.new_vertex();
        g.new_vertex();
        g.add_edge(0, 5, 1);
        let mut pot = vec![0; 2];
        assert!(select_potentials(&g, &mut pot));
        g.set_edge(0, -4, 1);
        assert!(repair_potential(&g, &mut pot, 0, 1));
        assert!(pot[0] + (-4) >= pot[1]);
    }

    #[test]
    fn test_widen_drops_and_marks() {
        let mut gx = WeightedGraph::new();
        let mut gy = WeightedGraph::new();
        for _ in 0..2 {
            gx.new_vertex();
            gy.new_vertex();
        }
        gx.add_edge(0, 5, 1);
        // The new iterate weakened the edge, so widening drops it.
        gy.add_edge(0, 7, 1);
        let mut unstable = Vec::new();
        let w = widen_graphs(&gx, &gy, &mut unstable);
        assert_eq!(w.lookup(0, 1), None);
        assert_eq!(unstable, vec![0]);

        // Stable edge survives with the old weight.
        let mut gy2 = WeightedGraph::new();
        gy2.new_vertex();
        gy2.new_vertex();
        gy2.add_edge(0, 3, 1);
        let mut unstable2 = Vec::new();
        let w2 = widen_graphs(&gx, &gy2, &mut unstable2);
        assert_eq!(w2.lookup(0, 1), Some(5));
        assert!(unstable2.is_empty());
    }

    #[test]
    fn test_meet_join_graphs() {
        let mut gx = WeightedGraph::new();
        let mut gy = WeightedGraph::new();
        for _ in 0..2 {
            gx.new_vertex();
            gy.new_vertex();
        }
        gx.add_edge(0, 3, 1);
        gy.add_edge(0, 5, 1);
        gy.add_edge(1, 1, 0);
        let (m, closed) = meet_graphs(&gx, &gy);
        assert_eq!(m.lookup(0, 1), Some(3));
        assert_eq!(m.lookup(1, 0), Some(1));
        assert!(!closed);
        let j = join_graphs(&gx, &gy);
        assert_eq!(j.lookup(0, 1), Some(5));
        assert_eq!(j.lookup(1, 0), None);
    }
}
