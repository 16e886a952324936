// SPDX-License-Identifier: GPL-2.0

//! Sparse weighted digraph backing the DBM domain.
//!
//! Vertices are dense small integers with slot reuse; an edge `s -> d` with
//! weight `w` encodes the difference constraint `value(d) - value(s) <= w`.
//! The domain's closure algorithms only read graphs through the [`GraphView`]
//! trait, so they work unchanged on the whole graph, on the view that hides
//! the zero vertex, and on permuted views over a common variable set.

use crate::bounds::interval::Number;
use std::collections::{BTreeMap, BTreeSet};

/// Vertex identifier. Dense, reused after [`WeightedGraph::forget`].
pub type VertId = usize;

/// Edge weight type (`Wt`).
pub type Weight = i64;

/// Potential type; wider than [`Weight`] so reduced-cost sums cannot wrap.
pub type Potential = i128;

/// Sentinel for "no vertex" in permutation tables.
pub const NO_VERTEX: VertId = VertId::MAX;

/// Checked conversion from the wide expression type to an edge weight.
///
/// `None` is the conversion-overflow case: callers drop the derivation and
/// keep the state sound but less precise.
pub fn weight_of(n: Number) -> Option<Weight> {
    Weight::try_from(n).ok()
}

/// Read-only access to a weighted digraph or a view of one.
pub trait GraphView {
    /// Number of vertex slots, including freed ones.
    fn size(&self) -> usize;
    /// True when `v` denotes a live vertex of this view.
    fn is_vertex(&self, v: VertId) -> bool;
    /// Snapshot of the live vertices.
    fn verts(&self) -> Vec<VertId>;
    /// Weight of the edge `s -> d`, if present.
    fn lookup(&self, s: VertId, d: VertId) -> Option<Weight>;
    /// Snapshot of the outgoing edges of `v`.
    fn e_succs(&self, v: VertId) -> Vec<(VertId, Weight)>;
    /// Snapshot of the incoming edges of `v`.
    fn e_preds(&self, v: VertId) -> Vec<(VertId, Weight)>;

    /// True when the edge exists.
    fn elem(&self, s: VertId, d: VertId) -> bool {
        self.lookup(s, d).is_some()
    }

    /// Weight of an edge known to exist.
    fn edge_val(&self, s: VertId, d: VertId) -> Weight {
        match self.lookup(s, d) {
            Some(w) => w,
            None => panic!("edge {} -> {} not in graph", s, d),
        }
    }
}

/// Adjacency-map weighted digraph with vertex slot reuse.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeightedGraph {
    succs: Vec<BTreeMap<VertId, Weight>>,
    preds: Vec<BTreeSet<VertId>>,
    free: BTreeSet<VertId>,
}

impl WeightedGraph {
    /// Empty graph with no vertices.
    pub fn new() -> WeightedGraph {
        WeightedGraph::default()
    }

    /// Ensure at least `n` vertex slots exist.
    pub fn grow_to(&mut self, n: usize) {
        while self.succs.len() < n {
            self.succs.push(BTreeMap::new());
            self.preds.push(BTreeSet::new());
        }
    }

    /// Allocate a vertex, reusing the lowest freed slot if any.
    pub fn new_vertex(&mut self) -> VertId {
        if let Some(v) = self.free.iter().next().copied() {
            self.free.remove(&v);
            return v;
        }
        self.succs.push(BTreeMap::new());
        self.preds.push(BTreeSet::new());
        self.succs.len() - 1
    }

    /// Remove all edges incident to `v` and free its slot.
    pub fn forget(&mut self, v: VertId) {
        if !self.is_vertex(v) {
            return;
        }
        let out: Vec<VertId> = self.succs[v].keys().copied().collect();
        for d in out {
            self.preds[d].remove(&v);
        }
        let inc: Vec<VertId> = self.preds[v].iter().copied().collect();
        for s in inc {
            self.succs[s].remove(&v);
        }
        self.succs[v].clear();
        self.preds[v].clear();
        self.free.insert(v);
    }

    /// Insert an edge assumed absent.
    pub fn add_edge(&mut self, s: VertId, w: Weight, d: VertId) {
        debug_assert!(self.is_vertex(s) && self.is_vertex(d));
        debug_assert!(!self.succs[s].contains_key(&d));
        self.succs[s].insert(d, w);
        self.preds[d].insert(s);
    }

    /// Insert or overwrite an edge.
    pub fn set_edge(&mut self, s: VertId, w: Weight, d: VertId) {
        debug_assert!(self.is_vertex(s) && self.is_vertex(d));
        self.succs[s].insert(d, w);
        self.preds[d].insert(s);
    }

    /// Insert an edge, keeping the minimum weight if one already exists.
    pub fn update_edge(&mut self, s: VertId, w: Weight, d: VertId) {
        match self.succs[s].get(&d) {
            Some(&old) if old <= w => {}
            _ => self.set_edge(s, w, d),
        }
    }

    /// Remove an edge if present.
    pub fn remove_edge(&mut self, s: VertId, d: VertId) {
        if self.succs[s].remove(&d).is_some() {
            self.preds[d].remove(&s);
        }
    }

    /// Successor vertices of `v`.
    pub fn succs_of(&self, v: VertId) -> Vec<VertId> {
        self.succs.get(v).map(|m| m.keys().copied().collect()).unwrap_or_default()
    }

    /// Predecessor vertices of `v`.
    pub fn preds_of(&self, v: VertId) -> Vec<VertId> {
        self.preds.get(v).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    /// Total number of edges.
    pub fn num_edges(&self) -> usize {
        self.succs.iter().map(|m| m.len()).sum()
    }

    /// True when the graph holds no edge at all.
    pub fn is_empty(&self) -> bool {
        self.succs.iter().all(|m| m.is_empty())
    }
}

impl GraphView for WeightedGraph {
    fn size(&self) -> usize {
        self.succs.len()
    }

    fn is_vertex(&self, v: VertId) -> bool {
        v < self.succs.len() && !self.free.contains(&v)
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.succs.len()).filter(|v| !self.free.contains(v)).collect()
    }

    fn lookup(&self, s: VertId, d: VertId) -> Option<Weight> {
        self.succs.get(s)?.get(&d).copied()
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Weight)> {
        self.succs.get(v).map(|m| m.iter().map(|(d, w)| (*d, *w)).collect()).unwrap_or_default()
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Weight)> {
        match self.preds.get(v) {
            Some(ps) => ps.iter().map(|s| (*s, self.succs[*s][&v])).collect(),
            None => Vec::new(),
        }
    }
}

/// View of a graph with one vertex (and its incident edges) hidden.
///
/// The DBM keeps relational closure in `g \ {0}`; this is that view.
#[derive(Debug)]
pub struct SubGraph<'a, G: GraphView> {
    g: &'a G,
    excluded: VertId,
}

impl<'a, G: GraphView> SubGraph<'a, G> {
    /// View of `g` without vertex `excluded`.
    pub fn new(g: &'a G, excluded: VertId) -> SubGraph<'a, G> {
        SubGraph { g, excluded }
    }
}

impl<G: GraphView> GraphView for SubGraph<'_, G> {
    fn size(&self) -> usize {
        self.g.size()
    }

    fn is_vertex(&self, v: VertId) -> bool {
        v != self.excluded && self.g.is_vertex(v)
    }

    fn verts(&self) -> Vec<VertId> {
        self.g.verts().into_iter().filter(|v| *v != self.excluded).collect()
    }

    fn lookup(&self, s: VertId, d: VertId) -> Option<Weight> {
        if s == self.excluded || d == self.excluded {
            None
        } else {
            self.g.lookup(s, d)
        }
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Weight)> {
        if v == self.excluded {
            return Vec::new();
        }
        self.g.e_succs(v).into_iter().filter(|(d, _)| *d != self.excluded).collect()
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Weight)> {
        if v == self.excluded {
            return Vec::new();
        }
        self.g.e_preds(v).into_iter().filter(|(s, _)| *s != self.excluded).collect()
    }
}

/// Permuted view: vertex `i` of the view is vertex `perm[i]` of the
/// underlying graph, with [`NO_VERTEX`] marking absent slots.
///
/// Lattice operations use two of these over the common variable set so both
/// operands expose identical vertex numbering.
#[derive(Debug)]
pub struct GraphPerm<'a, G: GraphView> {
    perm: Vec<VertId>,
    inv: Vec<VertId>,
    g: &'a G,
}

impl<'a, G: GraphView> GraphPerm<'a, G> {
    /// View of `g` through `perm` (view index to underlying vertex).
    pub fn new(perm: Vec<VertId>, g: &'a G) -> GraphPerm<'a, G> {
        let mut inv = vec![NO_VERTEX; g.size()];
        for (i, p) in perm.iter().enumerate() {
            if *p != NO_VERTEX {
                debug_assert!(*p < g.size());
                inv[*p] = i;
            }
        }
        GraphPerm { perm, inv, g }
    }

    fn fwd(&self, v: VertId) -> Option<VertId> {
        match self.perm.get(v) {
            Some(&p) if p != NO_VERTEX => Some(p),
            _ => None,
        }
    }
}

impl<G: GraphView> GraphView for GraphPerm<'_, G> {
    fn size(&self) -> usize {
        self.perm.len()
    }

    fn is_vertex(&self, v: VertId) -> bool {
        matches!(self.fwd(v), Some(p) if self.g.is_vertex(p))
    }

    fn verts(&self) -> Vec<VertId> {
        (0..self.perm.len()).filter(|v| self.is_vertex(*v)).collect()
    }

    fn lookup(&self, s: VertId, d: VertId) -> Option<Weight> {
        self.g.lookup(self.fwd(s)?, self.fwd(d)?)
    }

    fn e_succs(&self, v: VertId) -> Vec<(VertId, Weight)> {
        let Some(p) = self.fwd(v) else { return Vec::new() };
        self.g
            .e_succs(p)
            .into_iter()
            .filter_map(|(d, w)| match self.inv[d] {
                NO_VERTEX => None,
                m => Some((m, w)),
            })
            .collect()
    }

    fn e_preds(&self, v: VertId) -> Vec<(VertId, Weight)> {
        let Some(p) = self.fwd(v) else { return Vec::new() };
        self.g
            .e_preds(p)
            .into_iter()
            .filter_map(|(s, w)| match self.inv[s] {
                NO_VERTEX => None,
                m => Some((m, w)),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> WeightedGraph {
        let mut g = WeightedGraph::new();
        let a = g.new_vertex();
        let b = g.new_vertex();
        let c = g.new_vertex();
        let d = g.new_vertex();
        g.add_edge(a, 1, b);
        g.add_edge(a, 2, c);
        g.add_edge(b, 3, d);
        g.add_edge(c, 4, d);
        g
    }

    #[test]
    fn test_update_edge_keeps_min() {
        let mut g = diamond();
        g.update_edge(0, 5, 1);
        assert_eq!(g.lookup(0, 1), Some(1));
        g.update_edge(0, -2, 1);
        assert_eq!(g.lookup(0, 1), Some(-2));
    }

    #[test]
    fn test_forget_and_reuse() {
        let mut g = diamond();
        g.forget(1);
        assert!(!g.is_vertex(1));
        assert_eq!(g.lookup(0, 1), None);
        assert_eq!(g.lookup(1, 3), None);
        assert!(g.preds_of(3) == vec![2]);
        let v = g.new_vertex();
        assert_eq!(v, 1);
        assert!(g.e_succs(v).is_empty());
    }

    #[test]
    fn test_subgraph_hides_vertex() {
        let g = diamond();
        let sub = SubGraph::new(&g, 0);
        assert_eq!(sub.verts(), vec![1, 2, 3]);
        assert_eq!(sub.lookup(0, 1), None);
        assert_eq!(sub.e_preds(1), vec![]);
        assert_eq!(sub.e_preds(3).len(), 2);
    }

    #[test]
    fn test_perm_view() {
        let g = diamond();
        // View exposing only {a, b, d} renumbered as {0, 1, 2}.
        let perm = GraphPerm::new(vec![0, 1, 3], &g);
        assert_eq!(perm.verts(), vec![0, 1, 2]);
        assert_eq!(perm.lookup(0, 1), Some(1));
        assert_eq!(perm.lookup(1, 2), Some(3));
        // a -> c is invisible: c is not in the view.
        assert_eq!(perm.e_succs(0), vec![(1, 1)]);
    }

    #[test]
    fn test_perm_absent_slot() {
        let g = diamond();
        let perm = GraphPerm::new(vec![0, NO_VERTEX, 3], &g);
        assert!(!perm.is_vertex(1));
        assert_eq!(perm.lookup(0, 1), None);
        assert_eq!(perm.verts(), vec![0, 2]);
    }

    #[test]
    fn test_weight_conversion_guard() {
        assert_eq!(weight_of(42), Some(42));
        assert_eq!(weight_of(i64::MAX as Number + 1), None);
        assert_eq!(weight_of(i64::MIN as Number - 1), None);
    }
}
