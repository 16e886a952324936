// SPDX-License-Identifier: GPL-2.0

//! Interleaved forward fixpoint iteration over a weak topological order.
//!
//! Walks the WTO once; cycles run an increasing sequence (join until the
//! widening delay, then widening) to a post-fixpoint, followed by a
//! decreasing sequence (meet, then narrowing) that claws back precision.
//! The caller supplies the abstract transformer; the iterator never mutates
//! the CFG.

use crate::analysis::cfg::{Cfg, FlowGraph};
use crate::analysis::wto::{Wto, WtoComponent, WtoCycle};
use crate::core::stats;
use crate::core::types::Label;
use crate::domain::split_dbm::SplitDbm;
use std::collections::BTreeMap;

/// Per-statement abstract transformer plus the entry state, supplied by the
/// embedding domain (for eBPF, the register/stack machine semantics).
///
/// `transfer` must be pure apart from mutating its state argument, and total
/// on well-formed statements.
pub trait Transformer<I> {
    /// Abstract state holding at the program entry point.
    fn setup_entry(&self) -> SplitDbm;
    /// Apply one statement to the state in place.
    fn transfer(&self, state: &mut SplitDbm, stmt: &I);
}

/// Invariant table: one abstract state per block.
pub type InvariantTable = BTreeMap<Label, SplitDbm>;

/// Knobs for the fixpoint iteration.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Iterations of plain join on a cycle head before widening kicks in.
    pub widening_delay: u32,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        AnalysisOptions { widening_delay: 1 }
    }
}

struct InterleavedFwdFixpointIterator<'a, I, T: Transformer<I>> {
    cfg: &'a Cfg<I>,
    dom: &'a T,
    pre: InvariantTable,
    post: InvariantTable,
    widening_delay: u32,
    // The walk skips components until it has seen the entry block.
    skip: bool,
}

impl<'a, I, T: Transformer<I>> InterleavedFwdFixpointIterator<'a, I, T> {
    fn new(cfg: &'a Cfg<I>, dom: &'a T, widening_delay: u32) -> Self {
        let mut pre = InvariantTable::new();
        let mut post = InvariantTable::new();
        for label in cfg.labels() {
            pre.insert(label, SplitDbm::bottom());
            post.insert(label, SplitDbm::bottom());
        }
        pre.insert(cfg.entry(), dom.setup_entry());
        InterleavedFwdFixpointIterator {
            cfg,
            dom,
            pre,
            post,
            widening_delay,
            skip: true,
        }
    }

    fn set_pre(&mut self, label: Label, v: SplitDbm) {
        self.pre.insert(label, v);
    }

    fn get_post(&self, label: Label) -> &SplitDbm {
        &self.post[&label]
    }

    fn transform_to_post(&mut self, label: Label, mut pre: SplitDbm) {
        for stmt in self.cfg.get(label).statements() {
            self.dom.transfer(&mut pre, stmt);
        }
        self.post.insert(label, pre);
    }

    fn extrapolate(&self, iteration: u32, before: SplitDbm, after: &SplitDbm) -> SplitDbm {
        if iteration <= self.widening_delay {
            before.join(after)
        } else {
            before.widen(after)
        }
    }

    fn refine(iteration: u32, before: SplitDbm, after: &SplitDbm) -> SplitDbm {
        if iteration == 1 {
            before.meet(after)
        } else {
            before.narrow(after)
        }
    }

    fn join_all_prevs(&self, node: Label) -> SplitDbm {
        let mut res = SplitDbm::bottom();
        for prev in self.cfg.prev_nodes(node) {
            res = res.join(self.get_post(prev));
        }
        res
    }

    fn visit_component(&mut self, wto: &Wto, component: &WtoComponent) {
        match component {
            WtoComponent::Vertex(l) => self.visit_vertex(*l),
            WtoComponent::Cycle(c) => self.visit_cycle(wto, c),
        }
    }

    fn visit_vertex(&mut self, node: Label) {
        if self.skip && node == self.cfg.entry() {
            self.skip = false;
        }
        if self.skip {
            return;
        }

        let pre = if node == self.cfg.entry() {
            self.pre[&node].clone()
        } else {
            self.join_all_prevs(node)
        };
        self.set_pre(node, pre.clone());
        self.transform_to_post(node, pre);
    }

    fn visit_cycle(&mut self, wto: &Wto, cycle: &WtoCycle) {
        let head = cycle.head();

        let mut entry_in_this_cycle = false;
        if self.skip {
            // Analyze the cycle only if the entry hides somewhere inside.
            entry_in_this_cycle = cycle.contains(self.cfg.entry());
            self.skip = !entry_in_this_cycle;
            if self.skip {
                return;
            }
        }

        let mut pre = if entry_in_this_cycle {
            self.pre[&self.cfg.entry()].clone()
        } else {
            // Initial estimate from the predecessors outside the cycle:
            // back-edge sources nest strictly deeper than the head.
            let cycle_nesting = wto.nesting(head);
            let mut pre = SplitDbm::bottom();
            for prev in self.cfg.prev_nodes(head) {
                if !wto.nesting(prev).is_deeper_than(&cycle_nesting) {
                    pre = pre.join(self.get_post(prev));
                }
            }
            pre
        };

        // Increasing sequence with widening.
        let mut iteration = 1u32;
        loop {
            stats::count("fixpoint.cycle_visits");
            self.set_pre(head, pre.clone());
            self.transform_to_post(head, pre.clone());
            for c in cycle.components() {
                self.visit_component(wto, c);
            }
            let new_pre = self.join_all_prevs(head);
            if new_pre.leq(&pre) {
                // Post-fixpoint reached.
                self.set_pre(head, new_pre.clone());
                pre = new_pre;
                break;
            }
            pre = self.extrapolate(iteration, pre, &new_pre);
            iteration += 1;
        }

        // Decreasing sequence with narrowing.
        let mut iteration = 1u32;
        loop {
            self.transform_to_post(head, pre.clone());
            for c in cycle.components() {
                self.visit_component(wto, c);
            }
            let new_pre = self.join_all_prevs(head);
            if pre.leq(&new_pre) {
                // No more refinement possible.
                break;
            }
            pre = Self::refine(iteration, pre, &new_pre);
            self.set_pre(head, pre.clone());
            iteration += 1;
        }
    }
}

/// Run the forward analyzer with default options.
///
/// Returns the per-block pre- and post-state tables.
pub fn run_forward_analyzer<I, T: Transformer<I>>(
    cfg: &Cfg<I>,
    dom: &T,
) -> (InvariantTable, InvariantTable) {
    run_forward_analyzer_with(cfg, dom, &AnalysisOptions::default())
}

/// Run the forward analyzer with explicit options.
pub fn run_forward_analyzer_with<I, T: Transformer<I>>(
    cfg: &Cfg<I>,
    dom: &T,
    options: &AnalysisOptions,
) -> (InvariantTable, InvariantTable) {
    stats::count("fixpoint.runs");
    let wto = Wto::new(cfg);
    let mut analyzer = InterleavedFwdFixpointIterator::new(cfg, dom, options.widening_delay);
    for component in wto.components() {
        analyzer.visit_component(&wto, component);
    }
    (analyzer.pre, analyzer.post)
}
