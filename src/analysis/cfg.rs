// SPDX-License-Identifier: GPL-2.0

//! Control-flow graph over caller-supplied statements.
//!
//! Blocks reference each other by label only; edges are mutated exclusively
//! through [`Cfg::connect`]/[`Cfg::disconnect`], which keep the predecessor
//! and successor sets symmetric. Lookups of absent labels are programming
//! errors and panic: the graph is built and consumed inside the analyzer.

use crate::core::error::{AnalysisError, Result};
use crate::core::types::{Label, Statement, Terminator};
use std::collections::{BTreeMap, BTreeSet};

/// A basic block: a label, its statements, and its neighbor label sets.
#[derive(Debug, Clone)]
pub struct BasicBlock<I> {
    label: Label,
    stmts: Vec<I>,
    prev: BTreeSet<Label>,
    next: BTreeSet<Label>,
}

impl<I> BasicBlock<I> {
    fn new(label: Label) -> BasicBlock<I> {
        BasicBlock {
            label,
            stmts: Vec::new(),
            prev: BTreeSet::new(),
            next: BTreeSet::new(),
        }
    }

    /// The block's label.
    pub fn label(&self) -> Label {
        self.label
    }

    /// Append a statement.
    pub fn insert(&mut self, stmt: I) {
        self.stmts.push(stmt);
    }

    /// The statements in execution order.
    pub fn statements(&self) -> &[I] {
        &self.stmts
    }

    /// Successor labels, in label order.
    pub fn next_blocks(&self) -> &BTreeSet<Label> {
        &self.next
    }

    /// Predecessor labels, in label order.
    pub fn prev_blocks(&self) -> &BTreeSet<Label> {
        &self.prev
    }

    /// Number of predecessors.
    pub fn in_degree(&self) -> usize {
        self.prev.len()
    }

    /// Number of successors.
    pub fn out_degree(&self) -> usize {
        self.next.len()
    }

    /// Number of statements.
    pub fn size(&self) -> usize {
        self.stmts.len()
    }
}

/// View of a basic block with its statements reversed, for backward walks.
#[derive(Debug)]
pub struct BasicBlockRev<'a, I> {
    bb: &'a BasicBlock<I>,
}

impl<'a, I> BasicBlockRev<'a, I> {
    /// The underlying block's label.
    pub fn label(&self) -> Label {
        self.bb.label()
    }

    /// Statements in reverse execution order.
    pub fn statements(&self) -> impl Iterator<Item = &'a I> {
        self.bb.stmts.iter().rev()
    }

    /// Successors of the reversed block (the block's predecessors).
    pub fn next_blocks(&self) -> &BTreeSet<Label> {
        &self.bb.prev
    }

    /// Predecessors of the reversed block (the block's successors).
    pub fn prev_blocks(&self) -> &BTreeSet<Label> {
        &self.bb.next
    }

    /// Number of statements.
    pub fn size(&self) -> usize {
        self.bb.size()
    }
}

/// Directed-graph capabilities shared by the CFG and its reverse view, so
/// reachability and ordering algorithms run on either.
pub trait FlowGraph {
    /// Start label of this orientation.
    fn entry(&self) -> Label;
    /// End label of this orientation.
    fn exit(&self) -> Label;
    /// Snapshot of the successor labels of `label`.
    fn next_nodes(&self, label: Label) -> Vec<Label>;
    /// Snapshot of the predecessor labels of `label`.
    fn prev_nodes(&self, label: Label) -> Vec<Label>;
    /// All labels of the graph.
    fn labels(&self) -> Vec<Label>;
}

/// Labels reachable from the entry of `g`.
fn mark_alive_blocks<G: FlowGraph>(g: &G) -> BTreeSet<Label> {
    let mut alive = BTreeSet::new();
    let mut stack = vec![g.entry()];
    while let Some(l) = stack.pop() {
        if !alive.insert(l) {
            continue;
        }
        for n in g.next_nodes(l) {
            if !alive.contains(&n) {
                stack.push(n);
            }
        }
    }
    alive
}

/// Control-flow graph.
#[derive(Debug, Clone)]
pub struct Cfg<I> {
    entry: Label,
    exit: Label,
    blocks: BTreeMap<Label, BasicBlock<I>>,
}

impl<I> Cfg<I> {
    /// New graph holding just the entry and exit blocks.
    pub fn new(entry: Label, exit: Label) -> Cfg<I> {
        let mut blocks = BTreeMap::new();
        blocks.insert(entry, BasicBlock::new(entry));
        blocks.entry(exit).or_insert_with(|| BasicBlock::new(exit));
        Cfg {
            entry,
            exit,
            blocks,
        }
    }

    /// The entry label.
    pub fn entry(&self) -> Label {
        self.entry
    }

    /// The exit label.
    pub fn exit(&self) -> Label {
        self.exit
    }

    /// The block at `label`; panics when absent.
    pub fn get(&self, label: Label) -> &BasicBlock<I> {
        match self.blocks.get(&label) {
            Some(bb) => bb,
            None => panic!("basic block {} not found in the CFG", label),
        }
    }

    /// Mutable block at `label`; panics when absent.
    pub fn get_mut(&mut self, label: Label) -> &mut BasicBlock<I> {
        match self.blocks.get_mut(&label) {
            Some(bb) => bb,
            None => panic!("basic block {} not found in the CFG", label),
        }
    }

    /// The block at `label`, creating an empty one if needed.
    pub fn insert(&mut self, label: Label) -> &mut BasicBlock<I> {
        self.blocks.entry(label).or_insert_with(|| BasicBlock::new(label))
    }

    /// Add the edge `a -> b`. Repeated connects are no-ops.
    pub fn connect(&mut self, a: Label, b: Label) {
        // Validate both endpoints before touching either set.
        let _ = self.get(a);
        let _ = self.get(b);
        self.blocks.get_mut(&a).unwrap().next.insert(b);
        self.blocks.get_mut(&b).unwrap().prev.insert(a);
    }

    /// Remove the edge `a -> b` if present.
    pub fn disconnect(&mut self, a: Label, b: Label) {
        let _ = self.get(a);
        let _ = self.get(b);
        self.blocks.get_mut(&a).unwrap().next.remove(&b);
        self.blocks.get_mut(&b).unwrap().prev.remove(&a);
    }

    /// Remove a block and all its incident edges.
    ///
    /// Removing the entry or exit block is a programming error.
    pub fn remove(&mut self, label: Label) {
        if label == self.entry {
            panic!("cannot remove entry block");
        }
        if label == self.exit {
            panic!("cannot remove exit block");
        }
        let bb = self.get(label);
        let preds: Vec<Label> = bb.prev.iter().copied().filter(|p| *p != label).collect();
        let succs: Vec<Label> = bb.next.iter().copied().filter(|s| *s != label).collect();
        for p in preds {
            self.disconnect(p, label);
        }
        for s in succs {
            self.disconnect(label, s);
        }
        self.blocks.remove(&label);
    }

    /// All labels, in label order.
    pub fn labels(&self) -> Vec<Label> {
        self.blocks.keys().copied().collect()
    }

    /// Labels in their natural total order.
    pub fn sorted_labels(&self) -> Vec<Label> {
        self.labels()
    }

    /// Number of blocks.
    pub fn size(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate blocks in label order.
    pub fn iter(&self) -> impl Iterator<Item = &BasicBlock<I>> {
        self.blocks.values()
    }

    /// Pre-order depth-first walk from the entry; each block visited once,
    /// successors taken in label order.
    pub fn dfs(&self, mut f: impl FnMut(&BasicBlock<I>)) {
        let mut visited = BTreeSet::new();
        let mut stack = vec![self.entry];
        while let Some(l) = stack.pop() {
            if !visited.insert(l) {
                continue;
            }
            let bb = self.get(l);
            f(bb);
            for n in bb.next.iter().rev() {
                if !visited.contains(n) {
                    stack.push(*n);
                }
            }
        }
    }

    /// Structural simplification: drop blocks unreachable from the entry,
    /// drop blocks that cannot reach the exit, then merge maximal
    /// straight-line chains.
    pub fn simplify(&mut self) {
        self.remove_unreachable_blocks();
        self.remove_useless_blocks();
        self.merge_chains();
    }

    fn remove_unreachable_blocks(&mut self) {
        let alive = mark_alive_blocks(self);
        let dead: Vec<Label> = self.labels().into_iter().filter(|l| !alive.contains(l)).collect();
        if dead.contains(&self.exit) {
            panic!("exit block must be reachable");
        }
        for l in dead {
            self.remove(l);
        }
    }

    fn remove_useless_blocks(&mut self) {
        let useful = {
            let rev = CfgRev::new(self);
            mark_alive_blocks(&rev)
        };
        if !useful.contains(&self.exit) {
            panic!("exit block must be reachable");
        }
        let useless: Vec<Label> = self.labels().into_iter().filter(|l| !useful.contains(l)).collect();
        for l in useless {
            self.remove(l);
        }
    }

    fn merge_chains(&mut self) {
        let mut worklist: BTreeSet<Label> = self.blocks.keys().copied().collect();
        while let Some(&label) = worklist.iter().next() {
            worklist.remove(&label);

            // A block with a unique parent that has a unique child will be
            // spliced into that parent when its turn comes.
            let bb = self.get(label);
            if bb.in_degree() == 1 {
                let parent = *bb.prev.iter().next().unwrap();
                if self.get(parent).out_degree() == 1 {
                    continue;
                }
            }

            loop {
                let bb = self.get(label);
                if bb.out_degree() != 1 {
                    break;
                }
                let next_label = *bb.next.iter().next().unwrap();
                if next_label == label || self.get(next_label).in_degree() != 1 {
                    break;
                }
                worklist.remove(&next_label);

                if next_label == self.exit {
                    self.exit = label;
                }

                let spliced = std::mem::take(&mut self.get_mut(next_label).stmts);
                self.get_mut(label).stmts.extend(spliced);
                self.disconnect(label, next_label);
                let children: Vec<Label> =
                    self.get(next_label).next.iter().copied().collect();
                for c in children {
                    self.connect(label, c);
                }
                self.remove(next_label);
            }
        }
    }
}

impl<I> FlowGraph for Cfg<I> {
    fn entry(&self) -> Label {
        self.entry
    }

    fn exit(&self) -> Label {
        self.exit
    }

    fn next_nodes(&self, label: Label) -> Vec<Label> {
        self.get(label).next.iter().copied().collect()
    }

    fn prev_nodes(&self, label: Label) -> Vec<Label> {
        self.get(label).prev.iter().copied().collect()
    }

    fn labels(&self) -> Vec<Label> {
        self.labels()
    }
}

/// Read-only view of a CFG with every edge and every block's statement
/// order reversed; entry and exit swap roles.
#[derive(Debug)]
pub struct CfgRev<'a, I> {
    cfg: &'a Cfg<I>,
}

impl<'a, I> CfgRev<'a, I> {
    /// Reverse view of `cfg`.
    pub fn new(cfg: &'a Cfg<I>) -> CfgRev<'a, I> {
        CfgRev { cfg }
    }

    /// The reversed block at `label`; panics when absent.
    pub fn get(&self, label: Label) -> BasicBlockRev<'a, I> {
        BasicBlockRev {
            bb: self.cfg.get(label),
        }
    }
}

impl<I> FlowGraph for CfgRev<'_, I> {
    fn entry(&self) -> Label {
        self.cfg.exit()
    }

    fn exit(&self) -> Label {
        self.cfg.entry()
    }

    fn next_nodes(&self, label: Label) -> Vec<Label> {
        self.cfg.prev_nodes(label)
    }

    fn prev_nodes(&self, label: Label) -> Vec<Label> {
        self.cfg.next_nodes(label)
    }

    fn labels(&self) -> Vec<Label> {
        self.cfg.labels()
    }
}

/// Build a CFG from a labeled statement sequence.
///
/// Consecutive statements with the same label form one block; the last
/// statement of each block decides its out-edges. `Exit` terminators connect
/// to the dedicated [`Label::EXIT`] block. With `simplify`, the structural
/// simplification pass runs before returning.
pub fn build_cfg<I: Statement>(prog: &[(Label, I)], simplify: bool) -> Result<Cfg<I>> {
    if prog.is_empty() {
        return Err(AnalysisError::EmptyProgram);
    }

    // Group the sequence into blocks, rejecting label restarts.
    let mut order: Vec<Label> = Vec::new();
    let mut body: BTreeMap<Label, Vec<I>> = BTreeMap::new();
    for (label, stmt) in prog {
        match order.last() {
            Some(last) if last == label => {}
            _ => {
                if body.contains_key(label) {
                    return Err(AnalysisError::DuplicateLabel(*label));
                }
                order.push(*label);
                body.insert(*label, Vec::new());
            }
        }
        body.get_mut(label).unwrap().push(stmt.clone());
    }

    let entry = order[0];
    let mut cfg = Cfg::new(entry, Label::EXIT);
    for label in &order {
        let bb = cfg.insert(*label);
        for stmt in body.remove(label).unwrap() {
            bb.insert(stmt);
        }
    }

    let known: BTreeSet<Label> = order.iter().copied().collect();
    for (idx, label) in order.iter().enumerate() {
        let last = cfg
            .get(*label)
            .statements()
            .last()
            .expect("blocks are built non-empty")
            .terminator();
        let fall_through = |cfg: &mut Cfg<I>| -> Result<()> {
            match order.get(idx + 1) {
                Some(next) => {
                    cfg.connect(*label, *next);
                    Ok(())
                }
                None => Err(AnalysisError::FallThroughExit(*label)),
            }
        };
        match last {
            Terminator::FallThrough => fall_through(&mut cfg)?,
            Terminator::Goto(t) => {
                if !known.contains(&t) {
                    return Err(AnalysisError::InvalidJumpTarget(t));
                }
                cfg.connect(*label, t);
            }
            Terminator::Branch(t) => {
                if !known.contains(&t) {
                    return Err(AnalysisError::InvalidJumpTarget(t));
                }
                cfg.connect(*label, t);
                fall_through(&mut cfg)?;
            }
            Terminator::Exit => {
                cfg.connect(*label, Label::EXIT);
            }
        }
    }

    if simplify {
        cfg.simplify();
    }
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Nop(u32);

    impl Statement for Nop {
        fn terminator(&self) -> Terminator {
            Terminator::FallThrough
        }
    }

    fn chain_cfg() -> Cfg<Nop> {
        // 0 -> 1 -> 2, entry 0, exit 2.
        let mut cfg = Cfg::new(Label(0), Label(2));
        cfg.insert(Label(1)).insert(Nop(1));
        cfg.get_mut(Label(0)).insert(Nop(0));
        cfg.get_mut(Label(2)).insert(Nop(2));
        cfg.connect(Label(0), Label(1));
        cfg.connect(Label(1), Label(2));
        cfg
    }

    fn assert_symmetric<I>(cfg: &Cfg<I>) {
        for bb in cfg.iter() {
            for s in bb.next_blocks() {
                assert!(cfg.get(*s).prev_blocks().contains(&bb.label()));
            }
            for p in bb.prev_blocks() {
                assert!(cfg.get(*p).next_blocks().contains(&bb.label()));
            }
        }
    }

    #[test]
    fn test_connect_disconnect_symmetry() {
        let mut cfg = chain_cfg();
        assert_symmetric(&cfg);
        cfg.connect(Label(0), Label(1));
        assert_eq!(cfg.get(Label(0)).out_degree(), 1);
        cfg.disconnect(Label(0), Label(1));
        assert!(cfg.get(Label(1)).prev_blocks().is_empty());
        assert_symmetric(&cfg);
    }

    #[test]
    fn test_straight_line_merge() {
        let mut cfg = chain_cfg();
        cfg.simplify();
        assert_eq!(cfg.size(), 1);
        assert_eq!(cfg.entry(), Label(0));
        assert_eq!(cfg.exit(), Label(0));
        let bb = cfg.get(Label(0));
        assert_eq!(bb.statements(), &[Nop(0), Nop(1), Nop(2)]);
    }

    #[test]
    fn test_simplify_idempotent() {
        let mut cfg = chain_cfg();
        cfg.simplify();
        let labels = cfg.labels();
        let stmts = cfg.get(cfg.entry()).statements().to_vec();
        cfg.simplify();
        assert_eq!(cfg.labels(), labels);
        assert_eq!(cfg.get(cfg.entry()).statements(), &stmts[..]);
    }

    #[test]
    #[should_panic(expected = "cannot remove entry block")]
    fn test_remove_entry_panics() {
        let mut cfg = chain_cfg();
        cfg.remove(Label(0));
    }

    #[test]
    #[should_panic(expected = "not found in the CFG")]
    fn test_missing_label_panics() {
        let cfg = chain_cfg();
        cfg.get(Label(9));
    }

    #[test]
    fn test_dfs_preorder() {
        let cfg = chain_cfg();
        let mut seen = Vec::new();
        cfg.dfs(|bb| seen.push(bb.label()));
        assert_eq!(seen, vec![Label(0), Label(1), Label(2)]);
    }

    #[test]
    fn test_reverse_view() {
        let cfg = chain_cfg();
        let rev = CfgRev::new(&cfg);
        assert_eq!(rev.entry(), Label(2));
        assert_eq!(rev.exit(), Label(0));
        assert_eq!(rev.next_nodes(Label(2)), vec![Label(1)]);
        let stmts: Vec<u32> = rev.get(Label(0)).statements().map(|n| n.0).collect();
        assert_eq!(stmts, vec![0]);
    }
}
