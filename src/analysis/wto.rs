// SPDX-License-Identifier: GPL-2.0

//! Weak topological ordering of a control-flow graph.
//!
//! Bourdoncle's hierarchical decomposition: a sequence of components, each a
//! single vertex or a cycle (a head followed by a nested sequence holding
//! every block on a path back to the head). Non-back edges always go left to
//! right, so a fixpoint iterator that widens at cycle heads visits blocks in
//! a stabilizing order.

use crate::analysis::cfg::FlowGraph;
use crate::core::types::Label;
use core::fmt;
use std::collections::BTreeMap;

/// One component of the ordering.
#[derive(Debug, Clone)]
pub enum WtoComponent {
    /// A single block.
    Vertex(Label),
    /// A cycle: head plus the nested ordering of its body.
    Cycle(WtoCycle),
}

impl WtoComponent {
    /// True when `label` is this component or anywhere inside it.
    pub fn contains(&self, label: Label) -> bool {
        match self {
            WtoComponent::Vertex(l) => *l == label,
            WtoComponent::Cycle(c) => c.contains(label),
        }
    }
}

/// A cycle of the ordering.
#[derive(Debug, Clone)]
pub struct WtoCycle {
    head: Label,
    components: Vec<WtoComponent>,
}

impl WtoCycle {
    /// The widening point of this cycle.
    pub fn head(&self) -> Label {
        self.head
    }

    /// The nested components, in order.
    pub fn components(&self) -> &[WtoComponent] {
        &self.components
    }

    /// True when `label` is the head or lies in the body.
    pub fn contains(&self, label: Label) -> bool {
        self.head == label || self.components.iter().any(|c| c.contains(label))
    }
}

/// Chain of enclosing cycle heads of a label, outermost first.
///
/// The chain of a cycle head names only the cycles strictly enclosing it,
/// not its own.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WtoNesting {
    heads: Vec<Label>,
}

impl WtoNesting {
    /// The head chain, outermost first.
    pub fn heads(&self) -> &[Label] {
        &self.heads
    }

    /// Nesting depth.
    pub fn depth(&self) -> usize {
        self.heads.len()
    }

    /// Strict partial order: `self > other` iff `other`'s chain is a proper
    /// prefix of `self`'s. Chains branching apart are incomparable.
    pub fn is_deeper_than(&self, other: &WtoNesting) -> bool {
        self.heads.len() > other.heads.len() && self.heads[..other.heads.len()] == other.heads[..]
    }
}

/// The weak topological ordering of a graph.
#[derive(Debug, Clone)]
pub struct Wto {
    components: Vec<WtoComponent>,
    nesting: BTreeMap<Label, WtoNesting>,
}

const DFN_DONE: u32 = u32::MAX;

struct WtoBuilder<'a, G: FlowGraph> {
    g: &'a G,
    dfn: BTreeMap<Label, u32>,
    stack: Vec<Label>,
    num: u32,
}

impl<G: FlowGraph> WtoBuilder<'_, G> {
    fn dfn(&self, l: Label) -> u32 {
        self.dfn.get(&l).copied().unwrap_or(0)
    }

    /// Bourdoncle's `visit`: returns the lowest depth-first number reachable
    /// from `v`, appending finished components to `partition` (in reverse;
    /// callers flip the sequence once it is complete).
    fn visit(&mut self, v: Label, partition: &mut Vec<WtoComponent>) -> u32 {
        self.stack.push(v);
        self.num += 1;
        self.dfn.insert(v, self.num);
        let mut head = self.num;
        let mut is_loop = false;

        for succ in self.g.next_nodes(v) {
            let succ_dfn = self.dfn(succ);
            let min = if succ_dfn == 0 {
                self.visit(succ, partition)
            } else {
                succ_dfn
            };
            if min <= head {
                head = min;
                is_loop = true;
            }
        }

        if head == self.dfn(v) {
            self.dfn.insert(v, DFN_DONE);
            let mut element = self.stack.pop().expect("visit stack cannot be empty");
            if is_loop {
                while element != v {
                    // Members re-enter the component construction unvisited.
                    self.dfn.insert(element, 0);
                    element = self.stack.pop().expect("visit stack cannot be empty");
                }
                partition.push(WtoComponent::Cycle(self.component(v)));
            } else {
                partition.push(WtoComponent::Vertex(v));
            }
        }
        head
    }

    /// Build the cycle rooted at `v` by re-visiting its body.
    fn component(&mut self, v: Label) -> WtoCycle {
        let mut body: Vec<WtoComponent> = Vec::new();
        for succ in self.g.next_nodes(v) {
            if self.dfn(succ) == 0 {
                self.visit(succ, &mut body);
            }
        }
        body.reverse();
        WtoCycle {
            head: v,
            components: body,
        }
    }
}

fn assign_nesting(
    components: &[WtoComponent],
    chain: &mut Vec<Label>,
    out: &mut BTreeMap<Label, WtoNesting>,
) {
    for c in components {
        match c {
            WtoComponent::Vertex(l) => {
                out.insert(*l, WtoNesting { heads: chain.clone() });
            }
            WtoComponent::Cycle(cycle) => {
                out.insert(cycle.head(), WtoNesting { heads: chain.clone() });
                chain.push(cycle.head());
                assign_nesting(cycle.components(), chain, out);
                chain.pop();
            }
        }
    }
}

impl Wto {
    /// Compute the ordering of `g` from its entry.
    pub fn new<G: FlowGraph>(g: &G) -> Wto {
        let mut builder = WtoBuilder {
            g,
            dfn: BTreeMap::new(),
            stack: Vec::new(),
            num: 0,
        };
        let mut partition: Vec<WtoComponent> = Vec::new();
        builder.visit(g.entry(), &mut partition);
        partition.reverse();

        let mut nesting = BTreeMap::new();
        let mut chain = Vec::new();
        assign_nesting(&partition, &mut chain, &mut nesting);

        Wto {
            components: partition,
            nesting,
        }
    }

    /// The top-level components, in order.
    pub fn components(&self) -> &[WtoComponent] {
        &self.components
    }

    /// The nesting chain of `label`.
    ///
    /// Labels unreachable from the entry carry an empty chain.
    pub fn nesting(&self, label: Label) -> WtoNesting {
        self.nesting.get(&label).cloned().unwrap_or_default()
    }
}

fn fmt_components(components: &[WtoComponent], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut first = true;
    for c in components {
        if !first {
            write!(f, " ")?;
        }
        first = false;
        match c {
            WtoComponent::Vertex(l) => write!(f, "{}", l)?,
            WtoComponent::Cycle(cycle) => {
                write!(f, "({}", cycle.head())?;
                if !cycle.components().is_empty() {
                    write!(f, " ")?;
                    fmt_components(cycle.components(), f)?;
                }
                write!(f, ")")?;
            }
        }
    }
    Ok(())
}

impl fmt::Display for Wto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_components(&self.components, f)
    }
}
