// SPDX-License-Identifier: GPL-2.0

//! # BPF Analyzer
//!
//! The static-analysis core of an eBPF verifier: control-flow graph
//! construction and simplification, a relational numeric abstract domain
//! (SplitDBM), and a widening/narrowing fixpoint iterator driven by a weak
//! topological ordering.
//!
//! ## Features
//!
//! - **CFG construction**: builds basic blocks from a labeled statement
//!   sequence, prunes unreachable and exit-avoiding blocks, merges
//!   straight-line chains
//! - **SplitDBM domain**: difference constraints and unary bounds in one
//!   potential-normalized weighted digraph, with join, meet, widening and
//!   the transfer primitives of a verifier
//! - **WTO fixpoint**: Bourdoncle ordering with widening at cycle heads and
//!   an interleaved decreasing sequence
//!
//! The instruction set stays outside the core: statements only report how
//! control leaves them, and a caller-supplied [`analysis::Transformer`]
//! gives each statement its abstract semantics.
//!
//! ## Quick Start
//!
//! ```rust
//! use bpf_analyzer::analysis::{build_cfg, run_forward_analyzer, Transformer};
//! use bpf_analyzer::bounds::Interval;
//! use bpf_analyzer::core::types::{Label, Statement, Terminator, Variable};
//! use bpf_analyzer::domain::SplitDbm;
//!
//! #[derive(Debug, Clone)]
//! enum Insn {
//!     Const(Variable, i128),
//!     Exit,
//! }
//!
//! impl Statement for Insn {
//!     fn terminator(&self) -> Terminator {
//!         match self {
//!             Insn::Exit => Terminator::Exit,
//!             _ => Terminator::FallThrough,
//!         }
//!     }
//! }
//!
//! struct ConstDomain;
//!
//! impl Transformer<Insn> for ConstDomain {
//!     fn setup_entry(&self) -> SplitDbm {
//!         SplitDbm::top()
//!     }
//!     fn transfer(&self, state: &mut SplitDbm, stmt: &Insn) {
//!         if let Insn::Const(x, k) = stmt {
//!             state.set(*x, &Interval::constant(*k));
//!         }
//!     }
//! }
//!
//! let prog = vec![
//!     (Label(0), Insn::Const(Variable(0), 0)),
//!     (Label(0), Insn::Exit),
//! ];
//! let cfg = build_cfg(&prog, true).unwrap();
//! let (_pre, post) = run_forward_analyzer(&cfg, &ConstDomain);
//! assert_eq!(post[&cfg.exit()].interval_of(Variable(0)).singleton(), Some(0));
//! ```
//!
//! ## Module Structure
//!
//! - [`core`]: labels, variables, the statement capability trait, errors,
//!   and the statistics sink
//! - [`bounds`]: wide integers, intervals, linear expressions and
//!   constraints
//! - [`domain`]: the weighted digraph, closure algorithms, and the SplitDBM
//!   abstract domain
//! - [`analysis`]: CFG, reverse view, simplifier, WTO, and the forward
//!   fixpoint iterator

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

/// Core types, error definitions, and the statistics sink.
pub mod core;

/// Numeric building blocks: intervals, expressions, constraints.
pub mod bounds;

/// The SplitDBM abstract domain.
pub mod domain;

/// CFG, WTO, and fixpoint iteration.
pub mod analysis;

/// Commonly used types and traits.
pub mod prelude {
    pub use crate::analysis::cfg::{build_cfg, BasicBlock, Cfg, CfgRev, FlowGraph};
    pub use crate::analysis::fixpoint::{run_forward_analyzer, InvariantTable, Transformer};
    pub use crate::analysis::wto::Wto;
    pub use crate::bounds::expr::{LinearConstraint, LinearExpression};
    pub use crate::bounds::interval::{Bound, Interval};
    pub use crate::core::error::{AnalysisError, Result};
    pub use crate::core::types::{Label, Statement, Terminator, Variable};
    pub use crate::domain::split_dbm::SplitDbm;
}

pub use crate::core::error::{AnalysisError, Result};
