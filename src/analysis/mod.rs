// SPDX-License-Identifier: GPL-2.0

//! Program analysis passes.
//!
//! This module contains the control-flow graph and its reverse view, the
//! structural simplifier, the weak topological ordering, and the forward
//! fixpoint iterator.

pub mod cfg;
pub mod fixpoint;
pub mod wto;

pub use cfg::*;
pub use fixpoint::*;
pub use wto::*;
