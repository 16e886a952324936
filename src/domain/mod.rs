// SPDX-License-Identifier: GPL-2.0

//! The SplitDBM relational abstract domain and its graph machinery.
//!
//! This module contains the weighted digraph, the shortest-path closure and
//! potential-maintenance algorithms, and the domain itself with its lattice
//! and transfer operations.

pub mod graph;
pub mod graph_ops;
pub mod split_dbm;

pub use graph::*;
pub use split_dbm::*;
