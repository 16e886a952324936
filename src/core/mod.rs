// SPDX-License-Identifier: GPL-2.0

//! Core types for the analysis core.
//!
//! This module contains block labels, program variables, the statement
//! capability trait, error definitions, and the statistics sink used
//! throughout the analyzer.

pub mod error;
pub mod stats;
pub mod types;

pub use error::*;
pub use types::*;
