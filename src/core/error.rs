// SPDX-License-Identifier: GPL-2.0

//! Error types for the analysis core.
//!
//! Only operations whose inputs come from outside the core (the CFG builder)
//! return errors. Infeasibility inside the abstract domain is modeled by the
//! `bottom` state, weight overflow degrades precision silently, and violated
//! internal invariants (missing labels, removal of entry/exit) panic.

use crate::core::types::Label;
use thiserror::Error;

/// Result type alias for analysis operations.
pub type Result<T> = core::result::Result<T, AnalysisError>;

/// Errors raised while building a CFG from an instruction sequence.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalysisError {
    /// The instruction sequence was empty.
    #[error("empty program")]
    EmptyProgram,
    /// A statement jumps to a label that does not start any block.
    #[error("jump to unknown label {0}")]
    InvalidJumpTarget(Label),
    /// The last statement of the program falls through past the end.
    #[error("fall through past the end of the program at label {0}")]
    FallThroughExit(Label),
    /// The same label starts two different blocks of the input sequence.
    #[error("duplicate block label {0}")]
    DuplicateLabel(Label),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            AnalysisError::InvalidJumpTarget(Label(4)).to_string(),
            "jump to unknown label 4"
        );
        assert_eq!(AnalysisError::EmptyProgram.to_string(), "empty program");
    }
}
