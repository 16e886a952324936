// SPDX-License-Identifier: GPL-2.0

//! Linear expressions and constraints over program variables.
//!
//! An expression is `sum(c_i * v_i) + c0`; a constraint compares an
//! expression against zero. These are the currency between the caller's
//! transfer functions and the DBM domain, which extracts difference and
//! unary bounds from them.

use crate::bounds::interval::Number;
use crate::core::types::Variable;
use core::fmt;
use std::collections::BTreeMap;

/// A linear expression `sum(c_i * v_i) + c0` with wide integer coefficients.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LinearExpression {
    terms: BTreeMap<Variable, Number>,
    constant: Number,
}

impl LinearExpression {
    /// The constant expression `n`.
    pub fn constant(n: Number) -> LinearExpression {
        LinearExpression {
            terms: BTreeMap::new(),
            constant: n,
        }
    }

    /// The expression `v`.
    pub fn variable(v: Variable) -> LinearExpression {
        LinearExpression::default().plus_term(v, 1)
    }

    /// Add `c * v`; zero coefficients are dropped.
    pub fn plus_term(mut self, v: Variable, c: Number) -> LinearExpression {
        let coeff = self.terms.get(&v).copied().unwrap_or(0) + c;
        if coeff == 0 {
            self.terms.remove(&v);
        } else {
            self.terms.insert(v, coeff);
        }
        self
    }

    /// Add a constant.
    pub fn plus_constant(mut self, n: Number) -> LinearExpression {
        self.constant += n;
        self
    }

    /// Sum of two expressions.
    pub fn add(&self, other: &LinearExpression) -> LinearExpression {
        let mut out = self.clone();
        for (v, c) in &other.terms {
            out = out.plus_term(*v, *c);
        }
        out.constant += other.constant;
        out
    }

    /// Negated expression.
    pub fn negate(&self) -> LinearExpression {
        self.scaled(-1)
    }

    /// The expression multiplied by `k`.
    pub fn scaled(&self, k: Number) -> LinearExpression {
        if k == 0 {
            return LinearExpression::default();
        }
        LinearExpression {
            terms: self.terms.iter().map(|(v, c)| (*v, c * k)).collect(),
            constant: self.constant * k,
        }
    }

    /// The constant part.
    pub fn constant_term(&self) -> Number {
        self.constant
    }

    /// Iterate variable terms in variable order.
    pub fn terms(&self) -> impl Iterator<Item = (Variable, Number)> + '_ {
        self.terms.iter().map(|(v, c)| (*v, *c))
    }

    /// Coefficient of `v` (zero if absent).
    pub fn coefficient_of(&self, v: Variable) -> Number {
        self.terms.get(&v).copied().unwrap_or(0)
    }

    /// True when no variable occurs.
    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }
}

impl fmt::Display for LinearExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (v, c) in &self.terms {
            if first {
                match *c {
                    1 => write!(f, "{}", v)?,
                    -1 => write!(f, "-{}", v)?,
                    c => write!(f, "{}*{}", c, v)?,
                }
                first = false;
            } else if *c < 0 {
                if *c == -1 {
                    write!(f, " - {}", v)?;
                } else {
                    write!(f, " - {}*{}", -c, v)?;
                }
            } else if *c == 1 {
                write!(f, " + {}", v)?;
            } else {
                write!(f, " + {}*{}", c, v)?;
            }
        }
        if first {
            write!(f, "{}", self.constant)?;
        } else if self.constant > 0 {
            write!(f, " + {}", self.constant)?;
        } else if self.constant < 0 {
            write!(f, " - {}", -self.constant)?;
        }
        Ok(())
    }
}

/// How a constraint compares its expression against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `e <= 0`.
    Inequality,
    /// `e < 0`.
    StrictInequality,
    /// `e == 0`.
    Equality,
    /// `e != 0`.
    Disequation,
}

/// A linear constraint `e (op) 0`, tagged with its signedness.
///
/// Unsigned inequalities are carried so callers can express them, but the
/// DBM domain skips them (documented precision loss).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinearConstraint {
    expr: LinearExpression,
    kind: ConstraintKind,
    signed: bool,
}

impl LinearConstraint {
    /// Build a constraint from parts.
    pub fn new(expr: LinearExpression, kind: ConstraintKind, signed: bool) -> LinearConstraint {
        LinearConstraint { expr, kind, signed }
    }

    /// Signed `e <= 0`.
    pub fn le_zero(expr: LinearExpression) -> LinearConstraint {
        LinearConstraint::new(expr, ConstraintKind::Inequality, true)
    }

    /// Signed `e < 0`.
    pub fn lt_zero(expr: LinearExpression) -> LinearConstraint {
        LinearConstraint::new(expr, ConstraintKind::StrictInequality, true)
    }

    /// `e == 0`.
    pub fn eq_zero(expr: LinearExpression) -> LinearConstraint {
        LinearConstraint::new(expr, ConstraintKind::Equality, true)
    }

    /// `e != 0`.
    pub fn ne_zero(expr: LinearExpression) -> LinearConstraint {
        LinearConstraint::new(expr, ConstraintKind::Disequation, true)
    }

    /// The compared expression.
    pub fn expression(&self) -> &LinearExpression {
        &self.expr
    }

    /// The comparison kind.
    pub fn kind(&self) -> ConstraintKind {
        self.kind
    }

    /// True for signed comparisons.
    pub fn is_signed(&self) -> bool {
        self.signed
    }

    /// True for `<=` constraints.
    pub fn is_inequality(&self) -> bool {
        self.kind == ConstraintKind::Inequality
    }

    /// True for `<` constraints.
    pub fn is_strict_inequality(&self) -> bool {
        self.kind == ConstraintKind::StrictInequality
    }

    /// True for `==` constraints.
    pub fn is_equality(&self) -> bool {
        self.kind == ConstraintKind::Equality
    }

    /// True for `!=` constraints.
    pub fn is_disequation(&self) -> bool {
        self.kind == ConstraintKind::Disequation
    }

    fn constant_holds(&self) -> bool {
        let c = self.expr.constant_term();
        match self.kind {
            ConstraintKind::Inequality => c <= 0,
            ConstraintKind::StrictInequality => c < 0,
            ConstraintKind::Equality => c == 0,
            ConstraintKind::Disequation => c != 0,
        }
    }

    /// True when the constraint holds for every assignment.
    pub fn is_tautology(&self) -> bool {
        self.expr.is_constant() && self.constant_holds()
    }

    /// True when the constraint holds for no assignment.
    pub fn is_contradiction(&self) -> bool {
        self.expr.is_constant() && !self.constant_holds()
    }
}

impl fmt::Display for LinearConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.kind {
            ConstraintKind::Inequality => "<=",
            ConstraintKind::StrictInequality => "<",
            ConstraintKind::Equality => "==",
            ConstraintKind::Disequation => "!=",
        };
        write!(f, "{} {} 0", self.expr, op)?;
        if !self.signed {
            write!(f, " (unsigned)")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_merging() {
        let e = LinearExpression::variable(Variable(1))
            .plus_term(Variable(1), 2)
            .plus_term(Variable(2), -1)
            .plus_constant(4);
        assert_eq!(e.coefficient_of(Variable(1)), 3);
        assert_eq!(e.coefficient_of(Variable(2)), -1);
        assert_eq!(e.constant_term(), 4);
    }

    #[test]
    fn test_zero_coefficients_dropped() {
        let e = LinearExpression::variable(Variable(1)).plus_term(Variable(1), -1);
        assert!(e.is_constant());
    }

    #[test]
    fn test_negate_roundtrip() {
        let e = LinearExpression::variable(Variable(0))
            .plus_term(Variable(3), -2)
            .plus_constant(7);
        assert_eq!(e.negate().negate(), e);
    }

    #[test]
    fn test_tautology_contradiction() {
        assert!(LinearConstraint::le_zero(LinearExpression::constant(-1)).is_tautology());
        assert!(LinearConstraint::le_zero(LinearExpression::constant(1)).is_contradiction());
        assert!(LinearConstraint::eq_zero(LinearExpression::constant(0)).is_tautology());
        assert!(LinearConstraint::ne_zero(LinearExpression::constant(0)).is_contradiction());
        let e = LinearExpression::variable(Variable(1));
        assert!(!LinearConstraint::le_zero(e).is_tautology());
    }

    #[test]
    fn test_display() {
        let e = LinearExpression::variable(Variable(1))
            .plus_term(Variable(2), -3)
            .plus_constant(-5);
        assert_eq!(e.to_string(), "v1 - 3*v2 - 5");
        assert_eq!(LinearConstraint::le_zero(e).to_string(), "v1 - 3*v2 - 5 <= 0");
    }
}
