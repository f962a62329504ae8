//! Extraction of linear coefficient maps from constraint expressions

use std::rc::Rc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::expr::tree::{ComparisonOp, Expr, ExprOperation, Relation};

/// Key under which the constant term is stored in the coefficient map
pub const CONSTANT_KEY: &str = "1";

/// Result of peeling negation chains off a product or quotient operand
enum Factor {
    /// A (possibly negated) numeric literal
    Literal(f64),
    /// A variable name together with the accumulated sign
    Variable(String, f64),
    /// Anything else, which makes the enclosing product nonlinear
    Other,
}

/// A constraint expression flattened into `sum(c_i * x_i) + c_0`, where the
/// constant term `c_0` lives in the coefficient map under [`CONSTANT_KEY`].
///
/// For relations the two sides are combined into `lhs - rhs`, so a combination
/// with operator `op` reads `sum(c_i * x_i) + c_0  op  0`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearCombination {
    /// Constant term plus one coefficient per variable, zero entries pruned
    coefficients: IndexMap<String, f64>,
    /// Comparison operator, present when built from a relation
    op: Option<ComparisonOp>,
    /// Whether the majority of variable coefficients came out negative
    flipped: bool,
}

impl LinearCombination {
    /// Flatten a plain expression into a linear combination
    ///
    /// # Parameters
    /// - `expr`: expression to flatten, constant folded before extraction
    ///
    /// # Returns
    /// The linear combination, or a [`LinearError`] if the expression contains
    /// a product of two variables, a variable divisor, or a min/max/abs node
    pub fn from_expression(expr: &Rc<Expr>) -> Result<LinearCombination, LinearError> {
        let folded = expr.fold();
        let mut coefficients: IndexMap<String, f64> = IndexMap::new();
        coefficients.insert(CONSTANT_KEY.to_string(), 0.0);
        Self::collect(&folded, 1.0, &mut coefficients)?;
        Ok(Self::finish(coefficients, None))
    }

    /// Flatten a relation into a linear combination over `lhs - rhs`
    ///
    /// # Parameters
    /// - `relation`: relation to flatten, both sides constant folded first
    ///
    /// # Returns
    /// The linear combination carrying the relation's comparison operator, or
    /// a [`LinearError`] if either side is nonlinear
    pub fn from_relation(relation: &Relation) -> Result<LinearCombination, LinearError> {
        let lhs = relation.lhs.fold();
        let rhs = relation.rhs.fold();
        let mut coefficients: IndexMap<String, f64> = IndexMap::new();
        coefficients.insert(CONSTANT_KEY.to_string(), 0.0);
        Self::collect(&lhs, 1.0, &mut coefficients)?;
        Self::collect(&rhs, -1.0, &mut coefficients)?;
        Ok(Self::finish(coefficients, Some(relation.op)))
    }

    /// Coefficient of `name`, 0 when the variable does not occur
    pub fn coefficient(&self, name: &str) -> f64 {
        self.coefficients.get(name).copied().unwrap_or(0.0)
    }

    /// Constant term of the combination
    pub fn constant(&self) -> f64 {
        self.coefficient(CONSTANT_KEY)
    }

    /// Iterate over the variable entries, skipping the constant term
    pub fn variables(&self) -> impl Iterator<Item = (&str, f64)> {
        self.coefficients
            .iter()
            .filter(|(name, _)| name.as_str() != CONSTANT_KEY)
            .map(|(name, value)| (name.as_str(), *value))
    }

    /// Number of variables with a nonzero coefficient
    pub fn num_variables(&self) -> usize {
        self.coefficients.len() - 1
    }

    /// Comparison operator the combination was built with, if any
    pub fn op(&self) -> Option<ComparisonOp> {
        self.op
    }

    /// Whether the normalized rendering negates all coefficients
    pub fn is_sign_flipped(&self) -> bool {
        self.flipped
    }

    /// Comparison operator of the normalized rendering. Mirrored when the
    /// sign of the combination is flipped, so that `-a - b <= -3` reads as
    /// `a + b >= 3`.
    pub fn normalized_op(&self) -> Option<ComparisonOp> {
        self.op
            .map(|op| if self.flipped { op.mirrored() } else { op })
    }

    /// If the combination pins a single variable, return the variable name
    /// and the pinned value `-c_0 / c_var`. The value is invariant under sign
    /// flips since constant and coefficient negate together.
    pub fn simple_form(&self) -> Option<(String, f64)> {
        if self.num_variables() != 1 {
            return None;
        }
        let (name, coeff) = self.variables().next()?;
        Some((name.to_string(), -self.constant() / coeff))
    }

    /// Rebuild the variable part of the combination as an expression tree.
    /// Variables are emitted in lexicographic order, unit coefficients elide
    /// the multiplication, and negative coefficients chain with subtraction.
    pub fn rebuild_expression(&self) -> Rc<Expr> {
        let mut names: Vec<&str> = self.variables().map(|(name, _)| name).collect();
        names.sort_unstable();

        let mut acc: Option<Rc<Expr>> = None;
        for name in names {
            let coeff = if self.flipped {
                -self.coefficient(name)
            } else {
                self.coefficient(name)
            };
            let magnitude = coeff.abs();
            let term = if magnitude == 1.0 {
                Expr::symbol(name)
            } else {
                Expr::mul(Expr::value(magnitude), Expr::symbol(name))
            };
            acc = Some(match acc {
                None if coeff < 0.0 => Expr::neg(term),
                None => term,
                Some(prev) if coeff < 0.0 => Expr::sub(prev, term),
                Some(prev) => Expr::add(prev, term),
            });
        }
        acc.unwrap_or_else(|| Expr::value(0.0))
    }

    /// Rebuild the full combination, constant term included, with the
    /// coefficients' original signs. Used for tidying standalone expressions
    /// where the sign-flip normalization of [`Self::rebuild_relation`] would
    /// change the value.
    pub fn rebuild_plain(&self) -> Rc<Expr> {
        let mut names: Vec<&str> = self.variables().map(|(name, _)| name).collect();
        names.sort_unstable();

        let mut acc: Option<Rc<Expr>> = None;
        for name in names {
            let coeff = self.coefficient(name);
            let magnitude = coeff.abs();
            let term = if magnitude == 1.0 {
                Expr::symbol(name)
            } else {
                Expr::mul(Expr::value(magnitude), Expr::symbol(name))
            };
            acc = Some(match acc {
                None if coeff < 0.0 => Expr::neg(term),
                None => term,
                Some(prev) if coeff < 0.0 => Expr::sub(prev, term),
                Some(prev) => Expr::add(prev, term),
            });
        }
        let constant = self.constant();
        match acc {
            None => Expr::value(constant),
            Some(sum) if constant < 0.0 => Expr::sub(sum, Expr::value(-constant)),
            Some(sum) if constant > 0.0 => Expr::add(sum, Expr::value(constant)),
            Some(sum) => sum,
        }
    }

    /// Rebuild a normalized relation with the variables on the left and the
    /// negated constant on the right. Returns None when the combination was
    /// built from a plain expression.
    pub fn rebuild_relation(&self) -> Option<Relation> {
        let op = self.normalized_op()?;
        let constant = if self.flipped {
            -self.constant()
        } else {
            self.constant()
        };
        Some(Relation::new(
            self.rebuild_expression(),
            op,
            Expr::value(-constant),
        ))
    }

    /// Wrap an already extracted coefficient map of a `<=`-form row, so stored
    /// standard-form rows can be rendered through [`Self::rebuild_relation`].
    pub(crate) fn leq_row(coefficients: IndexMap<String, f64>) -> LinearCombination {
        Self::finish(coefficients, Some(ComparisonOp::Leq))
    }

    fn finish(
        mut coefficients: IndexMap<String, f64>,
        op: Option<ComparisonOp>,
    ) -> LinearCombination {
        coefficients.retain(|name, value| name.as_str() == CONSTANT_KEY || *value != 0.0);
        if let Some(constant) = coefficients.get_mut(CONSTANT_KEY) {
            if *constant == 0.0 {
                // collapse -0.0
                *constant = 0.0;
            }
        }
        let negatives = coefficients
            .iter()
            .filter(|(name, value)| name.as_str() != CONSTANT_KEY && **value < 0.0)
            .count();
        let positives = coefficients
            .iter()
            .filter(|(name, value)| name.as_str() != CONSTANT_KEY && **value > 0.0)
            .count();
        LinearCombination {
            coefficients,
            op,
            flipped: negatives > positives,
        }
    }

    fn collect(
        expr: &Rc<Expr>,
        sign: f64,
        out: &mut IndexMap<String, f64>,
    ) -> Result<(), LinearError> {
        match &**expr {
            Expr::Value(value) => {
                *out.entry(CONSTANT_KEY.to_string()).or_insert(0.0) += sign * value;
            }
            Expr::Symbol(name) => {
                *out.entry(name.clone()).or_insert(0.0) += sign;
            }
            Expr::Operation(operation) => match operation {
                ExprOperation::Add { left, right } => {
                    Self::collect(left, sign, out)?;
                    Self::collect(right, sign, out)?;
                }
                ExprOperation::Sub { left, right } => {
                    Self::collect(left, sign, out)?;
                    Self::collect(right, -sign, out)?;
                }
                ExprOperation::Neg { val } => {
                    Self::collect(val, -sign, out)?;
                }
                ExprOperation::Mul { left, right } => {
                    match (Self::factor(left), Self::factor(right)) {
                        (Factor::Literal(a), Factor::Literal(b)) => {
                            *out.entry(CONSTANT_KEY.to_string()).or_insert(0.0) += sign * a * b;
                        }
                        (Factor::Literal(lit), Factor::Variable(name, var_sign))
                        | (Factor::Variable(name, var_sign), Factor::Literal(lit)) => {
                            *out.entry(name).or_insert(0.0) += sign * var_sign * lit;
                        }
                        _ => return Err(LinearError::Nonlinear(expr.to_string())),
                    }
                }
                ExprOperation::Div { left, right } => {
                    let divisor = match Self::factor(right) {
                        Factor::Literal(divisor) => divisor,
                        _ => return Err(LinearError::Nonlinear(expr.to_string())),
                    };
                    match Self::factor(left) {
                        Factor::Literal(lit) => {
                            *out.entry(CONSTANT_KEY.to_string()).or_insert(0.0) +=
                                sign * lit / divisor;
                        }
                        Factor::Variable(name, var_sign) => {
                            *out.entry(name).or_insert(0.0) += sign * var_sign / divisor;
                        }
                        Factor::Other => return Err(LinearError::Nonlinear(expr.to_string())),
                    }
                }
                ExprOperation::Min { .. } | ExprOperation::Max { .. } | ExprOperation::Abs { .. } => {
                    return Err(LinearError::Nonlinear(expr.to_string()));
                }
            },
        }
        Ok(())
    }

    fn factor(expr: &Rc<Expr>) -> Factor {
        let mut sign = 1.0;
        let mut node = expr;
        while let Expr::Operation(ExprOperation::Neg { val }) = &**node {
            sign = -sign;
            node = val;
        }
        match &**node {
            Expr::Value(value) => Factor::Literal(sign * value),
            Expr::Symbol(name) => Factor::Variable(name.clone(), sign),
            _ => Factor::Other,
        }
    }
}

/// Enum representing linearity errors
#[derive(Debug, Error, PartialEq, Clone)]
pub enum LinearError {
    /// Expression contains a construct outside `sum(c_i * x_i) + c_0`
    #[error("Expression is not linear: {0}")]
    Nonlinear(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::parse_relation;

    #[test]
    fn test_coefficient_extraction() {
        let relation = parse_relation("2*a - b/2 + 1 <= 3").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        assert_eq!(combination.coefficient("a"), 2.0);
        assert_eq!(combination.coefficient("b"), -0.5);
        assert_eq!(combination.constant(), -2.0);
        assert_eq!(combination.op(), Some(ComparisonOp::Leq));
        assert!(!combination.is_sign_flipped());
    }

    #[test]
    fn test_simple_form() {
        let relation = parse_relation("v1 = 3").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        match combination.simple_form() {
            Some((name, value)) => {
                assert_eq!(name, "v1");
                assert_eq!(value, 3.0);
            }
            None => panic!("v1 = 3 should have a simple form"),
        }
        // scaled version pins the same value
        let relation = parse_relation("2*v1 = 6").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        assert_eq!(combination.simple_form(), Some(("v1".to_string(), 3.0)));
    }

    #[test]
    fn test_sign_flip_normalization() {
        let relation = parse_relation("-a - b <= -3").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        assert!(combination.is_sign_flipped());
        assert_eq!(combination.coefficient("a"), -1.0);
        assert_eq!(combination.normalized_op(), Some(ComparisonOp::Geq));
        let rebuilt = combination.rebuild_relation().unwrap();
        assert_eq!(format!("{}", rebuilt), "(a + b) >= 3");
    }

    #[test]
    fn test_cancelled_variables_are_pruned() {
        let relation = parse_relation("v - v + w = 1").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        assert_eq!(combination.num_variables(), 1);
        assert_eq!(combination.coefficient("w"), 1.0);
        assert_eq!(combination.coefficient("v"), 0.0);
    }

    #[test]
    fn test_nonlinear_product_rejected() {
        let relation = parse_relation("a * b = 1").unwrap();
        match LinearCombination::from_relation(&relation) {
            Err(LinearError::Nonlinear(_)) => {}
            _ => panic!("a * b should not be linear"),
        }
    }

    #[test]
    fn test_variable_divisor_rejected() {
        let relation = parse_relation("1 / a = 1").unwrap();
        match LinearCombination::from_relation(&relation) {
            Err(LinearError::Nonlinear(_)) => {}
            _ => panic!("1 / a should not be linear"),
        }
    }

    #[test]
    fn test_negated_factors() {
        let relation = parse_relation("-2 * -a - -b = 0").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        assert_eq!(combination.coefficient("a"), 2.0);
        assert_eq!(combination.coefficient("b"), 1.0);
    }

    #[test]
    fn test_rebuild_expression() {
        let relation = parse_relation("2*a - b/2 + 1 <= 3").unwrap();
        let combination = LinearCombination::from_relation(&relation).unwrap();
        let rebuilt = combination.rebuild_relation().unwrap();
        assert_eq!(format!("{}", rebuilt), "((2 * a) - (0.5 * b)) <= 2");
    }

    #[test]
    fn test_rebuild_plain_keeps_signs_and_constant() {
        let expression = crate::expr::parse_expression("1 - b - a").unwrap();
        let combination = LinearCombination::from_expression(&expression).unwrap();
        // the normalized relation form would flip the majority-negative signs
        assert!(combination.is_sign_flipped());
        let rebuilt = combination.rebuild_plain();
        assert_eq!(format!("{}", rebuilt), "(((-a) - b) + 1)");
        let mut symbols = IndexMap::new();
        symbols.insert("a".to_string(), 2.0);
        symbols.insert("b".to_string(), 2.0);
        assert_eq!(rebuilt.evaluate(&symbols), Ok(-3.0));
    }

    #[test]
    fn test_rebuild_plain_constant_only() {
        let expression = crate::expr::parse_expression("2 + 3").unwrap();
        let combination = LinearCombination::from_expression(&expression).unwrap();
        assert_eq!(format!("{}", combination.rebuild_plain()), "5");
    }
}
