//! Module for parsing constraint strings into expression trees

use std::rc::Rc;

use thiserror::Error;

use crate::expr::lexer::LexerError;
use crate::expr::parser::ParseError;
use crate::expr::tree::{Expr, Relation};

mod lexer;
pub mod linear;
pub mod parser;
mod token;
pub mod tree;

/// Parse a constraint string into a relation tree
///
/// # Parameters
/// - `input`: &str holding the constraint, e.g. `"v_upt = 1.5"` or
///   `"2*v1 - v2 <= 10"`
///
/// # Returns
/// Parse result which is
/// - `Ok`: The [`Relation`] with the comparison operator at the root.
/// - `Err`: Returns the ExprParseError describing the issue with the
///     constraint string which was being parsed.
///
/// # Examples
/// ```rust
/// use fluxion_core::expr::parse_relation;
/// let relation = parse_relation("2*v1 - v2 <= 10").unwrap();
/// assert_eq!(format!("{}", relation), "((2 * v1) - v2) <= 10");
/// ```
pub fn parse_relation(input: &str) -> Result<Relation, ExprParseError> {
    // Start by creating a lexer
    let mut lexer = lexer::Lexer::new(input);
    // Convert the constraint string into tokens
    let tokens = lexer.scan_tokens()?;

    // Now parse those tokens into a relation tree
    let mut parser = parser::ExprParser::new(tokens);
    let relation = parser.parse_relation()?;
    Ok(relation)
}

/// Parse an arithmetic string without a comparison into an expression tree
///
/// # Parameters
/// - `input`: &str holding the arithmetic expression, e.g. `"1 + 2 * v1"`
///
/// # Returns
/// Parse result which is
/// - `Ok`: The root node of the expression tree.
/// - `Err`: Returns the ExprParseError describing the issue with the
///     expression string which was being parsed.
///
/// # Examples
/// ```rust
/// use fluxion_core::expr::parse_expression;
/// let expr = parse_expression("1 + 2 * 3").unwrap();
/// assert_eq!(expr.fold().as_value(), Some(7.0));
/// ```
pub fn parse_expression(input: &str) -> Result<Rc<Expr>, ExprParseError> {
    let mut lexer = lexer::Lexer::new(input);
    let tokens = lexer.scan_tokens()?;

    let mut parser = parser::ExprParser::new(tokens);
    let expr = parser.parse_expression()?;
    Ok(expr)
}

/// Enum representing possible lex and parse errors
#[derive(Debug, Error)]
pub enum ExprParseError {
    /// Lexing Error
    #[error("Error occurred during lexing (conversion of constraint string to tokens): {0}")]
    LexingError(#[from] LexerError),
    /// Parsing Error
    #[error("Error occurred during parsing (conversion of tokens to expression tree): {0}")]
    ParsingError(#[from] ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::tree::ComparisonOp;
    use indexmap::IndexMap;

    #[test]
    fn test_parse_relation_end_to_end() {
        let relation = parse_relation("v_upt.n + 0.5*v_em.n >= 2").unwrap();
        assert_eq!(relation.op, ComparisonOp::Geq);

        let mut values: IndexMap<String, f64> = IndexMap::new();
        values.insert("v_upt.n".to_string(), 1.0);
        values.insert("v_em.n".to_string(), 4.0);
        assert_eq!(relation.lhs.evaluate(&values).unwrap(), 3.0);
    }

    #[test]
    fn test_lexer_error_is_propagated() {
        match parse_relation("v1 # 2") {
            Err(ExprParseError::LexingError(_)) => {}
            _ => panic!("'#' should surface as a lexing error"),
        }
    }

    #[test]
    fn test_parser_error_is_propagated() {
        match parse_relation("v1 + = 2") {
            Err(ExprParseError::ParsingError(_)) => {}
            _ => panic!("dangling '+' should surface as a parsing error"),
        }
    }
}
