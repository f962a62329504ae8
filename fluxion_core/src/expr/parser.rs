use std::rc::Rc;

use thiserror::Error;

use crate::expr::token::Token;
use crate::expr::tree::{ComparisonOp, Expr, Relation};

/*
Constraint expression grammar:
relation   -> expression (("=" | "!=" | "<=" | ">=" | "<" | ">") expression)?
expression -> term (("+" | "-") term)*
term       -> unary (("*" | "/") unary)*
unary      -> "-" unary | primary
primary    -> NUMBER | IDENTIFIER | "(" expression ")"

e.g. 2*v1 - v2/3 <= 10
 */

/// Constraint expression parser
pub struct ExprParser {
    /// Vector of tokens from the expression string
    tokens: Vec<Token>,
    /// Current token being processed
    current: usize,
}

impl ExprParser {
    /// Create a new ExprParser
    pub fn new(tokens: Vec<Token>) -> ExprParser {
        ExprParser { tokens, current: 0 }
    }

    // region Parsing Functions

    /// Parse the token vector into a relation with a comparison at the root
    pub fn parse_relation(&mut self) -> Result<Relation, ParseError> {
        let lhs = self.expression()?;
        let op = match self.comparison_operator() {
            Some(op) => op,
            None => return Err(ParseError::MissingComparison),
        };
        let rhs = self.expression()?;
        if !self.is_at_end() {
            // If the entire token vector has not been consumed, an error has occurred
            return Err(ParseError::EarlyTermination);
        }
        Ok(Relation::new(lhs, op, rhs))
    }

    /// Parse the token vector into a plain expression without a comparison
    pub fn parse_expression(&mut self) -> Result<Rc<Expr>, ParseError> {
        let expr = self.expression()?;
        if !self.is_at_end() {
            return Err(ParseError::EarlyTermination);
        }
        Ok(expr)
    }

    fn comparison_operator(&mut self) -> Option<ComparisonOp> {
        if self.match_token(vec![
            Token::Equal,
            Token::NotEqual,
            Token::LessEqual,
            Token::GreaterEqual,
            Token::Less,
            Token::Greater,
        ]) {
            return match self.previous() {
                Token::Equal => Some(ComparisonOp::Eq),
                Token::NotEqual => Some(ComparisonOp::Neq),
                Token::LessEqual => Some(ComparisonOp::Leq),
                Token::GreaterEqual => Some(ComparisonOp::Geq),
                Token::Less => Some(ComparisonOp::Lt),
                Token::Greater => Some(ComparisonOp::Gt),
                _ => None,
            };
        }
        None
    }

    fn expression(&mut self) -> Result<Rc<Expr>, ParseError> {
        let mut expr = self.term()?;

        while self.match_token(vec![Token::Plus, Token::Minus]) {
            let subtract = matches!(self.previous(), Token::Minus);
            let right = self.term()?;
            expr = if subtract {
                Expr::sub(expr, right)
            } else {
                Expr::add(expr, right)
            };
        }
        Ok(expr)
    }

    fn term(&mut self) -> Result<Rc<Expr>, ParseError> {
        let mut expr = self.unary()?;

        while self.match_token(vec![Token::Star, Token::Slash]) {
            let divide = matches!(self.previous(), Token::Slash);
            let right = self.unary()?;
            expr = if divide {
                Expr::div(expr, right)
            } else {
                Expr::mul(expr, right)
            };
        }
        Ok(expr)
    }

    fn unary(&mut self) -> Result<Rc<Expr>, ParseError> {
        if self.match_token(vec![Token::Minus]) {
            let operand = self.unary()?;
            return Ok(Expr::neg(operand));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Rc<Expr>, ParseError> {
        if let Some(value) = self.match_number() {
            return Ok(Expr::value(value));
        }

        if let Some(identifier) = self.match_identifier() {
            return Ok(Expr::symbol(identifier));
        }

        if self.match_token(vec![Token::LeftParen]) {
            let expr = self.expression()?;
            self.consume(Token::RightParen, "Expect ')' after expression.")?;
            return Ok(expr);
        }

        Err(ParseError::ExpectedExpression)
    }

    // endregion Parsing Functions

    // region parsing helper functions

    /// Check whether the token at the current position matches one of the provided `tokens`,
    /// if it does advance [`self.current`] and return true, otherwise return false
    fn match_token(&mut self, tokens: Vec<Token>) -> bool {
        for t in tokens {
            if self.check(t) {
                self.advance();
                return true;
            }
        }
        false
    }

    /// Similar to [`match_token`], but for matching an identifier token. If the current
    /// token is an identifier return `Some(name)`, otherwise return None
    fn match_identifier(&mut self) -> Option<String> {
        if self.is_at_end() {
            return None;
        }
        if let Token::Identifier(name) = self.peek() {
            self.advance();
            return Some(name);
        }
        None
    }

    /// Similar to [`match_token`], but for matching a number token
    fn match_number(&mut self) -> Option<f64> {
        if self.is_at_end() {
            return None;
        }
        if let Token::Number(value) = self.peek() {
            self.advance();
            return Some(value);
        }
        None
    }

    /// Check whether the current token matches the provided `token`
    fn check(&mut self, token: Token) -> bool {
        if self.is_at_end() {
            return false;
        }
        self.peek() == token
    }

    /// Advance `self.current` one position unless at end of the token Vec, then return the
    /// previous token.
    fn advance(&mut self) -> Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }

    /// Check whether the parser is at the end of the token Vec
    fn is_at_end(&self) -> bool {
        self.peek() == Token::Eof
    }

    /// Get a copy of the current token
    fn peek(&self) -> Token {
        self.tokens[self.current].clone()
    }

    /// Get a copy of the previous token
    fn previous(&self) -> Token {
        self.tokens[self.current - 1].clone()
    }

    /// Check whether the current token matches an input token, if it matches advance to the
    /// next token, and if it doesn't return an error. Used mainly for matching parenthesis.
    fn consume(&mut self, token: Token, msg: &str) -> Result<Token, ParseError> {
        if self.check(token) {
            return Ok(self.advance());
        }

        Err(ParseError::MissingToken(msg.to_string()))
    }

    // endregion parsing helper functions
}

/// Enum representing possible parse errors
#[derive(Debug, Error, PartialEq, Clone)]
pub enum ParseError {
    /// Missing expected token (e.g. a right parenthesis)
    #[error("Missing expected token: {0}")]
    MissingToken(String),
    /// No expression found when one was expected
    #[error("No expression found, check that the constraint string is not empty")]
    ExpectedExpression,
    /// A relation was requested but no comparison operator was present
    #[error("Expected a comparison operator between the two sides of the constraint")]
    MissingComparison,
    /// Expression was not completed when parsing terminated
    #[error("Parsing terminated early, check for two adjacent operands")]
    EarlyTermination,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lexer::Lexer;
    use crate::expr::tree::{Expr, ExprOperation};

    fn parse_expr(input: &str) -> Result<Rc<Expr>, ParseError> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.scan_tokens().unwrap();
        ExprParser::new(tokens).parse_expression()
    }

    fn parse_rel(input: &str) -> Result<Relation, ParseError> {
        let mut lexer = Lexer::new(input);
        let tokens = lexer.scan_tokens().unwrap();
        ExprParser::new(tokens).parse_relation()
    }

    #[test]
    fn test_precedence() {
        let expr = parse_expr("1 + 2 * v").unwrap();
        match &*expr {
            Expr::Operation(ExprOperation::Add { left, right }) => {
                match &**left {
                    Expr::Value(v) => assert_eq!(*v, 1.0),
                    _ => panic!("left side should have been the literal 1"),
                }
                match &**right {
                    Expr::Operation(ExprOperation::Mul { .. }) => {}
                    _ => panic!("right side should have been a multiplication"),
                }
            }
            _ => panic!("expected an addition at the root"),
        }
    }

    #[test]
    fn test_grouping_overrides_precedence() {
        let expr = parse_expr("(1 + 2) * v").unwrap();
        match &*expr {
            Expr::Operation(ExprOperation::Mul { left, .. }) => match &**left {
                Expr::Operation(ExprOperation::Add { .. }) => {}
                _ => panic!("grouped sum should be the left factor"),
            },
            _ => panic!("expected a multiplication at the root"),
        }
    }

    #[test]
    fn test_left_associative_subtraction() {
        // a - b - c parses as (a - b) - c
        let expr = parse_expr("a - b - c").unwrap();
        assert_eq!(format!("{}", expr), "((a - b) - c)");
    }

    #[test]
    fn test_unary_minus_chain() {
        let expr = parse_expr("--v").unwrap();
        assert_eq!(format!("{}", expr), "(-(-v))");
    }

    #[test]
    fn test_relation_parse() {
        let relation = parse_rel("2*v1 - v2 <= 10").unwrap();
        assert_eq!(relation.op, ComparisonOp::Leq);
        assert_eq!(format!("{}", relation), "((2 * v1) - v2) <= 10");
    }

    #[test]
    fn test_relation_requires_comparison() {
        match parse_rel("v1 + v2") {
            Err(ParseError::MissingComparison) => {}
            _ => panic!("expected a missing comparison error"),
        }
    }

    #[test]
    fn test_expression_rejects_comparison() {
        match parse_expr("v1 <= 2") {
            Err(ParseError::EarlyTermination) => {}
            _ => panic!("expected an early termination error"),
        }
    }

    #[test]
    fn test_missing_paren() {
        match parse_expr("(v1 + 2") {
            Err(ParseError::MissingToken(_)) => {}
            _ => panic!("expected a missing token error"),
        }
    }

    #[test]
    fn test_adjacent_operands_rejected() {
        match parse_expr("1 2") {
            Err(ParseError::EarlyTermination) => {}
            _ => panic!("expected an early termination error"),
        }
    }

    #[test]
    fn test_empty_input_rejected() {
        match parse_expr("") {
            Err(ParseError::ExpectedExpression) => {}
            _ => panic!("expected an expected expression error"),
        }
    }
}
