//! Lex a constraint expression string into a series of tokens for later parsing

use std::collections::VecDeque;

use thiserror::Error;

use crate::expr::token::Token;

pub struct Lexer {
    source: Vec<char>,
    tokens: VecDeque<Token>,
    start: usize,
    current: usize,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            tokens: VecDeque::new(),
            start: 0,
            current: 0,
        }
    }

    pub fn scan_tokens(&mut self) -> Result<Vec<Token>, LexerError> {
        while !self.is_at_end() {
            self.start = self.current;
            self.scan_token()?;
        }

        self.tokens.push_back(Token::Eof);
        Ok(self.tokens.iter().cloned().collect())
    }

    fn scan_token(&mut self) -> Result<(), LexerError> {
        let c: char = self.advance();
        match c {
            // Single character tokens
            '(' => self.add_token(Token::LeftParen),
            ')' => self.add_token(Token::RightParen),
            '+' => self.add_token(Token::Plus),
            '-' => self.add_token(Token::Minus),
            '*' => self.add_token(Token::Star),
            '/' => self.add_token(Token::Slash),
            // One or two character comparison tokens
            '<' => {
                if self.match_char('=') {
                    self.add_token(Token::LessEqual)
                } else {
                    self.add_token(Token::Less)
                }
            }
            '>' => {
                if self.match_char('=') {
                    self.add_token(Token::GreaterEqual)
                } else {
                    self.add_token(Token::Greater)
                }
            }
            '=' => {
                // Both "=" and "==" denote equality
                self.match_char('=');
                self.add_token(Token::Equal);
            }
            '!' => {
                if self.match_char('=') {
                    self.add_token(Token::NotEqual)
                } else {
                    return Err(LexerError::UnexpectedCharacter('!'));
                }
            }
            // Numbers and identifiers
            '0'..='9' => self.read_number()?,
            'a'..='z' | 'A'..='Z' | '_' => self.read_identifier(),
            // Whitespace
            ' ' | '\r' | '\n' | '\t' => {}
            other => return Err(LexerError::UnexpectedCharacter(other)),
        };
        Ok(())
    }

    fn advance(&mut self) -> char {
        let char_at_current = self.source[self.current];
        self.current += 1;
        char_at_current
    }

    /// Consume the next character when it matches `expected`
    fn match_char(&mut self, expected: char) -> bool {
        if self.is_at_end() || self.source[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn read_number(&mut self) -> Result<(), LexerError> {
        while Lexer::is_digit(self.peek()) {
            self.advance();
        }
        if self.peek() == '.' && Lexer::is_digit(self.peek_next()) {
            self.advance();
            while Lexer::is_digit(self.peek()) {
                self.advance();
            }
        }
        // Optional exponent with optional sign
        if self.peek() == 'e' || self.peek() == 'E' {
            let mut ahead = self.current + 1;
            if ahead < self.source.len() && (self.source[ahead] == '+' || self.source[ahead] == '-')
            {
                ahead += 1;
            }
            if ahead < self.source.len() && Lexer::is_digit(self.source[ahead]) {
                self.current = ahead + 1;
                while Lexer::is_digit(self.peek()) {
                    self.advance();
                }
            }
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        let value = text
            .parse::<f64>()
            .map_err(|_| LexerError::MalformedNumber(text))?;
        self.add_token(Token::Number(value));
        Ok(())
    }

    fn read_identifier(&mut self) {
        while Lexer::is_identifier_char(self.peek()) {
            self.advance();
        }

        let text: String = self.source[self.start..self.current].iter().collect();
        self.add_token(Token::Identifier(text));
    }

    fn is_digit(c: char) -> bool {
        matches!(c, '0'..='9')
    }

    fn is_alpha(c: char) -> bool {
        matches!(c, 'a'..='z' | 'A'..='Z' | '_')
    }

    /// Identifiers may carry dots, as in the suffixed flux names "v1.n"
    fn is_identifier_char(c: char) -> bool {
        Lexer::is_alpha(c) || Lexer::is_digit(c) || c == '.'
    }

    fn peek(&self) -> char {
        if self.is_at_end() {
            return '\0';
        }
        self.source[self.current]
    }

    fn peek_next(&self) -> char {
        if self.current + 1 >= self.source.len() {
            return '\0';
        }
        self.source[self.current + 1]
    }

    fn add_token(&mut self, token: Token) {
        self.tokens.push_back(token);
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }
}

/// Enum representing possible lexing errors
#[derive(Debug, Error, PartialEq, Clone)]
pub enum LexerError {
    /// A character outside the expression language was encountered
    #[error("unexpected character '{0}' in constraint expression")]
    UnexpectedCharacter(char),
    /// A numeric literal did not parse
    #[error("malformed numeric literal: {0}")]
    MalformedNumber(String),
}
