//! Integer expression evaluator for `$(...)` constants and linker data
//! expressions.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := power (('*' | '/' | '%') power)*
//! power   := unary ('^' power)?
//! unary   := ('-' | '+') unary | primary
//! primary := number | 'c' | symbol | '(' expr ')'
//! ```
//!
//! Arithmetic is signed 64-bit and wraps.

use thiserror::Error;

/// Expression evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// Nothing to evaluate.
    #[error("empty expression")]
    Empty,
    /// Character that cannot start or continue a token.
    #[error("unexpected '{ch}' at offset {offset}")]
    UnexpectedChar {
        /// Offending character.
        ch: char,
        /// Byte offset in the expression.
        offset: usize,
    },
    /// Input ended inside a term.
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    /// Missing `)`.
    #[error("unbalanced parentheses")]
    UnbalancedParen,
    /// Numeric literal could not be parsed.
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    /// Division or remainder by zero.
    #[error("division by zero")]
    DivisionByZero,
    /// Identifier not known to the caller.
    #[error("unknown symbol '{0}'")]
    UnknownSymbol(String),
}

/// Evaluates a closed expression (no symbols).
///
/// # Errors
///
/// Returns an [`ExpressionError`] for malformed input or division by zero.
pub fn evaluate(text: &str) -> Result<i64, ExpressionError> {
    evaluate_with(text, |_| None)
}

/// Evaluates an expression, resolving identifiers through `lookup`.
///
/// # Errors
///
/// Returns an [`ExpressionError`] for malformed input, unknown symbols or
/// division by zero.
pub fn evaluate_with(
    text: &str,
    lookup: impl Fn(&str) -> Option<i64>,
) -> Result<i64, ExpressionError> {
    let mut parser = Parser {
        text,
        pos: 0,
        lookup: &lookup,
    };
    parser.skip_space();
    if parser.at_end() {
        return Err(ExpressionError::Empty);
    }
    let value = parser.expr()?;
    parser.skip_space();
    match parser.peek() {
        None => Ok(value),
        Some(')') => Err(ExpressionError::UnbalancedParen),
        Some(ch) => Err(ExpressionError::UnexpectedChar {
            ch,
            offset: parser.pos,
        }),
    }
}

struct Parser<'a> {
    text: &'a str,
    pos: usize,
    lookup: &'a dyn Fn(&str) -> Option<i64>,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn at_end(&self) -> bool {
        self.pos >= self.text.len()
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_space(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, expected: char) -> bool {
        self.skip_space();
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<i64, ExpressionError> {
        let mut value = self.term()?;
        loop {
            if self.eat('+') {
                value = value.wrapping_add(self.term()?);
            } else if self.eat('-') {
                value = value.wrapping_sub(self.term()?);
            } else {
                return Ok(value);
            }
        }
    }

    fn term(&mut self) -> Result<i64, ExpressionError> {
        let mut value = self.power()?;
        loop {
            if self.eat('*') {
                value = value.wrapping_mul(self.power()?);
            } else if self.eat('/') {
                let divisor = self.power()?;
                if divisor == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                value = value.wrapping_div(divisor);
            } else if self.eat('%') {
                let divisor = self.power()?;
                if divisor == 0 {
                    return Err(ExpressionError::DivisionByZero);
                }
                value = value.wrapping_rem(divisor);
            } else {
                return Ok(value);
            }
        }
    }

    fn power(&mut self) -> Result<i64, ExpressionError> {
        let base = self.unary()?;
        if !self.eat('^') {
            return Ok(base);
        }
        let exponent = self.power()?;
        Ok(match exponent {
            e if e < 0 => match base {
                1 => 1,
                -1 if e % 2 == 0 => 1,
                -1 => -1,
                _ => 0,
            },
            e => base.wrapping_pow(u32::try_from(e).unwrap_or(u32::MAX)),
        })
    }

    fn unary(&mut self) -> Result<i64, ExpressionError> {
        if self.eat('-') {
            return Ok(self.unary()?.wrapping_neg());
        }
        if self.eat('+') {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<i64, ExpressionError> {
        self.skip_space();
        let start = self.pos;
        match self.peek() {
            None => Err(ExpressionError::UnexpectedEnd),
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.eat(')') {
                    Ok(value)
                } else {
                    Err(ExpressionError::UnbalancedParen)
                }
            }
            Some('\'') => {
                self.pos += 1;
                let ch = self.bump().ok_or(ExpressionError::UnexpectedEnd)?;
                if self.bump() != Some('\'') {
                    return Err(ExpressionError::UnexpectedEnd);
                }
                Ok(i64::from(u32::from(ch)))
            }
            Some(ch) if ch.is_ascii_digit() => {
                while self.peek().is_some_and(|c| c.is_ascii_alphanumeric()) {
                    self.pos += 1;
                }
                parse_number(&self.text[start..self.pos])
            }
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' || ch == '.' => {
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
                {
                    self.pos += 1;
                }
                let name = &self.text[start..self.pos];
                (self.lookup)(name).ok_or_else(|| ExpressionError::UnknownSymbol(name.to_string()))
            }
            Some(ch) => Err(ExpressionError::UnexpectedChar { ch, offset: start }),
        }
    }
}

fn parse_number(literal: &str) -> Result<i64, ExpressionError> {
    let invalid = || ExpressionError::InvalidNumber(literal.to_string());
    if let Some(hex) = literal
        .strip_prefix("0x")
        .or_else(|| literal.strip_prefix("0X"))
    {
        // Hex literals cover the full unsigned range and wrap into i64.
        return u64::from_str_radix(hex, 16)
            .map(|value| value as i64)
            .map_err(|_| invalid());
    }
    literal
        .parse::<u64>()
        .map(|value| value as i64)
        .map_err(|_| invalid())
}
