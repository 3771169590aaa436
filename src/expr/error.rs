//! Expression engine error types

use thiserror::Error;

/// Errors produced while lexing, parsing, or evaluating an expression.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExprError {
    /// Character has no meaning in the expression language
    #[error("unexpected character '{ch}' at byte {pos}")]
    UnexpectedChar {
        /// The offending character
        ch: char,
        /// Byte offset in the input
        pos: usize,
    },

    /// String literal is missing its closing quote
    #[error("unterminated string literal")]
    UnterminatedString,

    /// Numeric literal failed to parse
    #[error("invalid number literal: {0}")]
    InvalidNumber(String),

    /// Token is valid but not allowed here
    #[error("unexpected token: {0}")]
    UnexpectedToken(String),

    /// Input ended mid-expression
    #[error("unexpected end of expression")]
    UnexpectedEnd,

    /// Expression exceeds the accepted length
    #[error("expression too long: {len} bytes (max {max})")]
    TooLong {
        /// Actual length
        len: usize,
        /// Accepted maximum
        max: usize,
    },

    /// Nesting exceeds the accepted depth
    #[error("expression nesting too deep (max {max})")]
    TooDeep {
        /// Accepted maximum depth
        max: usize,
    },

    /// Identifier is not present in the variable map
    #[error("unknown name: {0}")]
    UnknownName(String),

    /// Operand types do not fit the operator
    #[error("type mismatch: {detail}")]
    TypeMismatch {
        /// What went wrong
        detail: String,
    },

    /// Division or remainder by zero
    #[error("division by zero")]
    DivisionByZero,

    /// Variable holds a value the engine cannot operate on
    #[error("unsupported value for '{name}': {detail}")]
    UnsupportedValue {
        /// Variable name
        name: String,
        /// What the value was
        detail: String,
    },
}

impl ExprError {
    /// Create a type-mismatch error.
    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Self::TypeMismatch {
            detail: detail.into(),
        }
    }
}
