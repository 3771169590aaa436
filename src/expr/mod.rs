//! Safe expression engine for rule pre-filters.
//!
//! A small, closed expression language over event data: arithmetic,
//! comparison, boolean logic, membership, and bracketed list literals.
//! Function calls, attribute access, indexing, and any name not present in
//! the variable map are rejected. Evaluation is pure and single-pass over a
//! parsed AST; parsing is linear with bounded nesting, so adversarial input
//! cannot blow up.

/// Error types for lexing, parsing, and evaluation
pub mod error;
/// AST node definitions
pub mod ast;
/// Evaluator over variable maps
pub mod eval;
/// Tokenizer
pub mod lexer;
/// Recursive-descent parser
pub mod parser;
/// Token definitions
pub mod token;

pub use ast::{BinaryOp, Expr, Literal, UnaryOp};
pub use error::ExprError;
pub use eval::evaluate;
pub use token::Token;

/// Maximum accepted expression length in bytes.
pub const MAX_EXPRESSION_LEN: usize = 4096;

/// Parse an expression into its AST.
pub fn parse(input: &str) -> Result<Expr, ExprError> {
    if input.len() > MAX_EXPRESSION_LEN {
        return Err(ExprError::TooLong {
            len: input.len(),
            max: MAX_EXPRESSION_LEN,
        });
    }
    let tokens = lexer::tokenize(input)?;
    parser::Parser::new(tokens).parse()
}
