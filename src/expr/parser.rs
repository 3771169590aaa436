//! Recursive-descent parser for the expression language.
//!
//! Precedence, loosest first: `or`, `and`, `not`, comparison/`in`,
//! additive, multiplicative, unary minus, primary.

use crate::expr::ast::{BinaryOp, Expr, Literal, UnaryOp};
use crate::expr::error::ExprError;
use crate::expr::token::Token;

/// Maximum recursion depth accepted by the parser. Each precedence level
/// costs a frame, so this allows roughly a dozen nested groups.
pub const MAX_DEPTH: usize = 128;

/// Parser over a token stream.
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Create a parser for the given token stream.
    pub fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    /// Parse a complete expression; trailing tokens are an error.
    pub fn parse(mut self) -> Result<Expr, ExprError> {
        if self.tokens.is_empty() {
            return Err(ExprError::UnexpectedEnd);
        }
        let expr = self.parse_or()?;
        if let Some(extra) = self.peek() {
            return Err(ExprError::UnexpectedToken(extra.describe()));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_and()?;
        while self.accept(&Token::Or) {
            let rhs = self.parse_and()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_and(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_not()?;
        while self.accept(&Token::And) {
            let rhs = self.parse_not()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_not(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = if self.accept(&Token::Not) {
            let inner = self.parse_not()?;
            Expr::Unary {
                op: UnaryOp::Not,
                expr: Box::new(inner),
            }
        } else {
            self.parse_comparison()?
        };
        self.leave();
        Ok(expr)
    }

    fn parse_comparison(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_additive()?;
        while let Some(op) = self.comparison_op() {
            let rhs = self.parse_additive()?;
            lhs = binary(op, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn comparison_op(&mut self) -> Option<BinaryOp> {
        let op = match self.peek()? {
            Token::Gt => BinaryOp::Gt,
            Token::Lt => BinaryOp::Lt,
            Token::Ge => BinaryOp::Ge,
            Token::Le => BinaryOp::Le,
            Token::EqEq => BinaryOp::Eq,
            Token::Ne => BinaryOp::Ne,
            Token::In => BinaryOp::In,
            _ => return None,
        };
        self.pos += 1;
        Some(op)
    }

    fn parse_additive(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let mut lhs = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Rem,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.parse_unary()?;
            lhs = binary(op, lhs, rhs);
        }
        self.leave();
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let expr = if self.accept(&Token::Minus) {
            let inner = self.parse_unary()?;
            Expr::Unary {
                op: UnaryOp::Neg,
                expr: Box::new(inner),
            }
        } else {
            self.parse_primary()?
        };
        self.leave();
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExprError> {
        self.enter()?;
        let token = self.next().ok_or(ExprError::UnexpectedEnd)?;
        let expr = match token {
            Token::Number(n) => Expr::Literal(Literal::Number(n)),
            Token::Str(s) => Expr::Literal(Literal::Str(s)),
            Token::Bool(b) => Expr::Literal(Literal::Bool(b)),
            Token::Ident(name) => {
                // No call, attribute, or subscript syntax after a name.
                match self.peek() {
                    Some(Token::LParen) => {
                        return Err(ExprError::UnexpectedToken(
                            "'(' after identifier (function calls are not allowed)".to_string(),
                        ))
                    }
                    Some(Token::LBracket) => {
                        return Err(ExprError::UnexpectedToken(
                            "'[' after identifier (indexing is not allowed)".to_string(),
                        ))
                    }
                    _ => Expr::Ident(name),
                }
            }
            Token::LParen => {
                let inner = self.parse_or()?;
                self.expect(&Token::RParen)?;
                inner
            }
            Token::LBracket => self.parse_list()?,
            other => return Err(ExprError::UnexpectedToken(other.describe())),
        };
        self.leave();
        Ok(expr)
    }

    fn parse_list(&mut self) -> Result<Expr, ExprError> {
        let mut items = Vec::new();
        if self.accept(&Token::RBracket) {
            return Ok(Expr::List(items));
        }
        loop {
            items.push(self.parse_or()?);
            if self.accept(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RBracket)?;
            break;
        }
        Ok(Expr::List(items))
    }

    fn enter(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep { max: MAX_DEPTH });
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn accept(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(other) => Err(ExprError::UnexpectedToken(other.describe())),
            None => Err(ExprError::UnexpectedEnd),
        }
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::lexer::tokenize;

    fn parse(input: &str) -> Result<Expr, ExprError> {
        Parser::new(tokenize(input).unwrap()).parse()
    }

    #[test]
    fn test_precedence_and_over_or() {
        // a or b and c  =>  a or (b and c)
        let expr = parse("a or b and c").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Or,
                rhs,
                ..
            } => assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinaryOp::And,
                    ..
                }
            )),
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_precedence_mul_over_add() {
        // a + b * c  =>  a + (b * c)
        let expr = parse("a + b * c").unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                rhs,
                ..
            } => assert!(matches!(
                *rhs,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_not_binds_looser_than_comparison() {
        // not a > b  =>  not (a > b)
        let expr = parse("not a > b").unwrap();
        match expr {
            Expr::Unary {
                op: UnaryOp::Not,
                expr,
            } => assert!(matches!(
                *expr,
                Expr::Binary {
                    op: BinaryOp::Gt,
                    ..
                }
            )),
            other => panic!("unexpected shape: {other:?}"),
        }
    }

    #[test]
    fn test_empty_and_trailing() {
        assert!(matches!(parse("()"), Err(ExprError::UnexpectedToken(_))));
        assert!(matches!(parse("a > 1 b"), Err(ExprError::UnexpectedToken(_))));
        assert!(matches!(parse("a >"), Err(ExprError::UnexpectedEnd)));
    }

    #[test]
    fn test_list_literals() {
        assert_eq!(parse("[]").unwrap(), Expr::List(vec![]));
        let expr = parse("[1, 2, 3]").unwrap();
        match expr {
            Expr::List(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected shape: {other:?}"),
        }
    }
}
