//! Rule evaluation engines.
//!
//! Two engines share one result shape: the deterministic expression engine
//! and the LLM engine, composed by the [`router`].

/// LLM engine: prompt, provider, parser, trigger modes
pub mod llm;
/// Dispatch of matched rules to engine compositions
pub mod router;

pub use router::RuleRouter;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::expr::{self, Expr, ExprError};

/// Outcome of evaluating one rule.
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    /// Whether the rule fires.
    pub should_trigger: bool,
    /// LLM confidence, when one was consulted.
    pub confidence: Option<f64>,
    /// Decision reasoning or error kind.
    pub reason: String,
}

impl EvaluationResult {
    /// A non-firing result with a reason.
    pub fn no_trigger(reason: impl Into<String>) -> Self {
        Self {
            should_trigger: false,
            confidence: None,
            reason: reason.into(),
        }
    }

    /// A firing result with a reason.
    pub fn trigger(reason: impl Into<String>) -> Self {
        Self {
            should_trigger: true,
            confidence: None,
            reason: reason.into(),
        }
    }
}

/// Deterministic expression engine with a per-process parse cache.
///
/// Expressions are parsed once per unique string; the cached AST is shared
/// across evaluations.
#[derive(Default)]
pub struct ExpressionEngine {
    cache: RwLock<HashMap<String, Arc<Expr>>>,
}

impl ExpressionEngine {
    /// Create an engine with an empty parse cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate an expression against a variable map.
    pub fn evaluate(
        &self,
        expression: &str,
        vars: &HashMap<String, Value>,
    ) -> Result<bool, ExprError> {
        let ast = self.parsed(expression)?;
        expr::evaluate(&ast, vars)
    }

    fn parsed(&self, expression: &str) -> Result<Arc<Expr>, ExprError> {
        if let Some(ast) = self.cache.read().get(expression) {
            return Ok(ast.clone());
        }
        let ast = Arc::new(expr::parse(expression)?);
        debug!(expression, "cached parsed expression");
        self.cache
            .write()
            .entry(expression.to_string())
            .or_insert_with(|| ast.clone());
        Ok(ast)
    }
}
