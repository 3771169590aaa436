//! Crate-level error types

use thiserror::Error;

/// Top-level error for service assembly and run loops.
///
/// Subsystems carry their own error enums (`ExprError`, `StoreError`,
/// `LlmError`, `ConsumerError`); this type exists for the places where they
/// meet, such as the worker manager and the binary.
#[derive(Debug, Error)]
pub enum TriggerError {
    /// State store failure
    #[error("store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// Broker consumer failure
    #[error("consumer error: {0}")]
    Consumer(#[from] crate::consumer::ConsumerError),

    /// Rule failed write-time validation
    #[error("invalid rule: {0}")]
    Rule(#[from] crate::rule::RuleValidationError),

    /// Invalid runtime configuration
    #[error("configuration error: {0}")]
    Config(String),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TriggerError>;
