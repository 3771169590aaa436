//! Consumer error types

use thiserror::Error;

/// Errors from the broker consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// AMQP transport failure
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),

    /// Connection could not be established
    #[error("connection error: {0}")]
    Connection(String),

    /// Message payload could not be decoded
    #[error("parse error: {0}")]
    Parse(String),

    /// Handler failed in a way that warrants redelivery
    #[error("processing error: {0}")]
    Processing(String),

    /// Shutdown did not complete cleanly
    #[error("shutdown error: {0}")]
    Shutdown(String),
}

/// Result alias for consumer operations.
pub type ConsumerResult<T> = Result<T, ConsumerError>;
