//! Broker consumer for inbound events.
//!
//! A single durable AMQP queue carries JSON-encoded events. Messages are
//! acknowledged after the handler finishes; systemic failures nack with
//! requeue so the broker redelivers, while malformed payloads ack and drop.
//! The consumer carries its own reconnect loop, shutdown state, and
//! per-message deadline.

/// AMQP consumer implementation
pub mod amqp;
/// Consumer error types
pub mod error;
/// Retry policies and executor
pub mod retry;
/// Graceful shutdown state
pub mod shutdown;

pub use amqp::{ConsumerConfig, EventConsumer};
pub use error::{ConsumerError, ConsumerResult};
pub use retry::{RetryExecutor, RetryPolicy, RetryResult};
pub use shutdown::ShutdownState;
