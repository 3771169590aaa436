//! Event-driven trigger service.
//!
//! External producers publish domain events to a broker; the service
//! evaluates each event against user-defined rules and, when a rule fires,
//! dispatches notifications through pluggable channels. Rules are
//! expression-only, LLM-only, or hybrid; LLM rules run under a trigger
//! mode (realtime, batch, interval) that decides when inference actually
//! happens.
//!
//! # Example
//!
//! ```no_run
//! use trigger_rs::config::Settings;
//! use trigger_rs::worker::WorkerManager;
//!
//! # async fn example() -> trigger_rs::Result<()> {
//! trigger_rs::init_tracing();
//! let settings = Settings::from_env();
//! WorkerManager::new(settings).run().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]

pub use engine::{EvaluationResult, ExpressionEngine, RuleRouter};
pub use error::{Result, TriggerError};
pub use event::Event;
pub use rule::{Rule, RuleKind, TriggerMode};

/// Runtime configuration from environment variables
pub mod config;
/// Broker consumer
pub mod consumer;
/// Context windows and summaries
pub mod context;
/// Rule evaluation engines and routing
pub mod engine;
/// Crate-level error types
pub mod error;
/// Event model
pub mod event;
/// Execution records
pub mod execution;
/// Safe expression language
pub mod expr;
/// Per-event pipeline
pub mod handler;
/// Notification pipeline
pub mod notify;
/// Rule model and matching
pub mod rule;
/// State store
pub mod store;
/// Periodic tick
pub mod ticker;
/// Worker process assembly
pub mod worker;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the tracing subscriber with env-filter defaults.
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
