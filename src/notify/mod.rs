//! Notification pipeline: enqueue gate, durable queue worker, channels.
//!
//! The dispatcher gates fires through dedup and rate limiting before
//! enqueueing; the worker drains the queue and fans out to channels with
//! bounded retries and a dead-letter tail. Delivery targets at-most-once
//! per dedup window.

/// Channel contract
pub mod channel;
/// Enqueue gate
pub mod dispatcher;
/// Email channel (SMTP)
pub mod email;
/// Notification task model
pub mod task;
/// Telegram channel
pub mod telegram;
/// WeCom channel
pub mod wecom;
/// Queue worker
pub mod worker;

pub use channel::{NotificationChannel, SendOutcome};
pub use dispatcher::{DispatchStatus, NotificationDispatcher};
pub use task::NotificationTask;
pub use worker::NotificationWorker;
