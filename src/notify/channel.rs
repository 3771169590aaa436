//! Channel contract for notification delivery.

use async_trait::async_trait;

use crate::notify::task::NotificationTask;
use crate::rule::NotifyTarget;

/// Result of one delivery attempt to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The target accepted the message.
    Delivered,
    /// Worth retrying: network failure, timeout, 5xx, rate limiting.
    Transient(String),
    /// Never going to succeed: bad credentials, bad target, 4xx.
    Permanent(String),
}

impl SendOutcome {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Delivered => "delivered",
            SendOutcome::Transient(_) => "transient",
            SendOutcome::Permanent(_) => "permanent",
        }
    }
}

/// A notification transport. The pipeline is channel-agnostic beyond this.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name, matching [`NotifyTarget::channel`].
    fn name(&self) -> &'static str;

    /// Deliver a task's message to one target.
    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> SendOutcome;
}
