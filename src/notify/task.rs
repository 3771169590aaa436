//! Notification task model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::rule::NotifyTarget;

/// A queued notification: one fire of a rule, fanned out to its targets by
/// the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationTask {
    /// Unique task ID.
    pub task_id: String,
    /// Rule that fired.
    pub rule_id: String,
    /// Context key that fired.
    pub context_key: String,
    /// Delivery targets.
    pub targets: Vec<NotifyTarget>,
    /// Rendered message body.
    pub message: String,
    /// Delivery attempts so far.
    #[serde(default)]
    pub retry_count: u32,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Earliest time the next attempt may run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<DateTime<Utc>>,
    /// Evaluation metadata (event ID, confidence, reason).
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

impl NotificationTask {
    /// Build a task with a fresh ID.
    pub fn new(
        rule_id: &str,
        context_key: &str,
        targets: Vec<NotifyTarget>,
        message: String,
        metadata: HashMap<String, Value>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id: format!("notify_{}", Uuid::new_v4().simple()),
            rule_id: rule_id.to_string(),
            context_key: context_key.to_string(),
            targets,
            message,
            retry_count: 0,
            created_at,
            retry_after: None,
            metadata,
        }
    }

    /// Whether another delivery attempt is allowed.
    pub fn should_retry(&self, max_retry: u32) -> bool {
        self.retry_count <= max_retry
    }

    /// Whether the task is deferred past `now`.
    pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
        self.retry_after.map(|at| at > now).unwrap_or(false)
    }
}
