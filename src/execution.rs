//! Execution records for operator triage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Outcome of the notification leg of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Task enqueued for delivery.
    Queued,
    /// All targets delivered.
    Sent,
    /// Delivery exhausted retries or hit a permanent error.
    Failed,
    /// Suppressed by dedup, rate limit, or absence of targets.
    Skipped,
}

/// One rule evaluation against one event (or tick).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    /// Unique record ID.
    pub execution_id: String,
    /// Rule that was evaluated.
    pub rule_id: String,
    /// Event that drove the evaluation; absent for tick-driven analyses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    /// Context key the evaluation ran under.
    pub context_key: String,
    /// Whether the rule fired.
    pub triggered: bool,
    /// LLM confidence, when an LLM was involved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Decision reasoning or error kind.
    pub reason: String,
    /// Notification outcome.
    pub notification_status: NotificationStatus,
    /// Wall-clock evaluation latency.
    pub latency_ms: u64,
    /// Record creation time.
    pub created_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Build a record with a fresh ID.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        rule_id: &str,
        event_id: Option<&str>,
        context_key: &str,
        triggered: bool,
        confidence: Option<f64>,
        reason: &str,
        notification_status: NotificationStatus,
        latency_ms: u64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            execution_id: format!("exec_{}", Uuid::new_v4().simple()),
            rule_id: rule_id.to_string(),
            event_id: event_id.map(|s| s.to_string()),
            context_key: context_key.to_string(),
            triggered,
            confidence,
            reason: reason.to_string(),
            notification_status,
            latency_ms,
            created_at,
        }
    }
}
