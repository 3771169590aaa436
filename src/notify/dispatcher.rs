//! Enqueue gate: dedup, rate limit, then queue.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{debug, info};

use crate::engine::EvaluationResult;
use crate::event::Event;
use crate::notify::task::NotificationTask;
use crate::rule::Rule;
use crate::store::{NotificationLimits, NotificationQueue, StoreResult};

/// What happened to a fire at the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchStatus {
    /// Task enqueued for the worker.
    Queued,
    /// Rule has no targets; nothing to deliver.
    NoTargets,
    /// Suppressed: (rule, context key) is inside its cooldown window.
    InCooldown,
    /// Suppressed: the rule hit its per-minute budget.
    RateLimited,
}

impl DispatchStatus {
    /// Whether the fire was suppressed rather than queued.
    pub fn skipped(&self) -> bool {
        !matches!(self, DispatchStatus::Queued)
    }
}

/// Gate in front of the notification queue.
pub struct NotificationDispatcher {
    queue: NotificationQueue,
    limits: NotificationLimits,
}

impl NotificationDispatcher {
    /// Create a dispatcher.
    pub fn new(queue: NotificationQueue, limits: NotificationLimits) -> Self {
        Self { queue, limits }
    }

    /// Gate and enqueue a fire.
    ///
    /// `event` is absent for tick-driven fires. The dedup key is armed only
    /// when the task actually enters the queue.
    pub async fn dispatch(
        &self,
        rule: &Rule,
        context_key: &str,
        result: &EvaluationResult,
        event: Option<&Event>,
        now: DateTime<Utc>,
    ) -> StoreResult<DispatchStatus> {
        let policy = &rule.notify_policy;
        if policy.targets.is_empty() {
            debug!(rule_id = %rule.rule_id, "no notification targets");
            return Ok(DispatchStatus::NoTargets);
        }

        if self.limits.in_cooldown(&rule.rule_id, context_key).await? {
            info!(rule_id = %rule.rule_id, context_key, "notification suppressed by cooldown");
            metrics::counter!("trigger_notifications_skipped").increment(1);
            return Ok(DispatchStatus::InCooldown);
        }

        if !self
            .limits
            .check_rate(&rule.rule_id, policy.rate_limit.max_per_minute, now)
            .await?
        {
            info!(rule_id = %rule.rule_id, context_key, "notification suppressed by rate limit");
            metrics::counter!("trigger_notifications_skipped").increment(1);
            return Ok(DispatchStatus::RateLimited);
        }

        let message = build_message(rule, result, event);
        let mut metadata: HashMap<String, serde_json::Value> = HashMap::new();
        if let Some(event) = event {
            metadata.insert("event_id".to_string(), json!(event.event_id));
            metadata.insert("event_type".to_string(), json!(event.event_type));
        }
        if let Some(confidence) = result.confidence {
            metadata.insert("confidence".to_string(), json!(confidence));
        }
        metadata.insert("reason".to_string(), json!(result.reason));

        let task = NotificationTask::new(
            &rule.rule_id,
            context_key,
            policy.targets.clone(),
            message,
            metadata,
            now,
        );

        self.queue.enqueue(&task).await?;
        self.limits
            .start_cooldown(
                &rule.rule_id,
                context_key,
                Duration::from_secs(policy.rate_limit.cooldown_seconds),
            )
            .await?;

        info!(
            task_id = %task.task_id,
            rule_id = %rule.rule_id,
            targets = task.targets.len(),
            "notification queued"
        );
        metrics::counter!("trigger_notifications_queued").increment(1);
        Ok(DispatchStatus::Queued)
    }
}

/// Render the notification body: rule name, trigger time, decision, and a
/// short event-data digest.
fn build_message(rule: &Rule, result: &EvaluationResult, event: Option<&Event>) -> String {
    let mut lines = vec![format!("**{}**", rule.name), String::new()];

    if let Some(event) = event {
        lines.push(format!(
            "**Trigger Time:** {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S")
        ));
        lines.push(format!("**Event Type:** {}", event.event_type));
        lines.push(String::new());
    }

    lines.push("**Decision:**".to_string());
    lines.push(result.reason.clone());

    if let Some(confidence) = result.confidence {
        lines.push(format!("**Confidence:** {:.0}%", confidence * 100.0));
    }

    if let Some(event) = event {
        if !event.data.is_empty() {
            lines.push(String::new());
            lines.push("**Event Data:**".to_string());
            for (key, value) in event.data.iter().take(5) {
                lines.push(format!("- {key}: {value}"));
            }
        }
    }

    lines.join("\n")
}
