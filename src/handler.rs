//! Per-event processing pipeline.
//!
//! Sequence per ingested event: idempotency claim, context-window append,
//! rule fetch, per-rule evaluation in priority order, notification enqueue
//! on fire, execution record. A failing rule never affects its siblings;
//! only store-level failures propagate so the broker message gets nacked.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::context::ContextWindowManager;
use crate::engine::RuleRouter;
use crate::event::Event;
use crate::execution::{ExecutionRecord, NotificationStatus};
use crate::notify::{DispatchStatus, NotificationDispatcher};
use crate::rule::Rule;
use crate::store::{ExecutionStore, IdempotencyStore, RuleCache, StoreError};

/// Pipeline failure that the consumer maps to an ack/nack decision.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// State store failed; the message should be redelivered.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Brief retry for individual store operations before giving up and
/// letting the broker redeliver.
const STORE_RETRIES: usize = 2;
const STORE_RETRY_DELAY: Duration = Duration::from_millis(50);

/// Event handler wiring the full pipeline.
pub struct EventHandler {
    idempotency: IdempotencyStore,
    context: ContextWindowManager,
    rules: Arc<RuleCache>,
    router: Arc<RuleRouter>,
    dispatcher: Arc<NotificationDispatcher>,
    executions: ExecutionStore,
}

impl EventHandler {
    /// Assemble a handler.
    pub fn new(
        idempotency: IdempotencyStore,
        context: ContextWindowManager,
        rules: Arc<RuleCache>,
        router: Arc<RuleRouter>,
        dispatcher: Arc<NotificationDispatcher>,
        executions: ExecutionStore,
    ) -> Self {
        Self {
            idempotency,
            context,
            rules,
            router,
            dispatcher,
            executions,
        }
    }

    /// Process one event end to end.
    pub async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        let started = Instant::now();
        let now = Utc::now();

        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            context_key = %event.context_key,
            "processing event"
        );
        metrics::counter!("trigger_events_received").increment(1);

        // Step 1: idempotency. Replays inside the TTL window ack silently.
        let claimed = with_store_retry(|| self.idempotency.mark_processed(&event.event_id)).await?;
        if !claimed {
            debug!(event_id = %event.event_id, "duplicate event, skipping");
            metrics::counter!("trigger_events_duplicate").increment(1);
            return Ok(());
        }

        // Step 2: context window append.
        with_store_retry(|| self.context.append(event, now)).await?;

        // Step 3: matching rules, priority order.
        let rules = self.rules.matching(&event.event_type, &event.context_key).await?;
        if rules.is_empty() {
            debug!(event_type = %event.event_type, "no rules match event type");
            return Ok(());
        }
        debug!(event_type = %event.event_type, count = rules.len(), "found matching rules");

        // Steps 4-5: evaluate every rule; fires enqueue notifications.
        for rule in &rules {
            self.evaluate_rule(event, rule).await;
        }

        info!(
            event_id = %event.event_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "event processing complete"
        );
        Ok(())
    }

    async fn evaluate_rule(&self, event: &Event, rule: &Rule) {
        let started = Instant::now();
        let result = self.router.evaluate(event, rule, Utc::now()).await;

        let notification_status = if result.should_trigger {
            info!(
                rule_id = %rule.rule_id,
                event_id = %event.event_id,
                confidence = ?result.confidence,
                reason = %result.reason,
                "rule triggered"
            );
            metrics::counter!("trigger_rules_fired").increment(1);

            match self
                .dispatcher
                .dispatch(rule, &event.context_key, &result, Some(event), Utc::now())
                .await
            {
                Ok(DispatchStatus::Queued) => {
                    // One record per evaluation: the notification worker
                    // writes it at the delivery outcome.
                    return;
                }
                Ok(_) => NotificationStatus::Skipped,
                Err(e) => {
                    error!(rule_id = %rule.rule_id, error = %e, "notification dispatch failed");
                    NotificationStatus::Failed
                }
            }
        } else {
            debug!(
                rule_id = %rule.rule_id,
                event_id = %event.event_id,
                reason = %result.reason,
                "rule not triggered"
            );
            NotificationStatus::Skipped
        };

        let record = ExecutionRecord::new(
            &rule.rule_id,
            Some(&event.event_id),
            &event.context_key,
            result.should_trigger,
            result.confidence,
            &result.reason,
            notification_status,
            started.elapsed().as_millis() as u64,
            Utc::now(),
        );
        self.executions.record(&record).await;
    }
}

/// Retry an individual store operation briefly before surfacing the error.
async fn with_store_retry<T, F, Fut>(mut op: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < STORE_RETRIES => {
                attempt += 1;
                debug!(error = %e, attempt, "store operation failed, retrying");
                tokio::time::sleep(STORE_RETRY_DELAY).await;
            }
            Err(e) => return Err(e),
        }
    }
}
