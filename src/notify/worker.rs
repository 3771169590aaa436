//! Notification queue worker: fan-out, bounded retries, dead letter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::consumer::retry::RetryPolicy;
use crate::execution::{ExecutionRecord, NotificationStatus};
use crate::notify::channel::{NotificationChannel, SendOutcome};
use crate::notify::task::NotificationTask;
use crate::store::{ExecutionStore, NotificationQueue, StoreResult};

/// Blocking-pop timeout per poll.
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Worker draining the notification queue.
///
/// A task succeeds only when every target succeeds. Transient failures
/// requeue with exponential backoff until the retry budget runs out;
/// permanent failures and exhausted tasks land in the dead letter.
pub struct NotificationWorker {
    queue: NotificationQueue,
    channels: HashMap<&'static str, Arc<dyn NotificationChannel>>,
    policy: RetryPolicy,
    max_retry: u32,
    executions: ExecutionStore,
}

impl NotificationWorker {
    /// Create a worker over the given channels.
    pub fn new(
        queue: NotificationQueue,
        channels: Vec<Arc<dyn NotificationChannel>>,
        policy: RetryPolicy,
        max_retry: u32,
        executions: ExecutionStore,
    ) -> Self {
        let channels = channels.into_iter().map(|c| (c.name(), c)).collect();
        Self {
            queue,
            channels,
            policy,
            max_retry,
            executions,
        }
    }

    /// Drain the queue until shutdown. In-flight work finishes before the
    /// loop exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("notification worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                polled = self.queue.dequeue(POLL_TIMEOUT) => {
                    match polled {
                        Ok(Some(task)) => self.process_task(task).await,
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "notification queue poll failed");
                            tokio::time::sleep(Duration::from_secs(1)).await;
                        }
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("notification worker stopped");
    }

    /// Process one task to completion: deliver, requeue, or dead-letter.
    pub async fn process_task(&self, task: NotificationTask) {
        let now = Utc::now();

        // Deferred retries go back on the queue until their time comes.
        if task.is_deferred(now) {
            debug!(task_id = %task.task_id, "task deferred, requeueing");
            if let Err(e) = self.queue.requeue(&task).await {
                error!(task_id = %task.task_id, error = %e, "failed to requeue deferred task");
            }
            // Don't spin when only deferred tasks remain.
            tokio::time::sleep(Duration::from_millis(200)).await;
            return;
        }

        debug!(task_id = %task.task_id, targets = task.targets.len(), "processing notification");

        let mut transient: Option<String> = None;
        let mut permanent: Option<String> = None;

        for target in &task.targets {
            let outcome = match self.channels.get(target.channel()) {
                Some(channel) => channel.send(target, &task).await,
                None => SendOutcome::Permanent(format!(
                    "no channel configured for '{}'",
                    target.channel()
                )),
            };
            metrics::counter!("trigger_channel_sends", "outcome" => outcome.label())
                .increment(1);
            match outcome {
                SendOutcome::Delivered => {}
                SendOutcome::Transient(detail) => {
                    warn!(task_id = %task.task_id, channel = target.channel(), detail, "transient send failure");
                    transient.get_or_insert(detail);
                }
                SendOutcome::Permanent(detail) => {
                    warn!(task_id = %task.task_id, channel = target.channel(), detail, "permanent send failure");
                    permanent.get_or_insert(detail);
                }
            }
        }

        if let Some(detail) = permanent {
            // Never going to succeed: straight to the dead letter.
            self.bury(task, &format!("permanent: {detail}")).await;
            return;
        }

        if let Some(detail) = transient {
            self.retry_or_bury(task, &detail).await;
            return;
        }

        info!(task_id = %task.task_id, "notification delivered");
        metrics::counter!("trigger_notifications_sent").increment(1);
        self.record(&task, true).await;
    }

    async fn retry_or_bury(&self, mut task: NotificationTask, detail: &str) {
        task.retry_count += 1;
        if !task.should_retry(self.max_retry) {
            self.bury(task, &format!("retries exhausted: {detail}")).await;
            return;
        }

        let backoff = self.policy.next_backoff(task.retry_count);
        task.retry_after = Some(
            Utc::now()
                + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero()),
        );
        info!(
            task_id = %task.task_id,
            retry_count = task.retry_count,
            backoff_ms = backoff.as_millis() as u64,
            "notification requeued for retry"
        );
        if let Err(e) = self.queue.requeue(&task).await {
            error!(task_id = %task.task_id, error = %e, "failed to requeue task");
        }
    }

    async fn bury(&self, task: NotificationTask, detail: &str) {
        warn!(task_id = %task.task_id, detail, "notification moved to dead letter");
        metrics::counter!("trigger_notifications_dead_lettered").increment(1);
        if let Err(e) = self.queue.dead_letter(&task).await {
            error!(task_id = %task.task_id, error = %e, "failed to dead-letter task");
        }
        self.record(&task, false).await;
    }

    async fn record(&self, task: &NotificationTask, delivered: bool) {
        let status = if delivered {
            NotificationStatus::Sent
        } else {
            NotificationStatus::Failed
        };
        let record = ExecutionRecord::new(
            &task.rule_id,
            task.metadata
                .get("event_id")
                .and_then(|v| v.as_str()),
            &task.context_key,
            true,
            task.metadata.get("confidence").and_then(|v| v.as_f64()),
            task.metadata
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or(""),
            status,
            0,
            Utc::now(),
        );
        self.executions.record(&record).await;
    }

    /// Queue handle (used by the drain loop at shutdown).
    pub fn queue(&self) -> &NotificationQueue {
        &self.queue
    }
}

/// Drain check used by graceful shutdown: whether anything is still queued.
pub async fn queue_is_idle(queue: &NotificationQueue) -> StoreResult<bool> {
    queue.is_empty().await
}
