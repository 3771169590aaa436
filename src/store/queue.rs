//! Durable notification queue and dead letter.

use std::time::Duration;

use crate::notify::task::NotificationTask;
use crate::store::{keys, SharedBackend, StoreResult};

/// Notification task queue backed by a Redis list.
///
/// LPUSH producers, BRPOP consumer; exhausted tasks move to the dead-letter
/// list for operator triage.
#[derive(Clone)]
pub struct NotificationQueue {
    backend: SharedBackend,
}

impl NotificationQueue {
    /// Create the queue.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Push a task onto the queue.
    pub async fn enqueue(&self, task: &NotificationTask) -> StoreResult<()> {
        let raw = serde_json::to_string(task)?;
        self.backend.lpush(keys::NOTIFY_QUEUE, &raw).await?;
        Ok(())
    }

    /// Blocking-pop the next task; `None` on timeout.
    pub async fn dequeue(&self, timeout: Duration) -> StoreResult<Option<NotificationTask>> {
        match self.backend.brpop(keys::NOTIFY_QUEUE, timeout).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Requeue a task (retry or deferred delivery).
    pub async fn requeue(&self, task: &NotificationTask) -> StoreResult<()> {
        self.enqueue(task).await
    }

    /// Move a task to the dead-letter list.
    pub async fn dead_letter(&self, task: &NotificationTask) -> StoreResult<()> {
        let raw = serde_json::to_string(task)?;
        self.backend.lpush(keys::NOTIFY_DEAD_LETTER, &raw).await?;
        Ok(())
    }

    /// Current queue length.
    pub async fn len(&self) -> StoreResult<usize> {
        self.backend.llen(keys::NOTIFY_QUEUE).await
    }

    /// Whether the queue is empty.
    pub async fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Tasks currently in the dead-letter list, newest first.
    pub async fn dead_letters(&self) -> StoreResult<Vec<NotificationTask>> {
        let raws = self.backend.lrange(keys::NOTIFY_DEAD_LETTER, 0, -1).await?;
        let mut tasks = Vec::with_capacity(raws.len());
        for raw in &raws {
            tasks.push(serde_json::from_str(raw)?);
        }
        Ok(tasks)
    }
}
