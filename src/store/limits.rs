//! Notification dedup markers and per-minute rate counters.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::{keys, SharedBackend, StoreResult};

/// TTL on per-minute counters; outlives the minute they count.
const RATE_KEY_TTL: Duration = Duration::from_secs(120);

/// Dedup and rate-limit gate state for the notification pipeline.
#[derive(Clone)]
pub struct NotificationLimits {
    backend: SharedBackend,
}

impl NotificationLimits {
    /// Create the store.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Whether `(rule, context key)` is still inside its cooldown window.
    pub async fn in_cooldown(&self, rule_id: &str, context_key: &str) -> StoreResult<bool> {
        self.backend
            .exists(&keys::notify_dedup(rule_id, context_key))
            .await
    }

    /// Arm the cooldown window after a successful enqueue.
    pub async fn start_cooldown(
        &self,
        rule_id: &str,
        context_key: &str,
        cooldown: Duration,
    ) -> StoreResult<()> {
        if cooldown.is_zero() {
            return Ok(());
        }
        self.backend
            .set_ex(&keys::notify_dedup(rule_id, context_key), "1", cooldown)
            .await
    }

    /// Count this enqueue attempt against the rule's clock minute.
    ///
    /// Returns `true` when the post-increment count is within
    /// `max_per_minute`. `max_per_minute = 0` blocks everything.
    pub async fn check_rate(
        &self,
        rule_id: &str,
        max_per_minute: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let minute = now.format("%Y%m%d%H%M").to_string();
        let key = keys::notify_rate(rule_id, &minute);
        let count = self.backend.incr(&key).await?;
        if count == 1 {
            self.backend.expire(&key, RATE_KEY_TTL).await?;
        }
        Ok(count <= max_per_minute as i64)
    }
}
