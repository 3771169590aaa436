//! Context window storage over sorted sets.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::event::Event;
use crate::store::{keys, SharedBackend, StoreResult};

/// Context windows: per-key ordered logs of recent events, bounded by time
/// and count. Eviction happens eagerly on every append.
#[derive(Clone)]
pub struct ContextStore {
    backend: SharedBackend,
    window: Duration,
    max_events: usize,
}

impl ContextStore {
    /// Create a store bounded by `window` seconds and `max_events` entries.
    pub fn new(backend: SharedBackend, window: Duration, max_events: usize) -> Self {
        Self {
            backend,
            window,
            max_events,
        }
    }

    /// Append an event, trim by time and count, refresh the key TTL.
    pub async fn add_event(&self, event: &Event, now: DateTime<Utc>) -> StoreResult<()> {
        let key = keys::context(&event.context_key);
        let entry = event.to_context_entry();

        self.backend
            .zadd(&key, &entry, event.timestamp_ms() as f64)
            .await?;

        // Time trim, then count trim, oldest first.
        self.backend
            .zrem_range_by_score(&key, (self.cutoff_ms(now) - 1) as f64)
            .await?;
        let count = self.backend.zcard(&key).await?;
        if count > self.max_events {
            let excess = (count - self.max_events) as isize;
            self.backend
                .zrem_range_by_rank(&key, 0, excess - 1)
                .await?;
        }

        self.backend
            .expire(&key, self.window + Duration::from_secs(60))
            .await?;
        Ok(())
    }

    /// Events currently inside the window, ascending by timestamp.
    pub async fn events(&self, context_key: &str, now: DateTime<Utc>) -> StoreResult<Vec<Event>> {
        let key = keys::context(context_key);
        let entries = self
            .backend
            .zrange_by_score(&key, self.cutoff_ms(now) as f64)
            .await?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in &entries {
            match Event::from_context_entry(entry, context_key) {
                Ok(event) => events.push(event),
                Err(e) => warn!(context_key, error = %e, "skipping corrupt context entry"),
            }
        }
        Ok(events)
    }

    /// Number of in-window events.
    pub async fn count(&self, context_key: &str, now: DateTime<Utc>) -> StoreResult<usize> {
        Ok(self.events(context_key, now).await?.len())
    }

    /// Drop a whole window.
    pub async fn clear(&self, context_key: &str) -> StoreResult<()> {
        self.backend.del(&keys::context(context_key)).await
    }

    fn cutoff_ms(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis() - (self.window.as_millis() as i64)
    }
}
