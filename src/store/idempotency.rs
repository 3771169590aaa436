//! Idempotency markers for processed events.

use std::time::Duration;

use crate::store::{keys, SharedBackend, StoreResult};

/// Processed-event markers with a one-hour horizon.
#[derive(Clone)]
pub struct IdempotencyStore {
    backend: SharedBackend,
}

/// Replays of an event within this window are dropped.
pub const PROCESSED_TTL: Duration = Duration::from_secs(3600);

impl IdempotencyStore {
    /// Create the store.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Atomically mark an event as processed.
    ///
    /// Returns `true` when this call claimed the event, `false` when it was
    /// already processed inside the TTL window.
    pub async fn mark_processed(&self, event_id: &str) -> StoreResult<bool> {
        self.backend
            .set_nx_ex(&keys::processed(event_id), "1", PROCESSED_TTL)
            .await
    }

    /// Whether the event was already processed.
    pub async fn is_processed(&self, event_id: &str) -> StoreResult<bool> {
        self.backend.exists(&keys::processed(event_id)).await
    }
}
