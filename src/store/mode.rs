//! Trigger-mode state: batch accumulators and interval clocks.
//!
//! All state lives in the store behind atomic primitives so that multiple
//! worker processes make consistent decisions: RPUSH + SETNX for batch
//! accumulation, an atomic drain for the flush, SET NX EX for the interval
//! lock.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::event::Event;
use crate::store::{keys, SharedBackend, StoreResult};

/// Trigger-mode state TTL; stale state self-cleans after an hour.
const STATE_TTL: Duration = Duration::from_secs(3600);

/// Store for per-(rule, context key) trigger-mode state.
#[derive(Clone)]
pub struct TriggerModeStore {
    backend: SharedBackend,
}

impl TriggerModeStore {
    /// Create the store.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Append an event to the batch accumulator; returns the new size.
    ///
    /// The first append also arms the `batch_since` timestamp that the
    /// timeout flush measures against.
    pub async fn add_to_batch(
        &self,
        rule_id: &str,
        context_key: &str,
        event: &Event,
        max_wait: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<usize> {
        let key = keys::batch(rule_id, context_key);
        let size = self.backend.rpush(&key, &event.to_context_entry()).await?;
        self.backend.expire(&key, max_wait + STATE_TTL).await?;

        self.backend
            .set_nx_ex(
                &keys::batch_since(rule_id, context_key),
                &now.timestamp_millis().to_string(),
                max_wait + STATE_TTL,
            )
            .await?;
        Ok(size)
    }

    /// Arrival time of the oldest pending batch event.
    pub async fn batch_since(
        &self,
        rule_id: &str,
        context_key: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let raw = self
            .backend
            .get(&keys::batch_since(rule_id, context_key))
            .await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Atomically snapshot and clear the batch accumulator.
    ///
    /// Every appended event lands in exactly one snapshot even under
    /// concurrent appends and flushes.
    pub async fn drain_batch(
        &self,
        rule_id: &str,
        context_key: &str,
    ) -> StoreResult<Vec<Event>> {
        let entries = self
            .backend
            .drain_list(
                &keys::batch(rule_id, context_key),
                &keys::batch_since(rule_id, context_key),
            )
            .await?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in &entries {
            match Event::from_context_entry(entry, context_key) {
                Ok(event) => events.push(event),
                Err(e) => warn!(rule_id, context_key, error = %e, "skipping corrupt batch entry"),
            }
        }
        Ok(events)
    }

    /// Context keys with a pending batch for this rule.
    pub async fn pending_batch_keys(&self, rule_id: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("trigger:mode:batch_since:{rule_id}");
        let found = self
            .backend
            .scan_keys(&keys::batch_since_pattern(rule_id))
            .await?;
        Ok(found
            .iter()
            .filter_map(|key| keys::context_key_suffix(key, &prefix))
            .map(|s| s.to_string())
            .collect())
    }

    /// Timestamp of the last interval analysis, if any.
    pub async fn last_analysis(
        &self,
        rule_id: &str,
        context_key: &str,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let raw = self
            .backend
            .get(&keys::last_analysis(rule_id, context_key))
            .await?;
        Ok(raw
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }

    /// Record an interval analysis.
    pub async fn set_last_analysis(
        &self,
        rule_id: &str,
        context_key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.backend
            .set_ex(
                &keys::last_analysis(rule_id, context_key),
                &now.timestamp_millis().to_string(),
                STATE_TTL,
            )
            .await
    }

    /// Context keys with an armed interval clock for this rule.
    pub async fn interval_clock_keys(&self, rule_id: &str) -> StoreResult<Vec<String>> {
        let prefix = format!("trigger:mode:last:{rule_id}");
        let found = self
            .backend
            .scan_keys(&keys::last_analysis_pattern(rule_id))
            .await?;
        Ok(found
            .iter()
            .filter_map(|key| keys::context_key_suffix(key, &prefix))
            .map(|s| s.to_string())
            .collect())
    }

    /// Try to take the advisory interval lock; a single process wins.
    pub async fn try_lock_interval(
        &self,
        rule_id: &str,
        interval: Duration,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.backend
            .set_nx_ex(
                &keys::interval_lock(rule_id),
                &now.timestamp_millis().to_string(),
                interval,
            )
            .await
    }

    /// Release the interval lock after the analysis completes.
    pub async fn release_interval_lock(&self, rule_id: &str) -> StoreResult<()> {
        self.backend.del(&keys::interval_lock(rule_id)).await
    }
}
