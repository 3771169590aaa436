//! Trigger-mode state machines.
//!
//! For each (rule, context key) the controller decides whether the current
//! event skips, pends, or triggers LLM inference. All state is in the
//! shared store: an in-process map would split-brain the moment a second
//! worker process starts.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::event::Event;
use crate::rule::{LlmSettings, Rule, TriggerMode};
use crate::store::{StoreResult, TriggerModeStore};

/// Per-event decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    /// Run inference now.
    Trigger,
    /// Event accumulated; waiting for more.
    Pending,
    /// Conditions not met; do nothing.
    Skip,
}

/// Decision plus the payload that goes with it.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    /// The decision.
    pub decision: TriggerDecision,
    /// Why the decision was made.
    pub reason: String,
    /// Batch mode: the flushed accumulator snapshot on `Trigger`.
    pub batch: Option<Vec<Event>>,
}

impl TriggerOutcome {
    fn skip(reason: impl Into<String>) -> Self {
        Self {
            decision: TriggerDecision::Skip,
            reason: reason.into(),
            batch: None,
        }
    }

    fn pending(reason: impl Into<String>) -> Self {
        Self {
            decision: TriggerDecision::Pending,
            reason: reason.into(),
            batch: None,
        }
    }

    fn trigger(reason: impl Into<String>) -> Self {
        Self {
            decision: TriggerDecision::Trigger,
            reason: reason.into(),
            batch: None,
        }
    }
}

/// Trigger-mode controller over store-backed state.
#[derive(Clone)]
pub struct TriggerModeController {
    store: TriggerModeStore,
}

impl TriggerModeController {
    /// Create a controller.
    pub fn new(store: TriggerModeStore) -> Self {
        Self { store }
    }

    /// Access the underlying state store (used by the periodic tick).
    pub fn store(&self) -> &TriggerModeStore {
        &self.store
    }

    /// Decide what to do with this event for this rule.
    pub async fn decide(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        event: &Event,
        now: DateTime<Utc>,
    ) -> StoreResult<TriggerOutcome> {
        match llm.trigger_mode {
            TriggerMode::Realtime => Ok(TriggerOutcome::trigger("realtime: analyze every event")),
            TriggerMode::Batch => self.decide_batch(rule, llm, event, now).await,
            TriggerMode::Interval => self.decide_interval(rule, llm, event, now).await,
        }
    }

    /// Record a completed analysis: stamps the interval clock and releases
    /// the advisory lock. Batch accumulators are already cleared by the
    /// atomic flush.
    pub async fn mark_analyzed(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        context_key: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.store
            .set_last_analysis(&rule.rule_id, context_key, now)
            .await?;
        if llm.trigger_mode == TriggerMode::Interval {
            self.store.release_interval_lock(&rule.rule_id).await?;
        }
        Ok(())
    }

    async fn decide_batch(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        event: &Event,
        now: DateTime<Utc>,
    ) -> StoreResult<TriggerOutcome> {
        let batch_size = llm.batch_size.unwrap_or(1) as usize;
        let max_wait = Duration::from_secs(llm.max_wait_seconds.unwrap_or(0));

        let size = self
            .store
            .add_to_batch(&rule.rule_id, &event.context_key, event, max_wait, now)
            .await?;

        if size >= batch_size {
            let batch = self
                .store
                .drain_batch(&rule.rule_id, &event.context_key)
                .await?;
            // A concurrent flush may have taken the accumulator first.
            if batch.is_empty() {
                return Ok(TriggerOutcome::skip("batch taken by concurrent flush"));
            }
            let mut outcome =
                TriggerOutcome::trigger(format!("batch full: {}/{batch_size} events", batch.len()));
            outcome.batch = Some(batch);
            return Ok(outcome);
        }

        if let Some(since) = self
            .store
            .batch_since(&rule.rule_id, &event.context_key)
            .await?
        {
            let waited = (now - since).to_std().unwrap_or_default();
            if waited >= max_wait {
                let batch = self
                    .store
                    .drain_batch(&rule.rule_id, &event.context_key)
                    .await?;
                if batch.is_empty() {
                    return Ok(TriggerOutcome::skip("batch taken by concurrent flush"));
                }
                let mut outcome = TriggerOutcome::trigger(format!(
                    "batch timeout: waited {}s >= {}s",
                    waited.as_secs(),
                    max_wait.as_secs()
                ));
                outcome.batch = Some(batch);
                return Ok(outcome);
            }
        }

        Ok(TriggerOutcome::pending(format!(
            "batch pending: {size}/{batch_size} events"
        )))
    }

    async fn decide_interval(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        event: &Event,
        now: DateTime<Utc>,
    ) -> StoreResult<TriggerOutcome> {
        let interval = Duration::from_secs(llm.interval_seconds.unwrap_or(0));

        if let Some(last) = self
            .store
            .last_analysis(&rule.rule_id, &event.context_key)
            .await?
        {
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < interval {
                return Ok(TriggerOutcome::skip(format!(
                    "interval not reached: {}s < {}s",
                    elapsed.as_secs(),
                    interval.as_secs()
                )));
            }
        }

        if self
            .store
            .try_lock_interval(&rule.rule_id, interval, now)
            .await?
        {
            Ok(TriggerOutcome::trigger(format!(
                "interval reached: analyzing at {}s cadence",
                interval.as_secs()
            )))
        } else {
            debug!(rule_id = %rule.rule_id, "interval analysis already in progress");
            Ok(TriggerOutcome::skip("interval analysis already in progress"))
        }
    }
}
