//! Periodic tick: time-driven trigger-mode work.
//!
//! Batch-timeout flushes and interval fires must happen even when no event
//! arrives for a key, so a scheduler independent of event arrival walks the
//! active rule set and examines store state. The tick is idempotent across
//! workers: the batch drain and the interval lock each win at most once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::engine::RuleRouter;
use crate::event::Event;
use crate::execution::{ExecutionRecord, NotificationStatus};
use crate::notify::{DispatchStatus, NotificationDispatcher};
use crate::rule::{LlmSettings, Rule, TriggerMode};
use crate::store::{ExecutionStore, RuleCache, StoreResult};

/// Cadence of the tick loop.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic scheduler for batch timeouts and interval analyses.
pub struct PeriodicTick {
    rules: Arc<RuleCache>,
    router: Arc<RuleRouter>,
    dispatcher: Arc<NotificationDispatcher>,
    executions: ExecutionStore,
}

impl PeriodicTick {
    /// Create the tick.
    pub fn new(
        rules: Arc<RuleCache>,
        router: Arc<RuleRouter>,
        dispatcher: Arc<NotificationDispatcher>,
        executions: ExecutionStore,
    ) -> Self {
        Self {
            rules,
            router,
            dispatcher,
            executions,
        }
    }

    /// Run the tick loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("periodic tick started");
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick(Utc::now()).await {
                        error!(error = %e, "periodic tick failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!("periodic tick stopped");
    }

    /// One sweep over the active rule set.
    pub async fn tick(&self, now: DateTime<Utc>) -> StoreResult<()> {
        for rule in self.rules.enabled().await? {
            let Some(llm) = rule.rule_config.llm_config.clone() else {
                continue;
            };
            match llm.trigger_mode {
                TriggerMode::Batch => self.sweep_batches(&rule, &llm, now).await?,
                TriggerMode::Interval => self.sweep_intervals(&rule, &llm, now).await?,
                TriggerMode::Realtime => {}
            }
        }
        Ok(())
    }

    /// Flush accumulators whose `max_wait_seconds` elapsed with no new
    /// event to carry them over the line.
    async fn sweep_batches(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let max_wait = Duration::from_secs(llm.max_wait_seconds.unwrap_or(0));
        let modes = self.router.modes().store();

        for context_key in modes.pending_batch_keys(&rule.rule_id).await? {
            let Some(since) = modes.batch_since(&rule.rule_id, &context_key).await? else {
                continue;
            };
            let waited = (now - since).to_std().unwrap_or_default();
            if waited < max_wait {
                continue;
            }

            let batch = modes.drain_batch(&rule.rule_id, &context_key).await?;
            if batch.is_empty() {
                // Another worker's tick or an event-driven flush won.
                continue;
            }

            debug!(
                rule_id = %rule.rule_id,
                context_key = %context_key,
                size = batch.len(),
                "flushing batch on timeout"
            );
            let current = batch.last().cloned();
            let result = self
                .router
                .analyze(rule, llm, &context_key, current.as_ref(), Some(&batch), now)
                .await;
            self.finish_analysis(rule, &context_key, current.as_ref(), result, now)
                .await;
        }
        Ok(())
    }

    /// Fire interval analyses whose clocks elapsed, including for keys with
    /// an empty window.
    async fn sweep_intervals(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let interval = Duration::from_secs(llm.interval_seconds.unwrap_or(0));
        let modes = self.router.modes().store();

        for context_key in modes.interval_clock_keys(&rule.rule_id).await? {
            let Some(last) = modes.last_analysis(&rule.rule_id, &context_key).await? else {
                continue;
            };
            let elapsed = (now - last).to_std().unwrap_or_default();
            if elapsed < interval {
                continue;
            }
            if !modes.try_lock_interval(&rule.rule_id, interval, now).await? {
                continue;
            }

            debug!(
                rule_id = %rule.rule_id,
                context_key = %context_key,
                "running interval analysis from tick"
            );
            let result = self
                .router
                .analyze(rule, llm, &context_key, None, None, now)
                .await;
            self.finish_analysis(rule, &context_key, None, result, now).await;
        }
        Ok(())
    }

    async fn finish_analysis(
        &self,
        rule: &Rule,
        context_key: &str,
        current: Option<&Event>,
        result: crate::engine::EvaluationResult,
        now: DateTime<Utc>,
    ) {
        let started = Instant::now();
        let notification_status = if result.should_trigger {
            info!(rule_id = %rule.rule_id, context_key, reason = %result.reason, "tick-driven rule fire");
            match self
                .dispatcher
                .dispatch(rule, context_key, &result, current, now)
                .await
            {
                Ok(DispatchStatus::Queued) => {
                    // One record per evaluation: the notification worker
                    // writes it at the delivery outcome.
                    return;
                }
                Ok(_) => NotificationStatus::Skipped,
                Err(e) => {
                    warn!(rule_id = %rule.rule_id, error = %e, "tick dispatch failed");
                    NotificationStatus::Failed
                }
            }
        } else {
            NotificationStatus::Skipped
        };

        let record = ExecutionRecord::new(
            &rule.rule_id,
            current.map(|e| e.event_id.as_str()),
            context_key,
            result.should_trigger,
            result.confidence,
            &result.reason,
            notification_status,
            started.elapsed().as_millis() as u64,
            now,
        );
        self.executions.record(&record).await;
    }
}
