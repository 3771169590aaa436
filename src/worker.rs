//! Worker process assembly and lifecycle.
//!
//! One worker runs four concurrent tasks over shared store state: the event
//! consumer, the notification worker, the periodic tick, and the rule-cache
//! invalidation listener. Any number of identical workers can run side by
//! side; all coordination goes through the store.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::consumer::{ConsumerConfig, EventConsumer, RetryPolicy, ShutdownState};
use crate::context::ContextWindowManager;
use crate::engine::llm::{LlmEngine, OpenAiProvider, TriggerModeController};
use crate::engine::{ExpressionEngine, RuleRouter};
use crate::error::{Result, TriggerError};
use crate::handler::EventHandler;
use crate::notify::{
    email::EmailChannel, telegram::TelegramChannel, wecom::WecomChannel, NotificationChannel,
    NotificationDispatcher, NotificationWorker,
};
use crate::store::{
    keys, ContextStore, ExecutionStore, IdempotencyStore, LlmCacheStore, NotificationLimits,
    NotificationQueue, RedisBackend, RuleCache, RuleStore, SharedBackend, TriggerModeStore,
};
use crate::ticker::PeriodicTick;

/// Grace window for draining in-flight work at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Coordinates the worker tasks of one process.
pub struct WorkerManager {
    settings: Settings,
}

impl WorkerManager {
    /// Create a manager from settings.
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the worker until ctrl-c, then shut down gracefully: stop
    /// intake, drain in-flight work up to a grace window, cancel the rest.
    pub async fn run(self) -> Result<()> {
        let settings = &self.settings;
        let backend = RedisBackend::connect(&settings.redis_url).await?;
        let shared: SharedBackend = Arc::new(backend);

        let rule_store = RuleStore::new(shared.clone());
        let rules = Arc::new(RuleCache::new(rule_store));

        let context = ContextWindowManager::new(ContextStore::new(
            shared.clone(),
            Duration::from_secs(settings.context_window_seconds),
            settings.context_max_events,
        ));

        let provider = OpenAiProvider::from_settings(settings)
            .map_err(|e| TriggerError::Config(format!("llm provider: {e}")))?;
        let llm_engine = LlmEngine::new(Arc::new(provider), LlmCacheStore::new(shared.clone()));
        let modes = TriggerModeController::new(TriggerModeStore::new(shared.clone()));
        let router = Arc::new(RuleRouter::new(
            ExpressionEngine::new(),
            llm_engine,
            modes,
            context.clone(),
        ));

        let executions = ExecutionStore::new(shared.clone());
        let queue = NotificationQueue::new(shared.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            queue.clone(),
            NotificationLimits::new(shared.clone()),
        ));

        let handler = Arc::new(EventHandler::new(
            IdempotencyStore::new(shared.clone()),
            context,
            rules.clone(),
            router.clone(),
            dispatcher.clone(),
            executions.clone(),
        ));

        let shutdown_state = Arc::new(ShutdownState::new());
        let consumer = EventConsumer::new(
            ConsumerConfig::from_settings(settings),
            handler,
            shutdown_state.clone(),
        )?;

        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(TelegramChannel::new(settings.telegram_bot_token.clone())),
            Arc::new(WecomChannel::new()),
            Arc::new(EmailChannel::from_settings(&settings.smtp)),
        ];
        let notification_worker = NotificationWorker::new(
            queue,
            channels,
            RetryPolicy::exponential(
                settings.notification_max_retry,
                Duration::from_secs(1),
                Duration::from_secs(60),
            ),
            settings.notification_max_retry,
            executions.clone(),
        );

        let tick = PeriodicTick::new(rules.clone(), router, dispatcher, executions);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles: Vec<(&str, JoinHandle<()>)> = Vec::new();

        // Consumer task.
        {
            let shutdown_rx = shutdown_rx.clone();
            handles.push((
                "consumer",
                tokio::spawn(async move {
                    if let Err(e) = consumer.run(shutdown_rx).await {
                        error!(error = %e, "event consumer exited with error");
                    }
                }),
            ));
        }

        // Notification worker task.
        {
            let shutdown_rx = shutdown_rx.clone();
            handles.push((
                "notification-worker",
                tokio::spawn(async move {
                    notification_worker.run(shutdown_rx).await;
                }),
            ));
        }

        // Periodic tick task.
        {
            let shutdown_rx = shutdown_rx.clone();
            handles.push((
                "ticker",
                tokio::spawn(async move {
                    tick.run(shutdown_rx).await;
                }),
            ));
        }

        // Rule update listener: push invalidation for latency; the version
        // counter alone keeps the cache correct.
        {
            let shutdown_rx = shutdown_rx.clone();
            let url = settings.redis_url.clone();
            let rules = rules.clone();
            handles.push((
                "rule-update-listener",
                tokio::spawn(async move {
                    RedisBackend::run_update_listener(
                        &url,
                        keys::RULE_UPDATE_CHANNEL,
                        shutdown_rx,
                        move |_payload| rules.invalidate(),
                    )
                    .await;
                }),
            ));
        }

        info!("worker started");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| TriggerError::Config(format!("signal handler: {e}")))?;
        info!("shutdown signal received");

        shutdown_state.begin();
        shutdown_tx.send(true).ok();

        if !shutdown_state.wait_for_drain(SHUTDOWN_GRACE).await {
            warn!("force-cancelling remaining work");
        }

        for (name, handle) in handles {
            match tokio::time::timeout(Duration::from_secs(10), handle).await {
                Ok(Ok(())) => info!(task = name, "task shut down"),
                Ok(Err(e)) => warn!(task = name, error = %e, "task ended with panic"),
                Err(_) => warn!(task = name, "task did not stop in time, aborted"),
            }
        }

        info!("worker shutdown complete");
        Ok(())
    }
}
