//! Shared test harness: in-memory pipeline with scripted LLM provider and
//! notification channels.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;

use trigger_rs::config::Settings;
use trigger_rs::consumer::RetryPolicy;
use trigger_rs::context::ContextWindowManager;
use trigger_rs::engine::llm::{ChatMessage, ChatProvider, LlmEngine, LlmError, TriggerModeController};
use trigger_rs::engine::{ExpressionEngine, RuleRouter};
use trigger_rs::event::Event;
use trigger_rs::handler::EventHandler;
use trigger_rs::notify::{
    NotificationChannel, NotificationDispatcher, NotificationWorker, SendOutcome,
};
use trigger_rs::rule::Rule;
use trigger_rs::store::{
    ContextStore, ExecutionStore, IdempotencyStore, LlmCacheStore, MemoryBackend,
    NotificationLimits, NotificationQueue, RuleCache, RuleStore, SharedBackend, TriggerModeStore,
};
use trigger_rs::ticker::PeriodicTick;

/// Chat provider returning a fixed response and counting calls.
pub struct ScriptedProvider {
    response: String,
    pub calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(response: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            response: response.into(),
            calls: AtomicUsize::new(0),
        })
    }

    /// Standard affirmative decision above the default threshold.
    pub fn firing() -> Arc<Self> {
        Self::new(r#"{"should_trigger": true, "confidence": 0.9, "reason": "pattern detected"}"#)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    async fn complete(
        &self,
        _messages: Vec<ChatMessage>,
        _temperature: f32,
        _max_tokens: u32,
    ) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.response.clone())
    }
}

/// Channel producing scripted outcomes, then a default, and counting calls.
pub struct ScriptedChannel {
    name: &'static str,
    outcomes: Mutex<VecDeque<SendOutcome>>,
    default: SendOutcome,
    pub calls: AtomicUsize,
}

impl ScriptedChannel {
    pub fn delivering(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcomes: Mutex::new(VecDeque::new()),
            default: SendOutcome::Delivered,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(name: &'static str, outcome: SendOutcome) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcomes: Mutex::new(VecDeque::new()),
            default: outcome,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn scripted(
        name: &'static str,
        outcomes: Vec<SendOutcome>,
        default: SendOutcome,
    ) -> Arc<Self> {
        Arc::new(Self {
            name,
            outcomes: Mutex::new(outcomes.into()),
            default,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationChannel for ScriptedChannel {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(
        &self,
        _target: &trigger_rs::rule::NotifyTarget,
        _task: &trigger_rs::notify::NotificationTask,
    ) -> SendOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

/// Fully wired in-memory pipeline.
pub struct TestPipeline {
    pub backend: SharedBackend,
    pub rule_store: RuleStore,
    pub rules: Arc<RuleCache>,
    pub handler: EventHandler,
    pub router: Arc<RuleRouter>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub queue: NotificationQueue,
    pub limits: NotificationLimits,
    pub executions: ExecutionStore,
    pub tick: PeriodicTick,
}

impl TestPipeline {
    pub fn new(provider: Arc<dyn ChatProvider>) -> Self {
        Self::with_window(provider, Duration::from_secs(300), 100)
    }

    pub fn with_window(
        provider: Arc<dyn ChatProvider>,
        window: Duration,
        max_events: usize,
    ) -> Self {
        let backend: SharedBackend = Arc::new(MemoryBackend::new());

        let rule_store = RuleStore::new(backend.clone());
        let rules = Arc::new(RuleCache::new(rule_store.clone()));
        let context =
            ContextWindowManager::new(ContextStore::new(backend.clone(), window, max_events));
        let llm = LlmEngine::new(provider, LlmCacheStore::new(backend.clone()));
        let modes = TriggerModeController::new(TriggerModeStore::new(backend.clone()));
        let router = Arc::new(RuleRouter::new(
            ExpressionEngine::new(),
            llm,
            modes,
            context.clone(),
        ));

        let queue = NotificationQueue::new(backend.clone());
        let limits = NotificationLimits::new(backend.clone());
        let dispatcher = Arc::new(NotificationDispatcher::new(queue.clone(), limits.clone()));
        let executions = ExecutionStore::new(backend.clone());

        let handler = EventHandler::new(
            IdempotencyStore::new(backend.clone()),
            context,
            rules.clone(),
            router.clone(),
            dispatcher.clone(),
            executions.clone(),
        );

        let tick = PeriodicTick::new(
            rules.clone(),
            router.clone(),
            dispatcher.clone(),
            executions.clone(),
        );

        Self {
            backend,
            rule_store,
            rules,
            handler,
            router,
            dispatcher,
            queue,
            limits,
            executions,
            tick,
        }
    }

    pub async fn add_rule(&self, rule: Rule) -> Rule {
        self.rule_store.create(rule, Utc::now()).await.unwrap()
    }

    /// A worker over this pipeline's queue with the given channels.
    pub fn worker(
        &self,
        channels: Vec<Arc<dyn NotificationChannel>>,
        max_retry: u32,
    ) -> NotificationWorker {
        NotificationWorker::new(
            self.queue.clone(),
            channels,
            RetryPolicy::fixed(max_retry, Duration::from_millis(1)),
            max_retry,
            self.executions.clone(),
        )
    }
}

/// Drain the queue through a worker until it is empty or the iteration
/// budget runs out, so delivery-outcome records get written.
pub async fn deliver_all(pipeline: &TestPipeline, worker: &NotificationWorker) {
    for _ in 0..50 {
        match pipeline
            .queue
            .dequeue(Duration::from_millis(20))
            .await
            .unwrap()
        {
            Some(task) => worker.process_task(task).await,
            None => break,
        }
    }
}

/// Expression rule with a telegram target.
pub fn expression_rule(rule_id: &str, event_type: &str, expression: &str) -> Rule {
    serde_json::from_value(json!({
        "rule_id": rule_id,
        "name": format!("rule {rule_id}"),
        "event_types": [event_type],
        "rule_config": {
            "kind": "expression",
            "pre_filter": {"type": "expression", "expression": expression}
        },
        "notify_policy": {
            "targets": [{"type": "telegram", "chat_id": "123"}],
            "rate_limit": {"max_per_minute": 10, "cooldown_seconds": 60}
        }
    }))
    .unwrap()
}

/// LLM rule; `config` merges into `llm_config`.
pub fn llm_rule(rule_id: &str, event_type: &str, llm_config: serde_json::Value) -> Rule {
    serde_json::from_value(json!({
        "rule_id": rule_id,
        "name": format!("rule {rule_id}"),
        "event_types": [event_type],
        "rule_config": {
            "kind": "llm",
            "llm_config": llm_config
        },
        "notify_policy": {
            "targets": [{"type": "telegram", "chat_id": "123"}],
            "rate_limit": {"max_per_minute": 10, "cooldown_seconds": 60}
        }
    }))
    .unwrap()
}

/// Hybrid rule with a pre-filter and realtime LLM config.
pub fn hybrid_rule(rule_id: &str, event_type: &str, expression: &str) -> Rule {
    serde_json::from_value(json!({
        "rule_id": rule_id,
        "name": format!("rule {rule_id}"),
        "event_types": [event_type],
        "rule_config": {
            "kind": "hybrid",
            "pre_filter": {"type": "expression", "expression": expression},
            "llm_config": {
                "description": "decide based on recent pattern",
                "trigger_mode": "realtime"
            }
        },
        "notify_policy": {
            "targets": [{"type": "telegram", "chat_id": "123"}],
            "rate_limit": {"max_per_minute": 10, "cooldown_seconds": 60}
        }
    }))
    .unwrap()
}

/// Build an event with payload data.
pub fn event(event_id: &str, event_type: &str, context_key: &str, data: serde_json::Value) -> Event {
    event_at(event_id, event_type, context_key, data, Utc::now())
}

pub fn event_at(
    event_id: &str,
    event_type: &str,
    context_key: &str,
    data: serde_json::Value,
    timestamp: DateTime<Utc>,
) -> Event {
    Event {
        event_id: event_id.to_string(),
        event_type: event_type.to_string(),
        context_key: context_key.to_string(),
        timestamp,
        data: data.as_object().cloned().unwrap_or_default(),
    }
}

/// Unused-settings helper for components that need one.
pub fn settings() -> Settings {
    Settings::default()
}
