//! LLM inference engine.
//!
//! Pipeline per analysis: cache lookup, context summary, prompt assembly,
//! model call, structured parse, confidence gate, cache write. Transport
//! and parse failures yield non-firing results and are never cached; the
//! engine has no internal retry loop.

/// Model output parsing
pub mod parser;
/// Chat completion provider
pub mod provider;
/// Prompt assembly
pub mod prompt;
/// Trigger-mode state machines
pub mod trigger_mode;

pub use parser::LlmDecision;
pub use provider::{ChatMessage, ChatProvider, LlmError, OpenAiProvider, Role};
pub use trigger_mode::{TriggerDecision, TriggerModeController, TriggerOutcome};

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::context::ContextSummarizer;
use crate::engine::EvaluationResult;
use crate::event::Event;
use crate::rule::{LlmSettings, Rule};
use crate::store::llm_cache::CachedDecision;
use crate::store::LlmCacheStore;

/// Fixed sampling temperature; decisions should be repeatable.
const TEMPERATURE: f32 = 0.1;
/// Decision responses are small; bound the completion.
const MAX_TOKENS: u32 = 500;

/// LLM engine evaluating rules over context windows.
pub struct LlmEngine {
    provider: Arc<dyn ChatProvider>,
    cache: LlmCacheStore,
    summarizer: ContextSummarizer,
}

impl LlmEngine {
    /// Create an engine over a provider and cache.
    pub fn new(provider: Arc<dyn ChatProvider>, cache: LlmCacheStore) -> Self {
        Self {
            provider,
            cache,
            summarizer: ContextSummarizer::new(),
        }
    }

    /// Evaluate a rule.
    ///
    /// `window` is the context-window read; `current` is absent for
    /// tick-driven analyses; `batch` carries the flushed accumulator for
    /// batch-mode rules.
    pub async fn evaluate(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        current: Option<&Event>,
        window: &[Event],
        batch: Option<&[Event]>,
    ) -> EvaluationResult {
        let summary = self.summarizer.summarize(window);
        let cache_key = cache_key(&rule.rule_id, &summary, current, batch);

        match self.cache.get(&rule.rule_id, &cache_key).await {
            Ok(Some(cached)) => {
                debug!(rule_id = %rule.rule_id, "llm cache hit");
                return EvaluationResult {
                    should_trigger: cached.should_trigger,
                    confidence: Some(cached.confidence),
                    reason: format!("{} (cached)", cached.reason),
                };
            }
            Ok(None) => {}
            Err(e) => warn!(rule_id = %rule.rule_id, error = %e, "llm cache read failed"),
        }

        let user_prompt = prompt::build_user_prompt(&llm.description, &summary, current, batch);
        let messages = vec![
            ChatMessage::system(prompt::SYSTEM_PROMPT),
            ChatMessage::user(user_prompt),
        ];

        let content = match self.provider.complete(messages, TEMPERATURE, MAX_TOKENS).await {
            Ok(content) => content,
            Err(e) => {
                warn!(rule_id = %rule.rule_id, error = %e, "llm call failed");
                metrics::counter!("trigger_llm_errors").increment(1);
                return EvaluationResult::no_trigger(format!("llm_error:{}", e.kind()));
            }
        };

        let decision = match parser::parse_response(&content) {
            Ok(decision) => decision,
            Err(detail) => {
                warn!(rule_id = %rule.rule_id, detail, "llm response parse failed");
                metrics::counter!("trigger_llm_parse_errors").increment(1);
                return EvaluationResult::no_trigger(format!("parse_error:{detail}"));
            }
        };

        // Confidence gate: a positive decision below threshold does not stand.
        let threshold = llm.threshold();
        let should_trigger = decision.should_trigger && decision.confidence >= threshold;
        if decision.should_trigger && !should_trigger {
            info!(
                rule_id = %rule.rule_id,
                confidence = decision.confidence,
                threshold,
                "decision gated below confidence threshold"
            );
        }

        let gated = CachedDecision {
            should_trigger,
            confidence: decision.confidence,
            reason: decision.reason,
        };

        if let Err(e) = self.cache.set(&rule.rule_id, &cache_key, &gated).await {
            warn!(rule_id = %rule.rule_id, error = %e, "llm cache write failed");
        }

        info!(
            rule_id = %rule.rule_id,
            should_trigger = gated.should_trigger,
            confidence = gated.confidence,
            "llm evaluation complete"
        );

        EvaluationResult {
            should_trigger: gated.should_trigger,
            confidence: Some(gated.confidence),
            reason: gated.reason,
        }
    }
}

/// Hash of everything that determines a decision: rule, summarized window,
/// current event, and batch payload.
fn cache_key(
    rule_id: &str,
    summary: &str,
    current: Option<&Event>,
    batch: Option<&[Event]>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rule_id.as_bytes());
    hasher.update(b":");
    hasher.update(summary.as_bytes());
    if let Some(event) = current {
        hasher.update(b":");
        hasher.update(event.event_type.as_bytes());
        hasher.update(serde_json::to_string(&event.data).unwrap_or_default().as_bytes());
    }
    if let Some(events) = batch {
        for event in events {
            hasher.update(b":");
            hasher.update(event.event_id.as_bytes());
        }
    }
    let digest = hasher.finalize();
    hex(&digest[..8])
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
