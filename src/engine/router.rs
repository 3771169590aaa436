//! Rule router: dispatches a matched event to the engine composition its
//! rule kind calls for.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::context::ContextWindowManager;
use crate::engine::llm::{LlmEngine, TriggerDecision, TriggerModeController};
use crate::engine::{EvaluationResult, ExpressionEngine};
use crate::event::Event;
use crate::rule::{LlmSettings, Rule, RuleKind};

/// Router composing the expression engine, trigger-mode controller, and
/// LLM engine per rule kind.
pub struct RuleRouter {
    expression: ExpressionEngine,
    llm: LlmEngine,
    modes: TriggerModeController,
    context: ContextWindowManager,
}

impl RuleRouter {
    /// Assemble a router.
    pub fn new(
        expression: ExpressionEngine,
        llm: LlmEngine,
        modes: TriggerModeController,
        context: ContextWindowManager,
    ) -> Self {
        Self {
            expression,
            llm,
            modes,
            context,
        }
    }

    /// The trigger-mode controller (shared with the periodic tick).
    pub fn modes(&self) -> &TriggerModeController {
        &self.modes
    }

    /// Evaluate one event against one rule.
    ///
    /// Never fails the caller: engine and per-rule store errors fold into a
    /// non-firing result so a bad rule cannot block its siblings.
    pub async fn evaluate(
        &self,
        event: &Event,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        debug!(rule_id = %rule.rule_id, kind = ?rule.rule_config.kind, "routing rule evaluation");

        match rule.rule_config.kind {
            RuleKind::Expression => self.evaluate_expression(event, rule),
            RuleKind::Llm => self.evaluate_llm(event, rule, now).await,
            RuleKind::Hybrid => {
                let pre = self.evaluate_expression(event, rule);
                if !pre.should_trigger {
                    // The event never enters the trigger-mode state machine.
                    return EvaluationResult::no_trigger(format!("pre-filter: {}", pre.reason));
                }
                self.evaluate_llm(event, rule, now).await
            }
        }
    }

    /// Run an LLM analysis for a (rule, context key): read the window, call
    /// the engine, stamp trigger-mode state. Shared between event-driven
    /// triggers and the periodic tick.
    pub async fn analyze(
        &self,
        rule: &Rule,
        llm: &LlmSettings,
        context_key: &str,
        current: Option<&Event>,
        batch: Option<&[Event]>,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        let window = match self.context.read(context_key, now).await {
            Ok(window) => window,
            Err(e) => {
                warn!(rule_id = %rule.rule_id, context_key, error = %e, "context read failed");
                return EvaluationResult::no_trigger(format!("store_error:{e}"));
            }
        };

        let result = self.llm.evaluate(rule, llm, current, &window, batch).await;

        if let Err(e) = self.modes.mark_analyzed(rule, llm, context_key, now).await {
            warn!(rule_id = %rule.rule_id, context_key, error = %e, "failed to stamp analysis state");
        }
        result
    }

    fn evaluate_expression(&self, event: &Event, rule: &Rule) -> EvaluationResult {
        let Some(filter) = &rule.rule_config.pre_filter else {
            return EvaluationResult::no_trigger("missing pre_filter");
        };

        let vars = event.flattened_data();
        match self.expression.evaluate(&filter.expression, &vars) {
            Ok(true) => EvaluationResult::trigger(format!("expression matched: {}", filter.expression)),
            Ok(false) => {
                EvaluationResult::no_trigger(format!("expression not matched: {}", filter.expression))
            }
            Err(e) => {
                // Evaluator failures are the rule's fault, not the event's.
                warn!(rule_id = %rule.rule_id, error = %e, "expression evaluation failed");
                metrics::counter!("trigger_expression_errors").increment(1);
                EvaluationResult::no_trigger(format!("expression_error:{e}"))
            }
        }
    }

    async fn evaluate_llm(
        &self,
        event: &Event,
        rule: &Rule,
        now: DateTime<Utc>,
    ) -> EvaluationResult {
        let Some(llm) = rule.rule_config.llm_config.clone() else {
            return EvaluationResult::no_trigger("missing llm_config");
        };

        let outcome = match self.modes.decide(rule, &llm, event, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(rule_id = %rule.rule_id, error = %e, "trigger mode decision failed");
                return EvaluationResult::no_trigger(format!("store_error:{e}"));
            }
        };

        match outcome.decision {
            TriggerDecision::Skip | TriggerDecision::Pending => {
                EvaluationResult::no_trigger(outcome.reason)
            }
            TriggerDecision::Trigger => {
                self.analyze(
                    rule,
                    &llm,
                    &event.context_key,
                    Some(event),
                    outcome.batch.as_deref(),
                    now,
                )
                .await
            }
        }
    }
}
