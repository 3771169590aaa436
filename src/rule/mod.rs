//! Rule model, write-time validation, and context-key matching.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Architectural shape of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Expression pre-filter only; fast and deterministic.
    Expression,
    /// Natural-language description evaluated by the LLM engine.
    Llm,
    /// Expression pre-filter gating an LLM evaluation.
    Hybrid,
}

/// Scheduling policy deciding when an LLM rule actually invokes the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerMode {
    /// Every event triggers inference.
    Realtime,
    /// Accumulate events until `batch_size` or `max_wait_seconds`.
    Batch,
    /// Analyze at fixed intervals regardless of event volume.
    Interval,
}

/// Expression pre-filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreFilter {
    /// Filter type; currently always `expression`.
    #[serde(rename = "type", default = "default_filter_type")]
    pub filter_type: String,
    /// Filter expression over event data, e.g. `profit_rate > 0.05`.
    pub expression: String,
}

fn default_filter_type() -> String {
    "expression".to_string()
}

/// LLM evaluation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Natural-language description of what should trigger.
    pub description: String,
    /// When inference actually runs.
    pub trigger_mode: TriggerMode,
    /// Batch mode: flush when the accumulator reaches this size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    /// Batch mode: flush when the oldest pending event is this old.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_wait_seconds: Option<u64>,
    /// Interval mode: minimum seconds between analyses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    /// Minimum confidence for a positive decision to stand.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

impl LlmSettings {
    /// The confidence threshold, clamped to `[0, 1]`.
    pub fn threshold(&self) -> f64 {
        self.confidence_threshold.clamp(0.0, 1.0)
    }
}

/// Engine configuration; sub-configs must match [`RuleKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Which engine composition evaluates this rule.
    pub kind: RuleKind,
    /// Required for `expression` and `hybrid` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_filter: Option<PreFilter>,
    /// Required for `llm` and `hybrid` rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_config: Option<LlmSettings>,
}

/// A notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum NotifyTarget {
    /// Telegram chat or group.
    Telegram {
        /// Chat or group identifier.
        chat_id: String,
    },
    /// WeCom group robot webhook.
    Wecom {
        /// Webhook key from the robot URL.
        webhook_key: String,
    },
    /// Email recipients.
    Email {
        /// Recipient addresses.
        to: Vec<String>,
    },
}

impl NotifyTarget {
    /// Channel name this target routes to.
    pub fn channel(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Wecom { .. } => "wecom",
            NotifyTarget::Email { .. } => "email",
        }
    }
}

/// Per-rule notification throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    /// Maximum enqueues per clock minute.
    #[serde(default = "default_max_per_minute")]
    pub max_per_minute: u32,
    /// Dedup cooldown between fires of the same (rule, context key).
    #[serde(default = "default_cooldown")]
    pub cooldown_seconds: u64,
}

fn default_max_per_minute() -> u32 {
    5
}

fn default_cooldown() -> u64 {
    60
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_per_minute: default_max_per_minute(),
            cooldown_seconds: default_cooldown(),
        }
    }
}

/// Where and how often to notify when a rule fires.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyPolicy {
    /// Notification destinations; empty means evaluate-only.
    #[serde(default)]
    pub targets: Vec<NotifyTarget>,
    /// Throttling policy.
    #[serde(default)]
    pub rate_limit: RateLimit,
}

/// A user-defined trigger rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    /// Opaque unique identifier.
    pub rule_id: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Disabled rules never match.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Higher priority runs earlier; ties break on `rule_id`.
    #[serde(default = "default_priority")]
    pub priority: i64,
    /// Event types this rule applies to.
    pub event_types: Vec<String>,
    /// Context-key patterns (`*` wildcard); empty matches all keys.
    #[serde(default)]
    pub context_keys: Vec<String>,
    /// Engine configuration.
    pub rule_config: RuleConfig,
    /// Notification policy.
    #[serde(default)]
    pub notify_policy: NotifyPolicy,
    /// Monotonic version, bumped on every write.
    #[serde(default = "default_version")]
    pub version: u64,
    /// Creation timestamp.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i64 {
    100
}

fn default_version() -> u64 {
    1
}

/// Rejections produced by write-time validation.
#[derive(Debug, thiserror::Error)]
pub enum RuleValidationError {
    /// `event_types` must be non-empty
    #[error("event_types must not be empty")]
    EmptyEventTypes,

    /// A kind that needs a pre-filter is missing one
    #[error("rule kind requires a pre_filter")]
    MissingPreFilter,

    /// A kind that needs LLM settings is missing them
    #[error("rule kind requires an llm_config")]
    MissingLlmConfig,

    /// Batch mode needs both `batch_size` and `max_wait_seconds`
    #[error("batch trigger mode requires batch_size and max_wait_seconds")]
    MissingBatchParams,

    /// Interval mode needs `interval_seconds`
    #[error("interval trigger mode requires interval_seconds")]
    MissingIntervalParams,

    /// The pre-filter expression does not parse
    #[error("invalid pre_filter expression: {0}")]
    InvalidExpression(#[from] crate::expr::ExprError),
}

impl Rule {
    /// Validate the invariants enforced at write time.
    pub fn validate(&self) -> Result<(), RuleValidationError> {
        if self.event_types.is_empty() {
            return Err(RuleValidationError::EmptyEventTypes);
        }

        match self.rule_config.kind {
            RuleKind::Expression => {
                if self.rule_config.pre_filter.is_none() {
                    return Err(RuleValidationError::MissingPreFilter);
                }
            }
            RuleKind::Llm => {
                if self.rule_config.llm_config.is_none() {
                    return Err(RuleValidationError::MissingLlmConfig);
                }
            }
            RuleKind::Hybrid => {
                if self.rule_config.pre_filter.is_none() {
                    return Err(RuleValidationError::MissingPreFilter);
                }
                if self.rule_config.llm_config.is_none() {
                    return Err(RuleValidationError::MissingLlmConfig);
                }
            }
        }

        if let Some(filter) = &self.rule_config.pre_filter {
            crate::expr::parse(&filter.expression)?;
        }

        if let Some(llm) = &self.rule_config.llm_config {
            match llm.trigger_mode {
                TriggerMode::Batch => {
                    if llm.batch_size.is_none() || llm.max_wait_seconds.is_none() {
                        return Err(RuleValidationError::MissingBatchParams);
                    }
                }
                TriggerMode::Interval => {
                    if llm.interval_seconds.is_none() {
                        return Err(RuleValidationError::MissingIntervalParams);
                    }
                }
                TriggerMode::Realtime => {}
            }
        }

        Ok(())
    }

    /// Whether this rule applies to the given event type.
    pub fn matches_event_type(&self, event_type: &str) -> bool {
        self.event_types.iter().any(|t| t == event_type)
    }

    /// Whether this rule applies to the given context key.
    ///
    /// An empty pattern list matches all keys.
    pub fn matches_context_key(&self, context_key: &str) -> bool {
        if self.context_keys.is_empty() {
            return true;
        }
        self.context_keys
            .iter()
            .any(|pattern| wildcard_match(pattern, context_key))
    }
}

/// Literal-`*` wildcard matcher over dotted keys.
///
/// `*` matches any substring (including empty); every other character matches
/// itself. Iterative two-pointer scan, no pattern compilation.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let val: Vec<char> = value.chars().collect();

    let mut p = 0;
    let mut v = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while v < val.len() {
        if p < pat.len() && pat[p] != '*' && pat[p] == val[v] {
            p += 1;
            v += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some(p);
            mark = v;
            p += 1;
        } else if let Some(s) = star {
            p = s + 1;
            mark += 1;
            v = mark;
        } else {
            return false;
        }
    }

    while p < pat.len() && pat[p] == '*' {
        p += 1;
    }
    p == pat.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expression_rule(expression: &str) -> Rule {
        Rule {
            rule_id: "r-1".to_string(),
            name: "profit watch".to_string(),
            description: String::new(),
            enabled: true,
            priority: 100,
            event_types: vec!["trade.profit".to_string()],
            context_keys: vec![],
            rule_config: RuleConfig {
                kind: RuleKind::Expression,
                pre_filter: Some(PreFilter {
                    filter_type: "expression".to_string(),
                    expression: expression.to_string(),
                }),
                llm_config: None,
            },
            notify_policy: NotifyPolicy::default(),
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "trade.profit.BTCUSDT"));
        assert!(wildcard_match("trade.profit.*", "trade.profit.BTCUSDT"));
        assert!(wildcard_match("trade.*.BTCUSDT", "trade.profit.BTCUSDT"));
        assert!(wildcard_match("*.BTCUSDT", "trade.profit.BTCUSDT"));
        assert!(wildcard_match("trade.profit", "trade.profit"));
        assert!(wildcard_match("a*b*c", "aXbYc"));
        assert!(wildcard_match("a*b*c", "abc"));

        assert!(!wildcard_match("trade.profit.*", "trade.loss.BTCUSDT"));
        assert!(!wildcard_match("trade.profit", "trade.profits"));
        assert!(!wildcard_match("a*b*c", "aXbY"));
        assert!(!wildcard_match("", "x"));
    }

    #[test]
    fn test_empty_context_keys_match_all() {
        let rule = expression_rule("profit_rate > 0.05");
        assert!(rule.matches_context_key("anything.at.all"));
    }

    #[test]
    fn test_validate_expression_rule() {
        assert!(expression_rule("profit_rate > 0.05").validate().is_ok());
        assert!(expression_rule("profit_rate >").validate().is_err());

        let mut missing = expression_rule("x > 1");
        missing.rule_config.pre_filter = None;
        assert!(matches!(
            missing.validate(),
            Err(RuleValidationError::MissingPreFilter)
        ));

        let mut no_types = expression_rule("x > 1");
        no_types.event_types.clear();
        assert!(matches!(
            no_types.validate(),
            Err(RuleValidationError::EmptyEventTypes)
        ));
    }

    #[test]
    fn test_validate_llm_mode_params() {
        let mut rule = expression_rule("x > 1");
        rule.rule_config.kind = RuleKind::Llm;
        rule.rule_config.pre_filter = None;
        rule.rule_config.llm_config = Some(LlmSettings {
            description: "notify on losing streaks".to_string(),
            trigger_mode: TriggerMode::Batch,
            batch_size: None,
            max_wait_seconds: None,
            interval_seconds: None,
            confidence_threshold: 0.7,
        });
        assert!(matches!(
            rule.validate(),
            Err(RuleValidationError::MissingBatchParams)
        ));

        let llm = rule.rule_config.llm_config.as_mut().unwrap();
        llm.batch_size = Some(5);
        llm.max_wait_seconds = Some(30);
        assert!(rule.validate().is_ok());

        let llm = rule.rule_config.llm_config.as_mut().unwrap();
        llm.trigger_mode = TriggerMode::Interval;
        assert!(matches!(
            rule.validate(),
            Err(RuleValidationError::MissingIntervalParams)
        ));
    }

    #[test]
    fn test_notify_target_tagged_serde() {
        let targets: Vec<NotifyTarget> = serde_json::from_value(json!([
            {"type": "telegram", "chat_id": "123"},
            {"type": "wecom", "webhook_key": "wk-1"},
            {"type": "email", "to": ["ops@example.com"]}
        ]))
        .unwrap();

        assert_eq!(targets[0].channel(), "telegram");
        assert_eq!(targets[1].channel(), "wecom");
        assert_eq!(targets[2].channel(), "email");

        let round = serde_json::to_value(&targets).unwrap();
        assert_eq!(round[0]["type"], "telegram");
    }

    #[test]
    fn test_threshold_clamped() {
        let llm = LlmSettings {
            description: "d".to_string(),
            trigger_mode: TriggerMode::Realtime,
            batch_size: None,
            max_wait_seconds: None,
            interval_seconds: None,
            confidence_threshold: 1.7,
        };
        assert_eq!(llm.threshold(), 1.0);
    }
}
