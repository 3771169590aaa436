//! Key shapes for everything the service stores.
//!
//! All keys are namespaced under `trigger:`.

/// Set of all rule IDs.
pub const RULE_ALL: &str = "trigger:rules:all";
/// Global monotonic rules version counter.
pub const RULE_VERSION: &str = "trigger:rules:version";
/// Pub/sub channel for rule-change notifications.
pub const RULE_UPDATE_CHANNEL: &str = "trigger:rules:update";
/// Notification task queue.
pub const NOTIFY_QUEUE: &str = "trigger:notify:queue";
/// Dead-letter list for exhausted notification tasks.
pub const NOTIFY_DEAD_LETTER: &str = "trigger:notify:dead_letter";
/// Capped list of recent execution records.
pub const EXECUTIONS: &str = "trigger:executions";

/// Rule detail hash.
pub fn rule_detail(rule_id: &str) -> String {
    format!("trigger:rules:detail:{rule_id}")
}

/// By-event-type rule index set.
pub fn rule_index(event_type: &str) -> String {
    format!("trigger:rules:index:{event_type}")
}

/// Context window sorted set.
pub fn context(context_key: &str) -> String {
    format!("trigger:context:{context_key}")
}

/// Idempotency marker.
pub fn processed(event_id: &str) -> String {
    format!("trigger:processed:{event_id}")
}

/// Cached LLM decision.
pub fn llm_cache(rule_id: &str, context_hash: &str) -> String {
    format!("trigger:llm_cache:{rule_id}:{context_hash}")
}

/// Batch-mode accumulator list.
pub fn batch(rule_id: &str, context_key: &str) -> String {
    format!("trigger:mode:batch:{rule_id}:{context_key}")
}

/// First-pending-event timestamp for a batch accumulator.
pub fn batch_since(rule_id: &str, context_key: &str) -> String {
    format!("trigger:mode:batch_since:{rule_id}:{context_key}")
}

/// Scan pattern over a rule's batch timestamps.
pub fn batch_since_pattern(rule_id: &str) -> String {
    format!("trigger:mode:batch_since:{rule_id}:*")
}

/// Last interval analysis timestamp.
pub fn last_analysis(rule_id: &str, context_key: &str) -> String {
    format!("trigger:mode:last:{rule_id}:{context_key}")
}

/// Scan pattern over a rule's interval clocks.
pub fn last_analysis_pattern(rule_id: &str) -> String {
    format!("trigger:mode:last:{rule_id}:*")
}

/// Advisory interval lock.
pub fn interval_lock(rule_id: &str) -> String {
    format!("trigger:mode:interval_lock:{rule_id}")
}

/// Notification dedup marker.
pub fn notify_dedup(rule_id: &str, context_key: &str) -> String {
    format!("trigger:notify:dedup:{rule_id}:{context_key}")
}

/// Per-minute notification counter; `minute` is `YYYYMMDDHHMM`.
pub fn notify_rate(rule_id: &str, minute: &str) -> String {
    format!("trigger:notify:rate:{rule_id}:{minute}")
}

/// Context key carried in a trigger-mode key, after the rule segment.
///
/// Keys look like `trigger:mode:batch_since:{rule_id}:{context_key}`; the
/// context key is everything after the rule ID segment.
pub fn context_key_suffix<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
    key.strip_prefix(prefix).and_then(|rest| {
        let rest = rest.strip_prefix(':')?;
        if rest.is_empty() {
            None
        } else {
            Some(rest)
        }
    })
}
