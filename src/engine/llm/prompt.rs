//! Prompt assembly for trigger analysis.

use crate::event::Event;

/// Fixed task contract sent as the system message.
///
/// Secrets never enter the prompt; only rule text, context summary, and
/// event payloads appear.
pub const SYSTEM_PROMPT: &str = r#"You are a professional event analysis assistant. Your task is to analyze events and determine whether they match user-defined rules.

You will receive:
1. A user-defined rule description
2. Historical context (recent events in a time window)
3. Current event data

Based on this information, you need to:
1. Analyze whether the current event (combined with historical context) satisfies the user's rule
2. Provide a confidence score (0.0 to 1.0)
3. Explain your reasoning

Always respond in JSON format with the following structure:
{
  "should_trigger": true/false,
  "confidence": 0.0-1.0,
  "reason": "Detailed explanation of your decision"
}

Important guidelines:
- Be conservative: only trigger when you are reasonably confident
- Consider temporal patterns when the rule involves sequences or trends
- Use specific data from the events to support your reasoning
- If the data is insufficient to make a determination, set should_trigger to false
"#;

/// Build the user message for an analysis.
///
/// `current` is absent for tick-driven interval analyses; `batch` carries
/// the flushed accumulator for batch-mode rules.
pub fn build_user_prompt(
    rule_description: &str,
    context_summary: &str,
    current: Option<&Event>,
    batch: Option<&[Event]>,
) -> String {
    let mut sections = vec![
        format!("## User Rule\n{rule_description}"),
        format!("## Historical Context\n{context_summary}"),
    ];

    if let Some(events) = batch {
        let mut lines = vec!["## Current Events Under Analysis".to_string()];
        for (index, event) in events.iter().enumerate() {
            lines.push(format!(
                "{}. [{}] {} {}",
                index + 1,
                event.timestamp.format("%H:%M:%S"),
                event.event_type,
                serde_json::to_string(&event.data).unwrap_or_default(),
            ));
        }
        sections.push(lines.join("\n"));
    }

    match current {
        Some(event) => sections.push(format!(
            "## Current Event\nType: {}\nTime: {}\nData: {}",
            event.event_type,
            event.timestamp.to_rfc3339(),
            serde_json::to_string(&event.data).unwrap_or_default(),
        )),
        None => sections.push(
            "## Current Event\n(periodic analysis; no new event arrived)".to_string(),
        ),
    }

    sections.push(
        "Please analyze whether this satisfies the user's rule. Respond in JSON format."
            .to_string(),
    );
    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn event() -> Event {
        Event {
            event_id: "evt-1".to_string(),
            event_type: "trade.profit".to_string(),
            context_key: "trade.profit.BTCUSDT".to_string(),
            timestamp: Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap(),
            data: json!({"profit_rate": 0.08}).as_object().cloned().unwrap(),
        }
    }

    #[test]
    fn test_prompt_with_current_event() {
        let prompt = build_user_prompt(
            "alert on sustained profit",
            "No historical events in context window.",
            Some(&event()),
            None,
        );
        assert!(prompt.contains("## User Rule\nalert on sustained profit"));
        assert!(prompt.contains("No historical events"));
        assert!(prompt.contains("Type: trade.profit"));
        assert!(prompt.contains("profit_rate"));
        assert!(!prompt.contains("Current Events Under Analysis"));
    }

    #[test]
    fn test_prompt_with_batch() {
        let events = vec![event(), event()];
        let prompt = build_user_prompt("r", "summary", Some(&events[1]), Some(&events));
        assert!(prompt.contains("## Current Events Under Analysis"));
        assert!(prompt.contains("1. ["));
        assert!(prompt.contains("2. ["));
    }

    #[test]
    fn test_prompt_periodic_marker_without_event() {
        let prompt = build_user_prompt("r", "summary", None, None);
        assert!(prompt.contains("periodic analysis; no new event arrived"));
    }
}
