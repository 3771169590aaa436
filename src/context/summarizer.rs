//! Structured context summaries for LLM prompts.
//!
//! The summary is a compact, chronologically ordered listing rather than
//! free-form prose: a header with the time range, the most recent events
//! with per-field rendering, and aggregate statistics for common numeric
//! fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::event::Event;

/// How many trailing events the summary lists individually.
const RECENT_EVENTS: usize = 10;

/// Renders context windows into prompt-ready summaries.
#[derive(Debug, Clone, Default)]
pub struct ContextSummarizer;

impl ContextSummarizer {
    /// Create a summarizer.
    pub fn new() -> Self {
        Self
    }

    /// Summarize a window; events are sorted by timestamp internally.
    pub fn summarize(&self, events: &[Event]) -> String {
        if events.is_empty() {
            return "No historical events in context window.".to_string();
        }

        let mut sorted: Vec<&Event> = events.iter().collect();
        sorted.sort_by_key(|e| e.timestamp);

        let start = sorted[0].timestamp;
        let end = sorted[sorted.len() - 1].timestamp;

        let mut lines = vec![
            format!("Event Type: {}", sorted[0].event_type),
            format!(
                "Time Range: {} - {} ({})",
                start.format("%H:%M:%S"),
                end.format("%H:%M:%S"),
                format_duration(start, end)
            ),
            format!("Total Events: {}", sorted.len()),
            String::new(),
            "Recent Events:".to_string(),
        ];

        let tail_start = sorted.len().saturating_sub(RECENT_EVENTS);
        for (index, event) in sorted[tail_start..].iter().enumerate() {
            lines.push(format_event(index + 1, event));
        }

        let stats = statistics(&sorted);
        if !stats.is_empty() {
            lines.push(String::new());
            lines.push("Statistics:".to_string());
            lines.extend(stats);
        }

        lines.join("\n")
    }
}

fn format_event(index: usize, event: &Event) -> String {
    let time = event.timestamp.format("%H:%M:%S");
    format!("{index}. [{time}] {}", format_data(event))
}

fn format_data(event: &Event) -> String {
    if event.data.is_empty() {
        return "(no data)".to_string();
    }

    let mut parts = Vec::new();

    if let Some(Value::String(symbol)) = event.data.get("symbol") {
        parts.push(symbol.clone());
    }
    if let Some(profit) = number(event, "profit") {
        parts.push(format!("{profit:+.2}"));
    }
    if let Some(rate) = number(event, "profit_rate") {
        parts.push(format!("({:+.1}%)", rate * 100.0));
    }
    if let Some(price) = event.data.get("price") {
        parts.push(format!("price={price}"));
    }
    if let Some(rate) = number(event, "change_rate") {
        parts.push(format!("({:+.1}%)", rate * 100.0));
    }
    if let Some(cpu) = number(event, "cpu_usage") {
        parts.push(format!("CPU={:.0}%", cpu * 100.0));
    }
    if let Some(mem) = number(event, "memory_usage") {
        parts.push(format!("MEM={:.0}%", mem * 100.0));
    }

    if parts.is_empty() {
        let mut compact = serde_json::to_string(&event.data).unwrap_or_default();
        compact.truncate(100);
        return compact;
    }
    parts.join(" ")
}

fn number(event: &Event, field: &str) -> Option<f64> {
    event.data.get(field).and_then(Value::as_f64)
}

fn format_duration(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let total = (end - start).num_seconds().max(0);
    if total < 60 {
        format!("{total}s")
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

fn statistics(events: &[&Event]) -> Vec<String> {
    let mut numeric: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for event in events {
        for (key, value) in &event.data {
            if let Some(n) = value.as_f64() {
                numeric.entry(key.as_str()).or_default().push(n);
            }
        }
    }

    let mut stats = Vec::new();

    if let Some(values) = numeric.get("profit") {
        let total: f64 = values.iter().sum();
        let wins = values.iter().filter(|v| **v > 0.0).count();
        stats.push(format!("- Total profit: {total:+.2}"));
        stats.push(format!("- Win/Loss: {}/{}", wins, values.len() - wins));
    }

    if let Some(values) = numeric.get("profit_rate") {
        let avg: f64 = values.iter().sum::<f64>() / values.len() as f64;
        stats.push(format!("- Average profit rate: {:+.1}%", avg * 100.0));
    }

    if let Some(values) = numeric.get("price") {
        if values.len() >= 2 && values[0] != 0.0 {
            let change = (values[values.len() - 1] - values[0]) / values[0] * 100.0;
            stats.push(format!("- Price change: {change:+.2}%"));
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn event(ts_offset: i64, data: serde_json::Value) -> Event {
        let base = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
        Event {
            event_id: format!("evt-{ts_offset}"),
            event_type: "trade.profit".to_string(),
            context_key: "trade.profit.BTCUSDT".to_string(),
            timestamp: base + chrono::Duration::seconds(ts_offset),
            data: data.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_empty_window() {
        let summary = ContextSummarizer::new().summarize(&[]);
        assert_eq!(summary, "No historical events in context window.");
    }

    #[test]
    fn test_summary_structure() {
        let events = vec![
            event(0, json!({"symbol": "BTCUSDT", "profit": 12.5, "profit_rate": 0.02})),
            event(30, json!({"symbol": "BTCUSDT", "profit": -4.0, "profit_rate": -0.01})),
        ];
        let summary = ContextSummarizer::new().summarize(&events);

        assert!(summary.contains("Event Type: trade.profit"));
        assert!(summary.contains("Total Events: 2"));
        assert!(summary.contains("12:00:00 - 12:00:30 (30s)"));
        assert!(summary.contains("BTCUSDT +12.50 (+2.0%)"));
        assert!(summary.contains("- Total profit: +8.50"));
        assert!(summary.contains("- Win/Loss: 1/1"));
    }

    #[test]
    fn test_summary_sorts_out_of_order_events() {
        let events = vec![event(60, json!({"price": 101})), event(0, json!({"price": 100}))];
        let summary = ContextSummarizer::new().summarize(&events);

        let first = summary.find("price=100").unwrap();
        let second = summary.find("price=101").unwrap();
        assert!(first < second);
        assert!(summary.contains("- Price change: +1.00%"));
    }

    #[test]
    fn test_recent_events_capped_at_ten() {
        let events: Vec<Event> = (0..25).map(|i| event(i, json!({"price": i}))).collect();
        let summary = ContextSummarizer::new().summarize(&events);
        assert!(summary.contains("Total Events: 25"));
        assert!(!summary.contains("price=14"));
        assert!(summary.contains("price=15"));
        assert!(summary.contains("price=24"));
    }

    #[test]
    fn test_fallback_compact_json() {
        let events = vec![event(0, json!({"custom_field": "value"}))];
        let summary = ContextSummarizer::new().summarize(&events);
        assert!(summary.contains("custom_field"));
    }
}
