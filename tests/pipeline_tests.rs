//! End-to-end pipeline tests over the in-memory backend.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;

use trigger_rs::execution::NotificationStatus;
use trigger_rs::notify::NotificationChannel;

#[tokio::test]
async fn test_expression_rule_fires_and_queues_notification() {
    let provider = ScriptedProvider::firing();
    let pipeline = TestPipeline::new(provider.clone());

    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S1",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 1);
    // Expression rules never touch the model.
    assert_eq!(provider.call_count(), 0);
    // The single record for this evaluation arrives with the delivery
    // outcome, not at enqueue time.
    assert!(pipeline.executions.recent(10).await.unwrap().is_empty());

    let channel = ScriptedChannel::delivering("telegram");
    let worker = pipeline.worker(
        vec![channel as Arc<dyn NotificationChannel>],
        3,
    );
    deliver_all(&pipeline, &worker).await;

    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].triggered);
    assert_eq!(records[0].rule_id, "r-1");
    assert_eq!(records[0].event_id.as_deref(), Some("evt-1"));
    assert_eq!(records[0].notification_status, NotificationStatus::Sent);
}

#[tokio::test]
async fn test_expression_rule_does_not_fire_below_threshold() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S2",
        json!({"profit_rate": 0.02}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].triggered);
}

#[tokio::test]
async fn test_duplicate_event_is_processed_once() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    let evt = event(
        "evt-dup",
        "trade.profit",
        "trade.profit.S1",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();
    pipeline.handler.handle(&evt).await.unwrap();
    pipeline.handler.handle(&evt).await.unwrap();

    // One enqueue: the replays were no-ops.
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    let channel = ScriptedChannel::delivering("telegram");
    let worker = pipeline.worker(
        vec![channel as Arc<dyn NotificationChannel>],
        3,
    );
    deliver_all(&pipeline, &worker).await;

    // And exactly one execution record once delivery completes.
    assert_eq!(pipeline.executions.recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_hybrid_pre_filter_blocks_llm() {
    let provider = ScriptedProvider::firing();
    let pipeline = TestPipeline::new(provider.clone());
    pipeline.add_rule(hybrid_rule("r-h", "sensor.reading", "x > 0")).await;

    let evt = event("evt-neg", "sensor.reading", "sensor.reading.a", json!({"x": -1}));
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(provider.call_count(), 0);
    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    let records = pipeline.executions.recent(10).await.unwrap();
    assert!(!records[0].triggered);
    assert!(records[0].reason.contains("pre-filter"));
}

#[tokio::test]
async fn test_hybrid_pre_filter_pass_reaches_llm() {
    let provider = ScriptedProvider::firing();
    let pipeline = TestPipeline::new(provider.clone());
    pipeline.add_rule(hybrid_rule("r-h", "sensor.reading", "x > 0")).await;

    let evt = event("evt-pos", "sensor.reading", "sensor.reading.a", json!({"x": 5}));
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_dedup_suppresses_second_fire_within_cooldown() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    let first = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S7",
        json!({"profit_rate": 0.08}),
    );
    let second = event(
        "evt-2",
        "trade.profit",
        "trade.profit.S7",
        json!({"profit_rate": 0.09}),
    );
    pipeline.handler.handle(&first).await.unwrap();
    pipeline.handler.handle(&second).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    // Only the suppressed fire has a record so far; the queued one gets
    // its record at delivery.
    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].triggered);
    assert_eq!(records[0].notification_status, NotificationStatus::Skipped);
}

#[tokio::test]
async fn test_zero_rate_limit_blocks_all_notifications() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let mut rule = expression_rule("r-0", "trade.profit", "profit_rate > 0.05");
    rule.notify_policy.rate_limit.max_per_minute = 0;
    rule.notify_policy.rate_limit.cooldown_seconds = 0;
    pipeline.add_rule(rule).await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S1",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records[0].notification_status, NotificationStatus::Skipped);
}

#[tokio::test]
async fn test_broken_rule_does_not_block_siblings() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    // Higher priority rule references a name the event never carries.
    let mut broken = expression_rule("r-broken", "trade.profit", "no_such_field > 1");
    broken.priority = 200;
    pipeline.add_rule(broken).await;
    pipeline
        .add_rule(expression_rule("r-good", "trade.profit", "profit_rate > 0.05"))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S1",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    // The good rule still fired.
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    // The broken rule's non-fire is recorded; the fired rule records at
    // delivery time.
    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].rule_id, "r-broken");
    assert!(!records[0].triggered);
    assert!(records[0].reason.contains("expression_error"));
}

#[tokio::test]
async fn test_multiple_rules_fire_for_one_event() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-a", "trade.profit", "profit_rate > 0.01"))
        .await;
    pipeline
        .add_rule(expression_rule("r-b", "trade.profit", "profit_rate > 0.05"))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.multi",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_context_key_filter_restricts_rule() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let mut rule = expression_rule("r-f", "trade.profit", "profit_rate > 0.05");
    rule.context_keys = vec!["trade.profit.BTC*".to_string()];
    pipeline.add_rule(rule).await;

    let matching = event(
        "evt-1",
        "trade.profit",
        "trade.profit.BTCUSDT",
        json!({"profit_rate": 0.08}),
    );
    let other = event(
        "evt-2",
        "trade.profit",
        "trade.profit.ETHUSDT",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&matching).await.unwrap();
    pipeline.handler.handle(&other).await.unwrap();

    // Only the matching event fired and was queued.
    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    let channel = ScriptedChannel::delivering("telegram");
    let worker = pipeline.worker(
        vec![channel as Arc<dyn NotificationChannel>],
        3,
    );
    deliver_all(&pipeline, &worker).await;

    // The non-matching event produced no execution record at all.
    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].event_id.as_deref(), Some("evt-1"));
}

#[tokio::test]
async fn test_llm_confidence_gate_holds() {
    // Confident "yes" below the 0.7 default threshold must not fire.
    let provider = ScriptedProvider::new(
        r#"{"should_trigger": true, "confidence": 0.5, "reason": "weak signal"}"#,
    );
    let pipeline = TestPipeline::new(provider.clone());
    pipeline
        .add_rule(llm_rule(
            "r-llm",
            "trade.profit",
            json!({"description": "d", "trigger_mode": "realtime"}),
        ))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.gate",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(provider.call_count(), 1);
    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    let records = pipeline.executions.recent(10).await.unwrap();
    assert!(!records[0].triggered);
    assert_eq!(records[0].confidence, Some(0.5));
}

#[tokio::test]
async fn test_llm_parse_error_is_non_fire() {
    let provider = ScriptedProvider::new("I could not decide, sorry!");
    let pipeline = TestPipeline::new(provider);
    pipeline
        .add_rule(llm_rule(
            "r-llm",
            "trade.profit",
            json!({"description": "d", "trigger_mode": "realtime"}),
        ))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.parse",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    let records = pipeline.executions.recent(10).await.unwrap();
    assert!(records[0].reason.starts_with("parse_error:"));
}

#[tokio::test]
async fn test_rate_limit_caps_enqueues_per_minute() {
    use chrono::TimeZone;

    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let now = chrono::Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 30).unwrap();

    // Three allowed, the rest of the minute blocked.
    for i in 0..5 {
        let allowed = pipeline.limits.check_rate("r-1", 3, now).await.unwrap();
        assert_eq!(allowed, i < 3);
    }

    // A new clock minute gets a fresh budget.
    let next_minute = now + chrono::Duration::seconds(60);
    assert!(pipeline.limits.check_rate("r-1", 3, next_minute).await.unwrap());
}

#[tokio::test]
async fn test_confidence_exactly_at_threshold_fires() {
    let provider = ScriptedProvider::new(
        r#"{"should_trigger": true, "confidence": 0.7, "reason": "borderline"}"#,
    );
    let pipeline = TestPipeline::new(provider);
    pipeline
        .add_rule(llm_rule(
            "r-edge",
            "trade.profit",
            json!({"description": "d", "trigger_mode": "realtime"}),
        ))
        .await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.edge",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 1);

    let channel = ScriptedChannel::delivering("telegram");
    let worker = pipeline.worker(
        vec![channel as Arc<dyn NotificationChannel>],
        3,
    );
    deliver_all(&pipeline, &worker).await;

    let records = pipeline.executions.recent(10).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].triggered);
    assert_eq!(records[0].confidence, Some(0.7));
    assert_eq!(records[0].notification_status, NotificationStatus::Sent);
}

#[tokio::test]
async fn test_disabled_rule_never_matches() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let mut rule = expression_rule("r-off", "trade.profit", "profit_rate > 0.05");
    rule.enabled = false;
    pipeline.add_rule(rule).await;

    let evt = event(
        "evt-1",
        "trade.profit",
        "trade.profit.S1",
        json!({"profit_rate": 0.08}),
    );
    pipeline.handler.handle(&evt).await.unwrap();

    assert_eq!(pipeline.queue.len().await.unwrap(), 0);
    assert!(pipeline.executions.recent(10).await.unwrap().is_empty());
}
