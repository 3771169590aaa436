//! Rule repository contract: CRUD, versioning, cache invalidation.

mod common;

use chrono::Utc;
use common::*;
use serde_json::json;
use trigger_rs::rule::RuleValidationError;
use trigger_rs::TriggerError;

#[tokio::test]
async fn test_create_then_get_round_trips() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let rule = expression_rule("r-1", "trade.profit", "profit_rate > 0.05");

    let version_before = pipeline.rule_store.version().await.unwrap();
    let created = pipeline.rule_store.create(rule, Utc::now()).await.unwrap();
    let version_after = pipeline.rule_store.version().await.unwrap();

    assert!(version_after > version_before);
    assert_eq!(created.version, 1);

    let fetched = pipeline.rule_store.get("r-1").await.unwrap().unwrap();
    assert_eq!(fetched.rule_id, created.rule_id);
    assert_eq!(fetched.name, created.name);
    assert_eq!(fetched.event_types, created.event_types);
    assert_eq!(fetched.notify_policy.targets, created.notify_policy.targets);
}

#[tokio::test]
async fn test_update_bumps_rule_version_and_reindexes() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    let mut updated = expression_rule("r-1", "trade.loss", "profit_rate < -0.05");
    updated.name = "loss watch".to_string();
    let stored = pipeline
        .rule_store
        .update("r-1", updated, Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.version, 2);

    // Old index entry gone, new one live.
    assert!(pipeline
        .rule_store
        .list_by_event_type("trade.profit")
        .await
        .unwrap()
        .is_empty());
    let by_loss = pipeline
        .rule_store
        .list_by_event_type("trade.loss")
        .await
        .unwrap();
    assert_eq!(by_loss.len(), 1);
    assert_eq!(by_loss[0].name, "loss watch");
}

#[tokio::test]
async fn test_update_missing_rule_returns_none() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let rule = expression_rule("r-missing", "trade.profit", "profit_rate > 0.05");
    let outcome = pipeline
        .rule_store
        .update("r-missing", rule, Utc::now())
        .await
        .unwrap();
    assert!(outcome.is_none());
}

#[tokio::test]
async fn test_delete_removes_rule_and_index() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    assert!(pipeline.rule_store.delete("r-1", Utc::now()).await.unwrap());
    assert!(pipeline.rule_store.get("r-1").await.unwrap().is_none());
    assert!(pipeline
        .rule_store
        .list_by_event_type("trade.profit")
        .await
        .unwrap()
        .is_empty());
    assert!(!pipeline.rule_store.delete("r-1", Utc::now()).await.unwrap());
}

#[tokio::test]
async fn test_invalid_rule_rejected_at_write_time() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    let rule = expression_rule("r-bad", "trade.profit", "profit_rate >");

    let result = pipeline.rule_store.create(rule, Utc::now()).await;
    assert!(matches!(
        result,
        Err(TriggerError::Rule(RuleValidationError::InvalidExpression(_)))
    ));
    // Nothing was written.
    assert!(pipeline.rule_store.get("r-bad").await.unwrap().is_none());
}

#[tokio::test]
async fn test_cache_sees_writes_through_version_counter() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());

    // Cold cache: empty.
    assert!(pipeline
        .rules
        .matching("trade.profit", "trade.profit.k")
        .await
        .unwrap()
        .is_empty());

    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    // No pub/sub in the memory backend: the version check alone must
    // surface the new rule.
    let matched = pipeline
        .rules
        .matching("trade.profit", "trade.profit.k")
        .await
        .unwrap();
    assert_eq!(matched.len(), 1);

    pipeline.rule_store.set_enabled("r-1", false, Utc::now()).await.unwrap();
    assert!(pipeline
        .rules
        .matching("trade.profit", "trade.profit.k")
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_matching_sorts_by_priority_then_rule_id() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());

    let mut low = expression_rule("r-low", "trade.profit", "profit_rate > 0.05");
    low.priority = 10;
    let mut high = expression_rule("r-high", "trade.profit", "profit_rate > 0.05");
    high.priority = 200;
    let mut tie_b = expression_rule("r-tie-b", "trade.profit", "profit_rate > 0.05");
    tie_b.priority = 100;
    let mut tie_a = expression_rule("r-tie-a", "trade.profit", "profit_rate > 0.05");
    tie_a.priority = 100;

    for rule in [low, high, tie_b, tie_a] {
        pipeline.add_rule(rule).await;
    }

    let matched = pipeline
        .rules
        .matching("trade.profit", "trade.profit.k")
        .await
        .unwrap();
    let ids: Vec<&str> = matched.iter().map(|r| r.rule_id.as_str()).collect();
    assert_eq!(ids, vec!["r-high", "r-tie-a", "r-tie-b", "r-low"]);
}

#[tokio::test]
async fn test_set_enabled_round_trip() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(expression_rule("r-1", "trade.profit", "profit_rate > 0.05"))
        .await;

    assert!(pipeline.rule_store.set_enabled("r-1", false, Utc::now()).await.unwrap());
    let rule = pipeline.rule_store.get("r-1").await.unwrap().unwrap();
    assert!(!rule.enabled);
    assert_eq!(rule.version, 2);

    assert!(pipeline.rule_store.set_enabled("r-1", true, Utc::now()).await.unwrap());
    assert!(pipeline.rule_store.get("r-1").await.unwrap().unwrap().enabled);

    assert!(!pipeline
        .rule_store
        .set_enabled("r-ghost", true, Utc::now())
        .await
        .unwrap());
}

#[tokio::test]
async fn test_llm_rule_round_trip_preserves_config() {
    let pipeline = TestPipeline::new(ScriptedProvider::firing());
    pipeline
        .add_rule(llm_rule(
            "r-llm",
            "trade.profit",
            json!({
                "description": "watch for streaks",
                "trigger_mode": "batch",
                "batch_size": 5,
                "max_wait_seconds": 30,
                "confidence_threshold": 0.8
            }),
        ))
        .await;

    let rule = pipeline.rule_store.get("r-llm").await.unwrap().unwrap();
    let llm = rule.rule_config.llm_config.unwrap();
    assert_eq!(llm.batch_size, Some(5));
    assert_eq!(llm.max_wait_seconds, Some(30));
    assert_eq!(llm.confidence_threshold, 0.8);
}
