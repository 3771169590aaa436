//! Rule repository: authoritative storage, secondary index, versioned
//! consumer cache.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::json;
use tracing::{debug, warn};

use crate::rule::Rule;
use crate::store::{keys, SharedBackend, StoreResult};

/// Authoritative rule storage.
///
/// Every write updates the detail hash and the by-event-type index, bumps
/// the global version counter, and publishes a best-effort change message
/// on the update channel. Validation happens before anything is written.
#[derive(Clone)]
pub struct RuleStore {
    backend: SharedBackend,
}

impl RuleStore {
    /// Create the store.
    pub fn new(backend: SharedBackend) -> Self {
        Self { backend }
    }

    /// Create a new rule.
    pub async fn create(&self, mut rule: Rule, now: DateTime<Utc>) -> crate::Result<Rule> {
        rule.validate()?;
        rule.version = 1;
        rule.created_at = now;
        rule.updated_at = now;

        self.write_detail(&rule).await?;
        self.backend.sadd(keys::RULE_ALL, &rule.rule_id).await?;
        for event_type in &rule.event_types {
            self.backend
                .sadd(&keys::rule_index(event_type), &rule.rule_id)
                .await?;
        }

        self.publish_update("create", &rule.rule_id, now).await?;
        Ok(rule)
    }

    /// Update an existing rule; returns `None` when absent.
    pub async fn update(
        &self,
        rule_id: &str,
        mut rule: Rule,
        now: DateTime<Utc>,
    ) -> crate::Result<Option<Rule>> {
        rule.validate()?;
        let Some(existing) = self.get(rule_id).await? else {
            return Ok(None);
        };

        rule.rule_id = rule_id.to_string();
        rule.version = existing.version + 1;
        rule.created_at = existing.created_at;
        rule.updated_at = now;

        // Keep the secondary index in step with event-type changes.
        let old_types: HashSet<&String> = existing.event_types.iter().collect();
        let new_types: HashSet<&String> = rule.event_types.iter().collect();
        for removed in old_types.difference(&new_types) {
            self.backend
                .srem(&keys::rule_index(removed), rule_id)
                .await?;
        }
        for added in new_types.difference(&old_types) {
            self.backend
                .sadd(&keys::rule_index(added), rule_id)
                .await?;
        }

        self.write_detail(&rule).await?;
        self.publish_update("update", rule_id, now).await?;
        Ok(Some(rule))
    }

    /// Delete a rule; returns whether it existed.
    pub async fn delete(&self, rule_id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let Some(existing) = self.get(rule_id).await? else {
            return Ok(false);
        };

        for event_type in &existing.event_types {
            self.backend
                .srem(&keys::rule_index(event_type), rule_id)
                .await?;
        }
        self.backend.srem(keys::RULE_ALL, rule_id).await?;
        self.backend.del(&keys::rule_detail(rule_id)).await?;

        self.publish_update("delete", rule_id, now).await?;
        Ok(true)
    }

    /// Fetch a rule by ID.
    pub async fn get(&self, rule_id: &str) -> StoreResult<Option<Rule>> {
        let raw = self
            .backend
            .hget(&keys::rule_detail(rule_id), "config")
            .await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// All rules, including disabled ones.
    pub async fn list_all(&self) -> StoreResult<Vec<Rule>> {
        let rule_ids = self.backend.smembers(keys::RULE_ALL).await?;
        let mut rules = Vec::with_capacity(rule_ids.len());
        for rule_id in &rule_ids {
            match self.get(rule_id).await {
                Ok(Some(rule)) => rules.push(rule),
                Ok(None) => {}
                Err(e) => warn!(rule_id, error = %e, "skipping unreadable rule"),
            }
        }
        Ok(rules)
    }

    /// Enabled rules matching an event type, priority descending.
    pub async fn list_by_event_type(&self, event_type: &str) -> StoreResult<Vec<Rule>> {
        let rule_ids = self
            .backend
            .smembers(&keys::rule_index(event_type))
            .await?;
        let mut rules = Vec::new();
        for rule_id in &rule_ids {
            if let Some(rule) = self.get(rule_id).await? {
                if rule.enabled {
                    rules.push(rule);
                }
            }
        }
        sort_by_priority(&mut rules);
        Ok(rules)
    }

    /// Flip a rule's enabled flag; returns whether it existed.
    pub async fn set_enabled(
        &self,
        rule_id: &str,
        enabled: bool,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let Some(mut rule) = self.get(rule_id).await? else {
            return Ok(false);
        };
        rule.enabled = enabled;
        rule.version += 1;
        rule.updated_at = now;
        self.write_detail(&rule).await?;
        self.publish_update("update", rule_id, now).await?;
        Ok(true)
    }

    /// Current global rules version.
    pub async fn version(&self) -> StoreResult<u64> {
        let raw = self.backend.get(keys::RULE_VERSION).await?;
        Ok(raw.and_then(|v| v.parse().ok()).unwrap_or(0))
    }

    async fn write_detail(&self, rule: &Rule) -> StoreResult<()> {
        let key = keys::rule_detail(&rule.rule_id);
        let config = serde_json::to_string(rule)?;
        self.backend
            .hset(
                &key,
                &[
                    ("config", config),
                    ("enabled", rule.enabled.to_string()),
                    ("version", rule.version.to_string()),
                    ("updated_at", rule.updated_at.timestamp_millis().to_string()),
                ],
            )
            .await
    }

    async fn publish_update(
        &self,
        action: &str,
        rule_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        self.backend.incr(keys::RULE_VERSION).await?;
        let message = json!({
            "action": action,
            "rule_id": rule_id,
            "timestamp": now.timestamp_millis(),
        })
        .to_string();
        // Best-effort: cache correctness rests on the version counter.
        if let Err(e) = self
            .backend
            .publish(keys::RULE_UPDATE_CHANNEL, &message)
            .await
        {
            warn!(rule_id, error = %e, "rule update publish failed");
        }
        Ok(())
    }
}

fn sort_by_priority(rules: &mut [Rule]) {
    rules.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.rule_id.cmp(&b.rule_id))
    });
}

#[derive(Default)]
struct CacheState {
    version: Option<u64>,
    rules: Vec<Arc<Rule>>,
}

/// Consumer-side rule cache.
///
/// Rules are cached in-process with the global version they were read at;
/// every match compares against the counter and refetches when stale.
/// Pub/sub invalidation only lowers latency.
pub struct RuleCache {
    store: RuleStore,
    state: RwLock<CacheState>,
}

impl RuleCache {
    /// Create a cold cache over the store.
    pub fn new(store: RuleStore) -> Self {
        Self {
            store,
            state: RwLock::new(CacheState::default()),
        }
    }

    /// Drop the cached snapshot; the next read refetches.
    pub fn invalidate(&self) {
        self.state.write().version = None;
    }

    /// Enabled rules for an (event type, context key) pair, priority
    /// descending with `rule_id` tie-break.
    pub async fn matching(
        &self,
        event_type: &str,
        context_key: &str,
    ) -> StoreResult<Vec<Arc<Rule>>> {
        let rules = self.snapshot().await?;
        let mut matched: Vec<Arc<Rule>> = rules
            .into_iter()
            .filter(|rule| {
                rule.enabled
                    && rule.matches_event_type(event_type)
                    && rule.matches_context_key(context_key)
            })
            .collect();
        matched.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.rule_id.cmp(&b.rule_id))
        });
        Ok(matched)
    }

    /// All enabled rules in the current snapshot.
    pub async fn enabled(&self) -> StoreResult<Vec<Arc<Rule>>> {
        let rules = self.snapshot().await?;
        Ok(rules.into_iter().filter(|r| r.enabled).collect())
    }

    async fn snapshot(&self) -> StoreResult<Vec<Arc<Rule>>> {
        let current = self.store.version().await?;
        {
            let state = self.state.read();
            if state.version == Some(current) {
                return Ok(state.rules.clone());
            }
        }

        debug!(version = current, "refreshing rule cache");
        let fresh: Vec<Arc<Rule>> = self
            .store
            .list_all()
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

        let mut state = self.state.write();
        state.version = Some(current);
        state.rules = fresh.clone();
        Ok(fresh)
    }
}
