//! Short-lived cache of LLM decisions.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::{keys, SharedBackend, StoreResult};

/// Cached decision payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedDecision {
    /// Whether the rule fired.
    pub should_trigger: bool,
    /// Model confidence after clamping.
    pub confidence: f64,
    /// Model reasoning.
    pub reason: String,
}

/// LLM response cache keyed by `(rule_id, context hash)`.
///
/// Only successful, gated decisions are cached; parse and transport
/// failures never are.
#[derive(Clone)]
pub struct LlmCacheStore {
    backend: SharedBackend,
    ttl: Duration,
}

/// Default cache TTL.
pub const CACHE_TTL: Duration = Duration::from_secs(60);

impl LlmCacheStore {
    /// Create the cache with the default TTL.
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            backend,
            ttl: CACHE_TTL,
        }
    }

    /// Look up a cached decision.
    pub async fn get(
        &self,
        rule_id: &str,
        context_hash: &str,
    ) -> StoreResult<Option<CachedDecision>> {
        let key = keys::llm_cache(rule_id, context_hash);
        match self.backend.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Store a decision.
    pub async fn set(
        &self,
        rule_id: &str,
        context_hash: &str,
        decision: &CachedDecision,
    ) -> StoreResult<()> {
        let key = keys::llm_cache(rule_id, context_hash);
        let raw = serde_json::to_string(decision)?;
        self.backend.set_ex(&key, &raw, self.ttl).await
    }
}
