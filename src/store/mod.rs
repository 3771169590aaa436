//! State store: Redis-backed primitives behind a narrow backend trait.
//!
//! Every piece of cross-process state (rules, context windows, idempotency
//! keys, trigger-mode state, notification queue, dedup and rate counters,
//! LLM cache, execution records) lives behind [`StateBackend`]. The
//! production backend is Redis; an in-memory backend backs the test suite.
//! Mutating operations map to server-side atomic primitives so multiple
//! worker processes coordinate safely.

/// Context-window storage (sorted sets)
pub mod context;
/// Execution record storage
pub mod executions;
/// Idempotency keys
pub mod idempotency;
/// Redis key shapes
pub mod keys;
/// Notification dedup and rate-limit counters
pub mod limits;
/// LLM response cache
pub mod llm_cache;
/// In-memory backend for tests
pub mod memory;
/// Trigger-mode state (batch accumulators, interval clocks)
pub mod mode;
/// Notification queue and dead letter
pub mod queue;
/// Redis backend
pub mod redis;
/// Rule repository and consumer-side cache
pub mod rules;

pub use self::context::ContextStore;
pub use self::executions::ExecutionStore;
pub use self::idempotency::IdempotencyStore;
pub use self::limits::NotificationLimits;
pub use self::llm_cache::LlmCacheStore;
pub use self::memory::MemoryBackend;
pub use self::mode::TriggerModeStore;
pub use self::queue::NotificationQueue;
pub use self::redis::RedisBackend;
pub use self::rules::{RuleCache, RuleStore};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// State store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Redis transport or protocol failure
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Stored value failed to decode
    #[error("corrupt stored value: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Backend is closed or unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Shared handle to a state backend.
pub type SharedBackend = Arc<dyn StateBackend>;

/// The primitive operations the pipeline needs from the state store.
///
/// The surface mirrors the Redis commands used; each method is atomic on
/// the backend.
#[async_trait]
pub trait StateBackend: Send + Sync + 'static {
    /// GET a string value.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// SET with expiry.
    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// SET NX with expiry; returns whether the key was newly set.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// DEL a key.
    async fn del(&self, key: &str) -> StoreResult<()>;

    /// EXISTS.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// INCR; returns the post-increment value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// EXPIRE; returns whether the key existed.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// ZADD a member with a score (upserts the member).
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()>;

    /// ZRANGEBYSCORE `[min, +inf)`, ascending by (score, member).
    async fn zrange_by_score(&self, key: &str, min: f64) -> StoreResult<Vec<String>>;

    /// ZREMRANGEBYSCORE `(-inf, max]`; returns removed count.
    async fn zrem_range_by_score(&self, key: &str, max: f64) -> StoreResult<usize>;

    /// ZCARD.
    async fn zcard(&self, key: &str) -> StoreResult<usize>;

    /// ZREMRANGEBYRANK over `[start, stop]` (Redis rank semantics).
    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> StoreResult<usize>;

    /// RPUSH; returns the new list length.
    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// LPUSH; returns the new list length.
    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize>;

    /// LRANGE over `[start, stop]` (Redis index semantics).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    /// LLEN.
    async fn llen(&self, key: &str) -> StoreResult<usize>;

    /// LTRIM to `[start, stop]`.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()>;

    /// BRPOP with a timeout; `None` on timeout.
    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>>;

    /// Atomically read a whole list and delete it together with a companion
    /// key. Backs the batch snapshot-and-clear.
    async fn drain_list(&self, list_key: &str, companion_key: &str) -> StoreResult<Vec<String>>;

    /// HSET multiple fields.
    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()>;

    /// HGET a single field.
    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    /// SADD.
    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()>;

    /// SREM.
    async fn srem(&self, key: &str, member: &str) -> StoreResult<()>;

    /// SMEMBERS.
    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    /// PUBLISH to a channel (best-effort fan-out).
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()>;

    /// SCAN keys matching a literal-`*` pattern.
    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>>;
}
