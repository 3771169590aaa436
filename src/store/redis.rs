//! Redis implementation of the state backend.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::store::{StateBackend, StoreError, StoreResult};

/// Redis-backed state store.
///
/// Wraps a [`ConnectionManager`], which multiplexes and reconnects under
/// the hood; cloning is cheap.
#[derive(Clone)]
pub struct RedisBackend {
    manager: ConnectionManager,
}

impl RedisBackend {
    /// Connect to Redis at the given URL.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        info!("connected to redis");
        Ok(Self { manager })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Subscribe to the rule-update channel and run `on_update` for every
    /// message until shutdown. Delivery is best-effort; correctness relies
    /// on the version counter, so subscription failures only log.
    pub async fn run_update_listener<F>(
        url: &str,
        channel: &str,
        mut shutdown: watch::Receiver<bool>,
        on_update: F,
    ) where
        F: Fn(String) + Send + 'static,
    {
        loop {
            if *shutdown.borrow() {
                break;
            }
            match Self::listen_once(url, channel, &mut shutdown, &on_update).await {
                Ok(()) => break,
                Err(e) => {
                    warn!(error = %e, "rule update subscription lost, retrying");
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }
    }

    async fn listen_once<F>(
        url: &str,
        channel: &str,
        shutdown: &mut watch::Receiver<bool>,
        on_update: &F,
    ) -> StoreResult<()>
    where
        F: Fn(String) + Send,
    {
        let client = redis::Client::open(url)?;
        let conn = client.get_async_connection().await?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await?;
        let mut messages = pubsub.on_message();

        loop {
            tokio::select! {
                message = messages.next() => {
                    match message {
                        Some(msg) => {
                            let payload: String = msg.get_payload().unwrap_or_default();
                            on_update(payload);
                        }
                        None => {
                            return Err(StoreError::Unavailable(
                                "pubsub stream closed".to_string(),
                            ));
                        }
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    // Redis rejects zero expiries; clamp up to one second.
    ttl.as_secs().max(1)
}

#[async_trait]
impl StateBackend for RedisBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_secs(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(conn.exists(key).await?)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn();
        Ok(conn.incr(key, 1).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn();
        Ok(conn.expire(key, ttl_secs(ttl) as i64).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: f64) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.zrangebyscore(key, min, "+inf").await?)
    }

    async fn zrem_range_by_score(&self, key: &str, max: f64) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.zrembyscore(key, "-inf", max).await?)
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.zcard(key).await?)
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.zremrangebyrank(key, start, stop).await?)
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.rpush(key, value).await?)
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.lpush(key, value).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.conn();
        Ok(conn.llen(key).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.ltrim::<_, ()>(key, start, stop).await?;
        Ok(())
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        let reply: Option<(String, String)> =
            conn.brpop(key, timeout.as_secs_f64()).await?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn drain_list(&self, list_key: &str, companion_key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let (items,): (Vec<String>,) = redis::pipe()
            .atomic()
            .lrange(list_key, 0, -1)
            .del(list_key)
            .ignore()
            .del(companion_key)
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(items)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.hget(key, field).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<()> {
        let mut conn = self.conn();
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(keys)
    }
}
