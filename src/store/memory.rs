//! In-memory state backend.
//!
//! Mirrors the Redis command semantics closely enough for hermetic tests:
//! FIFO lists, score-ordered sorted sets, lazy key expiry. All operations
//! run under a single mutex, which also makes the batch drain atomic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::store::{StateBackend, StoreResult};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, String>,
    lists: HashMap<String, VecDeque<String>>,
    zsets: HashMap<String, Vec<(f64, String)>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    expiries: HashMap<String, Instant>,
}

impl Inner {
    fn purge(&mut self, key: &str) {
        if let Some(deadline) = self.expiries.get(key) {
            if Instant::now() >= *deadline {
                self.expiries.remove(key);
                self.strings.remove(key);
                self.lists.remove(key);
                self.zsets.remove(key);
                self.hashes.remove(key);
                self.sets.remove(key);
            }
        }
    }

    fn remove(&mut self, key: &str) {
        self.expiries.remove(key);
        self.strings.remove(key);
        self.lists.remove(key);
        self.zsets.remove(key);
        self.hashes.remove(key);
        self.sets.remove(key);
    }

    fn key_exists(&self, key: &str) -> bool {
        self.strings.contains_key(key)
            || self.lists.contains_key(key)
            || self.zsets.contains_key(key)
            || self.hashes.contains_key(key)
            || self.sets.contains_key(key)
    }

    fn all_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .strings
            .keys()
            .chain(self.lists.keys())
            .chain(self.zsets.keys())
            .chain(self.hashes.keys())
            .chain(self.sets.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

/// Single-process backend used by the test suite.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

/// Resolve Redis-style inclusive `[start, stop]` indices against a length.
fn range_bounds(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    if len == 0 {
        return None;
    }
    let n = len as isize;
    let mut s = if start < 0 { n + start } else { start };
    let mut e = if stop < 0 { n + stop } else { stop };
    if s < 0 {
        s = 0;
    }
    if e >= n {
        e = n - 1;
    }
    if s > e || s >= n || e < 0 {
        return None;
    }
    Some((s as usize, e as usize))
}

fn sorted_zset(entries: &[(f64, String)]) -> Vec<(f64, String)> {
    let mut sorted = entries.to_vec();
    sorted.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });
    sorted
}

#[async_trait]
impl StateBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        Ok(inner.strings.get(key).cloned())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(key.to_string(), value.to_string());
        inner.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        Ok(inner.key_exists(key))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let next = inner
            .strings
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0)
            + 1;
        inner.strings.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        if !inner.key_exists(key) {
            return Ok(false);
        }
        inner.expiries.insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let entries = inner.zsets.entry(key.to_string()).or_default();
        if let Some(existing) = entries.iter_mut().find(|(_, m)| m == member) {
            existing.0 = score;
        } else {
            entries.push((score, member.to_string()));
        }
        Ok(())
    }

    async fn zrange_by_score(&self, key: &str, min: f64) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let entries = inner.zsets.get(key).map(|e| sorted_zset(e)).unwrap_or_default();
        Ok(entries
            .into_iter()
            .filter(|(score, _)| *score >= min)
            .map(|(_, member)| member)
            .collect())
    }

    async fn zrem_range_by_score(&self, key: &str, max: f64) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let Some(entries) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let before = entries.len();
        entries.retain(|(score, _)| *score > max);
        Ok(before - entries.len())
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        Ok(inner.zsets.get(key).map(|e| e.len()).unwrap_or(0))
    }

    async fn zrem_range_by_rank(&self, key: &str, start: isize, stop: isize) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let Some(entries) = inner.zsets.get_mut(key) else {
            return Ok(0);
        };
        let sorted = sorted_zset(entries);
        let Some((s, e)) = range_bounds(sorted.len(), start, stop) else {
            return Ok(0);
        };
        let doomed: HashSet<&str> = sorted[s..=e].iter().map(|(_, m)| m.as_str()).collect();
        let before = entries.len();
        entries.retain(|(_, m)| !doomed.contains(m.as_str()));
        Ok(before - entries.len())
    }

    async fn rpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len())
    }

    async fn lpush(&self, key: &str, value: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let Some(list) = inner.lists.get(key) else {
            return Ok(vec![]);
        };
        let Some((s, e)) = range_bounds(list.len(), start, stop) else {
            return Ok(vec![]);
        };
        Ok(list.iter().skip(s).take(e - s + 1).cloned().collect())
    }

    async fn llen(&self, key: &str) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        Ok(inner.lists.get(key).map(|l| l.len()).unwrap_or(0))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let Some(list) = inner.lists.get_mut(key) else {
            return Ok(());
        };
        match range_bounds(list.len(), start, stop) {
            Some((s, e)) => {
                let kept: VecDeque<String> =
                    list.iter().skip(s).take(e - s + 1).cloned().collect();
                *list = kept;
            }
            None => {
                inner.lists.remove(key);
            }
        }
        Ok(())
    }

    async fn brpop(&self, key: &str, timeout: Duration) -> StoreResult<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock();
                inner.purge(key);
                if let Some(list) = inner.lists.get_mut(key) {
                    if let Some(value) = list.pop_back() {
                        return Ok(Some(value));
                    }
                }
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn drain_list(&self, list_key: &str, companion_key: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.purge(list_key);
        let items = inner
            .lists
            .remove(list_key)
            .map(|l| l.into_iter().collect())
            .unwrap_or_default();
        inner.remove(companion_key);
        Ok(items)
    }

    async fn hset(&self, key: &str, fields: &[(&str, String)]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.to_string(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        Ok(inner.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    async fn sadd(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        if let Some(set) = inner.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut inner = self.inner.lock();
        inner.purge(key);
        let mut members: Vec<String> = inner
            .sets
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        Ok(members)
    }

    async fn publish(&self, _channel: &str, _payload: &str) -> StoreResult<()> {
        // No cross-process fan-out in a single process; the version counter
        // carries the correctness.
        Ok(())
    }

    async fn scan_keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let inner = self.inner.lock();
        Ok(inner
            .all_keys()
            .into_iter()
            .filter(|key| crate::rule::wildcard_match(pattern, key))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_fifo_semantics() {
        let backend = MemoryBackend::new();
        backend.lpush("q", "a").await.unwrap();
        backend.lpush("q", "b").await.unwrap();
        // BRPOP pops the oldest LPUSHed element first.
        assert_eq!(
            backend.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("a".to_string())
        );
        assert_eq!(
            backend.brpop("q", Duration::from_millis(10)).await.unwrap(),
            Some("b".to_string())
        );
        assert_eq!(
            backend.brpop("q", Duration::from_millis(10)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_zset_score_order_and_upsert() {
        let backend = MemoryBackend::new();
        backend.zadd("z", "late", 30.0).await.unwrap();
        backend.zadd("z", "early", 10.0).await.unwrap();
        backend.zadd("z", "mid", 20.0).await.unwrap();
        // Re-adding a member updates its score instead of duplicating.
        backend.zadd("z", "early", 10.0).await.unwrap();

        assert_eq!(backend.zcard("z").await.unwrap(), 3);
        assert_eq!(
            backend.zrange_by_score("z", 15.0).await.unwrap(),
            vec!["mid".to_string(), "late".to_string()]
        );

        assert_eq!(backend.zrem_range_by_score("z", 10.0).await.unwrap(), 1);
        assert_eq!(backend.zcard("z").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_set_nx_and_expiry() {
        let backend = MemoryBackend::new();
        assert!(backend
            .set_nx_ex("lock", "1", Duration::from_millis(20))
            .await
            .unwrap());
        assert!(!backend
            .set_nx_ex("lock", "1", Duration::from_millis(20))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(backend
            .set_nx_ex("lock", "1", Duration::from_millis(20))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_drain_list_clears_companion() {
        let backend = MemoryBackend::new();
        backend.rpush("batch", "e1").await.unwrap();
        backend.rpush("batch", "e2").await.unwrap();
        backend
            .set_ex("since", "123", Duration::from_secs(60))
            .await
            .unwrap();

        let drained = backend.drain_list("batch", "since").await.unwrap();
        assert_eq!(drained, vec!["e1".to_string(), "e2".to_string()]);
        assert!(!backend.exists("batch").await.unwrap());
        assert!(!backend.exists("since").await.unwrap());

        assert!(backend.drain_list("batch", "since").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_keys() {
        let backend = MemoryBackend::new();
        backend.set_ex("trigger:mode:batch_since:r-1:k1", "1", Duration::from_secs(60)).await.unwrap();
        backend.set_ex("trigger:mode:batch_since:r-1:k2", "1", Duration::from_secs(60)).await.unwrap();
        backend.set_ex("trigger:mode:batch_since:r-2:k1", "1", Duration::from_secs(60)).await.unwrap();

        let keys = backend
            .scan_keys("trigger:mode:batch_since:r-1:*")
            .await
            .unwrap();
        assert_eq!(keys.len(), 2);
    }
}
