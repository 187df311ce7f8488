//! Durable per-call/session records with TTL: keyed KV, an ordered append
//! stream, and sorted sets for the wait queue. Grounded on the teacher
//! `signaling` service's `redis::aio::ConnectionManager` usage (`SET ... EX`,
//! `EXPIRE`, `DEL`), generalized from a single presence key into the full
//! surface the core needs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store backend unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StateStoreError>;

/// Four-operation surface every other component depends on. A `get` miss is
/// not an error; callers degrade gracefully on `Err` per the design's
/// failure policy (§4.1/§4.5).
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()>;
    async fn del(&self, key: &str) -> StoreResult<()>;
    /// Atomic `SET key val NX EX ttl`; returns `true` if the key was newly
    /// set, `false` if it already existed. Used by the wave scheduler to
    /// guarantee at most one dispatched wave per occurrence.
    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool>;

    async fn stream_append(&self, stream_key: &str, fields: Vec<(String, String)>) -> StoreResult<String>;
    async fn stream_range(&self, stream_key: &str, after_id: Option<&str>) -> StoreResult<Vec<(String, Vec<(String, String)>)>>;

    async fn zadd(&self, set_key: &str, member: &str, score: f64) -> StoreResult<()>;
    async fn zrank(&self, set_key: &str, member: &str) -> StoreResult<Option<u64>>;
    async fn zrem(&self, set_key: &str, member: &str) -> StoreResult<()>;
    async fn zrange(&self, set_key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;
}

/// Redis-backed implementation used in every deployed service.
#[derive(Clone)]
pub struct RedisStateStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_tokio_connection_manager().await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.set_ex(key, value, ttl.as_secs().max(1))
            .await
            .map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let opts = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(ttl.as_secs().max(1) as usize));
        let result: Option<String> = conn
            .set_options(key, value, opts)
            .await
            .map_err(|e| StateStoreError::Unavailable(e.to_string()))?;
        Ok(result.is_some())
    }

    async fn stream_append(&self, stream_key: &str, fields: Vec<(String, String)>) -> StoreResult<String> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_key).arg("*");
        for (k, v) in fields {
            cmd.arg(k).arg(v);
        }
        cmd.query_async(&mut conn).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }

    async fn stream_range(&self, stream_key: &str, after_id: Option<&str>) -> StoreResult<Vec<(String, Vec<(String, String)>)>> {
        let mut conn = self.conn.clone();
        let start = after_id.map(|id| format!("({id}")).unwrap_or_else(|| "-".to_string());
        let raw: Vec<(String, Vec<(String, String)>)> = redis::cmd("XRANGE")
            .arg(stream_key)
            .arg(start)
            .arg("+")
            .query_async(&mut conn)
            .await
            .map_err(|e| StateStoreError::Unavailable(e.to_string()))?;
        Ok(raw)
    }

    async fn zadd(&self, set_key: &str, member: &str, score: f64) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        conn.zadd(set_key, member, score).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }

    async fn zrank(&self, set_key: &str, member: &str) -> StoreResult<Option<u64>> {
        let mut conn = self.conn.clone();
        conn.zrank(set_key, member).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }

    async fn zrem(&self, set_key: &str, member: &str) -> StoreResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.zrem(set_key, member).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))?;
        Ok(())
    }

    async fn zrange(&self, set_key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.zrange(set_key, start, stop).await.map_err(|e| StateStoreError::Unavailable(e.to_string()))
    }
}

/// In-memory fake used by unit/property tests so the FSM, queue, and wave
/// logic can be exercised without a live Redis.
#[derive(Default)]
pub struct InMemoryStateStore {
    inner: Arc<Mutex<InMemoryInner>>,
}

#[derive(Default)]
struct InMemoryInner {
    kv: HashMap<String, Vec<u8>>,
    streams: HashMap<String, BTreeMap<u64, Vec<(String, String)>>>,
    stream_seq: HashMap<String, u64>,
    zsets: HashMap<String, BTreeMap<String, f64>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.inner.lock().await.kv.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> StoreResult<()> {
        self.inner.lock().await.kv.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        self.inner.lock().await.kv.remove(key);
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Vec<u8>, _ttl: Duration) -> StoreResult<bool> {
        let mut guard = self.inner.lock().await;
        if guard.kv.contains_key(key) {
            Ok(false)
        } else {
            guard.kv.insert(key.to_string(), value);
            Ok(true)
        }
    }

    async fn stream_append(&self, stream_key: &str, fields: Vec<(String, String)>) -> StoreResult<String> {
        let mut guard = self.inner.lock().await;
        let seq = guard.stream_seq.entry(stream_key.to_string()).or_insert(0);
        *seq += 1;
        let id = *seq;
        guard.streams.entry(stream_key.to_string()).or_default().insert(id, fields);
        Ok(format!("{id}-0"))
    }

    async fn stream_range(&self, stream_key: &str, after_id: Option<&str>) -> StoreResult<Vec<(String, Vec<(String, String)>)>> {
        let guard = self.inner.lock().await;
        let after: u64 = after_id.and_then(|s| s.split('-').next()).and_then(|s| s.parse().ok()).unwrap_or(0);
        Ok(guard
            .streams
            .get(stream_key)
            .map(|tree| {
                tree.range((after + 1)..)
                    .map(|(id, fields)| (format!("{id}-0"), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn zadd(&self, set_key: &str, member: &str, score: f64) -> StoreResult<()> {
        self.inner.lock().await.zsets.entry(set_key.to_string()).or_default().insert(member.to_string(), score);
        Ok(())
    }

    async fn zrank(&self, set_key: &str, member: &str) -> StoreResult<Option<u64>> {
        let guard = self.inner.lock().await;
        let Some(set) = guard.zsets.get(set_key) else { return Ok(None) };
        let mut sorted: Vec<(&String, &f64)> = set.iter().collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap());
        Ok(sorted.iter().position(|(m, _)| m.as_str() == member).map(|p| p as u64))
    }

    async fn zrem(&self, set_key: &str, member: &str) -> StoreResult<()> {
        if let Some(set) = self.inner.lock().await.zsets.get_mut(set_key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn zrange(&self, set_key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let guard = self.inner.lock().await;
        let Some(set) = guard.zsets.get(set_key) else { return Ok(vec![]) };
        let mut sorted: Vec<(&String, &f64)> = set.iter().collect();
        sorted.sort_by(|a, b| a.1.partial_cmp(b.1).unwrap());
        let len = sorted.len() as isize;
        let norm = |i: isize| -> usize {
            if i < 0 { (len + i).max(0) as usize } else { i.min(len) as usize }
        };
        let (s, e) = (norm(start), norm(stop + 1));
        Ok(sorted.get(s..e.max(s)).unwrap_or(&[]).iter().map(|(m, _)| m.to_string()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_nx_guards_one_writer() {
        let store = InMemoryStateStore::new();
        assert!(store.set_nx("wave:O1", b"a".to_vec(), Duration::from_secs(60)).await.unwrap());
        assert!(!store.set_nx("wave:O1", b"b".to_vec(), Duration::from_secs(60)).await.unwrap());
    }

    #[tokio::test]
    async fn stream_range_is_monotonic_after_cursor() {
        let store = InMemoryStateStore::new();
        let id1 = store.stream_append("events:p:2026-01-15", vec![("t".into(), "a".into())]).await.unwrap();
        let _id2 = store.stream_append("events:p:2026-01-15", vec![("t".into(), "b".into())]).await.unwrap();
        let id3 = store.stream_append("events:p:2026-01-15", vec![("t".into(), "c".into())]).await.unwrap();
        let after = store.stream_range("events:p:2026-01-15", Some(&id1)).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after.last().unwrap().0, id3);
    }

    #[tokio::test]
    async fn zrank_reflects_enqueue_order() {
        let store = InMemoryStateStore::new();
        store.zadd("queue:p1", "call-a", 1.0).await.unwrap();
        store.zadd("queue:p1", "call-b", 2.0).await.unwrap();
        assert_eq!(store.zrank("queue:p1", "call-a").await.unwrap(), Some(0));
        assert_eq!(store.zrank("queue:p1", "call-b").await.unwrap(), Some(1));
        store.zrem("queue:p1", "call-a").await.unwrap();
        assert_eq!(store.zrank("queue:p1", "call-b").await.unwrap(), Some(0));
    }
}
