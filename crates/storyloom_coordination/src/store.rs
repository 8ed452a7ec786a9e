//! Cross-process coordination primitives for the admission gates.
//!
//! The cooldown and resource gates need atomic counters and TTL keys that
//! are visible across every admission-control instance in the fleet, not just
//! the local process. [`CoordinationStore`] is the seam: an in-memory
//! implementation for single-process deployments and tests, and an optional
//! Redis-backed one (feature `redis-store`) for a real multi-instance
//! deployment, mirroring the SADD/SET-with-TTL/ZADD primitives a Redis
//! client exposes natively.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),
}

/// Minimal Redis-shaped coordination surface: sets with atomic
/// add/remove/cardinality, TTL-backed single keys for cooldowns, and a
/// sorted set for the priority queue's position reporting.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError>;
    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError>;
    async fn scard(&self, set: &str) -> Result<u64, StoreError>;
    async fn sismember(&self, set: &str, member: &str) -> Result<bool, StoreError>;

    /// SET key with a TTL; returns false if the key already existed
    /// (mirrors Redis `SET key value NX EX ttl`).
    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError>;
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError>;
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;
    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError>;
}

#[derive(Default)]
struct InMemoryState {
    sets: HashMap<String, HashSet<String>>,
    ttl_keys: HashMap<String, (String, Instant)>,
    sorted_sets: HashMap<String, Vec<(String, f64)>>,
}

/// Single-process coordination store backed by `tokio::sync::Mutex`.
///
/// Correct for a single admission-control instance (the common case for
/// this orchestrator's default deployment); a multi-instance deployment
/// should build against `RedisStore` instead, behind the `redis-store`
/// feature.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InMemoryState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn sweep_expired(state: &mut InMemoryState) {
        let now = Instant::now();
        state.ttl_keys.retain(|_, (_, expires_at)| *expires_at > now);
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state.sets.entry(set.to_string()).or_default().insert(member.to_string()))
    }

    async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Ok(state
            .sets
            .get_mut(set)
            .map(|s| s.remove(member))
            .unwrap_or(false))
    }

    async fn scard(&self, set: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sets.get(set).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn sismember(&self, set: &str, member: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sets.get(set).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Self::sweep_expired(&mut state);
        if state.ttl_keys.contains_key(key) {
            return Ok(false);
        }
        state
            .ttl_keys
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        Self::sweep_expired(&mut state);
        Ok(state.ttl_keys.contains_key(key))
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let zset = state.sorted_sets.entry(key.to_string()).or_default();
        zset.retain(|(m, _)| m != member);
        zset.push((member.to_string(), score));
        zset.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(zset) = state.sorted_sets.get_mut(key) {
            zset.retain(|(m, _)| m != member);
        }
        Ok(())
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sorted_sets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sorted_sets
            .get(key)
            .and_then(|z| z.iter().position(|(m, _)| m == member))
            .map(|idx| idx as u64))
    }
}

#[cfg(feature = "redis-store")]
pub mod redis_store {
    use super::{CoordinationStore, StoreError};
    use async_trait::async_trait;
    use redis::AsyncCommands;
    use std::time::Duration;

    /// Redis-backed coordination store for multi-instance deployments.
    pub struct RedisStore {
        client: redis::Client,
    }

    impl RedisStore {
        pub fn new(url: &str) -> Result<Self, StoreError> {
            let client =
                redis::Client::open(url).map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(Self { client })
        }

        async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }
    }

    #[async_trait]
    impl CoordinationStore for RedisStore {
        async fn sadd(&self, set: &str, member: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn().await?;
            let added: i64 = conn
                .sadd(set, member)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(added > 0)
        }

        async fn srem(&self, set: &str, member: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn().await?;
            let removed: i64 = conn
                .srem(set, member)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(removed > 0)
        }

        async fn scard(&self, set: &str) -> Result<u64, StoreError> {
            let mut conn = self.conn().await?;
            conn.scard(set)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn sismember(&self, set: &str, member: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn().await?;
            conn.sismember(set, member)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn set_nx_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
            let mut conn = self.conn().await?;
            let result: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("NX")
                .arg("EX")
                .arg(ttl.as_secs())
                .query_async(&mut conn)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            Ok(result.is_some())
        }

        async fn exists(&self, key: &str) -> Result<bool, StoreError> {
            let mut conn = self.conn().await?;
            conn.exists(key)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            conn.zadd(key, member, score)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
            let mut conn = self.conn().await?;
            conn.zrem(key, member)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
            let mut conn = self.conn().await?;
            conn.zcard(key)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }

        async fn zrank(&self, key: &str, member: &str) -> Result<Option<u64>, StoreError> {
            let mut conn = self.conn().await?;
            conn.zrank(key, member)
                .await
                .map_err(|e| StoreError::Unavailable(e.to_string()))
        }
    }
}

#[cfg(feature = "redis-store")]
pub use redis_store::RedisStore;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sadd_then_scard_reflects_membership() {
        let store = InMemoryStore::new();
        assert!(store.sadd("active_books", "book-1").await.unwrap());
        assert!(!store.sadd("active_books", "book-1").await.unwrap());
        assert_eq!(store.scard("active_books").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn set_nx_ttl_is_exclusive_until_expiry() {
        let store = InMemoryStore::new();
        assert!(store
            .set_nx_ttl("cooldown:book-1", "1", Duration::from_millis(50))
            .await
            .unwrap());
        assert!(!store
            .set_nx_ttl("cooldown:book-1", "1", Duration::from_millis(50))
            .await
            .unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(!store.exists("cooldown:book-1").await.unwrap());
    }

    #[tokio::test]
    async fn zadd_and_zrank_order_by_score() {
        let store = InMemoryStore::new();
        store.zadd("queue", "job-b", 5.0).await.unwrap();
        store.zadd("queue", "job-a", 1.0).await.unwrap();
        assert_eq!(store.zrank("queue", "job-a").await.unwrap(), Some(0));
        assert_eq!(store.zrank("queue", "job-b").await.unwrap(), Some(1));
    }
}
