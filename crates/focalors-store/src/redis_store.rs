//! Redis-backed store.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::kv::KvStore;

/// A [`KvStore`] talking to a Redis server through a reconnecting
/// [`ConnectionManager`].
pub struct RedisStore {
    uri: String,
    connection: RwLock<Option<ConnectionManager>>,
}

impl RedisStore {
    /// Creates a store for `uri`. No connection is made until [`KvStore::start`].
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            connection: RwLock::new(None),
        }
    }

    fn connection(&self) -> StoreResult<ConnectionManager> {
        self.connection
            .read()
            .clone()
            .ok_or_else(|| StoreError::Unavailable("redis store has not been started".into()))
    }
}

/// Formats a score bound, using Redis' spelling for infinities.
fn score_bound(score: f64) -> String {
    if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else if score == f64::INFINITY {
        "+inf".to_string()
    } else {
        score.to_string()
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn start(&self) -> StoreResult<()> {
        if self.uri.trim().is_empty() {
            return Err(StoreError::Unavailable("redis uri is empty".into()));
        }
        let client = redis::Client::open(self.uri.as_str())?;
        let manager = ConnectionManager::new(client).await?;
        *self.connection.write() = Some(manager);
        info!(uri = %self.uri, "Connected to redis");
        Ok(())
    }

    async fn stop(&self) -> StoreResult<()> {
        if self.connection.write().take().is_some() {
            debug!(uri = %self.uri, "Dropped redis connection");
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.connection()?;
        Ok(conn.get(key).await?)
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let mut conn = self.connection()?;
        match ttl {
            Some(ttl) => {
                let _: () = conn.set_ex(key, value, ttl.as_secs().max(1)).await?;
            }
            None => {
                let _: () = conn.set(key, value).await?;
            }
        }
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        Ok(conn.exists(key).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        Ok(conn.expire(key, ttl.as_secs().max(1) as i64).await?)
    }

    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        Ok(conn.sadd(key, members).await?)
    }

    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut conn = self.connection()?;
        Ok(conn.srem(key, members).await?)
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        Ok(conn.sismember(key, member).await?)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.connection()?;
        Ok(conn.smembers(key).await?)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut conn = self.connection()?;
        let added: usize = conn.zadd(key, member, score).await?;
        Ok(added > 0)
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut conn = self.connection()?;
        Ok(conn.zscore(key, member).await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<usize> {
        let mut conn = self.connection()?;
        Ok(conn
            .zrembyscore(key, score_bound(min), score_bound(max))
            .await?)
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        let mut conn = self.connection()?;
        Ok(conn.zcard(key).await?)
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize> {
        let mut conn = self.connection()?;
        Ok(conn.lpush(key, value).await?)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        let mut conn = self.connection()?;
        Ok(conn.lrange(key, start, stop).await?)
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        let mut conn = self.connection()?;
        let _: () = conn.ltrim(key, start, stop).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_bound_spelling() {
        assert_eq!(score_bound(f64::NEG_INFINITY), "-inf");
        assert_eq!(score_bound(f64::INFINITY), "+inf");
        assert_eq!(score_bound(12.5), "12.5");
    }

    #[tokio::test]
    async fn test_operations_fail_before_start() {
        let store = RedisStore::new("redis://127.0.0.1:6379/1");
        assert!(matches!(
            store.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_uri_is_rejected() {
        let store = RedisStore::new("  ");
        assert!(matches!(store.start().await, Err(StoreError::Unavailable(_))));
    }
}
