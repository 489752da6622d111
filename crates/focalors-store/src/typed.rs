//! JSON-typed facade over a [`KvStore`].

use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreResult;
use crate::kv::{BoxedKvStore, KvStore};
use crate::memory::MemoryStore;

/// A cloneable handle to a shared store.
///
/// Every value (scalars, set members, sorted-set members, list items) is
/// JSON-encoded on the way in and decoded on the way out, so `sadd("k", &["a"])`
/// stores the member `"a"` including the quotes.
#[derive(Clone)]
pub struct Store {
    inner: BoxedKvStore,
}

impl Store {
    /// Wraps a concrete store.
    pub fn new(store: impl KvStore) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    /// Wraps an already shared store.
    pub fn from_arc(inner: BoxedKvStore) -> Self {
        Self { inner }
    }

    /// Creates a handle to a fresh in-memory store.
    pub fn memory() -> Self {
        Self::new(MemoryStore::new())
    }

    /// Returns the underlying raw store.
    pub fn raw(&self) -> &BoxedKvStore {
        &self.inner
    }

    pub async fn start(&self) -> StoreResult<()> {
        self.inner.start().await
    }

    pub async fn stop(&self) -> StoreResult<()> {
        self.inner.stop().await
    }

    // ─── Scalars ─────────────────────────────────────────────────────────────

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.inner.get(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> StoreResult<()> {
        self.inner.set(key, encode(value)?, ttl).await
    }

    pub async fn del(&self, key: &str) -> StoreResult<bool> {
        self.inner.del(key).await
    }

    pub async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.inner.exists(key).await
    }

    pub async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        self.inner.expire(key, ttl).await
    }

    // ─── Sets ────────────────────────────────────────────────────────────────

    pub async fn sadd<T: Serialize>(&self, key: &str, members: &[T]) -> StoreResult<usize> {
        self.inner.sadd(key, encode_all(members)?).await
    }

    pub async fn srem<T: Serialize>(&self, key: &str, members: &[T]) -> StoreResult<usize> {
        self.inner.srem(key, encode_all(members)?).await
    }

    pub async fn sismember<T: Serialize + ?Sized>(&self, key: &str, member: &T) -> StoreResult<bool> {
        self.inner.sismember(key, &encode(member)?).await
    }

    /// Returns all members of the set; undecodable members are an error.
    pub async fn smembers<T>(&self, key: &str) -> StoreResult<HashSet<T>>
    where
        T: DeserializeOwned + Eq + Hash,
    {
        self.inner
            .smembers(key)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    // ─── Sorted sets ─────────────────────────────────────────────────────────

    pub async fn zadd<T: Serialize + ?Sized>(
        &self,
        key: &str,
        member: &T,
        score: f64,
    ) -> StoreResult<bool> {
        self.inner.zadd(key, &encode(member)?, score).await
    }

    pub async fn zscore<T: Serialize + ?Sized>(
        &self,
        key: &str,
        member: &T,
    ) -> StoreResult<Option<f64>> {
        self.inner.zscore(key, &encode(member)?).await
    }

    pub async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<usize> {
        self.inner.zremrangebyscore(key, min, max).await
    }

    pub async fn zcard(&self, key: &str) -> StoreResult<usize> {
        self.inner.zcard(key).await
    }

    // ─── Lists ───────────────────────────────────────────────────────────────

    pub async fn lpush<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StoreResult<usize> {
        self.inner.lpush(key, encode(value)?).await
    }

    pub async fn lrange<T: DeserializeOwned>(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> StoreResult<Vec<T>> {
        self.inner
            .lrange(key, start, stop)
            .await?
            .iter()
            .map(|raw| serde_json::from_str(raw).map_err(Into::into))
            .collect()
    }

    pub async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.inner.ltrim(key, start, stop).await
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

fn encode<T: Serialize + ?Sized>(value: &T) -> StoreResult<String> {
    Ok(serde_json::to_string(value)?)
}

fn encode_all<T: Serialize>(values: &[T]) -> StoreResult<Vec<String>> {
    values.iter().map(encode).collect()
}
