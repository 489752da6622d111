//! In-process store.
//!
//! Used by tests and by single-process deployments that can live without
//! persistence. Expiry is evaluated lazily against `tokio::time::Instant`, so
//! tests running with a paused clock can advance past a TTL deterministically.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};
use crate::kv::{KvStore, resolve_range};

#[derive(Debug, Clone)]
enum Value {
    Scalar(String),
    Set(HashSet<String>),
    Sorted(HashMap<String, f64>),
    List(VecDeque<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A [`KvStore`] backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against the live (non-expired) entry for `key`, if any.
    fn with_entry<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        f(entries.get_mut(key))
    }

    /// Like [`with_entry`](Self::with_entry), for operations that shrink a
    /// collection. A collection left empty is removed, matching Redis.
    fn modify<R>(&self, key: &str, f: impl FnOnce(Option<&mut Entry>) -> R) -> R {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let result = f(entries.get_mut(key));
        if entries.get(key).is_some_and(|e| is_empty_collection(&e.value)) {
            entries.remove(key);
        }
        result
    }

    /// Runs `f` against the entry for `key`, creating it with `init` when absent.
    ///
    /// Empty collections are removed afterwards, matching Redis.
    fn upsert<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> Value,
        f: impl FnOnce(&mut Value) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if entries.get(key).is_some_and(|e| e.is_expired(now)) {
            entries.remove(key);
        }
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(init()));
        let result = f(&mut entry.value);
        if is_empty_collection(&entry.value) {
            entries.remove(key);
        }
        result
    }
}

fn is_empty_collection(value: &Value) -> bool {
    match value {
        Value::Scalar(_) => false,
        Value::Set(s) => s.is_empty(),
        Value::Sorted(z) => z.is_empty(),
        Value::List(l) => l.is_empty(),
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Scalar(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.lock().insert(
            key.to_string(),
            Entry {
                value: Value::Scalar(value),
                expires_at,
            },
        );
        Ok(())
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let existed = self.with_entry(key, |entry| entry.is_some());
        self.entries.lock().remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.with_entry(key, |entry| entry.is_some()))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        Ok(self.with_entry(key, |entry| match entry {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                true
            }
            None => false,
        }))
    }

    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        self.upsert(
            key,
            || Value::Set(HashSet::new()),
            |value| match value {
                Value::Set(set) => Ok(members.into_iter().filter(|m| set.insert(m.clone())).count()),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<usize> {
        self.modify(key, |entry| match entry {
            None => Ok(0),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(members.iter().filter(|m| set.remove(*m)).count()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.with_entry(key, |entry| match entry {
            None => Ok(false),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.contains(member)),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        self.upsert(
            key,
            || Value::Sorted(HashMap::new()),
            |value| match value {
                Value::Sorted(zset) => Ok(zset.insert(member.to_string(), score).is_none()),
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(None),
            Some(Entry {
                value: Value::Sorted(zset),
                ..
            }) => Ok(zset.get(member).copied()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<usize> {
        self.modify(key, |entry| match entry {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(zset),
                ..
            }) => {
                let before = zset.len();
                zset.retain(|_, score| *score < min || *score > max);
                Ok(before - zset.len())
            }
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn zcard(&self, key: &str) -> StoreResult<usize> {
        self.with_entry(key, |entry| match entry {
            None => Ok(0),
            Some(Entry {
                value: Value::Sorted(zset),
                ..
            }) => Ok(zset.len()),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize> {
        self.upsert(
            key,
            || Value::List(VecDeque::new()),
            |entry| match entry {
                Value::List(list) => {
                    list.push_front(value);
                    Ok(list.len())
                }
                _ => Err(wrong_type(key)),
            },
        )
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>> {
        self.with_entry(key, |entry| match entry {
            None => Ok(Vec::new()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => Ok(match resolve_range(list.len(), start, stop) {
                Some((from, to)) => list.range(from..=to).cloned().collect(),
                None => Vec::new(),
            }),
            Some(_) => Err(wrong_type(key)),
        })
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()> {
        self.modify(key, |entry| match entry {
            None => Ok(()),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                match resolve_range(list.len(), start, stop) {
                    Some((from, to)) => {
                        list.truncate(to + 1);
                        list.drain(..from);
                    }
                    None => list.clear(),
                }
                Ok(())
            }
            Some(_) => Err(wrong_type(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scalar_roundtrip_and_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store.set("k", "v".into(), None).await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.exists("k").await.unwrap());

        assert!(store.del("k").await.unwrap());
        assert!(!store.del("k").await.unwrap());
        assert!(!store.exists("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expires_lazily() {
        let store = MemoryStore::new();
        store
            .set("k", "v".into(), Some(Duration::from_secs(10)))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(9)).await;
        assert!(store.exists("k").await.unwrap());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!store.exists("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_refreshes_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", "v".into(), Some(Duration::from_secs(5)))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.expire("k", Duration::from_secs(5)).await.unwrap());
        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(store.exists("k").await.unwrap());
        assert!(!store.expire("missing", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_set_operations() {
        let store = MemoryStore::new();
        let added = store
            .sadd("s", vec!["a".into(), "b".into(), "a".into()])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert!(store.sismember("s", "a").await.unwrap());
        assert!(!store.sismember("s", "c").await.unwrap());

        let removed = store.srem("s", vec!["a".into(), "c".into()]).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.smembers("s").await.unwrap(), vec!["b".to_string()]);

        store.srem("s", vec!["b".into()]).await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_sorted_set_range_removal() {
        let store = MemoryStore::new();
        assert!(store.zadd("z", "old", 10.0).await.unwrap());
        assert!(store.zadd("z", "mid", 20.0).await.unwrap());
        assert!(store.zadd("z", "new", 30.0).await.unwrap());
        assert!(!store.zadd("z", "new", 31.0).await.unwrap());
        assert_eq!(store.zscore("z", "new").await.unwrap(), Some(31.0));

        let removed = store
            .zremrangebyscore("z", f64::NEG_INFINITY, 20.0)
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.zscore("z", "old").await.unwrap(), None);
        assert_eq!(store.zcard("z").await.unwrap(), 1);

        store
            .zremrangebyscore("z", f64::NEG_INFINITY, f64::INFINITY)
            .await
            .unwrap();
        assert!(!store.exists("z").await.unwrap());
    }

    #[tokio::test]
    async fn test_emptied_set_can_change_type() {
        let store = MemoryStore::new();
        store.sadd("k", vec!["a".into()]).await.unwrap();
        assert_eq!(store.srem("k", vec!["a".into()]).await.unwrap(), 1);
        assert!(!store.exists("k").await.unwrap());
        assert!(store.zadd("k", "m", 1.0).await.unwrap());
        assert_eq!(store.zcard("k").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_list_push_range_trim() {
        let store = MemoryStore::new();
        for v in ["1", "2", "3", "4"] {
            store.lpush("l", v.into()).await.unwrap();
        }
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["4", "3", "2", "1"]);
        assert_eq!(store.lrange("l", 0, 1).await.unwrap(), vec!["4", "3"]);

        store.ltrim("l", 0, 2).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["4", "3", "2"]);

        store.ltrim("l", 5, 10).await.unwrap();
        assert!(!store.exists("l").await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_type_is_reported() {
        let store = MemoryStore::new();
        store.set("k", "v".into(), None).await.unwrap();
        let err = store.sadd("k", vec!["x".into()]).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { key } if key == "k"));
    }
}
