//! The raw key-value store contract.
//!
//! [`KvStore`] speaks plain strings and mirrors the subset of Redis commands
//! the bridge relies on. Typed access goes through [`Store`](crate::Store),
//! which JSON-encodes every value before it reaches an implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// A remote associative store with scalar, set, sorted-set and list values.
///
/// Every operation is atomic on its own; there are no multi-key transactions.
/// List and range indices follow Redis semantics: negative indices count from
/// the end, and `stop` is inclusive.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    /// Establishes the connection. Defaults to a no-op.
    async fn start(&self) -> StoreResult<()> {
        Ok(())
    }

    /// Releases the connection. Defaults to a no-op.
    async fn stop(&self) -> StoreResult<()> {
        Ok(())
    }

    // ─── Scalars ─────────────────────────────────────────────────────────────

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Stores `value`, replacing any previous value and TTL.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> StoreResult<()>;

    /// Returns `true` if the key existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns `false` if the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    // ─── Sets ────────────────────────────────────────────────────────────────

    /// Returns the number of members that were newly added.
    async fn sadd(&self, key: &str, members: Vec<String>) -> StoreResult<usize>;

    /// Returns the number of members that were removed.
    async fn srem(&self, key: &str, members: Vec<String>) -> StoreResult<usize>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Vec<String>>;

    // ─── Sorted sets ─────────────────────────────────────────────────────────

    /// Returns `true` if the member was new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Removes members with `min <= score <= max`, returning how many went away.
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> StoreResult<usize>;

    async fn zcard(&self, key: &str) -> StoreResult<usize>;

    // ─── Lists ───────────────────────────────────────────────────────────────

    /// Pushes to the head of the list, returning the new length.
    async fn lpush(&self, key: &str, value: String) -> StoreResult<usize>;

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> StoreResult<Vec<String>>;

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> StoreResult<()>;
}

/// Type alias for a shared, type-erased store.
pub type BoxedKvStore = Arc<dyn KvStore>;

/// Resolves a Redis-style inclusive `[start, stop]` range against `len`.
///
/// Returns `None` when the range selects nothing.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}
