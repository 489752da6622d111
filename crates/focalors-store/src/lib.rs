//! # Focalors Store
//!
//! The key-value store adapter shared by the access manager and every
//! feature handler.
//!
//! - [`KvStore`]: the raw, string-valued contract (scalars with TTL, sets,
//!   sorted sets, lists).
//! - [`Store`]: a cloneable typed handle that JSON-encodes every value.
//! - [`MemoryStore`]: an in-process implementation.
//! - `RedisStore` (feature `redis`): a Redis implementation.
//!
//! Keys are plain strings; callers namespace them by component and topic
//! (`admin:access:gpt:allowed`, `client:jandan:seen:<id>`, ...).

mod error;
mod kv;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod typed;

pub use error::{StoreError, StoreResult};
pub use kv::{BoxedKvStore, KvStore};
pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use typed::Store;
