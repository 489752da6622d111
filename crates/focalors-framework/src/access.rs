//! Per-topic allow lists and the in-band admin commands that edit them.
//!
//! The master identity manages each topic through chat commands:
//!
//! ```text
//! /list gpt [filter]   list groups and friends with their allow state
//! /add gpt 1,3         allow entries 1 and 3 of the last listing
//! /del gpt 2           revoke entry 2 of the last listing
//! ```
//!
//! The listing is cached for ten minutes so indices stay stable between a
//! `list` and the following `add` or `del`.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use focalors_core::{BoxedBackend, Message, match_pattern};
use focalors_store::Store;

use crate::error::AccessResult;

/// Shared cache of the most recent listing.
const LIST_KEY: &str = "admin:access:list";
const LIST_TTL: Duration = Duration::from_secs(10 * 60);

static ADMIN_COMMAND: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/\s*(add|del|list)\s+(\S+)(\s+.*)?$").expect("admin pattern is valid")
});

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Contact {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Add,
    Del,
    List,
}

impl Verb {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "add" => Some(Verb::Add),
            "del" => Some(Verb::Del),
            "list" => Some(Verb::List),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Verb::Add => "add",
            Verb::Del => "del",
            Verb::List => "list",
        }
    }
}

/// The allow list of one topic.
pub struct AccessManager {
    topic: String,
    allowed_key: String,
    store: Store,
    backend: BoxedBackend,
    master_id: Option<String>,
}

impl AccessManager {
    pub fn new(
        topic: impl Into<String>,
        store: Store,
        backend: BoxedBackend,
        master_id: Option<String>,
    ) -> Self {
        let topic = topic.into();
        Self {
            allowed_key: format!("admin:access:{topic}:allowed"),
            topic,
            store,
            backend,
            master_id,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    fn is_master(&self, id: &str) -> bool {
        self.master_id.as_deref().is_some_and(|m| !m.is_empty() && m == id)
    }

    /// Runs an admin command addressed to this topic.
    ///
    /// Returns `Ok(None)` when the sender is not the master or the message is
    /// not an admin command for this topic, otherwise the text to reply with.
    pub async fn manage(
        &self,
        message: &Message,
        user_id: Option<&str>,
    ) -> AccessResult<Option<String>> {
        if !user_id.is_some_and(|id| self.is_master(id)) {
            return Ok(None);
        }
        let Some(caps) = match_pattern(message, &ADMIN_COMMAND) else {
            return Ok(None);
        };
        if &caps[2] != self.topic {
            return Ok(None);
        }
        let Some(verb) = Verb::parse(&caps[1]) else {
            return Ok(None);
        };
        let args = caps
            .get(3)
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty());

        debug!(topic = %self.topic, verb = verb.as_str(), "Admin command");
        self.execute(verb, args).await.map(Some)
    }

    async fn execute(&self, verb: Verb, args: Option<&str>) -> AccessResult<String> {
        match verb {
            Verb::List => self.list(args).await,
            Verb::Add | Verb::Del => {
                let Some(args) = args else {
                    return Ok(format!("{} need index(s)", verb.as_str()));
                };
                let Some(contacts) = self.store.get::<Vec<Contact>>(LIST_KEY).await? else {
                    return Ok("Context lost, please re-list contacts".to_string());
                };
                let ids = resolve_indices(&contacts, args);
                if !ids.is_empty() {
                    let changed = if verb == Verb::Add {
                        self.store.sadd(&self.allowed_key, &ids).await?
                    } else {
                        self.store.srem(&self.allowed_key, &ids).await?
                    };
                    info!(topic = %self.topic, verb = verb.as_str(), changed, "Allow list updated");
                }
                self.list(None).await
            }
        }
    }

    async fn list(&self, filter: Option<&str>) -> AccessResult<String> {
        let groups = self.backend.get_groups(false).await?;
        let friends = self.backend.get_friends(false).await?;
        let contacts: Vec<Contact> = groups
            .into_iter()
            .map(|g| Contact {
                id: g.group_id,
                name: g.group_name,
            })
            .chain(friends.into_iter().map(|f| Contact {
                id: f.user_id,
                name: f.user_name,
            }))
            .filter(|c| filter.is_none_or(|k| c.name.contains(k) || c.id.contains(k)))
            .collect();

        self.store.set(LIST_KEY, &contacts, Some(LIST_TTL)).await?;
        let allowed: HashSet<String> = self.store.smembers(&self.allowed_key).await?;

        let lines: Vec<String> = contacts
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let mark = if allowed.contains(&c.id) { "✅" } else { " " };
                format!("{}.{}{}", i + 1, mark, c.name)
            })
            .collect();
        Ok(format!("Users & Groups:\n{}", lines.join("\n")))
    }

    /// Returns whether `id` may use this topic.
    ///
    /// The master passes without touching the store. Store failures are
    /// returned, never treated as a decision.
    pub async fn check(&self, id: &str) -> AccessResult<bool> {
        if self.is_master(id) {
            return Ok(true);
        }
        Ok(self.store.sismember(&self.allowed_key, id).await?)
    }
}

impl std::fmt::Debug for AccessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessManager")
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Resolves comma-separated 1-based indices against a listing, dropping
/// anything unparseable or out of range.
fn resolve_indices(contacts: &[Contact], args: &str) -> Vec<String> {
    let wanted: HashSet<usize> = args
        .split(',')
        .filter_map(|s| s.trim().parse::<usize>().ok())
        .filter(|&i| i >= 1 && i <= contacts.len())
        .collect();
    contacts
        .iter()
        .enumerate()
        .filter(|(i, _)| wanted.contains(&(i + 1)))
        .map(|(_, c)| c.id.clone())
        .collect()
}

/// Builds one [`AccessManager`] per topic over shared services.
#[derive(Clone)]
pub struct AccessManagerFactory {
    store: Store,
    backend: BoxedBackend,
    master_id: Option<String>,
}

impl AccessManagerFactory {
    pub fn new(store: Store, backend: BoxedBackend, master_id: Option<String>) -> Self {
        Self {
            store,
            backend,
            master_id,
        }
    }

    /// Returns an independent manager bound to `topic`.
    pub fn make(&self, topic: &str) -> Arc<AccessManager> {
        Arc::new(AccessManager::new(
            topic,
            self.store.clone(),
            self.backend.clone(),
            self.master_id.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;
    use async_trait::async_trait;
    use focalors_store::{KvStore, StoreError, StoreResult};

    const MASTER: &str = "wxid_master";

    /// A store that fails every call.
    struct DownStore;

    #[async_trait]
    impl KvStore for DownStore {
        async fn get(&self, _: &str) -> StoreResult<Option<String>> {
            Err(down())
        }
        async fn set(&self, _: &str, _: String, _: Option<Duration>) -> StoreResult<()> {
            Err(down())
        }
        async fn del(&self, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn exists(&self, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn expire(&self, _: &str, _: Duration) -> StoreResult<bool> {
            Err(down())
        }
        async fn sadd(&self, _: &str, _: Vec<String>) -> StoreResult<usize> {
            Err(down())
        }
        async fn srem(&self, _: &str, _: Vec<String>) -> StoreResult<usize> {
            Err(down())
        }
        async fn sismember(&self, _: &str, _: &str) -> StoreResult<bool> {
            Err(down())
        }
        async fn smembers(&self, _: &str) -> StoreResult<Vec<String>> {
            Err(down())
        }
        async fn zadd(&self, _: &str, _: &str, _: f64) -> StoreResult<bool> {
            Err(down())
        }
        async fn zscore(&self, _: &str, _: &str) -> StoreResult<Option<f64>> {
            Err(down())
        }
        async fn zremrangebyscore(&self, _: &str, _: f64, _: f64) -> StoreResult<usize> {
            Err(down())
        }
        async fn zcard(&self, _: &str) -> StoreResult<usize> {
            Err(down())
        }
        async fn lpush(&self, _: &str, _: String) -> StoreResult<usize> {
            Err(down())
        }
        async fn lrange(&self, _: &str, _: isize, _: isize) -> StoreResult<Vec<String>> {
            Err(down())
        }
        async fn ltrim(&self, _: &str, _: isize, _: isize) -> StoreResult<()> {
            Err(down())
        }
    }

    fn down() -> StoreError {
        StoreError::Unavailable("down".into())
    }

    fn backend() -> Arc<MockBackend> {
        let backend = MockBackend::new();
        backend.add_group("g1@chatroom", "Family");
        backend.add_friend("wxid_alice", "alice");
        backend.add_friend("wxid_bob", "bob");
        backend
    }

    fn manager(store: Store) -> AccessManager {
        AccessManager::new("gpt", store, backend(), Some(MASTER.to_string()))
    }

    async fn admin(m: &AccessManager, text: &str) -> Option<String> {
        m.manage(&Message::from(text), Some(MASTER)).await.unwrap()
    }

    #[tokio::test]
    async fn test_master_bypasses_failing_store() {
        let m = manager(Store::new(DownStore));
        assert!(m.check(MASTER).await.unwrap());
        assert!(m.check("wxid_alice").await.is_err());
    }

    #[tokio::test]
    async fn test_list_add_check_del() {
        let m = manager(Store::memory());
        assert!(!m.check("wxid_alice").await.unwrap());

        let listing = admin(&m, "/list gpt").await.unwrap();
        assert_eq!(listing, "Users & Groups:\n1. Family\n2. alice\n3. bob");

        let listing = admin(&m, "/add gpt 2").await.unwrap();
        assert_eq!(listing, "Users & Groups:\n1. Family\n2.✅alice\n3. bob");
        assert!(m.check("wxid_alice").await.unwrap());
        assert!(!m.check("wxid_bob").await.unwrap());

        admin(&m, "/del gpt 2").await.unwrap();
        assert!(!m.check("wxid_alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_filter_and_indices() {
        let m = manager(Store::memory());
        let listing = admin(&m, "/list gpt bo").await.unwrap();
        assert_eq!(listing, "Users & Groups:\n1. bob");

        // Index 1 refers to the filtered listing; garbage and out-of-range
        // entries are ignored.
        admin(&m, "/add gpt x, 1 ,7,0").await.unwrap();
        assert!(m.check("wxid_bob").await.unwrap());
        assert!(!m.check("g1@chatroom").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_without_indices_or_listing() {
        let m = manager(Store::memory());
        assert_eq!(admin(&m, "/add gpt").await.unwrap(), "add need index(s)");
        assert_eq!(admin(&m, "/del gpt  ").await.unwrap(), "del need index(s)");
        assert_eq!(
            admin(&m, "/add gpt 1").await.unwrap(),
            "Context lost, please re-list contacts"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_expires() {
        let m = manager(Store::memory());
        admin(&m, "/list gpt").await.unwrap();
        tokio::time::advance(Duration::from_secs(601)).await;
        assert_eq!(
            admin(&m, "/add gpt 1").await.unwrap(),
            "Context lost, please re-list contacts"
        );
    }

    #[tokio::test]
    async fn test_manage_ignores_others_and_other_topics() {
        let m = manager(Store::memory());
        let msg = Message::from("/list gpt");
        assert!(m.manage(&msg, Some("wxid_alice")).await.unwrap().is_none());
        assert!(m.manage(&msg, None).await.unwrap().is_none());
        assert!(admin(&m, "/list dalle").await.is_none());
        assert!(admin(&m, "/list gpt4").await.is_none());
        assert!(admin(&m, "hello").await.is_none());
        assert!(admin(&m, "/ list   gpt").await.is_some());
    }

    #[tokio::test]
    async fn test_manage_propagates_store_failure() {
        let m = manager(Store::new(DownStore));
        let res = m.manage(&Message::from("/list gpt"), Some(MASTER)).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn test_topics_are_independent() {
        let store = Store::memory();
        let factory = AccessManagerFactory::new(store, backend(), Some(MASTER.to_string()));
        let gpt = factory.make("gpt");
        let dalle = factory.make("dalle");

        gpt.manage(&Message::from("/list gpt"), Some(MASTER))
            .await
            .unwrap();
        gpt.manage(&Message::from("/add gpt 3"), Some(MASTER))
            .await
            .unwrap();
        assert!(gpt.check("wxid_bob").await.unwrap());
        assert!(!dalle.check("wxid_bob").await.unwrap());
        assert_eq!(dalle.topic(), "dalle");
    }

    #[test]
    fn test_no_master_configured() {
        let m = AccessManager::new("gpt", Store::memory(), backend(), None);
        assert!(!m.is_master(""));
        assert!(!m.is_master(MASTER));
        let allowed = tokio_test::block_on(m.check(MASTER));
        assert!(!tokio_test::assert_ok!(allowed));
    }
}
