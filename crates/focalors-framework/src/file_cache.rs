//! Short-lived record of files the bridge uploaded.
//!
//! When the bot sends an image, the backend keeps the upload descriptor here
//! and links it to the resulting message id. A later request to download the
//! image of that message (e.g. a user replying to it) is then answered
//! locally instead of asking the platform.

use std::time::Duration;

use focalors_core::FileDescriptor;
use focalors_store::{Store, StoreResult};
use uuid::Uuid;

const FILE_TTL: Duration = Duration::from_secs(20 * 60);
const MESSAGE_TTL: Duration = Duration::from_secs(60 * 60);

fn file_key(id: &str) -> String {
    format!("wechat:cache:file:{id}")
}

fn message_key(id: &str) -> String {
    format!("wechat:cache:message:{id}")
}

#[derive(Debug, Clone)]
pub struct FileCache {
    store: Store,
}

impl FileCache {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Records `file` and returns its id.
    ///
    /// The id is the descriptor's name, or a fresh UUID when it has none. An
    /// entry that already exists only has its expiry refreshed.
    pub async fn cache(&self, file: &FileDescriptor) -> StoreResult<String> {
        let id = file
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        self.insert(&id, file).await?;
        Ok(id)
    }

    /// Records `file` under an id chosen by the caller, such as the id the
    /// platform assigned on upload.
    pub async fn insert(&self, id: &str, file: &FileDescriptor) -> StoreResult<()> {
        let key = file_key(id);
        if self.store.exists(&key).await? {
            self.store.expire(&key, FILE_TTL).await?;
        } else {
            self.store.set(&key, file, Some(FILE_TTL)).await?;
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<FileDescriptor>> {
        self.store.get(&file_key(id)).await
    }

    /// Links a sent message to a cached file, keeping both for an hour.
    ///
    /// Returns false if the file is not cached.
    pub async fn link_message(&self, message_id: &str, file_id: &str) -> StoreResult<bool> {
        let key = file_key(file_id);
        if !self.store.exists(&key).await? {
            return Ok(false);
        }
        self.store.expire(&key, MESSAGE_TTL).await?;
        self.store
            .set(&message_key(message_id), file_id, Some(MESSAGE_TTL))
            .await?;
        Ok(true)
    }

    pub async fn get_by_message(&self, message_id: &str) -> StoreResult<Option<FileDescriptor>> {
        match self.store.get::<String>(&message_key(message_id)).await? {
            Some(file_id) => self.get(&file_id).await,
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_uses_name_as_id() {
        let cache = FileCache::new(Store::memory());
        let file = FileDescriptor::url("http://x/a.png", "a.png");
        assert_eq!(cache.cache(&file).await.unwrap(), "a.png");
        assert_eq!(cache.get("a.png").await.unwrap(), Some(file));
    }

    #[tokio::test]
    async fn test_cache_generates_id_without_name() {
        let cache = FileCache::new(Store::memory());
        let file = FileDescriptor::Data {
            data: "AAAA".into(),
            name: None,
        };
        let id = cache.cache(&file).await.unwrap();
        assert!(Uuid::parse_str(&id).is_ok());
        assert_eq!(cache.get(&id).await.unwrap(), Some(file));
    }

    #[tokio::test]
    async fn test_existing_entry_is_kept() {
        let cache = FileCache::new(Store::memory());
        let first = FileDescriptor::url("http://x/1", "same");
        let second = FileDescriptor::url("http://x/2", "same");
        cache.cache(&first).await.unwrap();
        cache.cache(&second).await.unwrap();
        assert_eq!(cache.get("same").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_insert_under_platform_id() {
        let cache = FileCache::new(Store::memory());
        let file = FileDescriptor::url("http://x/a.png", "a.png");
        cache.insert("platform-7", &file).await.unwrap();
        assert_eq!(cache.get("platform-7").await.unwrap(), Some(file));
        assert_eq!(cache.get("a.png").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_link_outlives_file_ttl() {
        let cache = FileCache::new(Store::memory());
        let file = FileDescriptor::url("http://x/a.png", "a.png");
        cache.cache(&file).await.unwrap();

        assert!(!cache.link_message("m0", "unknown").await.unwrap());
        assert!(cache.link_message("m1", "a.png").await.unwrap());

        tokio::time::advance(Duration::from_secs(30 * 60)).await;
        assert_eq!(cache.get_by_message("m1").await.unwrap(), Some(file));

        tokio::time::advance(Duration::from_secs(31 * 60)).await;
        assert_eq!(cache.get_by_message("m1").await.unwrap(), None);
        assert_eq!(cache.get_by_message("m0").await.unwrap(), None);
    }
}
