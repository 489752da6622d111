//! Test doubles for code built on the framework.
//!
//! [`MockBackend`] is an in-process [`Backend`] that records every outbound
//! call and serves canned contacts. Inbound traffic is simulated with
//! [`MockBackend::emit`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use focalors_core::{
    Backend, BackendError, BackendResult, FileDescriptor, FriendInfo, GroupInfo, Message,
    SelfInfo, Subscriber, Target,
};

/// A recording backend for tests.
pub struct MockBackend {
    self_info: SelfInfo,
    started: AtomicBool,
    fail_stop: AtomicBool,
    friends: Mutex<Vec<FriendInfo>>,
    groups: Mutex<Vec<GroupInfo>>,
    members: Mutex<HashMap<String, HashMap<String, String>>>,
    subscriber: Mutex<Option<Subscriber>>,
    sent: Mutex<Vec<(Message, Target)>>,
    uploads: Mutex<Vec<FileDescriptor>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    list_calls: AtomicUsize,
}

impl MockBackend {
    /// Creates a backend whose own id is `bot`.
    pub fn new() -> Arc<Self> {
        Self::with_self("bot", "Bot")
    }

    pub fn with_self(id: &str, name: &str) -> Arc<Self> {
        Arc::new(Self {
            self_info: SelfInfo {
                id: id.to_string(),
                name: name.to_string(),
            },
            started: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
            friends: Mutex::new(Vec::new()),
            groups: Mutex::new(Vec::new()),
            members: Mutex::new(HashMap::new()),
            subscriber: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            start_calls: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            list_calls: AtomicUsize::new(0),
        })
    }

    /// Marks the backend as started without calling `start`.
    pub fn mark_started(&self) {
        self.started.store(true, Ordering::SeqCst);
    }

    pub fn add_friend(&self, user_id: &str, user_name: &str) {
        self.friends.lock().push(FriendInfo {
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            user_displayname: String::new(),
            user_remark: None,
            avatar: None,
        });
    }

    pub fn add_group(&self, group_id: &str, group_name: &str) {
        self.groups.lock().push(GroupInfo {
            group_id: group_id.to_string(),
            group_name: group_name.to_string(),
            avatar: None,
        });
    }

    pub fn add_member(&self, group_id: &str, user_id: &str, display_name: &str) {
        self.members
            .lock()
            .entry(group_id.to_string())
            .or_default()
            .insert(user_id.to_string(), display_name.to_string());
    }

    /// Makes every later `stop` call fail.
    pub fn fail_stop(&self) {
        self.fail_stop.store(true, Ordering::SeqCst);
    }

    /// Feeds an inbound message to the subscriber and waits for it.
    ///
    /// Returns false if nothing subscribed.
    pub async fn emit(&self, message: Message, target: Target) -> bool {
        let subscriber = self.subscriber.lock().clone();
        match subscriber {
            Some(sub) => sub(message, target).await,
            None => false,
        }
    }

    /// Returns every message sent so far.
    pub fn sent(&self) -> Vec<(Message, Target)> {
        self.sent.lock().clone()
    }

    /// Returns the plain text of every message sent so far.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .map(|(m, _)| m.extract_plain_text())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn uploads(&self) -> Vec<FileDescriptor> {
        self.uploads.lock().clone()
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// Number of `get_friends` plus `get_groups` calls.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Backend for MockBackend {
    fn self_info(&self) -> BackendResult<SelfInfo> {
        if self.started.load(Ordering::SeqCst) {
            Ok(self.self_info.clone())
        } else {
            Err(BackendError::NotStarted)
        }
    }

    async fn start(&self) -> BackendResult<()> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> BackendResult<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(BackendError::Other("mock stop failure".into()));
        }
        self.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, subscriber: Subscriber) {
        *self.subscriber.lock() = Some(subscriber);
    }

    async fn send(&self, message: &Message, target: &Target) -> BackendResult<bool> {
        self.sent.lock().push((message.clone(), target.clone()));
        Ok(true)
    }

    async fn get_friends(&self, _with_avatar: bool) -> BackendResult<Vec<FriendInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.friends.lock().clone())
    }

    async fn get_groups(&self, _with_avatar: bool) -> BackendResult<Vec<GroupInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.groups.lock().clone())
    }

    async fn get_group_members(&self, group_id: &str) -> BackendResult<HashMap<String, String>> {
        Ok(self
            .members
            .lock()
            .get(group_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_friend(
        &self,
        user_id: &str,
        _group_id: Option<&str>,
    ) -> BackendResult<FriendInfo> {
        self.friends
            .lock()
            .iter()
            .find(|f| f.user_id == user_id)
            .cloned()
            .ok_or_else(|| BackendError::Api {
                retcode: 404,
                message: format!("unknown user {user_id}"),
            })
    }

    async fn upload_file(&self, file: FileDescriptor) -> BackendResult<String> {
        let mut uploads = self.uploads.lock();
        let id = file
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("file-{}", uploads.len()));
        uploads.push(file);
        Ok(id)
    }

    async fn download_image(&self, message_id: &str) -> BackendResult<String> {
        Ok(format!("https://img.example/{message_id}.png"))
    }
}
