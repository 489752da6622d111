//! The boundary a concrete chat platform must satisfy.
//!
//! The shapes mirror OneBot 12 as implemented by ComWeChat.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::client::Subscriber;
use crate::error::BackendResult;
use crate::message::{Message, Target};

/// The bridge's own platform identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfInfo {
    #[serde(rename = "user_id")]
    pub id: String,
    #[serde(rename = "user_name")]
    pub name: String,
}

/// A contact, either a friend or a group member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub user_displayname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_remark: Option<String>,
    #[serde(rename = "wx.avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl FriendInfo {
    /// Returns the best human-readable name: remark, display name, then
    /// account name.
    pub fn display_name(&self) -> &str {
        self.user_remark
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| Some(self.user_displayname.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(&self.user_name)
    }
}

/// A group chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: String,
    #[serde(rename = "wx.avatar", default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// A file to hand to the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileDescriptor {
    /// Downloaded by the platform from a URL.
    Url {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        headers: Option<HashMap<String, String>>,
    },
    /// A path on the platform host.
    Path {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Inline base64 content.
    Data {
        data: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl FileDescriptor {
    pub fn url(url: impl Into<String>, name: impl Into<String>) -> Self {
        FileDescriptor::Url {
            url: url.into(),
            name: Some(name.into()),
            headers: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            FileDescriptor::Url { name, .. }
            | FileDescriptor::Path { name, .. }
            | FileDescriptor::Data { name, .. } => name.as_deref(),
        }
    }
}

/// A connected chat platform.
///
/// Exactly one backend is active per process.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// The bridge's own identity. Fails with
    /// [`BackendError::NotStarted`](crate::BackendError::NotStarted) before
    /// a successful `start`.
    fn self_info(&self) -> BackendResult<SelfInfo>;

    /// Connects and logs in. May wait indefinitely for the platform.
    async fn start(&self) -> BackendResult<()>;

    async fn stop(&self) -> BackendResult<()>;

    /// Registers the single inbound message callback.
    fn subscribe(&self, subscriber: Subscriber);

    /// Sends a message, returning whether the platform accepted it.
    async fn send(&self, message: &Message, target: &Target) -> BackendResult<bool>;

    async fn get_friends(&self, with_avatar: bool) -> BackendResult<Vec<FriendInfo>>;

    async fn get_groups(&self, with_avatar: bool) -> BackendResult<Vec<GroupInfo>>;

    /// Maps member user id to display name.
    async fn get_group_members(&self, group_id: &str) -> BackendResult<HashMap<String, String>>;

    /// Looks up a single contact, within a group if `group_id` is set.
    async fn get_friend(&self, user_id: &str, group_id: Option<&str>)
    -> BackendResult<FriendInfo>;

    /// Uploads a file, returning the platform file id.
    async fn upload_file(&self, file: FileDescriptor) -> BackendResult<String>;

    /// Resolves the image of a message to a URL or data URI.
    async fn download_image(&self, message_id: &str) -> BackendResult<String>;
}

/// Type alias for a shared, type-erased backend.
pub type BoxedBackend = Arc<dyn Backend>;
