//! The normalized message protocol.
//!
//! Every message that crosses the bridge is a [`Message`]: an ordered list of
//! [`Segment`]s shaped after OneBot 12 (ComWeChat flavour). Where it came from
//! or where it goes is a [`Target`].
//!
//! # Example
//!
//! ```rust,ignore
//! use focalors_core::{Message, Segment, Target};
//!
//! let msg = Message::new().text("hello ").mention("wxid_abc");
//! let to = Target::group_member("123@chatroom", "wxid_abc")?;
//! ```

use std::fmt::Display;
use std::ops::Deref;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

// ============================================================================
// Segment
// ============================================================================

/// One typed unit of a chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Segment {
    /// Plain text.
    Text(TextData),
    /// Mention of a user.
    Mention(MentionData),
    /// Image, referenced by a platform file id.
    Image(FileData),
    /// Quote of an earlier message.
    Reply(ReplyData),
    /// WeChat sticker.
    #[serde(rename = "wx.emoji")]
    WxEmoji(FileData),
    /// Official-account style link card.
    Card(CardData),
}

impl Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Text(data) => write!(f, "{}", data.text),
            Segment::Mention(data) => write!(f, "@{}", data.user_id),
            Segment::Image(data) => write!(f, "[图片:{}]", data.file_id),
            Segment::Reply(data) => write!(f, "[回复:{}]", data.message_id),
            Segment::WxEmoji(data) => write!(f, "[表情:{}]", data.file_id),
            Segment::Card(data) => write!(f, "[卡片:{}]", data.title),
        }
    }
}

impl Segment {
    /// Creates a text segment.
    pub fn text(text: impl Into<String>) -> Self {
        Segment::Text(TextData { text: text.into() })
    }

    /// Creates a mention segment.
    pub fn mention(user_id: impl Into<String>) -> Self {
        Segment::Mention(MentionData {
            user_id: user_id.into(),
        })
    }

    /// Creates an image segment from an uploaded file id.
    pub fn image(file_id: impl Into<String>) -> Self {
        Segment::Image(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a sticker segment from an uploaded file id.
    pub fn wx_emoji(file_id: impl Into<String>) -> Self {
        Segment::WxEmoji(FileData {
            file_id: file_id.into(),
        })
    }

    /// Creates a reply segment.
    pub fn reply(
        user_id: impl Into<String>,
        message_id: impl Into<String>,
        message_content: serde_json::Value,
    ) -> Self {
        Segment::Reply(ReplyData {
            user_id: user_id.into(),
            message_id: message_id.into(),
            message_content,
        })
    }

    /// Creates a card segment.
    pub fn card(card: CardData) -> Self {
        Segment::Card(card)
    }

    /// Returns the wire type name of this segment.
    pub fn segment_type(&self) -> &'static str {
        match self {
            Segment::Text(_) => "text",
            Segment::Mention(_) => "mention",
            Segment::Image(_) => "image",
            Segment::Reply(_) => "reply",
            Segment::WxEmoji(_) => "wx.emoji",
            Segment::Card(_) => "card",
        }
    }

    /// Returns the text if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Segment::Text(data) => Some(&data.text),
            _ => None,
        }
    }
}

/// Text segment data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
}

/// Mention segment data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionData {
    pub user_id: String,
}

/// Data of segments that point at an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileData {
    pub file_id: String,
}

/// Reply segment data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyData {
    /// Author of the quoted message.
    pub user_id: String,
    /// Id of the quoted message.
    pub message_id: String,
    /// Platform-specific content of the quoted message. Plain text quotes
    /// arrive as a JSON string.
    #[serde(default)]
    pub message_content: serde_json::Value,
}

/// Card segment data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub account: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    pub url: String,
    pub thumburl: String,
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of segments.
///
/// Ordering is meaningful: clients render segments in sequence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub const fn new() -> Self {
        Self {
            segments: Vec::new(),
        }
    }

    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Appends a segment (builder style).
    pub fn push(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    pub fn text(self, text: impl Into<String>) -> Self {
        self.push(Segment::text(text))
    }

    pub fn mention(self, user_id: impl Into<String>) -> Self {
        self.push(Segment::mention(user_id))
    }

    pub fn image(self, file_id: impl Into<String>) -> Self {
        self.push(Segment::image(file_id))
    }

    pub fn wx_emoji(self, file_id: impl Into<String>) -> Self {
        self.push(Segment::wx_emoji(file_id))
    }

    pub fn card(self, card: CardData) -> Self {
        self.push(Segment::card(card))
    }

    /// Returns the first text segment's content.
    pub fn first_text(&self) -> Option<&str> {
        self.iter().find_map(Segment::as_text)
    }

    /// Concatenates all text segments, ignoring everything else.
    pub fn extract_plain_text(&self) -> String {
        self.iter().filter_map(Segment::as_text).collect()
    }

    /// Returns true if any mention segment names `user_id`.
    pub fn mentions(&self, user_id: &str) -> bool {
        self.iter()
            .any(|seg| matches!(seg, Segment::Mention(m) if m.user_id == user_id))
    }

    /// Returns the first reply segment.
    pub fn reply(&self) -> Option<&ReplyData> {
        self.iter().find_map(|seg| match seg {
            Segment::Reply(data) => Some(data),
            _ => None,
        })
    }

    /// Returns the file ids of all image segments, in order.
    pub fn images(&self) -> impl Iterator<Item = &str> {
        self.iter().filter_map(|seg| match seg {
            Segment::Image(data) => Some(data.file_id.as_str()),
            _ => None,
        })
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }
}

impl Deref for Message {
    type Target = [Segment];

    fn deref(&self) -> &Self::Target {
        &self.segments
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self::from_segments(vec![segment])
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Segment::text(text).into()
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Segment::text(text).into()
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self::from_segments(iter.into_iter().collect())
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for seg in self.iter() {
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Target
// ============================================================================

/// Where a message comes from or goes to.
///
/// Serializes to the OneBot 12 addressing shape, e.g.
/// `{"detail_type":"group","group_id":"1@chatroom","user_id":"wxid_a"}`.
///
/// Deserialization applies the same group id check as [`Target::group`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(
    tag = "detail_type",
    rename_all = "snake_case",
    try_from = "TargetRepr"
)]
pub enum Target {
    /// A private chat with one user.
    Private { user_id: String },
    /// A group chat, optionally naming the member involved.
    Group {
        group_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
    },
}

/// Unchecked wire shape of [`Target`].
#[derive(Deserialize)]
#[serde(tag = "detail_type", rename_all = "snake_case")]
enum TargetRepr {
    Private {
        user_id: String,
    },
    Group {
        group_id: String,
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl TryFrom<TargetRepr> for Target {
    type Error = CoreError;

    fn try_from(value: TargetRepr) -> Result<Self, Self::Error> {
        match value {
            TargetRepr::Private { user_id } => Ok(Target::Private { user_id }),
            TargetRepr::Group { group_id, user_id } => Target::build_group(group_id, user_id),
        }
    }
}

impl Target {
    pub fn private(user_id: impl Into<String>) -> Self {
        Target::Private {
            user_id: user_id.into(),
        }
    }

    /// Creates a group target. Fails on an empty group id.
    pub fn group(group_id: impl Into<String>) -> CoreResult<Self> {
        Self::build_group(group_id.into(), None)
    }

    /// Creates a group target naming a member. Fails on an empty group id.
    pub fn group_member(
        group_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> CoreResult<Self> {
        Self::build_group(group_id.into(), Some(user_id.into()))
    }

    fn build_group(group_id: String, user_id: Option<String>) -> CoreResult<Self> {
        if group_id.is_empty() {
            return Err(CoreError::InvalidTarget {
                reason: "group target requires a non-empty group id".into(),
            });
        }
        Ok(Target::Group { group_id, user_id })
    }

    pub fn is_group(&self) -> bool {
        matches!(self, Target::Group { .. })
    }

    /// Returns the group id for groups and the user id for private chats.
    pub fn conversation_id(&self) -> &str {
        match self {
            Target::Private { user_id } => user_id,
            Target::Group { group_id, .. } => group_id,
        }
    }

    pub fn group_id(&self) -> Option<&str> {
        match self {
            Target::Group { group_id, .. } => Some(group_id),
            Target::Private { .. } => None,
        }
    }

    /// Returns the user involved, if known.
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Target::Private { user_id } => Some(user_id),
            Target::Group { user_id, .. } => user_id.as_deref(),
        }
    }

    /// Returns the same conversation without the member, so replies go to
    /// the whole group.
    pub fn conversation(&self) -> Target {
        match self {
            Target::Private { .. } => self.clone(),
            Target::Group { group_id, .. } => Target::Group {
                group_id: group_id.clone(),
                user_id: None,
            },
        }
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Private { user_id } => write!(f, "{user_id}"),
            Target::Group {
                group_id,
                user_id: Some(user_id),
            } => write!(f, "{group_id}/{user_id}"),
            Target::Group { group_id, .. } => write!(f, "{group_id}"),
        }
    }
}

/// The uniform `{group_id?, user_id?}` shape of a [`Target`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ExpandedTarget {
    pub group_id: Option<String>,
    pub user_id: Option<String>,
}

impl TryFrom<ExpandedTarget> for Target {
    type Error = CoreError;

    fn try_from(value: ExpandedTarget) -> Result<Self, Self::Error> {
        match value {
            ExpandedTarget {
                group_id: Some(group_id),
                user_id,
            } => Target::build_group(group_id, user_id),
            ExpandedTarget {
                group_id: None,
                user_id: Some(user_id),
            } => Ok(Target::private(user_id)),
            ExpandedTarget {
                group_id: None,
                user_id: None,
            } => Err(CoreError::InvalidTarget {
                reason: "neither group id nor user id is set".into(),
            }),
        }
    }
}

/// Normalization into [`ExpandedTarget`].
///
/// Implemented for both shapes so expansion can be applied repeatedly.
pub trait Expand {
    fn expand(&self) -> ExpandedTarget;
}

impl Expand for Target {
    fn expand(&self) -> ExpandedTarget {
        match self {
            Target::Private { user_id } => ExpandedTarget {
                group_id: None,
                user_id: Some(user_id.clone()),
            },
            Target::Group { group_id, user_id } => ExpandedTarget {
                group_id: Some(group_id.clone()),
                user_id: user_id.clone(),
            },
        }
    }
}

impl Expand for ExpandedTarget {
    fn expand(&self) -> ExpandedTarget {
        self.clone()
    }
}

/// Expands any target shape into `{group_id?, user_id?}`.
pub fn expand_target<T: Expand + ?Sized>(target: &T) -> ExpandedTarget {
    target.expand()
}

// ============================================================================
// Helpers
// ============================================================================

static MENTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@\S+").expect("mention pattern is valid"));

/// Applies `pattern` to the first text segment.
///
/// Returns `None` when there is no text segment or it does not match; later
/// text segments are never consulted.
pub fn match_pattern<'a>(segments: &'a [Segment], pattern: &Regex) -> Option<Captures<'a>> {
    let text = segments.iter().find_map(Segment::as_text)?;
    pattern.captures(text)
}

/// Removes `@name` tokens that WeChat inlines into group text.
pub fn strip_mentions(text: &str) -> String {
    MENTION_TOKEN
        .replace_all(text, "")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
