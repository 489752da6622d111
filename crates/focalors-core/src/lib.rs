//! # Focalors Core
//!
//! The contracts at the heart of the Focalors chat bridge.
//!
//! ```text
//! ┌─────────────┐  (Message, Target)  ┌─────────┐  receive  ┌──────────┐
//! │   Backend   │────────────────────▶│ Program │──────────▶│  Client  │
//! │  (OneBot)   │◀────────────────────│         │◀──────────│ (Outbox) │
//! └─────────────┘        send         └─────────┘   emit    └──────────┘
//! ```
//!
//! - [`message`]: [`Segment`], [`Message`], [`Target`] and the pure helpers
//!   [`match_pattern`] and [`expand_target`].
//! - [`client`]: the [`Client`] trait every feature handler implements and
//!   the [`Outbox`] it emits through.
//! - [`backend`]: the [`Backend`] trait a chat platform implements.
//! - [`error`]: shared error types.
//!
//! Handlers never talk to each other or to the backend's inbound stream;
//! the dispatcher in `focalors-framework` connects everything.

pub mod backend;
pub mod client;
pub mod error;
pub mod message;

pub use backend::{Backend, BoxedBackend, FileDescriptor, FriendInfo, GroupInfo, SelfInfo};
pub use client::{BoxedClient, Client, Outbox, Subscriber, subscriber};
pub use error::{
    BackendError, BackendResult, ClientError, ClientResult, CoreError, CoreResult,
};
pub use message::{
    CardData, Expand, ExpandedTarget, FileData, Message, MentionData, ReplyData, Segment,
    Target, TextData, expand_target, match_pattern, strip_mentions,
};

// Re-export so downstream crates name the same types.
pub use async_trait::async_trait;
pub use regex;
