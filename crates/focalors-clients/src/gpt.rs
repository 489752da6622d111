//! Conversational replies from a chat completion model.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::{debug, error, warn};

use focalors_core::{
    BoxedBackend, Client, ClientError, ClientResult, Message, Outbox, Target, strip_mentions,
};
use focalors_framework::AccessManager;
use focalors_store::Store;

use crate::providers::{AzureChat, ChatTurn, SharedChat};
use crate::settings::OpenAiSettings;
use crate::util::{get_prompt, truncate_chars};

fn history_key(conversation: &str) -> String {
    format!("client:gpt:history:{conversation}")
}

/// Answers prompts with a chat completion.
///
/// In a group the bot answers when mentioned, replied to, or addressed with
/// the command prefix. In private chat it answers any text except other
/// handlers' commands.
pub struct GptClient {
    settings: OpenAiSettings,
    backend: BoxedBackend,
    access: Arc<AccessManager>,
    store: Store,
    chat: Option<SharedChat>,
    history_writes: AtomicUsize,
    outbox: Outbox,
}

impl GptClient {
    pub const TOPIC: &'static str = "gpt";

    pub fn new(
        settings: OpenAiSettings,
        backend: BoxedBackend,
        access: Arc<AccessManager>,
        store: Store,
    ) -> Self {
        let chat = AzureChat::from_settings(&settings).map(|c| Arc::new(c) as SharedChat);
        Self {
            settings,
            backend,
            access,
            store,
            chat,
            history_writes: AtomicUsize::new(0),
            outbox: Outbox::new(),
        }
    }

    /// Replaces the completion provider.
    pub fn with_provider(mut self, chat: SharedChat) -> Self {
        self.chat = Some(chat);
        self
    }

    fn has_prefix(&self, text: &str) -> bool {
        let prefix = self.settings.command_prefix.as_str();
        !prefix.is_empty() && text.trim_start().starts_with(prefix)
    }

    fn is_triggered(&self, message: &Message, target: &Target, self_id: &str) -> bool {
        let text = message.first_text().unwrap_or_default();
        if self.has_prefix(text) {
            return true;
        }
        if target.is_group() {
            message.mentions(self_id) || message.reply().is_some_and(|r| r.user_id == self_id)
        } else {
            let text = text.trim_start();
            !(text.starts_with('/') || text.starts_with('#'))
        }
    }

    fn prompt(&self, message: &Message) -> Option<String> {
        let prompt = get_prompt(message, None)?;
        let prefix = self.settings.command_prefix.as_str();
        let prompt = match prompt.strip_prefix(prefix) {
            Some(rest) if !prefix.is_empty() => rest.trim(),
            _ => prompt.as_str(),
        };
        let length = prompt.chars().count();
        if prompt.is_empty() || length > self.settings.token_limit {
            debug!(length, "Prompt rejected");
            return None;
        }
        Some(prompt.to_string())
    }

    /// Collects image URLs for the images in the message and a replied-to
    /// image. Failed downloads are skipped.
    async fn images(&self, message: &Message) -> Vec<String> {
        let mut ids: Vec<&str> = message.images().collect();
        if let Some(reply) = message.reply()
            && !reply.message_content.is_string()
        {
            ids.push(&reply.message_id);
        }

        let mut urls = Vec::with_capacity(ids.len());
        for id in ids {
            match self.backend.download_image(id).await {
                Ok(url) => urls.push(url),
                Err(e) => warn!(id, error = %e, "Failed to download image"),
            }
        }
        urls
    }

    async fn history(&self, key: &str) -> Vec<ChatTurn> {
        let limit = self.settings.history_length;
        if limit == 0 {
            return Vec::new();
        }
        match self.store.lrange::<ChatTurn>(key, 0, limit as isize - 1).await {
            Ok(mut turns) => {
                turns.reverse();
                turns
            }
            Err(e) => {
                warn!(error = %e, "Failed to load chat history");
                Vec::new()
            }
        }
    }

    async fn remember(&self, key: &str, turn: &ChatTurn) {
        if let Err(e) = self.store.lpush(key, turn).await {
            warn!(error = %e, "Failed to record chat history");
            return;
        }
        let writes = self.history_writes.fetch_add(1, Ordering::Relaxed) + 1;
        let every = self.settings.history_trim_every.max(1);
        if writes % every == 0 {
            let stop = self.settings.history_length as isize - 1;
            if let Err(e) = self.store.ltrim(key, 0, stop).await {
                warn!(error = %e, "Failed to trim chat history");
            }
        }
    }
}

#[async_trait]
impl Client for GptClient {
    fn name(&self) -> &'static str {
        "gpt"
    }

    async fn start(&self) -> ClientResult<()> {
        if self.settings.endpoint().is_none() {
            return Err(ClientError::MissingConfig { field: "openai.endpoint" });
        }
        if self.settings.api_key().is_none() || self.chat.is_none() {
            return Err(ClientError::MissingConfig { field: "openai.api_key" });
        }
        Ok(())
    }

    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
        if let Some(out) = self.access.manage(message, target.user_id()).await? {
            self.outbox.send_text(out, target);
            return Ok(true);
        }
        if !self.access.check(target.conversation_id()).await? {
            return Ok(false);
        }

        let self_id = self.backend.self_info()?.id;
        if !self.is_triggered(message, target, &self_id) {
            debug!(%target, "Not addressed, skipping");
            return Ok(false);
        }
        let Some(prompt) = self.prompt(message) else {
            return Ok(false);
        };
        let Some(chat) = self.chat.as_ref() else {
            return Err(ClientError::MissingConfig { field: "openai.api_key" });
        };

        let key = history_key(target.conversation_id());
        let mut turns = Vec::new();
        if let Some(context) = message.reply().and_then(|r| r.message_content.as_str()) {
            let context = strip_mentions(context);
            turns.push(ChatTurn::assistant(truncate_chars(
                context.trim(),
                self.settings.token_limit,
            )));
        }
        turns.extend(self.history(&key).await);
        let user_turn = ChatTurn::user(prompt);
        turns.push(user_turn.clone().with_images(self.images(message).await));

        match chat.complete(turns, self.settings.max_tokens).await {
            Ok(answer) => {
                let answer = answer.unwrap_or_default();
                self.outbox.send_text(answer.clone(), target);
                self.remember(&key, &user_turn).await;
                self.remember(&key, &ChatTurn::assistant(answer)).await;
                debug!(%target, "Completion processed");
            }
            Err(e) => {
                error!(error = %e, "Completion failed");
                self.outbox.send_text(format!("🚫 糟糕, 接口出错啦! {e}"), target);
            }
        }
        Ok(true)
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ChatRole, ChatProvider, ProviderError, ProviderResult};
    use crate::test_support::{settle, wire};
    use focalors_core::Segment;
    use focalors_framework::AccessManagerFactory;
    use focalors_framework::testing::MockBackend;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeChat {
        calls: Mutex<Vec<Vec<ChatTurn>>>,
        fail: bool,
    }

    #[async_trait]
    impl ChatProvider for FakeChat {
        async fn complete(&self, turns: Vec<ChatTurn>, _max_tokens: u32) -> ProviderResult<Option<String>> {
            let n = {
                let mut calls = self.calls.lock();
                calls.push(turns);
                calls.len()
            };
            if self.fail {
                return Err(ProviderError::Api {
                    status: 429,
                    code: Some("RateLimit".into()),
                    message: "slow down".into(),
                });
            }
            Ok(Some(format!("answer {n}")))
        }
    }

    fn settings() -> OpenAiSettings {
        OpenAiSettings {
            endpoint: Some("https://example.openai.azure.com".into()),
            api_key: Some("key".into()),
            deployment: Some("gpt-4".into()),
            ..Default::default()
        }
    }

    struct Fixture {
        backend: Arc<MockBackend>,
        store: Store,
        chat: Arc<FakeChat>,
        client: GptClient,
    }

    async fn fixture(settings: OpenAiSettings, fail: bool) -> Fixture {
        let backend = MockBackend::with_self("bot", "Bot");
        backend.mark_started();
        let store = Store::memory();
        let factory = AccessManagerFactory::new(store.clone(), backend.clone(), Some("boss".into()));
        let chat = Arc::new(FakeChat {
            fail,
            ..Default::default()
        });
        let client = GptClient::new(settings, backend.clone(), factory.make(GptClient::TOPIC), store.clone())
            .with_provider(chat.clone());
        wire(&client, &backend);
        store
            .sadd("admin:access:gpt:allowed", &["g1", "alice"])
            .await
            .unwrap();
        Fixture {
            backend,
            store,
            chat,
            client,
        }
    }

    fn group(user: &str) -> Target {
        Target::group_member("g1", user).unwrap()
    }

    #[tokio::test]
    async fn test_group_requires_mention() {
        let f = fixture(settings(), false).await;
        assert!(!f.client.receive(&Message::from("hello"), &group("u")).await.unwrap());

        let mentioned = Message::new().mention("bot").text("@Bot hello");
        assert!(f.client.receive(&mentioned, &group("u")).await.unwrap());
        settle().await;

        assert_eq!(f.chat.calls.lock().len(), 1);
        assert_eq!(f.chat.calls.lock()[0].last().unwrap().text, "hello");
        assert_eq!(f.backend.sent_texts(), vec!["answer 1"]);
    }

    #[tokio::test]
    async fn test_group_reply_to_self_prepends_context() {
        let f = fixture(settings(), false).await;
        let message = Message::from_segments(vec![
            Segment::reply("bot", "m1", serde_json::json!("@Bot earlier answer")),
            Segment::text("why?"),
        ]);
        assert!(f.client.receive(&message, &group("u")).await.unwrap());

        let calls = f.chat.calls.lock();
        assert_eq!(calls[0].len(), 2);
        assert_eq!(calls[0][0], ChatTurn::assistant("earlier answer"));
        assert_eq!(calls[0][1].text, "why?");
    }

    #[tokio::test]
    async fn test_private_prefix_and_foreign_commands() {
        let f = fixture(settings(), false).await;
        let alice = Target::private("alice");

        assert!(!f.client.receive(&Message::from("/img a cat"), &alice).await.unwrap());
        assert!(!f.client.receive(&Message::from("# 煎蛋"), &alice).await.unwrap());
        assert!(f.client.receive(&Message::from("/gpt tell a joke"), &alice).await.unwrap());
        assert!(f.client.receive(&Message::from("plain question"), &alice).await.unwrap());

        let calls = f.chat.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].last().unwrap().text, "tell a joke");
    }

    #[tokio::test]
    async fn test_denied_and_invalid_prompts() {
        let f = fixture(settings(), false).await;
        assert!(!f.client.receive(&Message::from("hi"), &Target::private("stranger")).await.unwrap());
        assert!(!f.client.receive(&Message::from("/gpt   "), &Target::private("alice")).await.unwrap());

        let long = "x".repeat(101);
        assert!(!f.client.receive(&Message::from(long), &Target::private("alice")).await.unwrap());
        assert!(f.chat.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_replayed_and_trimmed() {
        let f = fixture(
            OpenAiSettings {
                history_length: 2,
                history_trim_every: 1,
                ..settings()
            },
            false,
        )
        .await;
        let alice = Target::private("alice");

        f.client.receive(&Message::from("q1"), &alice).await.unwrap();
        f.client.receive(&Message::from("q2"), &alice).await.unwrap();

        let calls = f.chat.calls.lock();
        let second: Vec<_> = calls[1].iter().map(|t| (t.role, t.text.as_str())).collect();
        assert_eq!(
            second,
            vec![
                (ChatRole::User, "q1"),
                (ChatRole::Assistant, "answer 1"),
                (ChatRole::User, "q2"),
            ]
        );
        drop(calls);

        let stored: Vec<ChatTurn> = f.store.lrange("client:gpt:history:alice", 0, -1).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], ChatTurn::assistant("answer 2"));
    }

    #[tokio::test]
    async fn test_images_are_forwarded() {
        let f = fixture(settings(), false).await;
        let message = Message::from_segments(vec![Segment::text("what is this"), Segment::image("f1")]);
        f.client.receive(&message, &Target::private("alice")).await.unwrap();

        let calls = f.chat.calls.lock();
        assert_eq!(calls[0][0].images, vec!["https://img.example/f1.png".to_string()]);
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let f = fixture(settings(), true).await;
        assert!(f.client.receive(&Message::from("hi"), &Target::private("alice")).await.unwrap());
        settle().await;

        let texts = f.backend.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].starts_with("🚫 糟糕, 接口出错啦!"));
        let stored: Vec<ChatTurn> = f.store.lrange("client:gpt:history:alice", 0, -1).await.unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_start_requires_credentials() {
        let f = fixture(settings(), false).await;
        assert!(f.client.start().await.is_ok());

        let backend = MockBackend::new();
        let factory = AccessManagerFactory::new(Store::memory(), backend.clone(), None);
        let bare = GptClient::new(
            OpenAiSettings::default(),
            backend,
            factory.make(GptClient::TOPIC),
            Store::memory(),
        );
        assert!(matches!(
            bare.start().await,
            Err(ClientError::MissingConfig { field: "openai.endpoint" })
        ));
    }
}
