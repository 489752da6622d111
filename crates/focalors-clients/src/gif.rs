//! Meme gifs from sorry.xuty.cc templates.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, error};
use uuid::Uuid;

use focalors_core::{
    BoxedBackend, Client, ClientError, ClientResult, FileDescriptor, Message, Outbox, Segment,
    Target, match_pattern,
};

use crate::providers::{SharedGifMaker, SorryGifMaker};

const USAGE: &str =
    "Usage: /gif <name> <line1>,<line2>,...\nPS: get <name> from: https://sorry.xuty.cc/<name>";

static MAKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/gif\s*(\w+)\s+(.*)\s*$").expect("gif pattern is valid"));
static ANY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/gif").expect("gif prefix pattern is valid"));
static GIF_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*"(.*\.gif)""#).expect("gif link pattern is valid"));

/// `/gif <name> <line1>,<line2>,...`. Open to everyone.
pub struct GifClient {
    backend: BoxedBackend,
    maker: SharedGifMaker,
    outbox: Outbox,
}

impl GifClient {
    pub fn new(backend: BoxedBackend) -> ClientResult<Self> {
        let maker = SorryGifMaker::new().map_err(|e| ClientError::Upstream(e.to_string()))?;
        Ok(Self::with_maker(backend, Arc::new(maker)))
    }

    pub fn with_maker(backend: BoxedBackend, maker: SharedGifMaker) -> Self {
        Self {
            backend,
            maker,
            outbox: Outbox::new(),
        }
    }

    async fn make(&self, name: &str, lines: &str, target: &Target) {
        let lines: Vec<String> = lines.split(',').map(str::to_string).collect();
        let page = match self.maker.make(name, &lines).await {
            Ok(page) => page,
            Err(e) => {
                error!(name, error = %e, "Failed to make gif");
                self.outbox.send_text("糟糕，生成失败", target);
                return;
            }
        };

        let Some(link) = GIF_LINK.captures(&page).map(|caps| caps[1].to_string()) else {
            debug!(name, "No gif in response");
            self.outbox.send_text(USAGE, target);
            return;
        };
        let url = format!(
            "{}/{}",
            self.maker.base_url().trim_end_matches('/'),
            link.trim_start_matches('/')
        );
        let file = FileDescriptor::url(url, format!("{}.gif", Uuid::new_v4()));
        match self.backend.upload_file(file).await {
            Ok(file_id) => self.outbox.send(Segment::image(file_id), target),
            Err(e) => {
                error!(name, error = %e, "Failed to upload gif");
                self.outbox.send_text("糟糕，生成失败", target);
            }
        }
    }
}

#[async_trait]
impl Client for GifClient {
    fn name(&self) -> &'static str {
        "gif"
    }

    async fn receive(&self, message: &Message, target: &Target) -> ClientResult<bool> {
        if let Some(caps) = match_pattern(message, &MAKE) {
            self.make(&caps[1], caps[2].trim_end(), target).await;
            return Ok(true);
        }
        if match_pattern(message, &ANY).is_some() {
            self.outbox.send_text(USAGE, target);
            return Ok(true);
        }
        Ok(false)
    }

    fn outbox(&self) -> &Outbox {
        &self.outbox
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{GifMaker, ProviderResult};
    use crate::test_support::{settle, wire};
    use focalors_framework::testing::MockBackend;
    use parking_lot::Mutex;

    struct FakeMaker {
        page: String,
        calls: Mutex<Vec<(String, Vec<String>)>>,
    }

    #[async_trait]
    impl GifMaker for FakeMaker {
        async fn make(&self, name: &str, lines: &[String]) -> ProviderResult<String> {
            self.calls.lock().push((name.to_string(), lines.to_vec()));
            Ok(self.page.clone())
        }

        fn base_url(&self) -> &str {
            "https://sorry.xuty.cc"
        }
    }

    fn fixture(page: &str) -> (Arc<MockBackend>, Arc<FakeMaker>, GifClient) {
        let backend = MockBackend::new();
        let maker = Arc::new(FakeMaker {
            page: page.to_string(),
            calls: Mutex::new(Vec::new()),
        });
        let client = GifClient::with_maker(backend.clone(), maker.clone());
        wire(&client, &backend);
        (backend, maker, client)
    }

    #[tokio::test]
    async fn test_make_uploads_gif() {
        let page = r#"<p><a href="/cache/edcbe646.gif" target="_blank"><p>点击下载</p></a></p>"#;
        let (backend, maker, client) = fixture(page);
        let handled = client
            .receive(&Message::from("/gif wangjingze 我就是饿死,也不吃"), &Target::private("u"))
            .await
            .unwrap();
        assert!(handled);
        settle().await;

        let calls = maker.calls.lock();
        assert_eq!(calls[0].0, "wangjingze");
        assert_eq!(calls[0].1, vec!["我就是饿死", "也不吃"]);

        let uploads = backend.uploads();
        assert!(matches!(
            &uploads[0],
            FileDescriptor::Url { url, .. } if url == "https://sorry.xuty.cc/cache/edcbe646.gif"
        ));
        assert!(matches!(backend.sent()[0].0.first(), Some(Segment::Image(_))));
    }

    #[tokio::test]
    async fn test_usage() {
        let (backend, maker, client) = fixture("<html>not found</html>");
        let target = Target::private("u");
        assert!(client.receive(&Message::from("/gif"), &target).await.unwrap());
        assert!(client.receive(&Message::from("/gif sorry a,b"), &target).await.unwrap());
        assert!(!client.receive(&Message::from("gif sorry"), &target).await.unwrap());
        settle().await;

        assert_eq!(maker.calls.lock().len(), 1);
        assert_eq!(backend.sent_texts(), vec![USAGE, USAGE]);
    }
}
