//! Image generation with `/img`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};
use uuid::Uuid;

use focalors_core::{
    BoxedBackend, Client, ClientError, ClientResult, FileDescriptor, Message, Outbox, Segment,
    Target,
};
use focalors_framework::AccessManager;

use crate::providers::{
    AzureImages, ImageQuality, ImageRequest, ImageStyle, ProviderError, SharedImages,
};
use crate::settings::OpenAiSettings;
use crate::util::get_prompt;

const COMMAND: &str = "/img";

const PREAMBLE: &str = "I NEED to test how the tool works with extremely simple prompts. \
     DO NOT add any detail, just use it AS-IS:";

/// Options parsed from the words in front of the prompt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Keywords {
    quality: ImageQuality,
    style: ImageStyle,
}

/// Splits leading `hd` / `natural` keywords off the prompt.
fn parse_keywords(text: &str) -> (Keywords, String) {
    let mut keywords = Keywords::default();
    let mut words = text.split_whitespace().peekable();
    while let Some(&word) = words.peek() {
        match word {
            "hd" => keywords.quality = ImageQuality::Hd,
            "natural" => keywords.style = ImageStyle::Natural,
            _ => break,
        }
        words.next();
    }
    (keywords, words.collect::<Vec<_>>().join(" "))
}

pub struct DalleClient {
    settings: OpenAiSettings,
    backend: BoxedBackend,
    access: Arc<AccessManager>,
    images: Option<SharedImages>,
    outbox: Outbox,
}

impl DalleClient {
    pub const TOPIC: &'static str = "dalle";

    /// Creates the handler with the Azure provider when credentials are set.
    pub fn new(
        settings: OpenAiSettings,
        backend: BoxedBackend,
        access: Arc<AccessManager>,
    ) -> ClientResult<Self> {
        let images = AzureImages::from_settings(&settings)
            .map_err(|e| ClientError::Upstream(e.to_string()))?
            .map(|p| Arc::new(p) as SharedImages);
        Ok(Self {
            settings,
            backend,
            access,
            images,
            outbox: Outbox::new(),
        })
    }

    pub fn with_provider(mut self, images: SharedImages) -> Self {
        self.images = Some(images);
        self
    }

    async fn draw(&self, images: &SharedImages, text: &str, target: &Target) -> Result<(), ProviderError> {
        let (keywords, prompt) = parse_keywords(text);
        if prompt.is_empty() {
            self.outbox.send_text("给点提示嘛~", target);
            return Ok(());
        }

        self.outbox.send_text("🧑‍🎨 正在作图...", target);
        let request = ImageRequest::new(
            format!("{PREAMBLE}{prompt}"),
            keywords.quality,
            keywords.style,
        );
        debug!(?keywords, %prompt, "Generating image");
        let urls = images.generate(request).await?;

        let mut sent = false;
        for url in urls {
            let file = FileDescriptor::url(url, format!("{}.png", Uuid::new_v4()));
            match self.backend.upload_file(file).await {
                Ok(file_id) => {
                    self.outbox.send(Segment::image(file_id), target);
                    sent = true;
                }
                Err(e) => error!(error = %e, "Failed to upload generated image"),
            }
        }
        if !sent {
            self.outbox.send_text("糟糕，生成失败", target);
        }
        Ok(())
    }
}

#[async_trait]
impl Client for DalleClient {
    fn name(&self) -> &'static str {
        "dalle"
    }

    async fn start(&self) -> ClientResult<()> {
        if self.settings.endpoint().is_none() {
            return Err(ClientError::MissingConfig { field: "openai.endpoint" });
        }
        if self.settings.api_key().is_none() {
            return Err(ClientError::MissingConfig { field: "openai.api_key" });
        }
        if self.images.is_none() {
            return Err(ClientError::MissingConfig { field: "openai.dalle_deployment" });
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

        let Some(text) = get_prompt(message, Some(self.settings.token_limit)) else {
            return Ok(false);
        };
        let Some(rest) = text.strip_prefix(COMMAND) else {
            return Ok(false);
        };
        let Some(images) = self.images.as_ref() else {
            return Err(ClientError::MissingConfig { field: "openai.dalle_deployment" });
        };

        match self.draw(images, rest, target).await {
            Ok(()) => {}
            Err(ProviderError::Api { status, code, message }) => {
                error!(status, ?code, %message, "Image API error");
                self.outbox.send_text(
                    format!("🚫 糟糕, 接口{status}啦! {}", code.unwrap_or_default()),
                    target,
                );
            }
            Err(e) => error!(error = %e, "Image generation failed"),
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
    use crate::providers::{ImageProvider, ProviderResult};
    use crate::test_support::{settle, wire};
    use focalors_framework::AccessManagerFactory;
    use focalors_framework::testing::MockBackend;
    use focalors_store::Store;
    use parking_lot::Mutex;

    struct FakeImages {
        requests: Mutex<Vec<ImageRequest>>,
        result: ProviderResult<Vec<String>>,
    }

    #[async_trait]
    impl ImageProvider for FakeImages {
        async fn generate(&self, request: ImageRequest) -> ProviderResult<Vec<String>> {
            self.requests.lock().push(request);
            self.result.clone()
        }
    }

    fn fixture(result: ProviderResult<Vec<String>>) -> (Arc<MockBackend>, Arc<FakeImages>, DalleClient) {
        let backend = MockBackend::new();
        backend.mark_started();
        let factory = AccessManagerFactory::new(Store::memory(), backend.clone(), Some("boss".into()));
        let images = Arc::new(FakeImages {
            requests: Mutex::new(Vec::new()),
            result,
        });
        let client = DalleClient::new(OpenAiSettings::default(), backend.clone(), factory.make(DalleClient::TOPIC))
            .unwrap()
            .with_provider(images.clone());
        wire(&client, &backend);
        (backend, images, client)
    }

    #[test]
    fn test_parse_keywords() {
        let (keywords, prompt) = parse_keywords(" hd natural a red fox hd");
        assert_eq!(keywords.quality, ImageQuality::Hd);
        assert_eq!(keywords.style, ImageStyle::Natural);
        assert_eq!(prompt, "a red fox hd");

        let (keywords, prompt) = parse_keywords("a cat");
        assert_eq!(keywords, Keywords::default());
        assert_eq!(prompt, "a cat");

        let (_, prompt) = parse_keywords("hd");
        assert!(prompt.is_empty());
    }

    #[tokio::test]
    async fn test_generates_and_uploads() {
        let (backend, images, client) = fixture(Ok(vec!["https://cdn/x.png".into()]));
        let boss = Target::private("boss");
        assert!(client.receive(&Message::from("/img hd a cat"), &boss).await.unwrap());
        settle().await;

        let request = images.requests.lock()[0].clone();
        assert_eq!(request.prompt, format!("{PREAMBLE}a cat"));
        assert_eq!(request.quality, ImageQuality::Hd);
        assert_eq!(request.style, ImageStyle::Vivid);

        assert_eq!(backend.uploads().len(), 1);
        let sent = backend.sent();
        assert_eq!(sent[0].0.extract_plain_text(), "🧑‍🎨 正在作图...");
        assert!(matches!(sent[1].0[0], Segment::Image(_)));
    }

    #[tokio::test]
    async fn test_empty_prompt_asks_for_hint() {
        let (backend, images, client) = fixture(Ok(vec![]));
        assert!(client.receive(&Message::from("/img natural"), &Target::private("boss")).await.unwrap());
        settle().await;
        assert_eq!(backend.sent_texts(), vec!["给点提示嘛~"]);
        assert!(images.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn test_no_result_and_api_error() {
        let (backend, _, client) = fixture(Ok(vec![]));
        client.receive(&Message::from("/img a cat"), &Target::private("boss")).await.unwrap();
        settle().await;
        assert_eq!(backend.sent_texts(), vec!["🧑‍🎨 正在作图...", "糟糕，生成失败"]);

        let (backend, _, client) = fixture(Err(ProviderError::Api {
            status: 400,
            code: Some("content_policy_violation".into()),
            message: "blocked".into(),
        }));
        assert!(client.receive(&Message::from("/img a cat"), &Target::private("boss")).await.unwrap());
        settle().await;
        assert_eq!(
            backend.sent_texts()[1],
            "🚫 糟糕, 接口400啦! content_policy_violation"
        );
    }

    #[tokio::test]
    async fn test_ignores_unauthorized_and_other_text() {
        let (backend, images, client) = fixture(Ok(vec![]));
        assert!(!client.receive(&Message::from("/img a cat"), &Target::private("stranger")).await.unwrap());
        assert!(!client.receive(&Message::from("hello"), &Target::private("boss")).await.unwrap());
        settle().await;
        assert!(backend.sent().is_empty());
        assert!(images.requests.lock().is_empty());
    }
}
