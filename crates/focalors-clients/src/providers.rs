//! Upstream services called by the handlers.
//!
//! Each service sits behind a small trait so handlers can be exercised
//! against fakes. The default implementations talk HTTP:
//!
//! - [`AzureChat`]: chat completions through `async-openai` with an Azure
//!   configuration.
//! - [`AzureImages`]: DALL-E image generation on the Azure REST endpoint.
//! - [`JandanApi`]: the jandan picture comments API.
//! - [`SorryGifMaker`]: the sorry.xuty.cc gif generator.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::AzureConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionRequestUserMessageContentPart, CreateChatCompletionRequestArgs, ImageUrlArgs,
};
use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::settings::OpenAiSettings;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/128.0.0.0 Safari/537.36 Edg/128.0.0.0";

// =============================================================================
// Errors
// =============================================================================

/// Errors returned by upstream services.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The service answered with an error status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status, 0 when the client library does not expose it.
        status: u16,
        /// Service-specific error code.
        code: Option<String>,
        message: String,
    },

    /// The request could not be sent or the connection failed.
    #[error("request failed: {0}")]
    Request(String),

    /// The response body had an unexpected shape.
    #[error("invalid response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<OpenAIError> for ProviderError {
    fn from(err: OpenAIError) -> Self {
        match err {
            OpenAIError::ApiError(api) => Self::Api {
                status: 0,
                code: None,
                message: api.message,
            },
            OpenAIError::JSONDeserialize(..) => Self::Decode(err.to_string()),
            other => Self::Request(other.to_string()),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

fn http_client() -> ProviderResult<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?)
}

// =============================================================================
// Chat completion
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub text: String,
    /// Image URLs (or data URLs) attached to a user turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl ChatTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }
}

/// A chat completion service.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Completes the conversation and returns the first choice's text.
    async fn complete(&self, turns: Vec<ChatTurn>, max_tokens: u32) -> ProviderResult<Option<String>>;
}

/// Chat completions against an Azure OpenAI deployment.
pub struct AzureChat {
    client: async_openai::Client<AzureConfig>,
    deployment: String,
}

impl AzureChat {
    /// Returns `None` unless endpoint and key are configured.
    pub fn from_settings(settings: &OpenAiSettings) -> Option<Self> {
        let endpoint = settings.endpoint()?;
        let api_key = settings.api_key()?;
        let deployment = settings.deployment.clone().unwrap_or_default();
        let config = AzureConfig::new()
            .with_api_base(endpoint)
            .with_api_version(&settings.api_version)
            .with_deployment_id(&deployment)
            .with_api_key(api_key);
        Some(Self {
            client: async_openai::Client::with_config(config),
            deployment,
        })
    }
}

fn request_message(turn: ChatTurn) -> Result<ChatCompletionRequestMessage, OpenAIError> {
    match turn.role {
        ChatRole::Assistant => Ok(ChatCompletionRequestAssistantMessageArgs::default()
            .content(turn.text)
            .build()?
            .into()),
        ChatRole::User if turn.images.is_empty() => Ok(ChatCompletionRequestUserMessageArgs::default()
            .content(turn.text)
            .build()?
            .into()),
        ChatRole::User => {
            let mut parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
                ChatCompletionRequestMessageContentPartTextArgs::default()
                    .text(turn.text)
                    .build()?
                    .into(),
            ];
            for url in turn.images {
                parts.push(
                    ChatCompletionRequestMessageContentPartImageArgs::default()
                        .image_url(ImageUrlArgs::default().url(url).build()?)
                        .build()?
                        .into(),
                );
            }
            Ok(ChatCompletionRequestUserMessageArgs::default()
                .content(parts)
                .build()?
                .into())
        }
    }
}

#[async_trait]
impl ChatProvider for AzureChat {
    async fn complete(&self, turns: Vec<ChatTurn>, max_tokens: u32) -> ProviderResult<Option<String>> {
        let messages = turns
            .into_iter()
            .map(request_message)
            .collect::<Result<Vec<_>, _>>()?;

        // Older Azure API versions only understand `max_tokens`.
        #[allow(deprecated)]
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.deployment)
            .max_tokens(max_tokens)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(request).await?;
        debug!(choices = response.choices.len(), "Chat completion received");
        Ok(response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content))
    }
}

// =============================================================================
// Image generation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    #[default]
    Standard,
    Hd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageStyle {
    #[default]
    Vivid,
    Natural,
}

/// Parameters of one image generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRequest {
    pub prompt: String,
    pub n: u32,
    pub size: &'static str,
    pub quality: ImageQuality,
    pub style: ImageStyle,
    pub response_format: &'static str,
}

impl ImageRequest {
    /// A single 1024x1024 image returned by URL.
    pub fn new(prompt: impl Into<String>, quality: ImageQuality, style: ImageStyle) -> Self {
        Self {
            prompt: prompt.into(),
            n: 1,
            size: "1024x1024",
            quality,
            style,
            response_format: "url",
        }
    }
}

/// An image generation service.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Generates images and returns their URLs.
    async fn generate(&self, request: ImageRequest) -> ProviderResult<Vec<String>>;
}

/// DALL-E on an Azure OpenAI deployment.
pub struct AzureImages {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<String>,
    #[serde(default)]
    message: String,
}

impl AzureImages {
    /// Returns `Ok(None)` unless endpoint, key and deployment are configured.
    pub fn from_settings(settings: &OpenAiSettings) -> ProviderResult<Option<Self>> {
        let (Some(endpoint), Some(api_key), Some(deployment)) = (
            settings.endpoint(),
            settings.api_key(),
            settings.dalle_deployment.as_deref().filter(|d| !d.is_empty()),
        ) else {
            return Ok(None);
        };
        Ok(Some(Self {
            http: http_client()?,
            url: format!(
                "{endpoint}/openai/deployments/{deployment}/images/generations?api-version={}",
                settings.api_version
            ),
            api_key: api_key.to_string(),
        }))
    }
}

#[async_trait]
impl ImageProvider for AzureImages {
    async fn generate(&self, request: ImageRequest) -> ProviderResult<Vec<String>> {
        let response = self
            .http
            .post(&self.url)
            .header("api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ErrorEnvelope>(&body) {
                Ok(envelope) => (envelope.error.code, envelope.error.message),
                Err(_) => (None, body),
            };
            return Err(ProviderError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let body: ImagesResponse = response.json().await?;
        Ok(body.data.into_iter().filter_map(|d| d.url).collect())
    }
}

// =============================================================================
// Jandan comments
// =============================================================================

/// A picture comment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Comment {
    #[serde(rename = "comment_ID", deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(rename = "comment_author", default)]
    pub author: String,
    #[serde(rename = "comment_date", default)]
    pub date: String,
    #[serde(default, deserialize_with = "count")]
    pub vote_positive: i64,
    #[serde(default, deserialize_with = "count")]
    pub vote_negative: i64,
    #[serde(default)]
    pub text_content: String,
    #[serde(default)]
    pub pics: Vec<String>,
}

#[derive(Deserialize)]
struct CommentPage {
    #[serde(default)]
    comments: Vec<Comment>,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(de::Error::custom(format!("invalid comment id: {other}"))),
    }
}

fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or_default()),
        serde_json::Value::String(s) => s.trim().parse().map_err(de::Error::custom),
        serde_json::Value::Null => Ok(0),
        other => Err(de::Error::custom(format!("invalid vote count: {other}"))),
    }
}

/// A source of picture comments, newest first.
#[async_trait]
pub trait JandanSource: Send + Sync {
    /// Fetches one page (1-based). An empty page ends paging.
    async fn fetch_page(&self, page: u32) -> ProviderResult<Vec<Comment>>;
}

/// The jandan.net comments API.
pub struct JandanApi {
    http: reqwest::Client,
    api_url: String,
}

impl JandanApi {
    pub fn new(api_url: impl Into<String>) -> ProviderResult<Self> {
        Ok(Self {
            http: http_client()?,
            api_url: api_url.into(),
        })
    }
}

#[async_trait]
impl JandanSource for JandanApi {
    async fn fetch_page(&self, page: u32) -> ProviderResult<Vec<Comment>> {
        let url = format!("{}&page={page}", self.api_url);
        let response = self
            .http
            .get(&url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("Origin", "https://jandan.net")
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                code: None,
                message: format!("GET {url}"),
            });
        }
        let page: CommentPage = response.json().await?;
        Ok(page.comments)
    }
}

// =============================================================================
// Gif maker
// =============================================================================

/// Renders caption lines into a meme gif.
#[async_trait]
pub trait GifMaker: Send + Sync {
    /// Submits the lines for template `name` and returns the result page.
    async fn make(&self, name: &str, lines: &[String]) -> ProviderResult<String>;

    /// Base URL that links on the result page are relative to.
    fn base_url(&self) -> &str;
}

pub struct SorryGifMaker {
    http: reqwest::Client,
    base_url: String,
}

impl SorryGifMaker {
    pub const BASE_URL: &'static str = "https://sorry.xuty.cc";

    pub fn new() -> ProviderResult<Self> {
        Ok(Self {
            http: http_client()?,
            base_url: Self::BASE_URL.to_string(),
        })
    }
}

#[async_trait]
impl GifMaker for SorryGifMaker {
    async fn make(&self, name: &str, lines: &[String]) -> ProviderResult<String> {
        let body: BTreeMap<String, &str> = lines
            .iter()
            .enumerate()
            .map(|(i, line)| (i.to_string(), line.as_str()))
            .collect();
        let response = self
            .http
            .post(format!("{}/{name}/make", self.base_url))
            .json(&body)
            .send()
            .await?;
        Ok(response.text().await?)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

pub type SharedChat = Arc<dyn ChatProvider>;
pub type SharedImages = Arc<dyn ImageProvider>;
pub type SharedJandan = Arc<dyn JandanSource>;
pub type SharedGifMaker = Arc<dyn GifMaker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comment_accepts_numeric_and_string_fields() {
        let page: CommentPage = serde_json::from_str(
            r#"{"comments": [
                {"comment_ID": 5001, "comment_author": "a", "comment_date": "2024-05-01 10:00:00",
                 "vote_positive": "12", "vote_negative": 3, "text_content": "hi", "pics": ["https://x/1.jpg"]},
                {"comment_ID": "5002", "vote_positive": null}
            ]}"#,
        )
        .unwrap();
        assert_eq!(page.comments[0].id, "5001");
        assert_eq!(page.comments[0].vote_positive, 12);
        assert_eq!(page.comments[0].vote_negative, 3);
        assert_eq!(page.comments[1].id, "5002");
        assert!(page.comments[1].pics.is_empty());
    }

    #[test]
    fn test_image_request_shape() {
        let request = ImageRequest::new("a cat", ImageQuality::Hd, ImageStyle::Natural);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "prompt": "a cat",
                "n": 1,
                "size": "1024x1024",
                "quality": "hd",
                "style": "natural",
                "response_format": "url"
            })
        );
    }

    #[test]
    fn test_chat_turn_history_encoding() {
        let turn = ChatTurn::assistant("hello");
        assert_eq!(
            serde_json::to_string(&turn).unwrap(),
            r#"{"role":"assistant","text":"hello"}"#
        );
    }

    #[test]
    fn test_providers_need_credentials() {
        let settings = OpenAiSettings::default();
        assert!(AzureChat::from_settings(&settings).is_none());
        assert!(AzureImages::from_settings(&settings).unwrap().is_none());
    }
}
