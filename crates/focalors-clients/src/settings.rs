//! Handler settings.
//!
//! These structs are embedded in the process configuration, so every field
//! has a serde default and partially written files still load.

use serde::{Deserialize, Serialize};

/// Azure OpenAI settings shared by the gpt and dalle handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiSettings {
    /// Resource endpoint, e.g. `https://my-resource.openai.azure.com`.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    /// Chat completion deployment.
    pub deployment: Option<String>,
    /// Image generation deployment.
    pub dalle_deployment: Option<String>,
    pub api_version: String,
    /// Longest accepted prompt, in characters.
    pub token_limit: usize,
    pub max_tokens: u32,
    /// Turns kept per conversation.
    pub history_length: usize,
    /// The history list is trimmed on every n-th write.
    pub history_trim_every: usize,
    /// Explicit trigger for the chat handler.
    pub command_prefix: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            api_key: None,
            deployment: None,
            dalle_deployment: None,
            api_version: "2023-12-01-preview".to_string(),
            token_limit: 100,
            max_tokens: 200,
            history_length: 10,
            history_trim_every: 2,
            command_prefix: "/gpt".to_string(),
        }
    }
}

impl OpenAiSettings {
    /// Returns the endpoint without a trailing slash.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint
            .as_deref()
            .map(|e| e.trim_end_matches('/'))
            .filter(|e| !e.is_empty())
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.is_empty())
    }
}

/// Settings of the jandan forwarding handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JandanSettings {
    /// Comments API; `&page={n}` is appended.
    pub api_url: String,
    pub interval_mins: u64,
    /// Local hours `[start, end)` during which timer ticks fetch.
    pub active_hours: [u32; 2],
    /// Seen items older than this are pruned.
    pub retention_hours: u64,
    pub max_pages: u32,
}

impl Default for JandanSettings {
    fn default() -> Self {
        Self {
            api_url: "https://i.jandan.net/?oxwlxojflwblxbsapi=jandan.get_pic_comments".to_string(),
            interval_mins: 60,
            active_hours: [8, 23],
            retention_hours: 48,
            max_pages: 3,
        }
    }
}

impl JandanSettings {
    /// Returns true if `hour` lies in the active window.
    ///
    /// A window whose end precedes its start wraps past midnight.
    pub fn is_active_hour(&self, hour: u32) -> bool {
        let [start, end] = self.active_hours;
        if start <= end {
            (start..end).contains(&hour)
        } else {
            hour >= start || hour < end
        }
    }
}
