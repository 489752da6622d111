//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use focalors_adapter_onebot::OneBotConfig;
use focalors_clients::{JandanSettings, OpenAiSettings};

/// Handler names in their default order.
pub const DEFAULT_CLIENTS: [&str; 6] = ["system", "abyss", "dalle", "gpt", "jandan", "gif"];

/// Root configuration structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocalorsConfig {
    /// The account that always passes access checks and may administer
    /// every topic.
    pub master_id: Option<String>,

    pub store: StoreConfig,

    /// OneBot WebSocket client settings.
    pub backend: OneBotConfig,

    pub openai: OpenAiSettings,

    pub jandan: JandanSettings,

    /// Enabled handlers, in dispatch order.
    pub clients: Vec<String>,

    pub logging: LoggingConfig,
}

impl Default for FocalorsConfig {
    fn default() -> Self {
        Self {
            master_id: None,
            store: StoreConfig::default(),
            backend: OneBotConfig::default(),
            openai: OpenAiSettings::default(),
            jandan: JandanSettings::default(),
            clients: DEFAULT_CLIENTS.iter().map(|s| s.to_string()).collect(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FocalorsConfig {
    /// Returns the master id, treating an empty string as unset.
    pub fn master_id(&self) -> Option<&str> {
        self.master_id.as_deref().filter(|id| !id.is_empty())
    }
}

// =============================================================================
// Store
// =============================================================================

/// Which key-value store backs the bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process; state is lost on restart.
    Memory,
    #[default]
    Redis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreKind,
    pub redis_uri: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::default(),
            redis_uri: "redis://127.0.0.1:6379/1".to_string(),
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    /// Requires the `json-log` feature.
    Json,
}

/// Where log lines go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Required when `output` is `file`.
    pub file_path: Option<PathBuf>,
    /// Per-module levels, e.g. `focalors_adapter_onebot = "debug"`.
    pub filters: HashMap<String, LogLevel>,
    pub thread_ids: bool,
    /// Include file and line of the log call.
    pub file_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            output: LogOutput::Stdout,
            file_path: None,
            filters: HashMap::new(),
            thread_ids: false,
            file_location: false,
        }
    }
}
