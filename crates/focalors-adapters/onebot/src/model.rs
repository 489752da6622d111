//! OneBot 12 wire types as sent by ComWeChat.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use focalors_core::{BackendError, BackendResult, Message, Segment, Target};

// =============================================================================
// Actions
// =============================================================================

/// An outbound action frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub params: Value,
    pub echo: String,
}

/// The answer to an action, matched to its request by `echo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    /// `ok` or `failed`.
    pub status: String,
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<Value>,
}

impl ActionResponse {
    pub fn is_ok(&self) -> bool {
        self.status == "ok" && self.retcode == 0
    }

    /// Returns the echo as the string key the caller registered.
    pub fn echo_key(&self) -> Option<String> {
        match self.echo.as_ref()? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    pub fn into_result(self) -> BackendResult<Value> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(BackendError::Api {
                retcode: self.retcode,
                message: self.message,
            })
        }
    }
}

/// `data` of a successful `upload_file`.
#[derive(Debug, Deserialize)]
pub struct UploadedFile {
    pub file_id: String,
}

/// `data` of a successful `get_file`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RemoteFile {
    pub name: String,
    pub url: Option<String>,
    pub path: Option<String>,
    pub data: Option<String>,
}

// =============================================================================
// Events
// =============================================================================

/// An inbound event frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Message(MessageEvent),
    Meta(OtherEvent),
    Notice(OtherEvent),
    Request(OtherEvent),
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub id: String,
    pub detail_type: String,
    pub message_id: String,
    /// Raw segments; types this bridge does not model are dropped on
    /// conversion.
    #[serde(default)]
    pub message: Vec<Value>,
    #[serde(default)]
    pub alt_message: String,
    pub user_id: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

impl MessageEvent {
    pub fn to_message(&self) -> Message {
        self.message
            .iter()
            .filter_map(|raw| match serde_json::from_value::<Segment>(raw.clone()) {
                Ok(segment) => Some(segment),
                Err(_) => {
                    debug!(
                        message_id = %self.message_id,
                        segment = raw.get("type").and_then(serde_json::Value::as_str).unwrap_or("?"),
                        "Dropping unsupported segment"
                    );
                    None
                }
            })
            .collect()
    }

    /// Returns the conversation this event belongs to, or None for detail
    /// types the bridge does not route.
    pub fn target(&self) -> Option<Target> {
        match self.detail_type.as_str() {
            "private" => Some(Target::private(&self.user_id)),
            "group" => {
                let group_id = self.group_id.as_deref()?;
                Target::group_member(group_id, &self.user_id).ok()
            }
            _ => None,
        }
    }
}

/// Meta, notice and request events. Only logged.
#[derive(Debug, Clone, Deserialize)]
pub struct OtherEvent {
    pub detail_type: String,
    #[serde(default)]
    pub sub_type: String,
}

/// Returns true if the frame is an action response rather than an event.
pub fn is_response(frame: &Value) -> bool {
    frame.get("retcode").is_some() && frame.get("type").is_none()
}
