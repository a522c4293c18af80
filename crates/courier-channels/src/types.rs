use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Metadata keys shared between channels and the dispatcher.
pub mod meta {
    /// Platform-native chat identifier (Telegram chat id, Feishu chat id).
    pub const CHAT_ID: &str = "chat_id";
    /// Chat flavor: `private`, `group`, `supergroup`, `p2p`, …
    pub const CHAT_TYPE: &str = "chat_type";
    /// Id of the cron job that produced this message.
    pub const JOB_ID: &str = "job_id";
    /// String-encoded bool: suppress the reply entirely.
    pub const SILENT: &str = "silent";
    /// Human-readable description of attached media.
    pub const MEDIA_SUMMARY: &str = "media_summary";
    /// Agent template to run for this message.
    pub const AGENT: &str = "agent";
    /// Task body for template `{{TASK}}` substitution.
    pub const TASK: &str = "task";
    /// Session that should receive a cron job's result.
    pub const REPORT_TO_SESSION: &str = "report_to_session";
}

/// An inbound event normalized by a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Channel-unique message id (e.g. `cli-3`, `telegram-88421`).
    pub id: String,
    /// Composite channel address like `telegram:<chat>` or `web:main`.
    pub channel_id: String,
    /// Platform-native sender id. Empty when the platform has none.
    #[serde(default)]
    pub user_id: String,
    /// Display name for the sender, if available.
    #[serde(default)]
    pub username: String,
    /// Plain text content.
    pub text: String,
    /// Routing token for replies, interpreted by the origin channel.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Channel-specific fields (see [`meta`]).
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Message {
    /// Look up a metadata value, treating the empty string as absent.
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// The channel name portion of `channel_id` (before the first `:`).
    pub fn channel_name(&self) -> &str {
        self.channel_id
            .split_once(':')
            .map(|(name, _)| name)
            .unwrap_or(&self.channel_id)
    }
}

/// An outbound reply handed to a channel's `send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub text: String,
    /// Opaque routing token — usually the `reply_to` or `chat_id` of the
    /// message being answered.
    pub reply_to: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Response {
    pub fn new(text: impl Into<String>, reply_to: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            reply_to: reply_to.into(),
            metadata: HashMap::new(),
        }
    }
}
