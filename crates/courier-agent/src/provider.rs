use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use courier_sessions::TranscriptEntry;

/// Record of one tool invocation made while producing a reply. The core
/// treats tool execution as an opaque capability; this is only carried for
/// the per-call trace log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub input: serde_json::Value,
    pub output: String,
}

/// One completed agent turn.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ProviderReply {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }
}

/// The language-model capability a thread invokes for each wake.
///
/// Implementations own their transport, model selection, and per-call
/// timeouts; the thread worker only respects cancellation around the call.
#[async_trait]
pub trait GenerateReply: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Produce one reply given the system prompt, the persisted transcript
    /// (already trimmed to the context budget), and the new user text.
    async fn generate_reply(
        &self,
        system: &str,
        transcript: &[TranscriptEntry],
        user: &str,
    ) -> Result<ProviderReply, ProviderError>;
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Provider unavailable: {0}")]
    Unavailable(String),
}
