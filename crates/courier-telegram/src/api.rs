//! Thin Bot API client: only the handful of methods the channel needs.

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, TelegramError};

/// Long-poll window passed to `getUpdates`.
pub const POLL_TIMEOUT_SECS: u64 = 30;

pub struct BotApi {
    client: reqwest::Client,
    base: String,
    file_base: String,
}

impl BotApi {
    pub fn new(token: &str) -> Self {
        let client = reqwest::Client::builder()
            // Comfortably above the long-poll window.
            .timeout(std::time::Duration::from_secs(POLL_TIMEOUT_SECS + 15))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base: format!("https://api.telegram.org/bot{token}"),
            file_base: format!("https://api.telegram.org/file/bot{token}"),
        }
    }

    /// Auth handshake — fails fast on a bad token.
    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// One long-poll round. Blocks server-side up to
    /// [`POLL_TIMEOUT_SECS`]; an empty vec just means the window elapsed.
    pub async fn get_updates(&self, offset: i64) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &serde_json::json!({ "offset": offset, "timeout": POLL_TIMEOUT_SECS }),
        )
        .await
    }

    /// Send one message. `parse_mode` is `Some("Markdown")` on the first
    /// attempt and `None` for the plain-text retry.
    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        parse_mode: Option<&str>,
    ) -> Result<()> {
        let mut body = serde_json::json!({ "chat_id": chat_id, "text": text });
        if let Some(mode) = parse_mode {
            body["parse_mode"] = serde_json::Value::String(mode.to_string());
        }
        let _: serde_json::Value = self.call("sendMessage", &body).await?;
        Ok(())
    }

    /// Resolve a file id to its server-side path (for [`Self::file_url`]).
    pub async fn get_file(&self, file_id: &str) -> Result<String> {
        let file: File = self
            .call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await?;
        file.file_path
            .ok_or_else(|| TelegramError::Parse("getFile returned no file_path".to_string()))
    }

    /// Public download URL for a path returned by [`Self::get_file`].
    pub fn file_url(&self, file_path: &str) -> String {
        format!("{}/{file_path}", self.file_base)
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        debug!(method, "Bot API call");
        let resp = self
            .client
            .post(format!("{}/{method}", self.base))
            .json(body)
            .send()
            .await?;

        let envelope: ApiEnvelope<T> = resp
            .json()
            .await
            .map_err(|e| TelegramError::Parse(e.to_string()))?;

        if !envelope.ok {
            return Err(TelegramError::Api(
                envelope
                    .description
                    .unwrap_or_else(|| format!("{method} failed")),
            ));
        }
        envelope
            .result
            .ok_or_else(|| TelegramError::Parse(format!("{method}: ok but no result")))
    }
}

#[derive(Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

// ── Wire types (the subset of the Bot API the channel reads) ──────────────

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    pub chat: Chat,
    pub from: Option<User>,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<PhotoSize>>,
    pub document: Option<Document>,
    pub audio: Option<Audio>,
    pub voice: Option<Voice>,
    pub video: Option<Video>,
    pub sticker: Option<Sticker>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Document {
    pub file_id: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Audio {
    pub file_id: String,
    pub duration: u32,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Voice {
    pub file_id: String,
    pub duration: u32,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub file_id: String,
    pub duration: u32,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sticker {
    pub file_id: String,
    pub emoji: Option<String>,
}

#[derive(Deserialize)]
struct File {
    file_path: Option<String>,
}
