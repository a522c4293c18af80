//! Outbound IM send path.
//!
//! Messages are addressed by a tagged reply token: `p2p:<open_id>` or
//! `group:<chat_id>`. An untagged token is treated as an open-id. Long
//! texts are split at ~4000 characters.

use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::error::{FeishuError, Result};

const BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Character cap per message.
pub const MAX_MESSAGE_CHARS: usize = 4000;

/// Refresh the tenant token this long before its reported expiry.
const TOKEN_SLACK: Duration = Duration::from_secs(120);

/// Where one reply goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyTarget {
    OpenId(String),
    ChatId(String),
}

impl ReplyTarget {
    /// Parse a tagged token; an untagged one falls back to open-id.
    pub fn parse(token: &str) -> Self {
        if let Some(open_id) = token.strip_prefix("p2p:") {
            ReplyTarget::OpenId(open_id.to_string())
        } else if let Some(chat_id) = token.strip_prefix("group:") {
            ReplyTarget::ChatId(chat_id.to_string())
        } else {
            ReplyTarget::OpenId(token.to_string())
        }
    }

    fn receive_id_type(&self) -> &'static str {
        match self {
            ReplyTarget::OpenId(_) => "open_id",
            ReplyTarget::ChatId(_) => "chat_id",
        }
    }

    fn receive_id(&self) -> &str {
        match self {
            ReplyTarget::OpenId(id) | ReplyTarget::ChatId(id) => id,
        }
    }
}

/// Split at a character count, never inside a rune.
pub fn split_chars(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

pub struct FeishuSender {
    client: reqwest::Client,
    app_id: String,
    app_secret: String,
    token: tokio::sync::Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl FeishuSender {
    pub fn new(app_id: String, app_secret: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            app_id,
            app_secret,
            token: tokio::sync::Mutex::new(None),
        }
    }

    /// Send `text` to `target`, splitting oversize payloads.
    pub async fn send_text(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        for chunk in split_chars(text, MAX_MESSAGE_CHARS) {
            self.send_one(target, &chunk).await?;
        }
        Ok(())
    }

    async fn send_one(&self, target: &ReplyTarget, text: &str) -> Result<()> {
        let token = self.tenant_token().await?;
        let content = serde_json::json!({ "text": text }).to_string();
        let body = serde_json::json!({
            "receive_id": target.receive_id(),
            "msg_type": "text",
            "content": content,
        });

        let resp: ApiReply = self
            .client
            .post(format!(
                "{BASE_URL}/im/v1/messages?receive_id_type={}",
                target.receive_id_type()
            ))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| FeishuError::Parse(e.to_string()))?;

        if resp.code != 0 {
            return Err(FeishuError::Api {
                code: resp.code,
                message: resp.msg,
            });
        }
        Ok(())
    }

    /// Cached tenant access token, refreshed shortly before expiry.
    async fn tenant_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        debug!("fetching tenant access token");
        let resp: TokenReply = self
            .client
            .post(format!("{BASE_URL}/auth/v3/tenant_access_token/internal"))
            .json(&serde_json::json!({
                "app_id": self.app_id,
                "app_secret": self.app_secret,
            }))
            .send()
            .await?
            .json()
            .await
            .map_err(|e| FeishuError::Parse(e.to_string()))?;

        if resp.code != 0 {
            return Err(FeishuError::Api {
                code: resp.code,
                message: resp.msg,
            });
        }

        let ttl = Duration::from_secs(resp.expire.max(0) as u64).saturating_sub(TOKEN_SLACK);
        let value = resp.tenant_access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        Ok(value)
    }
}

#[derive(Deserialize)]
struct ApiReply {
    code: i64,
    #[serde(default)]
    msg: String,
}

#[derive(Deserialize)]
struct TokenReply {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: String,
    #[serde(default)]
    expire: i64,
}
