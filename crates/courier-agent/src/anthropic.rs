//! Anthropic Messages API provider (non-streaming).

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use courier_sessions::{Role, TranscriptEntry};

use crate::provider::{GenerateReply, ProviderError, ProviderReply};

const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, model: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl GenerateReply for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn generate_reply(
        &self,
        system: &str,
        transcript: &[TranscriptEntry],
        user: &str,
    ) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = build_request_body(&self.model, system, transcript, user);

        debug!(model = %self.model, "sending request to Anthropic");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "Anthropic API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let text = api_resp
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_deref().unwrap_or(""))
            .collect::<Vec<_>>()
            .join("");

        Ok(ProviderReply::text_only(text))
    }
}

fn build_request_body(
    model: &str,
    system: &str,
    transcript: &[TranscriptEntry],
    user: &str,
) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = transcript
        .iter()
        // System-level notices in the transcript are folded into user turns;
        // the Messages API only accepts user/assistant roles here.
        .map(|entry| {
            let role = match entry.role {
                Role::Assistant => "assistant",
                Role::User | Role::System => "user",
            };
            serde_json::json!({ "role": role, "content": entry.content })
        })
        .collect();
    messages.push(serde_json::json!({ "role": "user", "content": user }));

    serde_json::json!({
        "model": model,
        "system": system,
        "max_tokens": MAX_TOKENS,
        "messages": messages,
    })
}

#[derive(Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_appends_user_turn_last() {
        let transcript = vec![
            TranscriptEntry::user("hi"),
            TranscriptEntry::assistant("hello"),
        ];
        let body = build_request_body("m", "sys", &transcript, "again");
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"], "again");
    }

    #[test]
    fn system_transcript_entries_become_user_turns() {
        let transcript = vec![TranscriptEntry::system("notice")];
        let body = build_request_body("m", "sys", &transcript, "x");
        assert_eq!(body["messages"][0]["role"], "user");
    }
}
