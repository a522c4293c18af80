//! The Telegram [`Channel`] implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use courier_channels::channel::{Channel, MessageStream, MESSAGE_BUFFER};
use courier_channels::types::{meta, Message, Response};
use courier_channels::ChannelError;
use courier_core::config::TelegramConfig;

use crate::api::{BotApi, Update};
use crate::media;
use crate::send::{split_message, MAX_MESSAGE_BYTES};

pub struct TelegramChannel {
    api: Arc<BotApi>,
    config: TelegramConfig,
    stream: Arc<MessageStream>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            api: Arc::new(BotApi::new(&config.bot_token)),
            config,
            stream: Arc::new(MessageStream::new(MESSAGE_BUFFER)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        {
            let task = self.task.lock().unwrap();
            if task.is_some() {
                return Ok(());
            }
        }

        // Auth handshake before the poll loop — a bad token fails start.
        let me = self
            .api
            .get_me()
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;
        info!(
            bot = %me.username.as_deref().unwrap_or("?"),
            "Telegram connected, starting long-poll loop"
        );

        let handle = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            self.config.clone(),
            Arc::clone(&self.stream),
            self.cancel.clone(),
        ));
        *self.task.lock().unwrap() = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            // The select in the poll loop drops any in-flight long poll.
            let _ = handle.await;
        }
        self.stream.close();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
        let chat_id: i64 = resp
            .reply_to
            .parse()
            .map_err(|_| ChannelError::SendFailed(format!("bad chat id: {}", resp.reply_to)))?;

        for chunk in split_message(&resp.text, MAX_MESSAGE_BYTES) {
            // Markdown first; Telegram rejects unbalanced markup, in which
            // case the chunk is re-sent once as plain text.
            if let Err(e) = self.api.send_message(chat_id, &chunk, Some("Markdown")).await {
                warn!(error = %e, "Markdown send rejected, retrying as plain text");
                self.api
                    .send_message(chat_id, &chunk, None)
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.stream.take()
    }
}

async fn poll_loop(
    api: Arc<BotApi>,
    config: TelegramConfig,
    stream: Arc<MessageStream>,
    cancel: CancellationToken,
) {
    let mut offset: i64 = 0;
    loop {
        let updates = tokio::select! {
            _ = cancel.cancelled() => break,
            result = api.get_updates(offset) => match result {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(std::time::Duration::from_secs(2)) => continue,
                    }
                }
            },
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            if let Some(msg) = normalize(&api, &config, update).await {
                stream.push("telegram", msg);
            }
        }
    }
    info!("Telegram poll loop stopped");
}

/// Turn one update into a normalized [`Message`], applying the allowlist
/// and media summarization. Returns `None` for updates that carry no
/// message or whose sender is not permitted.
async fn normalize(api: &BotApi, config: &TelegramConfig, update: Update) -> Option<Message> {
    let msg = update.message?;
    let chat_id = msg.chat.id.to_string();
    let user = msg.from.as_ref();
    let user_id = user.map(|u| u.id.to_string()).unwrap_or_default();
    let username = user
        .and_then(|u| u.username.clone())
        .unwrap_or_default();

    if !is_allowed(&config.allow_from, &chat_id, &user_id) {
        warn!(chat_id = %chat_id, user_id = %user_id, "sender not in allowlist, dropping");
        return None;
    }

    let media = media::extract(api, &msg).await;
    let text = msg
        .text
        .clone()
        .or_else(|| msg.caption.clone())
        .or_else(|| media.as_ref().map(|m| m.placeholder.clone()))?;

    let mut metadata = HashMap::new();
    metadata.insert(meta::CHAT_ID.to_string(), chat_id.clone());
    metadata.insert(meta::CHAT_TYPE.to_string(), msg.chat.kind.clone());
    if let Some(media) = &media {
        metadata.insert(meta::MEDIA_SUMMARY.to_string(), media.summary.clone());
    }

    Some(Message {
        id: format!("telegram-{}", update.update_id),
        channel_id: format!("telegram:{}", msg.chat.id),
        user_id,
        username,
        text,
        reply_to: Some(chat_id),
        metadata,
    })
}

/// Empty allowlist accepts everyone; otherwise either the chat id or the
/// user id must be listed.
fn is_allowed(allow_from: &[String], chat_id: &str, user_id: &str) -> bool {
    if allow_from.is_empty() {
        return true;
    }
    allow_from
        .iter()
        .any(|entry| entry == chat_id || entry == user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_allowlist_accepts_everyone() {
        assert!(is_allowed(&[], "100", "42"));
    }

    #[test]
    fn chat_id_match_accepts() {
        let list = vec!["100".to_string()];
        assert!(is_allowed(&list, "100", "999"));
    }

    #[test]
    fn user_id_match_accepts() {
        let list = vec!["42".to_string()];
        assert!(is_allowed(&list, "100", "42"));
    }

    #[test]
    fn no_match_rejects() {
        let list = vec!["1".to_string(), "2".to_string()];
        assert!(!is_allowed(&list, "100", "42"));
    }
}
