//! The Feishu [`Channel`] implementation: webhook server plus send path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response as HttpResponse},
    routing::post,
    Json, Router,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_channels::channel::{Channel, MessageStream, MESSAGE_BUFFER};
use courier_channels::types::{meta, Message, Response};
use courier_channels::ChannelError;
use courier_core::config::FeishuConfig;

use crate::crypto::decrypt_envelope;
use crate::dedup::{DedupCache, EVICT_INTERVAL};
use crate::event::{extract_content, EventPayload, MessageEvent};
use crate::send::{FeishuSender, ReplyTarget};

/// Request body cap (1 MiB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Grace period for the HTTP server on stop.
const SHUTDOWN_GRACE_SECS: u64 = 5;

/// Only this event type is dispatched; everything else is acknowledged and
/// dropped.
const MESSAGE_EVENT: &str = "im.message.receive_v1";

pub struct FeishuChannel {
    config: FeishuConfig,
    stream: Arc<MessageStream>,
    dedup: Arc<DedupCache>,
    sender: Arc<FeishuSender>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct WebhookState {
    config: FeishuConfig,
    stream: Arc<MessageStream>,
    dedup: Arc<DedupCache>,
}

impl FeishuChannel {
    pub fn new(config: FeishuConfig) -> Self {
        let sender = Arc::new(FeishuSender::new(
            config.app_id.clone(),
            config.app_secret.clone(),
        ));
        Self {
            config,
            stream: Arc::new(MessageStream::new(MESSAGE_BUFFER)),
            dedup: Arc::new(DedupCache::default()),
            sender,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Channel for FeishuChannel {
    fn name(&self) -> &str {
        "feishu"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        {
            let tasks = self.tasks.lock().unwrap();
            if !tasks.is_empty() {
                return Ok(());
            }
        }

        let state = Arc::new(WebhookState {
            config: self.config.clone(),
            stream: Arc::clone(&self.stream),
            dedup: Arc::clone(&self.dedup),
        });
        let router = Router::new()
            .route("/webhook/event", post(webhook_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(state);

        let addr = format!("{}:{}", self.config.bind, self.config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ChannelError::ConnectionFailed(format!("bind {addr}: {e}")))?;
        info!(addr = %addr, "Feishu webhook listening");

        let cancel = self.cancel.clone();
        let server = tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                error!(error = %e, "Feishu webhook server error");
            }
        });

        let dedup = Arc::clone(&self.dedup);
        let cancel = self.cancel.clone();
        let cleaner = tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVICT_INTERVAL);
            loop {
                tokio::select! {
                    _ = interval.tick() => dedup.evict_expired(),
                    _ = cancel.cancelled() => break,
                }
            }
        });

        *self.tasks.lock().unwrap() = vec![server, cleaner];
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(
                std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS),
                task,
            )
            .await
            .is_err()
            {
                warn!("Feishu task did not stop within grace period");
            }
        }
        self.stream.close();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
        let target = ReplyTarget::parse(&resp.reply_to);
        self.sender
            .send_text(&target, &resp.text)
            .await
            .map_err(|e| ChannelError::SendFailed(e.to_string()))
    }

    fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.stream.take()
    }
}

/// `POST /webhook/event`.
///
/// Handles the url_verification challenge inline; event v2 deliveries are
/// acknowledged with 200 immediately (the upstream retries after ~3s
/// without one) and processed on a spawned task.
async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    body: Bytes,
) -> HttpResponse {
    let mut payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "unparseable webhook body");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // Encrypted envelope: replace the body with the decrypted plaintext.
    if let Some(encrypted) = payload.get("encrypt").and_then(|v| v.as_str()) {
        let Some(key) = state.config.encrypt_key.as_deref() else {
            warn!("encrypted envelope received but no encrypt key configured");
            return StatusCode::BAD_REQUEST.into_response();
        };
        match decrypt_envelope(key, encrypted).and_then(|plain| {
            serde_json::from_str(&plain).map_err(|e| crate::FeishuError::Parse(e.to_string()))
        }) {
            Ok(decrypted) => payload = decrypted,
            Err(e) => {
                warn!(error = %e, "envelope decryption failed");
                return StatusCode::BAD_REQUEST.into_response();
            }
        }
    }

    // URL verification challenge.
    if payload.get("type").and_then(|v| v.as_str()) == Some("url_verification") {
        if let Some(expected) = state.config.verification_token.as_deref() {
            if payload.get("token").and_then(|v| v.as_str()) != Some(expected) {
                warn!("url_verification token mismatch");
                return StatusCode::FORBIDDEN.into_response();
            }
        }
        let challenge = payload
            .get("challenge")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        return Json(serde_json::json!({ "challenge": challenge })).into_response();
    }

    // Event v2.
    let event: EventPayload = match serde_json::from_value(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "malformed event payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    if let Some(expected) = state.config.verification_token.as_deref() {
        if event.header.token.as_deref() != Some(expected) {
            warn!(event_id = %event.header.event_id, "event token mismatch");
            return StatusCode::FORBIDDEN.into_response();
        }
    }

    // Ack now; everything after this point happens off the request path.
    tokio::spawn(process_event(state, event));
    StatusCode::OK.into_response()
}

async fn process_event(state: Arc<WebhookState>, payload: EventPayload) {
    let event_id = payload.header.event_id.clone();
    if !state.dedup.insert(&event_id) {
        debug!(event_id = %event_id, "duplicate event suppressed");
        return;
    }
    if payload.header.event_type != MESSAGE_EVENT {
        debug!(event_type = %payload.header.event_type, "ignoring non-message event");
        return;
    }

    let event: MessageEvent = match serde_json::from_value(payload.event) {
        Ok(event) => event,
        Err(e) => {
            warn!(event_id = %event_id, error = %e, "malformed message event");
            return;
        }
    };

    let open_id = event.sender.sender_id.open_id;
    if !state.config.allow_open_ids.is_empty()
        && !state.config.allow_open_ids.contains(&open_id)
    {
        warn!(open_id = %open_id, "sender not in allowlist, dropping");
        return;
    }

    let extracted = extract_content(&event.message.message_type, &event.message.content);
    if extracted.text.is_empty() {
        return;
    }

    let reply_to = if event.message.chat_type == "p2p" {
        format!("p2p:{open_id}")
    } else {
        format!("group:{}", event.message.chat_id)
    };

    let mut metadata = HashMap::new();
    metadata.insert(meta::CHAT_ID.to_string(), event.message.chat_id.clone());
    metadata.insert(meta::CHAT_TYPE.to_string(), event.message.chat_type.clone());
    if let Some(summary) = extracted.media_summary {
        metadata.insert(meta::MEDIA_SUMMARY.to_string(), summary);
    }

    state.stream.push(
        "feishu",
        Message {
            id: event.message.message_id,
            channel_id: format!("feishu:{}", event.message.chat_id),
            user_id: open_id,
            username: String::new(),
            text: extracted.text,
            reply_to: Some(reply_to),
            metadata,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(config: FeishuConfig) -> Arc<WebhookState> {
        Arc::new(WebhookState {
            config,
            stream: Arc::new(MessageStream::new(4)),
            dedup: Arc::new(DedupCache::default()),
        })
    }

    fn config() -> FeishuConfig {
        FeishuConfig {
            app_id: "cli_x".to_string(),
            app_secret: "secret".to_string(),
            verification_token: Some("tok".to_string()),
            encrypt_key: None,
            allow_open_ids: Vec::new(),
            admin_open_id: None,
            bind: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    fn event_body(event_id: &str, text: &str) -> Bytes {
        Bytes::from(format!(
            r#"{{
                "header": {{"event_id":"{event_id}","event_type":"im.message.receive_v1","token":"tok"}},
                "event": {{
                    "sender": {{"sender_id": {{"open_id":"ou_1"}}}},
                    "message": {{
                        "message_id":"om_{event_id}","chat_id":"oc_1","chat_type":"p2p",
                        "message_type":"text","content":"{{\"text\":\"{text}\"}}"
                    }}
                }}
            }}"#
        ))
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let state = state_with(config());
        let body = Bytes::from(r#"{"type":"url_verification","challenge":"abc","token":"tok"}"#);
        let resp = webhook_handler(State(state), body).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn url_verification_bad_token_is_403() {
        let state = state_with(config());
        let body = Bytes::from(r#"{"type":"url_verification","challenge":"abc","token":"wrong"}"#);
        let resp = webhook_handler(State(state), body).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn event_with_bad_token_is_403() {
        let state = state_with(config());
        let body = Bytes::from(
            r#"{"header":{"event_id":"E","event_type":"im.message.receive_v1","token":"wrong"},"event":{}}"#,
        );
        let resp = webhook_handler(State(state), body).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn duplicate_event_produces_one_message() {
        let state = state_with(config());
        let mut rx = state.stream.take().unwrap();

        let resp = webhook_handler(State(Arc::clone(&state)), event_body("E1", "hi")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = webhook_handler(State(Arc::clone(&state)), event_body("E1", "hi")).await;
        assert_eq!(resp.status(), StatusCode::OK);

        // Both requests were accepted; only the first yields a message.
        let first = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.text, "hi");
        assert_eq!(first.channel_id, "feishu:oc_1");
        assert_eq!(first.reply_to.as_deref(), Some("p2p:ou_1"));

        // Give the spawned duplicate a moment, then confirm nothing arrived.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn allowlist_blocks_unknown_senders() {
        let mut cfg = config();
        cfg.allow_open_ids = vec!["ou_other".to_string()];
        let state = state_with(cfg);
        let mut rx = state.stream.take().unwrap();

        let resp = webhook_handler(State(Arc::clone(&state)), event_body("E2", "hi")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn encrypted_envelope_without_key_is_rejected() {
        let state = state_with(config());
        let body = Bytes::from(r#"{"encrypt":"AAAA"}"#);
        let resp = webhook_handler(State(state), body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
