//! Event v2 wire types and message-content extraction.

use serde::Deserialize;

/// Header common to all event v2 deliveries.
#[derive(Debug, Clone, Deserialize)]
pub struct EventHeader {
    pub event_id: String,
    pub event_type: String,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventPayload {
    pub header: EventHeader,
    pub event: serde_json::Value,
}

/// The `im.message.receive_v1` event body.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    pub sender: Sender,
    pub message: EventMessage,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sender {
    pub sender_id: SenderId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SenderId {
    #[serde(default)]
    pub open_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventMessage {
    pub message_id: String,
    pub chat_id: String,
    /// `p2p` or `group`.
    #[serde(default)]
    pub chat_type: String,
    pub message_type: String,
    /// JSON-encoded string whose shape depends on `message_type`.
    #[serde(default)]
    pub content: String,
}

/// Text plus optional media summary extracted from one message.
pub struct Extracted {
    pub text: String,
    pub media_summary: Option<String>,
}

/// Decode `content` for the given message type. Non-text messages become a
/// `[… received]` placeholder plus a structured summary line.
pub fn extract_content(message_type: &str, content: &str) -> Extracted {
    let body: serde_json::Value = serde_json::from_str(content).unwrap_or_default();
    let field = |name: &str| body.get(name).and_then(|v| v.as_str()).unwrap_or("");

    match message_type {
        "text" => Extracted {
            text: field("text").trim().to_string(),
            media_summary: None,
        },
        "image" => Extracted {
            text: "[Image received]".to_string(),
            media_summary: Some(format!(
                "Attached media: kind=image image_key={}",
                field("image_key")
            )),
        },
        "file" => {
            let name = body
                .get("file_name")
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed");
            Extracted {
                text: format!("[File: {name}]"),
                media_summary: Some(format!(
                    "Attached media: kind=file filename={name} file_key={}",
                    field("file_key")
                )),
            }
        }
        "media" => Extracted {
            text: "[Video received]".to_string(),
            media_summary: Some(with_duration(
                &body,
                format!("Attached media: kind=video file_key={}", field("file_key")),
            )),
        },
        "audio" => Extracted {
            text: "[Audio received]".to_string(),
            media_summary: Some(with_duration(
                &body,
                format!("Attached media: kind=audio file_key={}", field("file_key")),
            )),
        },
        "sticker" => Extracted {
            text: "[Sticker received]".to_string(),
            media_summary: Some(format!(
                "Attached media: kind=sticker file_key={}",
                field("file_key")
            )),
        },
        other => Extracted {
            text: format!("[{other} received]"),
            media_summary: Some(format!("Attached media: kind={other}")),
        },
    }
}

fn with_duration(body: &serde_json::Value, mut summary: String) -> String {
    if let Some(ms) = body.get("duration").and_then(|v| v.as_u64()) {
        // Feishu reports duration in milliseconds.
        summary.push_str(&format!(" duration={}s", ms / 1000));
    }
    summary
}
