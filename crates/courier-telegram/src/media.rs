//! Inbound media summarization.
//!
//! The agent only sees text, so every attachment becomes a placeholder line
//! plus a `media_summary` metadata entry describing mime type, duration,
//! filename, and a download URL fetched via `getFile`.

use tracing::warn;

use crate::api::{BotApi, TgMessage};

/// Placeholder text plus the structured summary for one attachment.
pub struct MediaInfo {
    pub placeholder: String,
    pub summary: String,
}

/// Inspect a message for supported media. Returns `None` for text-only
/// messages. The highest-resolution photo variant wins (last in the array).
pub async fn extract(api: &BotApi, msg: &TgMessage) -> Option<MediaInfo> {
    if let Some(photos) = &msg.photo {
        let photo = photos.last()?;
        return Some(MediaInfo {
            placeholder: "[Photo received]".to_string(),
            summary: summary(api, "photo", &photo.file_id, Some("image/jpeg"), None, None).await,
        });
    }

    if let Some(doc) = &msg.document {
        let name = doc.file_name.as_deref().unwrap_or("unnamed");
        return Some(MediaInfo {
            placeholder: format!("[Document: {name}]"),
            summary: summary(
                api,
                "document",
                &doc.file_id,
                doc.mime_type.as_deref(),
                None,
                doc.file_name.as_deref(),
            )
            .await,
        });
    }

    if let Some(audio) = &msg.audio {
        return Some(MediaInfo {
            placeholder: "[Audio received]".to_string(),
            summary: summary(
                api,
                "audio",
                &audio.file_id,
                audio.mime_type.as_deref(),
                Some(audio.duration),
                audio.file_name.as_deref(),
            )
            .await,
        });
    }

    if let Some(voice) = &msg.voice {
        return Some(MediaInfo {
            placeholder: "[Voice message received]".to_string(),
            summary: summary(
                api,
                "voice",
                &voice.file_id,
                voice.mime_type.as_deref().or(Some("audio/ogg")),
                Some(voice.duration),
                None,
            )
            .await,
        });
    }

    if let Some(video) = &msg.video {
        return Some(MediaInfo {
            placeholder: "[Video received]".to_string(),
            summary: summary(
                api,
                "video",
                &video.file_id,
                video.mime_type.as_deref().or(Some("video/mp4")),
                Some(video.duration),
                video.file_name.as_deref(),
            )
            .await,
        });
    }

    if let Some(sticker) = &msg.sticker {
        let emoji = sticker.emoji.as_deref().unwrap_or("");
        return Some(MediaInfo {
            placeholder: format!("[Sticker received{}]", fmt_suffix(emoji)),
            summary: summary(api, "sticker", &sticker.file_id, Some("image/webp"), None, None)
                .await,
        });
    }

    None
}

fn fmt_suffix(emoji: &str) -> String {
    if emoji.is_empty() {
        String::new()
    } else {
        format!(": {emoji}")
    }
}

async fn summary(
    api: &BotApi,
    kind: &str,
    file_id: &str,
    mime: Option<&str>,
    duration_secs: Option<u32>,
    filename: Option<&str>,
) -> String {
    let mut parts = vec![format!("kind={kind}")];
    if let Some(mime) = mime {
        parts.push(format!("mime={mime}"));
    }
    if let Some(d) = duration_secs {
        parts.push(format!("duration={d}s"));
    }
    if let Some(name) = filename {
        parts.push(format!("filename={name}"));
    }
    match api.get_file(file_id).await {
        Ok(path) => parts.push(format!("url={}", api.file_url(&path))),
        Err(e) => warn!(file_id, error = %e, "getFile failed, summary has no url"),
    }
    format!("Attached media: {}", parts.join(" "))
}
