use serde::{Deserialize, Serialize};

/// Conversation role of one transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a persisted conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub role: Role,
    pub content: String,
}

impl TranscriptEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// On-disk shape of `sessions/<key>/session.json`.
///
/// Sessions are created lazily on the first wake; `created_at` is stamped
/// then and `updated_at` on every append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub key: String,
    pub messages: Vec<TranscriptEntry>,
    pub created_at: String,
    pub updated_at: String,
}

impl SessionRecord {
    pub fn new(key: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            key: key.into(),
            messages: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let entry = TranscriptEntry::assistant("hi");
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains(r#""role":"assistant""#));
    }

    #[test]
    fn record_roundtrips() {
        let mut record = SessionRecord::new("main");
        record.messages.push(TranscriptEntry::user("hello"));
        let json = serde_json::to_string(&record).unwrap();
        let back: SessionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.key, "main");
        assert_eq!(back.messages.len(), 1);
        assert_eq!(back.messages[0].role, Role::User);
    }
}
