use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable string identifying a conversation thread.
///
/// Well-known forms:
/// - `"main"` — the owner's interactive session (CLI, web, admin DMs)
/// - `"telegram:<user_id>"` / `"feishu:<open_id>"` — per-user channel sessions
/// - `"cron:<job_id>:<timestamp>-<hex4>"` — a fresh session per cron fire
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey(pub String);

impl SessionKey {
    /// The owner's primary interactive session.
    pub fn main() -> Self {
        Self("main".to_string())
    }

    /// Session for a specific user on a specific channel, e.g. `telegram:42`.
    pub fn for_channel_user(channel: &str, user_id: &str) -> Self {
        Self(format!("{channel}:{user_id}"))
    }

    /// A fresh, unique session for one cron fire.
    ///
    /// Each fire gets its own thread so job runs never share transcript
    /// history: `cron:<job_id>:<YYYY-MM-DD-HH-MM-SS>-<hex4>`.
    pub fn for_cron_fire(job_id: &str, now: DateTime<Utc>) -> Self {
        Self(format!(
            "cron:{}:{}-{}",
            job_id,
            now.format("%Y-%m-%d-%H-%M-%S"),
            short_hex()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for SessionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Four hex characters of randomness for collision-resistant ids.
pub fn short_hex() -> String {
    Uuid::new_v4().simple().to_string()[..4].to_string()
}
