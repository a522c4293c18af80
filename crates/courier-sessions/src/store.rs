//! File-backed transcript store.
//!
//! Layout: `<root>/<session_key>/session.json`. Writes go through a
//! same-directory temp file and an atomic rename, so readers (the web
//! history API) only ever see complete snapshots. The owning thread is the
//! sole writer for a given key; concurrent readers tolerate the latest
//! turn being in flight.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SessionError};
use crate::types::{SessionRecord, TranscriptEntry};

const SESSION_FILE: &str = "session.json";

/// Longest session key accepted as a directory name.
const MAX_KEY_LEN: usize = 200;

pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Load the transcript for `key`, or a fresh empty record if none is
    /// persisted yet. Creation is lazy — nothing is written until the first
    /// append.
    pub fn load(&self, key: &str) -> Result<SessionRecord> {
        let path = self.session_path(key)?;
        if !path.exists() {
            return Ok(SessionRecord::new(key));
        }
        let data = fs::read_to_string(&path)?;
        let record: SessionRecord = serde_json::from_str(&data)?;
        Ok(record)
    }

    /// Append entries to the transcript and persist atomically.
    pub fn append(&self, key: &str, entries: &[TranscriptEntry]) -> Result<SessionRecord> {
        let mut record = self.load(key)?;
        record.messages.extend_from_slice(entries);
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.save(&record)?;
        Ok(record)
    }

    /// Persist a full record (temp file + rename in the session directory).
    pub fn save(&self, record: &SessionRecord) -> Result<()> {
        let path = self.session_path(&record.key)?;
        let dir = path.parent().expect("session path always has a parent");
        fs::create_dir_all(dir)?;

        let tmp = dir.join(format!("{SESSION_FILE}.tmp"));
        let json = serde_json::to_string_pretty(record)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        debug!(session = %record.key, turns = record.messages.len(), "transcript persisted");
        Ok(())
    }

    /// Read-only snapshot of a session's turns. Missing sessions read as
    /// empty — the history API treats "never spoken" and "no file yet" the
    /// same way.
    pub fn history(&self, key: &str) -> Result<Vec<TranscriptEntry>> {
        Ok(self.load(key)?.messages)
    }

    fn session_path(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key).join(SESSION_FILE))
    }
}

/// Session keys become directory names; reject anything that could escape
/// the sessions root.
fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return Err(SessionError::InvalidKey(key.to_string()));
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        return Err(SessionError::InvalidKey(key.to_string()));
    }
    Ok(())
}
