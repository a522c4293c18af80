//! Durable job store.
//!
//! Accepts two on-disk forms: newline-delimited JSON objects (one job per
//! line) or a single YAML array. Which one a file *is* gets sniffed from
//! content, so either form loads regardless of the file name; writes emit
//! the canonical form for the path's extension (`.yaml`/`.yml` → YAML
//! array, anything else → JSONL), deterministically sorted by id.
//!
//! Writes are atomic: the new content goes to `<path>.tmp` in the same
//! directory and is renamed over the target.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobWire};

pub struct JobStore {
    path: PathBuf,
}

impl JobStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parse every record in the store. A missing file reads as empty.
    /// Records are normalized and validated; the first invalid record
    /// fails the whole load so a reload never half-applies a store.
    pub fn load(&self) -> Result<Vec<Job>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        parse(&content)
    }

    /// Rewrite the store with `jobs`, sorted by id, in the canonical form
    /// for this path's extension.
    pub fn write(&self, jobs: &[Job]) -> Result<()> {
        let mut sorted: Vec<&Job> = jobs.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let content = if self.is_yaml() {
            serde_yaml::to_string(&sorted).map_err(|e| SchedulerError::Parse(e.to_string()))?
        } else {
            let mut out = String::new();
            for job in &sorted {
                out.push_str(
                    &serde_json::to_string(job).map_err(|e| SchedulerError::Parse(e.to_string()))?,
                );
                out.push('\n');
            }
            out
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // `<path>.tmp` in the same directory so the rename stays atomic.
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn is_yaml(&self) -> bool {
        matches!(
            self.path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        )
    }
}

fn parse(content: &str) -> Result<Vec<Job>> {
    let trimmed = content.trim_start();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    // JSONL lines each open an object; anything else is the YAML array form.
    let wires: Vec<JobWire> = if trimmed.starts_with('{') {
        let mut wires = Vec::new();
        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let wire: JobWire = serde_json::from_str(line)
                .map_err(|e| SchedulerError::Parse(format!("line {}: {e}", lineno + 1)))?;
            wires.push(wire);
        }
        wires
    } else {
        serde_yaml::from_str(content).map_err(|e| SchedulerError::Parse(e.to_string()))?
    };

    wires.into_iter().map(Job::try_from).collect()
}
