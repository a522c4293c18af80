use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The store file could not be read or written.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The store contents are not valid JSONL or YAML.
    #[error("store parse error: {0}")]
    Parse(String),

    /// A job record is structurally invalid.
    #[error("invalid job '{id}': {reason}")]
    InvalidJob { id: String, reason: String },

    /// The cron expression could not be parsed.
    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    /// No job with the given ID exists in the store.
    #[error("job not found: {id}")]
    JobNotFound { id: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
