use thiserror::Error;

/// Errors that can occur during session transcript operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session key cannot be used as a directory name.
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// A transcript file failed to read or write.
    #[error("session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A transcript file is not valid JSON.
    #[error("corrupt session file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
