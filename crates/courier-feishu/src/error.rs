use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeishuError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The Feishu API answered with a non-zero code.
    #[error("Feishu API error ({code}): {message}")]
    Api { code: i64, message: String },

    #[error("decrypt error: {0}")]
    Decrypt(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, FeishuError>;
