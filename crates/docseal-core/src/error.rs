use thiserror::Error;

pub type DocsealResult<T> = Result<T, DocsealError>;

#[derive(Debug, Error)]
pub enum DocsealError {
    #[error("config error: {0}")]
    Config(String),

    #[error("record store error: {0}")]
    Records(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
