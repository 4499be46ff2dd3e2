use thiserror::Error;

/// Errors emitted by value generators.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("unsupported faker template '{0}'")]
    UnknownTemplate(String),
    #[error("generator '{generator}' failed: {message}")]
    Failed { generator: String, message: String },
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
