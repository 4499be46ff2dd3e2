use thiserror::Error;

/// Core error type shared across mockalchemy crates.
#[derive(Debug, Error)]
pub enum Error {
    /// A schema node is malformed or uses an unknown tag.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    /// Collection or relation definitions are inconsistent.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("toml decode error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for results returned by mockalchemy crates.
pub type Result<T> = std::result::Result<T, Error>;
