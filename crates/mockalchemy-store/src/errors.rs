use thiserror::Error;

use mockalchemy_generate::GenerationError;

/// Failures of a persistence backend. Absorbed by the storage port.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Caller-visible errors of stores, registry and facade.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record '{id}' not found in collection '{collection}'")]
    NotFound { collection: String, id: String },
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("simulated failure for {operation} on '{collection}'")]
    Simulated {
        collection: String,
        operation: &'static str,
    },
    #[error("hook rejected {operation}: {message}")]
    Hook {
        operation: &'static str,
        message: String,
    },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl StoreError {
    pub fn not_found(collection: &str, id: &str) -> Self {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

impl From<mockalchemy_core::Error> for StoreError {
    fn from(err: mockalchemy_core::Error) -> Self {
        match err {
            mockalchemy_core::Error::Configuration(message)
            | mockalchemy_core::Error::InvalidSchema(message) => StoreError::Configuration(message),
            other => StoreError::Configuration(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type StorageResult<T> = Result<T, StorageError>;
