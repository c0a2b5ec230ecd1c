use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("text extraction failed: {0}")]
    EmptyText(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid file pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the underlying vector collection.
///
/// A paper that simply does not exist is never reported through this type;
/// lookups return `Ok(None)` for that case.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable at {location}: {details}")]
    Unavailable { location: String, details: String },

    #[error("invalid response from {backend}: {details}")]
    BackendResponse { backend: String, details: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("embedding dimension {actual} does not match collection dimension {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("store request failed: {0}")]
    Request(String),
}

impl StoreError {
    pub(crate) fn unavailable(location: impl Into<String>, error: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            location: location.into(),
            details: error.to_string(),
        }
    }
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
