use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid span on page {page}: {details}")]
    InvalidSpan { page: u32, details: String },

    #[error("span source failed: {0}")]
    SpanSource(String),

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("tokenizer unavailable: {0}")]
    Tokenizer(String),

    #[error("regex error: {0}")]
    RegexError(#[from] regex::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialize error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("snapshot artifact missing: {0}")]
    MissingArtifact(String),

    #[error("snapshot arrays are not aligned: {details}")]
    LengthMismatch { details: String },

    #[error("snapshot artifacts come from different saves: {details}")]
    GenerationMismatch { details: String },

    #[error("invalid index config: {0}")]
    InvalidConfig(String),

    #[error("index has not been built yet")]
    NotBuilt,
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
