use crate::answer::AnswerError;
use crate::corpus::CorpusError;
use crate::embedding::EmbeddingError;
use crate::ingest::IngestError;
use crate::retrieval::SearchError;
use crate::store::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Holocron
#[derive(Error, Debug)]
pub enum HolocronError {
    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration validation errors
    #[error("Configuration validation failed: {errors:?}")]
    ConfigValidation { errors: Vec<ValidationError> },

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: PathBuf },

    /// Invalid configuration value
    #[error("Invalid configuration value at {path}: {message}")]
    InvalidConfigValue { path: String, message: String },

    /// IO errors
    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    /// TOML deserialization errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialization(#[from] toml::ser::Error),

    /// JSON errors
    #[error("JSON error: {context}: {source}")]
    Json {
        source: serde_json::Error,
        context: String,
    },

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Answer(#[from] AnswerError),

    /// Generic errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HolocronError {
    /// HTTP status class for this error.
    ///
    /// Callers use it to tell "index not ready" (503) apart from credential
    /// problems at the embedding provider (401) and everything else (500).
    pub fn status_code(&self) -> u16 {
        match self {
            HolocronError::Search(e) => e.status_code(),
            HolocronError::Embedding(e) => e.status_code(),
            HolocronError::Ingest(e) => e.status_code(),
            HolocronError::Answer(e) => e.status_code(),
            HolocronError::Store(StoreError::TableNotFound(_)) => 503,
            HolocronError::Corpus(CorpusError::UnknownCollection(_))
            | HolocronError::Corpus(CorpusError::EntityNotFound { .. }) => 404,
            _ => 500,
        }
    }
}

/// Configuration validation error
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// Path to the configuration key that failed validation
    pub path: String,
    /// Error message describing the validation failure
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for Holocron operations
pub type Result<T> = std::result::Result<T, HolocronError>;
