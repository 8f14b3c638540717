//! Embedding providers
//!
//! Architecture:
//! - `EmbeddingProvider` trait for abstraction over remote and local backends
//! - `OpenAiProvider` for the hosted embeddings API (text-embedding-3-small, 1536-dim)
//! - `FastEmbedProvider` for local ONNX models (all-MiniLM-L6-v2, 384-dim)
//! - `HashingProvider` for offline, deterministic feature hashing

mod fastembed_provider;
mod hashing;
mod openai;

pub use fastembed_provider::FastEmbedProvider;
pub use hashing::HashingProvider;
pub use openai::OpenAiProvider;

use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("Embedding provider rejected credentials: {0}")]
    Authentication(String),

    #[error("Embedding provider rate limit hit: {0}")]
    RateLimited(String),

    #[error("Embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("Malformed embedding response at line {line}, column {column} ({byte_len} bytes): {message}")]
    MalformedResponse {
        line: usize,
        column: usize,
        byte_len: usize,
        preview: String,
        message: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding generation failed: {0}")]
    Generation(String),

    #[error("Model initialization failed: {0}")]
    Initialization(String),
}

impl EmbeddingError {
    /// HTTP status class for this error
    pub fn status_code(&self) -> u16 {
        match self {
            EmbeddingError::Authentication(_) => 401,
            EmbeddingError::RateLimited(_) | EmbeddingError::Unavailable(_) => 503,
            EmbeddingError::InvalidInput(_) => 400,
            _ => 500,
        }
    }

    /// Errors that make every further call fail the same way
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Authentication(_)
                | EmbeddingError::DimensionMismatch { .. }
                | EmbeddingError::Initialization(_)
        )
    }
}

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Provider selected by `embedding.provider`
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>, EmbeddingError> {
    let provider: Arc<dyn EmbeddingProvider> = match config.provider.as_str() {
        "openai" => Arc::new(OpenAiProvider::from_config(config)?),
        "fastembed" => Arc::new(FastEmbedProvider::new(&config.model)?),
        "hashing" => Arc::new(HashingProvider::new(
            config.dimension.unwrap_or(HashingProvider::DEFAULT_DIMENSION),
        )?),
        other => {
            return Err(EmbeddingError::Initialization(format!(
                "Unknown embedding provider '{}'. Supported: openai, fastembed, hashing",
                other
            )))
        }
    };

    tracing::info!(
        "Using embedding provider '{}' ({}, {}D)",
        config.provider,
        provider.model_name(),
        provider.dimension()
    );
    Ok(provider)
}
