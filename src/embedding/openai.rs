//! OpenAI embeddings API provider

use super::{EmbeddingError, EmbeddingProvider};
use crate::config::EmbeddingConfig;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Characters of a bad response body kept in logs and errors
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Hosted embeddings over HTTPS
pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    endpoint: String,
    model: String,
    dimension: usize,
    /// Sent as `dimensions` when it differs from the model default
    custom_dimension: Option<usize>,
}

impl OpenAiProvider {
    /// Create a provider for `model` at `base_url` (e.g. `https://api.openai.com/v1`)
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        dimension: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::Authentication(
                "API key is empty".to_string(),
            ));
        }

        let default_dimension = Self::default_dimension(&model);
        let dimension = dimension.or(default_dimension).ok_or_else(|| {
            EmbeddingError::Initialization(format!(
                "Unknown dimension for model '{}'; set embedding.dimension",
                model
            ))
        })?;
        let custom_dimension = (Some(dimension) != default_dimension).then_some(dimension);

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Initialization(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model,
            dimension,
            custom_dimension,
        })
    }

    /// Build from config, reading the key from `embedding.api_key_env`
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            EmbeddingError::Authentication(format!(
                "Environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        Self::new(
            api_key,
            config.model.clone(),
            &config.base_url,
            config.dimension,
            Duration::from_secs(config.timeout_secs),
        )
    }

    fn default_dimension(model: &str) -> Option<usize> {
        match model {
            "text-embedding-3-small" | "text-embedding-ada-002" => Some(1536),
            "text-embedding-3-large" => Some(3072),
            _ => None,
        }
    }
}

/// Error for a non-success HTTP status
pub(crate) fn classify_status(status: u16, body: &str) -> EmbeddingError {
    let detail = api_error_message(body).unwrap_or_else(|| preview(body));
    match status {
        401 | 403 => EmbeddingError::Authentication(detail),
        429 => EmbeddingError::RateLimited(detail),
        500..=599 => EmbeddingError::Unavailable(format!("HTTP {}: {}", status, detail)),
        400 | 413 | 422 => EmbeddingError::InvalidInput(detail),
        _ => EmbeddingError::Generation(format!("HTTP {}: {}", status, detail)),
    }
}

/// `error.message` of an API error body, when it has one
fn api_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

fn preview(body: &str) -> String {
    body.chars().take(PREVIEW_CHARS).collect()
}

/// First embedding of a success body, checked against `expected` dimensions
pub(crate) fn parse_response(body: &str, expected: usize) -> Result<Vec<f32>, EmbeddingError> {
    let response: EmbeddingResponse = serde_json::from_str(body).map_err(|e| {
        let preview = preview(body);
        tracing::error!(
            line = e.line(),
            column = e.column(),
            byte_len = body.len(),
            preview = %preview,
            "Malformed embedding response: {}",
            e
        );
        EmbeddingError::MalformedResponse {
            line: e.line(),
            column: e.column(),
            byte_len: body.len(),
            preview,
            message: e.to_string(),
        }
    })?;

    let embedding = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| EmbeddingError::Generation("No embedding in response".to_string()))?
        .embedding;

    if embedding.len() != expected {
        return Err(EmbeddingError::DimensionMismatch {
            expected,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("Empty text".to_string()));
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
            dimensions: self.custom_dimension,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Embedding request to {} failed: {}", self.endpoint, e);
                EmbeddingError::Unavailable(e.to_string())
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            let error = classify_status(status.as_u16(), &body);
            tracing::warn!(
                status = status.as_u16(),
                model = %self.model,
                "Embedding request rejected: {}",
                error
            );
            return Err(error);
        }

        parse_response(&body, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(dimension: Option<usize>) -> Result<OpenAiProvider, EmbeddingError> {
        OpenAiProvider::new(
            "sk-test".to_string(),
            "text-embedding-3-small".to_string(),
            "https://api.openai.com/v1/",
            dimension,
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_default_dimension() {
        let provider = provider(None).unwrap();
        assert_eq!(provider.dimension(), 1536);
        assert_eq!(provider.custom_dimension, None);
        assert_eq!(provider.endpoint, "https://api.openai.com/v1/embeddings");

        let reduced = self::provider(Some(512)).unwrap();
        assert_eq!(reduced.dimension(), 512);
        assert_eq!(reduced.custom_dimension, Some(512));
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = OpenAiProvider::new(
            "  ".to_string(),
            "text-embedding-3-small".to_string(),
            "https://api.openai.com/v1",
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(EmbeddingError::Authentication(_))));
    }

    #[test]
    fn test_unknown_model_needs_dimension() {
        let result = OpenAiProvider::new(
            "sk-test".to_string(),
            "custom-model".to_string(),
            "http://localhost:8080/v1",
            None,
            Duration::from_secs(5),
        );
        assert!(matches!(result, Err(EmbeddingError::Initialization(_))));
    }

    #[test]
    fn test_classify_status() {
        let body = r#"{"error": {"message": "Incorrect API key provided"}}"#;
        match classify_status(401, body) {
            EmbeddingError::Authentication(message) => {
                assert_eq!(message, "Incorrect API key provided")
            }
            other => panic!("unexpected: {other}"),
        }
        assert!(matches!(
            classify_status(429, "slow down"),
            EmbeddingError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(502, "<html>bad gateway</html>"),
            EmbeddingError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(400, "{}"),
            EmbeddingError::InvalidInput(_)
        ));
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"object": "list", "data": [{"embedding": [0.1, 0.2, 0.3], "index": 0}]}"#;
        assert_eq!(parse_response(body, 3).unwrap(), vec![0.1, 0.2, 0.3]);
        assert!(matches!(
            parse_response(body, 4),
            Err(EmbeddingError::DimensionMismatch {
                expected: 4,
                actual: 3
            })
        ));
        assert!(matches!(
            parse_response(r#"{"data": []}"#, 3),
            Err(EmbeddingError::Generation(_))
        ));
    }

    #[test]
    fn test_malformed_response_keeps_position() {
        let body = "{\"data\": [{\"embedding\": [0.1,";
        match parse_response(body, 3) {
            Err(EmbeddingError::MalformedResponse {
                line,
                byte_len,
                preview,
                ..
            }) => {
                assert_eq!(line, 1);
                assert_eq!(byte_len, body.len());
                assert_eq!(preview, body);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    #[ignore] // Requires OPENAI_API_KEY and network access
    async fn test_live_embedding() {
        let config = EmbeddingConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            ..EmbeddingConfig::default()
        };
        let provider = OpenAiProvider::from_config(&config).unwrap();
        let embedding = provider.embed("Luke Skywalker").await.unwrap();
        assert_eq!(embedding.len(), 1536);
    }
}
