use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{HolocronError, Result, ValidationError};

const EMBEDDING_PROVIDERS: [&str; 3] = ["openai", "fastembed", "hashing"];

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, reporting every problem at once
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_retrieval(config, &mut errors);
        Self::validate_server(config, &mut errors);
        Self::validate_llm(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HolocronError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        // Existence is checked at ingestion time; the file may be written later
        if config.storage.corpus_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.corpus_path",
                "Corpus path cannot be empty",
            ));
        }
        if config.storage.index_file.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.index_file",
                "Index file name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        let provider = config.embedding.provider.as_str();
        if !EMBEDDING_PROVIDERS.contains(&provider) {
            errors.push(ValidationError::new(
                "embedding.provider",
                format!(
                    "Provider must be one of {:?}, got '{}'",
                    EMBEDDING_PROVIDERS, provider
                ),
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == Some(0) {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Dimension must be greater than 0",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Timeout must be greater than 0",
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let name = &config.indexing.table_name;
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            errors.push(ValidationError::new(
                "indexing.table_name",
                format!("Table name must be non-empty [A-Za-z0-9_], got '{}'", name),
            ));
        }

        if config.indexing.hnsw_ef_construction == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.indexing.hnsw_m == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_m",
                "HNSW M must be greater than 0",
            ));
        }

        if config.indexing.hnsw_ef_search == 0 {
            errors.push(ValidationError::new(
                "indexing.hnsw_ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }
    }

    fn validate_retrieval(config: &Config, errors: &mut Vec<ValidationError>) {
        let retrieval = &config.retrieval;

        if retrieval.default_limit == 0 {
            errors.push(ValidationError::new(
                "retrieval.default_limit",
                "Default limit must be greater than 0",
            ));
        }
        if retrieval.max_limit < retrieval.default_limit {
            errors.push(ValidationError::new(
                "retrieval.max_limit",
                format!(
                    "Max limit {} is below default limit {}",
                    retrieval.max_limit, retrieval.default_limit
                ),
            ));
        }
        if retrieval.attribute_multiplier == 0 {
            errors.push(ValidationError::new(
                "retrieval.attribute_multiplier",
                "Attribute multiplier must be greater than 0",
            ));
        }

        for (path, weight) in [
            ("retrieval.keyword_weight", retrieval.keyword_weight),
            ("retrieval.vector_weight", retrieval.vector_weight),
            ("retrieval.agreement_bonus", retrieval.agreement_bonus),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                errors.push(ValidationError::new(
                    path,
                    format!("Weight must be between 0.0 and 1.0, got {}", weight),
                ));
            }
        }
    }

    fn validate_server(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.server.host.trim().is_empty() {
            errors.push(ValidationError::new("server.host", "Host cannot be empty"));
        }
        if config.server.progress_buffer == 0 {
            errors.push(ValidationError::new(
                "server.progress_buffer",
                "Progress buffer must be greater than 0",
            ));
        }
    }

    fn validate_llm(config: &Config, errors: &mut Vec<ValidationError>) {
        // If LLM is enabled, validate API key environment variable is set
        if config.llm.enabled {
            let env_var = &config.llm.api_key_env;
            match std::env::var(env_var) {
                Ok(key) if key.is_empty() => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is empty", env_var),
                )),
                Ok(_) => {}
                Err(_) => errors.push(ValidationError::new(
                    "llm.api_key_env",
                    format!("Environment variable {} is not set", env_var),
                )),
            }
        }

        let temp = config.llm.temperature;
        if !(0.0..=2.0).contains(&temp) {
            errors.push(ValidationError::new(
                "llm.temperature",
                format!("Temperature must be between 0.0 and 2.0, got {}", temp),
            ));
        }

        if config.llm.context_size == 0 {
            errors.push(ValidationError::new(
                "llm.context_size",
                "Context size must be greater than 0",
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_config() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_invalid_provider() {
        let mut config = Config::default();
        config.embedding.provider = "word2vec".to_string();
        assert!(ConfigValidator::validate(&config).is_err());
    }

    #[test]
    fn test_collects_every_error() {
        let mut config = Config::default();
        config.meta.schema_version = "0.9.0".to_string();
        config.retrieval.keyword_weight = 1.5;
        config.indexing.table_name = "bad name".to_string();

        match ConfigValidator::validate(&config) {
            Err(HolocronError::ConfigValidation { errors }) => {
                let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "_meta.schema_version",
                        "indexing.table_name",
                        "retrieval.keyword_weight"
                    ]
                );
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_limits() {
        let mut config = Config::default();
        config.retrieval.max_limit = 2;
        assert!(ConfigValidator::validate(&config).is_err());
    }
}
