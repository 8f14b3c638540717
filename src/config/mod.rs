//! Configuration management for Holocron
//!
//! This module handles loading, validation, and management of configuration.
//! Every section has defaults, so an absent file yields a working offline-free
//! setup pointed at the hosted embeddings API.

use crate::error::{HolocronError, Result};
use crate::store::HnswParams;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Schema version written by `config init` and accepted by the validator
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub patterns: PatternsConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the index database; `~/` is expanded
    pub data_dir: PathBuf,
    /// Index database file name inside `data_dir`
    pub index_file: String,
    /// The JSON corpus
    pub corpus_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("~/.holocron"),
            index_file: "index.db".to_string(),
            corpus_path: PathBuf::from("database.json"),
        }
    }
}

impl StorageConfig {
    /// Absolute path of the index database
    pub fn index_path(&self) -> Result<PathBuf> {
        Ok(expand_path(&self.data_dir)?.join(&self.index_file))
    }

    pub fn corpus_path(&self) -> Result<PathBuf> {
        expand_path(&self.corpus_path)
    }
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai", "fastembed" or "hashing"
    pub provider: String,
    pub model: String,
    /// Output dimension; model default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dimension: Option<usize>,
    pub api_key_env: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Pause between embedding calls during ingestion
    pub request_delay_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 30,
            request_delay_ms: 100,
        }
    }
}

/// Indexing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexingConfig {
    pub table_name: String,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            table_name: "swapi_data".to_string(),
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
        }
    }
}

impl IndexingConfig {
    pub fn hnsw_params(&self) -> HnswParams {
        HnswParams {
            m: self.hnsw_m,
            ef_construction: self.hnsw_ef_construction,
            ef_search: self.hnsw_ef_search,
        }
    }
}

/// Hybrid retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Result count when a request does not give one
    pub default_limit: usize,
    /// Largest accepted limit
    pub max_limit: usize,
    /// Attribute queries fetch `limit * attribute_multiplier` candidates per path
    pub attribute_multiplier: usize,
    /// ...but never fewer than this
    pub attribute_min_candidates: usize,
    pub keyword_weight: f32,
    pub vector_weight: f32,
    /// Added when a record is found by both paths
    pub agreement_bonus: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 100,
            attribute_multiplier: 3,
            attribute_min_candidates: 15,
            keyword_weight: 0.7,
            vector_weight: 0.3,
            agreement_bonus: 0.2,
        }
    }
}

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Extra attempts at reading the corpus file
    pub read_retries: u32,
    /// First retry delay; doubles on every attempt
    pub retry_backoff_ms: u64,
    /// Start an ingestion run when a query finds no index
    pub auto_ingest: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            read_retries: 3,
            retry_backoff_ms: 500,
            auto_ingest: false,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Allowed CORS origins; `*` allows any
    pub cors_origins: Vec<String>,
    /// Buffered progress events per session
    pub progress_buffer: usize,
    /// SSE keep-alive interval
    pub keep_alive_secs: u64,
    /// How long a finished progress session still answers late subscribers
    pub progress_retention_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_origins: vec!["*".to_string()],
            progress_buffer: 64,
            keep_alive_secs: 15,
            progress_retention_secs: 60,
        }
    }
}

/// LLM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub enabled: bool,
    pub api_key_env: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Records retrieved as context for an answer
    pub context_size: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.1,
            max_tokens: 512,
            context_size: 5,
            timeout_secs: 60,
        }
    }
}

/// Pattern configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// Attribute vocabulary override; the bundled one when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes_file: Option<PathBuf>,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimension: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_enabled: Option<bool>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_inner(path, None)
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        Self::load_inner(path, Some(profile))
    }

    fn load_inner(path: &Path, profile: Option<&str>) -> Result<Self> {
        if !path.exists() {
            return Err(HolocronError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| HolocronError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        if let Some(profile) = profile {
            config.apply_profile(profile)?;
        }

        // Environment overrides win over profiles
        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| HolocronError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self.profiles.get(profile).cloned().ok_or_else(|| {
            HolocronError::Config(format!("Unknown profile: {}", profile))
        })?;

        if let Some(provider) = overrides.embedding_provider {
            self.embedding.provider = provider;
        }
        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(dimension) = overrides.embedding_dimension {
            self.embedding.dimension = Some(dimension);
        }
        if let Some(enabled) = overrides.llm_enabled {
            self.llm.enabled = enabled;
        }
        tracing::debug!("Applied profile '{}'", profile);
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: HOLOCRON_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(std::env::vars());
    }

    fn apply_overrides(&mut self, vars: impl IntoIterator<Item = (String, String)>) {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix("HOLOCRON_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => self.storage.data_dir = PathBuf::from(value),
            "STORAGE__CORPUS_PATH" => self.storage.corpus_path = PathBuf::from(value),
            "EMBEDDING__PROVIDER" => self.embedding.provider = value.to_string(),
            "EMBEDDING__MODEL" => self.embedding.model = value.to_string(),
            "EMBEDDING__DIMENSION" => self.embedding.dimension = Some(parse(path, value)?),
            "EMBEDDING__API_KEY_ENV" => self.embedding.api_key_env = value.to_string(),
            "EMBEDDING__BASE_URL" => self.embedding.base_url = value.to_string(),
            "EMBEDDING__REQUEST_DELAY_MS" => {
                self.embedding.request_delay_ms = parse(path, value)?
            }
            "INDEXING__TABLE_NAME" => self.indexing.table_name = value.to_string(),
            "INGEST__AUTO_INGEST" => self.ingest.auto_ingest = parse(path, value)?,
            "SERVER__HOST" => self.server.host = value.to_string(),
            "SERVER__PORT" => self.server.port = parse(path, value)?,
            "LLM__ENABLED" => self.llm.enabled = parse(path, value)?,
            "LLM__MODEL" => self.llm.model = value.to_string(),
            "PATTERNS__ATTRIBUTES_FILE" => {
                self.patterns.attributes_file = Some(PathBuf::from(value))
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| HolocronError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("holocron").join("config.toml"))
    }
}

fn parse<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| HolocronError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| HolocronError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| HolocronError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "offline".to_string(),
            ProfileOverrides {
                embedding_provider: Some("hashing".to_string()),
                embedding_model: Some("feature-hashing".to_string()),
                embedding_dimension: Some(384),
                llm_enabled: Some(false),
            },
        );
        profiles.insert(
            "local".to_string(),
            ProfileOverrides {
                embedding_provider: Some("fastembed".to_string()),
                embedding_model: Some("all-MiniLM-L6-v2".to_string()),
                embedding_dimension: None,
                llm_enabled: None,
            },
        );

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            indexing: IndexingConfig::default(),
            retrieval: RetrievalConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            patterns: PatternsConfig::default(),
            profiles,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let mut config = Config::default();
        config.server.port = 4100;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 4100);
        assert_eq!(loaded.indexing.table_name, "swapi_data");
        assert_eq!(loaded.profiles.len(), 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[_meta]
schema_version = "1.0.0"

[retrieval]
default_limit = 8
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.retrieval.default_limit, 8);
        assert_eq!(config.retrieval.attribute_min_candidates, 15);
        assert_eq!(config.embedding.request_delay_ms, 100);
    }

    #[test]
    fn test_missing_file() {
        let result = Config::load(Path::new("/nonexistent/holocron.toml"));
        assert!(matches!(result, Err(HolocronError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_apply_profile() {
        let mut config = Config::default();
        config.apply_profile("offline").unwrap();
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.embedding.dimension, Some(384));

        assert!(config.apply_profile("nope").is_err());
    }

    #[test]
    fn test_env_style_overrides() {
        let mut config = Config::default();
        config.apply_overrides(vec![
            ("HOLOCRON_SERVER__PORT".to_string(), "8088".to_string()),
            ("HOLOCRON_EMBEDDING__PROVIDER".to_string(), "hashing".to_string()),
            ("HOLOCRON_LLM__ENABLED".to_string(), "not-a-bool".to_string()),
            ("UNRELATED".to_string(), "x".to_string()),
        ]);
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.embedding.provider, "hashing");
        assert!(!config.llm.enabled);
    }

    #[test]
    fn test_expand_path() {
        let plain = expand_path(Path::new("/tmp/x")).unwrap();
        assert_eq!(plain, PathBuf::from("/tmp/x"));

        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path(Path::new("~/data")).unwrap(), home.join("data"));
        }
    }
}
