//! Configuration management for the hybrid document QA core

use serde::{Deserialize, Serialize};

/// Root configuration for the core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Language model configuration
    pub llm: LlmSettings,

    /// Vector (prose) substrate configuration
    pub vector: VectorSettings,

    /// Relational (table) substrate configuration
    pub relational: RelationalSettings,

    /// Cache sizing configuration
    #[serde(default)]
    pub cache: CacheSettings,

    /// Deadline configuration
    #[serde(default)]
    pub deadlines: DeadlineSettings,

    /// Maximum size in bytes for an uploaded PDF
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// HTTP server bind settings
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}

/// Language model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Ollama server URL
    pub ollama_url: String,

    /// Model used for all four LLM call sites (classification, schema
    /// inference, SQL generation, answer/combination)
    pub model_name: String,

    /// Model used for embeddings
    pub embedding_model_name: String,

    /// Embedding dimension; must match the vector substrate's index
    pub embedding_dimension: usize,

    /// Maximum tokens for generation
    pub max_tokens: u32,

    /// Temperature for generation
    pub temperature: f32,

    /// Request timeout in seconds, per outbound call
    pub request_timeout_seconds: u64,

    /// LLM response cache configuration
    #[serde(default)]
    pub cache: crate::cache::LlmCacheConfig,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            ollama_url: "http://localhost:11434".to_string(),
            model_name: "llama3.2".to_string(),
            embedding_model_name: "nomic-embed-text".to_string(),
            embedding_dimension: 768,
            max_tokens: 2048,
            temperature: 0.2,
            request_timeout_seconds: 30,
            cache: crate::cache::LlmCacheConfig::default(),
        }
    }
}

/// Vector (prose) substrate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSettings {
    /// SQLite database URL for the embedding store
    pub database_url: String,

    /// Minimum number of neighbors to return before widening the search
    pub min_k: usize,

    /// Maximum number of neighbors ever returned
    pub max_k: usize,

    /// Similarity threshold below which a neighbor is discarded
    pub similarity_threshold: f32,

    /// Maximum connections in the pool
    pub max_connections: u32,
}

impl Default for VectorSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:vector_store.db".to_string(),
            min_k: 3,
            max_k: 12,
            similarity_threshold: 0.3,
            max_connections: 20,
        }
    }
}

/// Relational (table) substrate configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationalSettings {
    /// SQLite database URL for the typed table store
    pub database_url: String,

    /// Path to the schema registry JSON file
    pub schema_registry_path: String,

    /// Maximum connections in the pool
    pub max_connections: u32,

    /// Number of leading rows shown to the schema inferrer
    pub inference_sample_rows: usize,
}

impl Default for RelationalSettings {
    fn default() -> Self {
        Self {
            database_url: "sqlite:tables.db".to_string(),
            schema_registry_path: "schema_registry.json".to_string(),
            max_connections: 20,
            inference_sample_rows: 3,
        }
    }
}

/// Cache sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Maximum entries in the schema cache
    #[serde(default = "default_schema_cache_size")]
    pub schema_cache_size: usize,

    /// Maximum entries in the classification cache
    #[serde(default = "default_classification_cache_size")]
    pub classification_cache_size: usize,
}

fn default_schema_cache_size() -> usize {
    256
}

fn default_classification_cache_size() -> usize {
    512
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            schema_cache_size: default_schema_cache_size(),
            classification_cache_size: default_classification_cache_size(),
        }
    }
}

/// Deadline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadlineSettings {
    /// Deadline for a single `answer` call
    #[serde(default = "default_query_deadline")]
    pub query_deadline_seconds: u64,

    /// Deadline for a single `ingest` call
    #[serde(default = "default_ingest_deadline")]
    pub ingest_deadline_seconds: u64,
}

fn default_query_deadline() -> u64 {
    120
}

fn default_ingest_deadline() -> u64 {
    600
}

impl Default for DeadlineSettings {
    fn default() -> Self {
        Self {
            query_deadline_seconds: default_query_deadline(),
            ingest_deadline_seconds: default_ingest_deadline(),
        }
    }
}

/// HTTP server bind configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Bind address
    #[serde(default = "default_host")]
    pub host: String,

    /// Bind port
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            llm: LlmSettings::default(),
            vector: VectorSettings::default(),
            relational: RelationalSettings::default(),
            cache: CacheSettings::default(),
            deadlines: DeadlineSettings::default(),
            max_upload_bytes: default_max_upload_bytes(),
            server: ServerSettings::default(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from a file, dispatching on extension
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file, dispatching on extension
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("Unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Build a default configuration overridden by `CORE_`-prefixed environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("CORE_OLLAMA_URL") {
            config.llm.ollama_url = v;
        }
        if let Ok(v) = std::env::var("CORE_LLM_MODEL_NAME") {
            config.llm.model_name = v;
        }
        if let Ok(v) = std::env::var("CORE_EMBEDDING_MODEL_NAME") {
            config.llm.embedding_model_name = v;
        }
        if let Ok(v) = std::env::var("CORE_VECTOR_DATABASE_URL") {
            config.vector.database_url = v;
        }
        if let Ok(v) = std::env::var("CORE_RELATIONAL_DATABASE_URL") {
            config.relational.database_url = v;
        }
        if let Ok(v) = std::env::var("CORE_QUERY_DEADLINE_SECONDS") {
            if let Ok(parsed) = v.parse() {
                config.deadlines.query_deadline_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var("CORE_INGEST_DEADLINE_SECONDS") {
            if let Ok(parsed) = v.parse() {
                config.deadlines.ingest_deadline_seconds = parsed;
            }
        }
        if let Ok(v) = std::env::var("CORE_MAX_UPLOAD_BYTES") {
            if let Ok(parsed) = v.parse() {
                config.max_upload_bytes = parsed;
            }
        }
        if let Ok(v) = std::env::var("CORE_SERVER_HOST") {
            config.server.host = v;
        }
        if let Ok(v) = std::env::var("CORE_SERVER_PORT") {
            if let Ok(parsed) = v.parse() {
                config.server.port = parsed;
            }
        }

        config
    }

    /// Validate the configuration, rejecting nonsensical values
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.llm.ollama_url.starts_with("http") {
            return Err(anyhow::anyhow!(
                "Invalid Ollama URL: {}",
                self.llm.ollama_url
            ));
        }

        if self.llm.model_name.is_empty() {
            return Err(anyhow::anyhow!("LLM model name cannot be empty"));
        }

        if self.llm.embedding_model_name.is_empty() {
            return Err(anyhow::anyhow!("Embedding model name cannot be empty"));
        }

        if self.llm.embedding_dimension != 768 {
            return Err(anyhow::anyhow!(
                "Embedding dimension must be 768, got {}",
                self.llm.embedding_dimension
            ));
        }

        if self.vector.similarity_threshold < 0.0 || self.vector.similarity_threshold > 1.0 {
            return Err(anyhow::anyhow!(
                "Similarity threshold must be between 0.0 and 1.0"
            ));
        }

        if self.vector.min_k == 0 || self.vector.max_k < self.vector.min_k {
            return Err(anyhow::anyhow!("Invalid min_k/max_k configuration"));
        }

        if self.deadlines.query_deadline_seconds == 0 {
            return Err(anyhow::anyhow!("query_deadline_seconds must be positive"));
        }

        if self.deadlines.ingest_deadline_seconds == 0 {
            return Err(anyhow::anyhow!("ingest_deadline_seconds must be positive"));
        }

        if self.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("max_upload_bytes must be positive"));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CoreConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.llm.ollama_url, "http://localhost:11434");
        assert_eq!(config.llm.embedding_dimension, 768);
    }

    #[test]
    fn test_config_validation_rejects_bad_url() {
        let mut config = CoreConfig::default();
        config.llm.ollama_url = "not-a-url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_wrong_dimension() {
        let mut config = CoreConfig::default();
        config.llm.embedding_dimension = 384;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_zero_deadlines() {
        let mut config = CoreConfig::default();
        config.deadlines.query_deadline_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_rejects_empty_model() {
        let mut config = CoreConfig::default();
        config.llm.model_name = String::new();
        assert!(config.validate().is_err());
    }
}
