
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::embeddings::chunking::ChunkingConfig;
use crate::fetch::FetchConfig;
use crate::indexer::queue::QueueConfig;

/// Environment variable overriding the base directory
pub const HOME_ENV_VAR: &str = "DOCVAULT_HOME";

const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// Which embedding implementation turns chunk text into vectors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// Local ONNX sentence-transformer models
    #[default]
    Fastembed,
    /// Remote models served by an Ollama instance
    Ollama,
    /// Deterministic feature hashing, no model download required
    Hashing,
}

impl std::fmt::Display for EmbeddingBackend {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            EmbeddingBackend::Fastembed => write!(f, "fastembed"),
            EmbeddingBackend::Ollama => write!(f, "ollama"),
            EmbeddingBackend::Hashing => write!(f, "hashing"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub backend: EmbeddingBackend,
    /// Model identifier understood by the selected backend
    pub model: String,
    /// Number of texts encoded per model call
    pub batch_size: usize,
    /// Output dimension of the hashing backend; other backends report their own
    pub dimension: usize,
    pub ollama: OllamaConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: EmbeddingBackend::Fastembed,
            model: "all-MiniLM-L6-v2".to_string(),
            batch_size: 32,
            dimension: 384,
            ollama: OllamaConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub timeout_seconds: u64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryConfig {
    /// Number of matches returned when the caller does not ask for a specific count
    pub default_k: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self { default_k: 5 }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1024)")]
    InvalidBatchSize(usize),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 8 and 4096)")]
    InvalidEmbeddingDimension(usize),
    #[error("Invalid chunk size: {0} (must be between 2 and 100000 characters)")]
    InvalidChunkSize(usize),
    #[error("Chunk overlap ({0}) must be smaller than chunk size ({1})")]
    OverlapTooLarge(usize, usize),
    #[error("Invalid default result count: {0} (must be between 1 and 1000)")]
    InvalidDefaultK(usize),
    #[error("Invalid job attempt limit: {0} (must be between 1 and 20)")]
    InvalidMaxAttempts(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 86400 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid heartbeat interval: {0}ms (must be between 1 and the job timeout of {1}ms)")]
    InvalidHeartbeatInterval(u64, u64),
    #[error("Invalid user agent (cannot be empty)")]
    InvalidUserAgent,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            embedding: EmbeddingConfig::default(),
            chunking: ChunkingConfig::default(),
            query: QueryConfig::default(),
            queue: QueueConfig::default(),
            fetch: FetchConfig::default(),
            base_dir: Self::config_dir().unwrap_or_else(|_| PathBuf::from(".docvault")),
        }
    }
}

impl Config {
    /// Resolve the default base directory: `$DOCVAULT_HOME`, else the platform config dir
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
            return Ok(PathBuf::from(home));
        }

        dirs::config_dir()
            .map(|dir| dir.join("docvault"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join(CONFIG_FILE_NAME);

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    /// Get the base directory for the application
    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.embedding.validate()?;
        self.validate_chunking_config()?;

        if !(1..=1000).contains(&self.query.default_k) {
            return Err(ConfigError::InvalidDefaultK(self.query.default_k));
        }

        if !(1..=20).contains(&self.queue.max_attempts) {
            return Err(ConfigError::InvalidMaxAttempts(self.queue.max_attempts));
        }

        if !(1..=86_400).contains(&self.queue.processing_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(
                self.queue.processing_timeout_seconds,
            ));
        }

        let timeout_ms = self.queue.processing_timeout_seconds.saturating_mul(1000);
        if self.queue.heartbeat_interval_ms == 0 || self.queue.heartbeat_interval_ms >= timeout_ms {
            return Err(ConfigError::InvalidHeartbeatInterval(
                self.queue.heartbeat_interval_ms,
                timeout_ms,
            ));
        }

        if !(1..=86_400).contains(&self.fetch.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.fetch.timeout_seconds));
        }

        if self.fetch.user_agent.trim().is_empty() {
            return Err(ConfigError::InvalidUserAgent);
        }

        Ok(())
    }

    fn validate_chunking_config(&self) -> Result<(), ConfigError> {
        let config = &self.chunking;

        if !(2..=100_000).contains(&config.chunk_size) {
            return Err(ConfigError::InvalidChunkSize(config.chunk_size));
        }

        if config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::OverlapTooLarge(
                config.chunk_overlap,
                config.chunk_size,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join(CONFIG_FILE_NAME)
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Directory holding uploaded and fetched document bytes
    #[inline]
    pub fn documents_dir(&self) -> PathBuf {
        self.get_base_dir().join("documents")
    }

    /// Directory holding persisted index pairs
    #[inline]
    pub fn indexes_dir(&self) -> PathBuf {
        self.get_base_dir().join("indexes")
    }

    /// Download cache for local embedding models
    #[inline]
    pub fn models_dir(&self) -> PathBuf {
        self.get_base_dir().join("models")
    }
}

impl EmbeddingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(1..=1024).contains(&self.batch_size) {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if self.backend == EmbeddingBackend::Hashing && !(8..=4096).contains(&self.dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(self.dimension));
        }

        if self.backend == EmbeddingBackend::Ollama {
            self.ollama.validate()?;
        }

        Ok(())
    }

    /// Stable identifier recorded next to every index built with this configuration
    #[inline]
    pub fn model_id(&self) -> String {
        match self.backend {
            EmbeddingBackend::Hashing => format!("hashing/{}-{}", self.model, self.dimension),
            backend => format!("{}/{}", backend, self.model),
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if !(1..=86_400).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }
}
