
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::crawler::CrawlerConfig;
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;

const CONFIG_DIR_NAME: &str = ".shop-rag";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub ollama: OllamaConfig,
    pub completion: CompletionConfig,
    pub crawler: CrawlerConfig,
    pub index: IndexConfig,
    pub memory: MemoryConfig,
    pub documents: DocumentsConfig,
    pub support: SupportConfig,
    pub assistant: AssistantConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    #[inline]
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "nomic-embed-text:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

/// OpenAI-compatible chat completion service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    /// Sent as the `HTTP-Referer` header
    pub referer: String,
    /// Sent as the `X-Title` header
    pub app_title: String,
}

impl Default for CompletionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1/".to_string(),
            model: "moonshotai/kimi-k2:free".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 2000,
            timeout_seconds: 60,
            referer: "https://emvidros.com.br".to_string(),
            app_title: "EM Vidros AI Assistant".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IndexConfig {
    pub collection: String,
    pub top_k: usize,
    /// Characters of each source shown in chat responses
    pub preview_chars: usize,
}

impl Default for IndexConfig {
    #[inline]
    fn default() -> Self {
        Self {
            collection: "emvidros_docs".to_string(),
            top_k: 5,
            preview_chars: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MemoryConfig {
    /// Messages of history loaded per chat turn
    pub max_history: u32,
    /// Age in days after which `sessions prune` deletes a session
    pub retention_days: u32,
}

impl Default for MemoryConfig {
    #[inline]
    fn default() -> Self {
        Self {
            max_history: 10,
            retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DocumentsConfig {
    /// Folder of documents to load; relative paths are resolved against the config directory
    pub context_dir: PathBuf,
    pub min_content_length: usize,
}

impl Default for DocumentsConfig {
    #[inline]
    fn default() -> Self {
        Self {
            context_dir: PathBuf::from("context"),
            min_content_length: crate::content::DEFAULT_MIN_CONTENT_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SupportConfig {
    pub email: String,
}

impl Default for SupportConfig {
    #[inline]
    fn default() -> Self {
        Self {
            email: "suporte@emvidros.com.br".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AssistantConfig {
    pub company_name: String,
}

impl Default for AssistantConfig {
    #[inline]
    fn default() -> Self {
        Self {
            company_name: "EM Vidros".to_string(),
        }
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
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid temperature: {0} (must be between 0.0 and 2.0)")]
    InvalidTemperature(f32),
    #[error("Invalid max tokens: {0} (must be greater than 0)")]
    InvalidMaxTokens(u32),
    #[error("Invalid page budget: {0} (must be at least 1)")]
    InvalidMaxPages(usize),
    #[error("Invalid crawler batch size: {0} (must be between 1 and 64)")]
    InvalidCrawlerBatchSize(usize),
    #[error("Invalid collection name: {0:?} (cannot be empty)")]
    InvalidCollection(String),
    #[error("Invalid top-k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid max history: {0} (must be at least 1)")]
    InvalidMaxHistory(u32),
    #[error("Invalid support email: {0}")]
    InvalidEmail(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Default configuration directory, `~/.shop-rag`
    #[inline]
    pub fn default_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_DIR_NAME))
            .ok_or(ConfigError::DirectoryError)
    }

    /// Load `config.toml` from `config_dir`; a missing file yields defaults
    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

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
        self.ollama.validate()?;
        self.completion.validate()?;
        self.validate_crawler()?;

        if self.index.collection.trim().is_empty() {
            return Err(ConfigError::InvalidCollection(self.index.collection.clone()));
        }
        if !(1..=100).contains(&self.index.top_k) {
            return Err(ConfigError::InvalidTopK(self.index.top_k));
        }
        if self.memory.max_history == 0 {
            return Err(ConfigError::InvalidMaxHistory(self.memory.max_history));
        }
        if !self.support.email.contains('@') {
            return Err(ConfigError::InvalidEmail(self.support.email.clone()));
        }

        Ok(())
    }

    fn validate_crawler(&self) -> Result<(), ConfigError> {
        let crawler = &self.crawler;

        crate::crawler::validate_url(&crawler.base_url)
            .map_err(|_| ConfigError::InvalidUrl(crawler.base_url.clone()))?;

        if crawler.max_pages == 0 {
            return Err(ConfigError::InvalidMaxPages(crawler.max_pages));
        }

        if !(1..=64).contains(&crawler.batch_size) {
            return Err(ConfigError::InvalidCrawlerBatchSize(crawler.batch_size));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite session database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("sessions.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    /// Folder of documents for `load`, resolved against the config directory
    #[inline]
    pub fn context_dir(&self) -> PathBuf {
        if self.documents.context_dir.is_absolute() {
            self.documents.context_dir.clone()
        } else {
            self.get_base_dir().join(&self.documents.context_dir)
        }
    }

    /// Completion API key read from the configured environment variable
    #[inline]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.completion.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl OllamaConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        self.ollama_url()?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    #[inline]
    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    #[inline]
    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.ollama_url()?;
        self.host = host;
        Ok(())
    }

    #[inline]
    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_batch_size(&mut self, batch_size: u32) -> Result<(), ConfigError> {
        if batch_size == 0 || batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }
        self.batch_size = batch_size;
        Ok(())
    }

    #[inline]
    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl CompletionConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = Url::parse(&self.base_url)
            .map_err(|_| ConfigError::InvalidUrl(self.base_url.clone()))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidProtocol(url.scheme().to_string()));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidTemperature(self.temperature));
        }

        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidMaxTokens(self.max_tokens));
        }

        Ok(())
    }

    #[inline]
    pub fn set_base_url(&mut self, base_url: String) -> Result<(), ConfigError> {
        let temp_config = CompletionConfig {
            base_url: base_url.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.base_url = base_url;
        Ok(())
    }

    #[inline]
    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    #[inline]
    pub fn set_temperature(&mut self, temperature: f32) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidTemperature(temperature));
        }
        self.temperature = temperature;
        Ok(())
    }
}
