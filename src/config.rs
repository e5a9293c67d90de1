//! Configuration management for the analysis core

use crate::error::{FatalError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the analysis core
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Root directory for artifacts, comparisons, vectors and uploads
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Vector store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Text chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Taxonomy, rule set and indicator bank sources
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Per-stage wall-clock budgets
    #[serde(default)]
    pub stages: StageTimeouts,

    /// Worker pool for the post-classification stages
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Retry policy for dependency calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Document extraction configuration
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Validation thresholds
    #[serde(default)]
    pub validation: ValidationConfig,

    /// HTTP adapter configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Providers in preference order; the first healthy one wins
    pub providers: Vec<ProviderConfig>,

    /// Embedding dimension shared by every collection
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Maximum texts per embedding batch call
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

/// A single embedding provider entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider kind
    pub kind: ProviderKind,

    /// Model name passed to the provider
    pub model: String,

    /// Endpoint URL; defaults depend on the kind
    #[serde(default)]
    pub endpoint: Option<String>,

    /// API key for remote providers
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-call budget in milliseconds
    #[serde(default = "default_provider_timeout_ms")]
    pub timeout_ms: u64,
}

/// Supported provider kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible `/v1/embeddings` endpoint
    Remote,
    /// Ollama `/api/embeddings` endpoint
    Local,
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database file under the data root; `:memory:` for tests
    #[serde(default = "default_store_file")]
    pub database_file: String,

    /// Maximum results returned by a similarity query
    #[serde(default = "default_max_query_results")]
    pub max_query_results: usize,
}

/// Text chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Target window size in characters
    #[serde(default = "default_chunk_window")]
    pub window: usize,

    /// Overlap between consecutive windows in characters
    #[serde(default = "default_chunk_overlap")]
    pub overlap: usize,
}

/// Sources for the taxonomy, compliance rules and risk indicators.
/// Unset paths fall back to the embedded defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Path to the 9-section taxonomy table
    #[serde(default)]
    pub taxonomy_path: Option<PathBuf>,

    /// Path to the compliance rule sets by document type
    #[serde(default)]
    pub rules_path: Option<PathBuf>,

    /// Path to the risk indicator banks
    #[serde(default)]
    pub indicators_path: Option<PathBuf>,
}

/// Per-stage wall-clock budgets in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTimeouts {
    #[serde(default = "default_stage_timeout_ms")]
    pub extracting_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub chunking_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub classifying_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub validating_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub risk_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub ruc_ms: u64,
    #[serde(default = "default_stage_timeout_ms")]
    pub aggregating_ms: u64,
}

impl StageTimeouts {
    /// Budget for a stage by its wire name
    pub fn budget(&self, stage: &str) -> Duration {
        let ms = match stage {
            "extracting" => self.extracting_ms,
            "chunking" => self.chunking_ms,
            "classifying" => self.classifying_ms,
            "validating" => self.validating_ms,
            "risk" => self.risk_ms,
            "ruc" => self.ruc_ms,
            "aggregating" => self.aggregating_ms,
            _ => default_stage_timeout_ms(),
        };
        Duration::from_millis(ms)
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Pool size; clamped to min(pool_size, available cores) at startup
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

/// Retry policy for dependency calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider before moving on
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Base delay for exponential backoff in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub base_delay_ms: u64,
}

/// Document extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Out-of-process converter for DOCX/XLSX, e.g. ["libreoffice", "--headless", "--convert-to", "txt"]
    #[serde(default = "default_converter_command")]
    pub converter_command: Vec<String>,

    /// Optional OCR command for image-only PDF pages
    #[serde(default)]
    pub ocr_command: Option<Vec<String>>,

    /// Minimum characters per page before the OCR fallback kicks in
    #[serde(default = "default_density_threshold")]
    pub page_text_density_threshold: usize,
}

/// Validation thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Minimum character counts for adequate length, by detected type
    #[serde(default = "default_min_chars_pliego")]
    pub min_chars_pliego: usize,
    #[serde(default = "default_min_chars_propuesta")]
    pub min_chars_propuesta: usize,
    #[serde(default = "default_min_chars_contrato")]
    pub min_chars_contrato: usize,
    #[serde(default = "default_min_chars_desconocido")]
    pub min_chars_desconocido: usize,
}

/// HTTP adapter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("data")
}

fn default_dimension() -> usize {
    768
}

fn default_batch_size() -> usize {
    32
}

fn default_provider_timeout_ms() -> u64 {
    30_000
}

fn default_store_file() -> String {
    "vectors/store.db".to_string()
}

fn default_max_query_results() -> usize {
    10
}

fn default_chunk_window() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_stage_timeout_ms() -> u64 {
    120_000
}

fn default_pool_size() -> usize {
    3
}

fn default_max_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    500
}

fn default_converter_command() -> Vec<String> {
    vec![
        "libreoffice".to_string(),
        "--headless".to_string(),
        "--convert-to".to_string(),
        "txt:Text".to_string(),
    ]
}

fn default_density_threshold() -> usize {
    120
}

fn default_min_chars_pliego() -> usize {
    3000
}

fn default_min_chars_propuesta() -> usize {
    2500
}

fn default_min_chars_contrato() -> usize {
    2000
}

fn default_min_chars_desconocido() -> usize {
    1500
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            providers: vec![ProviderConfig {
                kind: ProviderKind::Local,
                model: "nomic-embed-text".to_string(),
                endpoint: Some("http://localhost:11434".to_string()),
                api_key: None,
                timeout_ms: default_provider_timeout_ms(),
            }],
            dimension: default_dimension(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_file: default_store_file(),
            max_query_results: default_max_query_results(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            window: default_chunk_window(),
            overlap: default_chunk_overlap(),
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            extracting_ms: default_stage_timeout_ms(),
            chunking_ms: default_stage_timeout_ms(),
            classifying_ms: default_stage_timeout_ms(),
            validating_ms: default_stage_timeout_ms(),
            risk_ms: default_stage_timeout_ms(),
            ruc_ms: default_stage_timeout_ms(),
            aggregating_ms: default_stage_timeout_ms(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_retry_delay_ms(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            converter_command: default_converter_command(),
            ocr_command: None,
            page_text_density_threshold: default_density_threshold(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_chars_pliego: default_min_chars_pliego(),
            min_chars_propuesta: default_min_chars_propuesta(),
            min_chars_contrato: default_min_chars_contrato(),
            min_chars_desconocido: default_min_chars_desconocido(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            embedding: EmbeddingConfig::default(),
            store: StoreConfig::default(),
            chunk: ChunkConfig::default(),
            catalog: CatalogConfig::default(),
            stages: StageTimeouts::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
            extract: ExtractConfig::default(),
            validation: ValidationConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a file, with TENDERLENS__* environment
    /// variables layered on top
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("TENDERLENS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Save configuration to a file
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

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.embedding.providers.is_empty() {
            return Err(FatalError::ConfigInvalid(
                "at least one embedding provider is required".to_string(),
            )
            .into());
        }

        for provider in &self.embedding.providers {
            if provider.model.is_empty() {
                return Err(FatalError::ConfigInvalid(
                    "embedding provider model cannot be empty".to_string(),
                )
                .into());
            }
            if let Some(endpoint) = &provider.endpoint {
                if !endpoint.starts_with("http") {
                    return Err(FatalError::ConfigInvalid(format!(
                        "invalid provider endpoint: {}",
                        endpoint
                    ))
                    .into());
                }
            }
            if provider.kind == ProviderKind::Remote && provider.endpoint.is_none() {
                return Err(FatalError::ConfigInvalid(
                    "remote embedding providers require an endpoint".to_string(),
                )
                .into());
            }
        }

        if self.embedding.dimension == 0 {
            return Err(FatalError::ConfigInvalid(
                "embedding dimension must be greater than 0".to_string(),
            )
            .into());
        }

        if self.chunk.window == 0 {
            return Err(
                FatalError::ConfigInvalid("chunk window must be greater than 0".to_string()).into(),
            );
        }

        if self.chunk.overlap >= self.chunk.window {
            return Err(FatalError::ConfigInvalid(
                "chunk overlap must be smaller than the window".to_string(),
            )
            .into());
        }

        if self.worker.pool_size == 0 {
            return Err(FatalError::ConfigInvalid(
                "worker pool size must be greater than 0".to_string(),
            )
            .into());
        }

        if self.retry.max_attempts == 0 {
            return Err(FatalError::ConfigInvalid(
                "retry attempts must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }

    /// Effective worker pool size, clamped to the available cores
    pub fn effective_pool_size(&self) -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        self.worker.pool_size.min(cores).max(1)
    }

    /// Absolute path of the vector store database
    pub fn store_path(&self) -> PathBuf {
        self.data_root.join(&self.store.database_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalysisConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk.window, 1000);
        assert_eq!(config.chunk.overlap, 200);
        assert_eq!(config.worker.pool_size, 3);
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = AnalysisConfig::default();
        assert!(config.validate().is_ok());

        config.embedding.providers.clear();
        assert!(config.validate().is_err());

        config = AnalysisConfig::default();
        config.embedding.providers[0].endpoint = Some("not-a-url".to_string());
        assert!(config.validate().is_err());

        config = AnalysisConfig::default();
        config.chunk.overlap = config.chunk.window;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_remote_provider_requires_endpoint() {
        let mut config = AnalysisConfig::default();
        config.embedding.providers = vec![ProviderConfig {
            kind: ProviderKind::Remote,
            model: "text-embedding-3-small".to_string(),
            endpoint: None,
            api_key: Some("sk-test".to_string()),
            timeout_ms: 10_000,
        }];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stage_budget_lookup() {
        let mut timeouts = StageTimeouts::default();
        timeouts.risk_ms = 5_000;
        assert_eq!(timeouts.budget("risk"), Duration::from_millis(5_000));
        assert_eq!(
            timeouts.budget("classifying"),
            Duration::from_millis(default_stage_timeout_ms())
        );
    }

    #[test]
    fn test_config_roundtrip_toml() {
        let config = AnalysisConfig::default();
        let dir = std::env::temp_dir().join("tenderlens-config-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        config.to_file(&path).unwrap();
        let loaded = AnalysisConfig::from_file(&path).unwrap();
        assert_eq!(loaded.chunk.window, config.chunk.window);
        assert_eq!(
            loaded.embedding.providers.len(),
            config.embedding.providers.len()
        );
    }
}
