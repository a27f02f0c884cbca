//! TOML configuration parsing.
//!
//! Every command reads one file (`--config`, default `./config/argo.toml`).
//! Only `[db]` is mandatory; all other sections fall back to defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cleaning: CleaningConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CleaningConfig {
    #[serde(default = "default_bin_size")]
    pub bin_size: f64,
    /// Share of "bad" rows at which a filter is skipped instead of applied.
    #[serde(default = "default_bad_fraction")]
    pub bad_fraction: f64,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            bin_size: default_bin_size(),
            bad_fraction: default_bad_fraction(),
        }
    }
}

fn default_bin_size() -> f64 {
    10.0
}
fn default_bad_fraction() -> f64 {
    0.8
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default = "default_true")]
    pub skip_mean_rows: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
            page_size: default_page_size(),
            pattern: default_pattern(),
            recursive: false,
            skip_mean_rows: true,
        }
    }
}

fn default_ingest_batch_size() -> usize {
    5000
}
fn default_page_size() -> usize {
    1000
}
fn default_pattern() -> String {
    "*.csv".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_results")]
    pub n_results: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_results: default_n_results(),
            max_results: default_max_results(),
        }
    }
}

fn default_n_results() -> usize {
    5
}
fn default_max_results() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    /// Characters kept from each chat-history message in the prompt.
    #[serde(default = "default_history_chars")]
    pub history_chars: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_llm_timeout_secs(),
            max_retries: default_llm_max_retries(),
            history_chars: default_history_chars(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_timeout_secs() -> u64 {
    60
}
fn default_llm_max_retries() -> u32 {
    3
}
fn default_history_chars() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    /// Allowed CORS origins. Empty means any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            processed_dir: default_processed_dir(),
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("processed")
}
fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate cleaning
    if config.cleaning.bin_size <= 0.0 || !config.cleaning.bin_size.is_finite() {
        anyhow::bail!("cleaning.bin_size must be a positive number");
    }
    if !(0.0..=1.0).contains(&config.cleaning.bad_fraction) {
        anyhow::bail!("cleaning.bad_fraction must be in [0.0, 1.0]");
    }

    // Validate ingest
    if config.ingest.batch_size == 0 || config.ingest.page_size == 0 {
        anyhow::bail!("ingest.batch_size and ingest.page_size must be > 0");
    }

    // Validate retrieval
    if config.retrieval.n_results < 1 {
        anyhow::bail!("retrieval.n_results must be >= 1");
    }
    if config.retrieval.max_results < config.retrieval.n_results {
        anyhow::bail!("retrieval.max_results must be >= retrieval.n_results");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "disabled" | "gemini" | "openai" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, gemini, or openai.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"data/argo.sqlite\"\n").unwrap();
        assert_eq!(config.cleaning.bin_size, 10.0);
        assert_eq!(config.cleaning.bad_fraction, 0.8);
        assert_eq!(config.ingest.batch_size, 5000);
        assert_eq!(config.ingest.pattern, "*.csv");
        assert!(config.ingest.skip_mean_rows);
        assert_eq!(config.retrieval.n_results, 5);
        assert!(!config.embedding.is_enabled());
        assert!(!config.llm.is_enabled());
        assert_eq!(config.server.bind, "127.0.0.1:8000");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn rejects_non_positive_bin_size() {
        let err = parse("[db]\npath = \"a.db\"\n[cleaning]\nbin_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("bin_size"));
    }

    #[test]
    fn remote_embedding_requires_model_and_dims() {
        let err = parse("[db]\npath = \"a.db\"\n[embedding]\nprovider = \"openai\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn local_embedding_needs_no_model() {
        let config = parse("[db]\npath = \"a.db\"\n[embedding]\nprovider = \"local\"\n").unwrap();
        assert!(config.embedding.is_enabled());
    }

    #[test]
    fn rejects_unknown_llm_provider() {
        let err = parse("[db]\npath = \"a.db\"\n[llm]\nprovider = \"palm\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }
}
