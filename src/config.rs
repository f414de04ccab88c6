//! Configuration record.
//!
//! Loading and validating this record is the one piece of "out of scope"
//! surface this binary still has to own end to end (section 6 of the
//! design notes): something has to build a `Config` before the
//! orchestrator can run. `main.rs` deserializes it from a TOML file with
//! `COUNCIL_PIPELINE__SECTION__KEY` environment overrides, then calls
//! [`Config::validate`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub window_start: String,
    pub window_end: String,
    #[serde(default = "defaults::http_timeout_sec")]
    pub http_timeout_sec: u64,
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "defaults::retry_backoff_base_sec")]
    pub retry_backoff_base_sec: f64,
    #[serde(default)]
    pub page_limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "defaults::max_workers")]
    pub max_workers: usize,
    #[serde(default = "defaults::per_download_delay_sec")]
    pub per_download_delay_sec: f64,
    #[serde(default = "defaults::memory_threshold_bytes")]
    pub memory_threshold_bytes: u64,
    #[serde(default)]
    pub enable_ocr: bool,
    #[serde(default = "defaults::max_response_bytes")]
    pub max_response_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpatialConfig {
    pub gazetteer_path: PathBuf,
    #[serde(default)]
    pub ner_model: Option<String>,
    #[serde(default = "defaults::fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default)]
    pub blocklist_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodingConfig {
    pub service_url: String,
    #[serde(default = "defaults::rate_limit_sec")]
    pub rate_limit_sec: f64,
    #[serde(default = "defaults::geocoding_timeout_sec")]
    pub timeout_sec: u64,
    #[serde(default = "defaults::geocoding_retries")]
    pub retries: u32,
    #[serde(default = "defaults::verify_tls")]
    pub verify_tls: bool,
    #[serde(default = "defaults::cache_capacity")]
    pub cache_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    Snappy,
    Zstd,
    Gzip,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParquetConfig {
    #[serde(default = "defaults::partition_cols")]
    pub partition_cols: Vec<String>,
    #[serde(default = "defaults::compression")]
    pub compression: CompressionKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub base_path: PathBuf,
    #[serde(default)]
    pub parquet: ParquetConfigOpt,
    /// Base URI new Paper/Location nodes are minted under in the graph
    /// output, e.g. `https://data.example.org/council`.
    #[serde(default = "defaults::graph_base_uri")]
    pub graph_base_uri: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParquetConfigOpt {
    pub partition_cols: Option<Vec<String>>,
    pub compression: Option<CompressionKind>,
}

impl StorageConfig {
    pub fn parquet_config(&self) -> ParquetConfig {
        ParquetConfig {
            partition_cols: self
                .parquet
                .partition_cols
                .clone()
                .unwrap_or_else(defaults::partition_cols),
            compression: self.parquet.compression.unwrap_or_else(defaults::compression),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "defaults::batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub paper_limit: Option<u64>,
    #[serde(default = "defaults::skip_existing")]
    pub skip_existing: bool,
    #[serde(default)]
    pub reprocess_failed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    pub db_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: defaults::log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub city: String,
    pub api: ApiConfig,
    #[serde(default)]
    pub extraction: ExtractionConfigOpt,
    pub spatial: SpatialConfig,
    pub geocoding: GeocodingConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfigOpt,
    pub state: StateConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfigOpt {
    pub max_workers: Option<usize>,
    pub per_download_delay_sec: Option<f64>,
    pub memory_threshold_bytes: Option<u64>,
    pub enable_ocr: Option<bool>,
    pub max_response_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrchestratorConfigOpt {
    pub batch_size: Option<usize>,
    pub paper_limit: Option<u64>,
    pub skip_existing: Option<bool>,
    pub reprocess_failed: Option<bool>,
}

impl Config {
    /// Load from a TOML file, then apply `COUNCIL_PIPELINE__SECTION__KEY`
    /// environment overrides before validating.
    pub fn load(path: &Path) -> Result<Config> {
        let raw = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&raw)?;
        apply_env_overrides(&mut config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn extraction(&self) -> ExtractionConfig {
        ExtractionConfig {
            max_workers: self.extraction.max_workers.unwrap_or_else(defaults::max_workers),
            per_download_delay_sec: self
                .extraction
                .per_download_delay_sec
                .unwrap_or_else(defaults::per_download_delay_sec),
            memory_threshold_bytes: self
                .extraction
                .memory_threshold_bytes
                .unwrap_or_else(defaults::memory_threshold_bytes),
            enable_ocr: self.extraction.enable_ocr.unwrap_or(false),
            max_response_bytes: self
                .extraction
                .max_response_bytes
                .unwrap_or_else(defaults::max_response_bytes),
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            batch_size: self.orchestrator.batch_size.unwrap_or_else(defaults::batch_size),
            paper_limit: self.orchestrator.paper_limit,
            skip_existing: self.orchestrator.skip_existing.unwrap_or_else(defaults::skip_existing),
            reprocess_failed: self.orchestrator.reprocess_failed.unwrap_or(false),
        }
    }

    /// Reject missing required fields, a non-existent gazetteer path, and
    /// an out-of-enum compression kind before the orchestrator is
    /// constructed.
    pub fn validate(&self) -> Result<()> {
        if self.city.trim().is_empty() {
            return Err(PipelineError::Configuration("`city` must not be empty".into()));
        }
        if self.api.base_url.trim().is_empty() {
            return Err(PipelineError::Configuration("`api.base_url` must not be empty".into()));
        }
        chrono::DateTime::parse_from_rfc3339(&self.api.window_start).map_err(|e| {
            PipelineError::Configuration(format!("`api.window_start` is not RFC-3339: {e}"))
        })?;
        chrono::DateTime::parse_from_rfc3339(&self.api.window_end).map_err(|e| {
            PipelineError::Configuration(format!("`api.window_end` is not RFC-3339: {e}"))
        })?;
        if !self.spatial.gazetteer_path.exists() {
            return Err(PipelineError::Configuration(format!(
                "`spatial.gazetteer_path` does not exist: {}",
                self.spatial.gazetteer_path.display()
            )));
        }
        if !(0.0..=1.0).contains(&self.spatial.fuzzy_threshold) {
            return Err(PipelineError::Configuration(
                "`spatial.fuzzy_threshold` must be in [0, 1]".into(),
            ));
        }
        if self.geocoding.rate_limit_sec < 0.0 {
            return Err(PipelineError::Configuration(
                "`geocoding.rate_limit_sec` must be non-negative".into(),
            ));
        }
        Ok(())
    }
}

/// Walk every `COUNCIL_PIPELINE__SECTION__KEY` environment variable and
/// splice it into the parsed document before struct validation, so a
/// deployment can override a single field without a full config file.
fn apply_env_overrides(config: &mut Config) -> Result<()> {
    const PREFIX: &str = "COUNCIL_PIPELINE__";
    let mut doc = serde_json::to_value(&*config)?;
    for (key, value) in std::env::vars() {
        if let Some(rest) = key.strip_prefix(PREFIX) {
            let path: Vec<String> = rest.split("__").map(|s| s.to_lowercase()).collect();
            set_json_path(&mut doc, &path, &value);
        }
    }
    *config = serde_json::from_value(doc)?;
    Ok(())
}

fn set_json_path(doc: &mut serde_json::Value, path: &[String], raw: &str) {
    let Some((head, rest)) = path.split_first() else { return };
    if !doc.is_object() {
        *doc = serde_json::Value::Object(Default::default());
    }
    let obj = doc.as_object_mut().expect("just ensured object");
    if rest.is_empty() {
        let parsed = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        obj.insert(head.clone(), parsed);
    } else {
        let entry = obj.entry(head.clone()).or_insert_with(|| serde_json::Value::Object(Default::default()));
        set_json_path(entry, rest, raw);
    }
}

mod defaults {
    use super::CompressionKind;

    pub fn http_timeout_sec() -> u64 {
        30
    }
    pub fn retry_attempts() -> u32 {
        5
    }
    pub fn retry_backoff_base_sec() -> f64 {
        2.0
    }
    pub fn max_workers() -> usize {
        3
    }
    pub fn per_download_delay_sec() -> f64 {
        1.0
    }
    pub fn memory_threshold_bytes() -> u64 {
        10 * 1024 * 1024
    }
    pub fn max_response_bytes() -> u64 {
        50 * 1024 * 1024
    }
    pub fn fuzzy_threshold() -> f64 {
        0.85
    }
    pub fn rate_limit_sec() -> f64 {
        1.0
    }
    pub fn geocoding_timeout_sec() -> u64 {
        10
    }
    pub fn geocoding_retries() -> u32 {
        3
    }
    pub fn verify_tls() -> bool {
        true
    }
    pub fn cache_capacity() -> usize {
        4096
    }
    pub fn partition_cols() -> Vec<String> {
        vec!["city".into(), "year".into(), "month".into()]
    }
    pub fn compression() -> CompressionKind {
        CompressionKind::Snappy
    }
    pub fn batch_size() -> usize {
        50
    }
    pub fn skip_existing() -> bool {
        true
    }
    pub fn log_level() -> String {
        "info".into()
    }
    pub fn graph_base_uri() -> String {
        "https://data.council-pipeline.local".into()
    }
}
