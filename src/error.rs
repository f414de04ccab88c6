//! Pipeline-wide error taxonomy.
//!
//! Every component returns `Result<_, PipelineError>`. `anyhow` is reserved
//! for `main.rs`, which is the only place that needs to attach ad-hoc
//! context while unwinding to a process exit code.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("fetch error: {0}")]
    FetchHttp(#[from] reqwest::Error),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("enrichment error: {0}")]
    Enrichment(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("write error: {0}")]
    Io(#[from] std::io::Error),

    #[error("state store error: {0}")]
    StateStore(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
