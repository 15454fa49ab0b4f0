use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MirrorError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse YAML config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid dataset config: {0}")]
    InvalidDataset(String),

    #[error("unknown storage type: {0}")]
    UnknownStorage(String),

    #[error("invalid date (expected YYYYMMDD): {0}")]
    InvalidDate(String),

    #[error("invalid run hour: {0}")]
    InvalidRun(String),

    #[error("invalid file template: {0}")]
    Template(String),

    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("server returned status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to parse incremental state at {key}: {message}")]
    StateParse { key: String, message: String },

    #[error("{failed} of {total} datasets failed")]
    DatasetsFailed { failed: usize, total: usize },
}
