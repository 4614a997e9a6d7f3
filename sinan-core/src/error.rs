use std::path::PathBuf;

use thiserror::Error;

use crate::export::ExportError;

#[derive(Debug, Error)]
pub enum SinanError {
    #[error("html to markdown conversion failed: {0}")]
    Conversion(String),

    #[error("invalid heading level: {0}")]
    InvalidLevel(String),

    #[error("invalid config value for {key}: {value}")]
    InvalidConfig { key: String, value: String },

    #[error("unknown turn id: {0}")]
    UnknownTurn(String),

    #[error("export failed: {0}")]
    Export(#[from] ExportError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("snapshot file is empty: {path}")]
    EmptySnapshotFile { path: PathBuf },

    #[error("snapshot file is not valid UTF-8: {path}")]
    NonUtf8SnapshotFile { path: PathBuf },

    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid snapshot json in {path}: {source}")]
    InvalidSnapshot {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, SinanError>;
