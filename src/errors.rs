use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to read project store {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write project store {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed project store {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("project {0} already exists")]
    Duplicate(String),
    #[error("project {0} not found")]
    NotFound(String),
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("local version information is missing")]
    MissingLocalVersion,
    #[error("invalid update manifest address: {0}")]
    InvalidManifestUrl(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed update manifest: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("staging failed: {0}")]
    Staging(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl UpdateError {
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            UpdateError::ChecksumMismatch { .. } | UpdateError::SizeMismatch { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
}
