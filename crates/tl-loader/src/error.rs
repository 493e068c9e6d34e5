//! Error types for rule list loading

use std::path::PathBuf;
use std::time::Duration;

use tl_core::{ParseError, PersistenceError};

/// Failure talking to the rule service. Never fatal: the loader falls back
/// to the cached copy.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Malformed version marker: {0}")]
    InvalidMarker(String),
}

/// A refresh step that could not produce a database.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Download failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Rule document rejected: {0}")]
    Parse(#[from] ParseError),
    #[error("Local copy unavailable: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("No cached rule document")]
    NoCachedCopy,
    /// The document was installed but the local copy could not be written
    #[error("Rule version {version} installed but not saved: {source}")]
    NotPersisted {
        version: i64,
        #[source]
        source: PersistenceError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}
