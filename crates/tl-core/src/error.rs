//! Error types for the tracker engine

use std::fmt;
use std::path::PathBuf;

use crate::types::BugId;

/// Error type for rule document loading. Any of these aborts the load and
/// leaves the previously installed generation in place.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Document root is not an object")]
    NotAnObject,
    #[error("Missing required key: {0}")]
    MissingKey(&'static str),
    #[error("Key '{key}' must be {expected}")]
    InvalidKey {
        key: &'static str,
        expected: &'static str,
    },
}

/// Rule document table an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleTable {
    Apps,
    Bugs,
    Host,
    HostPath,
    Path,
    Regex,
}

impl fmt::Display for RuleTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Apps => "apps",
            Self::Bugs => "bugs",
            Self::Host => "patterns.host",
            Self::HostPath => "patterns.host_path",
            Self::Path => "patterns.path",
            Self::Regex => "patterns.regex",
        };
        f.write_str(name)
    }
}

/// A single malformed entry. Skipped entries are collected into the load
/// statistics; they never fail a load.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PartialEntryError {
    #[error("{table}: id '{key}' is not an integer")]
    NonNumericId { table: RuleTable, key: String },
    #[error("{table}: entry '{key}' has unexpected shape: {reason}")]
    BadShape {
        table: RuleTable,
        key: String,
        reason: &'static str,
    },
    #[error("patterns.regex: pattern for bug {bug_id} does not compile: {reason}")]
    InvalidRegex { bug_id: BugId, reason: String },
}

/// Failure reading or writing externally persisted state.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Error returned by blocking policy mutators.
///
/// The in-memory policy change has already taken effect when this is
/// returned; only its persistence failed.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("Policy applied but not persisted: {0}")]
    Persistence(#[from] PersistenceError),
}
