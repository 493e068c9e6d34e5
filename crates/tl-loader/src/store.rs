//! Local persistence for the cached rule document and the blocking policy

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::warn;
use tl_core::{BlockingMode, PersistenceError, PolicyStore};

const DOCUMENT_FILE: &str = "bugs.json";
const VERSION_FILE: &str = "bugs.version";
const POLICY_FILE: &str = "policy.json";

/// A rule document as last persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedDocument {
    pub data: Vec<u8>,
    pub version: i64,
}

/// Storage for the last good rule document.
pub trait DocumentCache: Send + Sync {
    /// The stored document, or `None` if nothing was stored yet.
    fn load_cached_document(&self) -> Result<Option<CachedDocument>, PersistenceError>;

    fn store_cached_document(&self, data: &[u8], version: i64) -> Result<(), PersistenceError>;
}

// =============================================================================
// File Store
// =============================================================================

/// Keeps `bugs.json`, `bugs.version` and `policy.json` in one directory.
/// Files are replaced by writing a sibling temp file and renaming it.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_optional(&self, name: &str) -> Result<Option<Vec<u8>>, PersistenceError> {
        let path = self.dir.join(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> Result<(), PersistenceError> {
        fs::create_dir_all(&self.dir).map_err(|source| PersistenceError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.dir.join(name);
        let tmp = self.dir.join(format!(".{}.tmp", name));
        fs::write(&tmp, data).map_err(|source| PersistenceError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| PersistenceError::Io { path, source })
    }
}

impl DocumentCache for FileStore {
    fn load_cached_document(&self) -> Result<Option<CachedDocument>, PersistenceError> {
        let Some(data) = self.read_optional(DOCUMENT_FILE)? else {
            return Ok(None);
        };

        // A document without a readable version is older than anything remote
        let version = match self.read_optional(VERSION_FILE)? {
            Some(raw) => match String::from_utf8_lossy(&raw).trim().parse() {
                Ok(version) => version,
                Err(_) => {
                    warn!("Ignoring malformed {} in {}", VERSION_FILE, self.dir.display());
                    0
                }
            },
            None => 0,
        };

        Ok(Some(CachedDocument { data, version }))
    }

    /// The version file is written after the document, so an interrupted
    /// store leaves an older version on disk and the next refresh downloads
    /// again.
    fn store_cached_document(&self, data: &[u8], version: i64) -> Result<(), PersistenceError> {
        self.write_atomic(DOCUMENT_FILE, data)?;
        self.write_atomic(VERSION_FILE, version.to_string().as_bytes())
    }
}

impl PolicyStore for FileStore {
    fn load_policy_state(&self) -> Result<BlockingMode, PersistenceError> {
        match self.read_optional(POLICY_FILE)? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(BlockingMode::default()),
        }
    }

    fn store_policy_state(&self, mode: &BlockingMode) -> Result<(), PersistenceError> {
        let data = serde_json::to_vec_pretty(mode)?;
        self.write_atomic(POLICY_FILE, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_directory_has_nothing_cached() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache"));

        assert_eq!(store.load_cached_document().unwrap(), None);
        assert_eq!(store.load_policy_state().unwrap(), BlockingMode::None);
    }

    #[test]
    fn document_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache"));

        store.store_cached_document(b"{\"version\": 5}", 5).unwrap();
        store.store_cached_document(b"{\"version\": 6}", 6).unwrap();

        let cached = store.load_cached_document().unwrap().unwrap();
        assert_eq!(cached.version, 6);
        assert_eq!(cached.data, b"{\"version\": 6}");
        assert!(!dir.path().join("cache").join(".bugs.json.tmp").exists());
    }

    #[test]
    fn malformed_version_reads_as_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        fs::write(dir.path().join(DOCUMENT_FILE), b"{}").unwrap();
        fs::write(dir.path().join(VERSION_FILE), b"seven").unwrap();

        assert_eq!(store.load_cached_document().unwrap().unwrap().version, 0);
    }

    #[test]
    fn policy_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        let mode = BlockingMode::Selected([42, 7].into_iter().collect());
        store.store_policy_state(&mode).unwrap();
        assert_eq!(store.load_policy_state().unwrap(), mode);

        store.store_policy_state(&BlockingMode::All).unwrap();
        assert_eq!(store.load_policy_state().unwrap(), BlockingMode::All);
    }

    #[test]
    fn corrupt_policy_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(POLICY_FILE), b"[not json").unwrap();
        let store = FileStore::new(dir.path());

        assert!(matches!(store.load_policy_state(), Err(PersistenceError::Serialize(_))));
    }
}
