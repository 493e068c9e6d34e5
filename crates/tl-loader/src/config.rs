//! Loader configuration

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tl_core::EngineConfig;

use crate::error::ConfigError;

pub const DEFAULT_VERSION_URL: &str = "https://cdn.ghostery.com/update/version";
pub const DEFAULT_LIST_URL: &str = "https://cdn.ghostery.com/update/v3/bugs";

/// Every field is optional in a config file; missing fields take their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Endpoint answering `{"bugsVersion": N}`
    pub version_url: String,
    /// Endpoint serving the full rule document
    pub list_url: String,
    pub fetch_timeout_secs: u64,
    pub refresh_interval_secs: u64,
    /// Directory holding the cached document and the policy state
    pub cache_dir: PathBuf,
    pub user_agent: String,
    pub engine: EngineConfig,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            version_url: DEFAULT_VERSION_URL.to_string(),
            list_url: DEFAULT_LIST_URL.to_string(),
            fetch_timeout_secs: 10,
            refresh_interval_secs: 86_400,
            cache_dir: PathBuf::from("./trackerlist-cache"),
            user_agent: concat!("trackerlist/", env!("CARGO_PKG_VERSION")).to_string(),
            engine: EngineConfig::default(),
        }
    }
}

impl LoaderConfig {
    /// Read and validate a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&data)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::Invalid("refresh_interval_secs must be at least 1".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("fetch_timeout_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: LoaderConfig =
            serde_json::from_str(r#"{"fetch_timeout_secs": 3, "engine": {"vendor_domain_suffix": ""}}"#).unwrap();

        assert_eq!(config.fetch_timeout(), Duration::from_secs(3));
        assert_eq!(config.list_url, DEFAULT_LIST_URL);
        assert_eq!(config.refresh_interval(), Duration::from_secs(86_400));
        assert_eq!(config.engine.vendor_domain_suffix, "");
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trackerlist.json");

        fs::write(&path, r#"{"refresh_interval_secs": 0}"#).unwrap();
        let err = LoaderConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("refresh_interval_secs")));

        fs::write(&path, r#"{"fetch_timeout_secs": 0}"#).unwrap();
        assert!(matches!(LoaderConfig::from_file(&path), Err(ConfigError::Invalid(_))));

        fs::write(&path, r#"{"refresh_interval_secs": 60}"#).unwrap();
        assert_eq!(LoaderConfig::from_file(&path).unwrap().refresh_interval(), Duration::from_secs(60));
        assert!(LoaderConfig::default().validate().is_ok());
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = LoaderConfig::from_file(Path::new("/nonexistent/trackerlist.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
