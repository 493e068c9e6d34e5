//! Rule list loading for the tracker engine
//!
//! Fetches the versioned rule document from the rule service, keeps a local
//! copy of the last good document and installs parsed generations into a
//! [`tl_core::TrackerEngine`].

pub mod config;
pub mod error;
pub mod loader;
pub mod source;
pub mod store;

pub use config::LoaderConfig;
pub use error::{ConfigError, FetchError, LoadError};
pub use loader::{ListLoader, RefreshOutcome, MIN_REFRESH_INTERVAL};
pub use source::{HttpRuleSource, RuleSource};
pub use store::{CachedDocument, DocumentCache, FileStore};
