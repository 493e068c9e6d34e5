//! Version-gated rule list refresh
//!
//! A refresh asks the source for its current version and downloads the full
//! document only when that version is newer than the cached copy. Anything
//! that goes wrong on the network path falls back to the cached copy; with no
//! usable cached copy the engine stays on whatever it already has.
//!
//! Network I/O happens before the engine is touched. The engine only sees a
//! fully parsed database, installed in a single swap.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tl_core::{RuleDatabase, TrackerEngine};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::error::{FetchError, LoadError};
use crate::source::RuleSource;
use crate::store::{CachedDocument, DocumentCache};

/// Shortest period [`ListLoader::run_periodic`] refreshes at.
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// What a refresh ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A newer document was downloaded and installed
    Downloaded { version: i64 },
    /// A newer document was installed but could not be written to the
    /// cache; the next start falls back to the older cached copy
    DownloadedNotPersisted { version: i64 },
    /// The cached document was installed
    Cached { version: i64 },
    /// The engine already runs the newest available document
    AlreadyCurrent { version: i64 },
    /// Nothing could be loaded; the engine keeps an empty database
    Empty,
}

pub struct ListLoader {
    source: Arc<dyn RuleSource>,
    cache: Arc<dyn DocumentCache>,
    fetch_timeout: Duration,
    // One refresh at a time; never held by the engine's read path
    refresh_lock: Mutex<()>,
}

impl ListLoader {
    pub fn new(source: Arc<dyn RuleSource>, cache: Arc<dyn DocumentCache>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            cache,
            fetch_timeout,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Bring `engine` up to the newest document available.
    pub async fn refresh(&self, engine: &TrackerEngine) -> RefreshOutcome {
        let _guard = self.refresh_lock.lock().await;

        let cached = match self.cache.load_cached_document() {
            Ok(cached) => cached,
            Err(e) => {
                warn!("Cached rule document unreadable: {}", e);
                None
            }
        };
        let local_version = cached.as_ref().map(|c| c.version);

        match self.with_timeout(self.source.fetch_remote_version()).await {
            Ok(remote) if local_version.map_or(true, |local| remote > local) => {
                info!("Remote rule version {} is newer than local {:?}", remote, local_version);
                match self.download(engine).await {
                    Ok(version) => return RefreshOutcome::Downloaded { version },
                    Err(LoadError::NotPersisted { version, source }) => {
                        warn!("Downloaded rule version {} not saved: {}", version, source);
                        return RefreshOutcome::DownloadedNotPersisted { version };
                    }
                    Err(e) => warn!("Rule download failed, falling back to cached copy: {}", e),
                }
            }
            Ok(remote) => {
                info!("Remote rule version {} is not newer than local {:?}", remote, local_version);
            }
            Err(e) => warn!("Version check failed, falling back to cached copy: {}", e),
        }

        // The engine may already run the cached document (or something newer)
        let active = engine.database();
        if engine.generation() > 0 && local_version.map_or(true, |local| active.version() >= local) {
            info!("Rule version {} already installed", active.version());
            return RefreshOutcome::AlreadyCurrent {
                version: active.version(),
            };
        }

        match cached {
            Some(cached) => match self.install_cached(engine, cached) {
                Ok(version) => RefreshOutcome::Cached { version },
                Err(e) => {
                    warn!("Cached rule document rejected: {}", e);
                    self.degraded(engine)
                }
            },
            None => {
                warn!("No cached rule document available");
                self.degraded(engine)
            }
        }
    }

    /// Download, parse, persist and install the remote document. A document
    /// that does not parse is neither persisted nor installed. When only
    /// persisting fails the document is still installed and
    /// [`LoadError::NotPersisted`] is returned.
    pub async fn download(&self, engine: &TrackerEngine) -> Result<i64, LoadError> {
        let data = self.with_timeout(self.source.fetch_document()).await?;
        let db = RuleDatabase::load(&data)?;
        let version = db.version();

        let persisted = self.cache.store_cached_document(&data, version);

        engine.install(db);
        info!("Installed downloaded rule document version {}", version);
        persisted.map_err(|source| LoadError::NotPersisted { version, source })?;
        Ok(version)
    }

    /// Parse and install the cached document.
    pub fn load_cached(&self, engine: &TrackerEngine) -> Result<i64, LoadError> {
        let cached = self.cache.load_cached_document()?.ok_or(LoadError::NoCachedCopy)?;
        self.install_cached(engine, cached)
    }

    fn install_cached(&self, engine: &TrackerEngine, cached: CachedDocument) -> Result<i64, LoadError> {
        let db = RuleDatabase::load(&cached.data)?;
        let version = db.version();
        engine.install(db);
        info!("Installed cached rule document version {}", version);
        Ok(version)
    }

    fn degraded(&self, engine: &TrackerEngine) -> RefreshOutcome {
        if engine.generation() > 0 {
            let version = engine.database().version();
            warn!("Keeping installed rule version {}", version);
            RefreshOutcome::AlreadyCurrent { version }
        } else {
            warn!("No rules loaded, every request is classified as a non-tracker");
            RefreshOutcome::Empty
        }
    }

    async fn with_timeout<T, F>(&self, fut: F) -> Result<T, FetchError>
    where
        F: Future<Output = Result<T, FetchError>>,
    {
        time::timeout(self.fetch_timeout, fut)
            .await
            .map_err(|_| FetchError::Timeout(self.fetch_timeout))?
    }

    /// Refresh now and then every `interval` until the returned task is
    /// aborted. Intervals below [`MIN_REFRESH_INTERVAL`] are raised to it.
    pub fn run_periodic(self: Arc<Self>, engine: Arc<TrackerEngine>, interval: Duration) -> JoinHandle<()> {
        let interval = if interval < MIN_REFRESH_INTERVAL {
            warn!("Refresh interval {:?} too short, using {:?}", interval, MIN_REFRESH_INTERVAL);
            MIN_REFRESH_INTERVAL
        } else {
            interval
        };

        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let outcome = self.refresh(&engine).await;
                info!("Periodic rule refresh: {:?}", outcome);
            }
        })
    }
}
