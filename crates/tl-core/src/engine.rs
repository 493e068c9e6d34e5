//! Tracker engine service
//!
//! [`TrackerEngine`] ties one active [`RuleDatabase`] generation to the
//! discovery ledger and the blocking policy. Generations are swapped
//! atomically: a classification that captured a generation finishes against
//! it even if a reload installs a newer one meanwhile.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::database::RuleDatabase;
use crate::error::{ParseError, PolicyError};
use crate::ledger::{DiscoveryLedger, TrackerHit};
use crate::matcher::{Matcher, TrackerMatch};
use crate::policy::{BlockingMode, BlockingPolicy, PolicyStore};
use crate::types::{AppId, BugId, CompanyStatus, DiscoveredTracker, Timestamp};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Hosts ending with this suffix belong to the rule service itself and
    /// are never classified. Empty disables the exemption.
    pub vendor_domain_suffix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            vendor_domain_suffix: "ghostery.com".to_string(),
        }
    }
}

// =============================================================================
// Generations
// =============================================================================

/// One installed database with its generation number. Generation 0 is the
/// empty database the engine starts with.
#[derive(Debug)]
pub struct Generation {
    id: u64,
    database: Arc<RuleDatabase>,
}

impl Generation {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn database(&self) -> &Arc<RuleDatabase> {
        &self.database
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A new generation is active
    RulesLoaded {
        generation: u64,
        version: i64,
        database: Arc<RuleDatabase>,
    },
    /// A bug was seen on a page for the first time
    TrackerDiscovered {
        page_url: String,
        bug_id: BugId,
        app_id: AppId,
    },
    /// The blocking mode changed
    PolicyChanged { mode: BlockingMode },
}

pub type EventCallback = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

// =============================================================================
// Tracker Engine
// =============================================================================

pub struct TrackerEngine {
    config: EngineConfig,
    current: ArcSwap<Generation>,
    // Last generation id; held across swap and notification
    install_lock: Mutex<u64>,
    subscribers: Mutex<Vec<(SubscriptionId, EventCallback)>>,
    next_subscription: AtomicU64,
    ledger: DiscoveryLedger,
    policy: BlockingPolicy,
}

impl TrackerEngine {
    /// Create an engine with an empty database, restoring the blocking mode
    /// from `policy_store`.
    pub fn new(config: EngineConfig, policy_store: Arc<dyn PolicyStore>) -> Self {
        Self {
            config,
            current: ArcSwap::from_pointee(Generation {
                id: 0,
                database: Arc::new(RuleDatabase::empty()),
            }),
            install_lock: Mutex::new(0),
            subscribers: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            ledger: DiscoveryLedger::new(),
            policy: BlockingPolicy::load(policy_store),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // =========================================================================
    // Rule Generations
    // =========================================================================

    /// Make `db` the active generation and notify subscribers. Subscribers
    /// are called before the next install can start, so they must not
    /// install from within the callback.
    pub fn install(&self, db: RuleDatabase) -> u64 {
        let database = Arc::new(db);
        let mut last = self.install_lock.lock().unwrap_or_else(PoisonError::into_inner);
        *last += 1;
        let generation = *last;

        self.current.store(Arc::new(Generation {
            id: generation,
            database: Arc::clone(&database),
        }));
        info!("Installed rule generation {} (version {})", generation, database.version());

        self.publish(&EngineEvent::RulesLoaded {
            generation,
            version: database.version(),
            database,
        });
        generation
    }

    /// Parse and install a rule document. On error the active generation is
    /// left untouched.
    pub fn load_document(&self, data: &[u8]) -> Result<u64, ParseError> {
        let db = RuleDatabase::load(data)?;
        Ok(self.install(db))
    }

    /// The active generation.
    pub fn snapshot(&self) -> Arc<Generation> {
        self.current.load_full()
    }

    pub fn database(&self) -> Arc<RuleDatabase> {
        Arc::clone(&self.current.load().database)
    }

    pub fn generation(&self) -> u64 {
        self.current.load().id
    }

    /// Matcher over a captured generation.
    pub fn matcher<'a>(&'a self, generation: &'a Generation) -> Matcher<'a> {
        generation.database.matcher(&self.config.vendor_domain_suffix)
    }

    // =========================================================================
    // Classification
    // =========================================================================

    pub fn classify(&self, request_url: &str, page_url: &str) -> Option<BugId> {
        let generation = self.current.load();
        self.matcher(&generation).classify(request_url, page_url)
    }

    pub fn find(&self, request_url: &str, page_url: &str) -> Option<TrackerMatch> {
        let generation = self.current.load();
        self.matcher(&generation).find(request_url, page_url)
    }

    /// Classify a request and record it for the page. Returns the page's
    /// entry for the matched bug, or `None` when the request is not a
    /// tracker or its bug has no owning company.
    ///
    /// The returned entry carries the blocked status from its first
    /// discovery; use [`should_block`](Self::should_block) for a current
    /// decision.
    pub fn observe(&self, request_url: &str, page_url: &str, timestamp: Timestamp) -> Option<DiscoveredTracker> {
        let generation = self.current.load();
        let bug_id = self.matcher(&generation).classify(request_url, page_url)?;

        let Some(app_id) = generation.database.app_for_bug(bug_id) else {
            debug!("Bug {} matched {} but has no company", bug_id, request_url);
            return None;
        };

        Some(self.record(page_url, bug_id, app_id, request_url, timestamp))
    }

    /// Record a tracker for a page. Recording the same bug again returns the
    /// existing entry.
    pub fn record(
        &self,
        page_url: &str,
        bug_id: BugId,
        app_id: AppId,
        request_url: &str,
        timestamp: Timestamp,
    ) -> DiscoveredTracker {
        let recorded = self.ledger.record(
            page_url,
            TrackerHit {
                bug_id,
                app_id,
                url: request_url,
                timestamp,
                is_blocked: self.policy.should_block(app_id),
            },
        );

        if recorded.is_new() {
            self.publish(&EngineEvent::TrackerDiscovered {
                page_url: page_url.to_string(),
                bug_id,
                app_id,
            });
        }
        recorded.into_tracker()
    }

    // =========================================================================
    // Page Ledger
    // =========================================================================

    pub fn mark_completed(&self, page_url: &str, bug_id: BugId, completed_at: Timestamp) -> bool {
        self.ledger.mark_completed(page_url, bug_id, completed_at)
    }

    /// Companies seen on a page, sorted by name, blocked status evaluated
    /// against the current policy.
    pub fn trackers_for_page(&self, page_url: &str) -> Vec<CompanyStatus> {
        let generation = self.current.load();
        self.ledger.companies(page_url, &generation.database, &self.policy)
    }

    /// Number of distinct companies seen on a page.
    pub fn tracker_count_for_page(&self, page_url: &str) -> usize {
        self.ledger.app_ids(page_url).len()
    }

    pub fn discovered_trackers(&self, page_url: &str) -> Vec<DiscoveredTracker> {
        self.ledger.trackers(page_url)
    }

    pub fn tracker_for_url(&self, page_url: &str, request_url: &str) -> Option<DiscoveredTracker> {
        self.ledger.tracker_for_url(page_url, request_url)
    }

    pub fn clear(&self, page_url: &str) -> bool {
        self.ledger.clear(page_url)
    }

    /// Every company in the active generation with its blocked status.
    pub fn all_companies(&self) -> Vec<CompanyStatus> {
        let generation = self.current.load();
        generation
            .database
            .companies()
            .into_iter()
            .map(|company| CompanyStatus::new(company, self.policy.should_block(company.app_id)))
            .collect()
    }

    // =========================================================================
    // Blocking Policy
    // =========================================================================

    pub fn should_block(&self, app_id: AppId) -> bool {
        self.policy.should_block(app_id)
    }

    pub fn blocking_mode(&self) -> BlockingMode {
        self.policy.mode()
    }

    pub fn block_all(&self) -> Result<(), PolicyError> {
        self.apply_policy(BlockingMode::All)
    }

    pub fn unblock_all(&self) -> Result<(), PolicyError> {
        self.apply_policy(BlockingMode::None)
    }

    pub fn block_selected<I>(&self, apps: I) -> Result<(), PolicyError>
    where
        I: IntoIterator<Item = AppId>,
    {
        self.apply_policy(BlockingMode::Selected(apps.into_iter().collect()))
    }

    // The event carries the mode this call applied, which is in effect even
    // when persisting failed
    fn apply_policy(&self, mode: BlockingMode) -> Result<(), PolicyError> {
        let result = self.policy.set_mode(mode.clone());
        self.publish(&EngineEvent::PolicyChanged { mode });
        result
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }

    fn publish(&self, event: &EngineEvent) {
        // Callbacks run outside the subscriber lock so they may subscribe
        let callbacks: Vec<EventCallback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in callbacks {
            callback(event);
        }
    }
}
