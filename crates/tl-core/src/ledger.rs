//! Per-page discovery ledger
//!
//! Remembers which trackers were seen on each page. Pages are keyed by their
//! normalized URL (see [`normalize_page_url`]); a page's entry is created on
//! its first discovery and lives until the caller clears it.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::database::RuleDatabase;
use crate::policy::BlockingPolicy;
use crate::types::{compare_by_name, AppId, BugId, CompanyStatus, DiscoveredTracker, Timestamp};
use crate::url::normalize_page_url;

/// A classified request about to be recorded.
#[derive(Debug, Clone, Copy)]
pub struct TrackerHit<'a> {
    pub bug_id: BugId,
    pub app_id: AppId,
    pub url: &'a str,
    pub timestamp: Timestamp,
    pub is_blocked: bool,
}

/// Outcome of [`DiscoveryLedger::record`].
#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    /// First time this bug was seen on the page
    New(DiscoveredTracker),
    /// The bug was already recorded; the stored entry is returned unchanged
    Existing(DiscoveredTracker),
}

impl Recorded {
    pub fn is_new(&self) -> bool {
        matches!(self, Self::New(_))
    }

    pub fn into_tracker(self) -> DiscoveredTracker {
        match self {
            Self::New(t) | Self::Existing(t) => t,
        }
    }
}

#[derive(Debug, Default)]
struct PageLedger {
    // Discovery order
    trackers: Vec<DiscoveredTracker>,
    by_bug: HashMap<BugId, usize>,
}

impl PageLedger {
    fn get_mut(&mut self, bug_id: BugId) -> Option<&mut DiscoveredTracker> {
        let index = *self.by_bug.get(&bug_id)?;
        self.trackers.get_mut(index)
    }

    fn app_ids(&self) -> Vec<AppId> {
        let mut apps: Vec<AppId> = Vec::with_capacity(self.trackers.len());
        for tracker in &self.trackers {
            if !apps.contains(&tracker.app_id) {
                apps.push(tracker.app_id);
            }
        }
        apps
    }
}

// =============================================================================
// Discovery Ledger
// =============================================================================

/// Trackers discovered per page. All operations take one global lock.
#[derive(Debug, Default)]
pub struct DiscoveryLedger {
    pages: Mutex<HashMap<String, PageLedger>>,
}

impl DiscoveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn pages(&self) -> MutexGuard<'_, HashMap<String, PageLedger>> {
        self.pages.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `hit` for `page_url`. Only the first hit per bug creates an
    /// entry; later hits return the stored entry.
    pub fn record(&self, page_url: &str, hit: TrackerHit<'_>) -> Recorded {
        let mut pages = self.pages();
        let page = pages.entry(normalize_page_url(page_url)).or_default();

        if let Some(&index) = page.by_bug.get(&hit.bug_id) {
            return Recorded::Existing(page.trackers[index].clone());
        }

        let tracker = DiscoveredTracker {
            bug_id: hit.bug_id,
            app_id: hit.app_id,
            url: hit.url.to_string(),
            first_seen_at: hit.timestamp,
            completed_at: None,
            is_blocked: hit.is_blocked,
        };
        page.by_bug.insert(hit.bug_id, page.trackers.len());
        page.trackers.push(tracker.clone());
        Recorded::New(tracker)
    }

    /// Set the completion time of a recorded tracker. Returns `false` when
    /// the page has no entry for `bug_id`.
    pub fn mark_completed(&self, page_url: &str, bug_id: BugId, completed_at: Timestamp) -> bool {
        let key = normalize_page_url(page_url);
        let mut pages = self.pages();

        match pages.get_mut(&key).and_then(|page| page.get_mut(bug_id)) {
            Some(tracker) => {
                tracker.completed_at = Some(completed_at);
                true
            }
            None => {
                debug!("mark_completed: bug {} not recorded for {}", bug_id, key);
                false
            }
        }
    }

    /// Trackers recorded for a page, in discovery order.
    pub fn trackers(&self, page_url: &str) -> Vec<DiscoveredTracker> {
        self.pages()
            .get(&normalize_page_url(page_url))
            .map(|page| page.trackers.clone())
            .unwrap_or_default()
    }

    /// Distinct companies seen on a page, in discovery order.
    pub fn app_ids(&self, page_url: &str) -> Vec<AppId> {
        self.pages()
            .get(&normalize_page_url(page_url))
            .map(PageLedger::app_ids)
            .unwrap_or_default()
    }

    /// Companies seen on a page, sorted by name, with their blocked status
    /// evaluated now. Companies unknown to `db` are left out.
    pub fn companies(&self, page_url: &str, db: &RuleDatabase, policy: &BlockingPolicy) -> Vec<CompanyStatus> {
        let mut list: Vec<CompanyStatus> = self
            .app_ids(page_url)
            .into_iter()
            .filter_map(|app_id| db.company(app_id))
            .map(|company| CompanyStatus::new(company, policy.should_block(company.app_id)))
            .collect();
        list.sort_by(|a, b| compare_by_name(&a.name, a.app_id, &b.name, b.app_id));
        list
    }

    /// Tracker first discovered through `request_url` on a page.
    pub fn tracker_for_url(&self, page_url: &str, request_url: &str) -> Option<DiscoveredTracker> {
        self.pages()
            .get(&normalize_page_url(page_url))?
            .trackers
            .iter()
            .find(|t| t.url == request_url)
            .cloned()
    }

    /// Drop everything recorded for a page. Returns `false` if nothing was.
    pub fn clear(&self, page_url: &str) -> bool {
        self.pages().remove(&normalize_page_url(page_url)).is_some()
    }

    /// Number of pages with at least one discovery.
    pub fn page_count(&self) -> usize {
        self.pages().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::MemoryPolicyStore;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;

    fn at(secs: i64) -> Timestamp {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn hit(bug_id: BugId, app_id: AppId, url: &str) -> TrackerHit<'_> {
        TrackerHit {
            bug_id,
            app_id,
            url,
            timestamp: at(100),
            is_blocked: false,
        }
    }

    fn database() -> RuleDatabase {
        RuleDatabase::load(
            br#"{"version": 1,
                 "apps": {"42": {"name": "Acme"}, "43": {"name": "beta"}, "44": {"name": "Zed"}},
                 "bugs": {"7": {"aid": 42}, "8": {"aid": 42}, "9": {"aid": 43}, "10": {"aid": 44}},
                 "patterns": {}}"#,
        )
        .unwrap()
    }

    #[test]
    fn record_is_idempotent_per_bug() {
        let ledger = DiscoveryLedger::new();

        let first = ledger.record("http://mysite.com/", hit(7, 42, "http://ads.example.com/x"));
        assert!(first.is_new());

        let mut again = hit(7, 42, "http://ads.example.com/x");
        again.timestamp = at(200);
        let second = ledger.record("http://mysite.com/", again);
        assert!(!second.is_new());
        assert_eq!(second.into_tracker().first_seen_at, at(100));

        assert_eq!(ledger.trackers("http://mysite.com/").len(), 1);
    }

    #[test]
    fn page_keys_are_normalized() {
        let ledger = DiscoveryLedger::new();
        ledger.record("HTTP://MySite.com/#top", hit(7, 42, "http://a.example.com/"));

        assert_eq!(ledger.trackers("http://mysite.com/").len(), 1);
        assert!(ledger.clear("http://mysite.com/#bottom"));
        assert_eq!(ledger.page_count(), 0);
        assert!(!ledger.clear("http://mysite.com/"));
    }

    #[test]
    fn mark_completed_sets_timestamp() {
        let ledger = DiscoveryLedger::new();
        ledger.record("http://mysite.com/", hit(7, 42, "http://a.example.com/"));

        assert!(ledger.mark_completed("http://mysite.com/", 7, at(150)));
        assert_eq!(ledger.trackers("http://mysite.com/")[0].completed_at, Some(at(150)));

        assert!(!ledger.mark_completed("http://mysite.com/", 8, at(150)));
        assert!(!ledger.mark_completed("http://other.com/", 7, at(150)));
    }

    #[test]
    fn companies_are_deduplicated_and_sorted() {
        let ledger = DiscoveryLedger::new();
        let page = "http://mysite.com/";
        ledger.record(page, hit(10, 44, "http://z.net/"));
        ledger.record(page, hit(7, 42, "http://a.example.com/"));
        ledger.record(page, hit(9, 43, "http://b.org/"));
        ledger.record(page, hit(8, 42, "http://a.example.com/pixel"));

        let db = database();
        let policy = BlockingPolicy::load(Arc::new(MemoryPolicyStore::new()));
        policy.block_selected([43]).unwrap();

        let names: Vec<(String, bool)> = ledger
            .companies(page, &db, &policy)
            .into_iter()
            .map(|c| (c.name, c.is_blocked))
            .collect();
        assert_eq!(
            names,
            vec![
                ("Acme".to_string(), false),
                ("beta".to_string(), true),
                ("Zed".to_string(), false),
            ]
        );
        assert_eq!(ledger.app_ids(page), vec![44, 42, 43]);
    }

    #[test]
    fn tracker_for_url_finds_first_request() {
        let ledger = DiscoveryLedger::new();
        ledger.record("http://mysite.com/", hit(7, 42, "http://a.example.com/x"));

        let found = ledger.tracker_for_url("http://mysite.com/", "http://a.example.com/x");
        assert_eq!(found.map(|t| t.bug_id), Some(7));
        assert!(ledger.tracker_for_url("http://mysite.com/", "http://a.example.com/y").is_none());
    }
}
