//! Core type definitions for the tracker engine
//!
//! These types are shared by the rule database, the matcher and the
//! discovery ledger, and are the values handed out to the embedding browser.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a single tracker pattern ("bug").
pub type BugId = u32;

/// Identifier of the company ("app") owning one or more bugs.
pub type AppId = u32;

/// Wall-clock instant a request was observed or completed.
pub type Timestamp = DateTime<Utc>;

// =============================================================================
// Companies
// =============================================================================

/// A tracker vendor as described by the rule document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub app_id: AppId,
    pub name: String,
    /// Vendor category, e.g. `advertising` or `site_analytics`
    pub category: String,
    /// Numeric tag ids attached to the vendor
    pub tags: Vec<u32>,
}

/// A company as presented for a page, with its blocked status evaluated
/// against the current blocking policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompanyStatus {
    pub app_id: AppId,
    pub name: String,
    pub category: String,
    pub is_blocked: bool,
}

impl CompanyStatus {
    pub fn new(company: &Company, is_blocked: bool) -> Self {
        Self {
            app_id: company.app_id,
            name: company.name.clone(),
            category: company.category.clone(),
            is_blocked,
        }
    }
}

/// Orders companies by name, case-insensitively, falling back to the app id
/// so that the order is total.
pub(crate) fn compare_by_name(a_name: &str, a_id: AppId, b_name: &str, b_id: AppId) -> std::cmp::Ordering {
    let a = a_name.to_lowercase();
    let b = b_name.to_lowercase();
    a.cmp(&b).then(a_id.cmp(&b_id))
}

// =============================================================================
// Discovered Trackers
// =============================================================================

/// A tracker request observed on a page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredTracker {
    pub bug_id: BugId,
    pub app_id: AppId,
    /// Request URL that first matched the bug on this page
    pub url: String,
    pub first_seen_at: Timestamp,
    /// Set once the network exchange for the request finished
    pub completed_at: Option<Timestamp>,
    /// Blocked status at discovery time
    pub is_blocked: bool,
}
