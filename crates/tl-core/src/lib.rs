//! Tracker classification core
//!
//! This crate decides, for every request a browser observes, whether the
//! request goes to a known tracker, which company owns that tracker and
//! whether it should be blocked.
//!
//! # Architecture
//!
//! A rule document is parsed into an immutable [`RuleDatabase`]. The
//! [`TrackerEngine`] keeps one database generation active and swaps it
//! atomically on reload, so the per-request [`Matcher`] never sees a
//! partially loaded table. Matches are recorded per page in the
//! [`DiscoveryLedger`] and judged by the [`BlockingPolicy`].
//!
//! The crate does no I/O. Fetching and persisting rule documents lives in
//! `tl-loader`.
//!
//! # Modules
//!
//! - `database`: rule tables, document parsing and the reversed-label tries
//! - `matcher`: request classification in fixed precedence order
//! - `ledger`: per-page record of discovered trackers
//! - `policy`: the tri-state blocking mode and its persistence contract
//! - `engine`: the service tying the above together
//! - `url`: allocation-light URL slicing
//! - `types`: shared type definitions

pub mod database;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod matcher;
pub mod policy;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use database::{LoadStats, RuleDatabase};
pub use engine::{EngineConfig, EngineEvent, Generation, SubscriptionId, TrackerEngine};
pub use error::{ParseError, PartialEntryError, PersistenceError, PolicyError};
pub use ledger::DiscoveryLedger;
pub use matcher::{MatchSource, Matcher, TrackerMatch};
pub use policy::{BlockingMode, BlockingPolicy, MemoryPolicyStore, PolicyStore};
pub use types::{AppId, BugId, Company, CompanyStatus, DiscoveredTracker, Timestamp};
