//! Rule database
//!
//! One immutable generation of the tracker rules: companies, bugs and the
//! four pattern collections the matcher consults. A database is built once
//! from a rule document and never patched; reloads build a new one.

mod builder;
mod document;
mod trie;

use std::collections::HashMap;
use std::fmt;

use fancy_regex::Regex;

use crate::error::{ParseError, PartialEntryError};
use crate::matcher::Matcher;
use crate::types::{compare_by_name, AppId, BugId, Company};

pub use builder::DatabaseBuilder;
pub use document::parse_document;
pub use trie::{LabelTrie, PathRule};

// =============================================================================
// Pattern Entries
// =============================================================================

/// Literal path substring pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathPattern {
    pub substring: String,
    pub bug_id: BugId,
}

/// Case-insensitive regex pattern, matched against `host + path`.
#[derive(Debug, Clone)]
pub struct RegexPattern {
    pub bug_id: BugId,
    /// Pattern as written in the document
    pub source: String,
    pub regex: Regex,
}

// =============================================================================
// Load Statistics
// =============================================================================

/// Counters collected while loading a rule document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadStats {
    pub apps: usize,
    pub bugs: usize,
    pub host_patterns: usize,
    pub host_path_patterns: usize,
    pub path_patterns: usize,
    pub regex_patterns: usize,
    /// Trie entries that replaced an earlier entry for the same node
    pub conflicts: usize,
    /// Entries skipped as malformed
    pub skipped: Vec<PartialEntryError>,
}

impl LoadStats {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

// =============================================================================
// Rule Database
// =============================================================================

/// One loaded generation of tracker rules.
#[derive(Debug, Default)]
pub struct RuleDatabase {
    version: i64,
    apps: HashMap<AppId, Company>,
    bugs: HashMap<BugId, AppId>,
    app_bugs: HashMap<AppId, Vec<BugId>>,
    hosts: LabelTrie<BugId>,
    host_paths: LabelTrie<Vec<PathRule>>,
    paths: Vec<PathPattern>,
    regexes: Vec<RegexPattern>,
    stats: LoadStats,
}

impl RuleDatabase {
    /// A database with no rules. Every classification against it is a miss.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a rule document.
    pub fn load(data: &[u8]) -> Result<Self, ParseError> {
        parse_document(data)
    }

    /// Version number the document declared.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn is_empty(&self) -> bool {
        self.bugs.is_empty()
            && self.hosts.is_empty()
            && self.host_paths.is_empty()
            && self.paths.is_empty()
            && self.regexes.is_empty()
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    /// Matcher over this generation.
    pub fn matcher<'a>(&'a self, vendor_suffix: &'a str) -> Matcher<'a> {
        Matcher::new(self, vendor_suffix)
    }

    pub fn company(&self, app_id: AppId) -> Option<&Company> {
        self.apps.get(&app_id)
    }

    pub fn app_for_bug(&self, bug_id: BugId) -> Option<AppId> {
        self.bugs.get(&bug_id).copied()
    }

    pub fn company_for_bug(&self, bug_id: BugId) -> Option<&Company> {
        self.app_for_bug(bug_id).and_then(|app_id| self.company(app_id))
    }

    /// Bugs owned by a company, in load order.
    pub fn bugs_for_app(&self, app_id: AppId) -> &[BugId] {
        self.app_bugs.get(&app_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every company, sorted by name (case-insensitive).
    pub fn companies(&self) -> Vec<&Company> {
        let mut list: Vec<&Company> = self.apps.values().collect();
        list.sort_by(|a, b| compare_by_name(&a.name, a.app_id, &b.name, b.app_id));
        list
    }

    pub(crate) fn hosts(&self) -> &LabelTrie<BugId> {
        &self.hosts
    }

    pub(crate) fn host_paths(&self) -> &LabelTrie<Vec<PathRule>> {
        &self.host_paths
    }

    pub(crate) fn paths(&self) -> &[PathPattern] {
        &self.paths
    }

    pub(crate) fn regexes(&self) -> &[RegexPattern] {
        &self.regexes
    }
}

impl fmt::Display for RuleDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "------------APPS------------")?;
        let mut apps: Vec<&Company> = self.apps.values().collect();
        apps.sort_by_key(|c| c.app_id);
        for app in apps {
            writeln!(f, "{}: {} [{}]", app.app_id, app.name, app.category)?;
        }

        writeln!(f, "------------BUGS------------")?;
        let mut bugs: Vec<(&BugId, &AppId)> = self.bugs.iter().collect();
        bugs.sort();
        for (bug_id, app_id) in bugs {
            writeln!(f, "{}: {}", bug_id, app_id)?;
        }

        writeln!(f, "------------HOST------------")?;
        for (domain, bug_id) in self.hosts.entries() {
            writeln!(f, "{}: {}", domain, bug_id)?;
        }

        writeln!(f, "------------HOST PATH------------")?;
        for (domain, rules) in self.host_paths.entries() {
            for rule in rules {
                writeln!(f, "{}/{}: {}", domain, rule.path, rule.bug_id)?;
            }
        }

        writeln!(f, "------------REGEX------------")?;
        for pattern in &self.regexes {
            writeln!(f, "{}: {}", pattern.bug_id, pattern.source)?;
        }

        writeln!(f, "------------PATH------------")?;
        for pattern in &self.paths {
            writeln!(f, "{}: {}", pattern.substring, pattern.bug_id)?;
        }

        Ok(())
    }
}
