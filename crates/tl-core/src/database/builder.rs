//! Incremental assembly of a [`RuleDatabase`].

use log::{debug, info, warn};
use fancy_regex::Regex;

use super::{PathPattern, PathRule, RegexPattern, RuleDatabase};
use crate::error::PartialEntryError;
use crate::types::{AppId, BugId, Company};

/// Builds a database table by table. Entries are kept in the order they
/// are added; trie entries for an already populated node replace it.
pub struct DatabaseBuilder {
    db: RuleDatabase,
}

impl DatabaseBuilder {
    pub fn new(version: i64) -> Self {
        let mut db = RuleDatabase::empty();
        db.version = version;
        Self { db }
    }

    pub fn add_company(&mut self, company: Company) {
        self.db.apps.insert(company.app_id, company);
    }

    pub fn add_bug(&mut self, bug_id: BugId, app_id: AppId) {
        if let Some(previous) = self.db.bugs.insert(bug_id, app_id) {
            if let Some(list) = self.db.app_bugs.get_mut(&previous) {
                list.retain(|&id| id != bug_id);
            }
        }
        self.db.app_bugs.entry(app_id).or_default().push(bug_id);
    }

    pub fn add_host<'l, I>(&mut self, labels: I, bug_id: BugId)
    where
        I: IntoIterator<Item = &'l str>,
    {
        let labels: Vec<&str> = labels.into_iter().collect();
        if let Some(previous) = self.db.hosts.insert(labels.iter().copied(), bug_id) {
            self.db.stats.conflicts += 1;
            warn!(
                "patterns.host: {} redefined, bug {} replaces bug {}",
                display_domain(&labels),
                bug_id,
                previous
            );
        }
    }

    pub fn add_host_path<'l, I>(&mut self, labels: I, rules: Vec<PathRule>)
    where
        I: IntoIterator<Item = &'l str>,
    {
        let labels: Vec<&str> = labels.into_iter().collect();
        if let Some(previous) = self.db.host_paths.insert(labels.iter().copied(), rules) {
            self.db.stats.conflicts += 1;
            warn!(
                "patterns.host_path: {} redefined, {} earlier path rule(s) dropped",
                display_domain(&labels),
                previous.len()
            );
        }
    }

    pub fn add_path(&mut self, substring: String, bug_id: BugId) {
        self.db.paths.push(PathPattern { substring, bug_id });
    }

    /// Compile and append a regex pattern. Lookaround and backreferences
    /// are supported. A pattern that does not compile is recorded as
    /// skipped and never matches.
    pub fn add_regex(&mut self, bug_id: BugId, source: &str) {
        match Regex::new(&format!("(?i){}", source)) {
            Ok(regex) => self.db.regexes.push(RegexPattern {
                bug_id,
                source: source.to_string(),
                regex,
            }),
            Err(e) => {
                warn!("patterns.regex: pattern for bug {} rejected: {}", bug_id, e);
                self.skip(PartialEntryError::InvalidRegex {
                    bug_id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Record a malformed entry.
    pub fn skip(&mut self, error: PartialEntryError) {
        debug!("Skipping entry: {}", error);
        self.db.stats.skipped.push(error);
    }

    pub fn finish(mut self) -> RuleDatabase {
        let stats = &mut self.db.stats;
        stats.apps = self.db.apps.len();
        stats.bugs = self.db.bugs.len();
        stats.host_patterns = self.db.hosts.len();
        stats.host_path_patterns = self.db.host_paths.rule_count();
        stats.path_patterns = self.db.paths.len();
        stats.regex_patterns = self.db.regexes.len();

        info!(
            "Rule database v{}: {} apps, {} bugs, {} host, {} host+path, {} path, {} regex ({} skipped, {} conflicts)",
            self.db.version,
            stats.apps,
            stats.bugs,
            stats.host_patterns,
            stats.host_path_patterns,
            stats.path_patterns,
            stats.regex_patterns,
            stats.skipped.len(),
            stats.conflicts,
        );

        self.db
    }
}

fn display_domain(reversed: &[&str]) -> String {
    let labels: Vec<&str> = reversed.iter().rev().copied().collect();
    labels.join(".")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(app_id: AppId, name: &str) -> Company {
        Company {
            app_id,
            name: name.to_string(),
            category: String::new(),
            tags: Vec::new(),
        }
    }

    #[test]
    fn reassigned_bug_moves_between_apps() {
        let mut builder = DatabaseBuilder::new(1);
        builder.add_company(company(1, "One"));
        builder.add_company(company(2, "Two"));
        builder.add_bug(10, 1);
        builder.add_bug(11, 1);
        builder.add_bug(10, 2);
        let db = builder.finish();

        assert_eq!(db.bugs_for_app(1), &[11]);
        assert_eq!(db.bugs_for_app(2), &[10]);
        assert_eq!(db.app_for_bug(10), Some(2));
        assert_eq!(db.stats().bugs, 2);
    }

    #[test]
    fn host_conflict_last_wins_and_is_counted() {
        let mut builder = DatabaseBuilder::new(1);
        builder.add_host(["com", "example"], 1);
        builder.add_host(["com", "example"], 2);
        let db = builder.finish();

        assert_eq!(db.hosts().deepest("example.com".rsplit('.')), Some(&2));
        assert_eq!(db.stats().conflicts, 1);
        assert_eq!(db.stats().host_patterns, 1);
    }

    #[test]
    fn invalid_regex_is_skipped() {
        let mut builder = DatabaseBuilder::new(1);
        builder.add_regex(5, "ads(");
        builder.add_regex(6, "tracker\\.js");
        let db = builder.finish();

        assert_eq!(db.regexes().len(), 1);
        assert_eq!(db.regexes()[0].bug_id, 6);
        assert!(matches!(
            db.stats().skipped.as_slice(),
            [PartialEntryError::InvalidRegex { bug_id: 5, .. }]
        ));
    }

    #[test]
    fn lookaround_regex_compiles() {
        let mut builder = DatabaseBuilder::new(1);
        builder.add_regex(5, r"tracker\.net/(?!static/)");
        builder.add_regex(6, r"(\w+)\.\1\.js");
        let db = builder.finish();

        assert_eq!(db.regexes().len(), 2);
        assert!(db.stats().skipped.is_empty());
        assert_eq!(db.regexes()[0].source, r"tracker\.net/(?!static/)");
        assert!(db.regexes()[0].regex.is_match("cdn.TRACKER.net/pixel").unwrap());
        assert!(!db.regexes()[0].regex.is_match("cdn.tracker.net/static/a.css").unwrap());
    }
}
