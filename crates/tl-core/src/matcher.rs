//! Request classification
//!
//! This is the hot path: every request the browser observes goes through
//! [`Matcher::classify`]. The matcher borrows one database generation and
//! never mutates it, so any number of threads may classify concurrently.

use std::fmt;

use log::{debug, trace};

use crate::database::RuleDatabase;
use crate::types::BugId;
use crate::url::{decode_path, extract_host_lowercase, extract_path, reversed_labels};

/// Shortest request path the substring strategy looks at. A bare "/" never
/// matches a path pattern.
const MIN_SUBSTRING_PATH_LEN: usize = 2;

// =============================================================================
// Match Result
// =============================================================================

/// Pattern collection that produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    HostPath,
    Host,
    PathSubstring,
    Regex,
}

impl fmt::Display for MatchSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::HostPath => "host+path",
            Self::Host => "host",
            Self::PathSubstring => "path",
            Self::Regex => "regex",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerMatch {
    pub bug_id: BugId,
    pub source: MatchSource,
}

// =============================================================================
// Matcher
// =============================================================================

pub struct Matcher<'a> {
    db: &'a RuleDatabase,
    vendor_suffix: &'a str,
}

impl<'a> Matcher<'a> {
    /// Create a matcher over `db`. Requests whose host ends with
    /// `vendor_suffix` are never classified; an empty suffix disables that
    /// exemption.
    pub fn new(db: &'a RuleDatabase, vendor_suffix: &'a str) -> Self {
        Self { db, vendor_suffix }
    }

    /// Bug id of the tracker `request_url` belongs to, if any.
    #[inline]
    pub fn classify(&self, request_url: &str, page_url: &str) -> Option<BugId> {
        self.find(request_url, page_url).map(|m| m.bug_id)
    }

    /// Like [`classify`](Self::classify), also reporting which pattern
    /// collection matched.
    pub fn find(&self, request_url: &str, page_url: &str) -> Option<TrackerMatch> {
        let host = extract_host_lowercase(request_url)?;
        let host: &str = &host;

        // First-party requests are never trackers
        if let Some(page_host) = extract_host_lowercase(page_url) {
            if page_host == host {
                return None;
            }
        }

        if !self.vendor_suffix.is_empty() && host.ends_with(self.vendor_suffix) {
            return None;
        }

        let path = decode_path(extract_path(request_url));
        let path: &str = &path;
        let found = self
            .match_host_path(host, path)
            .or_else(|| self.match_host(host))
            .or_else(|| self.match_path_substring(path))
            .or_else(|| self.match_regex(host, path));

        if let Some(m) = found {
            trace!("{} matched bug {} via {}", request_url, m.bug_id, m.source);
        }
        found
    }

    fn match_host_path(&self, host: &str, path: &str) -> Option<TrackerMatch> {
        let bug_id = self.db.host_paths().find_path(reversed_labels(host), path)?;
        Some(TrackerMatch {
            bug_id,
            source: MatchSource::HostPath,
        })
    }

    fn match_host(&self, host: &str) -> Option<TrackerMatch> {
        let bug_id = *self.db.hosts().deepest(reversed_labels(host))?;
        Some(TrackerMatch {
            bug_id,
            source: MatchSource::Host,
        })
    }

    fn match_path_substring(&self, path: &str) -> Option<TrackerMatch> {
        if path.len() < MIN_SUBSTRING_PATH_LEN {
            return None;
        }
        self.db
            .paths()
            .iter()
            .find(|p| path.contains(p.substring.as_str()))
            .map(|p| TrackerMatch {
                bug_id: p.bug_id,
                source: MatchSource::PathSubstring,
            })
    }

    fn match_regex(&self, host: &str, path: &str) -> Option<TrackerMatch> {
        let regexes = self.db.regexes();
        if regexes.is_empty() {
            return None;
        }

        let target = format!("{}{}", host, path);
        regexes
            .iter()
            .find(|r| match r.regex.is_match(&target) {
                Ok(matched) => matched,
                Err(e) => {
                    debug!("Regex for bug {} gave up on {}: {}", r.bug_id, target, e);
                    false
                }
            })
            .map(|r| TrackerMatch {
                bug_id: r.bug_id,
                source: MatchSource::Regex,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db(patterns: &str) -> RuleDatabase {
        let doc = format!(
            r#"{{"version": 1,
                 "apps": {{"42": {{"name": "Acme"}}}},
                 "bugs": {{"7": {{"aid": 42}}, "8": {{"aid": 42}}, "9": {{"aid": 42}}}},
                 "patterns": {}}}"#,
            patterns
        );
        RuleDatabase::load(doc.as_bytes()).expect("test document should parse")
    }

    #[test]
    fn host_pattern_matches_subdomain() {
        let db = db(r#"{"host": {"com": {"example": {"$": 7}}}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://ads.example.com/x", "http://mysite.com/"), Some(7));
        assert_eq!(m.classify("http://example.com/", "http://mysite.com/"), Some(7));
        assert_eq!(m.classify("http://ADS.Example.com/x", "http://mysite.com/"), Some(7));
        assert_eq!(m.classify("http://example.org/x", "http://mysite.com/"), None);
    }

    #[test]
    fn first_party_is_exempt() {
        let db = db(r#"{"host": {"com": {"example": {"$": 7}}}, "path": {"/track/": 9}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://ads.example.com/track/x", "https://ads.example.com/page"), None);
        assert_eq!(m.classify("http://ads.example.com/track/x", "https://Ads.Example.com/"), None);
        // Same registrable domain but a different host is still third-party
        assert_eq!(m.classify("http://ads.example.com/x", "http://www.example.com/"), Some(7));
    }

    #[test]
    fn vendor_domain_is_exempt() {
        let db = db(r#"{"host": {"com": {"ghostery": {"cdn": {"$": 7}}}}, "path": {"/update/": 9}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("https://cdn.ghostery.com/update/version", "http://mysite.com/"), None);

        let unrestricted = db.matcher("");
        assert_eq!(unrestricted.classify("https://cdn.ghostery.com/x", "http://mysite.com/"), Some(7));
    }

    #[test]
    fn host_path_beats_host() {
        let db = db(r#"{
            "host": {"com": {"example": {"$": 7}}},
            "host_path": {"com": {"example": {"$": [{"path": "ads/pixel", "id": 8}]}}}
        }"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(
            m.find("http://www.example.com/ads/pixel.gif", "http://mysite.com/"),
            Some(TrackerMatch {
                bug_id: 8,
                source: MatchSource::HostPath,
            })
        );
        assert_eq!(
            m.find("http://www.example.com/other", "http://mysite.com/"),
            Some(TrackerMatch {
                bug_id: 7,
                source: MatchSource::Host,
            })
        );
    }

    #[test]
    fn path_substring_requires_real_path() {
        let db = db(r#"{"path": {"/track/": 9, "/": 8}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://unrelated.net/track/pixel.gif", "http://mysite.com/"), Some(9));
        assert_eq!(m.classify("http://unrelated.net/", "http://mysite.com/"), None);
        assert_eq!(m.classify("http://unrelated.net", "http://mysite.com/"), None);
        // "/" pattern matches any path of two or more characters
        assert_eq!(m.classify("http://unrelated.net/a", "http://mysite.com/"), Some(8));
    }

    #[test]
    fn path_substring_first_in_list_wins() {
        let db = db(r#"{"path": {"pixel": 8, "/track/": 9}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://unrelated.net/track/pixel.gif", "http://mysite.com/"), Some(8));
    }

    #[test]
    fn regex_matches_host_and_path_case_insensitively() {
        let db = db(r#"{"regex": {"7": "example\\.net/collect", "8": "collect"}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(
            m.find("http://stats.EXAMPLE.net/Collect?id=1", "http://mysite.com/"),
            Some(TrackerMatch {
                bug_id: 7,
                source: MatchSource::Regex,
            })
        );
        assert_eq!(m.classify("http://other.org/collect", "http://mysite.com/"), Some(8));
        // Query strings are not part of the target
        assert_eq!(m.classify("http://other.org/x?collect=1", "http://mysite.com/"), None);
    }

    #[test]
    fn percent_encoded_paths_are_decoded() {
        let db = db(r#"{
            "host_path": {"net": {"cdn": {"$": [{"path": "ads/pixel", "id": 8}]}}},
            "path": {"/track/": 7},
            "regex": {"9": "beacon\\.example/collect v2"}
        }"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://cdn.unrelated.net/%74rack/pixel.gif", "http://mysite.com/"), Some(7));
        assert_eq!(
            m.find("http://cdn.net/ads%2Fpixel.gif", "http://mysite.com/"),
            Some(TrackerMatch {
                bug_id: 8,
                source: MatchSource::HostPath,
            })
        );
        assert_eq!(m.classify("http://beacon.example/collect%20v2", "http://mysite.com/"), Some(9));
    }

    #[test]
    fn lookahead_regex_matches() {
        let db = db(r#"{"regex": {"7": "tracker\\.net/(?!static/)"}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("http://cdn.tracker.net/pixel.gif", "http://mysite.com/"), Some(7));
        assert_eq!(m.classify("http://cdn.tracker.net/static/app.css", "http://mysite.com/"), None);
    }

    #[test]
    fn no_host_never_matches() {
        let db = db(r#"{"path": {"/track/": 9}, "regex": {"7": ".*"}}"#);
        let m = db.matcher("ghostery.com");

        assert_eq!(m.classify("about:blank", "http://mysite.com/"), None);
        assert_eq!(m.classify("data:text/html,/track/", "http://mysite.com/"), None);
    }

    #[test]
    fn empty_database_never_matches() {
        let db = RuleDatabase::empty();
        let m = db.matcher("ghostery.com");
        assert_eq!(m.classify("http://ads.example.com/track/", "http://mysite.com/"), None);
    }

    #[test]
    fn unparseable_page_url_is_not_first_party() {
        let db = db(r#"{"host": {"com": {"example": {"$": 7}}}}"#);
        let m = db.matcher("ghostery.com");
        assert_eq!(m.classify("http://ads.example.com/x", "not a url"), Some(7));
    }
}
