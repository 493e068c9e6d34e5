//! Rule document parsing
//!
//! The document is a JSON object:
//!
//! ```json
//! {
//!   "version": 707,
//!   "apps": { "42": { "name": "Acme", "cat": "advertising", "tags": [39] } },
//!   "bugs": { "7": { "aid": 42 } },
//!   "patterns": {
//!     "host":      { "com": { "example": { "$": 7 } } },
//!     "host_path": { "com": { "example": { "$": [ { "path": "ads/pixel", "id": 7 } ] } } },
//!     "path":      { "/track/": 7 },
//!     "regex":     { "7": "example\\.com/collect" }
//!   }
//! }
//! ```
//!
//! Only the top-level shape is mandatory. Entries with a non-integer id or
//! an unexpected value are skipped and recorded in the load statistics.

use log::debug;
use serde_json::{Map, Value};

use super::{DatabaseBuilder, PathRule, RuleDatabase};
use crate::error::{ParseError, PartialEntryError, RuleTable};
use crate::types::{AppId, BugId, Company};

/// Terminal marker key inside the host tries.
const TERMINAL: &str = "$";

/// Parse a rule document into a database.
pub fn parse_document(data: &[u8]) -> Result<RuleDatabase, ParseError> {
    let root: Value = serde_json::from_slice(data)?;
    let root = root.as_object().ok_or(ParseError::NotAnObject)?;

    let version = root
        .get("version")
        .ok_or(ParseError::MissingKey("version"))?
        .as_i64()
        .ok_or(ParseError::InvalidKey {
            key: "version",
            expected: "an integer",
        })?;
    let apps = required_object(root, "apps")?;
    let bugs = required_object(root, "bugs")?;
    let patterns = required_object(root, "patterns")?;

    let mut builder = DatabaseBuilder::new(version);

    for (key, value) in apps {
        load_app(&mut builder, key, value);
    }

    for (key, value) in bugs {
        load_bug(&mut builder, key, value);
    }

    if let Some(host) = pattern_table(&mut builder, patterns, "host", RuleTable::Host) {
        load_host_node(&mut builder, &mut Vec::new(), host);
    }

    if let Some(host_path) = pattern_table(&mut builder, patterns, "host_path", RuleTable::HostPath) {
        load_host_path_node(&mut builder, &mut Vec::new(), host_path);
    }

    if let Some(paths) = pattern_table(&mut builder, patterns, "path", RuleTable::Path) {
        for (substring, value) in paths {
            load_path(&mut builder, substring, value);
        }
    }

    if let Some(regexes) = pattern_table(&mut builder, patterns, "regex", RuleTable::Regex) {
        for (key, value) in regexes {
            load_regex(&mut builder, key, value);
        }
    }

    Ok(builder.finish())
}

fn required_object<'a>(
    root: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a Map<String, Value>, ParseError> {
    root.get(key)
        .ok_or(ParseError::MissingKey(key))?
        .as_object()
        .ok_or(ParseError::InvalidKey {
            key,
            expected: "an object",
        })
}

fn pattern_table<'a>(
    builder: &mut DatabaseBuilder,
    patterns: &'a Map<String, Value>,
    key: &str,
    table: RuleTable,
) -> Option<&'a Map<String, Value>> {
    match patterns.get(key) {
        None => {
            debug!("{} absent, treated as empty", table);
            None
        }
        Some(Value::Object(map)) => Some(map),
        Some(_) => {
            builder.skip(PartialEntryError::BadShape {
                table,
                key: key.to_string(),
                reason: "table is not an object",
            });
            None
        }
    }
}

fn parse_id(key: &str) -> Option<u32> {
    key.parse().ok()
}

fn as_id(value: &Value) -> Option<u32> {
    value.as_u64().and_then(|v| u32::try_from(v).ok())
}

fn bad_shape(table: RuleTable, key: &str, reason: &'static str) -> PartialEntryError {
    PartialEntryError::BadShape {
        table,
        key: key.to_string(),
        reason,
    }
}

// =============================================================================
// Apps and Bugs
// =============================================================================

fn load_app(builder: &mut DatabaseBuilder, key: &str, value: &Value) {
    let Some(app_id) = parse_id(key) else {
        return builder.skip(PartialEntryError::NonNumericId {
            table: RuleTable::Apps,
            key: key.to_string(),
        });
    };
    let Some(fields) = value.as_object() else {
        return builder.skip(bad_shape(RuleTable::Apps, key, "expected an object"));
    };
    let Some(name) = fields.get("name").and_then(Value::as_str) else {
        return builder.skip(bad_shape(RuleTable::Apps, key, "missing name"));
    };

    let category = fields
        .get("cat")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let tags = fields
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(as_id).collect())
        .unwrap_or_default();

    builder.add_company(Company {
        app_id: app_id as AppId,
        name: name.to_string(),
        category,
        tags,
    });
}

fn load_bug(builder: &mut DatabaseBuilder, key: &str, value: &Value) {
    let Some(bug_id) = parse_id(key) else {
        return builder.skip(PartialEntryError::NonNumericId {
            table: RuleTable::Bugs,
            key: key.to_string(),
        });
    };
    let Some(app_id) = value.get("aid").and_then(as_id) else {
        return builder.skip(bad_shape(RuleTable::Bugs, key, "missing integer aid"));
    };

    builder.add_bug(bug_id as BugId, app_id as AppId);
}

// =============================================================================
// Host Tries
// =============================================================================

/// Append the labels spelled by a (possibly dotted) key.
fn push_labels(labels: &mut Vec<String>, key: &str) {
    labels.extend(key.split('.').filter(|l| !l.is_empty()).map(str::to_string));
}

fn display_key(labels: &[String]) -> String {
    labels.join(".")
}

fn load_host_node(builder: &mut DatabaseBuilder, labels: &mut Vec<String>, node: &Map<String, Value>) {
    for (key, value) in node {
        if key == TERMINAL {
            add_host_terminal(builder, labels, value);
            continue;
        }

        let depth = labels.len();
        push_labels(labels, key);
        match value {
            Value::Object(child) => load_host_node(builder, labels, child),
            // "com.example": 7 shorthand for a single terminal
            Value::Number(_) => add_host_terminal(builder, labels, value),
            _ => builder.skip(bad_shape(RuleTable::Host, &display_key(labels), "expected an object")),
        }
        labels.truncate(depth);
    }
}

fn add_host_terminal(builder: &mut DatabaseBuilder, labels: &[String], value: &Value) {
    if labels.is_empty() {
        return builder.skip(bad_shape(RuleTable::Host, TERMINAL, "terminal marker at root"));
    }
    match as_id(value) {
        Some(bug_id) => builder.add_host(labels.iter().map(String::as_str), bug_id),
        None => builder.skip(bad_shape(
            RuleTable::Host,
            &display_key(labels),
            "terminal marker is not a bug id",
        )),
    }
}

fn load_host_path_node(builder: &mut DatabaseBuilder, labels: &mut Vec<String>, node: &Map<String, Value>) {
    for (key, value) in node {
        if key == TERMINAL {
            add_host_path_terminal(builder, labels, value);
            continue;
        }

        let depth = labels.len();
        push_labels(labels, key);
        match value {
            Value::Object(child) => load_host_path_node(builder, labels, child),
            Value::Array(_) => add_host_path_terminal(builder, labels, value),
            _ => builder.skip(bad_shape(RuleTable::HostPath, &display_key(labels), "expected an object")),
        }
        labels.truncate(depth);
    }
}

fn add_host_path_terminal(builder: &mut DatabaseBuilder, labels: &[String], value: &Value) {
    let key = display_key(labels);
    if labels.is_empty() {
        return builder.skip(bad_shape(RuleTable::HostPath, TERMINAL, "terminal marker at root"));
    }
    let Some(entries) = value.as_array() else {
        return builder.skip(bad_shape(RuleTable::HostPath, &key, "terminal marker is not a list"));
    };

    let mut rules = Vec::with_capacity(entries.len());
    for entry in entries {
        let path = entry.get("path").and_then(Value::as_str);
        let bug_id = entry.get("id").and_then(as_id);
        match (path, bug_id) {
            (Some(path), Some(bug_id)) => rules.push(PathRule {
                path: path.strip_prefix('/').unwrap_or(path).to_string(),
                bug_id,
            }),
            _ => builder.skip(bad_shape(RuleTable::HostPath, &key, "path rule needs path and id")),
        }
    }

    if !rules.is_empty() {
        builder.add_host_path(labels.iter().map(String::as_str), rules);
    }
}

// =============================================================================
// Path and Regex Lists
// =============================================================================

fn load_path(builder: &mut DatabaseBuilder, substring: &str, value: &Value) {
    if substring.is_empty() {
        return builder.skip(bad_shape(RuleTable::Path, substring, "empty substring"));
    }
    match as_id(value) {
        Some(bug_id) => builder.add_path(substring.to_string(), bug_id),
        None => builder.skip(bad_shape(RuleTable::Path, substring, "value is not a bug id")),
    }
}

fn load_regex(builder: &mut DatabaseBuilder, key: &str, value: &Value) {
    let Some(bug_id) = parse_id(key) else {
        return builder.skip(PartialEntryError::NonNumericId {
            table: RuleTable::Regex,
            key: key.to_string(),
        });
    };
    match value.as_str() {
        Some(pattern) if !pattern.is_empty() => builder.add_regex(bug_id, pattern),
        _ => builder.skip(bad_shape(RuleTable::Regex, key, "expected a non-empty pattern string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "version": 707,
        "apps": {
            "42": { "name": "Acme", "cat": "advertising", "tags": [39, 48] },
            "43": { "name": "beta Analytics" },
            "x1": { "name": "Broken" },
            "44": "not an object"
        },
        "bugs": {
            "7": { "aid": 42 },
            "8": { "aid": 43 },
            "9": { "aid": 42 },
            "nope": { "aid": 1 },
            "10": { "app": 1 }
        },
        "patterns": {
            "host": {
                "com": { "example": { "$": 7 }, "tracker": { "cdn": { "$": 8 } } },
                "net.adnet": 9,
                "org": { "bad": { "$": "seven" } }
            },
            "host_path": {
                "com": { "example": { "$": [ { "path": "/ads/pixel", "id": 9 }, { "path": 3 } ] } }
            },
            "path": { "/track/": 8, "": 7, "/beacon": "x" },
            "regex": { "7": "collect\\.php", "8": "([", "abc": "x" }
        }
    }"#;

    #[test]
    fn parses_tables_and_skips_malformed_entries() {
        let db = parse_document(DOCUMENT.as_bytes()).expect("document should parse");
        let stats = db.stats();

        assert_eq!(db.version(), 707);
        assert_eq!(stats.apps, 2);
        assert_eq!(stats.bugs, 3);
        assert_eq!(stats.host_patterns, 3);
        assert_eq!(stats.host_path_patterns, 1);
        assert_eq!(stats.path_patterns, 1);
        assert_eq!(stats.regex_patterns, 1);
        // x1, "44", nope, 10, org.bad, bad path rule, "", /beacon, "([", abc
        assert_eq!(stats.skipped_count(), 10);

        let acme = db.company(42).expect("acme loaded");
        assert_eq!(acme.name, "Acme");
        assert_eq!(acme.category, "advertising");
        assert_eq!(acme.tags, vec![39, 48]);
        assert_eq!(db.bugs_for_app(42), &[7, 9]);
    }

    #[test]
    fn dotted_keys_expand_to_labels() {
        let db = parse_document(DOCUMENT.as_bytes()).expect("document should parse");
        assert_eq!(db.hosts().deepest("x.adnet.net".rsplit('.')), Some(&9));
        assert_eq!(db.hosts().deepest("a.cdn.tracker.com".rsplit('.')), Some(&8));
    }

    #[test]
    fn host_path_rules_drop_leading_slash() {
        let db = parse_document(DOCUMENT.as_bytes()).expect("document should parse");
        assert_eq!(
            db.host_paths().find_path("www.example.com".rsplit('.'), "/ads/pixel.gif"),
            Some(9)
        );
    }

    #[test]
    fn missing_top_level_key_is_fatal() {
        let err = parse_document(br#"{"version": 1, "apps": {}, "bugs": {}}"#).unwrap_err();
        assert!(matches!(err, ParseError::MissingKey("patterns")));

        let err = parse_document(br#"{"version": "1", "apps": {}, "bugs": {}, "patterns": {}}"#).unwrap_err();
        assert!(matches!(err, ParseError::InvalidKey { key: "version", .. }));

        let err = parse_document(b"[1, 2]").unwrap_err();
        assert!(matches!(err, ParseError::NotAnObject));

        let err = parse_document(b"{not json").unwrap_err();
        assert!(matches!(err, ParseError::Json(_)));
    }

    #[test]
    fn missing_pattern_tables_are_empty() {
        let db = parse_document(br#"{"version": 3, "apps": {}, "bugs": {}, "patterns": {}}"#)
            .expect("document should parse");
        assert!(db.is_empty());
        assert_eq!(db.stats().skipped_count(), 0);
    }

    #[test]
    fn list_tables_keep_document_order() {
        let db = parse_document(
            br#"{"version": 1, "apps": {}, "bugs": {},
                 "patterns": {"path": {"/zz/": 1, "/aa/": 2}, "regex": {"9": "b", "3": "a"}}}"#,
        )
        .expect("document should parse");

        let paths: Vec<u32> = db.paths().iter().map(|p| p.bug_id).collect();
        assert_eq!(paths, vec![1, 2]);
        let regexes: Vec<u32> = db.regexes().iter().map(|r| r.bug_id).collect();
        assert_eq!(regexes, vec![9, 3]);
    }
}
