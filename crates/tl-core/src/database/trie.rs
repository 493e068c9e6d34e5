//! Arena-indexed trie over reversed domain labels
//!
//! Node 0 is the root. Each edge is one host label, so the path from the
//! root to a node spells a domain suffix from the TLD inwards
//! (`com` → `example` → `ads`). Values live on nodes; a lookup walks as deep
//! as the host allows and the deepest value seen wins.

use std::collections::HashMap;

use crate::types::BugId;

type NodeId = u32;

const ROOT: usize = 0;

#[derive(Debug)]
struct TrieNode<T> {
    children: HashMap<Box<str>, NodeId>,
    value: Option<T>,
}

impl<T> Default for TrieNode<T> {
    fn default() -> Self {
        Self {
            children: HashMap::new(),
            value: None,
        }
    }
}

/// Trie keyed by reversed domain labels.
#[derive(Debug)]
pub struct LabelTrie<T> {
    nodes: Vec<TrieNode<T>>,
    values: usize,
}

impl<T> Default for LabelTrie<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> LabelTrie<T> {
    pub fn new() -> Self {
        Self {
            nodes: vec![TrieNode::default()],
            values: 0,
        }
    }

    /// Number of nodes carrying a value.
    pub fn len(&self) -> usize {
        self.values
    }

    pub fn is_empty(&self) -> bool {
        self.values == 0
    }

    /// Store `value` at the node spelled by `labels` (TLD first), creating
    /// nodes as needed. Returns the value it replaced, if any.
    pub fn insert<'l, I>(&mut self, labels: I, value: T) -> Option<T>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut node = ROOT;
        for label in labels {
            let label = label.to_ascii_lowercase();
            node = match self.nodes[node].children.get(label.as_str()) {
                Some(&child) => child as usize,
                None => {
                    let child = self.nodes.len();
                    self.nodes.push(TrieNode::default());
                    self.nodes[node].children.insert(label.into_boxed_str(), child as NodeId);
                    child
                }
            };
        }

        let previous = self.nodes[node].value.replace(value);
        if previous.is_none() {
            self.values += 1;
        }
        previous
    }

    /// Value on the deepest node reachable by `labels`.
    pub fn deepest<'l, I>(&self, labels: I) -> Option<&T>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut found = None;
        let mut node = ROOT;
        for label in labels {
            node = match self.nodes[node].children.get(label) {
                Some(&child) => child as usize,
                None => break,
            };
            if let Some(value) = &self.nodes[node].value {
                found = Some(value);
            }
        }
        found
    }

    /// Values on every node reachable by `labels`, deepest first.
    pub fn along<'l, I>(&self, labels: I) -> Vec<&T>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let mut found = Vec::new();
        let mut node = ROOT;
        for label in labels {
            node = match self.nodes[node].children.get(label) {
                Some(&child) => child as usize,
                None => break,
            };
            if let Some(value) = &self.nodes[node].value {
                found.push(value);
            }
        }
        found.reverse();
        found
    }

    /// All stored values with the domain suffix they are keyed on
    /// (`ads.example.com` form), sorted by domain.
    pub fn entries(&self) -> Vec<(String, &T)> {
        let mut out = Vec::with_capacity(self.values);
        let mut stack: Vec<(usize, Vec<&str>)> = vec![(ROOT, Vec::new())];

        while let Some((node, labels)) = stack.pop() {
            if let Some(value) = &self.nodes[node].value {
                let domain: Vec<&str> = labels.iter().rev().copied().collect();
                out.push((domain.join("."), value));
            }
            for (label, &child) in &self.nodes[node].children {
                let mut next = labels.clone();
                next.push(&**label);
                stack.push((child as usize, next));
            }
        }

        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

// =============================================================================
// Host + Path Rules
// =============================================================================

/// Path prefix attached to a host-path trie node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    /// Prefix without a leading '/'
    pub path: String,
    pub bug_id: BugId,
}

impl LabelTrie<Vec<PathRule>> {
    /// First path rule matching `path` on the longest matching host suffix.
    ///
    /// Nodes are tried deepest first; within a node, rules are tried in load
    /// order. A rule matches when the request path starts with its prefix
    /// (both compared without the leading '/').
    pub fn find_path<'l, I>(&self, labels: I, path: &str) -> Option<BugId>
    where
        I: IntoIterator<Item = &'l str>,
    {
        let path = path.strip_prefix('/').unwrap_or(path);
        self.along(labels).into_iter().find_map(|rules| {
            rules
                .iter()
                .find(|rule| path.starts_with(rule.path.as_str()))
                .map(|rule| rule.bug_id)
        })
    }

    /// Total number of path rules across all nodes.
    pub fn rule_count(&self) -> usize {
        self.nodes
            .iter()
            .filter_map(|node| node.value.as_ref())
            .map(Vec::len)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rev(host: &str) -> std::str::RSplit<'_, char> {
        host.rsplit('.')
    }

    #[test]
    fn deepest_value_wins() {
        let mut trie = LabelTrie::new();
        trie.insert(["com", "example"], 1u32);
        trie.insert(["com", "example", "ads"], 2u32);

        assert_eq!(trie.deepest(rev("ads.example.com")), Some(&2));
        assert_eq!(trie.deepest(rev("cdn.ads.example.com")), Some(&2));
        assert_eq!(trie.deepest(rev("www.example.com")), Some(&1));
        assert_eq!(trie.deepest(rev("example.com")), Some(&1));
        assert_eq!(trie.deepest(rev("com")), None);
        assert_eq!(trie.deepest(rev("notexample.com")), None);
        assert_eq!(trie.len(), 2);
    }

    #[test]
    fn insert_replaces_and_reports_previous() {
        let mut trie = LabelTrie::new();
        assert_eq!(trie.insert(["com", "example"], 1u32), None);
        assert_eq!(trie.insert(["COM", "Example"], 9u32), Some(1));
        assert_eq!(trie.deepest(rev("example.com")), Some(&9));
        assert_eq!(trie.len(), 1);
    }

    #[test]
    fn along_returns_deepest_first() {
        let mut trie = LabelTrie::new();
        trie.insert(["com"], 1u32);
        trie.insert(["com", "example", "ads"], 3u32);

        let found: Vec<u32> = trie.along(rev("x.ads.example.com")).into_iter().copied().collect();
        assert_eq!(found, vec![3, 1]);
    }

    #[test]
    fn entries_spell_domains() {
        let mut trie = LabelTrie::new();
        trie.insert(["com", "example"], 1u32);
        trie.insert(["net", "cdn", "ads"], 2u32);

        let entries: Vec<(String, u32)> = trie.entries().into_iter().map(|(d, v)| (d, *v)).collect();
        assert_eq!(
            entries,
            vec![("ads.cdn.net".to_string(), 2), ("example.com".to_string(), 1)]
        );
    }

    #[test]
    fn find_path_prefers_longest_host_suffix() {
        let mut trie: LabelTrie<Vec<PathRule>> = LabelTrie::new();
        trie.insert(
            ["com", "example"],
            vec![PathRule { path: "pixel".to_string(), bug_id: 10 }],
        );
        trie.insert(
            ["com", "example", "ads"],
            vec![
                PathRule { path: "pixel/v2".to_string(), bug_id: 21 },
                PathRule { path: "pixel".to_string(), bug_id: 20 },
            ],
        );

        assert_eq!(trie.find_path(rev("ads.example.com"), "/pixel/v2/a.gif"), Some(21));
        assert_eq!(trie.find_path(rev("ads.example.com"), "/pixel.gif"), Some(20));
        assert_eq!(trie.find_path(rev("www.example.com"), "/pixel.gif"), Some(10));
        assert_eq!(trie.find_path(rev("www.example.com"), "/other"), None);
        assert_eq!(trie.rule_count(), 3);
    }
}
