//! Reverse-index cache over tags and authors.
//!
//! Derived, in-memory view mapping each tag and normalized author to the
//! set of record ids carrying it. Rebuilt wholesale from the metadata
//! store at startup and patched incrementally on every mutation. Never
//! ground truth: any id held here must exist in the store, and the whole
//! structure is recoverable from a single store scan.

use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use parking_lot::RwLock;

use crate::record::{DocumentRecord, normalize_author};

/// Counts reported by [`ReverseIndexCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub tag_keys: usize,
    pub author_keys: usize,
    pub tag_entries: usize,
    pub author_entries: usize,
}

#[derive(Default)]
struct CacheInner {
    tags: HashMap<String, HashSet<String>>,
    authors: HashMap<String, HashSet<String>>,
}

/// Tag/author token to id-set index.
///
/// Mutations serialize behind the write lock; queries share the read
/// lock. No await points ever run under either.
#[derive(Default)]
pub struct ReverseIndexCache {
    inner: RwLock<CacheInner>,
}

impl ReverseIndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale reconstruction from a full record snapshot.
    pub fn rebuild<'a>(&self, records: impl IntoIterator<Item = &'a DocumentRecord>) {
        let mut inner = self.inner.write();
        inner.tags.clear();
        inner.authors.clear();
        for record in records {
            index_record(
                &mut inner,
                &record.id,
                record.tags.iter().map(String::as_str),
                record.authors.iter().map(String::as_str),
            );
        }
    }

    /// Index one record's tags and authors.
    pub fn add<'a>(
        &self,
        id: &str,
        tags: impl IntoIterator<Item = &'a str>,
        authors: impl IntoIterator<Item = &'a str>,
    ) {
        let mut inner = self.inner.write();
        index_record(&mut inner, id, tags, authors);
    }

    /// Drop one record's tags and authors. Keys whose set drains are
    /// removed outright: empty sets are never stored.
    pub fn remove<'a>(
        &self,
        id: &str,
        tags: impl IntoIterator<Item = &'a str>,
        authors: impl IntoIterator<Item = &'a str>,
    ) {
        let mut inner = self.inner.write();
        for tag in tags {
            remove_posting(&mut inner.tags, tag, id);
        }
        for author in authors {
            remove_posting(&mut inner.authors, &normalize_author(author), id);
        }
    }

    /// Ids carrying every requested tag. Empty input or any missed key
    /// yields the empty set; predicate absence is the caller's concern.
    pub fn query_tags(&self, keys: &[String], strict: bool, ignore_case: bool) -> HashSet<String> {
        let inner = self.inner.read();
        query_index(&inner.tags, keys.iter().map(String::as_str), strict, ignore_case)
    }

    /// Ids carrying every requested author. Requested names run through
    /// the same normalization as indexing, so any accepted author form
    /// matches.
    pub fn query_authors(
        &self,
        keys: &[String],
        strict: bool,
        ignore_case: bool,
    ) -> HashSet<String> {
        let normalized: Vec<String> = keys.iter().map(|key| normalize_author(key)).collect();
        let inner = self.inner.read();
        query_index(
            &inner.authors,
            normalized.iter().map(String::as_str),
            strict,
            ignore_case,
        )
    }

    /// Union of the exact id-sets for the given tag keys, one lock
    /// acquisition. Used by subtree resolution, where one requested tag
    /// expands to several index keys.
    pub fn union_tags(&self, keys: &[String]) -> HashSet<String> {
        let inner = self.inner.read();
        let mut out = HashSet::new();
        for key in keys {
            if let Some(ids) = inner.tags.get(key) {
                out.extend(ids.iter().cloned());
            }
        }
        out
    }

    /// All tag keys, sorted.
    pub fn tag_keys(&self) -> Vec<String> {
        self.inner.read().tags.keys().cloned().sorted().collect()
    }

    /// All normalized author keys, sorted.
    pub fn author_keys(&self) -> Vec<String> {
        self.inner.read().authors.keys().cloned().sorted().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.read();
        CacheStats {
            tag_keys: inner.tags.len(),
            author_keys: inner.authors.len(),
            tag_entries: inner.tags.values().map(HashSet::len).sum(),
            author_entries: inner.authors.values().map(HashSet::len).sum(),
        }
    }

    /// Snapshot of the tag index, for rebuild-equivalence checks.
    pub fn tag_snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.inner.read().tags.clone()
    }

    /// Snapshot of the author index.
    pub fn author_snapshot(&self) -> HashMap<String, HashSet<String>> {
        self.inner.read().authors.clone()
    }
}

fn index_record<'a>(
    inner: &mut CacheInner,
    id: &str,
    tags: impl IntoIterator<Item = &'a str>,
    authors: impl IntoIterator<Item = &'a str>,
) {
    for tag in tags {
        inner
            .tags
            .entry(tag.to_string())
            .or_default()
            .insert(id.to_string());
    }
    for author in authors {
        inner
            .authors
            .entry(normalize_author(author))
            .or_default()
            .insert(id.to_string());
    }
}

fn remove_posting(index: &mut HashMap<String, HashSet<String>>, key: &str, id: &str) {
    if let Some(ids) = index.get_mut(key) {
        ids.remove(id);
        if ids.is_empty() {
            index.remove(key);
        }
    }
}

fn query_index<'a>(
    index: &HashMap<String, HashSet<String>>,
    keys: impl Iterator<Item = &'a str>,
    strict: bool,
    ignore_case: bool,
) -> HashSet<String> {
    let mut result: Option<HashSet<String>> = None;
    let mut any_key = false;

    for key in keys {
        any_key = true;
        let candidates = resolve_key(index, key, strict, ignore_case);
        match result {
            None => result = Some(candidates),
            Some(ref mut acc) => acc.retain(|id| candidates.contains(id)),
        }
        if result.as_ref().is_some_and(HashSet::is_empty) {
            return HashSet::new();
        }
    }

    if !any_key {
        return HashSet::new();
    }
    result.unwrap_or_default()
}

/// Ids matching a single requested key: exact lookup when strict,
/// substring union across index keys otherwise.
fn resolve_key(
    index: &HashMap<String, HashSet<String>>,
    key: &str,
    strict: bool,
    ignore_case: bool,
) -> HashSet<String> {
    if strict && !ignore_case {
        return index.get(key).cloned().unwrap_or_default();
    }

    let needle = if ignore_case {
        key.to_lowercase()
    } else {
        key.to_string()
    };

    let mut out = HashSet::new();
    for (index_key, ids) in index {
        let haystack = if ignore_case {
            index_key.to_lowercase()
        } else {
            index_key.clone()
        };
        let hit = if strict {
            haystack == needle
        } else {
            haystack.contains(&needle)
        };
        if hit {
            out.extend(ids.iter().cloned());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn populated() -> ReverseIndexCache {
        let cache = ReverseIndexCache::new();
        cache.add("d1", ["nlp", "nlp->transformers"], ["Vaswani, Ashish"]);
        cache.add("d2", ["nlp"], ["Ashish Vaswani", "Noam Shazeer"]);
        cache.add("d3", ["vision"], ["He, Kaiming"]);
        cache
    }

    #[test]
    fn test_single_tag_query() {
        let cache = populated();
        assert_eq!(cache.query_tags(&keys(&["nlp"]), true, false), ids(&["d1", "d2"]));
        assert_eq!(cache.query_tags(&keys(&["vision"]), true, false), ids(&["d3"]));
    }

    #[test]
    fn test_multi_key_intersection() {
        let cache = populated();
        let both = cache.query_tags(&keys(&["nlp", "nlp->transformers"]), true, false);
        assert_eq!(both, ids(&["d1"]));
    }

    #[test]
    fn test_missed_key_yields_empty() {
        let cache = populated();
        assert!(cache.query_tags(&keys(&["nlp", "absent"]), true, false).is_empty());
        assert!(cache.query_tags(&[], true, false).is_empty());
    }

    #[test]
    fn test_author_normalization_converges() {
        let cache = populated();
        // "Vaswani, Ashish" and "Ashish Vaswani" index under one key.
        let hits = cache.query_authors(&keys(&["ashish vaswani"]), true, false);
        assert_eq!(hits, ids(&["d1", "d2"]));
        assert_eq!(cache.author_keys().len(), 3);
    }

    #[test]
    fn test_substring_matching() {
        let cache = populated();
        // strict=false unions every key containing the needle, then
        // intersects across requested keys.
        let hits = cache.query_tags(&keys(&["nlp"]), false, false);
        assert_eq!(hits, ids(&["d1", "d2"]));
        let hits = cache.query_tags(&keys(&["transform"]), false, false);
        assert_eq!(hits, ids(&["d1"]));
        let hits = cache.query_authors(&keys(&["vaswani"]), false, false);
        assert_eq!(hits, ids(&["d1", "d2"]));
    }

    #[test]
    fn test_ignore_case() {
        let cache = populated();
        assert!(cache.query_tags(&keys(&["NLP"]), true, false).is_empty());
        assert_eq!(cache.query_tags(&keys(&["NLP"]), true, true), ids(&["d1", "d2"]));
        assert_eq!(cache.query_tags(&keys(&["TRANSFORM"]), false, true), ids(&["d1"]));
    }

    #[test]
    fn test_remove_evicts_empty_keys() {
        let cache = populated();
        cache.remove("d3", ["vision"], ["He, Kaiming"]);
        assert!(cache.query_tags(&keys(&["vision"]), true, false).is_empty());
        assert!(!cache.tag_keys().contains(&"vision".to_string()));
        // d1's keys survive because d2 still holds some of them.
        cache.remove("d1", ["nlp", "nlp->transformers"], ["Vaswani, Ashish"]);
        assert_eq!(cache.query_tags(&keys(&["nlp"]), true, false), ids(&["d2"]));
        assert!(!cache.tag_keys().contains(&"nlp->transformers".to_string()));
    }

    #[test]
    fn test_union_tags() {
        let cache = populated();
        let union = cache.union_tags(&keys(&["nlp->transformers", "vision"]));
        assert_eq!(union, ids(&["d1", "d3"]));
        assert!(cache.union_tags(&keys(&["absent"])).is_empty());
    }

    #[test]
    fn test_stats() {
        let cache = populated();
        let stats = cache.stats();
        assert_eq!(stats.tag_keys, 3);
        assert_eq!(stats.author_keys, 3);
        assert_eq!(stats.tag_entries, 4);
        assert_eq!(stats.author_entries, 4);
    }
}
