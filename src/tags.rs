//! Hierarchical tag rules.
//!
//! Tags nest through the `->` separator: `nlp->transformers` is nested
//! under `nlp`. A record tagged with a child implicitly carries every
//! ancestor for retrieval purposes, so tag queries match whole subtrees.

use std::collections::BTreeSet;

/// Separator between tag hierarchy levels.
pub const TAG_SEP: &str = "->";

/// Normalize segment spacing: `" a -> b "` becomes `"a->b"`.
pub fn strip_tag(tag: &str) -> String {
    tag.split(TAG_SEP)
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(TAG_SEP)
}

/// Proper ancestors of a tag, outermost first. `a->b->c` yields
/// `[a, a->b]`; a top-level tag has none.
pub fn parents_of(tag: &str) -> Vec<String> {
    let segments: Vec<&str> = tag.split(TAG_SEP).collect();
    (1..segments.len())
        .map(|depth| segments[..depth].join(TAG_SEP))
        .collect()
}

/// The tag set closed over ancestors.
pub fn with_parents(tags: &BTreeSet<String>) -> BTreeSet<String> {
    let mut closed = tags.clone();
    for tag in tags {
        closed.extend(parents_of(tag));
    }
    closed
}

/// Whether `tag` sits strictly below `ancestor` in the hierarchy.
/// Boundary-aware: `nlpx` is not a descendant of `nlp`.
pub fn is_descendant(tag: &str, ancestor: &str) -> bool {
    tag.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with(TAG_SEP))
}

/// Members of `pool` lying in the subtree rooted at `root` (the root
/// itself included when present).
pub fn subtree<'a>(pool: impl IntoIterator<Item = &'a String>, root: &str) -> BTreeSet<String> {
    pool.into_iter()
        .filter(|tag| tag.as_str() == root || is_descendant(tag, root))
        .cloned()
        .collect()
}

/// Rewrite `old` to `new` in a record's tag set, carrying the whole
/// subtree along. Returns `None` when nothing matched.
pub fn rename_in(tags: &BTreeSet<String>, old: &str, new: &str) -> Option<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let mut changed = false;
    for tag in tags {
        if tag == old {
            out.insert(new.to_string());
            changed = true;
        } else if let Some(rest) = tag.strip_prefix(old) {
            if rest.starts_with(TAG_SEP) {
                out.insert(format!("{new}{rest}"));
                changed = true;
            } else {
                out.insert(tag.clone());
            }
        } else {
            out.insert(tag.clone());
        }
    }
    changed.then_some(out)
}

/// Drop `target` and its whole subtree from a record's tag set. Returns
/// `None` when nothing matched.
pub fn delete_in(tags: &BTreeSet<String>, target: &str) -> Option<BTreeSet<String>> {
    let mut out = BTreeSet::new();
    let mut changed = false;
    for tag in tags {
        if tag == target || is_descendant(tag, target) {
            changed = true;
        } else {
            out.insert(tag.clone());
        }
    }
    changed.then_some(out)
}
