//! Document record model and the durable list encoding.
//!
//! Records are the canonical unit of the library. Logical list fields
//! (authors, tags) persist as a single delimiter-joined column in the row
//! store; the delimiter is rejected at the validation boundary so callers
//! only ever handle structured arrays.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

use crate::error::{Error, Result};

/// Token separating list elements in the durable row format. Must never
/// appear inside a stored tag or author literal.
pub const LIST_SEP: &str = "&sp;";

// ============================================================================
// Record types
// ============================================================================

/// Versioning bookkeeping carried in each row, used by migrations and the
/// sync layer to tell which software wrote a record and from where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub version_created: String,
    pub version_modified: String,
    pub origin_created: String,
    pub origin_modified: String,
}

impl SchemaInfo {
    /// Schema info for a record created right now on this host.
    pub fn new() -> Self {
        let version = env!("CARGO_PKG_VERSION").to_string();
        let origin = local_origin();
        Self {
            version_created: version.clone(),
            version_modified: version,
            origin_created: origin.clone(),
            origin_modified: origin,
        }
    }

    /// Stamp a modification by the current software on this host.
    pub fn touch(&mut self) {
        self.version_modified = env!("CARGO_PKG_VERSION").to_string();
        self.origin_modified = local_origin();
    }
}

impl Default for SchemaInfo {
    fn default() -> Self {
        Self::new()
    }
}

fn local_origin() -> String {
    hostname::get().map_or_else(
        |_| "unknown".to_string(),
        |name| name.to_string_lossy().into_owned(),
    )
}

/// One bibliographic entry, as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    pub citation_text: String,
    pub doc_type: String,
    pub title: String,
    pub year: i32,
    pub publication: String,
    pub authors: Vec<String>,
    pub tags: BTreeSet<String>,
    pub url: String,
    pub abstract_text: String,
    pub notes: String,
    pub time_created: f64,
    pub time_modified: f64,
    pub schema_info: SchemaInfo,
    /// File extension of the attached document, empty when none.
    pub doc_extension: String,
}

impl DocumentRecord {
    /// Whether a document file is attached.
    pub fn has_file(&self) -> bool {
        !self.doc_extension.is_empty()
    }
}

/// Input for `MetadataStore::insert`. The store generates the id,
/// timestamps, and schema info unless an explicit id is supplied (imports
/// and sync replays need to keep theirs).
#[derive(Debug, Clone, Default)]
pub struct DocumentDraft {
    pub id: Option<String>,
    pub citation_text: String,
    pub doc_type: String,
    pub title: String,
    pub year: i32,
    pub publication: String,
    pub authors: Vec<String>,
    pub tags: BTreeSet<String>,
    pub url: String,
    pub abstract_text: String,
    pub notes: String,
    pub doc_extension: String,
}

impl DocumentDraft {
    pub fn new(title: impl Into<String>, year: i32, authors: Vec<String>) -> Self {
        Self {
            title: title.into(),
            year,
            authors,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = String>) -> Self {
        self.tags = tags.into_iter().collect();
        self
    }

    pub fn with_publication(mut self, publication: impl Into<String>) -> Self {
        self.publication = publication.into();
        self
    }

    pub fn with_citation_text(mut self, citation_text: impl Into<String>) -> Self {
        self.citation_text = citation_text.into();
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = doc_type.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_abstract(mut self, abstract_text: impl Into<String>) -> Self {
        self.abstract_text = abstract_text.into();
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = notes.into();
        self
    }

    pub fn with_doc_extension(mut self, doc_extension: impl Into<String>) -> Self {
        self.doc_extension = doc_extension.into();
        self
    }

    /// Reject prohibited tokens and empty list elements before any write.
    pub fn validate(&self) -> Result<()> {
        validate_list_values("tag", self.tags.iter())?;
        validate_list_values("author", self.authors.iter())?;
        Ok(())
    }
}

/// Partial update for `MetadataStore::update`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct FieldChanges {
    pub citation_text: Option<String>,
    pub doc_type: Option<String>,
    pub title: Option<String>,
    pub year: Option<i32>,
    pub publication: Option<String>,
    pub authors: Option<Vec<String>>,
    pub tags: Option<BTreeSet<String>>,
    pub url: Option<String>,
    pub abstract_text: Option<String>,
    pub notes: Option<String>,
    pub doc_extension: Option<String>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.citation_text.is_none()
            && self.doc_type.is_none()
            && self.title.is_none()
            && self.year.is_none()
            && self.publication.is_none()
            && self.authors.is_none()
            && self.tags.is_none()
            && self.url.is_none()
            && self.abstract_text.is_none()
            && self.notes.is_none()
            && self.doc_extension.is_none()
    }

    pub fn set_tags(tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            tags: Some(tags.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn set_authors(authors: Vec<String>) -> Self {
        Self {
            authors: Some(authors),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(tags) = &self.tags {
            validate_list_values("tag", tags.iter())?;
        }
        if let Some(authors) = &self.authors {
            validate_list_values("author", authors.iter())?;
        }
        Ok(())
    }
}

// ============================================================================
// List encoding
// ============================================================================

/// Join list elements into the durable column form.
pub fn join_list<'a>(values: impl IntoIterator<Item = &'a str>) -> String {
    values.into_iter().collect::<Vec<_>>().join(LIST_SEP)
}

/// Split a durable column back into elements. The empty column is the
/// empty list, not a list of one empty string.
pub fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split(LIST_SEP).map(ToString::to_string).collect()
}

fn validate_list_values<'a>(
    kind: &'static str,
    values: impl Iterator<Item = &'a String>,
) -> Result<()> {
    for value in values {
        if value.contains(LIST_SEP) {
            return Err(Error::Validation(format!(
                "{kind} contains prohibited token {LIST_SEP:?}: {value:?}"
            )));
        }
        if value.trim().is_empty() {
            return Err(Error::Validation(format!("empty {kind} value")));
        }
    }
    Ok(())
}

// ============================================================================
// Author normalization
// ============================================================================

/// Canonical casefolded `family, given` form used as the author index key.
///
/// `"Ashish  Vaswani"` and `"vaswani, ashish"` normalize to the same key.
pub fn normalize_author(name: &str) -> String {
    let name: String = name.nfc().collect::<String>().to_lowercase();
    let name = name.trim();

    if let Some((family, given)) = name.split_once(',') {
        let family = family.split_whitespace().collect::<Vec<_>>().join(" ");
        let given = given.split_whitespace().collect::<Vec<_>>().join(" ");
        if given.is_empty() {
            return family;
        }
        return format!("{family}, {given}");
    }

    let mut parts: Vec<&str> = name.split_whitespace().collect();
    match parts.len() {
        0 => String::new(),
        1 => parts[0].to_string(),
        _ => {
            let family = parts.pop().unwrap_or_default();
            format!("{family}, {}", parts.join(" "))
        }
    }
}

// ============================================================================
// Title similarity
// ============================================================================

/// Normalized character-bigram overlap ratio in [0, 1], used for
/// duplicate-title detection on insert.
pub fn title_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_title(a);
    let b = normalize_title(b);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }

    let bigrams_a = bigrams(&a);
    let bigrams_b = bigrams(&b);
    if bigrams_a.is_empty() || bigrams_b.is_empty() {
        return 0.0;
    }

    let mut counts = std::collections::HashMap::new();
    for gram in &bigrams_a {
        *counts.entry(*gram).or_insert(0usize) += 1;
    }
    let mut overlap = 0usize;
    for gram in &bigrams_b {
        if let Some(count) = counts.get_mut(gram) {
            if *count > 0 {
                *count -= 1;
                overlap += 1;
            }
        }
    }

    (2 * overlap) as f32 / (bigrams_a.len() + bigrams_b.len()) as f32
}

fn normalize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_was_space = true;
    for ch in title.nfc().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            out.push(ch);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

fn bigrams(text: &str) -> Vec<(char, char)> {
    let chars: Vec<char> = text.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

// ============================================================================
// Time
// ============================================================================

/// Current time as fractional epoch seconds, the row-store timestamp form.
pub fn now_epoch() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}
