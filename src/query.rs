//! Compound query execution.
//!
//! The engine is a stateless coordinator over the metadata store, the
//! reverse-index cache (reached through the store's filter path) and the
//! vector collection. It decides which indices a query touches and in
//! what order: structured predicates always narrow first, free-text
//! scans only the narrowed candidates, and semantic ranking runs last
//! over whatever survived. Results are unordered id sets except for
//! semantic queries, which return ids ranked by similarity score.

use std::collections::HashSet;
use std::sync::Arc;

use regex::RegexBuilder;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::pipeline::EmbeddingProvider;
use crate::record::DocumentRecord;
use crate::store::{FilterCriteria, MetadataStore};
use crate::vector::{Collection, Metric};

// ============================================================================
// Query model
// ============================================================================

/// Record field a free-text pattern applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchField {
    Title,
    Author,
    Year,
    Publication,
    Notes,
}

/// Free-text predicate over one field, applied after structured
/// narrowing.
#[derive(Debug, Clone)]
pub struct TextQuery {
    pub field: SearchField,
    pub pattern: String,
    pub ignore_case: bool,
    pub use_regex: bool,
}

impl TextQuery {
    /// Case-sensitive substring match.
    pub fn substring(field: SearchField, pattern: impl Into<String>) -> Self {
        Self {
            field,
            pattern: pattern.into(),
            ignore_case: false,
            use_regex: false,
        }
    }

    /// Regular-expression match.
    pub fn regex(field: SearchField, pattern: impl Into<String>) -> Self {
        Self {
            field,
            pattern: pattern.into(),
            ignore_case: false,
            use_regex: true,
        }
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// Compile to a reusable matcher. A malformed regex is a validation
    /// error, rejected before any index is consulted.
    fn compile(&self) -> Result<TextMatcher> {
        if self.use_regex {
            let regex = RegexBuilder::new(&self.pattern)
                .case_insensitive(self.ignore_case)
                .build()
                .map_err(|e| {
                    Error::Validation(format!("invalid free-text pattern {:?}: {e}", self.pattern))
                })?;
            return Ok(TextMatcher::Regex(regex));
        }
        let needle = if self.ignore_case {
            self.pattern.to_lowercase()
        } else {
            self.pattern.clone()
        };
        Ok(TextMatcher::Substring {
            needle,
            ignore_case: self.ignore_case,
        })
    }
}

enum TextMatcher {
    Regex(regex::Regex),
    Substring { needle: String, ignore_case: bool },
}

impl TextMatcher {
    fn matches(&self, haystack: &str) -> bool {
        match self {
            Self::Regex(regex) => regex.is_match(haystack),
            Self::Substring {
                needle,
                ignore_case,
            } => {
                if *ignore_case {
                    haystack.to_lowercase().contains(needle.as_str())
                } else {
                    haystack.contains(needle.as_str())
                }
            }
        }
    }

    /// Years match on their decimal form: substring patterns as a
    /// prefix ("20" finds 2017 but not 1920), regex patterns as-is.
    fn matches_year(&self, year: i32) -> bool {
        let text = year.to_string();
        match self {
            Self::Regex(regex) => regex.is_match(&text),
            Self::Substring { needle, .. } => text.starts_with(needle.as_str()),
        }
    }

    fn matches_record(&self, field: SearchField, record: &DocumentRecord) -> bool {
        match field {
            SearchField::Title => self.matches(&record.title),
            SearchField::Publication => self.matches(&record.publication),
            SearchField::Notes => self.matches(&record.notes),
            SearchField::Author => record.authors.iter().any(|a| self.matches(a)),
            SearchField::Year => self.matches_year(record.year),
        }
    }
}

/// Nearest-neighbor component of a compound query.
#[derive(Debug, Clone)]
pub struct SemanticQuery {
    pub text: String,
    /// Result bound; 0 falls back to the configured default.
    pub k: usize,
    /// Per-query metric override.
    pub metric: Option<Metric>,
}

impl SemanticQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            k: 0,
            metric: None,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }
}

/// One compound query. Structured, tag and author predicates travel in
/// `filters`; the optional free-text and semantic components refine and
/// rank on top of them.
#[derive(Debug, Clone, Default)]
pub struct CompoundQuery {
    pub filters: FilterCriteria,
    pub free_text: Option<TextQuery>,
    pub semantic: Option<SemanticQuery>,
}

impl CompoundQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filters(mut self, filters: FilterCriteria) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_free_text(mut self, free_text: TextQuery) -> Self {
        self.free_text = Some(free_text);
        self
    }

    pub fn with_semantic(mut self, semantic: SemanticQuery) -> Self {
        self.semantic = Some(semantic);
        self
    }
}

/// Query result. Only semantic queries rank; everything else leaves
/// ordering to the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    Unordered(Vec<String>),
    Ranked(Vec<(String, f32)>),
}

impl QueryOutcome {
    pub fn len(&self) -> usize {
        match self {
            Self::Unordered(ids) => ids.len(),
            Self::Ranked(hits) => hits.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten to ids, preserving rank order when present.
    pub fn into_ids(self) -> Vec<String> {
        match self {
            Self::Unordered(ids) => ids,
            Self::Ranked(hits) => hits.into_iter().map(|(id, _)| id).collect(),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Stateless coordinator over the three indices.
pub struct QueryEngine<E> {
    store: Arc<MetadataStore>,
    features: Collection,
    embedder: Arc<E>,
    default_k: usize,
    default_metric: Metric,
}

impl<E: EmbeddingProvider> QueryEngine<E> {
    pub fn new(
        store: Arc<MetadataStore>,
        features: Collection,
        embedder: Arc<E>,
        config: &Config,
    ) -> Self {
        Self {
            store,
            features,
            embedder,
            default_k: config.query.semantic_k.max(1),
            default_metric: config.vector.metric,
        }
    }

    /// Execute a compound query. A reference to a missing id anywhere in
    /// the composed pipeline aborts the whole query with `NotFound`.
    pub async fn run(&self, query: &CompoundQuery) -> Result<QueryOutcome> {
        let narrowed = self.narrow(query).await?;

        let Some(semantic) = &query.semantic else {
            let ids = match narrowed {
                Some(ids) => ids,
                // Fully empty query: every id, unordered contract.
                None => self.store.keys(None, false).await?,
            };
            return Ok(QueryOutcome::Unordered(ids));
        };

        let k = if semantic.k == 0 {
            self.default_k
        } else {
            semantic.k
        };
        let metric = semantic.metric.unwrap_or(self.default_metric);
        let vector = self.embedder.embed(&semantic.text).await?;

        let hits = match &narrowed {
            Some(ids) if ids.is_empty() => Vec::new(),
            Some(ids) => {
                let allowed: HashSet<String> = ids.iter().cloned().collect();
                self.features
                    .search_within(&vector, k, metric, &allowed)
                    .await?
            }
            None => self.features.search(&vector, k, metric, None).await?,
        };
        debug!(hits = hits.len(), k, "semantic scan finished");

        let ranked = self.collapse_groups(hits).await?;
        // Every surfaced id must exist in the store; a stale vector whose
        // record is gone aborts rather than leaking a dangling id.
        let ids: Vec<String> = ranked.iter().map(|(id, _)| id.clone()).collect();
        self.store.get_many(&ids).await?;
        Ok(QueryOutcome::Ranked(ranked))
    }

    /// Structured narrowing plus the optional free-text refinement.
    /// `None` means unrestricted (no predicate of either kind present).
    async fn narrow(&self, query: &CompoundQuery) -> Result<Option<Vec<String>>> {
        if query.filters.is_empty() && query.free_text.is_none() {
            return Ok(None);
        }
        let mut ids = self.store.filter(&query.filters).await?;

        if let Some(free_text) = &query.free_text {
            let matcher = free_text.compile()?;
            let records = self.store.get_many(&ids).await?;
            ids = records
                .into_iter()
                .filter(|record| matcher.matches_record(free_text.field, record))
                .map(|record| record.id)
                .collect();
        }
        Ok(Some(ids))
    }

    /// Collapse chunk-level hits to their owning records, keeping the
    /// best-scoring chunk per record. Input is ranked descending, so the
    /// first occurrence wins.
    async fn collapse_groups(&self, hits: Vec<(String, f32)>) -> Result<Vec<(String, f32)>> {
        let mut ranked = Vec::with_capacity(hits.len());
        let mut seen: HashSet<String> = HashSet::new();
        for (entry_id, score) in hits {
            let entry = self.features.get(&entry_id).await?;
            let owner = if entry.group.is_empty() {
                entry.id
            } else {
                entry.group
            };
            if seen.insert(owner.clone()) {
                ranked.push((owner, score));
            }
        }
        Ok(ranked)
    }
}

impl<E> std::fmt::Debug for QueryEngine<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("default_k", &self.default_k)
            .field("default_metric", &self.default_metric)
            .finish_non_exhaustive()
    }
}
