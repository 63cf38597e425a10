//! Durable metadata store.
//!
//! One row per document, the single source of truth for the library.
//! Mutations synchronously patch the reverse-index cache before returning;
//! durable writes buffer inside an open transaction until `commit` (or the
//! periodic flush) runs. The connection sits behind a per-component
//! exclusive lock; no other component shares it.

pub mod migrations;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params, types::Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheStats, ReverseIndexCache};
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::record::{
    DocumentDraft, DocumentRecord, FieldChanges, SchemaInfo, join_list, normalize_author,
    now_epoch, split_list, title_similarity,
};
use crate::tags;

/// Row-store file name under the data directory.
pub const DB_FILE: &str = "documents.sqlite";

/// Trash directory name under the data directory.
pub const TRASH_DIR: &str = ".trash";

const SELECT_COLUMNS: &str = "id, citation_text, doc_type, title, year, publication, authors, \
     tags, url, abstract, notes, time_created, time_modified, schema_info, doc_extension";

// ============================================================================
// Filter criteria
// ============================================================================

/// Text predicate over a single field.
#[derive(Debug, Clone)]
pub struct TextMatch {
    pub pattern: String,
    pub exact: bool,
    pub ignore_case: bool,
}

impl TextMatch {
    /// Case-insensitive substring match, the common search path.
    pub fn substring(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            exact: false,
            ignore_case: true,
        }
    }

    /// Case-sensitive whole-value match.
    pub fn exact(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            exact: true,
            ignore_case: false,
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.ignore_case = false;
        self
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }
}

/// Year predicate: one value, or an inclusive-low/exclusive-high range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YearMatch {
    Exactly(i32),
    Range { low: i32, high: i32 },
}

/// Conjunction of optional predicates for [`MetadataStore::filter`].
///
/// Text and year predicates evaluate in SQL; tag and author predicates
/// resolve through the reverse-index cache and intersect with the SQL
/// result. Tag predicates use hierarchy subsumption: a required tag also
/// matches records carrying any of its descendants.
#[derive(Debug, Clone, Default)]
pub struct FilterCriteria {
    pub title: Option<TextMatch>,
    pub publication: Option<TextMatch>,
    pub notes: Option<TextMatch>,
    pub year: Option<YearMatch>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub from_ids: Option<HashSet<String>>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: TextMatch) -> Self {
        self.title = Some(title);
        self
    }

    pub fn with_publication(mut self, publication: TextMatch) -> Self {
        self.publication = Some(publication);
        self
    }

    pub fn with_notes(mut self, notes: TextMatch) -> Self {
        self.notes = Some(notes);
        self
    }

    pub fn with_year(mut self, year: YearMatch) -> Self {
        self.year = Some(year);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_from_ids(mut self, ids: HashSet<String>) -> Self {
        self.from_ids = Some(ids);
        self
    }

    pub fn is_empty(&self) -> bool {
        !self.has_sql_predicates()
            && self.tags.is_empty()
            && self.authors.is_empty()
            && self.from_ids.is_none()
    }

    fn has_sql_predicates(&self) -> bool {
        self.title.is_some()
            || self.publication.is_some()
            || self.notes.is_some()
            || self.year.is_some()
    }
}

/// Sort order for [`MetadataStore::keys`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    TimeCreated,
    TimeModified,
    Title,
    Year,
}

impl SortKey {
    fn column(self) -> &'static str {
        match self {
            Self::TimeCreated => "time_created",
            Self::TimeModified => "time_modified",
            Self::Title => "title",
            Self::Year => "year",
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Durable, row-oriented document store plus its attached cache view.
pub struct MetadataStore {
    conn: Mutex<Connection>,
    cache: Arc<ReverseIndexCache>,
    db_path: PathBuf,
    trash_dir: Option<PathBuf>,
    duplicate_threshold: f32,
    schema_version: u32,
}

impl MetadataStore {
    /// Open (or create) the store under the configured data directory and
    /// rebuild the cache from a full snapshot.
    pub async fn open(config: &StorageConfig, cache: Arc<ReverseIndexCache>) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let db_path = config.data_dir.join(DB_FILE);

        let conn = Connection::open(&db_path)?;
        configure_pragmas(&conn)?;
        let schema_version = migrations::run_migrations(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            cache,
            db_path,
            trash_dir: config
                .trash_enabled
                .then(|| config.data_dir.join(TRASH_DIR)),
            duplicate_threshold: config.duplicate_threshold,
            schema_version,
        };
        store.rebuild_cache().await?;
        Ok(store)
    }

    /// Current schema version after migrations.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Insert a new record. Generates id, timestamps, and schema info
    /// unless the draft carries an explicit id. The cache is patched
    /// before this returns.
    pub async fn insert(&self, draft: DocumentDraft) -> Result<String> {
        draft.validate()?;

        let id = draft
            .id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let now = now_epoch();
        let record = DocumentRecord {
            id: id.clone(),
            citation_text: draft.citation_text,
            doc_type: draft.doc_type,
            title: draft.title,
            year: draft.year,
            publication: draft.publication,
            authors: draft.authors,
            tags: draft.tags,
            url: draft.url,
            abstract_text: draft.abstract_text,
            notes: draft.notes,
            time_created: now,
            time_modified: now,
            schema_info: SchemaInfo::new(),
            doc_extension: draft.doc_extension,
        };

        {
            let conn = self.conn.lock().await;
            if row_exists(&conn, &id)? {
                return Err(Error::duplicate("document", id));
            }
            if let Some(existing) = self.find_similar_title(&conn, &record.title)? {
                return Err(Error::duplicate("title", existing));
            }

            begin_buffered(&conn)?;
            conn.execute(
                "INSERT INTO documents (id, citation_text, doc_type, title, year, publication, \
                 authors, tags, url, abstract, notes, time_created, time_modified, schema_info, \
                 doc_extension) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    record.citation_text,
                    record.doc_type,
                    record.title,
                    record.year,
                    record.publication,
                    join_list(record.authors.iter().map(String::as_str)),
                    join_list(record.tags.iter().map(String::as_str)),
                    record.url,
                    record.abstract_text,
                    record.notes,
                    record.time_created,
                    record.time_modified,
                    serde_json::to_string(&record.schema_info)?,
                    record.doc_extension,
                ],
            )?;
        }

        self.cache.add(
            &record.id,
            record.tags.iter().map(String::as_str),
            record.authors.iter().map(String::as_str),
        );
        debug!(id = %record.id, "inserted document");
        Ok(id)
    }

    /// Fetch one record.
    pub async fn get(&self, id: &str) -> Result<DocumentRecord> {
        self.try_get(id)
            .await?
            .ok_or_else(|| Error::not_found("document", id))
    }

    /// Fetch many records in input order. Fails on the first missing id;
    /// no partial results.
    pub async fn get_many(&self, ids: &[String]) -> Result<Vec<DocumentRecord>> {
        let mut found: HashMap<String, DocumentRecord> = HashMap::with_capacity(ids.len());
        {
            let conn = self.conn.lock().await;
            for chunk in ids.chunks(256) {
                let placeholders = vec!["?"; chunk.len()].join(", ");
                let sql = format!(
                    "SELECT {SELECT_COLUMNS} FROM documents WHERE id IN ({placeholders})"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    rusqlite::params_from_iter(chunk.iter()),
                    raw_from_row,
                )?;
                for raw in rows {
                    let record = record_from_raw(raw?)?;
                    found.insert(record.id.clone(), record);
                }
            }
        }

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match found.get(id) {
                Some(record) => out.push(record.clone()),
                None => return Err(Error::not_found("document", id)),
            }
        }
        Ok(out)
    }

    /// Apply a partial update. Returns false when the id is absent. On a
    /// tag or author change the cache is patched with the set difference,
    /// not rebuilt.
    pub async fn update(&self, id: &str, changes: FieldChanges) -> Result<bool> {
        changes.validate()?;

        let Some(old) = self.try_get(id).await? else {
            return Ok(false);
        };
        if changes.is_empty() {
            return Ok(true);
        }

        let mut record = old.clone();
        if let Some(value) = changes.citation_text {
            record.citation_text = value;
        }
        if let Some(value) = changes.doc_type {
            record.doc_type = value;
        }
        if let Some(value) = changes.title {
            record.title = value;
        }
        if let Some(value) = changes.year {
            record.year = value;
        }
        if let Some(value) = changes.publication {
            record.publication = value;
        }
        if let Some(value) = changes.authors {
            record.authors = value;
        }
        if let Some(value) = changes.tags {
            record.tags = value;
        }
        if let Some(value) = changes.url {
            record.url = value;
        }
        if let Some(value) = changes.abstract_text {
            record.abstract_text = value;
        }
        if let Some(value) = changes.notes {
            record.notes = value;
        }
        if let Some(value) = changes.doc_extension {
            record.doc_extension = value;
        }
        record.time_modified = now_epoch();
        record.schema_info.touch();

        {
            let conn = self.conn.lock().await;
            begin_buffered(&conn)?;
            conn.execute(
                "UPDATE documents SET citation_text = ?2, doc_type = ?3, title = ?4, year = ?5, \
                 publication = ?6, authors = ?7, tags = ?8, url = ?9, abstract = ?10, \
                 notes = ?11, time_modified = ?12, schema_info = ?13, doc_extension = ?14 \
                 WHERE id = ?1",
                params![
                    record.id,
                    record.citation_text,
                    record.doc_type,
                    record.title,
                    record.year,
                    record.publication,
                    join_list(record.authors.iter().map(String::as_str)),
                    join_list(record.tags.iter().map(String::as_str)),
                    record.url,
                    record.abstract_text,
                    record.notes,
                    record.time_modified,
                    serde_json::to_string(&record.schema_info)?,
                    record.doc_extension,
                ],
            )?;
        }

        self.patch_cache_diff(&old, &record);
        debug!(id, "updated document");
        Ok(true)
    }

    /// Delete a record, soft-deleting to the trash area first when
    /// enabled. Returns false when the id is absent.
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let Some(record) = self.try_get(id).await? else {
            return Ok(false);
        };

        if let Some(trash_dir) = &self.trash_dir {
            tokio::fs::create_dir_all(trash_dir).await?;
            let path = trash_dir.join(format!("{id}.json"));
            tokio::fs::write(&path, serde_json::to_vec_pretty(&record)?).await?;
        }

        {
            let conn = self.conn.lock().await;
            begin_buffered(&conn)?;
            conn.execute("DELETE FROM documents WHERE id = ?1", [id])?;
        }

        self.cache.remove(
            &record.id,
            record.tags.iter().map(String::as_str),
            record.authors.iter().map(String::as_str),
        );
        debug!(id, trashed = self.trash_dir.is_some(), "removed document");
        Ok(true)
    }

    /// Ids satisfying the criteria conjunction. Unordered.
    pub async fn filter(&self, criteria: &FilterCriteria) -> Result<Vec<String>> {
        let mut candidates: Option<HashSet<String>> = None;

        if !criteria.tags.is_empty() {
            intersect_into(&mut candidates, self.resolve_tag_predicates(&criteria.tags));
        }
        if !criteria.authors.is_empty() {
            intersect_into(
                &mut candidates,
                self.cache.query_authors(&criteria.authors, true, false),
            );
        }
        if let Some(from_ids) = &criteria.from_ids {
            intersect_into(&mut candidates, from_ids.clone());
        }
        if candidates.as_ref().is_some_and(HashSet::is_empty) {
            return Ok(Vec::new());
        }

        if criteria.has_sql_predicates() {
            let sql_ids = self.sql_filter(criteria).await?;
            return Ok(match candidates {
                Some(set) => sql_ids.into_iter().filter(|id| set.contains(id)).collect(),
                None => sql_ids,
            });
        }

        match candidates {
            Some(set) => Ok(set.into_iter().collect()),
            None => self.keys(None, false).await,
        }
    }

    /// All ids, optionally sorted by a record field.
    pub async fn keys(&self, sort_by: Option<SortKey>, reverse: bool) -> Result<Vec<String>> {
        let sql = match sort_by {
            Some(key) => format!(
                "SELECT id FROM documents ORDER BY {} {}",
                key.column(),
                if reverse { "DESC" } else { "ASC" }
            ),
            None => "SELECT id FROM documents".to_string(),
        };
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    /// All tag keys currently in use, sorted.
    pub fn all_tags(&self) -> Vec<String> {
        self.cache.tag_keys()
    }

    /// All normalized author keys currently in use, sorted.
    pub fn all_authors(&self) -> Vec<String> {
        self.cache.author_keys()
    }

    /// Number of stored records.
    pub async fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Bytes on disk for the row store, WAL and shared memory included.
    pub fn disk_usage(&self) -> u64 {
        let mut total = 0;
        for suffix in ["", "-wal", "-shm"] {
            let mut path = self.db_path.as_os_str().to_owned();
            path.push(suffix);
            if let Ok(meta) = std::fs::metadata(Path::new(&path)) {
                total += meta.len();
            }
        }
        total
    }

    /// Flush buffered writes. A no-op when nothing is pending.
    pub async fn commit(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT;")?;
            debug!("committed buffered writes");
        }
        Ok(())
    }

    /// Rename a tag across the whole library, carrying its subtree.
    /// Returns the number of records rewritten.
    pub async fn rename_tag(&self, old: &str, new: &str) -> Result<usize> {
        let new = tags::strip_tag(new);
        FieldChanges::set_tags([new.clone()]).validate()?;

        let mut rewritten = 0;
        for id in self.ids_in_tag_subtree(old) {
            let record = self.get(&id).await?;
            if let Some(next) = tags::rename_in(&record.tags, old, &new) {
                self.update(&id, FieldChanges::set_tags(next)).await?;
                rewritten += 1;
            }
        }
        info!(old, new = %new, rewritten, "renamed tag");
        Ok(rewritten)
    }

    /// Remove a tag and its subtree from every record carrying it.
    /// Returns the number of records rewritten.
    pub async fn delete_tag(&self, tag: &str) -> Result<usize> {
        let mut rewritten = 0;
        for id in self.ids_in_tag_subtree(tag) {
            let record = self.get(&id).await?;
            if let Some(next) = tags::delete_in(&record.tags, tag) {
                self.update(&id, FieldChanges::set_tags(next)).await?;
                rewritten += 1;
            }
        }
        info!(tag, rewritten, "deleted tag");
        Ok(rewritten)
    }

    /// Reload every record and reconstruct the cache from scratch.
    pub async fn rebuild_cache(&self) -> Result<CacheStats> {
        let records = self.load_all().await?;
        self.cache.rebuild(records.iter());
        let stats = self.cache.stats();
        info!(
            records = records.len(),
            tag_keys = stats.tag_keys,
            author_keys = stats.author_keys,
            "rebuilt reverse-index cache"
        );
        Ok(stats)
    }

    /// Full record snapshot, unordered.
    pub async fn load_all(&self) -> Result<Vec<DocumentRecord>> {
        let raws = {
            let conn = self.conn.lock().await;
            let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM documents"))?;
            let rows = stmt.query_map([], raw_from_row)?;
            let mut raws = Vec::new();
            for raw in rows {
                raws.push(raw?);
            }
            raws
        };
        raws.into_iter().map(record_from_raw).collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    async fn try_get(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let raw = {
            let conn = self.conn.lock().await;
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM documents WHERE id = ?1"),
                [id],
                raw_from_row,
            )
            .optional()?
        };
        raw.map(record_from_raw).transpose()
    }

    /// Resolve required tags through the cache with subtree subsumption:
    /// each requested tag unions the id-sets of its whole key subtree,
    /// then the per-tag unions intersect.
    fn resolve_tag_predicates(&self, required: &[String]) -> HashSet<String> {
        let tag_keys = self.cache.tag_keys();
        let mut result: Option<HashSet<String>> = None;
        for tag in required {
            let subtree: Vec<String> = tags::subtree(&tag_keys, tag).into_iter().collect();
            let ids = self.cache.union_tags(&subtree);
            intersect_into(&mut result, ids);
            if result.as_ref().is_some_and(HashSet::is_empty) {
                return HashSet::new();
            }
        }
        result.unwrap_or_default()
    }

    fn ids_in_tag_subtree(&self, tag: &str) -> Vec<String> {
        let tag_keys = self.cache.tag_keys();
        let subtree: Vec<String> = tags::subtree(&tag_keys, tag).into_iter().collect();
        let mut ids: Vec<String> = self.cache.union_tags(&subtree).into_iter().collect();
        ids.sort();
        ids
    }

    async fn sql_filter(&self, criteria: &FilterCriteria) -> Result<Vec<String>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut params: Vec<Value> = Vec::new();

        for (column, text) in [
            ("title", &criteria.title),
            ("publication", &criteria.publication),
            ("notes", &criteria.notes),
        ] {
            if let Some(text) = text {
                clauses.push(text_clause(column, text));
                params.push(Value::Text(text.pattern.clone()));
            }
        }
        match criteria.year {
            Some(YearMatch::Exactly(year)) => {
                clauses.push("year = ?".to_string());
                params.push(Value::Integer(i64::from(year)));
            }
            Some(YearMatch::Range { low, high }) => {
                clauses.push("year >= ?".to_string());
                params.push(Value::Integer(i64::from(low)));
                clauses.push("year < ?".to_string());
                params.push(Value::Integer(i64::from(high)));
            }
            None => {}
        }

        let sql = format!(
            "SELECT id FROM documents WHERE {}",
            clauses.join(" AND ")
        );
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| {
            row.get::<_, String>(0)
        })?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    fn find_similar_title(&self, conn: &Connection, title: &str) -> Result<Option<String>> {
        // Threshold zero disables the check; an empty title has nothing to
        // compare against.
        if self.duplicate_threshold <= 0.0 || title.trim().is_empty() {
            return Ok(None);
        }

        let mut stmt = conn.prepare("SELECT id, title FROM documents")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, existing) = row?;
            let score = title_similarity(title, &existing);
            if score >= self.duplicate_threshold {
                warn!(id, score, "insert rejected: near-duplicate title");
                return Ok(Some(id));
            }
        }
        Ok(None)
    }

    /// Patch the cache with the tag/author difference between two record
    /// versions. Authors diff on normalized keys so spelling variants of
    /// one person do not churn the index.
    fn patch_cache_diff(&self, old: &DocumentRecord, new: &DocumentRecord) {
        let removed_tags: Vec<&str> = old
            .tags
            .difference(&new.tags)
            .map(String::as_str)
            .collect();
        let added_tags: Vec<&str> = new
            .tags
            .difference(&old.tags)
            .map(String::as_str)
            .collect();

        let old_authors: BTreeSet<String> =
            old.authors.iter().map(|a| normalize_author(a)).collect();
        let new_authors: BTreeSet<String> =
            new.authors.iter().map(|a| normalize_author(a)).collect();
        let removed_authors: Vec<String> =
            old_authors.difference(&new_authors).cloned().collect();
        let added_authors: Vec<String> =
            new_authors.difference(&old_authors).cloned().collect();

        if removed_tags.is_empty()
            && added_tags.is_empty()
            && removed_authors.is_empty()
            && added_authors.is_empty()
        {
            return;
        }

        self.cache.remove(
            &old.id,
            removed_tags.iter().copied(),
            removed_authors.iter().map(String::as_str),
        );
        self.cache.add(
            &new.id,
            added_tags.iter().copied(),
            added_authors.iter().map(String::as_str),
        );
    }
}

fn configure_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA cache_size = -64000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

/// Open a transaction if none is pending, so writes buffer until commit.
fn begin_buffered(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN;")?;
    }
    Ok(())
}

fn row_exists(conn: &Connection, id: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE id = ?1",
        [id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn text_clause(column: &str, text: &TextMatch) -> String {
    // lower() folds ASCII only, matching the underlying store's collation.
    match (text.exact, text.ignore_case) {
        (true, false) => format!("{column} = ?"),
        (true, true) => format!("lower({column}) = lower(?)"),
        (false, false) => format!("instr({column}, ?) > 0"),
        (false, true) => format!("instr(lower({column}), lower(?)) > 0"),
    }
}

fn intersect_into(target: &mut Option<HashSet<String>>, ids: HashSet<String>) {
    match target {
        None => *target = Some(ids),
        Some(acc) => acc.retain(|id| ids.contains(id)),
    }
}

struct RawRow {
    id: String,
    citation_text: String,
    doc_type: String,
    title: String,
    year: i32,
    publication: String,
    authors: String,
    tags: String,
    url: String,
    abstract_text: String,
    notes: String,
    time_created: f64,
    time_modified: f64,
    schema_info: String,
    doc_extension: String,
}

fn raw_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        id: row.get(0)?,
        citation_text: row.get(1)?,
        doc_type: row.get(2)?,
        title: row.get(3)?,
        year: row.get(4)?,
        publication: row.get(5)?,
        authors: row.get(6)?,
        tags: row.get(7)?,
        url: row.get(8)?,
        abstract_text: row.get(9)?,
        notes: row.get(10)?,
        time_created: row.get(11)?,
        time_modified: row.get(12)?,
        schema_info: row.get(13)?,
        doc_extension: row.get(14)?,
    })
}

fn record_from_raw(raw: RawRow) -> Result<DocumentRecord> {
    Ok(DocumentRecord {
        id: raw.id,
        citation_text: raw.citation_text,
        doc_type: raw.doc_type,
        title: raw.title,
        year: raw.year,
        publication: raw.publication,
        authors: split_list(&raw.authors),
        tags: split_list(&raw.tags).into_iter().collect(),
        url: raw.url,
        abstract_text: raw.abstract_text,
        notes: raw.notes,
        time_created: raw.time_created,
        time_modified: raw.time_modified,
        schema_info: serde_json::from_str(&raw.schema_info)?,
        doc_extension: raw.doc_extension,
    })
}
