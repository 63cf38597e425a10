//! Vector similarity index.
//!
//! Durable id → embedding storage, organized into named collections with
//! a fixed dimension each. Search scans in fixed-size blocks and keeps a
//! running top-k, re-acquiring the connection lock per block and yielding
//! to the scheduler in between so long scans never starve other tasks.
//! Fed by the feature-indexing pipeline, independently of the metadata
//! store; the `group_name` column ties entries back to their owning
//! record.

pub mod codec;
pub mod score;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, params};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::VectorConfig;
use crate::error::{Error, Result};

pub use score::{Metric, TopK, cosine_similarity, neg_l2_squared};

/// Vector-store file name under the data directory.
pub const DB_FILE: &str = "vectors.sqlite";

/// One stored embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorEntry {
    /// Entry id: a record id, or a sub-chunk id for multi-vector records.
    pub id: String,
    /// Owning record id; empty when the entry stands alone.
    pub group: String,
    pub vector: Vec<f32>,
    /// Hex digest of the source text that produced the vector.
    pub fingerprint: String,
}

impl VectorEntry {
    pub fn new(id: impl Into<String>, group: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            vector,
            fingerprint: String::new(),
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = fingerprint.into();
        self
    }
}

// ============================================================================
// Store
// ============================================================================

/// Collection-oriented vector database. One SQLite file holds a metadata
/// table of (name, dimension) pairs plus one blob table per collection.
/// Clones share the connection lock.
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
    block_size: usize,
}

impl VectorStore {
    /// Open (or create) the vector database under the data directory.
    pub fn open(data_dir: &Path, config: &VectorConfig) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join(DB_FILE);

        let conn = Connection::open(&db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS collections (
                 name TEXT PRIMARY KEY,
                 dim INTEGER NOT NULL
             )",
            [],
        )?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path,
            block_size: config.block_size,
        })
    }

    /// Create a collection with the given fixed dimension. Fails with
    /// `Duplicate` when the name is taken.
    pub async fn create_collection(&self, name: &str, dim: usize) -> Result<Collection> {
        match self.lookup_dim(name).await? {
            Some(_) => Err(Error::duplicate("collection", name)),
            None => self.create_unchecked(name, dim).await,
        }
    }

    /// Open the collection, creating it when missing. An existing
    /// collection must match the requested dimension; this is the reopen
    /// validation for a dimension fixed at creation time.
    pub async fn ensure_collection(&self, name: &str, dim: usize) -> Result<Collection> {
        match self.lookup_dim(name).await? {
            Some(existing) if existing == dim => Ok(self.handle(name, dim)),
            Some(existing) => Err(Error::Validation(format!(
                "collection {name} has dimension {existing}, requested {dim}"
            ))),
            None => self.create_unchecked(name, dim).await,
        }
    }

    /// Open an existing collection.
    pub async fn collection(&self, name: &str) -> Result<Collection> {
        validate_collection_name(name)?;
        match self.lookup_dim(name).await? {
            Some(dim) => Ok(self.handle(name, dim)),
            None => Err(Error::not_found("collection", name)),
        }
    }

    /// Drop a collection and its vectors. Returns false when absent.
    pub async fn drop_collection(&self, name: &str) -> Result<bool> {
        validate_collection_name(name)?;
        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        let removed = conn.execute("DELETE FROM collections WHERE name = ?1", [name])?;
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table_name(name)))?;
        if removed > 0 {
            info!(name, "dropped vector collection");
        }
        Ok(removed > 0)
    }

    /// Names of all collections, sorted.
    pub async fn collection_names(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for name in rows {
            out.push(name?);
        }
        Ok(out)
    }

    /// Flush buffered writes.
    pub async fn commit(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT;")?;
            debug!("committed buffered vector writes");
        }
        Ok(())
    }

    /// Bytes on disk for the vector database, WAL included.
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

    async fn lookup_dim(&self, name: &str) -> Result<Option<usize>> {
        validate_collection_name(name)?;
        let conn = self.conn.lock().await;
        let dim: Option<i64> = conn
            .query_row("SELECT dim FROM collections WHERE name = ?1", [name], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(dim.and_then(|d| usize::try_from(d).ok()))
    }

    async fn create_unchecked(&self, name: &str, dim: usize) -> Result<Collection> {
        if dim == 0 {
            return Err(Error::Validation(format!(
                "collection {name} needs a positive dimension"
            )));
        }
        let table = table_name(name);
        {
            let conn = self.conn.lock().await;
            begin_buffered(&conn)?;
            conn.execute(
                "INSERT INTO collections (name, dim) VALUES (?1, ?2)",
                params![name, dim as i64],
            )?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                     id TEXT PRIMARY KEY,
                     vector BLOB NOT NULL,
                     group_name TEXT NOT NULL DEFAULT '',
                     content TEXT NOT NULL DEFAULT ''
                 );
                 CREATE INDEX IF NOT EXISTS idx_{table}_group ON {table}(group_name);"
            ))?;
        }
        info!(name, dim, "created vector collection");
        Ok(self.handle(name, dim))
    }

    fn handle(&self, name: &str, dim: usize) -> Collection {
        Collection {
            conn: Arc::clone(&self.conn),
            name: name.to_string(),
            table: table_name(name),
            dim,
            block_size: self.block_size.max(1),
        }
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Handle to one named collection. Cheap to clone; all handles share the
/// store's connection lock.
#[derive(Clone)]
pub struct Collection {
    conn: Arc<Mutex<Connection>>,
    name: String,
    table: String,
    dim: usize,
    block_size: usize,
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimension fixed at creation time.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert a new entry. Fails with `Duplicate` on an existing id and
    /// validates dimension and finiteness before touching the table.
    pub async fn insert(&self, entry: &VectorEntry) -> Result<()> {
        self.validate_entry(entry)?;
        let blob = codec::encode(&entry.vector);

        let conn = self.conn.lock().await;
        if self.id_exists(&conn, &entry.id)? {
            return Err(Error::duplicate("vector", entry.id.clone()));
        }
        begin_buffered(&conn)?;
        conn.execute(
            &format!(
                "INSERT INTO {} (id, vector, group_name, content) VALUES (?1, ?2, ?3, ?4)",
                self.table
            ),
            params![entry.id, blob, entry.group, entry.fingerprint],
        )?;
        Ok(())
    }

    /// Overwrite an existing entry. Fails with `NotFound` when absent.
    pub async fn update(&self, entry: &VectorEntry) -> Result<()> {
        self.validate_entry(entry)?;
        let blob = codec::encode(&entry.vector);

        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET vector = ?2, group_name = ?3, content = ?4 WHERE id = ?1",
                self.table
            ),
            params![entry.id, blob, entry.group, entry.fingerprint],
        )?;
        if changed == 0 {
            return Err(Error::not_found("vector", entry.id.clone()));
        }
        Ok(())
    }

    /// Update the entry, inserting it when absent. An update keeps the
    /// original scan position; only a fresh insert appends.
    pub async fn upsert(&self, entry: &VectorEntry) -> Result<()> {
        self.validate_entry(entry)?;
        let blob = codec::encode(&entry.vector);

        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET vector = ?2, group_name = ?3, content = ?4 WHERE id = ?1",
                self.table
            ),
            params![entry.id, blob, entry.group, entry.fingerprint],
        )?;
        if changed == 0 {
            conn.execute(
                &format!(
                    "INSERT INTO {} (id, vector, group_name, content) VALUES (?1, ?2, ?3, ?4)",
                    self.table
                ),
                params![entry.id, blob, entry.group, entry.fingerprint],
            )?;
        }
        Ok(())
    }

    /// Delete one entry. Returns false when absent.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table),
            [id],
        )?;
        Ok(removed > 0)
    }

    /// Delete every entry owned by a group. Returns the removed count.
    pub async fn delete_group(&self, group: &str) -> Result<usize> {
        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        let removed = conn.execute(
            &format!("DELETE FROM {} WHERE group_name = ?1", self.table),
            [group],
        )?;
        if removed > 0 {
            debug!(group, removed, collection = %self.name, "deleted vector group");
        }
        Ok(removed)
    }

    /// Fetch one entry.
    pub async fn get(&self, id: &str) -> Result<VectorEntry> {
        let row = {
            let conn = self.conn.lock().await;
            conn.query_row(
                &format!(
                    "SELECT id, vector, group_name, content FROM {} WHERE id = ?1",
                    self.table
                ),
                [id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
        };

        let Some((id, blob, group, fingerprint)) = row else {
            return Err(Error::not_found("vector", id));
        };
        Ok(VectorEntry {
            id,
            group,
            vector: codec::decode(&blob, self.dim)?,
            fingerprint,
        })
    }

    /// All entry ids in scan order.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare(&format!("SELECT id FROM {} ORDER BY rowid", self.table))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for id in rows {
            out.push(id?);
        }
        Ok(out)
    }

    /// Distinct group names, sorted.
    pub async fn groups(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT group_name FROM {} ORDER BY group_name",
            self.table
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for group in rows {
            out.push(group?);
        }
        Ok(out)
    }

    /// Number of stored entries.
    pub async fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Remove every entry and reclaim the space.
    pub async fn clear(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        begin_buffered(&conn)?;
        conn.execute(&format!("DELETE FROM {}", self.table), [])?;
        conn.execute_batch("COMMIT;")?;
        conn.execute_batch("VACUUM;")?;
        info!(collection = %self.name, "cleared vector collection");
        Ok(())
    }

    /// Top-k nearest entries, ranked by descending score. `group`
    /// restricts the scan to one owning record.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
        group: Option<&str>,
    ) -> Result<Vec<(String, f32)>> {
        self.search_impl(query, k, metric, group, None).await
    }

    /// Top-k nearest entries whose group lies in the allowed set. Used to
    /// compose semantic search with structured candidate narrowing.
    pub async fn search_within(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
        allowed: &HashSet<String>,
    ) -> Result<Vec<(String, f32)>> {
        if allowed.is_empty() {
            return Ok(Vec::new());
        }
        self.search_impl(query, k, metric, None, Some(allowed)).await
    }

    async fn search_impl(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
        group: Option<&str>,
        allowed: Option<&HashSet<String>>,
    ) -> Result<Vec<(String, f32)>> {
        self.check_dim(query.len())?;
        ensure_finite(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let plain_sql = format!(
            "SELECT rowid, id, group_name, vector FROM {} \
             WHERE rowid > ?1 ORDER BY rowid LIMIT {}",
            self.table, self.block_size
        );
        let grouped_sql = format!(
            "SELECT rowid, id, group_name, vector FROM {} \
             WHERE rowid > ?1 AND group_name = ?2 ORDER BY rowid LIMIT {}",
            self.table, self.block_size
        );

        let mut topk = TopK::new(k);
        let mut cursor: i64 = 0;
        loop {
            // Fetch one block under the lock, then score it outside so
            // concurrent mutations interleave between blocks.
            let block: Vec<(i64, String, String, Vec<u8>)> = {
                let conn = self.conn.lock().await;
                let mut stmt = match group {
                    Some(_) => conn.prepare_cached(&grouped_sql)?,
                    None => conn.prepare_cached(&plain_sql)?,
                };
                let mut out = Vec::new();
                let mapper = |row: &rusqlite::Row<'_>| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                };
                match group {
                    Some(g) => {
                        for row in stmt.query_map(params![cursor, g], mapper)? {
                            out.push(row?);
                        }
                    }
                    None => {
                        for row in stmt.query_map(params![cursor], mapper)? {
                            out.push(row?);
                        }
                    }
                }
                out
            };
            if block.is_empty() {
                break;
            }
            let exhausted = block.len() < self.block_size;

            for (rowid, id, group_name, blob) in block {
                cursor = rowid;
                if allowed.is_some_and(|set| !set.contains(&group_name)) {
                    continue;
                }
                let vector = codec::decode(&blob, self.dim)?;
                topk.push(id, metric.score(query, &vector));
            }

            if exhausted {
                break;
            }
            tokio::task::yield_now().await;
        }

        Ok(topk.into_ranked())
    }

    fn validate_entry(&self, entry: &VectorEntry) -> Result<()> {
        if entry.id.trim().is_empty() {
            return Err(Error::Validation("empty vector id".to_string()));
        }
        self.check_dim(entry.vector.len())?;
        ensure_finite(&entry.vector)
    }

    fn check_dim(&self, got: usize) -> Result<()> {
        if got != self.dim {
            return Err(Error::Validation(format!(
                "dimension mismatch: got {got}, collection {} is {}",
                self.name, self.dim
            )));
        }
        Ok(())
    }

    fn id_exists(&self, conn: &Connection, id: &str) -> Result<bool> {
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", self.table),
            [id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("dim", &self.dim)
            .field("block_size", &self.block_size)
            .finish_non_exhaustive()
    }
}

/// Collection names become table identifiers, so they are restricted to
/// a conservative alphabet up front.
fn validate_collection_name(name: &str) -> Result<()> {
    let well_formed = !name.is_empty()
        && name.len() <= 64
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if well_formed {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "invalid collection name {name:?} (want [A-Za-z][A-Za-z0-9_]*, at most 64 chars)"
        )))
    }
}

fn table_name(name: &str) -> String {
    format!("col_{name}")
}

fn begin_buffered(conn: &Connection) -> Result<()> {
    if conn.is_autocommit() {
        conn.execute_batch("BEGIN;")?;
    }
    Ok(())
}

fn ensure_finite(vector: &[f32]) -> Result<()> {
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(Error::Validation(
            "vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}
