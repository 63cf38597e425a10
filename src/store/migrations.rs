//! Ordered schema migrations for the metadata store.
//!
//! Each migration targets one `user_version` and runs exactly once inside
//! its own transaction; a fresh database fast-forwards through the whole
//! registry. Steps are append-only: released versions are never edited.

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;

/// Schema version produced by a full run.
pub const SCHEMA_VERSION: u32 = 2;

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "create documents table",
        sql: "CREATE TABLE IF NOT EXISTS documents (
                  id TEXT PRIMARY KEY,
                  citation_text TEXT NOT NULL DEFAULT '',
                  doc_type TEXT NOT NULL DEFAULT '',
                  title TEXT NOT NULL DEFAULT '',
                  year INTEGER NOT NULL DEFAULT 0,
                  publication TEXT NOT NULL DEFAULT '',
                  authors TEXT NOT NULL DEFAULT '',
                  tags TEXT NOT NULL DEFAULT '',
                  url TEXT NOT NULL DEFAULT '',
                  abstract TEXT NOT NULL DEFAULT '',
                  notes TEXT NOT NULL DEFAULT '',
                  time_created REAL NOT NULL,
                  time_modified REAL NOT NULL,
                  schema_info TEXT NOT NULL DEFAULT '{}',
                  doc_extension TEXT NOT NULL DEFAULT ''
              );",
    },
    Migration {
        version: 2,
        name: "index year and modification time",
        sql: "CREATE INDEX IF NOT EXISTS idx_documents_year
                  ON documents(year);
              CREATE INDEX IF NOT EXISTS idx_documents_time_modified
                  ON documents(time_modified);",
    },
];

/// Apply every pending migration and return the resulting version.
pub fn run_migrations(conn: &Connection) -> Result<u32> {
    let mut current: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        conn.execute_batch(&format!(
            "BEGIN;\n{}\nPRAGMA user_version = {};\nCOMMIT;",
            migration.sql, migration.version
        ))?;
        debug!(
            version = migration.version,
            name = migration.name,
            "applied store migration"
        );
        current = migration.version;
    }

    Ok(current)
}
