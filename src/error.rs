//! Crate-wide error taxonomy.
//!
//! Four caller-facing classes: `NotFound` (id or key absent, never retried
//! automatically), `Duplicate` (existing id or near-identical title),
//! `Validation` (rejected before any mutation is attempted), and
//! `Connectivity` (embedding provider unreachable; indexing skips the
//! record and retries on a later cycle). Everything else wraps the
//! underlying storage or serialization failure.

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("duplicate {kind}: {key}")]
    Duplicate { kind: &'static str, key: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("embedding provider unreachable: {0}")]
    Connectivity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a missing entity of the given kind.
    pub fn not_found(kind: &'static str, key: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            key: key.into(),
        }
    }

    /// Shorthand for an already-present entity of the given kind.
    pub fn duplicate(kind: &'static str, key: impl Into<String>) -> Self {
        Self::Duplicate {
            kind,
            key: key.into(),
        }
    }

    /// Whether this error is the not-found class.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = Error::not_found("document", "d42");
        assert_eq!(err.to_string(), "document not found: d42");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_duplicate_display() {
        let err = Error::duplicate("collection", "features");
        assert_eq!(err.to_string(), "duplicate collection: features");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
