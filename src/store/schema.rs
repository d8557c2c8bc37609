//! SQLite schema definition and versioned migrations
//!
//! The applied version lives in `PRAGMA user_version`. Migrations are
//! append-only: never edit a released entry, add a new one with the next
//! version number.

/// Schema version this build writes
pub const CURRENT_VERSION: i64 = 2;

/// Version that introduced `documents.name_folded`; existing rows are
/// backfilled in Rust because SQLite's `lower()` only folds ASCII.
pub const FOLDED_NAMES_VERSION: i64 = 2;

/// Migration history, created before any migration runs
pub const HISTORY_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    description TEXT NOT NULL,
    applied_at INTEGER NOT NULL
);
"#;

/// A single schema step
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub description: &'static str,
    pub sql: &'static str,
}

/// v1: collections, document metadata, payloads, secondary indexes
const V1_SQL: &str = r#"
-- Collections: user-defined groupings
CREATE TABLE IF NOT EXISTS collections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

-- Documents: metadata only. collection_id is intentionally not a foreign
-- key; deleting a collection nulls it explicitly.
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    collection_id TEXT,
    added_at INTEGER NOT NULL,
    last_opened_at INTEGER,
    current_position INTEGER NOT NULL DEFAULT 1,
    total_units INTEGER NOT NULL DEFAULT 0,
    size_bytes INTEGER NOT NULL
);

-- Payloads: one row per document, written and deleted with it
CREATE TABLE IF NOT EXISTS document_payloads (
    document_id TEXT PRIMARY KEY,
    bytes BLOB NOT NULL
);

-- Secondary indexes
CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection_id);
CREATE INDEX IF NOT EXISTS idx_documents_last_opened ON documents(last_opened_at);
CREATE INDEX IF NOT EXISTS idx_documents_added ON documents(added_at);
"#;

/// v2: Unicode-folded name used for search and name ordering
const V2_SQL: &str = r#"
ALTER TABLE documents ADD COLUMN name_folded TEXT NOT NULL DEFAULT '';
CREATE INDEX IF NOT EXISTS idx_documents_name_folded ON documents(name_folded);
"#;

/// All migrations, in ascending version order
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial library schema",
        sql: V1_SQL,
    },
    Migration {
        version: FOLDED_NAMES_VERSION,
        description: "folded document names",
        sql: V2_SQL,
    },
];

/// Migrations that still need to run on a database at `current`
pub fn pending(current: i64) -> impl Iterator<Item = &'static Migration> {
    MIGRATIONS.iter().filter(move |m| m.version > current)
}

/// Columns of `documents` that make up [`crate::models::DocumentMeta`]
pub const META_COLUMNS: &str =
    "id, name, collection_id, added_at, last_opened_at, current_position, total_units, size_bytes";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_ordered_and_end_at_current() {
        let versions: Vec<i64> = MIGRATIONS.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(versions, sorted);
        assert_eq!(versions.last().copied(), Some(CURRENT_VERSION));
    }

    #[test]
    fn test_pending() {
        assert_eq!(pending(0).count(), MIGRATIONS.len());
        assert_eq!(pending(CURRENT_VERSION).count(), 0);
        assert_eq!(
            pending(1).map(|m| m.version).collect::<Vec<_>>(),
            vec![FOLDED_NAMES_VERSION]
        );
    }
}
