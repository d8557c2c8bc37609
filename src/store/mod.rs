//! Durable library storage using SQLite
//!
//! This module owns all persistent state:
//! - Documents (metadata in `documents`, bytes in `document_payloads`)
//! - Collections
//! - Schema version and migration history
//!
//! The handle is cheap to construct. The connection pool and schema are
//! created on first use, once, no matter how many callers race to it.

mod schema;

pub use schema::{CURRENT_VERSION, MIGRATIONS};

use crate::config::Config;
use crate::error::{Error, Operation, Result};
use crate::models::{now_millis, validate_name, Collection, Document, DocumentMeta, LibraryStats};
use crate::query::{fold_name, CollectionFilter, DocumentQuery, SortOrder};
use futures::TryStreamExt;
use schema::{FOLDED_NAMES_VERSION, HISTORY_SQL, META_COLUMNS};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteSynchronous,
};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Connection and policy settings for a [`LibraryStore`]
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub db_path: PathBuf,
    pub max_connections: u32,
    pub busy_timeout: Duration,
    pub max_payload_bytes: u64,
    pub repair_on_open: bool,
}

impl StoreOptions {
    /// Options with default limits for the database at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        let defaults = crate::config::StorageConfig::default();
        Self {
            db_path: db_path.into(),
            max_connections: defaults.max_connections,
            busy_timeout: Duration::from_millis(defaults.busy_timeout_ms),
            max_payload_bytes: defaults.max_payload_bytes,
            repair_on_open: defaults.repair_on_open,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            db_path: config.paths.db_file.clone(),
            max_connections: config.storage.max_connections,
            busy_timeout: Duration::from_millis(config.storage.busy_timeout_ms),
            max_payload_bytes: config.storage.max_payload_bytes,
            repair_on_open: config.storage.repair_on_open,
        }
    }
}

/// One applied schema migration
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MigrationRecord {
    pub version: i64,
    pub description: String,
    pub applied_at: i64,
}

/// Result of deleting a collection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRemoval {
    /// Whether a collection record existed and was removed
    pub removed: bool,
    /// Documents moved back to uncategorized
    pub documents_uncategorized: u64,
}

/// Library database handle
pub struct LibraryStore {
    options: StoreOptions,
    pool: OnceCell<SqlitePool>,
    #[cfg(test)]
    initializations: AtomicUsize,
}

impl LibraryStore {
    /// Create a handle. No I/O happens until the first operation or [`LibraryStore::init`].
    pub fn new(options: StoreOptions) -> Self {
        Self {
            options,
            pool: OnceCell::new(),
            #[cfg(test)]
            initializations: AtomicUsize::new(0),
        }
    }

    /// Create a handle and initialize it immediately
    pub async fn open(options: StoreOptions) -> Result<Self> {
        let store = Self::new(options);
        store.init().await?;
        Ok(store)
    }

    /// Open the store described by a loaded config
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(StoreOptions::from_config(config)).await
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Ensure the database is open and migrated.
    ///
    /// Concurrent callers share a single in-flight initialization. A failure
    /// is returned to every waiter and not cached, so a later call tries again.
    pub async fn init(&self) -> Result<()> {
        self.pool().await.map(|_| ())
    }

    /// Whether initialization has completed
    pub fn is_initialized(&self) -> bool {
        self.pool.initialized()
    }

    #[cfg(test)]
    fn initializations(&self) -> usize {
        self.initializations.load(Ordering::SeqCst)
    }

    /// Close the pool if it was opened
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }

    async fn pool(&self) -> Result<&SqlitePool> {
        self.pool.get_or_try_init(|| self.initialize()).await
    }

    async fn initialize(&self) -> Result<SqlitePool> {
        #[cfg(test)]
        self.initializations.fetch_add(1, Ordering::SeqCst);
        let db_path = &self.options.db_path;
        let unavailable = |reason: String| Error::StorageUnavailable {
            path: db_path.display().to_string(),
            reason,
        };

        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(self.options.busy_timeout);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(self.options.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        let version = migrate(&pool, db_path).await?;
        info!(version, path = %db_path.display(), "Library store ready");

        if self.options.repair_on_open {
            let repaired = reconcile(&pool).await?;
            if repaired > 0 {
                warn!(repaired, "Cleared dangling collection references");
            }
        }

        Ok(pool)
    }

    // ===== Schema =====

    /// Applied schema version
    pub async fn schema_version(&self) -> Result<i64> {
        let pool = self.pool().await?;
        sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(pool)
            .await
            .map_err(Error::storage_fn(Operation::Read, "schema version"))
    }

    /// Applied migrations, oldest first
    pub async fn migration_history(&self) -> Result<Vec<MigrationRecord>> {
        let pool = self.pool().await?;
        sqlx::query_as::<_, MigrationRecord>(
            "SELECT version, description, applied_at FROM schema_migrations ORDER BY version",
        )
        .fetch_all(pool)
        .await
        .map_err(Error::storage_fn(Operation::Read, "migration history"))
    }

    /// Null every `collection_id` that names a collection which no longer exists.
    ///
    /// Repairs the state left behind if a collection delete was interrupted.
    /// Returns the number of documents repaired.
    pub async fn reconcile_dangling_references(&self) -> Result<u64> {
        let pool = self.pool().await?;
        reconcile(pool).await
    }

    // ===== Document Operations =====

    /// Store a new document, metadata and payload, in one transaction
    pub async fn create_document(&self, doc: &Document) -> Result<()> {
        let id = doc.id();
        let size = doc.payload.len() as u64;
        if size > self.options.max_payload_bytes {
            return Err(Error::QuotaExceeded {
                op: Operation::Create,
                target: id.to_string(),
                detail: format!(
                    "payload is {} bytes, limit is {}",
                    size, self.options.max_payload_bytes
                ),
            });
        }
        validate_name(&doc.meta.name, "document")?;

        let pool = self.pool().await?;
        let err = Error::storage_fn;
        let mut tx = pool.begin().await.map_err(err(Operation::Create, id))?;

        let meta = &doc.meta;
        sqlx::query(
            r#"
            INSERT INTO documents (id, name, name_folded, collection_id, added_at, last_opened_at, current_position, total_units, size_bytes)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&meta.id)
        .bind(&meta.name)
        .bind(fold_name(&meta.name))
        .bind(&meta.collection_id)
        .bind(meta.added_at)
        .bind(meta.last_opened_at)
        .bind(meta.current_position)
        .bind(meta.total_units)
        .bind(meta.size_bytes)
        .execute(&mut *tx)
        .await
        .map_err(err(Operation::Create, id))?;

        sqlx::query("INSERT INTO document_payloads (document_id, bytes) VALUES (?, ?)")
            .bind(&meta.id)
            .bind(&doc.payload)
            .execute(&mut *tx)
            .await
            .map_err(err(Operation::Create, id))?;

        tx.commit().await.map_err(err(Operation::Create, id))?;

        debug!(doc_id = %id, size, "Created document");
        Ok(())
    }

    /// Full record including payload, or `None` if absent.
    ///
    /// This is the only read that touches payload bytes.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let pool = self.pool().await?;
        sqlx::query_as::<_, Document>(
            r#"
            SELECT d.id AS id, d.name AS name, d.collection_id AS collection_id,
                   d.added_at AS added_at, d.last_opened_at AS last_opened_at,
                   d.current_position AS current_position, d.total_units AS total_units,
                   d.size_bytes AS size_bytes, p.bytes AS payload
            FROM documents d
            JOIN document_payloads p ON p.document_id = d.id
            WHERE d.id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(pool)
        .await
        .map_err(Error::storage_fn(Operation::Read, id))
    }

    /// Metadata for one document, without its payload
    pub async fn get_document_metadata(&self, id: &str) -> Result<Option<DocumentMeta>> {
        let pool = self.pool().await?;
        let sql = format!("SELECT {} FROM documents WHERE id = ?", META_COLUMNS);
        sqlx::query_as::<_, DocumentMeta>(&sql)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Error::storage_fn(Operation::Read, id))
    }

    /// Metadata for every document, most recently added first
    pub async fn list_document_metadata(&self) -> Result<Vec<DocumentMeta>> {
        self.query_documents(&DocumentQuery::new()).await
    }

    /// Metadata for documents matching a collection filter (uses the by-collection index)
    pub async fn list_documents_in(&self, filter: CollectionFilter) -> Result<Vec<DocumentMeta>> {
        self.query_documents(&DocumentQuery::new().in_collection(filter))
            .await
    }

    /// Opened documents, most recently opened first (uses the by-recency index)
    pub async fn list_recently_opened(&self, limit: usize) -> Result<Vec<DocumentMeta>> {
        self.query_documents(
            &DocumentQuery::new()
                .sort(SortOrder::Recent)
                .opened_only()
                .limit(limit),
        )
        .await
    }

    /// Run a metadata listing. Rows are streamed from the cursor; payloads are never selected.
    pub async fn query_documents(&self, query: &DocumentQuery) -> Result<Vec<DocumentMeta>> {
        let pool = self.pool().await?;
        let mut qb: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM documents", META_COLUMNS));
        query.push_sql(&mut qb);

        let mut rows = qb.build_query_as::<DocumentMeta>().fetch(pool);
        let mut docs = Vec::new();
        while let Some(meta) = rows
            .try_next()
            .await
            .map_err(Error::storage_fn(Operation::Read, "documents"))?
        {
            docs.push(meta);
        }
        Ok(docs)
    }

    /// Record reading progress.
    ///
    /// Sets the position and stamps `last_opened_at`; `total_units` is only
    /// overwritten when a non-zero value is supplied. Returns `false` when the
    /// document does not exist.
    pub async fn update_progress(
        &self,
        id: &str,
        position: u32,
        total_units: Option<u32>,
    ) -> Result<bool> {
        let pool = self.pool().await?;
        let total = total_units.unwrap_or(0);
        let result = sqlx::query(
            r#"
            UPDATE documents SET
                current_position = ?,
                last_opened_at = ?,
                total_units = CASE WHEN ? > 0 THEN ? ELSE total_units END
            WHERE id = ?
            "#,
        )
        .bind(position)
        .bind(now_millis())
        .bind(total)
        .bind(total)
        .bind(id)
        .execute(pool)
        .await
        .map_err(Error::storage_fn(Operation::Update, id))?;

        let updated = result.rows_affected() > 0;
        if !updated {
            debug!(doc_id = %id, "Progress update for missing document ignored");
        }
        Ok(updated)
    }

    /// Move a document into a collection, or to uncategorized with `None`.
    ///
    /// The collection id is not checked here; callers resolve it first.
    pub async fn update_category(&self, id: &str, collection_id: Option<&str>) -> Result<bool> {
        let pool = self.pool().await?;
        let result = sqlx::query("UPDATE documents SET collection_id = ? WHERE id = ?")
            .bind(collection_id)
            .bind(id)
            .execute(pool)
            .await
            .map_err(Error::storage_fn(Operation::Update, id))?;
        Ok(result.rows_affected() > 0)
    }

    /// Change a document's display name
    pub async fn rename_document(&self, id: &str, name: &str) -> Result<bool> {
        let name = validate_name(name, "document")?;
        let pool = self.pool().await?;
        let result = sqlx::query("UPDATE documents SET name = ?, name_folded = ? WHERE id = ?")
            .bind(&name)
            .bind(fold_name(&name))
            .bind(id)
            .execute(pool)
            .await
            .map_err(Error::storage_fn(Operation::Update, id))?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a document and its payload. Returns `false` if it was already gone.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let pool = self.pool().await?;
        let err = Error::storage_fn;
        let mut tx = pool.begin().await.map_err(err(Operation::Delete, id))?;

        sqlx::query("DELETE FROM document_payloads WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(err(Operation::Delete, id))?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(err(Operation::Delete, id))?;

        tx.commit().await.map_err(err(Operation::Delete, id))?;

        let removed = result.rows_affected() > 0;
        if removed {
            info!(doc_id = %id, "Deleted document");
        }
        Ok(removed)
    }

    // ===== Collection Operations =====

    /// Insert a new collection. Blank names are rejected before any write.
    pub async fn create_collection(&self, collection: &Collection) -> Result<()> {
        let name = validate_name(&collection.name, "collection")?;
        let pool = self.pool().await?;
        sqlx::query("INSERT INTO collections (id, name, created_at) VALUES (?, ?, ?)")
            .bind(&collection.id)
            .bind(&name)
            .bind(collection.created_at)
            .execute(pool)
            .await
            .map_err(Error::storage_fn(Operation::Create, &collection.id))?;
        debug!(collection_id = %collection.id, name = %name, "Created collection");
        Ok(())
    }

    /// Get a collection by ID
    pub async fn get_collection(&self, id: &str) -> Result<Option<Collection>> {
        let pool = self.pool().await?;
        sqlx::query_as::<_, Collection>("SELECT id, name, created_at FROM collections WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Error::storage_fn(Operation::Read, id))
    }

    /// All collections, oldest first
    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let pool = self.pool().await?;
        sqlx::query_as::<_, Collection>(
            "SELECT id, name, created_at FROM collections ORDER BY created_at, id",
        )
        .fetch_all(pool)
        .await
        .map_err(Error::storage_fn(Operation::Read, "collections"))
    }

    /// Delete a collection and move its documents to uncategorized, atomically
    pub async fn delete_collection(&self, id: &str) -> Result<CollectionRemoval> {
        let pool = self.pool().await?;
        let err = Error::storage_fn;
        let mut tx = pool.begin().await.map_err(err(Operation::Delete, id))?;

        let removed = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(err(Operation::Delete, id))?
            .rows_affected()
            > 0;

        let documents_uncategorized =
            sqlx::query("UPDATE documents SET collection_id = NULL WHERE collection_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(err(Operation::Update, id))?
                .rows_affected();

        tx.commit().await.map_err(err(Operation::Delete, id))?;

        info!(
            collection_id = %id,
            removed,
            documents_uncategorized,
            "Deleted collection"
        );
        Ok(CollectionRemoval {
            removed,
            documents_uncategorized,
        })
    }

    /// Number of documents filed under each collection id, dangling ids included
    pub async fn collection_document_counts(&self) -> Result<HashMap<String, usize>> {
        let pool = self.pool().await?;
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT collection_id, COUNT(*) FROM documents
            WHERE collection_id IS NOT NULL
            GROUP BY collection_id
            "#,
        )
        .fetch_all(pool)
        .await
        .map_err(Error::storage_fn(Operation::Read, "collection counts"))?;

        Ok(rows
            .into_iter()
            .map(|(id, count)| (id, count.max(0) as usize))
            .collect())
    }

    // ===== Statistics =====

    /// Library counters, from metadata only
    pub async fn library_stats(&self) -> Result<LibraryStats> {
        let pool = self.pool().await?;
        let read = Error::storage_fn;

        let (document_count, total_bytes, uncategorized_count): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(size_bytes), 0),
                   COALESCE(SUM(CASE WHEN collection_id IS NULL THEN 1 ELSE 0 END), 0)
            FROM documents
            "#,
        )
        .fetch_one(pool)
        .await
        .map_err(read(Operation::Read, "documents"))?;

        let collection_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM collections")
            .fetch_one(pool)
            .await
            .map_err(read(Operation::Read, "collections"))?;

        Ok(LibraryStats {
            document_count: document_count as usize,
            collection_count: collection_count as usize,
            uncategorized_count: uncategorized_count as usize,
            total_bytes: total_bytes.max(0) as u64,
        })
    }
}

/// Bring the schema up to [`CURRENT_VERSION`] inside one transaction
async fn migrate(pool: &SqlitePool, db_path: &Path) -> Result<i64> {
    let err = |e: sqlx::Error| Error::storage(Operation::Initialize, "schema", e);
    let mut tx = pool.begin().await.map_err(err)?;

    sqlx::query(HISTORY_SQL)
        .execute(&mut *tx)
        .await
        .map_err(err)?;

    let current: i64 = sqlx::query_scalar("PRAGMA user_version")
        .fetch_one(&mut *tx)
        .await
        .map_err(err)?;

    if current > CURRENT_VERSION {
        return Err(Error::StorageUnavailable {
            path: db_path.display().to_string(),
            reason: format!(
                "schema version {} is newer than supported version {}",
                current, CURRENT_VERSION
            ),
        });
    }

    for migration in schema::pending(current) {
        info!(
            version = migration.version,
            "Applying schema migration: {}", migration.description
        );
        sqlx::query(migration.sql)
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        if migration.version == FOLDED_NAMES_VERSION {
            let folded = backfill_folded_names(&mut tx).await.map_err(err)?;
            debug!(folded, "Backfilled folded document names");
        }
        sqlx::query("INSERT INTO schema_migrations (version, description, applied_at) VALUES (?, ?, ?)")
            .bind(migration.version)
            .bind(migration.description)
            .bind(now_millis())
            .execute(&mut *tx)
            .await
            .map_err(err)?;
        // PRAGMA arguments cannot be bound.
        sqlx::query(&format!("PRAGMA user_version = {}", migration.version))
            .execute(&mut *tx)
            .await
            .map_err(err)?;
    }

    tx.commit().await.map_err(err)?;
    Ok(current.max(CURRENT_VERSION))
}

async fn backfill_folded_names(conn: &mut SqliteConnection) -> sqlx::Result<u64> {
    let rows: Vec<(String, String)> = sqlx::query_as("SELECT id, name FROM documents")
        .fetch_all(&mut *conn)
        .await?;
    for (id, name) in &rows {
        sqlx::query("UPDATE documents SET name_folded = ? WHERE id = ?")
            .bind(fold_name(name))
            .bind(id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(rows.len() as u64)
}

async fn reconcile(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE documents SET collection_id = NULL
        WHERE collection_id IS NOT NULL
          AND collection_id NOT IN (SELECT id FROM collections)
        "#,
    )
    .execute(pool)
    .await
    .map_err(Error::storage_fn(Operation::Update, "dangling collection references"))?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn test_options(tmp: &TempDir) -> StoreOptions {
        StoreOptions::new(tmp.path().join("library.db"))
    }

    async fn setup_test_store() -> (LibraryStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
        (store, tmp)
    }

    fn doc_at(name: &str, collection_id: Option<&str>, added_at: i64) -> Document {
        let mut doc = Document::new(name, collection_id.map(str::to_string), b"%PDF-1.7 body".to_vec());
        doc.meta.added_at = added_at;
        doc
    }

    #[tokio::test]
    async fn test_document_round_trip() {
        let (store, _tmp) = setup_test_store().await;

        let payload: Vec<u8> = (0..=255u8).cycle().take(70_000).collect();
        let mut doc = Document::new("Thesis", None, payload);
        doc.meta.total_units = 12;
        doc.meta.current_position = 4;
        doc.meta.last_opened_at = Some(1_700_000_000_000);
        store.create_document(&doc).await.unwrap();

        let loaded = store.get_document(doc.id()).await.unwrap().unwrap();
        assert_eq!(loaded, doc);
    }

    #[tokio::test]
    async fn test_missing_document_is_absent_not_error() {
        let (store, _tmp) = setup_test_store().await;
        assert!(store.get_document("nope").await.unwrap().is_none());
        assert!(store.get_document_metadata("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_listing_is_metadata_only_and_newest_first() {
        let (store, _tmp) = setup_test_store().await;

        let d1 = doc_at("first", None, 1_000);
        let mut d2 = doc_at("second", None, 2_000);
        d2.payload = vec![7u8; 2 * 1024 * 1024];
        d2.meta.size_bytes = d2.payload.len() as i64;
        let d3 = doc_at("third", None, 3_000);

        store.create_document(&d2).await.unwrap();
        store.create_document(&d1).await.unwrap();
        store.create_document(&d3).await.unwrap();

        let listed = store.list_document_metadata().await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![d3.id(), d2.id(), d1.id()]);
        assert_eq!(listed[1], d2.meta);
        assert_eq!(listed[1].size_bytes, 2 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_progress_last_write_wins() {
        let (store, _tmp) = setup_test_store().await;
        let doc = doc_at("book", None, 1);
        store.create_document(&doc).await.unwrap();

        assert!(store.update_progress(doc.id(), 5, Some(40)).await.unwrap());
        let first = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(first.current_position, 5);
        assert_eq!(first.total_units, 40);
        let first_opened = first.last_opened_at.unwrap();

        let before_second = now_millis();
        assert!(store.update_progress(doc.id(), 3, None).await.unwrap());
        let second = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(second.current_position, 3);
        assert_eq!(second.total_units, 40);
        let second_opened = second.last_opened_at.unwrap();
        assert!(second_opened >= before_second);
        assert!(second_opened >= first_opened);

        // Zero is not a measurement
        store.update_progress(doc.id(), 3, Some(0)).await.unwrap();
        let third = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(third.total_units, 40);

        // Re-measurement may correct the total
        store.update_progress(doc.id(), 3, Some(42)).await.unwrap();
        let fourth = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(fourth.total_units, 42);
    }

    #[tokio::test]
    async fn test_updates_on_missing_document_are_noops() {
        let (store, _tmp) = setup_test_store().await;
        assert!(!store.update_progress("ghost", 2, Some(10)).await.unwrap());
        assert!(!store.update_category("ghost", Some("c")).await.unwrap());
        assert!(!store.rename_document("ghost", "name").await.unwrap());
        assert!(store.list_document_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _tmp) = setup_test_store().await;
        let doc = doc_at("gone", None, 1);
        store.create_document(&doc).await.unwrap();

        assert!(store.delete_document(doc.id()).await.unwrap());
        assert!(store.get_document(doc.id()).await.unwrap().is_none());
        assert!(!store.delete_document(doc.id()).await.unwrap());
        assert!(store.get_document(doc.id()).await.unwrap().is_none());

        let pool = store.pool().await.unwrap();
        let payloads: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_payloads")
            .fetch_one(pool)
            .await
            .unwrap();
        assert_eq!(payloads, 0);
    }

    #[tokio::test]
    async fn test_delete_collection_uncategorizes_members() {
        let (store, _tmp) = setup_test_store().await;

        let keep = Collection::new("Keep").unwrap();
        let doomed = Collection::new("Doomed").unwrap();
        store.create_collection(&keep).await.unwrap();
        store.create_collection(&doomed).await.unwrap();

        let d1 = doc_at("d1", Some(&doomed.id), 1);
        let d2 = doc_at("d2", Some(&doomed.id), 2);
        let d3 = doc_at("d3", None, 3);
        let d4 = doc_at("d4", Some(&keep.id), 4);
        for d in [&d1, &d2, &d3, &d4] {
            store.create_document(d).await.unwrap();
        }

        let outcome = store.delete_collection(&doomed.id).await.unwrap();
        assert!(outcome.removed);
        assert_eq!(outcome.documents_uncategorized, 2);

        for d in [&d1, &d2, &d3] {
            let meta = store.get_document_metadata(d.id()).await.unwrap().unwrap();
            assert_eq!(meta.collection_id, None);
        }
        let d4_meta = store.get_document_metadata(d4.id()).await.unwrap().unwrap();
        assert_eq!(d4_meta.collection_id.as_deref(), Some(keep.id.as_str()));

        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections, vec![keep]);

        let again = store.delete_collection(&doomed.id).await.unwrap();
        assert_eq!(again, CollectionRemoval::default());
    }

    #[tokio::test]
    async fn test_collection_filter() {
        let (store, _tmp) = setup_test_store().await;
        let a = Collection::new("A").unwrap();
        let b = Collection::new("B").unwrap();
        store.create_collection(&a).await.unwrap();
        store.create_collection(&b).await.unwrap();

        let docs = vec![
            doc_at("a1", Some(&a.id), 1),
            doc_at("n1", None, 2),
            doc_at("b1", Some(&b.id), 3),
            doc_at("a2", Some(&a.id), 4),
            doc_at("n2", None, 5),
        ];
        for d in &docs {
            store.create_document(d).await.unwrap();
        }
        let all = store.list_document_metadata().await.unwrap();

        for filter in [
            CollectionFilter::Collection(a.id.clone()),
            CollectionFilter::Collection(b.id.clone()),
            CollectionFilter::Uncategorized,
            CollectionFilter::All,
        ] {
            let from_store = store.list_documents_in(filter.clone()).await.unwrap();
            let expected: Vec<DocumentMeta> =
                all.iter().filter(|d| filter.matches(d)).cloned().collect();
            assert_eq!(from_store, expected, "filter {:?}", filter);
        }

        let in_a = store
            .list_documents_in(CollectionFilter::Collection(a.id.clone()))
            .await
            .unwrap();
        assert_eq!(in_a.len(), 2);
        assert!(in_a.iter().all(|d| d.collection_id.as_deref() == Some(a.id.as_str())));
    }

    #[tokio::test]
    async fn test_query_matches_in_memory_helper() {
        let (store, _tmp) = setup_test_store().await;
        let names = [
            "Rust Book",
            "rustonomicon",
            "Go Tour",
            "50% done_file",
            "Zed",
            "Über Physik",
            "éclair",
            "Éclair2",
        ];
        for (i, name) in names.iter().enumerate() {
            let mut d = doc_at(name, None, i as i64);
            d.meta.total_units = 10;
            d.meta.current_position = (i as u32 + 1) * 2;
            store.create_document(&d).await.unwrap();
        }
        let all = store.list_document_metadata().await.unwrap();

        let queries = vec![
            DocumentQuery::new().search("rust").sort(SortOrder::Name),
            DocumentQuery::new().sort(SortOrder::Progress),
            DocumentQuery::new().sort(SortOrder::Oldest).limit(2),
            DocumentQuery::new().search("50%"),
            DocumentQuery::new().search("_"),
            DocumentQuery::new().search("über"),
            DocumentQuery::new().search("ÉCLAIR"),
        ];
        for q in queries {
            assert_eq!(store.query_documents(&q).await.unwrap(), q.apply(&all), "{:?}", q);
        }

        let found = store
            .query_documents(&DocumentQuery::new().search("über"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "Über Physik");

        let by_name: Vec<String> = store
            .query_documents(&DocumentQuery::new().sort(SortOrder::Name))
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(
            by_name,
            vec![
                "50% done_file",
                "Go Tour",
                "Rust Book",
                "rustonomicon",
                "Zed",
                "éclair",
                "Éclair2",
                "Über Physik"
            ]
        );
    }

    #[tokio::test]
    async fn test_rename_refolds_name() {
        let (store, _tmp) = setup_test_store().await;
        let doc = doc_at("Plain", None, 1);
        store.create_document(&doc).await.unwrap();
        store.rename_document(doc.id(), "ÄRGER").await.unwrap();

        let found = store
            .query_documents(&DocumentQuery::new().search("ärger"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(store
            .query_documents(&DocumentQuery::new().search("plain"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_v1_database_is_upgraded_and_backfilled() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("library.db");
        {
            let pool = SqlitePool::connect_with(
                SqliteConnectOptions::new()
                    .filename(&db_path)
                    .create_if_missing(true),
            )
            .await
            .unwrap();
            sqlx::query(HISTORY_SQL).execute(&pool).await.unwrap();
            sqlx::query(MIGRATIONS[0].sql).execute(&pool).await.unwrap();
            sqlx::query(
                "INSERT INTO schema_migrations (version, description, applied_at) VALUES (1, 'initial library schema', 0)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query("PRAGMA user_version = 1").execute(&pool).await.unwrap();
            sqlx::query(
                "INSERT INTO documents (id, name, added_at, size_bytes) VALUES ('old', 'Ökonomie', 1, 0)",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query("INSERT INTO document_payloads (document_id, bytes) VALUES ('old', x'')")
                .execute(&pool)
                .await
                .unwrap();
            pool.close().await;
        }

        let store = LibraryStore::open(StoreOptions::new(&db_path)).await.unwrap();
        assert_eq!(store.schema_version().await.unwrap(), CURRENT_VERSION);
        let history: Vec<i64> = store
            .migration_history()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.version)
            .collect();
        assert_eq!(history, vec![1, FOLDED_NAMES_VERSION]);

        let found = store
            .query_documents(&DocumentQuery::new().search("ökonomie"))
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "old");
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_one_document_stay_consistent() {
        let (store, _tmp) = setup_test_store().await;
        let store = Arc::new(store);

        let keep = Collection::new("Keep").unwrap();
        let doomed = Collection::new("Doomed").unwrap();
        store.create_collection(&keep).await.unwrap();
        store.create_collection(&doomed).await.unwrap();

        let target = doc_at("target", Some(&doomed.id), 1);
        let bystander = doc_at("bystander", Some(&doomed.id), 2);
        store.create_document(&target).await.unwrap();
        store.create_document(&bystander).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=20u32 {
            let task_store = Arc::clone(&store);
            let id = target.meta.id.clone();
            handles.push(tokio::spawn(async move {
                assert!(task_store.update_progress(&id, i, Some(100)).await.unwrap());
            }));

            let task_store = Arc::clone(&store);
            let id = target.meta.id.clone();
            let collection = (i % 2 == 0).then(|| keep.id.clone());
            handles.push(tokio::spawn(async move {
                assert!(task_store
                    .update_category(&id, collection.as_deref())
                    .await
                    .unwrap());
            }));

            if i == 10 {
                let task_store = Arc::clone(&store);
                let doomed_id = doomed.id.clone();
                handles.push(tokio::spawn(async move {
                    let removal = task_store.delete_collection(&doomed_id).await.unwrap();
                    assert!(removal.removed);
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let meta = store.get_document_metadata(target.id()).await.unwrap().unwrap();
        assert!((1..=20).contains(&meta.current_position));
        assert_eq!(meta.total_units, 100);
        assert!(meta.last_opened_at.is_some());
        assert!(meta.collection_id.is_none() || meta.collection_id.as_deref() == Some(keep.id.as_str()));

        let bystander = store.get_document_metadata(bystander.id()).await.unwrap().unwrap();
        assert_eq!(bystander.collection_id, None);

        assert_eq!(store.reconcile_dangling_references().await.unwrap(), 0);
        assert_eq!(store.list_collections().await.unwrap(), vec![keep]);
    }

    #[tokio::test]
    async fn test_collection_document_counts() {
        let (store, _tmp) = setup_test_store().await;
        let a = Collection::new("A").unwrap();
        store.create_collection(&a).await.unwrap();
        for (i, c) in [Some(a.id.as_str()), Some(a.id.as_str()), None, Some("gone")].iter().enumerate() {
            store.create_document(&doc_at("d", *c, i as i64)).await.unwrap();
        }

        let counts = store.collection_document_counts().await.unwrap();
        assert_eq!(counts.get(&a.id), Some(&2));
        assert_eq!(counts.get("gone"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[tokio::test]
    async fn test_recently_opened() {
        let (store, _tmp) = setup_test_store().await;
        let a = doc_at("a", None, 1);
        let b = doc_at("b", None, 2);
        let c = doc_at("c", None, 3);
        for d in [&a, &b, &c] {
            store.create_document(d).await.unwrap();
        }

        store.update_progress(a.id(), 2, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        store.update_progress(c.id(), 2, None).await.unwrap();

        let recent = store.list_recently_opened(10).await.unwrap();
        let ids: Vec<&str> = recent.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec![c.id(), a.id()]);

        assert_eq!(store.list_recently_opened(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initialization_runs_once() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(LibraryStore::new(test_options(&tmp)));
        assert!(!store.is_initialized());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.init().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(store.is_initialized());
        assert_eq!(store.initializations(), 1);
        assert_eq!(store.migration_history().await.unwrap().len(), MIGRATIONS.len());
        assert_eq!(store.schema_version().await.unwrap(), CURRENT_VERSION);
    }

    #[tokio::test]
    async fn test_reopen_keeps_data_and_skips_migrations() {
        let tmp = TempDir::new().unwrap();
        let doc = doc_at("persisted", None, 1);
        {
            let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
            store.create_document(&doc).await.unwrap();
            store.close().await;
        }

        let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
        assert_eq!(store.migration_history().await.unwrap().len(), MIGRATIONS.len());
        assert_eq!(store.get_document(doc.id()).await.unwrap().unwrap(), doc);
    }

    #[tokio::test]
    async fn test_newer_schema_is_refused() {
        let tmp = TempDir::new().unwrap();
        {
            let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
            let pool = store.pool().await.unwrap();
            sqlx::query("PRAGMA user_version = 99")
                .execute(pool)
                .await
                .unwrap();
            store.close().await;
        }

        let err = LibraryStore::open(test_options(&tmp)).await.err().unwrap();
        assert!(matches!(err, Error::StorageUnavailable { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_unopenable_path_is_storage_unavailable() {
        let tmp = TempDir::new().unwrap();
        // A directory cannot be opened as a database file
        let store = LibraryStore::new(StoreOptions::new(tmp.path()));
        let err = store.list_collections().await.unwrap_err();
        assert!(matches!(err, Error::StorageUnavailable { .. }), "{err:?}");
        assert!(!store.is_initialized());
    }

    #[tokio::test]
    async fn test_startup_repairs_dangling_references() {
        let tmp = TempDir::new().unwrap();
        let doc = doc_at("orphan", None, 1);
        {
            let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
            store.create_document(&doc).await.unwrap();
            // The store trusts collection ids; simulate an interrupted delete.
            store.update_category(doc.id(), Some("vanished")).await.unwrap();
            store.close().await;
        }

        let mut options = test_options(&tmp);
        options.repair_on_open = false;
        let store = LibraryStore::open(options).await.unwrap();
        let meta = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(meta.collection_id.as_deref(), Some("vanished"));
        assert_eq!(store.reconcile_dangling_references().await.unwrap(), 1);
        assert_eq!(store.reconcile_dangling_references().await.unwrap(), 0);
        store.update_category(doc.id(), Some("vanished")).await.unwrap();
        store.close().await;

        let store = LibraryStore::open(test_options(&tmp)).await.unwrap();
        let meta = store.get_document_metadata(doc.id()).await.unwrap().unwrap();
        assert_eq!(meta.collection_id, None);
    }

    #[tokio::test]
    async fn test_oversized_payload_is_rejected_without_write() {
        let tmp = TempDir::new().unwrap();
        let mut options = test_options(&tmp);
        options.max_payload_bytes = 4;
        let store = LibraryStore::open(options).await.unwrap();

        let doc = doc_at("big", None, 1);
        let err = store.create_document(&doc).await.unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                op: Operation::Create,
                ..
            }
        ));
        assert!(store.get_document(doc.id()).await.unwrap().is_none());
        assert!(store.list_document_metadata().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_leaves_no_partial_record() {
        let (store, _tmp) = setup_test_store().await;
        let original = doc_at("original", None, 1);
        store.create_document(&original).await.unwrap();

        let mut clash = doc_at("clash", None, 2);
        clash.meta.id = original.meta.id.clone();
        clash.payload = b"different".to_vec();
        let err = store.create_document(&clash).await.unwrap_err();
        match err {
            Error::Storage { op, target, .. } => {
                assert_eq!(op, Operation::Create);
                assert_eq!(target, original.meta.id);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert_eq!(store.get_document(original.id()).await.unwrap().unwrap(), original);
        assert_eq!(store.list_document_metadata().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_blank_collection_name_rejected() {
        let (store, _tmp) = setup_test_store().await;
        let mut c = Collection::new("ok").unwrap();
        c.name = "   ".to_string();
        assert!(matches!(
            store.create_collection(&c).await,
            Err(Error::Validation(_))
        ));
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rename_and_stats() {
        let (store, _tmp) = setup_test_store().await;
        let c = Collection::new("Papers").unwrap();
        store.create_collection(&c).await.unwrap();
        let d1 = doc_at("one", Some(&c.id), 1);
        let d2 = doc_at("two", None, 2);
        store.create_document(&d1).await.unwrap();
        store.create_document(&d2).await.unwrap();

        assert!(store.rename_document(d1.id(), "  Uno ").await.unwrap());
        assert!(matches!(
            store.rename_document(d1.id(), "").await,
            Err(Error::Validation(_))
        ));
        let meta = store.get_document_metadata(d1.id()).await.unwrap().unwrap();
        assert_eq!(meta.name, "Uno");

        let stats = store.library_stats().await.unwrap();
        assert_eq!(stats.document_count, 2);
        assert_eq!(stats.collection_count, 1);
        assert_eq!(stats.uncategorized_count, 1);
        assert_eq!(stats.total_bytes, (d1.payload.len() + d2.payload.len()) as u64);
    }

    #[tokio::test]
    async fn test_empty_stats() {
        let (store, _tmp) = setup_test_store().await;
        assert_eq!(store.library_stats().await.unwrap(), LibraryStats::default());
    }
}
