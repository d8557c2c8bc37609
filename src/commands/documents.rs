//! Document commands: listing, export, progress, move, rename, remove

use crate::error::{Error, Result};
use crate::models::{Collection, DocumentMeta};
use crate::query::{clamp_position, effective_collection, progress_percent, DocumentQuery};
use crate::store::LibraryStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// A document as shown in listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRow {
    #[serde(flatten)]
    pub meta: DocumentMeta,
    /// Resolved collection name; `None` for uncategorized or a dangling reference
    pub collection_name: Option<String>,
    pub progress_percent: u8,
}

impl DocumentRow {
    fn resolve(meta: DocumentMeta, collections: &[Collection]) -> Self {
        let collection_name = effective_collection(&meta, collections).map(|c| c.name.clone());
        let progress_percent = progress_percent(&meta);
        Self {
            meta,
            collection_name,
            progress_percent,
        }
    }
}

/// Where to move a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveTarget {
    Collection(String),
    Uncategorized,
}

/// Result of exporting a document's payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportReport {
    pub id: String,
    pub path: String,
    pub bytes_written: usize,
}

/// List documents matching a query, with collection names resolved
pub async fn cmd_list(store: &LibraryStore, query: &DocumentQuery) -> Result<Vec<DocumentRow>> {
    let docs = store.query_documents(query).await?;
    let collections = store.list_collections().await?;
    Ok(docs
        .into_iter()
        .map(|meta| DocumentRow::resolve(meta, &collections))
        .collect())
}

/// Most recently opened documents
pub async fn cmd_recent(store: &LibraryStore, limit: usize) -> Result<Vec<DocumentRow>> {
    let docs = store.list_recently_opened(limit).await?;
    let collections = store.list_collections().await?;
    Ok(docs
        .into_iter()
        .map(|meta| DocumentRow::resolve(meta, &collections))
        .collect())
}

/// Metadata for a single document
pub async fn cmd_show(store: &LibraryStore, id: &str) -> Result<DocumentRow> {
    let meta = require_meta(store, id).await?;
    let collections = store.list_collections().await?;
    Ok(DocumentRow::resolve(meta, &collections))
}

/// Write a document's payload to `dest`. A directory destination gets `<name>.pdf`.
pub async fn cmd_export(store: &LibraryStore, id: &str, dest: &Path) -> Result<ExportReport> {
    let doc = store
        .get_document(id)
        .await?
        .ok_or_else(|| Error::DocumentNotFound(id.to_string()))?;

    let path: PathBuf = if dest.is_dir() {
        dest.join(format!("{}.pdf", sanitize_file_name(&doc.meta.name)))
    } else {
        dest.to_path_buf()
    };

    tokio::fs::write(&path, &doc.payload).await?;
    info!(doc_id = %id, path = %path.display(), "Exported document");

    Ok(ExportReport {
        id: doc.meta.id,
        path: path.display().to_string(),
        bytes_written: doc.payload.len(),
    })
}

/// Record reading progress, clamping the position to the known page count
pub async fn cmd_progress(
    store: &LibraryStore,
    id: &str,
    position: u32,
    total_units: Option<u32>,
) -> Result<DocumentMeta> {
    let current = require_meta(store, id).await?;
    let total = total_units.filter(|t| *t > 0).unwrap_or(current.total_units);
    let position = clamp_position(position, total);

    if !store.update_progress(id, position, total_units).await? {
        return Err(Error::DocumentNotFound(id.to_string()));
    }
    require_meta(store, id).await
}

/// Move a document to another collection, checking the collection exists first
pub async fn cmd_move(store: &LibraryStore, id: &str, target: MoveTarget) -> Result<DocumentMeta> {
    let collection_id = match &target {
        MoveTarget::Collection(cid) => {
            if store.get_collection(cid).await?.is_none() {
                return Err(Error::CollectionNotFound(cid.clone()));
            }
            Some(cid.as_str())
        }
        MoveTarget::Uncategorized => None,
    };

    if !store.update_category(id, collection_id).await? {
        return Err(Error::DocumentNotFound(id.to_string()));
    }
    require_meta(store, id).await
}

/// Rename a document
pub async fn cmd_rename(store: &LibraryStore, id: &str, name: &str) -> Result<DocumentMeta> {
    if !store.rename_document(id, name).await? {
        return Err(Error::DocumentNotFound(id.to_string()));
    }
    require_meta(store, id).await
}

/// Remove a document. Returns whether anything was deleted.
pub async fn cmd_remove(store: &LibraryStore, id: &str) -> Result<bool> {
    store.delete_document(id).await
}

async fn require_meta(store: &LibraryStore, id: &str) -> Result<DocumentMeta> {
    store
        .get_document_metadata(id)
        .await?
        .ok_or_else(|| Error::DocumentNotFound(id.to_string()))
}

fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = cleaned.trim().trim_end_matches(".pdf").to_string();
    if trimmed.is_empty() {
        "document".to_string()
    } else {
        trimmed
    }
}

/// Format epoch milliseconds for display
pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn human_bytes(bytes: i64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Print a document listing to console
pub fn print_documents(rows: &[DocumentRow]) {
    println!("\n📄 Documents\n");

    if rows.is_empty() {
        println!("No documents found. Use 'pdfshelf add' to upload PDFs.");
        return;
    }

    for row in rows {
        print_document(row);
        println!();
    }
}

/// Print one document to console
pub fn print_document(row: &DocumentRow) {
    let meta = &row.meta;
    println!(
        "• {} [{}]",
        meta.name,
        row.collection_name.as_deref().unwrap_or("Uncategorized")
    );
    println!("  ID: {}", meta.id);
    if meta.total_units > 0 {
        println!(
            "  Progress: page {} of {} ({}%)",
            meta.current_position, meta.total_units, row.progress_percent
        );
    } else {
        println!("  Progress: page {}", meta.current_position);
    }
    println!(
        "  Size: {}, Added: {}",
        human_bytes(meta.size_bytes),
        format_millis(meta.added_at)
    );
    if let Some(opened) = meta.last_opened_at {
        println!("  Last opened: {}", format_millis(opened));
    }
}
