//! Collection management commands

use crate::error::{Error, Result};
use crate::models::Collection;
use crate::store::{CollectionRemoval, LibraryStore};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Collection information with its document count
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionInfo {
    #[serde(flatten)]
    pub collection: Collection,
    pub document_count: usize,
}

/// Create a new collection
pub async fn cmd_create_collection(store: &LibraryStore, name: &str) -> Result<Collection> {
    let collection = Collection::new(name)?;
    store.create_collection(&collection).await?;
    info!(collection_id = %collection.id, "Created collection '{}'", collection.name);
    Ok(collection)
}

/// List all collections with their document counts
pub async fn cmd_list_collections(store: &LibraryStore) -> Result<Vec<CollectionInfo>> {
    let collections = store.list_collections().await?;
    let counts = store.collection_document_counts().await?;

    Ok(collections
        .into_iter()
        .map(|collection| CollectionInfo {
            document_count: counts.get(&collection.id).copied().unwrap_or(0),
            collection,
        })
        .collect())
}

/// Remove a collection; its documents become uncategorized
pub async fn cmd_remove_collection(store: &LibraryStore, id: &str) -> Result<CollectionRemoval> {
    let removal = store.delete_collection(id).await?;
    if !removal.removed && removal.documents_uncategorized == 0 {
        return Err(Error::CollectionNotFound(id.to_string()));
    }
    Ok(removal)
}

/// Print collections list to console
pub fn print_collections(collections: &[CollectionInfo]) {
    println!("\n🗂  Collections\n");

    if collections.is_empty() {
        println!("No collections yet. Use 'pdfshelf collections create <name>' to add one.");
        return;
    }

    for info in collections {
        println!("• {}", info.collection.name);
        println!("  ID: {}", info.collection.id);
        println!("  Documents: {}", info.document_count);
        println!();
    }
}
