//! Status and repair commands

use crate::config::Config;
use crate::error::Result;
use crate::models::LibraryStats;
use crate::store::{LibraryStore, MigrationRecord, CURRENT_VERSION};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub schema_version: i64,
    pub supported_version: i64,
    pub migrations: Vec<MigrationRecord>,
    pub stats: LibraryStats,
}

/// Repair outcome
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairStats {
    pub documents_repaired: u64,
}

/// Get library status
pub async fn cmd_status(config: &Config, store: &LibraryStore) -> Result<StatusInfo> {
    info!("Getting status");

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: store.options().db_path.display().to_string(),
        schema_version: store.schema_version().await?,
        supported_version: CURRENT_VERSION,
        migrations: store.migration_history().await?,
        stats: store.library_stats().await?,
    })
}

/// Clear collection references that point at deleted collections
pub async fn cmd_repair(store: &LibraryStore) -> Result<RepairStats> {
    let documents_repaired = store.reconcile_dangling_references().await?;
    info!(documents_repaired, "Repair finished");
    Ok(RepairStats { documents_repaired })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 pdfshelf Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!(
        "Schema: v{} (this build supports v{})",
        status.schema_version, status.supported_version
    );
    println!("\nLibrary:");
    println!("  Documents: {}", status.stats.document_count);
    println!("  Uncategorized: {}", status.stats.uncategorized_count);
    println!("  Collections: {}", status.stats.collection_count);
    println!("  Stored bytes: {}", status.stats.total_bytes);
}
