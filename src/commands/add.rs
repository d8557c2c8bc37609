//! Add command - upload PDF files into the library

use crate::error::{Error, Result};
use crate::models::{Document, DocumentMeta};
use crate::progress::upload_bar;
use crate::store::LibraryStore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Every PDF starts with this header
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Add options
#[derive(Debug, Clone, Default)]
pub struct AddOptions {
    /// Collection to file the new documents under
    pub collection_id: Option<String>,
    /// Display name; only valid when adding a single file
    pub name: Option<String>,
    /// Draw a progress bar
    pub show_progress: bool,
}

/// A file that could not be added
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddFailure {
    pub path: String,
    pub error: String,
}

/// Outcome of an add batch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddReport {
    pub added: Vec<DocumentMeta>,
    pub failed: Vec<AddFailure>,
}

/// Add PDF files (and PDFs found under directories) to the library.
///
/// Each file is stored independently: a bad or oversized file is recorded in
/// [`AddReport::failed`] and the rest of the batch continues. Errors that mean
/// the store itself is unusable abort the batch.
pub async fn cmd_add(
    store: &LibraryStore,
    paths: &[PathBuf],
    options: AddOptions,
) -> Result<AddReport> {
    if let Some(id) = &options.collection_id {
        if store.get_collection(id).await?.is_none() {
            return Err(Error::CollectionNotFound(id.clone()));
        }
    }

    let files = collect_pdf_files(paths)?;
    if options.name.is_some() && files.len() > 1 {
        return Err(Error::Validation(
            "--name can only be used when adding a single file".to_string(),
        ));
    }

    info!(files = files.len(), "Adding documents");
    let bar = options.show_progress.then(|| upload_bar(files.len() as u64));
    let mut report = AddReport::default();

    for path in &files {
        if let Some(bar) = &bar {
            bar.set_message(path.display().to_string());
        }

        let result = add_one(store, path, &options).await;
        match result {
            Ok(meta) => {
                debug!(doc_id = %meta.id, path = %path.display(), "Added document");
                report.added.push(meta);
            }
            Err(e) if e.is_item_failure() => {
                warn!(path = %path.display(), error = %e, "Skipping file");
                report.failed.push(AddFailure {
                    path: path.display().to_string(),
                    error: e.to_string(),
                });
            }
            Err(e) => {
                if let Some(bar) = &bar {
                    bar.abandon();
                }
                return Err(e);
            }
        }

        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }

    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    Ok(report)
}

async fn add_one(store: &LibraryStore, path: &Path, options: &AddOptions) -> Result<DocumentMeta> {
    let limit = store.options().max_payload_bytes;
    let size = tokio::fs::metadata(path).await?.len();
    if size > limit {
        return Err(Error::QuotaExceeded {
            op: crate::error::Operation::Create,
            target: path.display().to_string(),
            detail: format!("file is {} bytes, limit is {}", size, limit),
        });
    }

    let payload = tokio::fs::read(path).await?;
    if !payload.starts_with(PDF_MAGIC) {
        return Err(Error::UnsupportedFile(format!(
            "{} is not a PDF (missing %PDF- header)",
            path.display()
        )));
    }

    let name = match &options.name {
        Some(name) => name.clone(),
        None => display_name(path),
    };
    let doc = Document::new(name, options.collection_id.clone(), payload);
    store.create_document(&doc).await?;
    Ok(doc.into_meta())
}

/// Name shown in the library for a file: its stem, or the full file name
pub fn display_name(path: &Path) -> String {
    path.file_stem()
        .or_else(|| path.file_name())
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Whether a path looks like a PDF by its extension
pub fn is_pdf_path(path: &Path) -> bool {
    mime_guess::from_path(path)
        .iter()
        .any(|m| m.essence_str() == "application/pdf")
}

/// Expand directories to the PDFs beneath them. Explicit file arguments are
/// kept whatever their extension so the header check can report them.
pub fn collect_pdf_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found: Vec<PathBuf> = WalkDir::new(path)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && is_pdf_path(entry.path()))
                .map(|entry| entry.into_path())
                .collect();
            found.sort();
            files.extend(found);
        } else if path.exists() {
            files.push(path.clone());
        } else {
            return Err(Error::InvalidPath(path.display().to_string()));
        }
    }
    Ok(files)
}

/// Print an add report to console
pub fn print_add_report(report: &AddReport) {
    for meta in &report.added {
        println!("✓ Added '{}' ({} bytes)", meta.name, meta.size_bytes);
        println!("  ID: {}", meta.id);
    }
    for failure in &report.failed {
        println!("✗ {}: {}", failure.path, failure.error);
    }
    println!(
        "\n{} added, {} failed",
        report.added.len(),
        report.failed.len()
    );
}
