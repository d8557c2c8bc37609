//! Library records: documents, their metadata projection, and collections.

use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Current time as epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Everything about a document except its payload bytes
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub name: String,
    pub collection_id: Option<String>,
    pub added_at: i64,
    pub last_opened_at: Option<i64>,
    pub current_position: u32,
    pub total_units: u32,
    pub size_bytes: i64,
}

/// A stored file together with its reading and organizational metadata
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Document {
    #[sqlx(flatten)]
    pub meta: DocumentMeta,
    pub payload: Vec<u8>,
}

impl Document {
    /// Build a fresh record for an upload: new id, position 1, total unknown.
    /// Surrounding whitespace is trimmed from the name.
    pub fn new(name: impl Into<String>, collection_id: Option<String>, payload: Vec<u8>) -> Self {
        let name = name.into();
        Self {
            meta: DocumentMeta {
                id: Uuid::new_v4().to_string(),
                name: name.trim().to_string(),
                collection_id,
                added_at: now_millis(),
                last_opened_at: None,
                current_position: 1,
                total_units: 0,
                size_bytes: payload.len() as i64,
            },
            payload,
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    /// Drop the payload, keeping the metadata projection
    pub fn into_meta(self) -> DocumentMeta {
        self.meta
    }
}

/// A user-defined named grouping of documents
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub created_at: i64,
}

impl Collection {
    /// Create a collection record; the name is trimmed and must not be empty.
    pub fn new(name: &str) -> Result<Self> {
        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name: validate_name(name, "collection")?,
            created_at: now_millis(),
        })
    }
}

/// Trim a user-supplied display name, rejecting empty or whitespace-only input
pub fn validate_name(name: &str, what: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(Error::Validation(format!("{} name must not be empty", what)));
    }
    Ok(trimmed.to_string())
}

/// Library-wide counters, computed from metadata only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryStats {
    pub document_count: usize,
    pub collection_count: usize,
    pub uncategorized_count: usize,
    pub total_bytes: u64,
}
