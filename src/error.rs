//! Custom error types for pdfshelf

use std::fmt;
use thiserror::Error;

/// What a store call was trying to do when it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Initialize,
    Create,
    Read,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Initialize => write!(f, "initialize"),
            Operation::Create => write!(f, "create"),
            Operation::Read => write!(f, "read"),
            Operation::Update => write!(f, "update"),
            Operation::Delete => write!(f, "delete"),
        }
    }
}

/// Main error type for pdfshelf operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to {op} {target}: {source}")]
    Storage {
        op: Operation,
        target: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Storage quota exceeded while trying to {op} {target}: {detail}")]
    QuotaExceeded {
        op: Operation,
        target: String,
        detail: String,
    },

    #[error("Storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: String, reason: String },

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unsupported file: {0}")]
    UnsupportedFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Not initialized: run 'pdfshelf init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// SQLite primary result codes that mean "the device or engine ran out of room"
const SQLITE_FULL: &str = "13";
const SQLITE_TOOBIG: &str = "18";

impl Error {
    /// Wrap an engine error, keeping the failed operation and its target.
    ///
    /// Disk-full and blob-too-big failures are reported as
    /// [`Error::QuotaExceeded`] so callers can fail one upload without
    /// treating the whole store as broken.
    pub fn storage(op: Operation, target: impl Into<String>, source: sqlx::Error) -> Self {
        let target = target.into();
        if let sqlx::Error::Database(db_err) = &source {
            // Extended codes carry the primary code in their low byte.
            let primary = db_err
                .code()
                .and_then(|c| c.parse::<i32>().ok())
                .map(|c| (c & 0xff).to_string());
            if matches!(primary.as_deref(), Some(SQLITE_FULL) | Some(SQLITE_TOOBIG)) {
                return Error::QuotaExceeded {
                    op,
                    target,
                    detail: db_err.message().to_string(),
                };
            }
        }
        Error::Storage { op, target, source }
    }

    /// Closure form of [`Error::storage`] for use with `map_err`.
    pub fn storage_fn(op: Operation, target: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
        move |source| Error::storage(op, target, source)
    }

    /// True when the error is a per-item failure the caller may skip past
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Error::QuotaExceeded { .. }
                | Error::Validation(_)
                | Error::UnsupportedFile(_)
                | Error::Io(_)
                | Error::Storage {
                    op: Operation::Create,
                    ..
                }
        )
    }
}

/// Result type alias for pdfshelf
pub type Result<T> = std::result::Result<T, Error>;
