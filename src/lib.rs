//! pdfshelf: a local PDF library.
//!
//! [`store::LibraryStore`] is the only reader and writer of durable state.
//! Everything else (the CLI commands, query helpers) consumes it.

pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod progress;
pub mod query;
pub mod store;

pub use error::{Error, Result};
pub use models::{Collection, Document, DocumentMeta, LibraryStats};
pub use store::{LibraryStore, StoreOptions};
