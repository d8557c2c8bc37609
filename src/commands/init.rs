//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::LibraryStore;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// Where init put things
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitReport {
    pub config_path: String,
    pub db_path: String,
    pub schema_version: i64,
}

/// Write a default config to `config_file` (or the default location) and
/// create the library database next to it
pub async fn cmd_init(config_file: Option<PathBuf>, force: bool) -> Result<InitReport> {
    let mut config = Config::default();
    config.init_paths_for_file(config_file.unwrap_or_else(Config::default_config_path));

    if config.is_initialized() && !force {
        return Err(Error::AlreadyInitialized(
            config.paths.config_file.display().to_string(),
        ));
    }

    config.save()?;

    let store = LibraryStore::connect(&config).await?;
    let schema_version = store.schema_version().await?;
    store.close().await;

    info!(path = %config.paths.db_file.display(), "Library initialized");

    Ok(InitReport {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        schema_version,
    })
}
