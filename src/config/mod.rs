//! Configuration management for pdfshelf
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::query::SortOrder;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Storage engine configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Library presentation defaults
    #[serde(default)]
    pub library: LibraryConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Maximum pooled SQLite connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Busy timeout for locked databases, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Largest payload accepted by a single upload, in bytes
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: u64,

    /// Run the dangling-reference repair pass when the store opens
    #[serde(default = "default_repair_on_open")]
    pub repair_on_open: bool,
}

/// Library listing defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Default sort order for `list` (added, oldest, recent, name, progress)
    #[serde(default = "default_sort")]
    pub default_sort: String,

    /// Number of documents shown by `recent`
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for pdfshelf data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to the SQLite library database
    pub db_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            library: LibraryConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
            max_payload_bytes: default_max_payload_bytes(),
            repair_on_open: default_repair_on_open(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_sort: default_sort(),
            recent_limit: default_recent_limit(),
        }
    }
}

impl Config {
    /// Get the default base directory for pdfshelf (~/.pdfshelf)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pdfshelf")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    fn paths_for(base: PathBuf, config_file: PathBuf) -> PathsConfig {
        let db_file = std::env::var(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| base.join("library.db"));
        PathsConfig {
            config_file,
            db_file,
            base_dir: base,
        }
    }

    /// Resolve a `--config` argument to a config file path.
    ///
    /// A `.toml` path names the file itself; any other path is a base
    /// directory holding `config.toml`. `None` means the default location.
    pub fn resolve_config_path(arg: Option<&Path>) -> PathBuf {
        match arg {
            Some(path) if path.extension().is_some_and(|e| e == "toml") => path.to_path_buf(),
            Some(dir) => dir.join("config.toml"),
            None => Self::default_config_path(),
        }
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.init_paths_for_file(base.join("config.toml"));
    }

    /// Initialize paths for a config file at `config_file`; its directory is the base
    pub fn init_paths_for_file(&mut self, config_file: PathBuf) {
        let base = Self::base_of(&config_file);
        self.paths = Self::paths_for(base, config_file);
    }

    fn base_of(config_file: &Path) -> PathBuf {
        config_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        config.init_paths_for_file(config_path.to_path_buf());

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Check if pdfshelf is initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists()
    }

    /// Parsed default sort order
    pub fn default_sort(&self) -> Result<SortOrder> {
        self.library.default_sort.parse()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.storage.max_connections == 0 {
            return Err(Error::Config(
                "storage.max_connections must be at least 1".to_string(),
            ));
        }

        if self.storage.max_payload_bytes == 0 {
            return Err(Error::Config(
                "storage.max_payload_bytes must be positive".to_string(),
            ));
        }

        if self.library.recent_limit == 0 {
            return Err(Error::Config(
                "library.recent_limit must be at least 1".to_string(),
            ));
        }

        self.default_sort()
            .map_err(|e| Error::Config(format!("library.default_sort: {}", e)))?;

        Ok(())
    }
}
