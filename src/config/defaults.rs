//! Default values for configuration

/// Default pool size; SQLite serializes writers anyway, readers benefit from a few
pub fn default_max_connections() -> u32 {
    5
}

/// How long a writer waits on a locked database before failing
pub fn default_busy_timeout_ms() -> u64 {
    5_000
}

/// Largest single payload accepted on upload (256 MiB)
pub fn default_max_payload_bytes() -> u64 {
    256 * 1024 * 1024
}

/// Null out dangling collection references when the store opens
pub fn default_repair_on_open() -> bool {
    true
}

/// Default listing order
pub fn default_sort() -> String {
    "added".to_string()
}

/// Default number of entries shown by `recent`
pub fn default_recent_limit() -> usize {
    10
}

/// Environment variable that overrides the database location
pub const DB_PATH_ENV: &str = "PDFSHELF_DB_PATH";
