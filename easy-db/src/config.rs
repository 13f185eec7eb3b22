//! Options controlling how a database is opened

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Options for [`Database::open_with`](crate::Database::open_with)
///
/// Every field has a default, so partial configurations deserialize:
///
/// ```rust
/// let options: easy_db::OpenOptions =
///     serde_json::from_str(r#"{ "createIfMissing": false }"#).unwrap();
/// assert!(!options.create_if_missing);
/// assert_eq!(options.batch_size, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    /// Create a SQLite file when the location has a SQLite extension but no file exists
    pub create_if_missing: bool,

    /// Treat a location naming an environment variable as that variable's value
    pub resolve_environment: bool,

    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_milliseconds: u64,

    /// Connection pool size for SQLite files
    pub max_connections: u32,

    /// ODBC connection attempts before giving up
    pub connect_attempts: u32,

    /// Pause between ODBC connection attempts
    pub connect_retry_delay_milliseconds: u64,

    /// Rows per insert batch, and values per `IN (...)` chunk
    pub batch_size: usize,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            resolve_environment: true,
            busy_timeout_milliseconds: 10_000,
            max_connections: 4,
            connect_attempts: 6,
            connect_retry_delay_milliseconds: 700,
            batch_size: 100,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_if_missing(mut self, create: bool) -> Self {
        self.create_if_missing = create;
        self
    }

    pub fn resolve_environment(mut self, resolve: bool) -> Self {
        self.resolve_environment = resolve;
        self
    }

    pub fn batch_size(mut self, rows: usize) -> Self {
        self.batch_size = rows;
        self
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_milliseconds)
    }

    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_milliseconds)
    }

    /// Batch size, never zero
    pub(crate) fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
