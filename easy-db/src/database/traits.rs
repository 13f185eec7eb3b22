//! Database provider trait
//!
//! This trait defines the interface that every driver-backed implementation
//! must provide. The [`Database`](crate::Database) handle builds its
//! operations on top of it.

use crate::schema::{DbType, Param, ProgressHandler, QueryResult, TableSchema};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Database provider trait for schema discovery, queries and writes
#[async_trait]
pub trait DatabaseProvider: Send + Sync + 'static {
    /// Dialect spoken by this provider
    fn db_type(&self) -> DbType;

    /// List all user table names in the database, sorted
    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError>;

    /// List saved select queries (Access) in the database, sorted
    async fn list_queries(&self) -> Result<Vec<String>, DatabaseError> {
        Ok(Vec::new())
    }

    /// Get schema information for a specific table
    ///
    /// # Returns
    ///
    /// Column information in table order, plus keys and indexes where the
    /// driver reports them
    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, DatabaseError>;

    /// Execute one statement with bound parameters
    ///
    /// # Arguments
    ///
    /// * `sql` - SQL statement to execute
    /// * `params` - Positional parameters for `?` placeholders
    /// * `progress` - Optional progress callback (SQLite only)
    async fn query(
        &self,
        sql: &str,
        params: &[Param],
        progress: Option<ProgressHandler>,
    ) -> Result<QueryResult, DatabaseError>;

    /// Execute one statement once per parameter row inside a single transaction
    ///
    /// # Returns
    ///
    /// Total number of affected rows
    async fn execute_batch(&self, sql: &str, rows: &[Vec<Param>]) -> Result<u64, DatabaseError>;

    /// Defragment and shrink the database file
    async fn compact(&self) -> Result<(), DatabaseError>;

    /// Start a transaction on a dedicated connection
    async fn begin(&self) -> Result<Box<dyn ProviderTransaction>, DatabaseError>;

    /// Release driver resources
    async fn close(&self);
}

/// A transaction opened by [`DatabaseProvider::begin`]
///
/// Dropping a transaction without committing it rolls it back.
#[async_trait]
pub trait ProviderTransaction: Send {
    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DatabaseError>;

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError>;

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError>;
}

/// Database error type
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Error reported by the SQLite driver
    #[error("Database error: {0}")]
    Query(String),

    /// Error reported by the ODBC driver manager or driver
    #[error("ODBC error: {0}")]
    Odbc(String),

    /// Table (or Access query) not found
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// Table already exists and overwriting was not requested
    #[error("Table already exists: {0}")]
    TableExists(String),

    /// Column does not exist in the table
    #[error("Invalid column: {column} is not in {table}")]
    InvalidColumn { table: String, column: String },

    /// Column already exists in the table
    #[error("Column {column} already exists in {table}")]
    ColumnExists { table: String, column: String },

    /// Identifier rejected before being placed in SQL
    #[error("Invalid name: {0:?}")]
    InvalidName(String),

    /// Column type name with no mapping
    #[error("Unknown column type: {0}")]
    UnknownColumnType(String),

    /// Table definition without columns
    #[error("No columns given for table {0}")]
    NoColumns(String),

    /// Rows to append lack some of the table's columns
    #[error("Rows for {table} are missing columns: {}", .missing.join(", "))]
    ColumnMismatch { table: String, missing: Vec<String> },

    /// Update values do not line up with match values
    #[error("Expected 1 or {matches} update values, got {updates}")]
    LengthMismatch { matches: usize, updates: usize },

    /// Location is neither a known database file nor a connection string
    #[error("Database not recognized: {0}")]
    NotRecognized(String),

    /// Database file is missing
    #[error("Database file not found: {}{}", .path.display(), hint_suffix(.hint))]
    FileNotFound { path: PathBuf, hint: Option<String> },

    /// Operation not available for this kind of database
    #[error("{operation} is not supported for {db_type} databases")]
    Unsupported {
        operation: &'static str,
        db_type: DbType,
    },

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for DatabaseError {
    fn from(error: sqlx::Error) -> Self {
        DatabaseError::Query(error.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(error: serde_json::Error) -> Self {
        DatabaseError::Serialization(error.to_string())
    }
}

impl From<tokio::task::JoinError> for DatabaseError {
    fn from(error: tokio::task::JoinError) -> Self {
        DatabaseError::Query(format!("database task failed: {}", error))
    }
}

fn hint_suffix(hint: &Option<String>) -> String {
    match hint {
        Some(hint) => format!(" ({})", hint),
        None => String::new(),
    }
}
