//! # easy-db
//!
//! One handle for file-based relational databases: SQLite files (and
//! `:memory:`), Microsoft Access `.accdb`/`.mdb` files and ODBC `DSN=`
//! connection strings.
//!
//! ## Features
//!
//! - Automatic database type detection from the location
//! - Tables pulled as rows keyed by column name, with a per-table cache
//! - Append, update, column and index management, duplicate removal
//! - Table copies between databases of any supported kind
//! - Scoped transactions through [`Session`]
//! - Optional Axum router for browsing a database (`http` feature)
//! - Access and ODBC support through `odbc-api` (`access` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use easy_db::{AppendOptions, Database};
//! use serde_json::json;
//!
//! # async fn example() -> easy_db::Result<()> {
//! let database = Database::open("inventory.db").await?;
//!
//! let row = json!({"sku": "A-100", "count": 4});
//! let row = row.as_object().cloned().unwrap_or_default();
//! database.append_row("STOCK", row, AppendOptions::default()).await?;
//!
//! for row in database.pull("STOCK").await? {
//!     println!("{}", serde_json::Value::Object(row));
//! }
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod config;
pub mod database;
pub mod schema;
pub mod util;

#[cfg(feature = "http")]
pub mod api;
#[cfg(feature = "http")]
pub mod layer;

// Public exports
pub use config::OpenOptions;
pub use database::{Database, DatabaseError, DatabaseProvider, ProviderTransaction, Session};
pub use schema::{
    AppendOptions, ColumnCase, ColumnInfo, ColumnType, DbType, IndexInfo, Param, ProgressHandler,
    PullOptions, QueryResult, Row, TableSchema,
};

pub use database::sqlite::SqliteProvider;

#[cfg(feature = "access")]
pub use database::odbc::OdbcProvider;

#[cfg(feature = "http")]
pub use layer::EasyDbLayer;

pub type Result<T> = std::result::Result<T, DatabaseError>;
