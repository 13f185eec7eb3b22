//! Schema and value types shared by every database provider
//!
//! These types describe what the wrapper knows about a database: its
//! dialect, column types, discovered table schemas, rows and query results.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::database::traits::DatabaseError;

/// One result row keyed by column name, in result-set column order
pub type Row = serde_json::Map<String, Value>;

/// Kind of database behind a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DbType {
    Sqlite,
    Access,
    SqlServer,
}

impl DbType {
    /// Quote an identifier (table or column name) for this dialect
    ///
    /// SQLite uses double quotes; Access and SQL Server use square brackets.
    /// The closing delimiter is escaped by doubling it.
    pub fn quote_identifier(self, identifier: &str) -> String {
        match self {
            DbType::Sqlite => format!("\"{}\"", identifier.replace('"', "\"\"")),
            DbType::Access | DbType::SqlServer => {
                format!("[{}]", identifier.replace(']', "]]"))
            }
        }
    }

    /// Column type name used in `CREATE TABLE` / `ALTER TABLE` for this dialect
    pub fn sql_type(self, column_type: ColumnType) -> &'static str {
        match (self, column_type) {
            (DbType::Sqlite, ColumnType::Integer) => "INTEGER",
            (DbType::Sqlite, ColumnType::Real) => "REAL",
            (DbType::Sqlite, ColumnType::Text) => "TEXT",
            (DbType::Sqlite, ColumnType::Boolean) => "BOOLEAN",
            (DbType::Sqlite, ColumnType::DateTime) => "DATETIME",
            (DbType::Sqlite, ColumnType::Date) => "DATE",
            (DbType::Sqlite, ColumnType::Blob) => "BLOB",

            (DbType::Access, ColumnType::Integer) => "LONG",
            (DbType::Access, ColumnType::Real) => "DOUBLE",
            (DbType::Access, ColumnType::Text) => "VARCHAR(255)",
            (DbType::Access, ColumnType::Boolean) => "BIT",
            (DbType::Access, ColumnType::DateTime) => "DATETIME",
            (DbType::Access, ColumnType::Date) => "DATETIME",
            (DbType::Access, ColumnType::Blob) => "LONGBINARY",

            (DbType::SqlServer, ColumnType::Integer) => "BIGINT",
            (DbType::SqlServer, ColumnType::Real) => "FLOAT",
            (DbType::SqlServer, ColumnType::Text) => "NVARCHAR(255)",
            (DbType::SqlServer, ColumnType::Boolean) => "BIT",
            (DbType::SqlServer, ColumnType::DateTime) => "DATETIME2",
            (DbType::SqlServer, ColumnType::Date) => "DATE",
            (DbType::SqlServer, ColumnType::Blob) => "VARBINARY(MAX)",
        }
    }

    /// Whether the database lives in a single local file
    pub fn is_file_based(self) -> bool {
        matches!(self, DbType::Sqlite | DbType::Access)
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbType::Sqlite => f.write_str("SQLITE"),
            DbType::Access => f.write_str("ACCESS"),
            DbType::SqlServer => f.write_str("SQL SERVER"),
        }
    }
}

/// Portable column type used when creating tables and coercing values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    DateTime,
    Date,
    Blob,
}

impl ColumnType {
    /// Map a declared column type (as reported by the database) to a column type
    ///
    /// Unlike [`FromStr`], this never fails: it follows SQLite-style affinity
    /// rules on substrings of the declaration and falls back to `Text`.
    pub fn from_declared(declared: &str) -> Self {
        let declared = declared.to_ascii_uppercase();
        let has = |needles: &[&str]| needles.iter().any(|needle| declared.contains(needle));

        if has(&["BOOL", "BIT", "YESNO"]) {
            ColumnType::Boolean
        } else if has(&["CHAR", "CLOB", "TEXT", "MEMO"]) {
            ColumnType::Text
        } else if has(&["BLOB", "BINARY", "IMAGE"]) {
            ColumnType::Blob
        } else if has(&["INT", "LONG", "COUNTER", "BYTE"]) {
            ColumnType::Integer
        } else if has(&["REAL", "FLOA", "DOUB", "DEC", "NUMERIC", "CURRENCY", "MONEY"]) {
            ColumnType::Real
        } else if has(&["DATETIME", "TIMESTAMP"]) {
            ColumnType::DateTime
        } else if has(&["DATE"]) {
            ColumnType::Date
        } else {
            ColumnType::Text
        }
    }

    /// Infer a column type from a sample value
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(number) if number.is_i64() || number.is_u64() => ColumnType::Integer,
            Value::Number(_) => ColumnType::Real,
            _ => ColumnType::Text,
        }
    }
}

impl FromStr for ColumnType {
    type Err = DatabaseError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.trim().to_ascii_lowercase().as_str() {
            "int" | "integer" | "long" | "bigint" => Ok(ColumnType::Integer),
            "float" | "real" | "double" => Ok(ColumnType::Real),
            "str" | "string" | "text" | "varchar" => Ok(ColumnType::Text),
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "datetime" | "timestamp" => Ok(ColumnType::DateTime),
            "date" => Ok(ColumnType::Date),
            "bytes" | "blob" | "binary" => Ok(ColumnType::Blob),
            _ => Err(DatabaseError::UnknownColumnType(name.to_string())),
        }
    }
}

/// A bound statement parameter
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Integer(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl Param {
    /// Build a parameter destined for a column of the given type
    ///
    /// Strings bound to BLOB columns are decoded from base64 (the form BLOBs
    /// take in a [`Row`]); anything that does not decode is bound as text.
    pub fn for_column(value: &Value, column_type: ColumnType) -> Self {
        match (value, column_type) {
            (Value::String(text), ColumnType::Blob) => match BASE64.decode(text) {
                Ok(bytes) => Param::Bytes(bytes),
                Err(_) => Param::Text(text.clone()),
            },
            _ => Param::from(value),
        }
    }
}

impl From<&Value> for Param {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Param::Null,
            Value::Bool(flag) => Param::Bool(*flag),
            Value::Number(number) => match number.as_i64() {
                Some(integer) => Param::Integer(integer),
                None => Param::Real(number.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(text) => Param::Text(text.clone()),
            other => Param::Text(other.to_string()),
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        Param::from(&value)
    }
}

/// Complete schema information for a database table
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    /// Name of the table
    pub name: String,

    /// List of columns in the table, in table order
    pub columns: Vec<ColumnInfo>,

    /// Primary key column names (if known)
    pub primary_key: Option<Vec<String>>,

    /// Index definitions
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Column names in table order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|column| column.name.clone()).collect()
    }
}

/// Information about a single column
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnInfo {
    /// Column name
    pub name: String,

    /// Declared SQL data type (e.g., "INTEGER", "TEXT", "VARCHAR(255)")
    pub data_type: String,

    /// Whether the column allows NULL values
    pub nullable: bool,

    /// Default value expression (if any)
    pub default_value: Option<String>,

    /// Whether this column is part of the primary key
    pub is_primary_key: bool,
}

impl ColumnInfo {
    pub fn column_type(&self) -> ColumnType {
        ColumnType::from_declared(&self.data_type)
    }
}

/// Index information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexInfo {
    /// Index name
    pub name: String,

    /// Columns included in the index
    pub columns: Vec<String>,

    /// Whether the index enforces uniqueness
    pub unique: bool,
}

/// Result from executing a statement
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    /// Column names in the result
    pub columns: Vec<String>,

    /// Rows returned (empty for statements that return no rows)
    pub rows: Vec<Row>,

    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    pub affected_rows: u64,

    /// Execution time in milliseconds
    pub execution_time_milliseconds: u64,
}

/// Case applied to column names when copying a table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnCase {
    #[default]
    Same,
    Upper,
    Lower,
}

impl ColumnCase {
    pub fn apply(self, name: &str) -> String {
        match self {
            ColumnCase::Same => name.to_string(),
            ColumnCase::Upper => name.to_uppercase(),
            ColumnCase::Lower => name.to_lowercase(),
        }
    }
}

impl FromStr for ColumnCase {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "same" => Ok(ColumnCase::Same),
            "upper" => Ok(ColumnCase::Upper),
            "lower" => Ok(ColumnCase::Lower),
            other => Err(format!(
                "column case must be \"same\", \"upper\" or \"lower\", got \"{}\"",
                other
            )),
        }
    }
}

/// Callback invoked periodically while SQLite executes a statement
///
/// The callback runs every `every` virtual machine instructions. Returning
/// `false` interrupts the running statement.
#[derive(Clone)]
pub struct ProgressHandler {
    pub(crate) every: i32,
    pub(crate) callback: Arc<dyn Fn() -> bool + Send + Sync>,
}

impl ProgressHandler {
    pub fn new(callback: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        Self {
            every: 100,
            callback: Arc::new(callback),
        }
    }

    /// Set how many SQLite instructions run between callbacks
    pub fn every(mut self, instructions: i32) -> Self {
        self.every = instructions.max(1);
        self
    }
}

impl fmt::Debug for ProgressHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressHandler")
            .field("every", &self.every)
            .finish_non_exhaustive()
    }
}

/// Options for [`Database::pull_with`](crate::Database::pull_with)
#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// Only pull these columns (all columns when `None`)
    pub columns: Option<Vec<String>>,

    /// Drop cached results for the table before pulling
    pub fresh: bool,

    /// SQLite progress callback
    pub progress: Option<ProgressHandler>,
}

impl PullOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn fresh(mut self) -> Self {
        self.fresh = true;
        self
    }

    pub fn progress(mut self, handler: ProgressHandler) -> Self {
        self.progress = Some(handler);
        self
    }
}

/// Options for [`Database::append`](crate::Database::append)
#[derive(Debug, Clone, Copy)]
pub struct AppendOptions {
    /// Create the table from the data's inferred types when it does not exist
    pub create_table_if_needed: bool,

    /// Rewrite row keys with [`clean_column_name`](crate::util::clean_column_name)
    pub clean_column_names: bool,

    /// Fill missing columns with NULL and coerce values to column types
    pub robust: bool,
}

impl Default for AppendOptions {
    fn default() -> Self {
        Self {
            create_table_if_needed: true,
            clean_column_names: false,
            robust: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(DbType::Sqlite.quote_identifier("users"), "\"users\"");
        assert_eq!(
            DbType::Sqlite.quote_identifier("table\"name"),
            "\"table\"\"name\""
        );
        assert_eq!(DbType::Access.quote_identifier("my table"), "[my table]");
        assert_eq!(DbType::SqlServer.quote_identifier("a]b"), "[a]]b]");
    }

    #[test]
    fn test_column_type_from_str() {
        assert_eq!("int".parse::<ColumnType>().unwrap(), ColumnType::Integer);
        assert_eq!(" Float ".parse::<ColumnType>().unwrap(), ColumnType::Real);
        assert_eq!("str".parse::<ColumnType>().unwrap(), ColumnType::Text);
        assert_eq!("BOOL".parse::<ColumnType>().unwrap(), ColumnType::Boolean);
        assert_eq!("datetime".parse::<ColumnType>().unwrap(), ColumnType::DateTime);
        assert!(matches!(
            "bad_type".parse::<ColumnType>(),
            Err(DatabaseError::UnknownColumnType(_))
        ));
    }

    #[test]
    fn test_column_type_from_declared() {
        assert_eq!(ColumnType::from_declared("INTEGER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("varchar(255)"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("LONGCHAR"), ColumnType::Text);
        assert_eq!(ColumnType::from_declared("LONGBINARY"), ColumnType::Blob);
        assert_eq!(ColumnType::from_declared("COUNTER"), ColumnType::Integer);
        assert_eq!(ColumnType::from_declared("double"), ColumnType::Real);
        assert_eq!(ColumnType::from_declared("BOOLEAN"), ColumnType::Boolean);
        assert_eq!(ColumnType::from_declared("DATETIME"), ColumnType::DateTime);
        assert_eq!(ColumnType::from_declared("date"), ColumnType::Date);
        assert_eq!(ColumnType::from_declared(""), ColumnType::Text);
    }

    #[test]
    fn test_column_type_infer() {
        assert_eq!(ColumnType::infer(&json!(1)), ColumnType::Integer);
        assert_eq!(ColumnType::infer(&json!(1.5)), ColumnType::Real);
        assert_eq!(ColumnType::infer(&json!(true)), ColumnType::Boolean);
        assert_eq!(ColumnType::infer(&json!("x")), ColumnType::Text);
        assert_eq!(ColumnType::infer(&Value::Null), ColumnType::Text);
    }

    #[test]
    fn test_sql_type_per_dialect() {
        assert_eq!(DbType::Sqlite.sql_type(ColumnType::Text), "TEXT");
        assert_eq!(DbType::Access.sql_type(ColumnType::Text), "VARCHAR(255)");
        assert_eq!(DbType::SqlServer.sql_type(ColumnType::Blob), "VARBINARY(MAX)");
    }

    #[test]
    fn test_param_for_blob_column_decodes_base64() {
        let encoded = json!(BASE64.encode([1u8, 2, 3]));
        assert_eq!(
            Param::for_column(&encoded, ColumnType::Blob),
            Param::Bytes(vec![1, 2, 3])
        );
        assert_eq!(
            Param::for_column(&encoded, ColumnType::Text),
            Param::Text("AQID".to_string())
        );
        assert_eq!(Param::from(&json!(7)), Param::Integer(7));
        assert_eq!(Param::from(&json!([1, 2])), Param::Text("[1,2]".to_string()));
    }

    #[test]
    fn test_column_case() {
        assert_eq!("upper".parse::<ColumnCase>().unwrap(), ColumnCase::Upper);
        assert!("sideways".parse::<ColumnCase>().is_err());
        assert_eq!(ColumnCase::Lower.apply("Row_ID"), "row_id");
        assert_eq!(ColumnCase::Same.apply("Row_ID"), "Row_ID");
    }
}
