//! ODBC database provider implementation (Access files and DSN connections)
//!
//! `odbc-api` is blocking, so every operation runs on tokio's blocking pool
//! with its own connection.

use crate::config::OpenOptions;
use crate::database::traits::{DatabaseError, DatabaseProvider, ProviderTransaction};
use crate::schema::{ColumnInfo, DbType, Param, ProgressHandler, QueryResult, Row, TableSchema};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use odbc_api::parameter::{InputParameter, VarBinaryBox, VarCharBox};
use odbc_api::{Connection, ConnectionOptions, Cursor, DataType, Environment, ResultSetMetadata};
use serde_json::Value;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::{Duration, Instant};

static ENVIRONMENT: OnceLock<Environment> = OnceLock::new();

fn environment() -> Result<&'static Environment, DatabaseError> {
    if let Some(environment) = ENVIRONMENT.get() {
        return Ok(environment);
    }
    let environment = Environment::new().map_err(odbc_error)?;
    Ok(ENVIRONMENT.get_or_init(|| environment))
}

fn odbc_error(error: odbc_api::Error) -> DatabaseError {
    DatabaseError::Odbc(error.to_string())
}

/// How a result column's cells are turned back into JSON
#[derive(Debug, Clone, Copy, PartialEq)]
enum ValueKind {
    Integer,
    Real,
    Boolean,
    Text,
    Binary,
}

impl From<DataType> for ValueKind {
    fn from(data_type: DataType) -> Self {
        match data_type {
            DataType::TinyInt | DataType::SmallInt | DataType::Integer | DataType::BigInt => {
                ValueKind::Integer
            }
            DataType::Decimal { scale: 0, .. } | DataType::Numeric { scale: 0, .. } => {
                ValueKind::Integer
            }
            DataType::Float { .. }
            | DataType::Real
            | DataType::Double
            | DataType::Decimal { .. }
            | DataType::Numeric { .. } => ValueKind::Real,
            DataType::Bit => ValueKind::Boolean,
            DataType::Binary { .. } | DataType::Varbinary { .. } | DataType::LongVarbinary { .. } => {
                ValueKind::Binary
            }
            _ => ValueKind::Text,
        }
    }
}

impl ValueKind {
    /// Convert a fetched cell; binary cells become base64 text
    fn cell_to_json(self, cell: Option<Vec<u8>>) -> Value {
        match (self, cell) {
            (_, None) => Value::Null,
            (ValueKind::Binary, Some(bytes)) => Value::String(BASE64.encode(bytes)),
            (kind, Some(bytes)) => kind.to_json(Some(String::from_utf8_lossy(&bytes).into_owned())),
        }
    }

    fn to_json(self, text: Option<String>) -> Value {
        let Some(text) = text else {
            return Value::Null;
        };
        match self {
            ValueKind::Integer => text
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .unwrap_or(Value::String(text)),
            ValueKind::Real => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .unwrap_or(Value::String(text)),
            ValueKind::Boolean => {
                let flag = match text.trim() {
                    "1" => Some(true),
                    "0" => Some(false),
                    _ => None,
                };
                flag.map(Value::Bool).unwrap_or(Value::String(text))
            }
            ValueKind::Text | ValueKind::Binary => Value::String(text),
        }
    }
}

/// Bind parameters as text, which the driver converts to the column
/// types, and bytes as binary
fn bind_params(params: &[Param]) -> Vec<Box<dyn InputParameter>> {
    params
        .iter()
        .map(|param| -> Box<dyn InputParameter> {
            match param {
                Param::Null => Box::new(VarCharBox::null()),
                Param::Bool(flag) => {
                    Box::new(VarCharBox::from_string(if *flag { "1" } else { "0" }.to_string()))
                }
                Param::Integer(integer) => Box::new(VarCharBox::from_string(integer.to_string())),
                Param::Real(real) => Box::new(VarCharBox::from_string(real.to_string())),
                Param::Text(text) => Box::new(VarCharBox::from_string(text.clone())),
                Param::Bytes(bytes) => Box::new(VarBinaryBox::from_vec(bytes.clone())),
            }
        })
        .collect()
}

/// Column names, raw cells and column kinds of a fetched result set
type CellResult = (Vec<String>, Vec<Vec<Option<Vec<u8>>>>, Vec<ValueKind>);

/// Read a whole cursor row by row
///
/// Cells are fetched unbuffered, so long text and binary values arrive
/// complete whatever their length.
fn read_cells(mut cursor: impl Cursor) -> Result<CellResult, DatabaseError> {
    let column_count = cursor.num_result_cols().map_err(odbc_error)?.max(0) as u16;
    let mut columns = Vec::with_capacity(column_count as usize);
    let mut kinds = Vec::with_capacity(column_count as usize);
    for column_number in 1..=column_count {
        columns.push(cursor.col_name(column_number).map_err(odbc_error)?);
        kinds.push(ValueKind::from(
            cursor.col_data_type(column_number).map_err(odbc_error)?,
        ));
    }

    let mut rows = Vec::new();
    let mut buffer = Vec::new();
    while let Some(mut row) = cursor.next_row().map_err(odbc_error)? {
        let mut cells = Vec::with_capacity(kinds.len());
        for (column_number, kind) in (1..=column_count).zip(kinds.iter()) {
            let present = match kind {
                ValueKind::Binary => row.get_binary(column_number, &mut buffer),
                _ => row.get_text(column_number, &mut buffer),
            }
            .map_err(odbc_error)?;
            cells.push(present.then(|| buffer.clone()));
        }
        rows.push(cells);
    }
    Ok((columns, rows, kinds))
}

/// Read a catalog cursor as rows of optional text cells
fn read_text(cursor: impl Cursor) -> Result<Vec<Vec<Option<String>>>, DatabaseError> {
    let (_, rows, _) = read_cells(cursor)?;
    Ok(rows
        .into_iter()
        .map(|cells| {
            cells
                .into_iter()
                .map(|cell| cell.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
                .collect()
        })
        .collect())
}

/// Primary key column names from `SQLPrimaryKeys` rows, in key order
///
/// The rows carry COLUMN_NAME at index 3 and KEY_SEQ at index 4.
fn ordered_key_columns(rows: Vec<Vec<Option<String>>>) -> Vec<String> {
    let mut keyed: Vec<(i64, String)> = rows
        .into_iter()
        .filter_map(|row| {
            let name = row.get(3).cloned().flatten()?;
            let sequence = row
                .get(4)
                .cloned()
                .flatten()
                .and_then(|sequence| sequence.trim().parse().ok())
                .unwrap_or(i64::MAX);
            Some((sequence, name))
        })
        .collect();
    keyed.sort_by_key(|(sequence, _)| *sequence);
    keyed.into_iter().map(|(_, name)| name).collect()
}

/// Primary key of a table, or nothing when the driver cannot report keys
fn primary_key_columns(connection: &Connection<'_>, table: &str) -> Vec<String> {
    let rows = connection
        .preallocate()
        .and_then(|mut statement| {
            let cursor = statement.primary_keys(None, None, table)?;
            Ok(read_text(cursor))
        })
        .map_err(odbc_error)
        .and_then(|rows| rows);
    match rows {
        Ok(rows) => ordered_key_columns(rows),
        Err(error) => {
            tracing::debug!(table, "driver did not report primary keys: {}", error);
            Vec::new()
        }
    }
}

/// Read a result cursor as a [`QueryResult`] of typed rows
fn read_result(cursor: impl Cursor) -> Result<QueryResult, DatabaseError> {
    let (columns, cell_rows, kinds) = read_cells(cursor)?;
    let rows = cell_rows
        .into_iter()
        .map(|cells| {
            columns
                .iter()
                .zip(kinds.iter())
                .zip(cells)
                .map(|((name, kind), cell)| (name.clone(), kind.cell_to_json(cell)))
                .collect::<Row>()
        })
        .collect();
    Ok(QueryResult {
        columns,
        rows,
        ..QueryResult::default()
    })
}

/// Run one statement on an open connection
fn run_statement(
    connection: &Connection<'_>,
    sql: &str,
    params: &[Param],
) -> Result<QueryResult, DatabaseError> {
    let start_time = Instant::now();
    let params = bind_params(params);
    let mut statement = connection.preallocate().map_err(odbc_error)?;

    let fetched = match statement.execute(sql, params.as_slice()).map_err(odbc_error)? {
        Some(cursor) => Some(read_result(cursor)?),
        None => None,
    };
    let mut result = match fetched {
        Some(result) => result,
        None => QueryResult {
            affected_rows: statement.row_count().map_err(odbc_error)?.unwrap_or(0) as u64,
            ..QueryResult::default()
        },
    };
    result.execution_time_milliseconds = start_time.elapsed().as_millis() as u64;
    Ok(result)
}

/// ODBC database provider
pub struct OdbcProvider {
    db_type: DbType,
    connection_string: String,
    connect_attempts: u32,
    connect_retry_delay: Duration,
}

impl OdbcProvider {
    /// Create a provider and verify that a connection can be made
    ///
    /// # Arguments
    ///
    /// * `db_type` - `Access` or `SqlServer`
    /// * `connection_string` - Full ODBC connection string
    pub async fn connect(
        db_type: DbType,
        connection_string: String,
        options: &OpenOptions,
    ) -> Result<Self, DatabaseError> {
        let provider = Self {
            db_type,
            connection_string,
            connect_attempts: options.connect_attempts.max(1),
            connect_retry_delay: options.connect_retry_delay(),
        };
        provider
            .with_connection(|_| Ok(()))
            .await
            .map_err(|error| {
                if db_type == DbType::Access {
                    tracing::error!(
                        "unable to connect to Access database; check that the Access ODBC driver is installed with the same bitness as this program"
                    );
                }
                error
            })?;
        Ok(provider)
    }

    /// Open a connection, retrying while Access holds its lock file
    fn open(
        connection_string: &str,
        attempts: u32,
        delay: Duration,
    ) -> Result<Connection<'static>, DatabaseError> {
        let environment = environment()?;
        let mut attempt = 1;
        loop {
            match environment
                .connect_with_connection_string(connection_string, ConnectionOptions::default())
            {
                Ok(connection) => return Ok(connection),
                Err(error) if attempt >= attempts => return Err(odbc_error(error)),
                Err(error) => {
                    tracing::debug!(attempt, "odbc connection failed, retrying: {}", error);
                    attempt += 1;
                    std::thread::sleep(delay);
                }
            }
        }
    }

    /// Run `work` with a fresh connection on the blocking thread pool
    async fn with_connection<T, F>(&self, work: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<'static>) -> Result<T, DatabaseError> + Send + 'static,
    {
        let connection_string = self.connection_string.clone();
        let attempts = self.connect_attempts;
        let delay = self.connect_retry_delay;
        tokio::task::spawn_blocking(move || {
            let connection = Self::open(&connection_string, attempts, delay)?;
            work(&connection)
        })
        .await?
    }

    /// Catalog object names of one `SQLTables` type, sorted
    async fn catalog_names(&self, table_type: &'static str) -> Result<Vec<String>, DatabaseError> {
        self.with_connection(move |connection| {
            let cursor = connection.tables("", "", "", table_type).map_err(odbc_error)?;
            let rows = read_text(cursor)?;
            // SQLTables columns: TABLE_CAT, TABLE_SCHEM, TABLE_NAME, TABLE_TYPE, REMARKS
            let mut names: Vec<String> = rows
                .into_iter()
                .filter(|row| row.get(3).cloned().flatten().as_deref() == Some(table_type))
                .filter_map(|row| row.get(2).cloned().flatten())
                .collect();
            names.sort();
            Ok(names)
        })
        .await
    }
}

#[async_trait]
impl DatabaseProvider for OdbcProvider {
    fn db_type(&self) -> DbType {
        self.db_type
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        self.catalog_names("TABLE").await
    }

    async fn list_queries(&self) -> Result<Vec<String>, DatabaseError> {
        if self.db_type != DbType::Access {
            return Ok(Vec::new());
        }
        self.catalog_names("VIEW").await
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        let table = table.to_string();
        self.with_connection(move |connection| {
            let cursor = connection.columns("", "", &table, "").map_err(odbc_error)?;
            let rows = read_text(cursor)?;
            if rows.is_empty() {
                return Err(DatabaseError::TableNotFound(table));
            }
            let key = primary_key_columns(connection, &table);
            // SQLColumns columns (0-based): 3 COLUMN_NAME, 5 TYPE_NAME, 10 NULLABLE, 12 COLUMN_DEF
            let cell = |row: &Vec<Option<String>>, index: usize| row.get(index).cloned().flatten();
            let columns = rows
                .iter()
                .map(|row| {
                    let name = cell(row, 3).unwrap_or_default();
                    ColumnInfo {
                        is_primary_key: key.contains(&name),
                        name,
                        data_type: cell(row, 5).unwrap_or_default(),
                        nullable: cell(row, 10).as_deref() != Some("0"),
                        default_value: cell(row, 12),
                    }
                })
                .collect();
            Ok(TableSchema {
                name: table,
                columns,
                primary_key: (!key.is_empty()).then_some(key),
                indexes: Vec::new(),
            })
        })
        .await
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Param],
        progress: Option<ProgressHandler>,
    ) -> Result<QueryResult, DatabaseError> {
        if progress.is_some() {
            tracing::warn!("progress handlers are only available for SQLite databases; ignoring");
        }
        tracing::debug!(sql, parameters = params.len(), "odbc query");
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_connection(move |connection| run_statement(connection, &sql, &params))
            .await
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Param>]) -> Result<u64, DatabaseError> {
        let sql = sql.to_string();
        let rows = rows.to_vec();
        self.with_connection(move |connection| {
            connection.set_autocommit(false).map_err(odbc_error)?;
            let mut prepared = connection.prepare(&sql).map_err(odbc_error)?;
            let mut affected_rows = 0;
            for params in &rows {
                let params = bind_params(params);
                prepared.execute(params.as_slice()).map_err(odbc_error)?;
                affected_rows += prepared.row_count().map_err(odbc_error)?.unwrap_or(0) as u64;
            }
            drop(prepared);
            connection.commit().map_err(odbc_error)?;
            Ok(affected_rows)
        })
        .await
    }

    async fn compact(&self) -> Result<(), DatabaseError> {
        Err(DatabaseError::Unsupported {
            operation: "compact",
            db_type: self.db_type,
        })
    }

    async fn begin(&self) -> Result<Box<dyn ProviderTransaction>, DatabaseError> {
        let connection = self
            .with_connection_owned(|connection| {
                connection.set_autocommit(false).map_err(odbc_error)?;
                Ok(())
            })
            .await?;
        Ok(Box::new(OdbcTransaction { connection }))
    }

    async fn close(&self) {}
}

impl OdbcProvider {
    /// Open a connection on the blocking pool and hand it back to the caller
    async fn with_connection_owned<F>(
        &self,
        prepare: F,
    ) -> Result<Arc<Mutex<Connection<'static>>>, DatabaseError>
    where
        F: FnOnce(&Connection<'static>) -> Result<(), DatabaseError> + Send + 'static,
    {
        let connection_string = self.connection_string.clone();
        let attempts = self.connect_attempts;
        let delay = self.connect_retry_delay;
        tokio::task::spawn_blocking(move || {
            let connection = Self::open(&connection_string, attempts, delay)?;
            prepare(&connection)?;
            Ok(Arc::new(Mutex::new(connection)))
        })
        .await?
    }
}

/// Transaction on a dedicated ODBC connection with autocommit off
struct OdbcTransaction {
    connection: Arc<Mutex<Connection<'static>>>,
}

impl OdbcTransaction {
    async fn run<T, F>(&self, work: F) -> Result<T, DatabaseError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection<'static>) -> Result<T, DatabaseError> + Send + 'static,
    {
        let connection = self.connection.clone();
        tokio::task::spawn_blocking(move || {
            let connection = connection
                .lock()
                .map_err(|_| DatabaseError::Odbc("connection lock poisoned".to_string()))?;
            work(&connection)
        })
        .await?
    }
}

#[async_trait]
impl ProviderTransaction for OdbcTransaction {
    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DatabaseError> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.run(move |connection| run_statement(connection, &sql, &params))
            .await
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.run(|connection| connection.commit().map_err(odbc_error))
            .await
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.run(|connection| connection.rollback().map_err(odbc_error))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_kind_from_data_type() {
        assert!(matches!(ValueKind::from(DataType::Integer), ValueKind::Integer));
        assert!(matches!(ValueKind::from(DataType::Double), ValueKind::Real));
        assert!(matches!(ValueKind::from(DataType::Bit), ValueKind::Boolean));
        assert!(matches!(
            ValueKind::from(DataType::Decimal {
                precision: 10,
                scale: 0
            }),
            ValueKind::Integer
        ));
        assert!(matches!(ValueKind::from(DataType::Date), ValueKind::Text));
        assert_eq!(
            ValueKind::from(DataType::LongVarbinary { length: None }),
            ValueKind::Binary
        );
        assert_eq!(ValueKind::from(DataType::LongVarchar { length: None }), ValueKind::Text);
    }

    #[test]
    fn test_cell_to_json() {
        assert_eq!(
            ValueKind::Binary.cell_to_json(Some(vec![0, 159, 146, 150])),
            Value::String("AJ+Slg==".into())
        );
        assert_eq!(ValueKind::Binary.cell_to_json(None), Value::Null);
        assert_eq!(ValueKind::Integer.cell_to_json(Some(b"7".to_vec())), Value::from(7));

        let long_text = "x".repeat(20_000);
        assert_eq!(
            ValueKind::Text.cell_to_json(Some(long_text.clone().into_bytes())),
            Value::String(long_text)
        );
    }

    #[test]
    fn test_ordered_key_columns() {
        let row = |column: &str, sequence: &str| {
            vec![
                None,
                None,
                Some("ORDERS".to_string()),
                Some(column.to_string()),
                Some(sequence.to_string()),
                Some("PrimaryKey".to_string()),
            ]
        };
        assert_eq!(
            ordered_key_columns(vec![row("line", "2"), row("order_id", "1")]),
            vec!["order_id", "line"]
        );
        assert!(ordered_key_columns(Vec::new()).is_empty());
    }

    #[test]
    fn test_bind_params_count() {
        let params = bind_params(&[
            Param::Null,
            Param::Integer(3),
            Param::Text("a".into()),
            Param::Bytes(vec![1, 2]),
        ]);
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_value_kind_to_json() {
        assert_eq!(ValueKind::Integer.to_json(Some("42".into())), Value::from(42));
        assert_eq!(ValueKind::Real.to_json(Some("2.5".into())), Value::from(2.5));
        assert_eq!(ValueKind::Boolean.to_json(Some("1".into())), Value::Bool(true));
        assert_eq!(ValueKind::Text.to_json(None), Value::Null);
        assert_eq!(
            ValueKind::Integer.to_json(Some("n/a".into())),
            Value::String("n/a".into())
        );
    }
}
