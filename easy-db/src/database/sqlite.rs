//! SQLite database provider implementation

use crate::config::OpenOptions;
use crate::database::detect::MEMORY_LOCATION;
use crate::database::traits::{DatabaseError, DatabaseProvider, ProviderTransaction};
use crate::schema::{
    ColumnInfo, DbType, IndexInfo, Param, ProgressHandler, QueryResult, Row, TableSchema,
};
use crate::util;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use sqlx::query::Query;
use sqlx::sqlite::{
    SqliteArguments, SqliteConnectOptions, SqliteConnection, SqlitePoolOptions, SqliteRow,
    SqliteValueRef,
};
use sqlx::{Column, Executor, Row as _, Sqlite, SqlitePool, Transaction, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Reading the schema table verifies the schema cookie, which makes SQLite
/// reload a schema another connection has changed
const SCHEMA_REFRESH: &str = "SELECT count(*) FROM sqlite_master";

/// SQLite database provider
pub struct SqliteProvider {
    pool: SqlitePool,
}

impl SqliteProvider {
    /// Create a new SQLite provider over an existing pool
    ///
    /// # Arguments
    ///
    /// * `pool` - SQLite connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a SQLite database file, creating it when
    /// [`OpenOptions::create_if_missing`] is set
    ///
    /// The location [`MEMORY_LOCATION`] opens a private in-memory database
    /// served by a single connection.
    pub async fn connect(location: &str, options: &OpenOptions) -> Result<Self, DatabaseError> {
        let pool = if location == MEMORY_LOCATION {
            let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")?
                .busy_timeout(options.busy_timeout());
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
                .connect_with(connect_options)
                .await?
        } else {
            let connect_options = SqliteConnectOptions::new()
                .filename(Path::new(location))
                .create_if_missing(options.create_if_missing)
                .busy_timeout(options.busy_timeout());
            SqlitePoolOptions::new()
                .max_connections(options.max_connections.max(1))
                .connect_with(connect_options)
                .await?
        };
        tracing::debug!("opened sqlite database at {}", location);
        Ok(Self::new(pool))
    }

    /// Quote an identifier (table or column name) to prevent SQL injection
    fn quote_identifier(identifier: &str) -> String {
        DbType::Sqlite.quote_identifier(identifier)
    }

    /// Whether a statement produces a result set
    fn is_select_query(sql: &str) -> bool {
        util::returns_rows(sql)
    }

    /// Bind positional parameters to a query
    fn bind_params<'q>(
        mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
        params: &'q [Param],
    ) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        for param in params {
            query = match param {
                Param::Null => query.bind(None::<String>),
                Param::Bool(flag) => query.bind(*flag),
                Param::Integer(integer) => query.bind(*integer),
                Param::Real(real) => query.bind(*real),
                Param::Text(text) => query.bind(text.as_str()),
                Param::Bytes(bytes) => query.bind(bytes.as_slice()),
            };
        }
        query
    }

    /// Run one statement on a connection (pooled or inside a transaction)
    async fn run_statement(
        connection: &mut SqliteConnection,
        sql: &str,
        params: &[Param],
    ) -> Result<QueryResult, DatabaseError> {
        let start_time = Instant::now();
        // Statements are built from table names that change under us, so
        // never keep them in the per-connection statement cache.
        let query = Self::bind_params(sqlx::query(sql).persistent(false), params);

        if !Self::is_select_query(sql) {
            let outcome = query.execute(&mut *connection).await?;
            return Ok(QueryResult {
                affected_rows: outcome.rows_affected(),
                execution_time_milliseconds: start_time.elapsed().as_millis() as u64,
                ..QueryResult::default()
            });
        }

        // A row's width is fixed when the statement is prepared, so the
        // schema must be current before that.
        sqlx::query(SCHEMA_REFRESH)
            .persistent(false)
            .execute(&mut *connection)
            .await?;
        let rows = query.fetch_all(&mut *connection).await?;

        let columns: Vec<String> = match rows.first() {
            Some(first_row) => first_row
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect(),
            None => (&mut *connection)
                .describe(sql)
                .await?
                .columns()
                .iter()
                .map(|column| column.name().to_string())
                .collect(),
        };

        let mut mapped_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            mapped_rows.push(Self::row_to_map(row)?);
        }

        let affected_rows = if util::is_read_statement(sql) {
            0
        } else {
            mapped_rows.len() as u64
        };

        Ok(QueryResult {
            columns,
            rows: mapped_rows,
            affected_rows,
            execution_time_milliseconds: start_time.elapsed().as_millis() as u64,
        })
    }

    /// Convert a SQLite row to a column-ordered map
    fn row_to_map(row: &SqliteRow) -> Result<Row, DatabaseError> {
        let mut map = Row::new();

        for column in row.columns() {
            let value = Self::extract_column_value(row, column)?;
            map.insert(column.name().to_string(), value);
        }

        Ok(map)
    }

    /// Extract a column value from a SQLite row and convert to JSON
    ///
    /// SQLite is dynamically typed, so the storage class of the value decides
    /// the conversion. Columns declared BOOLEAN come back as booleans.
    fn extract_column_value(
        row: &SqliteRow,
        column: &sqlx::sqlite::SqliteColumn,
    ) -> Result<Value, DatabaseError> {
        let index = column.ordinal();
        let raw: SqliteValueRef<'_> = row.try_get_raw(index)?;
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let storage_class = raw.type_info().name().to_string();
        let declared = column.type_info().name();

        let value = match storage_class.as_str() {
            "INTEGER" | "BOOLEAN" if declared == "BOOLEAN" => {
                Value::Bool(row.try_get::<i64, _>(index)? != 0)
            }
            "INTEGER" => Value::from(row.try_get::<i64, _>(index)?),
            "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(index)?)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            "BLOB" => Value::String(BASE64.encode(row.try_get::<Vec<u8>, _>(index)?)),
            _ => Value::String(row.try_get::<String, _>(index)?),
        };
        Ok(value)
    }

    async fn table_exists(&self, table: &str) -> Result<bool, DatabaseError> {
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name = ? AND name NOT LIKE 'sqlite_%'",
        )
        .bind(table)
        .fetch_optional(&self.pool)
        .await?;
        Ok(exists.is_some())
    }
}

#[async_trait]
impl DatabaseProvider for SqliteProvider {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    async fn list_tables(&self) -> Result<Vec<String>, DatabaseError> {
        let query = "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name";

        let tables: Vec<String> = sqlx::query_scalar(query).fetch_all(&self.pool).await?;
        Ok(tables)
    }

    async fn get_table_schema(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        if !self.table_exists(table).await? {
            return Err(DatabaseError::TableNotFound(table.to_string()));
        }

        // Get column information using PRAGMA table_info
        let table_info_query = format!("PRAGMA table_info({})", Self::quote_identifier(table));
        let column_rows = sqlx::query(&table_info_query)
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;

        let mut columns = Vec::new();
        let mut primary_key_columns = Vec::new();

        for row in column_rows {
            // PRAGMA table_info returns: cid, name, type, notnull, dflt_value, pk
            let name: String = row.try_get("name")?;
            let data_type: String = row.try_get("type")?;
            let not_null: i64 = row.try_get("notnull")?;
            let default_value: Option<String> = row.try_get("dflt_value").ok().flatten();
            let primary_key: i64 = row.try_get("pk")?;

            let is_primary_key = primary_key > 0;
            if is_primary_key {
                primary_key_columns.push((primary_key, name.clone()));
            }

            columns.push(ColumnInfo {
                name,
                data_type,
                nullable: not_null == 0,
                default_value,
                is_primary_key,
            });
        }

        // Sort primary key columns by their pk order and extract names
        primary_key_columns.sort_by_key(|(order, _)| *order);
        let primary_key = if primary_key_columns.is_empty() {
            None
        } else {
            Some(primary_key_columns.into_iter().map(|(_, name)| name).collect())
        };

        // Get index information using PRAGMA index_list
        let index_list_query = format!("PRAGMA index_list({})", Self::quote_identifier(table));
        let index_rows = sqlx::query(&index_list_query)
            .persistent(false)
            .fetch_all(&self.pool)
            .await?;

        let mut indexes = Vec::new();
        for row in index_rows {
            // PRAGMA index_list returns: seq, name, unique, origin, partial
            let index_name: String = row.try_get("name")?;
            let unique: i64 = row.try_get("unique")?;

            // Get columns in this index using PRAGMA index_info
            let index_info_query =
                format!("PRAGMA index_info({})", Self::quote_identifier(&index_name));
            let index_column_rows = sqlx::query(&index_info_query)
                .persistent(false)
                .fetch_all(&self.pool)
                .await?;

            let mut index_columns = Vec::new();
            for column_row in index_column_rows {
                // PRAGMA index_info returns: seqno, cid, name
                if let Ok(Some(name)) = column_row.try_get::<Option<String>, _>("name") {
                    index_columns.push(name);
                }
            }

            indexes.push(IndexInfo {
                name: index_name,
                columns: index_columns,
                unique: unique != 0,
            });
        }

        Ok(TableSchema {
            name: table.to_string(),
            columns,
            primary_key,
            indexes,
        })
    }

    async fn query(
        &self,
        sql: &str,
        params: &[Param],
        progress: Option<ProgressHandler>,
    ) -> Result<QueryResult, DatabaseError> {
        tracing::debug!(sql, parameters = params.len(), "sqlite query");

        let mut connection = self.pool.acquire().await?;
        let Some(handler) = progress else {
            return Self::run_statement(&mut connection, sql, params).await;
        };

        // The progress handler belongs to the connection, so remove it again
        // before the connection returns to the pool.
        let callback = handler.callback.clone();
        connection
            .lock_handle()
            .await?
            .set_progress_handler(handler.every, move || callback());

        let result = Self::run_statement(&mut *connection, sql, params).await;

        connection.lock_handle().await?.remove_progress_handler();
        result
    }

    async fn execute_batch(&self, sql: &str, rows: &[Vec<Param>]) -> Result<u64, DatabaseError> {
        let mut transaction = self.pool.begin().await?;
        let mut affected_rows = 0;
        for params in rows {
            let query = Self::bind_params(sqlx::query(sql).persistent(false), params);
            affected_rows += query.execute(&mut *transaction).await?.rows_affected();
        }
        transaction.commit().await?;
        Ok(affected_rows)
    }

    async fn compact(&self) -> Result<(), DatabaseError> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        Ok(())
    }

    async fn begin(&self) -> Result<Box<dyn ProviderTransaction>, DatabaseError> {
        let transaction = self.pool.begin().await?;
        Ok(Box::new(SqliteTransaction { transaction }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// Transaction on a pooled SQLite connection
struct SqliteTransaction {
    transaction: Transaction<'static, Sqlite>,
}

#[async_trait]
impl ProviderTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, params: &[Param]) -> Result<QueryResult, DatabaseError> {
        SqliteProvider::run_statement(&mut *self.transaction, sql, params).await
    }

    async fn commit(self: Box<Self>) -> Result<(), DatabaseError> {
        self.transaction.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DatabaseError> {
        self.transaction.rollback().await?;
        Ok(())
    }
}
