//! Database abstraction layer
//!
//! [`Database`] pairs a location with a driver-backed [`DatabaseProvider`]
//! and builds the table-level operations (pull, append, update, copy, ...)
//! on top of the provider's statement interface.

pub mod detect;
pub mod traits;

pub mod sqlite;

#[cfg(feature = "access")]
pub mod odbc;

// Re-export the main trait
pub use traits::{DatabaseError, DatabaseProvider, ProviderTransaction};

use crate::config::OpenOptions;
use crate::schema::{
    AppendOptions, ColumnCase, ColumnType, DbType, Param, PullOptions, QueryResult, Row,
    TableSchema,
};
use crate::util;
use serde_json::Value;
use sqlite::SqliteProvider;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use tokio::sync::RwLock;

/// Cache key for a pull: the table plus the sorted requested columns
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PullKey {
    table: String,
    columns: Option<Vec<String>>,
}

impl PullKey {
    fn new(table: &str, columns: Option<&[String]>) -> Self {
        let columns = columns.map(|columns| {
            let mut sorted = columns.to_vec();
            sorted.sort();
            sorted
        });
        Self {
            table: table.to_string(),
            columns,
        }
    }
}

/// Handle to one database
///
/// Every call is a single statement or a single transaction. Results of
/// [`pull`](Database::pull), table names and table schemas are cached until
/// a mutating call through this handle invalidates them.
pub struct Database {
    location: String,
    db_type: DbType,
    options: OpenOptions,
    provider: Box<dyn DatabaseProvider>,
    pull_cache: RwLock<HashMap<PullKey, Vec<Row>>>,
    table_cache: RwLock<Option<Vec<String>>>,
    schema_cache: RwLock<HashMap<String, TableSchema>>,
}

impl Database {
    /// Open a database with default [`OpenOptions`]
    ///
    /// `location` is a SQLite file path, `:memory:`, an Access `.accdb`/`.mdb`
    /// path, an ODBC connection string containing `DSN=`, or the name of an
    /// environment variable holding one of those.
    pub async fn open(location: &str) -> Result<Self, DatabaseError> {
        Self::open_with(location, OpenOptions::default()).await
    }

    /// Open a database with explicit options
    pub async fn open_with(location: &str, options: OpenOptions) -> Result<Self, DatabaseError> {
        let location = detect::resolve_location(location, options.resolve_environment);

        let db_type = match detect::detect_db_type(&location) {
            Some(db_type) => db_type,
            None => Self::fallback_sqlite(&location, &options)?,
        };

        let provider: Box<dyn DatabaseProvider> = match db_type {
            DbType::Sqlite => Box::new(SqliteProvider::connect(&location, &options).await?),
            DbType::Access => {
                let path = Path::new(&location);
                if !path.is_file() {
                    let hint = detect::access_alternative(path)
                        .map(|alternative| format!("found {} instead", alternative.display()));
                    return Err(DatabaseError::FileNotFound {
                        path: path.to_path_buf(),
                        hint,
                    });
                }
                Self::connect_odbc(db_type, &location, &options).await?
            }
            DbType::SqlServer => Self::connect_odbc(db_type, &location, &options).await?,
        };

        tracing::debug!("opened {} database at {}", db_type, location);
        Ok(Self::assemble(location, options, provider))
    }

    /// Wrap an already connected provider
    ///
    /// Useful for sharing an existing [`sqlx::SqlitePool`] through
    /// [`SqliteProvider::new`].
    pub fn with_provider(location: impl Into<String>, provider: impl DatabaseProvider) -> Self {
        Self::assemble(location.into(), OpenOptions::default(), Box::new(provider))
    }

    fn assemble(location: String, options: OpenOptions, provider: Box<dyn DatabaseProvider>) -> Self {
        Self {
            location,
            db_type: provider.db_type(),
            options,
            provider,
            pull_cache: RwLock::new(HashMap::new()),
            table_cache: RwLock::new(None),
            schema_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Decide what to do with a location that is not an existing database
    fn fallback_sqlite(location: &str, options: &OpenOptions) -> Result<DbType, DatabaseError> {
        let path = Path::new(location);
        if !util::has_sqlite_extension(path) {
            return Err(DatabaseError::NotRecognized(location.to_string()));
        }
        match std::fs::metadata(path) {
            Err(_) if options.create_if_missing => {
                tracing::info!("creating new sqlite database at {}", location);
                Ok(DbType::Sqlite)
            }
            Err(_) => Err(DatabaseError::FileNotFound {
                path: path.to_path_buf(),
                hint: None,
            }),
            // SQLite treats an empty file as an empty database
            Ok(metadata) if metadata.is_file() && metadata.len() == 0 => Ok(DbType::Sqlite),
            Ok(_) => Err(DatabaseError::NotRecognized(location.to_string())),
        }
    }

    #[cfg(feature = "access")]
    async fn connect_odbc(
        db_type: DbType,
        location: &str,
        options: &OpenOptions,
    ) -> Result<Box<dyn DatabaseProvider>, DatabaseError> {
        let connection_string = match db_type {
            DbType::Access => {
                detect::access_connection_string(&std::fs::canonicalize(location)?)
            }
            _ => location.to_string(),
        };
        let provider = odbc::OdbcProvider::connect(db_type, connection_string, options).await?;
        Ok(Box::new(provider))
    }

    #[cfg(not(feature = "access"))]
    async fn connect_odbc(
        db_type: DbType,
        _location: &str,
        _options: &OpenOptions,
    ) -> Result<Box<dyn DatabaseProvider>, DatabaseError> {
        Err(DatabaseError::Unsupported {
            operation: "opening (build with the `access` feature)",
            db_type,
        })
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub fn options(&self) -> &OpenOptions {
        &self.options
    }

    /// Size of the database file in bytes
    pub async fn size_bytes(&self) -> Result<u64, DatabaseError> {
        if !self.db_type.is_file_based() || self.location == detect::MEMORY_LOCATION {
            return Err(DatabaseError::Unsupported {
                operation: "size",
                db_type: self.db_type,
            });
        }
        Ok(tokio::fs::metadata(&self.location).await?.len())
    }

    /// Size of the database file in gigabytes (10^9 bytes), rounded to 6 decimals
    pub async fn size_gb(&self) -> Result<f64, DatabaseError> {
        let bytes = self.size_bytes().await?;
        Ok(bytes_to_gb(bytes))
    }

    /// Defragment and shrink the database
    pub async fn compact(&self) -> Result<(), DatabaseError> {
        tracing::info!("compacting {}", self.location);
        self.provider.compact().await
    }

    /// Run one statement with positional `?` parameters
    ///
    /// Every cache is cleared unless the statement only reads.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<QueryResult, DatabaseError> {
        let params: Vec<Param> = params.iter().map(Param::from).collect();
        let result = self.provider.query(sql, &params, None).await?;
        if !util::is_read_statement(sql) {
            self.clear_caches().await;
        }
        Ok(result)
    }

    /// Start a transaction scoped to the returned [`Session`]
    ///
    /// For `:memory:` databases the session holds the only connection, so
    /// other calls on this handle wait until the session ends.
    pub async fn session(&self) -> Result<Session<'_>, DatabaseError> {
        let transaction = self.provider.begin().await?;
        Ok(Session {
            database: self,
            transaction,
        })
    }

    /// Pull every row of a table (or Access saved query)
    pub async fn pull(&self, table: &str) -> Result<Vec<Row>, DatabaseError> {
        self.pull_with(table, PullOptions::default()).await
    }

    /// Pull rows of a table with column selection, cache control and progress reporting
    pub async fn pull_with(
        &self,
        table: &str,
        options: PullOptions,
    ) -> Result<Vec<Row>, DatabaseError> {
        ensure_clean(table)?;
        if let Some(columns) = &options.columns {
            for column in columns {
                ensure_clean(column)?;
            }
        }

        if options.fresh {
            self.clear_table_cache(table).await;
        }

        let key = PullKey::new(table, options.columns.as_deref());
        if let Some(rows) = self.pull_cache.read().await.get(&key) {
            return Ok(rows.clone());
        }

        if !self.table_names().await?.iter().any(|name| name == table)
            && !self.query_names().await?.iter().any(|name| name == table)
        {
            return Err(DatabaseError::TableNotFound(table.to_string()));
        }

        let sql = format!(
            "SELECT {} FROM {}",
            self.column_list(options.columns.as_deref()),
            self.quote(table)
        );
        let result = self.provider.query(&sql, &[], options.progress).await?;

        tracing::debug!(table, rows = result.rows.len(), "pulled table");
        self.pull_cache
            .write()
            .await
            .insert(key, result.rows.clone());
        Ok(result.rows)
    }

    /// Pull rows matching a SQL condition
    ///
    /// `condition` is placed after `WHERE` as written; use `?` placeholders
    /// with `params` for values. Results are not cached.
    pub async fn pull_where(
        &self,
        table: &str,
        condition: &str,
        params: &[Value],
        columns: Option<&[&str]>,
    ) -> Result<Vec<Row>, DatabaseError> {
        ensure_clean(table)?;
        let columns = owned_columns(columns)?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {}",
            self.column_list(columns.as_deref()),
            self.quote(table),
            condition
        );
        let params: Vec<Param> = params.iter().map(Param::from).collect();
        Ok(self.provider.query(&sql, &params, None).await?.rows)
    }

    /// Pull rows whose `id_column` value is one of `values`
    ///
    /// Values are bound in `IN (...)` chunks of the configured batch size.
    pub async fn pull_where_id_in_list(
        &self,
        table: &str,
        id_column: &str,
        values: &[Value],
        columns: Option<&[&str]>,
    ) -> Result<Vec<Row>, DatabaseError> {
        ensure_clean(table)?;
        ensure_clean(id_column)?;
        let columns = owned_columns(columns)?;

        let mut rows = Vec::new();
        for chunk in values.chunks(self.options.effective_batch_size()) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT {} FROM {} WHERE {} IN ({})",
                self.column_list(columns.as_deref()),
                self.quote(table),
                self.quote(id_column),
                placeholders
            );
            let params: Vec<Param> = chunk.iter().map(Param::from).collect();
            rows.extend(self.provider.query(&sql, &params, None).await?.rows);
        }
        Ok(rows)
    }

    /// Sorted names of all user tables
    pub async fn table_names(&self) -> Result<Vec<String>, DatabaseError> {
        if let Some(tables) = self.table_cache.read().await.as_ref() {
            return Ok(tables.clone());
        }
        let mut tables = self.provider.list_tables().await?;
        tables.sort();
        *self.table_cache.write().await = Some(tables.clone());
        Ok(tables)
    }

    /// Sorted names of saved select queries (Access only)
    pub async fn query_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.provider.list_queries().await
    }

    /// Schema of a table, cached until the table changes
    pub async fn table_schema(&self, table: &str) -> Result<TableSchema, DatabaseError> {
        ensure_clean(table)?;
        if let Some(schema) = self.schema_cache.read().await.get(table) {
            return Ok(schema.clone());
        }
        let schema = self.provider.get_table_schema(table).await?;
        self.schema_cache
            .write()
            .await
            .insert(table.to_string(), schema.clone());
        Ok(schema)
    }

    /// Ordered `(column name, lowercase declared type)` pairs of a table
    pub async fn columns_and_types(
        &self,
        table: &str,
    ) -> Result<Vec<(String, String)>, DatabaseError> {
        Ok(self
            .table_schema(table)
            .await?
            .columns
            .into_iter()
            .map(|column| (column.name, column.data_type.to_lowercase()))
            .collect())
    }

    /// Primary key columns of a table, in key order
    ///
    /// Empty when the table has no primary key, or when an ODBC driver
    /// cannot report one.
    pub async fn key_columns(&self, table: &str) -> Result<Vec<String>, DatabaseError> {
        Ok(self
            .table_schema(table)
            .await?
            .primary_key
            .unwrap_or_default())
    }

    /// Create a table from `(column name, type)` pairs
    ///
    /// Column names pass through [`util::clean_column_name`] and are quoted,
    /// so keywords such as `update` are valid column names. An existing
    /// table is an error unless `force_overwrite` is set, in which case it is
    /// dropped first.
    pub async fn create_table<I, K>(
        &self,
        table: &str,
        columns: I,
        force_overwrite: bool,
    ) -> Result<(), DatabaseError>
    where
        I: IntoIterator<Item = (K, ColumnType)>,
        K: AsRef<str>,
    {
        ensure_clean(table)?;
        let mut definitions = Vec::new();
        for (name, column_type) in columns {
            let cleaned = util::clean_column_name(name.as_ref());
            if cleaned.is_empty() {
                return Err(DatabaseError::InvalidName(name.as_ref().to_string()));
            }
            let name = cleaned;
            definitions.push(format!(
                "{} {}",
                self.quote(&name),
                self.db_type.sql_type(column_type)
            ));
        }
        if definitions.is_empty() {
            return Err(DatabaseError::NoColumns(table.to_string()));
        }

        if self.table_names().await?.iter().any(|name| name == table) {
            if !force_overwrite {
                return Err(DatabaseError::TableExists(table.to_string()));
            }
            self.drop_table(table).await?;
        }

        let sql = format!(
            "CREATE TABLE {} ({})",
            self.quote(table),
            definitions.join(", ")
        );
        self.provider.query(&sql, &[], None).await?;
        tracing::info!("table {} created", table);

        self.clear_table_cache(table).await;
        *self.table_cache.write().await = None;
        Ok(())
    }

    /// Insert rows into a table
    ///
    /// Rows are inserted with bound parameters in batches, each batch in its
    /// own transaction. Returns the number of rows inserted.
    pub async fn append(
        &self,
        table: &str,
        rows: Vec<Row>,
        options: AppendOptions,
    ) -> Result<u64, DatabaseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        ensure_clean(table)?;

        let rows: Vec<Row> = if options.clean_column_names {
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(key, value)| (util::clean_column_name(&key), value))
                        .collect()
                })
                .collect()
        } else {
            rows
        };

        if !self.table_names().await?.iter().any(|name| name == table) {
            if !options.create_table_if_needed {
                return Err(DatabaseError::TableNotFound(table.to_string()));
            }
            self.create_table(table, util::infer_column_types(&rows), false)
                .await?;
        }

        let columns: Vec<(String, ColumnType)> = self
            .table_schema(table)
            .await?
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.column_type()))
            .collect();

        let rows = if options.robust {
            rows.iter().map(|row| util::clean_row(row, &columns)).collect()
        } else {
            self.check_strict_rows(table, &rows, &columns)?;
            rows
        };

        let sql = self.insert_statement(table, &columns);

        let mut inserted = 0;
        for batch in rows.chunks(self.options.effective_batch_size()) {
            let params: Vec<Vec<Param>> =
                batch.iter().map(|row| row_params(row, &columns)).collect();
            self.provider.execute_batch(&sql, &params).await?;
            inserted += batch.len() as u64;
        }

        self.clear_table_cache(table).await;
        tracing::info!("{} rows appended to {}", inserted, table);
        Ok(inserted)
    }

    /// Insert a single row
    pub async fn append_row(
        &self,
        table: &str,
        row: Row,
        options: AppendOptions,
    ) -> Result<u64, DatabaseError> {
        self.append(table, vec![row], options).await
    }

    /// `INSERT` statement binding every one of `columns`
    fn insert_statement(&self, table: &str, columns: &[(String, ColumnType)]) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote(table),
            columns
                .iter()
                .map(|(name, _)| self.quote(name))
                .collect::<Vec<_>>()
                .join(", "),
            vec!["?"; columns.len()].join(", ")
        )
    }

    /// Rows must carry exactly the table's columns when not cleaned
    fn check_strict_rows(
        &self,
        table: &str,
        rows: &[Row],
        columns: &[(String, ColumnType)],
    ) -> Result<(), DatabaseError> {
        for row in rows {
            if let Some(unknown) = row
                .keys()
                .find(|key| !columns.iter().any(|(name, _)| name == *key))
            {
                return Err(DatabaseError::InvalidColumn {
                    table: table.to_string(),
                    column: unknown.clone(),
                });
            }
            let missing: Vec<String> = columns
                .iter()
                .filter(|(name, _)| !row.contains_key(name))
                .map(|(name, _)| name.clone())
                .collect();
            if !missing.is_empty() {
                return Err(DatabaseError::ColumnMismatch {
                    table: table.to_string(),
                    missing,
                });
            }
        }
        Ok(())
    }

    /// Set `update_column` on rows where `match_column` equals each match value
    ///
    /// A single update value is applied to every match value; otherwise the
    /// two slices are paired up and must be the same length. Returns the
    /// number of rows changed.
    pub async fn update(
        &self,
        table: &str,
        match_column: &str,
        match_values: &[Value],
        update_column: &str,
        update_values: &[Value],
    ) -> Result<u64, DatabaseError> {
        ensure_clean(table)?;
        let schema = self.table_schema(table).await?;
        for column in [match_column, update_column] {
            if !schema.has_column(column) {
                return Err(DatabaseError::InvalidColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }
        if update_values.len() != 1 && update_values.len() != match_values.len() {
            return Err(DatabaseError::LengthMismatch {
                matches: match_values.len(),
                updates: update_values.len(),
            });
        }
        if match_values.is_empty() {
            return Ok(0);
        }

        let column_type = |name: &str| {
            schema
                .column(name)
                .map(|column| column.column_type())
                .unwrap_or(ColumnType::Text)
        };
        let (match_type, update_type) = (column_type(match_column), column_type(update_column));

        let params: Vec<Vec<Param>> = match_values
            .iter()
            .enumerate()
            .map(|(index, match_value)| {
                let update_value = update_values.get(index).unwrap_or(&update_values[0]);
                vec![
                    Param::for_column(update_value, update_type),
                    Param::for_column(match_value, match_type),
                ]
            })
            .collect();

        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            self.quote(table),
            self.quote(update_column),
            self.quote(match_column)
        );
        let updated = self.provider.execute_batch(&sql, &params).await?;

        self.clear_table_cache(table).await;
        tracing::debug!(table, updated, "rows updated");
        Ok(updated)
    }

    /// Add a column to a table
    pub async fn add_column(
        &self,
        table: &str,
        column: &str,
        column_type: ColumnType,
    ) -> Result<(), DatabaseError> {
        ensure_clean(table)?;
        ensure_clean(column)?;
        if self.table_schema(table).await?.has_column(column) {
            return Err(DatabaseError::ColumnExists {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let sql = format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.quote(table),
            self.quote(column),
            self.db_type.sql_type(column_type)
        );
        self.provider.query(&sql, &[], None).await?;
        tracing::info!("column {} added to {}", column, table);
        self.clear_table_cache(table).await;
        Ok(())
    }

    /// Remove a column from a table
    pub async fn drop_column(&self, table: &str, column: &str) -> Result<(), DatabaseError> {
        ensure_clean(table)?;
        if !self.table_schema(table).await?.has_column(column) {
            return Err(DatabaseError::InvalidColumn {
                table: table.to_string(),
                column: column.to_string(),
            });
        }
        let sql = format!(
            "ALTER TABLE {} DROP COLUMN {}",
            self.quote(table),
            self.quote(column)
        );
        self.provider.query(&sql, &[], None).await?;
        tracing::info!("column {} removed from {}", column, table);
        self.clear_table_cache(table).await;
        Ok(())
    }

    /// Delete duplicate rows, keeping the most recently added row of each group
    ///
    /// Rows are grouped on `grouping_columns`, or on every column when none
    /// are given. Returns the number of rows removed.
    pub async fn delete_duplicates(
        &self,
        table: &str,
        grouping_columns: Option<&[&str]>,
    ) -> Result<u64, DatabaseError> {
        ensure_clean(table)?;
        let schema = self.table_schema(table).await?;
        let grouping: Vec<String> = match grouping_columns {
            Some(columns) => columns.iter().map(|column| column.to_string()).collect(),
            None => {
                let mut names = schema.column_names();
                names.sort();
                names
            }
        };
        for column in &grouping {
            if !schema.has_column(column) {
                return Err(DatabaseError::InvalidColumn {
                    table: table.to_string(),
                    column: column.clone(),
                });
            }
        }

        tracing::info!("deleting duplicate rows from {}", table);
        let removed = match self.db_type {
            DbType::Sqlite => {
                let sql = format!(
                    "DELETE FROM {table} WHERE rowid NOT IN (SELECT max(rowid) FROM {table} GROUP BY {columns})",
                    table = self.quote(table),
                    columns = self.column_list(Some(grouping.as_slice())),
                );
                self.provider.query(&sql, &[], None).await?.affected_rows
            }
            DbType::Access | DbType::SqlServer => {
                self.delete_duplicates_in_memory(table, &grouping).await?
            }
        };

        self.clear_table_cache(table).await;
        Ok(removed)
    }

    /// Rewrite a table without duplicates when the engine has no rowid
    ///
    /// The delete and the reinsert share one transaction, so a failure
    /// leaves the table as it was.
    async fn delete_duplicates_in_memory(
        &self,
        table: &str,
        grouping: &[String],
    ) -> Result<u64, DatabaseError> {
        let rows = self.pull_with(table, PullOptions::new().fresh()).await?;

        let mut seen = HashSet::new();
        let mut kept: Vec<Row> = Vec::new();
        for row in rows.iter().rev() {
            let group: Vec<&Value> = grouping
                .iter()
                .map(|column| row.get(column).unwrap_or(&Value::Null))
                .collect();
            if seen.insert(serde_json::to_string(&group)?) {
                kept.push(row.clone());
            }
        }
        kept.reverse();

        let removed = (rows.len() - kept.len()) as u64;
        if removed == 0 {
            return Ok(0);
        }

        let columns: Vec<(String, ColumnType)> = self
            .table_schema(table)
            .await?
            .columns
            .iter()
            .map(|column| (column.name.clone(), column.column_type()))
            .collect();
        let delete_sql = format!("DELETE FROM {}", self.quote(table));
        let insert_sql = self.insert_statement(table, &columns);

        let mut transaction = self.provider.begin().await?;
        let rewritten = async {
            transaction.execute(&delete_sql, &[]).await?;
            for row in &kept {
                let row = util::clean_row(row, &columns);
                transaction
                    .execute(&insert_sql, &row_params(&row, &columns))
                    .await?;
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        match rewritten {
            Ok(()) => transaction.commit().await?,
            Err(error) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!("rollback of {} failed: {}", table, rollback_error);
                }
                return Err(error);
            }
        }
        Ok(removed)
    }

    /// Create an index on one or more columns
    ///
    /// Without a name the index is called `idx_<table>_<columns>`.
    pub async fn create_index(
        &self,
        table: &str,
        columns: &[&str],
        name: Option<&str>,
        unique: bool,
    ) -> Result<(), DatabaseError> {
        ensure_clean(table)?;
        if columns.is_empty() {
            return Err(DatabaseError::NoColumns(table.to_string()));
        }
        let schema = self.table_schema(table).await?;
        for column in columns {
            if !schema.has_column(column) {
                return Err(DatabaseError::InvalidColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                });
            }
        }

        let name = match name {
            Some(name) => {
                ensure_clean(name)?;
                name.to_string()
            }
            None => format!("idx_{}_{}", table, columns.join("_")).replace(' ', "_"),
        };
        let columns: Vec<String> = columns.iter().map(|column| column.to_string()).collect();
        let sql = format!(
            "CREATE {}INDEX {} ON {} ({})",
            if unique { "UNIQUE " } else { "" },
            self.quote(&name),
            self.quote(table),
            self.column_list(Some(columns.as_slice()))
        );
        self.provider.query(&sql, &[], None).await?;
        tracing::info!("index {} created on {}", name, table);
        self.schema_cache.write().await.remove(table);
        Ok(())
    }

    /// Drop a table
    ///
    /// Returns `false` when there was no such table.
    pub async fn drop_table(&self, table: &str) -> Result<bool, DatabaseError> {
        ensure_clean(table)?;
        if !self.table_names().await?.iter().any(|name| name == table) {
            tracing::debug!("table {} does not exist, nothing to drop", table);
            return Ok(false);
        }
        self.provider
            .query(&format!("DROP TABLE {}", self.quote(table)), &[], None)
            .await?;
        tracing::info!("table {} deleted", table);

        self.clear_table_cache(table).await;
        *self.table_cache.write().await = None;
        Ok(true)
    }

    /// Copy a table from another database into this one
    ///
    /// The target table (`new_name`, or the source name) is recreated from
    /// the source's declared column types, with column names case-mapped.
    /// Returns the number of rows copied.
    pub async fn copy_table(
        &self,
        source: &Database,
        table: &str,
        new_name: Option<&str>,
        column_case: ColumnCase,
    ) -> Result<u64, DatabaseError> {
        if !source.table_names().await?.iter().any(|name| name == table) {
            return Err(DatabaseError::TableNotFound(table.to_string()));
        }

        let rows = source.pull_with(table, PullOptions::new().fresh()).await?;
        let columns: Vec<(String, ColumnType)> = source
            .table_schema(table)
            .await?
            .columns
            .iter()
            .map(|column| (column_case.apply(&column.name), column.column_type()))
            .collect();
        let rows: Vec<Row> = rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|(key, value)| (column_case.apply(&key), value))
                    .collect()
            })
            .collect();

        let target = new_name.unwrap_or(table);
        self.drop_table(target).await?;
        self.create_table(target, columns, false).await?;
        let copied = self
            .append(
                target,
                rows,
                AppendOptions {
                    create_table_if_needed: false,
                    clean_column_names: true,
                    robust: true,
                },
            )
            .await?;

        tracing::info!("table {} copied from {} as {}", table, source.location, target);
        Ok(copied)
    }

    /// Close the underlying connections
    pub async fn close(self) {
        self.provider.close().await;
    }

    /// Forget cached pulls and schema for one table
    async fn clear_table_cache(&self, table: &str) {
        self.pull_cache
            .write()
            .await
            .retain(|key, _| key.table != table);
        self.schema_cache.write().await.remove(table);
    }

    /// Forget everything cached for this database
    async fn clear_caches(&self) {
        self.pull_cache.write().await.clear();
        self.schema_cache.write().await.clear();
        *self.table_cache.write().await = None;
    }

    fn quote(&self, identifier: &str) -> String {
        self.db_type.quote_identifier(identifier)
    }

    fn column_list(&self, columns: Option<&[String]>) -> String {
        match columns {
            Some(columns) if !columns.is_empty() => columns
                .iter()
                .map(|column| self.quote(column))
                .collect::<Vec<_>>()
                .join(", "),
            _ => "*".to_string(),
        }
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Database: {}", self.location)
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("location", &self.location)
            .field("db_type", &self.db_type)
            .finish_non_exhaustive()
    }
}

/// A transaction on one connection of a [`Database`]
///
/// Dropping a session without calling [`commit`](Session::commit) rolls
/// back everything it executed.
pub struct Session<'a> {
    database: &'a Database,
    transaction: Box<dyn ProviderTransaction>,
}

impl Session<'_> {
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<QueryResult, DatabaseError> {
        let params: Vec<Param> = params.iter().map(Param::from).collect();
        self.transaction.execute(sql, &params).await
    }

    /// Commit the transaction and invalidate the database's caches
    pub async fn commit(self) -> Result<(), DatabaseError> {
        self.transaction.commit().await?;
        self.database.clear_caches().await;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), DatabaseError> {
        self.transaction.rollback().await
    }
}

fn ensure_clean(name: &str) -> Result<(), DatabaseError> {
    if util::is_clean_name(name) {
        Ok(())
    } else {
        Err(DatabaseError::InvalidName(name.to_string()))
    }
}

/// Parameters for one row, in `columns` order
fn row_params(row: &Row, columns: &[(String, ColumnType)]) -> Vec<Param> {
    columns
        .iter()
        .map(|(name, column_type)| {
            Param::for_column(row.get(name).unwrap_or(&Value::Null), *column_type)
        })
        .collect()
}

fn owned_columns(columns: Option<&[&str]>) -> Result<Option<Vec<String>>, DatabaseError> {
    columns
        .map(|columns| {
            columns
                .iter()
                .map(|column| ensure_clean(column).map(|_| column.to_string()))
                .collect::<Result<Vec<String>, DatabaseError>>()
        })
        .transpose()
}

fn bytes_to_gb(bytes: u64) -> f64 {
    (bytes as f64 / 1e9 * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_pull_key_ignores_column_order() {
        let forward = PullKey::new("t", Some(&["b".to_string(), "a".to_string()]));
        let backward = PullKey::new("t", Some(&["a".to_string(), "b".to_string()]));
        assert_eq!(forward, backward);
        assert_ne!(forward, PullKey::new("t", None));
    }

    #[test]
    fn test_bytes_to_gb() {
        assert_eq!(bytes_to_gb(1_500_000_000), 1.5);
        assert_eq!(bytes_to_gb(1_234), 0.000001);
        assert_eq!(bytes_to_gb(0), 0.0);
    }

    #[test]
    fn test_owned_columns_rejects_unclean_names() {
        assert_eq!(
            owned_columns(Some(&["a", "b"])).unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(owned_columns(None).unwrap().is_none());
        assert!(matches!(
            owned_columns(Some(&["a; DROP TABLE t"])),
            Err(DatabaseError::InvalidName(_))
        ));
    }

    #[tokio::test]
    async fn test_open_unrecognized_location() {
        let error = Database::open_with("nothing-here.txt", OpenOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(error, DatabaseError::NotRecognized(_)));
    }

    #[tokio::test]
    async fn test_rewrite_without_duplicates_is_atomic() {
        let database = Database::open(detect::MEMORY_LOCATION).await.unwrap();
        database
            .execute("CREATE TABLE pets (name TEXT, legs INTEGER)", &[])
            .await
            .unwrap();
        for (name, legs) in [("cat", 4), ("cat", 4), ("bird", 2), ("boom", 0), ("boom", 0)] {
            database
                .execute("INSERT INTO pets VALUES (?, ?)", &[json!(name), json!(legs)])
                .await
                .unwrap();
        }
        database
            .execute(
                "CREATE TRIGGER refuse_boom BEFORE INSERT ON pets WHEN NEW.name = 'boom' \
                 BEGIN SELECT RAISE(ABORT, 'boom refused'); END",
                &[],
            )
            .await
            .unwrap();

        let grouping = vec!["name".to_string(), "legs".to_string()];
        assert!(database
            .delete_duplicates_in_memory("pets", &grouping)
            .await
            .is_err());
        let rows = database
            .pull_with("pets", PullOptions::new().fresh())
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);

        database.execute("DROP TRIGGER refuse_boom", &[]).await.unwrap();
        assert_eq!(
            database
                .delete_duplicates_in_memory("pets", &grouping)
                .await
                .unwrap(),
            2
        );
        let rows = database
            .pull_with("pets", PullOptions::new().fresh())
            .await
            .unwrap();
        let names: Vec<&str> = rows
            .iter()
            .map(|row| row["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["cat", "bird", "boom"]);
    }

    #[tokio::test]
    async fn test_display() {
        let database = Database::open(detect::MEMORY_LOCATION).await.unwrap();
        assert_eq!(database.to_string(), "Database: :memory:");
        assert_eq!(database.db_type(), DbType::Sqlite);
    }
}
