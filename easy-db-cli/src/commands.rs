//! Subcommand implementations
//!
//! Results go to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context};
use axum::{extract::State, http::StatusCode, routing::get, Router};
use clap::Args;
use easy_db::{ColumnCase, Database, EasyDbLayer};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Args)]
pub struct ColumnsArgs {
    /// Table name
    pub table: String,
}

#[derive(Debug, Args)]
pub struct PullArgs {
    /// Table (or Access query) name
    pub table: String,

    /// Only these columns
    #[arg(long, value_delimiter = ',')]
    pub columns: Vec<String>,

    /// SQL condition placed after WHERE
    #[arg(long = "where")]
    pub condition: Option<String>,

    /// Ignore cached results (`--where` pulls are never cached)
    #[arg(long, conflicts_with = "condition")]
    pub fresh: bool,
}

#[derive(Debug, Args)]
pub struct ExecuteArgs {
    /// SQL statement
    pub sql: String,

    /// Positional parameters, parsed as JSON when possible
    #[arg(long = "param")]
    pub params: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CopyArgs {
    /// Database receiving the copy
    pub target: String,

    /// Table to copy
    pub table: String,

    /// Name of the table in the target database
    #[arg(long = "as")]
    pub new_name: Option<String>,

    /// Case applied to column names: same, upper or lower
    #[arg(long, default_value = "same")]
    pub column_case: ColumnCase,
}

#[derive(Debug, Args)]
pub struct DedupeArgs {
    /// Table name
    pub table: String,

    /// Columns identifying duplicates (all columns by default)
    #[arg(long, value_delimiter = ',')]
    pub by: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ServeArgs {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:3000")]
    pub bind: String,

    /// URL path the API is mounted under
    #[arg(long, default_value = "/db")]
    pub base_path: String,
}

/// Open the database named on the command line
pub async fn open(location: Option<&str>) -> anyhow::Result<Database> {
    let Some(location) = location else {
        bail!("no database given; pass --database or set EASY_DB_DATABASE");
    };
    Database::open(location)
        .await
        .with_context(|| format!("failed to open {}", location))
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn tables(database: &Database) -> anyhow::Result<()> {
    let tables = database.table_names().await?;
    let queries = database.query_names().await?;
    print_json(&json!({ "tables": tables, "queries": queries }))
}

pub async fn columns(database: &Database, args: ColumnsArgs) -> anyhow::Result<()> {
    let columns: serde_json::Map<String, Value> = database
        .columns_and_types(&args.table)
        .await?
        .into_iter()
        .map(|(name, data_type)| (name, Value::String(data_type)))
        .collect();
    print_json(&columns)
}

pub async fn pull(database: &Database, args: PullArgs) -> anyhow::Result<()> {
    let columns: Vec<&str> = args.columns.iter().map(String::as_str).collect();
    let columns = (!columns.is_empty()).then_some(columns.as_slice());

    let rows = match &args.condition {
        Some(condition) => {
            database
                .pull_where(&args.table, condition, &[], columns)
                .await?
        }
        None => {
            let mut options = easy_db::PullOptions::new();
            if let Some(columns) = columns {
                options = options.columns(columns.iter().copied());
            }
            if args.fresh {
                options = options.fresh();
            }
            database.pull_with(&args.table, options).await?
        }
    };
    tracing::info!("{} rows pulled from {}", rows.len(), args.table);
    print_json(&rows)
}

pub async fn execute(database: &Database, args: ExecuteArgs) -> anyhow::Result<()> {
    let params: Vec<Value> = args
        .params
        .iter()
        .map(|param| serde_json::from_str(param).unwrap_or_else(|_| Value::String(param.clone())))
        .collect();
    let result = database.execute(&args.sql, &params).await?;
    print_json(&result)
}

pub async fn copy(database: &Database, args: CopyArgs) -> anyhow::Result<()> {
    let target = Database::open(&args.target)
        .await
        .with_context(|| format!("failed to open copy target {}", args.target))?;
    let copied = target
        .copy_table(database, &args.table, args.new_name.as_deref(), args.column_case)
        .await?;
    target.close().await;
    print_json(&json!({ "copied": copied }))
}

pub async fn dedupe(database: &Database, args: DedupeArgs) -> anyhow::Result<()> {
    let by: Vec<&str> = args.by.iter().map(String::as_str).collect();
    let removed = database
        .delete_duplicates(&args.table, (!by.is_empty()).then_some(by.as_slice()))
        .await?;
    print_json(&json!({ "removed": removed }))
}

pub async fn compact(database: &Database) -> anyhow::Result<()> {
    let before = database.size_bytes().await.ok();
    database.compact().await?;
    let after = database.size_bytes().await.ok();
    print_json(&json!({ "bytesBefore": before, "bytesAfter": after }))
}

pub async fn size(database: &Database) -> anyhow::Result<()> {
    let bytes = database.size_bytes().await?;
    let gigabytes = database.size_gb().await?;
    print_json(&json!({ "bytes": bytes, "gigabytes": gigabytes }))
}

/// Serve the browse API until the process is stopped
pub async fn serve(database: Database, args: ServeArgs) -> anyhow::Result<()> {
    let database = Arc::new(database);

    // EasyDbLayer returns a stateless Router, so merge it after with_state()
    let app = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .with_state(database.clone())
        .merge(EasyDbLayer::new(args.base_path.clone(), database).into_router());

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;

    tracing::info!("server running at http://{}", args.bind);
    tracing::info!("tables available at http://{}{}/api/tables", args.bind, args.base_path);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

async fn root_handler(State(database): State<Arc<Database>>) -> String {
    format!("easy-db serving {}", database)
}

async fn health_handler(
    State(database): State<Arc<Database>>,
) -> Result<(StatusCode, &'static str), StatusCode> {
    database
        .execute("SELECT 1", &[])
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;

    Ok((StatusCode::OK, "Database is reachable"))
}
