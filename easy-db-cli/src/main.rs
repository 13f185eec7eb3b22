//! easy-db CLI
//!
//! Command-line interface for inspecting and maintaining SQLite and Access databases

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "easy-db")]
#[command(about = "easy-db - One handle for SQLite and Access databases", long_about = None)]
struct Cli {
    /// Database location: SQLite path, Access path, ODBC connection string or env variable name
    #[arg(long, short, global = true, env = "EASY_DB_DATABASE")]
    database: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List tables (and Access saved queries)
    Tables,
    /// Show column names and types of a table
    Columns(commands::ColumnsArgs),
    /// Print the rows of a table as JSON
    Pull(commands::PullArgs),
    /// Execute one SQL statement
    Execute(commands::ExecuteArgs),
    /// Copy a table into another database
    Copy(commands::CopyArgs),
    /// Delete duplicate rows from a table
    Dedupe(commands::DedupeArgs),
    /// Compact the database file
    Compact,
    /// Print the database file size
    Size,
    /// Serve the browse API over HTTP
    Serve(commands::ServeArgs),
}

#[tokio::main]
async fn main() {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        eprintln!("Error: {:#}", error);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let database = commands::open(cli.database.as_deref()).await?;

    let result = match cli.command {
        Commands::Tables => commands::tables(&database).await,
        Commands::Columns(args) => commands::columns(&database, args).await,
        Commands::Pull(args) => commands::pull(&database, args).await,
        Commands::Execute(args) => commands::execute(&database, args).await,
        Commands::Copy(args) => commands::copy(&database, args).await,
        Commands::Dedupe(args) => commands::dedupe(&database, args).await,
        Commands::Compact => commands::compact(&database).await,
        Commands::Size => commands::size(&database).await,
        Commands::Serve(args) => return commands::serve(database, args).await,
    };

    database.close().await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pull_with_options() {
        let cli = Cli::try_parse_from([
            "easy-db",
            "--database",
            "data.db",
            "pull",
            "TEST_TABLE",
            "--columns",
            "row_id,value_1",
        ])
        .unwrap();
        assert_eq!(cli.database.as_deref(), Some("data.db"));
        match cli.command {
            Commands::Pull(args) => {
                assert_eq!(args.table, "TEST_TABLE");
                assert_eq!(args.columns, vec!["row_id", "value_1"]);
                assert!(args.condition.is_none());
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_pull_fresh_conflicts_with_where() {
        let cli = Cli::try_parse_from(["easy-db", "pull", "TEST_TABLE", "--fresh"]).unwrap();
        match cli.command {
            Commands::Pull(args) => assert!(args.fresh),
            other => panic!("unexpected command: {:?}", other),
        }

        let error = Cli::try_parse_from([
            "easy-db",
            "pull",
            "TEST_TABLE",
            "--where",
            "row_id > 3",
            "--fresh",
        ])
        .unwrap_err();
        assert_eq!(error.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn test_parse_copy_column_case() {
        let cli = Cli::try_parse_from([
            "easy-db",
            "copy",
            "backup.db",
            "STOCK",
            "--as",
            "STOCK_COPY",
            "--column-case",
            "upper",
            "-d",
            "main.db",
        ])
        .unwrap();
        match cli.command {
            Commands::Copy(args) => {
                assert_eq!(args.target, "backup.db");
                assert_eq!(args.new_name.as_deref(), Some("STOCK_COPY"));
                assert_eq!(args.column_case, easy_db::ColumnCase::Upper);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_column_case() {
        assert!(Cli::try_parse_from([
            "easy-db",
            "copy",
            "backup.db",
            "STOCK",
            "--column-case",
            "sideways"
        ])
        .is_err());
    }

    #[test]
    fn test_parse_serve_defaults() {
        let cli = Cli::try_parse_from(["easy-db", "serve"]).unwrap();
        match cli.command {
            Commands::Serve(args) => {
                assert_eq!(args.bind, "127.0.0.1:3000");
                assert_eq!(args.base_path, "/db");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
