//! REST API endpoints
//!
//! This module contains the endpoint handlers for browsing a [`Database`]
//! over HTTP, plus the request and response payloads they exchange.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::database::{Database, DatabaseError};
use crate::schema::Row;

pub mod query;
pub mod rows;
pub mod tables;

// Re-export handlers for convenience
pub use query::execute_query_handler;
pub use rows::get_rows_handler;
pub use tables::{get_table_schema_handler, list_tables_handler};

/// Router state shared by every handler
pub type SharedDatabase = Arc<Database>;

/// Response for GET /api/tables
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablesResponse {
    /// Sorted table names
    pub tables: Vec<String>,

    /// Saved select queries (Access only)
    pub queries: Vec<String>,
}

/// Query string for GET /api/tables/{name}/rows
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsQuery {
    /// Comma separated column names
    pub columns: Option<String>,

    /// Skip the pull cache
    #[serde(default)]
    pub fresh: bool,
}

impl RowsQuery {
    pub fn column_list(&self) -> Option<Vec<String>> {
        self.columns.as_ref().map(|columns| {
            columns
                .split(',')
                .map(str::trim)
                .filter(|column| !column.is_empty())
                .map(String::from)
                .collect()
        })
    }
}

/// Response for GET /api/tables/{name}/rows
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowsResponse {
    /// Column names of the returned rows
    pub columns: Vec<String>,

    pub rows: Vec<Row>,

    /// Number of rows returned
    pub total: usize,
}

/// Request body for POST /api/query
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// SQL statement to execute
    pub sql: String,

    /// Positional parameters for `?` placeholders
    #[serde(default)]
    pub params: Vec<Value>,
}

/// HTTP status for a database error
pub fn error_status(error: &DatabaseError) -> StatusCode {
    match error {
        DatabaseError::TableNotFound(_) | DatabaseError::FileNotFound { .. } => {
            StatusCode::NOT_FOUND
        }
        DatabaseError::InvalidName(_)
        | DatabaseError::InvalidColumn { .. }
        | DatabaseError::ColumnExists { .. }
        | DatabaseError::TableExists(_)
        | DatabaseError::ColumnMismatch { .. }
        | DatabaseError::LengthMismatch { .. }
        | DatabaseError::NoColumns(_)
        | DatabaseError::UnknownColumnType(_)
        | DatabaseError::Query(_) => StatusCode::BAD_REQUEST,
        DatabaseError::Unsupported { .. } => StatusCode::NOT_IMPLEMENTED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// JSON `{ "error": message }` response for a database error
pub fn error_response(error: &DatabaseError) -> Response {
    (
        error_status(error),
        Json(serde_json::json!({
            "error": error.to_string()
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::DbType;

    #[test]
    fn test_error_status() {
        assert_eq!(
            error_status(&DatabaseError::TableNotFound("t".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            error_status(&DatabaseError::InvalidName("drop".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&DatabaseError::Unsupported {
                operation: "compact",
                db_type: DbType::Access
            }),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            error_status(&DatabaseError::Serialization("bad".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_rows_query_column_list() {
        let query = RowsQuery {
            columns: Some("row_id, value_1,,".to_string()),
            fresh: false,
        };
        assert_eq!(
            query.column_list(),
            Some(vec!["row_id".to_string(), "value_1".to_string()])
        );
        assert_eq!(RowsQuery::default().column_list(), None);
    }
}
