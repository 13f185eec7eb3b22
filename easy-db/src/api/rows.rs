//! Row fetching endpoint

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::{error_response, RowsQuery, RowsResponse, SharedDatabase};
use crate::schema::PullOptions;

/// Handler for GET /api/tables/{name}/rows
///
/// Pulls every row of a table through the handle's pull cache.
///
/// Query parameters:
/// - columns: Comma separated column names (optional, all columns by default)
/// - fresh: `true` to bypass cached results
pub async fn get_rows_handler(
    State(database): State<SharedDatabase>,
    Path(table_name): Path<String>,
    Query(query): Query<RowsQuery>,
) -> Response {
    let mut options = PullOptions::new();
    if let Some(columns) = query.column_list() {
        options = options.columns(columns);
    }
    if query.fresh {
        options = options.fresh();
    }

    match database.pull_with(&table_name, options).await {
        Ok(rows) => {
            let columns = rows
                .first()
                .map(|row| row.keys().cloned().collect())
                .or_else(|| query.column_list())
                .unwrap_or_default();
            let total = rows.len();
            (
                StatusCode::OK,
                Json(RowsResponse {
                    columns,
                    rows,
                    total,
                }),
            )
                .into_response()
        }
        Err(error) => {
            tracing::warn!("Failed to get rows from table '{}': {}", table_name, error);
            error_response(&error)
        }
    }
}
