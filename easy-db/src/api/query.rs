//! Raw SQL query execution endpoint

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::{error_response, QueryRequest, SharedDatabase};

/// Handler for POST /api/query
///
/// Executes a raw SQL statement and returns the results.
///
/// # Security Warning
///
/// This endpoint allows executing ANY SQL statement including INSERT, UPDATE, DELETE.
/// It should only be used in development environments!
///
/// Request body:
/// ```json
/// {
///   "sql": "SELECT * FROM users WHERE id = ?",
///   "params": [7]
/// }
/// ```
///
/// Response (successful SELECT):
/// ```json
/// {
///   "columns": ["id", "name", "email"],
///   "rows": [...],
///   "affectedRows": 0,
///   "executionTimeMilliseconds": 12
/// }
/// ```
///
/// Response (error):
/// ```json
/// {
///   "error": "Database error: near \"SELCT\": syntax error"
/// }
/// ```
pub async fn execute_query_handler(
    State(database): State<SharedDatabase>,
    Json(request): Json<QueryRequest>,
) -> Response {
    tracing::debug!(sql = %request.sql, "executing query from api");

    match database.execute(&request.sql, &request.params).await {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(error) => {
            tracing::warn!("Failed to execute query: {}", error);
            error_response(&error)
        }
    }
}
