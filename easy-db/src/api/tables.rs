//! Table listing and schema endpoints

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

use super::{error_response, SharedDatabase, TablesResponse};

/// Handler for GET /api/tables
///
/// Returns the sorted table names and, for Access, the saved queries.
pub async fn list_tables_handler(State(database): State<SharedDatabase>) -> Response {
    let listing = async {
        let tables = database.table_names().await?;
        let queries = database.query_names().await?;
        Ok::<_, crate::DatabaseError>(TablesResponse { tables, queries })
    };

    match listing.await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(error) => {
            tracing::error!("Failed to list tables: {}", error);
            error_response(&error)
        }
    }
}

/// Handler for GET /api/tables/{name}
///
/// Returns the schema information for a specific table including columns,
/// primary keys and indexes.
///
/// # Arguments
///
/// * `database` - Database handle from state
/// * `table_name` - Name of the table to get schema for
pub async fn get_table_schema_handler(
    State(database): State<SharedDatabase>,
    Path(table_name): Path<String>,
) -> Response {
    match database.table_schema(&table_name).await {
        Ok(schema) => (StatusCode::OK, Json(schema)).into_response(),
        Err(error) => {
            tracing::warn!("Failed to get schema for table '{}': {}", table_name, error);
            error_response(&error)
        }
    }
}
