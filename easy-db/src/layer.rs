//! EasyDbLayer - Axum integration layer
//!
//! Mounts read and query endpoints for a [`Database`] under a base path.

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::api::{
    execute_query_handler, get_rows_handler, get_table_schema_handler, list_tables_handler,
};
use crate::database::Database;

/// Layer exposing a database over HTTP
///
/// # Example
///
/// ```rust,no_run
/// use axum::Router;
/// use easy_db::{Database, EasyDbLayer};
/// use std::sync::Arc;
///
/// # async fn example() -> easy_db::Result<()> {
/// let database = Arc::new(Database::open("inventory.db").await?);
/// let app = Router::new().merge(EasyDbLayer::new("/db", database).into_router());
/// # Ok(())
/// # }
/// ```
pub struct EasyDbLayer {
    base_path: String,
    database: Arc<Database>,
}

impl EasyDbLayer {
    /// Create a new layer at the given base path
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path where the endpoints will be mounted (e.g., "/db")
    /// * `database` - The shared database handle
    pub fn new(base_path: impl Into<String>, database: Arc<Database>) -> Self {
        Self {
            base_path: base_path.into(),
            database,
        }
    }

    /// Convert into an Axum Router that can be merged
    ///
    /// The returned router includes:
    /// - API endpoints at `{base_path}/api/*`
    /// - Permissive CORS middleware for development
    pub fn into_router(self) -> Router {
        let base_path = self.base_path.trim_end_matches('/').to_string();

        // Note: Axum 0.8 uses {param} syntax instead of :param
        let api_router = Router::new()
            .route("/tables", get(list_tables_handler))
            .route("/tables/{name}", get(get_table_schema_handler))
            .route("/tables/{name}/rows", get(get_rows_handler))
            .route("/query", post(execute_query_handler))
            .with_state(self.database);

        Router::new()
            .nest(&format!("{}/api", base_path), api_router)
            .layer(CorsLayer::permissive())
    }
}
