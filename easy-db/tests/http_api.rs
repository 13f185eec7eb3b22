//! Tests of the browse API router driven without a network listener

#![cfg(feature = "http")]

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use easy_db::{AppendOptions, Database, EasyDbLayer};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

async fn router() -> Router {
    let database = Database::open(":memory:").await.unwrap();
    let rows = json!([
        {"id": 1, "name": "alpha", "score": 0.5},
        {"id": 2, "name": "beta", "score": 1.5}
    ]);
    let rows = rows
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row.as_object().unwrap().clone())
        .collect();
    database
        .append("PLAYERS", rows, AppendOptions::default())
        .await
        .unwrap();
    EasyDbLayer::new("/db", Arc::new(database)).into_router()
}

async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn test_list_tables() {
    let (status, body) = send(router().await, get("/db/api/tables")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"tables": ["PLAYERS"], "queries": []}));
}

#[tokio::test]
async fn test_table_schema() {
    let (status, body) = send(router().await, get("/db/api/tables/PLAYERS")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("PLAYERS"));
    let names: Vec<&str> = body["columns"]
        .as_array()
        .unwrap()
        .iter()
        .map(|column| column["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["id", "name", "score"]);
    assert_eq!(body["columns"][0]["dataType"], json!("INTEGER"));
}

#[tokio::test]
async fn test_missing_table_is_not_found() {
    let (status, body) = send(router().await, get("/db/api/tables/NOPE")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("NOPE"));
}

#[tokio::test]
async fn test_rows_with_column_selection() {
    let (status, body) = send(
        router().await,
        get("/db/api/tables/PLAYERS/rows?columns=name,id&fresh=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], json!(2));
    assert_eq!(body["columns"], json!(["name", "id"]));
    assert_eq!(body["rows"][1], json!({"name": "beta", "id": 2}));
}

#[tokio::test]
async fn test_rows_rejects_unclean_table_name() {
    let (status, body) = send(
        router().await,
        get("/db/api/tables/drop/rows"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_query_endpoint() {
    let (status, body) = send(
        router().await,
        post_json(
            "/db/api/query",
            json!({"sql": "SELECT name FROM PLAYERS WHERE score > ?", "params": [1.0]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["columns"], json!(["name"]));
    assert_eq!(body["rows"], json!([{"name": "beta"}]));

    let (status, body) = send(
        router().await,
        post_json("/db/api/query", json!({"sql": "SELCT 1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("syntax error"));
}
