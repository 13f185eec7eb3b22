//! Tests of the `Database` handle over ODBC
//!
//! They need a driver and a scratch database: set `EASY_DB_TEST_DSN` to an
//! ODBC connection string (`DSN=...`) or an Access file path. Without it
//! every test returns early.

#![cfg(feature = "access")]

use easy_db::{AppendOptions, ColumnType, Database, DbType, OpenOptions, PullOptions, Row};
use serde_json::{json, Value};

fn rows(value: Value) -> Vec<Row> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Object(map) => map,
                other => panic!("expected an object, got {}", other),
            })
            .collect(),
        other => panic!("expected an array, got {}", other),
    }
}

async fn odbc_database() -> Option<Database> {
    let Ok(location) = std::env::var("EASY_DB_TEST_DSN") else {
        eprintln!("EASY_DB_TEST_DSN is not set, skipping");
        return None;
    };
    let options = OpenOptions::new().resolve_environment(false);
    Some(Database::open_with(&location, options).await.unwrap())
}

#[tokio::test]
async fn test_update_counts_changed_rows() {
    let Some(database) = odbc_database().await else {
        return;
    };
    database.drop_table("EASY_DB_UPDATES").await.unwrap();
    database
        .create_table(
            "EASY_DB_UPDATES",
            [("id", ColumnType::Integer), ("label", ColumnType::Text)],
            false,
        )
        .await
        .unwrap();
    let inserted = database
        .append(
            "EASY_DB_UPDATES",
            rows(json!([{"id": 1, "label": "a"}, {"id": 2, "label": "b"}, {"id": 3, "label": "c"}])),
            AppendOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(inserted, 3);

    let updated = database
        .update(
            "EASY_DB_UPDATES",
            "id",
            &[json!(1), json!(2), json!(99)],
            "label",
            &[json!("x")],
        )
        .await
        .unwrap();
    assert_eq!(updated, 2);
    database.drop_table("EASY_DB_UPDATES").await.unwrap();
}

#[tokio::test]
async fn test_long_text_and_binary_values() {
    let Some(database) = odbc_database().await else {
        return;
    };
    let long_text_type = match database.db_type() {
        DbType::Access => "MEMO",
        _ => "NVARCHAR(MAX)",
    };
    database.drop_table("EASY_DB_NOTES").await.unwrap();
    database
        .execute(
            &format!(
                "CREATE TABLE EASY_DB_NOTES (id INTEGER, body {}, payload {})",
                long_text_type,
                database.db_type().sql_type(ColumnType::Blob)
            ),
            &[],
        )
        .await
        .unwrap();

    let body = "lorem ipsum ".repeat(2_000);
    database
        .append(
            "EASY_DB_NOTES",
            rows(json!([{"id": 1, "body": body, "payload": "AAEC/w=="}])),
            AppendOptions::default(),
        )
        .await
        .unwrap();

    let data = database.pull("EASY_DB_NOTES").await.unwrap();
    assert_eq!(data[0]["body"], json!(body));
    assert_eq!(data[0]["payload"], json!("AAEC/w=="));
    database.drop_table("EASY_DB_NOTES").await.unwrap();
}

#[tokio::test]
async fn test_key_columns() {
    let Some(database) = odbc_database().await else {
        return;
    };
    database.drop_table("EASY_DB_KEYED").await.unwrap();
    database
        .execute(
            "CREATE TABLE EASY_DB_KEYED (id INTEGER NOT NULL, part VARCHAR(10) NOT NULL, name VARCHAR(50), \
             CONSTRAINT pk_easy_db_keyed PRIMARY KEY (id, part))",
            &[],
        )
        .await
        .unwrap();

    let key = database.key_columns("EASY_DB_KEYED").await.unwrap();
    // The Access driver does not implement SQLPrimaryKeys
    if database.db_type() == DbType::Access {
        assert!(key.is_empty() || key == vec!["id", "part"]);
    } else {
        assert_eq!(key, vec!["id", "part"]);
    }
    database.drop_table("EASY_DB_KEYED").await.unwrap();
}

#[tokio::test]
async fn test_delete_duplicates() {
    let Some(database) = odbc_database().await else {
        return;
    };
    database.drop_table("EASY_DB_DUPLICATES").await.unwrap();
    database
        .append(
            "EASY_DB_DUPLICATES",
            rows(json!([
                {"name": "cat", "legs": 4},
                {"name": "cat", "legs": 4},
                {"name": "bird", "legs": 2},
            ])),
            AppendOptions::default(),
        )
        .await
        .unwrap();

    let removed = database
        .delete_duplicates("EASY_DB_DUPLICATES", None)
        .await
        .unwrap();
    assert_eq!(removed, 1);
    let data = database
        .pull_with("EASY_DB_DUPLICATES", PullOptions::new().fresh())
        .await
        .unwrap();
    assert_eq!(data.len(), 2);
    database.drop_table("EASY_DB_DUPLICATES").await.unwrap();
}
