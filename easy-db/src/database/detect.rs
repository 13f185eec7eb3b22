//! Working out which kind of database a location names

use std::path::{Path, PathBuf};

use crate::schema::DbType;
use crate::util;

/// Location string for a private in-memory SQLite database
pub const MEMORY_LOCATION: &str = ":memory:";

/// Environment substitution stops after this many hops
const MAX_ENVIRONMENT_DEPTH: usize = 8;

/// Replace a location that names an environment variable with its value
///
/// Substitution repeats while the value itself names another variable.
pub fn resolve_location(location: &str, resolve_environment: bool) -> String {
    let mut resolved = location.to_string();
    if !resolve_environment {
        return resolved;
    }
    for _ in 0..MAX_ENVIRONMENT_DEPTH {
        match std::env::var(&resolved) {
            Ok(value) if !value.is_empty() && value != resolved => {
                tracing::info!(
                    "{} found as environment variable, substituting database location",
                    resolved
                );
                resolved = value;
            }
            _ => break,
        }
    }
    resolved
}

/// Figure out what kind of database is being used
///
/// Returns `None` when the location is neither an Access path, an ODBC
/// connection string, nor an existing SQLite file.
pub fn detect_db_type(location: &str) -> Option<DbType> {
    let lowered = location.to_ascii_lowercase();
    if location == MEMORY_LOCATION {
        Some(DbType::Sqlite)
    } else if lowered.contains(".accdb") || lowered.contains(".mdb") {
        Some(DbType::Access)
    } else if lowered.contains("dsn=") {
        Some(DbType::SqlServer)
    } else if util::is_sqlite_file(location) {
        Some(DbType::Sqlite)
    } else {
        None
    }
}

/// When an Access file is missing, find the sibling with the other extension
pub fn access_alternative(path: &Path) -> Option<PathBuf> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    let alternative = match extension.as_str() {
        "accdb" => path.with_extension("mdb"),
        "mdb" => path.with_extension("accdb"),
        _ => return None,
    };
    alternative.is_file().then_some(alternative)
}

/// ODBC connection string for an Access database file
pub fn access_connection_string(absolute_path: &Path) -> String {
    format!(
        "Driver={{Microsoft Access Driver (*.mdb, *.accdb)}};Dbq={};",
        absolute_path.display()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension_and_connection_string() {
        assert_eq!(detect_db_type("C:/data/Sales.ACCDB"), Some(DbType::Access));
        assert_eq!(detect_db_type("old.mdb"), Some(DbType::Access));
        assert_eq!(
            detect_db_type("DSN=warehouse;UID=reader"),
            Some(DbType::SqlServer)
        );
        assert_eq!(detect_db_type(MEMORY_LOCATION), Some(DbType::Sqlite));
        assert_eq!(detect_db_type("/home/dsnyder/missing.db"), None);
        assert_eq!(detect_db_type("nothing.txt"), None);
    }

    #[test]
    fn test_resolve_location_follows_environment() {
        std::env::set_var("EASY_DB_DETECT_TEST_OUTER", "EASY_DB_DETECT_TEST_INNER");
        std::env::set_var("EASY_DB_DETECT_TEST_INNER", "/tmp/resolved.db");
        assert_eq!(
            resolve_location("EASY_DB_DETECT_TEST_OUTER", true),
            "/tmp/resolved.db"
        );
        assert_eq!(
            resolve_location("EASY_DB_DETECT_TEST_OUTER", false),
            "EASY_DB_DETECT_TEST_OUTER"
        );
        assert_eq!(resolve_location("plain.db", true), "plain.db");
    }

    #[test]
    fn test_resolve_location_stops_on_cycles() {
        std::env::set_var("EASY_DB_DETECT_TEST_LOOP_A", "EASY_DB_DETECT_TEST_LOOP_B");
        std::env::set_var("EASY_DB_DETECT_TEST_LOOP_B", "EASY_DB_DETECT_TEST_LOOP_A");
        let resolved = resolve_location("EASY_DB_DETECT_TEST_LOOP_A", true);
        assert!(resolved.starts_with("EASY_DB_DETECT_TEST_LOOP_"));
    }

    #[test]
    fn test_access_alternative() {
        let directory = tempfile::tempdir().unwrap();
        let mdb = directory.path().join("legacy.mdb");
        std::fs::write(&mdb, b"").unwrap();
        assert_eq!(
            access_alternative(&directory.path().join("legacy.accdb")),
            Some(mdb)
        );
        assert_eq!(access_alternative(&directory.path().join("other.accdb")), None);
    }

    #[test]
    fn test_access_connection_string() {
        assert_eq!(
            access_connection_string(Path::new("/srv/sales.accdb")),
            "Driver={Microsoft Access Driver (*.mdb, *.accdb)};Dbq=/srv/sales.accdb;"
        );
    }
}
