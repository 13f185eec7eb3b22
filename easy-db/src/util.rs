//! Helpers for file detection, identifier hygiene and row cleaning

use serde_json::{Number, Value};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::schema::{ColumnType, Row};

/// Size of the SQLite database header, and the smallest valid database file
const SQLITE_HEADER_LENGTH: u64 = 100;

const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

const SQLITE_EXTENSIONS: &[&str] = &["db", "sqlite", "sqlite3", "db3"];

/// Keywords that never belong inside an identifier we interpolate into SQL
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "drop", "delete", "insert", "update", "alter", "truncate", "exec", "union", "create",
    "attach", "detach",
];

/// Leading keywords of statements that only read
const READ_KEYWORDS: &[&str] = &["SELECT", "PRAGMA", "VALUES", "EXPLAIN"];

/// Keywords that can follow the common table expressions of a `WITH` clause
const MAIN_KEYWORDS: &[&str] = &["SELECT", "VALUES", "INSERT", "REPLACE", "UPDATE", "DELETE"];

/// Upper-cased words of `sql` outside parentheses, quoted text and comments
fn top_level_words(sql: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut depth = 0usize;
    let mut characters = sql.chars().peekable();

    while let Some(character) = characters.next() {
        match character {
            '\'' | '"' | '`' | '[' => {
                let closing = if character == '[' { ']' } else { character };
                for inner in characters.by_ref() {
                    if inner == closing {
                        break;
                    }
                }
            }
            '-' if characters.peek() == Some(&'-') => {
                for inner in characters.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
            }
            '/' if characters.peek() == Some(&'*') => {
                characters.next();
                let mut previous = ' ';
                for inner in characters.by_ref() {
                    if previous == '*' && inner == '/' {
                        break;
                    }
                    previous = inner;
                }
            }
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if depth == 0 && (c.is_ascii_alphanumeric() || c == '_') => {
                word.push(c.to_ascii_uppercase());
                continue;
            }
            _ => {}
        }
        if !word.is_empty() {
            words.push(std::mem::take(&mut word));
        }
    }
    if !word.is_empty() {
        words.push(word);
    }
    words
}

/// The keyword that decides what a statement does
///
/// For `WITH` statements this is the statement after the table expressions.
fn statement_keyword(words: &[String]) -> Option<&str> {
    let first = words.first()?;
    if first != "WITH" {
        return Some(first.as_str());
    }
    words[1..]
        .iter()
        .map(String::as_str)
        .find(|word| MAIN_KEYWORDS.contains(word))
}

/// Check whether a statement only reads and leaves data and schema alone
pub fn is_read_statement(sql: &str) -> bool {
    let words = top_level_words(sql);
    statement_keyword(&words)
        .map(|keyword| READ_KEYWORDS.contains(&keyword))
        .unwrap_or(false)
}

/// Check whether a statement produces a result set
///
/// Reads do, and so do writes carrying a `RETURNING` clause.
pub fn returns_rows(sql: &str) -> bool {
    let words = top_level_words(sql);
    match statement_keyword(&words) {
        Some(keyword) if READ_KEYWORDS.contains(&keyword) => true,
        Some(_) => words.iter().any(|word| word == "RETURNING"),
        None => false,
    }
}

/// Check whether `path` is a SQLite database file by reading its header
pub fn is_sqlite_file(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() && metadata.len() >= SQLITE_HEADER_LENGTH => {}
        _ => return false,
    }

    let mut header = [0u8; 16];
    File::open(path)
        .and_then(|mut file| file.read_exact(&mut header))
        .map(|_| &header == SQLITE_MAGIC)
        .unwrap_or(false)
}

/// Check whether `path` carries one of the usual SQLite file extensions
pub fn has_sqlite_extension(path: impl AsRef<Path>) -> bool {
    path.as_ref()
        .extension()
        .and_then(|extension| extension.to_str())
        .map(|extension| {
            SQLITE_EXTENSIONS
                .iter()
                .any(|known| extension.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Check that a table or column name is safe to place in a SQL statement
///
/// Only ASCII letters, digits, underscores and spaces are accepted, and no
/// word of the name may be a destructive SQL keyword.
pub fn is_clean_name(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    if !name
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || character == '_' || character == ' ')
    {
        return false;
    }
    !name.split_whitespace().any(|word| {
        DESTRUCTIVE_KEYWORDS
            .iter()
            .any(|keyword| word.eq_ignore_ascii_case(keyword))
    })
}

/// Turn an arbitrary key into a usable column name
///
/// Whitespace, `/`, `-` and `.` become underscores; any other character
/// outside `[A-Za-z0-9_]` is dropped.
pub fn clean_column_name(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|character| match character {
            c if c.is_ascii_alphanumeric() || c == '_' => Some(c),
            c if c.is_whitespace() || c == '/' || c == '-' || c == '.' => Some('_'),
            _ => None,
        })
        .collect()
}

/// Rebuild `row` with exactly the given columns, coercing values to their types
///
/// Missing columns become NULL and keys that are not table columns are dropped.
pub fn clean_row(row: &Row, columns: &[(String, ColumnType)]) -> Row {
    columns
        .iter()
        .map(|(name, column_type)| {
            let value = row.get(name).cloned().unwrap_or(Value::Null);
            (name.clone(), coerce_value(value, *column_type))
        })
        .collect()
}

/// Coerce a value towards a column type, leaving it unchanged when no
/// sensible conversion exists
pub fn coerce_value(value: Value, column_type: ColumnType) -> Value {
    match (value, column_type) {
        (Value::Null, _) => Value::Null,

        (Value::String(text), ColumnType::Text) => Value::String(text),
        (Value::Number(number), ColumnType::Text) => Value::String(number.to_string()),
        (Value::Bool(flag), ColumnType::Text) => Value::String(flag.to_string()),

        (Value::String(text), ColumnType::Integer | ColumnType::Real) if text.trim().is_empty() => {
            Value::Null
        }
        (Value::String(text), ColumnType::Integer) => match text.trim().parse::<i64>() {
            Ok(integer) => Value::from(integer),
            Err(_) => match text.trim().parse::<f64>() {
                Ok(real) => integral_or_real(real),
                Err(_) => Value::String(text),
            },
        },
        (Value::Number(number), ColumnType::Integer) => match number.as_f64() {
            Some(real) if !number.is_i64() && !number.is_u64() => integral_or_real(real),
            _ => Value::Number(number),
        },
        (Value::Bool(flag), ColumnType::Integer) => Value::from(i64::from(flag)),

        (Value::String(text), ColumnType::Real) => match text.trim().parse::<f64>() {
            Ok(real) => real_value(real),
            Err(_) => Value::String(text),
        },
        (Value::Number(number), ColumnType::Real) => match number.as_f64() {
            Some(real) => real_value(real),
            None => Value::Number(number),
        },
        (Value::Bool(flag), ColumnType::Real) => real_value(if flag { 1.0 } else { 0.0 }),

        (Value::String(text), ColumnType::Boolean) => {
            match text.trim().to_ascii_lowercase().as_str() {
                "" => Value::Null,
                "true" | "t" | "yes" | "y" | "1" => Value::Bool(true),
                "false" | "f" | "no" | "n" | "0" => Value::Bool(false),
                _ => Value::String(text),
            }
        }
        (Value::Number(number), ColumnType::Boolean) => {
            Value::Bool(number.as_f64().map(|real| real != 0.0).unwrap_or(true))
        }

        (Value::String(text), ColumnType::DateTime | ColumnType::Date | ColumnType::Blob)
            if text.trim().is_empty() =>
        {
            Value::Null
        }

        (value @ (Value::Array(_) | Value::Object(_)), _) => Value::String(value.to_string()),
        (value, _) => value,
    }
}

fn integral_or_real(real: f64) -> Value {
    if real.fract() == 0.0 && real >= i64::MIN as f64 && real <= i64::MAX as f64 {
        Value::from(real as i64)
    } else {
        real_value(real)
    }
}

fn real_value(real: f64) -> Value {
    Number::from_f64(real).map(Value::Number).unwrap_or(Value::Null)
}

/// Infer a column type for every key of the first row
///
/// Each column takes the type of its first non-null value across all rows,
/// or `Text` when every value is null.
pub fn infer_column_types(rows: &[Row]) -> Vec<(String, ColumnType)> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    first
        .keys()
        .map(|name| {
            let column_type = rows
                .iter()
                .filter_map(|row| row.get(name))
                .find(|value| !value.is_null())
                .map(ColumnType::infer)
                .unwrap_or(ColumnType::Text);
            (name.clone(), column_type)
        })
        .collect()
}
