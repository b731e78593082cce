//! SQLite access for the facade measurement database.
//!
//! Databases are always opened read-only: the pipeline only reads the
//! catalog and runs generated `SELECT` statements, and a model-written query
//! must never be able to mutate the store.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::path::Path;

use crate::error::{QaError, QaResult};
use crate::models::{Row as ResultRow, SqlValue};

/// Open an existing SQLite database read-only.
///
/// Fails with [`QaError::SchemaRead`] if the file does not exist or cannot
/// be opened.
pub async fn connect(db_path: &Path) -> QaResult<SqlitePool> {
    if !db_path.exists() {
        return Err(QaError::SchemaRead(format!(
            "database not found: {}",
            db_path.display()
        )));
    }

    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .read_only(true)
        .create_if_missing(false);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| QaError::SchemaRead(e.to_string()))?;

    Ok(pool)
}

/// Run a query and decode every row into dynamically typed values.
///
/// Errors are returned as the database's message so they can be fed back to
/// the repair prompt verbatim.
pub async fn fetch_rows(pool: &SqlitePool, query: &str) -> Result<Vec<ResultRow>, String> {
    let rows = sqlx::query(query)
        .fetch_all(pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) => db_err.message().to_string(),
            other => other.to_string(),
        })?;

    rows.iter().map(decode_row).collect()
}

fn decode_row(row: &SqliteRow) -> Result<ResultRow, String> {
    let mut values = Vec::with_capacity(row.columns().len());
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i).map_err(|e| e.to_string())?;
        if raw.is_null() {
            values.push(SqlValue::Null);
            continue;
        }
        // Storage class of this value, falling back to the column's declared type.
        let type_name = raw.type_info().name().to_ascii_uppercase();
        let value = match type_name.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => {
                SqlValue::Integer(row.try_get::<i64, _>(i).map_err(|e| e.to_string())?)
            }
            "REAL" | "FLOAT" | "DOUBLE" => {
                SqlValue::Real(row.try_get::<f64, _>(i).map_err(|e| e.to_string())?)
            }
            "BLOB" => SqlValue::Blob(row.try_get::<Vec<u8>, _>(i).map_err(|e| e.to_string())?),
            _ => {
                if let Ok(s) = row.try_get::<String, _>(i) {
                    SqlValue::Text(s)
                } else if let Ok(n) = row.try_get::<i64, _>(i) {
                    SqlValue::Integer(n)
                } else if let Ok(r) = row.try_get::<f64, _>(i) {
                    SqlValue::Real(r)
                } else {
                    return Err(format!(
                        "unsupported value type {} in column {}",
                        type_name,
                        column.name()
                    ));
                }
            }
        };
        values.push(value);
    }
    Ok(values)
}
