//! Schema introspection and prompt rendering.
//!
//! [`describe`] reads every user table and column from SQLite's catalog;
//! [`render`] turns a (possibly filtered) [`SchemaDescription`] into the
//! textual context handed to the query generator.
//!
//! Rendering is a pure function of its input. Tables come out in
//! lexicographic order (the `BTreeMap` order) and columns in declaration
//! order, so identical schemas always produce byte-identical context.

use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::{QaError, QaResult};
use crate::models::{ColumnInfo, ColumnType, SchemaDescription};

/// Read table and column metadata from the database catalog.
///
/// Internal `sqlite_*` tables are skipped. Never writes to the store.
pub async fn describe(pool: &SqlitePool) -> QaResult<SchemaDescription> {
    let tables: Vec<String> = sqlx::query(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(|e| QaError::SchemaRead(e.to_string()))?
    .iter()
    .map(|row| row.get::<String, _>("name"))
    .collect();

    let mut schema = SchemaDescription::default();

    for table in tables {
        let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?) ORDER BY cid")
            .bind(&table)
            .fetch_all(pool)
            .await
            .map_err(|e| QaError::SchemaRead(format!("table {}: {}", table, e)))?;

        let columns = rows
            .iter()
            .map(|row| {
                let declared: String = row.try_get("type").unwrap_or_default();
                ColumnInfo {
                    name: row.get("name"),
                    column_type: ColumnType::from_declared(&declared),
                }
            })
            .collect::<Vec<_>>();

        debug!(table = %table, columns = columns.len(), "introspected table");
        schema.tables.insert(table, columns);
    }

    Ok(schema)
}

/// Render a schema as prompt context.
///
/// ```text
/// Table: building_panels
/// Columns:
///   - panel_id (TEXT)
///   - wwr (REAL)
/// ```
///
/// An empty schema renders as `(no tables)`.
pub fn render(schema: &SchemaDescription) -> String {
    if schema.is_empty() {
        return "(no tables)\n".to_string();
    }

    let mut out = String::new();
    for (i, (table, columns)) in schema.tables.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str("Table: ");
        out.push_str(table);
        out.push_str("\nColumns:\n");
        for col in columns {
            out.push_str("  - ");
            out.push_str(&col.name);
            out.push_str(" (");
            out.push_str(col.column_type.as_str());
            out.push_str(")\n");
        }
    }
    out
}
