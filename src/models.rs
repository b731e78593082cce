//! Core data models used throughout facade-rag.
//!
//! These types represent the embedded knowledge chunks, database schema
//! metadata, query rows, and repair-loop attempts that flow through the
//! retrieval pipeline.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

fn unknown_source() -> String {
    "unknown".to_string()
}

/// One embedded chunk of a knowledge-pool document.
///
/// On disk the source field is named `source_file` (the per-document JSON
/// file the chunk was merged from).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub content: String,
    pub vector: Vec<f64>,
    #[serde(rename = "source_file", default = "unknown_source")]
    pub source: String,
}

/// A ranked search hit produced by [`VectorIndex::search`](crate::index::VectorIndex::search).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredMatch {
    pub content: String,
    pub score: f64,
    #[serde(rename = "source_file")]
    pub source: String,
}

/// Declared column storage type, normalized by SQLite affinity rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
}

impl ColumnType {
    /// Normalize a declared SQL type (`"VARCHAR(20)"`, `"BIGINT"`, `""`) to
    /// one of the three supported storage types.
    pub fn from_declared(declared: &str) -> Self {
        let upper = declared.to_ascii_uppercase();
        if upper.contains("INT") {
            ColumnType::Integer
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            ColumnType::Real
        } else {
            ColumnType::Text
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single column in a [`SchemaDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
}

/// Table name → columns in declaration order.
///
/// Tables are kept in a `BTreeMap` so iteration (and therefore rendering)
/// is lexicographic and stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaDescription {
    pub tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl SchemaDescription {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Restrict the schema to the named tables. Unknown names are ignored.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> SchemaDescription {
        let tables = self
            .tables
            .iter()
            .filter(|(name, _)| names.iter().any(|n| n.as_ref() == name.as_str()))
            .map(|(name, cols)| (name.clone(), cols.clone()))
            .collect();
        SchemaDescription { tables }
    }
}

/// A dynamically typed SQLite value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Integer(i) => write!(f, "{}", i),
            SqlValue::Real(r) => write!(f, "{}", r),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            SqlValue::Blob(b) => write!(f, "<blob {} bytes>", b.len()),
        }
    }
}

pub type Row = Vec<SqlValue>;

/// How a single executed query turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Success(Vec<Row>),
    EmptyResult,
    ExecutionError(String),
}

impl AttemptOutcome {
    /// Short description used in repair prompts.
    pub fn describe(&self) -> String {
        match self {
            AttemptOutcome::Success(rows) => format!("returned {} rows", rows.len()),
            AttemptOutcome::EmptyResult => "query returned no rows".to_string(),
            AttemptOutcome::ExecutionError(msg) => msg.clone(),
        }
    }
}

/// One iteration of the repair loop.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryAttempt {
    pub query_text: String,
    pub outcome: AttemptOutcome,
}
