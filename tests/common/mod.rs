//! Shared fixtures: a temporary facade database, knowledge pool, and
//! deterministic providers implementing the public traits.

#![allow(dead_code)]

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use facade_rag::completion::CompletionProvider;
use facade_rag::embedding::Embedder;
use facade_rag::error::ProviderError;

/// Replays replies in order and records every (system, user) prompt.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    pub prompts: Mutex<Vec<(String, String)>>,
    delay: Option<Duration>,
}

impl ScriptedLlm {
    pub fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn slow(replies: &[&str], delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new(replies)
        }
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedLlm {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, ProviderError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.prompts
            .lock()
            .unwrap()
            .push((system.to_string(), user.to_string()));
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Malformed("script exhausted".to_string()))
    }
}

/// Bag-of-keywords embedder: one dimension per keyword.
pub struct KeywordEmbedder;

pub const KEYWORDS: [&str; 3] = ["panel", "unit", "glazing"];

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keywords"
    }

    fn dims(&self) -> usize {
        KEYWORDS.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, ProviderError> {
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                KEYWORDS
                    .iter()
                    .map(|k| if lower.contains(k) { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect())
    }
}

pub struct Fixture {
    pub tmp: TempDir,
    pub db_path: PathBuf,
    pub tables_path: PathBuf,
    pub pool_path: PathBuf,
}

/// Facade database with `panels` and `units`, table descriptions without
/// vectors, and a merged knowledge pool.
pub async fn fixture() -> Fixture {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("facade.db");
    create_facade_db(&db_path).await;

    let tables_path = tmp.path().join("table_descriptions.json");
    std::fs::write(
        &tables_path,
        r#"[
  {"table_name": "panels", "description": "One row per facade panel with orientation and window-to-wall ratio"},
  {"table_name": "units", "description": "Apartment units with level and daylight autonomy"}
]"#,
    )
    .unwrap();

    let pool_path = tmp.path().join("merged.json");
    std::fs::write(
        &pool_path,
        r#"[
  {"content": "Use triple glazing on north facades.", "vector": [0.0, 0.0, 1.0], "source_file": "glazing_guide.json"},
  {"content": "Shade west panels in hot climates.", "vector": [1.0, 0.0, 0.0], "source_file": "shading_guide.json"}
]"#,
    )
    .unwrap();

    Fixture {
        tmp,
        db_path,
        tables_path,
        pool_path,
    }
}

pub async fn create_facade_db(path: &Path) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .journal_mode(SqliteJournalMode::Delete)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options).await.unwrap();
    for stmt in [
        "CREATE TABLE panels (panel_id TEXT, unit_id INTEGER, orientation TEXT, wwr REAL)",
        "CREATE TABLE units (unit_id INTEGER, level INTEGER, sda REAL)",
        "INSERT INTO panels VALUES ('3B_WINDOW9', 187, 'North', 0.45), ('3B_WALL2', 187, 'South', 0.0), ('2A_WINDOW1', 173, 'North', 0.30)",
        "INSERT INTO units VALUES (187, 3, 0.41), (173, 2, 0.62)",
    ] {
        sqlx::query(stmt).execute(&pool).await.unwrap();
    }
    pool.close().await;
}
