//! Embedded table descriptions.
//!
//! A table descriptions file is a JSON array of
//! `{table_name, description, vector?}` objects written by hand. The first
//! time it is loaded the missing vectors are embedded and the file is
//! rewritten with them attached, so later loads need no provider calls.
//!
//! [`TableCatalog::select`] ranks tables against a question vector and is
//! used to narrow the schema context sent to the query generator.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

use crate::embedding::Embedder;
use crate::error::{ProviderError, QaResult};
use crate::index::VectorIndex;
use crate::models::EmbeddingRecord;

/// Human-written description of one database table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescription {
    pub table_name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<Vec<f64>>,
}

/// A table ranked against a question.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMatch {
    pub table_name: String,
    pub description: String,
    pub score: f64,
}

pub struct TableCatalog {
    index: VectorIndex,
}

impl TableCatalog {
    /// Build a catalog from descriptions that all carry vectors.
    pub fn from_descriptions(descriptions: &[TableDescription]) -> QaResult<Self> {
        let records = descriptions
            .iter()
            .filter_map(|d| {
                d.vector.as_ref().map(|v| EmbeddingRecord {
                    content: d.description.clone(),
                    vector: v.clone(),
                    source: d.table_name.clone(),
                })
            })
            .collect();
        Ok(Self {
            index: VectorIndex::from_records(records)?,
        })
    }

    /// Load a descriptions file, embedding and persisting any missing vectors.
    pub async fn load(path: &Path, embedder: &dyn Embedder, batch_size: usize) -> QaResult<Self> {
        let descriptions = read_descriptions(path)?;
        let (descriptions, added) = attach_vectors(descriptions, embedder, batch_size).await?;
        if added > 0 {
            write_descriptions(path, &descriptions)?;
            info!(path = %path.display(), added, "embedded table descriptions");
        }
        Self::from_descriptions(&descriptions)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The `k` tables whose descriptions best match the question vector.
    pub fn select(&self, question_vector: &[f64], k: usize) -> QaResult<Vec<TableMatch>> {
        Ok(self
            .index
            .search(question_vector, k)?
            .into_iter()
            .map(|m| TableMatch {
                table_name: m.source,
                description: m.content,
                score: m.score,
            })
            .collect())
    }
}

pub fn read_descriptions(path: &Path) -> QaResult<Vec<TableDescription>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

static WRITE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Replace the descriptions file in one step. Each writer stages into its
/// own sibling temp file, so readers and concurrent writers only ever see a
/// complete file.
fn write_descriptions(path: &Path, descriptions: &[TableDescription]) -> QaResult<()> {
    let json = serde_json::to_string_pretty(descriptions)?;
    let tmp = path.with_extension(format!(
        "json.{}.{}.tmp",
        std::process::id(),
        WRITE_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&tmp, json)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}

/// Embed every description that has no vector yet. Returns the updated
/// descriptions and how many vectors were added.
pub async fn attach_vectors(
    mut descriptions: Vec<TableDescription>,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> QaResult<(Vec<TableDescription>, usize)> {
    let missing: Vec<usize> = descriptions
        .iter()
        .enumerate()
        .filter(|(_, d)| d.vector.is_none())
        .map(|(i, _)| i)
        .collect();

    for chunk in missing.chunks(batch_size.max(1)) {
        let texts: Vec<String> = chunk
            .iter()
            .map(|&i| descriptions[i].description.clone())
            .collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(ProviderError::Malformed(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            ))
            .into());
        }
        for (&i, vector) in chunk.iter().zip(vectors) {
            descriptions[i].vector = Some(vector);
        }
    }

    Ok((descriptions, missing.len()))
}

/// Embed missing vectors in a descriptions file and rewrite it.
/// Returns the number of vectors added.
pub async fn embed_descriptions_file(
    path: &Path,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> QaResult<usize> {
    let descriptions = read_descriptions(path)?;
    let (descriptions, added) = attach_vectors(descriptions, embedder, batch_size).await?;
    if added > 0 {
        write_descriptions(path, &descriptions)?;
    }
    Ok(added)
}
