//! In-memory vector index over knowledge-pool chunks.
//!
//! Records are loaded from a persisted embeddings file (a JSON array of
//! `{content, vector, source_file}` objects) and searched with a flat scan.
//!
//! # Scoring
//!
//! The score is the raw dot product of the query and record vectors, not
//! cosine similarity. Embeddings from the supported providers are unit
//! length, which makes the two equivalent; vectors of differing magnitude
//! will bias the ranking. Callers that need cosine semantics must normalize
//! before indexing.
//!
//! # Scaling
//!
//! Each search is O(n·D) plus an O(n log n) sort. There is no ANN
//! structure, which is fine for tens to low thousands of chunks.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use crate::error::IndexError;
use crate::models::{EmbeddingRecord, ScoredMatch};

/// Immutable collection of embedded chunks with a uniform dimension.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    records: Vec<EmbeddingRecord>,
    dims: usize,
}

impl VectorIndex {
    /// Build an index, rejecting records whose dimension differs from the first.
    pub fn from_records(records: Vec<EmbeddingRecord>) -> Result<Self, IndexError> {
        let dims = records.first().map(|r| r.vector.len()).unwrap_or(0);
        for (index, record) in records.iter().enumerate() {
            if record.vector.len() != dims {
                return Err(IndexError::DimensionMismatch {
                    index,
                    expected: dims,
                    found: record.vector.len(),
                });
            }
        }
        Ok(Self { records, dims })
    }

    /// Load an index from a persisted embeddings JSON file.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        let load_err = |message: String| IndexError::Load {
            path: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let records: Vec<EmbeddingRecord> =
            serde_json::from_str(&content).map_err(|e| load_err(e.to_string()))?;
        Self::from_records(records)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Top-`k` records by descending dot-product score.
    ///
    /// Returns `min(k, len)` matches. Equal scores keep insertion order.
    /// An empty index returns an empty result for any query.
    pub fn search(&self, query: &[f64], k: usize) -> Result<Vec<ScoredMatch>, IndexError> {
        if self.records.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != self.dims {
            return Err(IndexError::QueryDimension {
                expected: self.dims,
                found: query.len(),
            });
        }

        let mut scored: Vec<(usize, f64)> = self
            .records
            .iter()
            .enumerate()
            .map(|(i, r)| (i, dot(query, &r.vector)))
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| {
                let r = &self.records[i];
                ScoredMatch {
                    content: r.content.clone(),
                    score,
                    source: r.source.clone(),
                }
            })
            .collect())
    }

    /// Distinct document names in the index, sorted, with `.json` stripped.
    pub fn sources(&self) -> Vec<String> {
        self.records
            .iter()
            .map(|r| r.source.trim_end_matches(".json").to_string())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Unnormalized dot product.
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

struct CachedIndex {
    modified: Option<SystemTime>,
    index: Arc<VectorIndex>,
}

/// Read-mostly cache of loaded indexes, keyed by file path.
///
/// An entry is reloaded when the file's modification time changes, so a
/// regenerated `merged.json` is picked up without restarting the server.
/// Entries are whole values, so a lock poisoned by a panicking holder still
/// guards a consistent map and is used as is.
#[derive(Default)]
pub struct IndexCache {
    entries: RwLock<HashMap<PathBuf, CachedIndex>>,
}

impl IndexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_load(&self, path: &Path) -> Result<Arc<VectorIndex>, IndexError> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();

        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(cached) = entries.get(path) {
                if cached.modified.is_some() && cached.modified == modified {
                    return Ok(cached.index.clone());
                }
            }
        }

        let index = Arc::new(VectorIndex::load(path)?);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                path.to_path_buf(),
                CachedIndex {
                    modified,
                    index: index.clone(),
                },
            );
        Ok(index)
    }
}
