//! Knowledge-pool maintenance: PDF embedding and merging.
//!
//! A knowledge pool is a directory of design guides:
//!
//! ```text
//! knowledge_pool/
//! ├── daylight_guide.pdf
//! ├── daylight_guide.txt    # extracted text
//! ├── daylight_guide.json   # [{content, vector}, ...]
//! └── merged.json           # every per-document file, stamped with source_file
//! ```
//!
//! [`build_pdf_embeddings`] produces the `.txt` and `.json` files for every
//! PDF; [`write_merged`] unions the per-document files into the single
//! `merged.json` the server searches.

use anyhow::{Context, Result};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::chunk::chunk_text;
use crate::embedding::Embedder;
use crate::extract::extract_pdf_file;
use crate::models::EmbeddingRecord;

pub const MERGED_FILE: &str = "merged.json";

/// One embedded chunk as stored in a per-document file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkEmbedding {
    pub content: String,
    pub vector: Vec<f64>,
}

/// Summary of a [`build_pdf_embeddings`] run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolReport {
    pub documents: usize,
    pub chunks: usize,
    pub failed: Vec<String>,
}

/// Files directly inside `dir` matching `pattern`, sorted by name.
fn list_files(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let matcher: GlobMatcher = Glob::new(pattern)?.compile_matcher();
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        if matcher.is_match(entry.file_name()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Union every per-document embeddings file in `dir`, stamping each record
/// with its originating file name. `merged.json` itself is skipped.
pub fn merge_embedding_files(dir: &Path) -> Result<Vec<EmbeddingRecord>> {
    let mut merged = Vec::new();
    for path in list_files(dir, "*.json")? {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if file_name == MERGED_FILE {
            continue;
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let chunks: Vec<ChunkEmbedding> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        merged.extend(chunks.into_iter().map(|c| EmbeddingRecord {
            content: c.content,
            vector: c.vector,
            source: file_name.to_string(),
        }));
    }
    Ok(merged)
}

/// Merge `dir` and write `dir/merged.json`. Returns the output path and
/// record count.
pub fn write_merged(dir: &Path) -> Result<(PathBuf, usize)> {
    let records = merge_embedding_files(dir)?;
    let out = dir.join(MERGED_FILE);
    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(&out, json).with_context(|| format!("Failed to write {}", out.display()))?;
    info!(path = %out.display(), records = records.len(), "knowledge pool merged");
    Ok((out, records.len()))
}

/// Extract, chunk, and embed every PDF in `dir`.
///
/// A failure on one document is logged and recorded in the report; the
/// remaining documents are still processed.
pub async fn build_pdf_embeddings(
    dir: &Path,
    embedder: &dyn Embedder,
    batch_size: usize,
) -> Result<PoolReport> {
    let mut report = PoolReport::default();

    for pdf in list_files(dir, "*.pdf")? {
        match embed_pdf(&pdf, embedder, batch_size).await {
            Ok(chunks) => {
                info!(file = %pdf.display(), chunks, "document embedded");
                report.documents += 1;
                report.chunks += chunks;
            }
            Err(e) => {
                warn!(file = %pdf.display(), error = %e, "skipping document");
                report.failed.push(pdf.display().to_string());
            }
        }
    }

    Ok(report)
}

async fn embed_pdf(pdf: &Path, embedder: &dyn Embedder, batch_size: usize) -> Result<usize> {
    let text = extract_pdf_file(pdf)?;
    std::fs::write(pdf.with_extension("txt"), &text)?;

    let chunks = chunk_text(&text);
    let mut embedded = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size.max(1)) {
        let vectors = embedder.embed(batch).await?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }
        embedded.extend(batch.iter().zip(vectors).map(|(content, vector)| ChunkEmbedding {
            content: content.clone(),
            vector,
        }));
    }

    let json = serde_json::to_string_pretty(&embedded)?;
    std::fs::write(pdf.with_extension("json"), json)?;
    Ok(embedded.len())
}
