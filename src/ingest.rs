//! Ingestion pipeline: load → chunk → dedup → embed → store.
//!
//! Chunk ids are positional (`source:page:index`), so the set of ids already
//! in the store is fetched once per document and only chunks with unseen ids
//! are embedded. Re-ingesting an unchanged document therefore costs one id
//! scan and zero embedding calls.

use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::chunk::split_document;
use crate::config::Config;
use crate::embedding::{embed_batched, Embedder};
use crate::error::{LoadError, PipelineError};
use crate::loader::{is_supported, DocumentLoader};
use crate::models::VectorRecord;
use crate::store::VectorStore;

#[derive(Debug, Clone, Copy)]
pub struct IngestSettings {
    pub window_chars: usize,
    pub overlap_chars: usize,
    pub batch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            window_chars: 800,
            overlap_chars: 80,
            batch_size: 16,
        }
    }
}

impl IngestSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_chars: config.chunking.window_chars,
            overlap_chars: config.chunking.overlap_chars,
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct IngestReport {
    pub source: String,
    pub pages: usize,
    pub chunks: usize,
    /// Chunks whose id was already stored.
    pub skipped: usize,
    pub inserted: usize,
}

/// Ingest one file. Returns counts; `inserted` is the number of new chunks.
pub async fn ingest_path(
    store: &VectorStore,
    embedder: &dyn Embedder,
    loader: &dyn DocumentLoader,
    settings: IngestSettings,
    path: &Path,
) -> Result<IngestReport, PipelineError> {
    let doc = loader.load(path)?;
    let chunks = split_document(&doc, settings.window_chars, settings.overlap_chars);

    let existing = store.existing_ids().await?;
    let candidates: Vec<_> = chunks
        .iter()
        .filter(|c| !existing.contains(c.id().as_str()))
        .collect();

    let mut report = IngestReport {
        source: doc.source.clone(),
        pages: doc.page_count(),
        chunks: chunks.len(),
        skipped: chunks.len() - candidates.len(),
        inserted: 0,
    };
    if candidates.is_empty() {
        tracing::info!(source = %doc.source, chunks = chunks.len(), "nothing new to ingest");
        return Ok(report);
    }

    let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_batched(embedder, &texts, settings.batch_size).await?;

    for (chunk, vector) in candidates.into_iter().zip(vectors) {
        let record = VectorRecord::from_chunk(chunk, vector);
        if store.insert_if_absent(&record).await? {
            report.inserted += 1;
        }
    }

    tracing::info!(
        source = %report.source,
        pages = report.pages,
        chunks = report.chunks,
        inserted = report.inserted,
        "ingested document"
    );
    Ok(report)
}

/// Supported files under `path` in a stable order. A file path yields itself.
pub fn collect_files(path: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !path.exists() {
        return Err(LoadError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file or directory"),
        });
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_supported(e.path()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    Ok(files)
}

/// Ingest a file or every supported file in a directory.
///
/// Unsupported or unreadable files inside a directory are skipped with a
/// warning; embedding and store failures abort.
pub async fn ingest_tree(
    store: &VectorStore,
    embedder: &dyn Embedder,
    loader: &dyn DocumentLoader,
    settings: IngestSettings,
    path: &Path,
) -> Result<Vec<IngestReport>, PipelineError> {
    if path.is_file() {
        return Ok(vec![ingest_path(store, embedder, loader, settings, path).await?]);
    }

    let mut reports = Vec::new();
    for file in collect_files(path)? {
        match ingest_path(store, embedder, loader, settings, &file).await {
            Ok(report) => reports.push(report),
            Err(PipelineError::Load(e)) => {
                tracing::warn!(path = %file.display(), error = %e, "skipping document");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("b.md"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join("sub/c.pdf"), "c").unwrap();
        std::fs::write(dir.path().join("skip.png"), "x").unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().display().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md", "sub/c.pdf"]);
    }

    #[test]
    fn collect_files_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        assert!(collect_files(&dir.path().join("nope")).is_err());
    }
}
