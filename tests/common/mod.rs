#![allow(dead_code)]

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use mandiao::embedding::Embedder;
use mandiao::error::{EmbeddingError, LoadError};
use mandiao::loader::{source_name, DocumentLoader};
use mandiao::models::{Document, Page};
use mandiao::store::{TableSpec, VectorStore};

/// Deterministic embedder: hashes text into a fixed-width vector.
pub struct HashEmbedder {
    dims: usize,
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            calls: AtomicUsize::new(0),
            texts: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    pub fn vector(&self, text: &str) -> Vec<f32> {
        (0..self.dims)
            .map(|i| {
                let mut h: u64 = 0xcbf2_9ce4_8422_2325 ^ (i as u64);
                for b in text.bytes() {
                    h ^= b as u64;
                    h = h.wrapping_mul(0x0100_0000_01b3);
                }
                ((h % 2000) as f32 / 1000.0) - 1.0 + 0.0005
            })
            .collect()
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Loader serving in-memory pages, keyed by nothing: every path gets the
/// current page list under the path's file name.
pub struct PagesLoader {
    pages: Mutex<Vec<String>>,
}

impl PagesLoader {
    pub fn new(pages: &[&str]) -> Self {
        Self {
            pages: Mutex::new(pages.iter().map(|s| s.to_string()).collect()),
        }
    }

    pub fn set_pages(&self, pages: &[&str]) {
        *self.pages.lock().unwrap() = pages.iter().map(|s| s.to_string()).collect();
    }
}

impl DocumentLoader for PagesLoader {
    fn load(&self, path: &Path) -> Result<Document, LoadError> {
        let pages = self.pages.lock().unwrap();
        Ok(Document {
            source: source_name(path),
            pages: pages
                .iter()
                .enumerate()
                .map(|(i, text)| Page {
                    number: i as i64,
                    text: text.clone(),
                })
                .collect(),
        })
    }
}

pub async fn open_store(dir: &Path, spec: TableSpec) -> VectorStore {
    VectorStore::open(&dir.join("test.db"), spec).await.unwrap()
}

/// `n` characters of varied text.
pub fn text_of_len(n: usize, seed: u8) -> String {
    (0..n)
        .map(|i| char::from(b'a' + ((i + seed as usize) % 26) as u8))
        .collect()
}
