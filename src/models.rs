//! Core data models shared by the bootstrap and retrieval halves.
//!
//! These types describe the runtime lifecycle ([`RuntimePhase`],
//! [`RuntimeState`], [`SetupProgress`]) and the records that flow through
//! the ingestion and retrieval pipeline ([`Page`], [`Chunk`], [`ChunkId`],
//! [`VectorRecord`], [`ScoredRecord`]).

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Lifecycle phase of the local model runtime.
///
/// Ordered: a later variant implies every earlier one holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimePhase {
    Uninstalled,
    Installed,
    Running,
    ModelReady,
}

/// Observed runtime state: the phase plus the models confirmed present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuntimeState {
    pub phase: RuntimePhase,
    pub models: BTreeSet<String>,
}

impl RuntimeState {
    pub fn uninstalled() -> Self {
        Self {
            phase: RuntimePhase::Uninstalled,
            models: BTreeSet::new(),
        }
    }
}

/// Coarse stage tag reported in [`SetupProgress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStage {
    Idle,
    Checking,
    Downloading,
    Extracting,
    Installing,
    Starting,
    PullingModel,
    Complete,
    Failed,
}

impl SetupStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetupStage::Idle => "idle",
            SetupStage::Checking => "checking",
            SetupStage::Downloading => "downloading",
            SetupStage::Extracting => "extracting",
            SetupStage::Installing => "installing",
            SetupStage::Starting => "starting",
            SetupStage::PullingModel => "pulling_model",
            SetupStage::Complete => "complete",
            SetupStage::Failed => "failed",
        }
    }
}

impl fmt::Display for SetupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of bootstrap progress. Replaced wholesale on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SetupProgress {
    pub stage: SetupStage,
    /// 0–100, non-decreasing within one bootstrap attempt.
    pub percent: u8,
    pub error: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for SetupProgress {
    fn default() -> Self {
        Self {
            stage: SetupStage::Idle,
            percent: 0,
            error: None,
            updated_at: None,
        }
    }
}

/// One page of extracted document text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Zero-based page number.
    pub number: i64,
    pub text: String,
}

/// A loaded document. Lives only for the duration of one ingestion.
#[derive(Debug, Clone)]
pub struct Document {
    /// Source identifier (file name).
    pub source: String,
    pub pages: Vec<Page>,
}

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

/// Deterministic chunk identity: `source:page:index`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkId(String);

impl ChunkId {
    pub fn new(source: &str, page: i64, index: u32) -> Self {
        Self(format!("{}:{}:{}", source, page, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A window of page text with a position-derived identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub source: String,
    pub page: i64,
    /// Index within `(source, page)`; restarts at 0 when either changes.
    pub index: u32,
    pub text: String,
}

impl Chunk {
    pub fn id(&self) -> ChunkId {
        ChunkId::new(&self.source, self.page, self.index)
    }
}

/// A row of the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: i64,
    pub embedding: Vec<f32>,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &Chunk, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id().into_string(),
            text: chunk.text.clone(),
            source: chunk.source.clone(),
            page: chunk.page,
            embedding,
        }
    }
}

/// A query hit, carrying its distance to the query vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredRecord {
    pub id: String,
    pub text: String,
    pub source: String,
    pub page: i64,
    pub distance: f32,
}
