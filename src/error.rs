//! Error taxonomy for the assistant core.
//!
//! Each component reports failures through its own enum so callers can tell
//! a fatal bootstrap problem from a degraded store or an unreachable
//! embedding service. Errors carry enough context (stage, model id,
//! message) to render a user-facing status line.

use std::path::PathBuf;
use std::time::Duration;

/// Failures while acquiring and placing the runtime executable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InstallationError {
    #[error("download failed after {attempts} attempts: {last_error}")]
    DownloadExhausted { attempts: u32, last_error: String },

    #[error("corrupt archive {}: {reason}", .path.display())]
    CorruptArchive { path: PathBuf, reason: String },

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("runtime executable not found after install (expected {})", .0.display())]
    ExecutableMissing(PathBuf),

    #[error("install command failed: {0}")]
    Command(String),

    #[error("install I/O error: {0}")]
    Io(String),
}

/// Fatal errors of one bootstrap attempt.
///
/// `Clone` because every caller joined to the same in-flight attempt
/// receives the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BootstrapError {
    #[error("installation failed: {0}")]
    Installation(#[from] InstallationError),

    #[error("failed to start runtime: {0}")]
    RuntimeStart(String),

    #[error("failed to pull model {model}: {message}")]
    ModelPull { model: String, message: String },

    #[error("bootstrap task aborted: {0}")]
    Aborted(String),
}

/// Errors from talking to the local model runtime (process or HTTP API).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime executable not found")]
    NotInstalled,

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {status}: {detail}")]
    Exit {
        command: String,
        status: String,
        detail: String,
    },

    #[error("`{command}` produced no output for {idle:?}")]
    Stalled { command: String, idle: Duration },

    #[error("runtime API error: {0}")]
    Api(String),
}

/// Errors from the embedding service. Never retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding service unreachable at {url}: {message}")]
    Unreachable { url: String, message: String },

    #[error("embedding service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected embedding response: {0}")]
    Shape(String),

    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding backend failed: {0}")]
    Backend(String),
}

/// Vector store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector store is degraded: {0}")]
    Degraded(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid table name: {0:?}")]
    InvalidTable(String),

    #[error("stored embedding for {id} is corrupt ({bytes} bytes)")]
    CorruptEmbedding { id: String, bytes: usize },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Document loading failures.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("unsupported document type: {}", .0.display())]
    Unsupported(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("PDF extraction failed: {0}")]
    Pdf(String),
}

/// Errors surfaced by ingestion and retrieval.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors from the collaborator-facing [`Assistant`](crate::assistant::Assistant).
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    #[error("No query provided.")]
    EmptyQuery,

    #[error("{0}")]
    NotReady(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}
