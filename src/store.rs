//! Content-addressed vector store on SQLite.
//!
//! One table per [`TableSpec`] holding `(id, text, source, page, embedding)`.
//! Embeddings are stored as little-endian `f32` BLOBs and nearest-neighbour
//! search is a brute-force scan computing the distance in Rust, which is
//! plenty for a single-user installation.
//!
//! `id` is unique; [`VectorStore::insert_if_absent`] never overwrites. If the
//! schema cannot be created at open time the store stays constructed but
//! degraded: reads and writes fail with [`StoreError::Degraded`] until a
//! successful [`VectorStore::clear`].

use serde::Deserialize;
use sqlx::{Row, SqlitePool};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use crate::db;
use crate::error::StoreError;
use crate::models::{ScoredRecord, VectorRecord};

/// Distance function used to rank query results. Smaller is closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`; exactly `0.0` for identical vectors.
    #[default]
    Cosine,
    /// Euclidean distance.
    L2,
}

impl DistanceMetric {
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => cosine_distance(a, b),
            DistanceMetric::L2 => l2_distance(a, b),
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or a
/// zero-norm operand.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    // Rounding in the norm product can leave 1 - cos slightly off zero.
    if a == b && !a.is_empty() && a.iter().any(|v| *v != 0.0) {
        return 0.0;
    }
    1.0 - cosine_similarity(a, b)
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Encode a float vector as a little-endian BLOB.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB written by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Whether `name` can be spliced into SQL as a table name: non-empty ASCII
/// letters, digits and `_`, not starting with a digit.
pub fn is_sql_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Table name, embedding width, and metric. Fixed for the table's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub dims: usize,
    pub metric: DistanceMetric,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, dims: usize, metric: DistanceMetric) -> Self {
        Self {
            name: name.into(),
            dims,
            metric,
        }
    }

    /// The document-chunk table: 768 dims, cosine.
    pub fn documents() -> Self {
        Self::new("vec_items", 768, DistanceMetric::Cosine)
    }

    fn validate(&self) -> Result<(), StoreError> {
        if is_sql_identifier(&self.name) {
            Ok(())
        } else {
            Err(StoreError::InvalidTable(self.name.clone()))
        }
    }
}

pub struct VectorStore {
    pool: SqlitePool,
    spec: TableSpec,
    degraded: RwLock<Option<String>>,
}

impl VectorStore {
    /// Open the store at `path` and run [`init`](Self::init).
    ///
    /// Only an invalid table name is an error; a schema failure is logged
    /// and leaves the store degraded.
    pub async fn open(path: &Path, spec: TableSpec) -> Result<Self, StoreError> {
        spec.validate()?;
        let store = Self {
            pool: db::connect(path),
            spec,
            degraded: RwLock::new(None),
        };
        if let Err(e) = store.init().await {
            tracing::warn!(
                table = %store.spec.name,
                path = %path.display(),
                error = %e,
                "vector store unavailable; continuing in degraded mode"
            );
        }
        Ok(store)
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Idempotently create the schema. Clears the degraded flag on success.
    pub async fn init(&self) -> Result<(), StoreError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                text TEXT NOT NULL,
                source TEXT NOT NULL,
                page INTEGER NOT NULL,
                embedding BLOB NOT NULL
            )",
            self.spec.name
        );
        match sqlx::query(&sql).execute(&self.pool).await {
            Ok(_) => {
                self.set_degraded(None);
                Ok(())
            }
            Err(e) => {
                self.set_degraded(Some(e.to_string()));
                Err(StoreError::Database(e))
            }
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_reason().is_some()
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.degraded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_degraded(&self, reason: Option<String>) {
        *self.degraded.write().unwrap_or_else(PoisonError::into_inner) = reason;
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        match self.degraded_reason() {
            Some(reason) => Err(StoreError::Degraded(reason)),
            None => Ok(()),
        }
    }

    /// Insert `record` unless its id is already stored. Returns whether a
    /// row was written.
    pub async fn insert_if_absent(&self, record: &VectorRecord) -> Result<bool, StoreError> {
        self.ensure_available()?;
        if record.embedding.len() != self.spec.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.spec.dims,
                actual: record.embedding.len(),
            });
        }

        let sql = format!(
            "INSERT INTO {} (id, text, source, page, embedding) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO NOTHING",
            self.spec.name
        );
        let result = sqlx::query(&sql)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&record.source)
            .bind(record.page)
            .bind(vec_to_blob(&record.embedding))
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    /// All stored ids, in one round-trip.
    pub async fn existing_ids(&self) -> Result<HashSet<String>, StoreError> {
        self.ensure_available()?;
        let sql = format!("SELECT id FROM {}", self.spec.name);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|row| row.get::<String, _>("id")).collect())
    }

    /// Up to `k` nearest records, ascending by distance. Equal distances
    /// keep insertion order.
    pub async fn query(&self, embedding: &[f32], k: i64) -> Result<Vec<ScoredRecord>, StoreError> {
        if k <= 0 {
            return Ok(Vec::new());
        }
        self.ensure_available()?;
        if embedding.len() != self.spec.dims {
            return Err(StoreError::DimensionMismatch {
                expected: self.spec.dims,
                actual: embedding.len(),
            });
        }

        let sql = format!(
            "SELECT id, text, source, page, embedding FROM {} ORDER BY seq",
            self.spec.name
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut scored = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            if blob.len() % 4 != 0 || stored.len() != self.spec.dims {
                return Err(StoreError::CorruptEmbedding {
                    id,
                    bytes: blob.len(),
                });
            }
            scored.push(ScoredRecord {
                distance: self.spec.metric.distance(embedding, &stored),
                id,
                text: row.get("text"),
                source: row.get("source"),
                page: row.get("page"),
            });
        }

        // sort_by is stable, so ties keep seq order.
        scored.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal));
        scored.truncate(k as usize);
        Ok(scored)
    }

    /// Drop and recreate the table.
    pub async fn clear(&self) -> Result<(), StoreError> {
        let sql = format!("DROP TABLE IF EXISTS {}", self.spec.name);
        if let Err(e) = sqlx::query(&sql).execute(&self.pool).await {
            self.set_degraded(Some(e.to_string()));
            return Err(StoreError::Database(e));
        }
        self.init().await
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        self.ensure_available()?;
        let sql = format!("SELECT COUNT(*) AS n FROM {}", self.spec.name);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await?;
        Ok(row.get("n"))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trip_preserves_bits() {
        let v = vec![0.1f32, -2.5, f32::MIN_POSITIVE, 1e30];
        assert_eq!(blob_to_vec(&vec_to_blob(&v)), v);
    }

    #[test]
    fn identical_vectors_have_zero_distance() {
        let v = [0.3f32, 0.3, 0.3, 0.3];
        assert_eq!(DistanceMetric::Cosine.distance(&v, &v), 0.0);
        assert_eq!(DistanceMetric::L2.distance(&v, &v), 0.0);
    }

    #[test]
    fn cosine_ignores_magnitude() {
        let a = [1.0f32, 0.0];
        let b = [2.0f32, 0.0];
        assert!(DistanceMetric::Cosine.distance(&a, &b).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &[0.0, 1.0]) - 1.0).abs() < 1e-6);
        assert!((DistanceMetric::Cosine.distance(&a, &[-1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn zero_vector_is_maximally_uninformative() {
        let z = [0.0f32; 3];
        assert_eq!(cosine_similarity(&z, &z), 0.0);
        assert_eq!(DistanceMetric::Cosine.distance(&z, &z), 1.0);
    }

    #[test]
    fn l2_is_euclidean() {
        let d = DistanceMetric::L2.distance(&[0.0, 0.0], &[3.0, 4.0]);
        assert!((d - 5.0).abs() < 1e-6);
    }

    #[test]
    fn table_names_are_identifiers() {
        assert!(TableSpec::documents().validate().is_ok());
        assert!(TableSpec::new("demo_4", 4, DistanceMetric::L2).validate().is_ok());
        for bad in ["", "a b", "x;drop", "1abc", "vec-items"] {
            assert!(TableSpec::new(bad, 4, DistanceMetric::L2).validate().is_err(), "{bad}");
        }
    }
}
