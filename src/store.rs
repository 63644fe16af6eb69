//! Document store: vector index + metadata, kept in lockstep.
//!
//! Pairs the in-memory [`VectorIndex`] with a SQLite metadata table so that
//! offset `i` in the index always describes the same chunk as the metadata
//! row with `slot_index = i`. All mutating operations take the single
//! exclusive index lock, so add/clear are serialized with respect to every
//! other operation on the same instance.
//!
//! The add path is ordered so the invariant
//! `vector count == metadata count` holds on every return path: vectors are
//! appended in memory and persisted to disk while the metadata transaction
//! is still open; any failure truncates the in-memory append and rolls the
//! transaction back together.

use sha2::{Digest, Sha256};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::Mutex;

use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::{DocumentRecord, IndexStats};

pub struct DocumentStore {
    pool: SqlitePool,
    index: Mutex<VectorIndex>,
    vector_path: PathBuf,
    dims: usize,
}

impl DocumentStore {
    /// Open (or create) the store: connect SQLite, run migrations, load the
    /// vector file, and reconcile the two sides if a crash left them
    /// diverged.
    pub async fn open(cfg: &StorageConfig, dims: usize) -> Result<Self> {
        if let Some(parent) = cfg.metadata_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}", cfg.metadata_path.display()))
                .map_err(Error::Storage)?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        migrate(&pool).await?;

        let mut index = VectorIndex::load(&cfg.vector_path, dims)?;
        reconcile(&pool, &mut index, &cfg.vector_path).await?;

        Ok(Self {
            pool,
            index: Mutex::new(index),
            vector_path: cfg.vector_path.clone(),
            dims,
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn count(&self) -> usize {
        self.index.lock().await.count()
    }

    /// Add a batch of chunks with their embeddings.
    ///
    /// Chunks whose `(source, content)` pair is already indexed are not
    /// appended again; their metadata row just gets an `updated_at` bump.
    /// Repeated ingestion of identical content is therefore idempotent at
    /// the storage layer. Returns the number of vectors actually appended.
    pub async fn add(&self, contents: &[String], vectors: &[Vec<f32>], source: &str) -> Result<usize> {
        if contents.len() != vectors.len() {
            return Err(Error::LengthMismatch {
                vectors: vectors.len(),
                records: contents.len(),
            });
        }
        if contents.is_empty() {
            return Ok(0);
        }

        let mut index = self.index.lock().await;
        let rollback_len = index.count();
        let now = chrono::Utc::now().timestamp();

        let mut tx = self.pool.begin().await?;
        let mut appended = 0usize;

        for (content, vector) in contents.iter().zip(vectors.iter()) {
            let exists: Option<i64> = sqlx::query_scalar(
                "SELECT slot_index FROM documents WHERE source = ? AND content = ?",
            )
            .bind(source)
            .bind(content)
            .fetch_optional(&mut *tx)
            .await?;

            if exists.is_some() {
                sqlx::query("UPDATE documents SET updated_at = ? WHERE source = ? AND content = ?")
                    .bind(now)
                    .bind(source)
                    .bind(content)
                    .execute(&mut *tx)
                    .await?;
                continue;
            }

            let slot = match index.append(std::slice::from_ref(vector)) {
                Ok(slot) => slot,
                Err(e) => {
                    index.truncate(rollback_len);
                    return Err(e);
                }
            };
            appended += 1;

            let chunk_id = derive_chunk_id(source, slot, content);
            let insert = sqlx::query(
                r#"
                INSERT INTO documents (chunk_id, content, source, slot_index, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk_id)
            .bind(content)
            .bind(source)
            .bind(slot as i64)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await;

            if let Err(e) = insert {
                index.truncate(rollback_len);
                return Err(Error::Storage(e));
            }
        }

        // Persist vectors before committing metadata so a failure on either
        // side rolls both back.
        if appended > 0 {
            if let Err(e) = index.save(&self.vector_path) {
                index.truncate(rollback_len);
                return Err(e);
            }
        }

        if let Err(e) = tx.commit().await {
            index.truncate(rollback_len);
            if appended > 0 {
                index.save(&self.vector_path)?;
            }
            return Err(Error::Storage(e));
        }

        tracing::debug!(source, appended, skipped = contents.len() - appended, "indexed chunks");
        Ok(appended)
    }

    /// Up to `k` best inner-product matches as `(offset, raw_score)`.
    pub async fn search_raw(&self, query: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.index.lock().await.search_raw(query, k)
    }

    /// Raw score of the query against every stored vector.
    pub async fn scan_scores(&self, query: &[f32]) -> Result<Vec<f32>> {
        self.index.lock().await.scan_scores(query)
    }

    pub async fn record_by_slot(&self, slot: u32) -> Result<Option<DocumentRecord>> {
        let row = sqlx::query(
            "SELECT chunk_id, content, source, slot_index, created_at, updated_at FROM documents WHERE slot_index = ?",
        )
        .bind(slot as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| DocumentRecord {
            slot_index: r.get::<i64, _>("slot_index") as u32,
            chunk_id: r.get("chunk_id"),
            content: r.get("content"),
            source: r.get("source"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    pub async fn source_count(&self, source: &str) -> Result<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE source = ?")
            .bind(source)
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }

    /// Reset both stores to empty and remove the backing vector file.
    pub async fn clear(&self) -> Result<()> {
        let mut index = self.index.lock().await;
        sqlx::query("DELETE FROM documents").execute(&self.pool).await?;
        index.clear();
        if self.vector_path.exists() {
            std::fs::remove_file(&self.vector_path)?;
        }
        tracing::info!("document store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let source_rows = sqlx::query("SELECT source, COUNT(*) AS n FROM documents GROUP BY source")
            .fetch_all(&self.pool)
            .await?;
        let per_source_counts: HashMap<String, i64> = source_rows
            .iter()
            .map(|r| (r.get::<String, _>("source"), r.get::<i64, _>("n")))
            .collect();

        let avg_content_length: f64 =
            sqlx::query_scalar("SELECT COALESCE(AVG(LENGTH(content)), 0.0) FROM documents")
                .fetch_one(&self.pool)
                .await?;

        Ok(IndexStats {
            total_records,
            total_vectors: self.count().await,
            per_source_counts,
            avg_content_length,
            dims: self.dims,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// `{source}_{slot}_{content hash}` — stable identity for one indexed chunk.
fn derive_chunk_id(source: &str, slot: u32, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}_{}_{}", source, slot, &digest[..12])
}

async fn migrate(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            chunk_id TEXT NOT NULL UNIQUE,
            content TEXT NOT NULL,
            source TEXT NOT NULL,
            slot_index INTEGER PRIMARY KEY,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_source ON documents(source)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Restore the count invariant after a crash that advanced one store but
/// not the other: keep the common prefix, drop the tail on the longer side.
async fn reconcile(pool: &SqlitePool, index: &mut VectorIndex, vector_path: &std::path::Path) -> Result<()> {
    let records: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
        .fetch_one(pool)
        .await?;
    let vectors = index.count();

    if records as usize == vectors {
        return Ok(());
    }

    let keep = vectors.min(records as usize);
    tracing::warn!(
        records,
        vectors,
        keep,
        "vector index and metadata diverged; truncating to common prefix"
    );

    sqlx::query("DELETE FROM documents WHERE slot_index >= ?")
        .bind(keep as i64)
        .execute(pool)
        .await?;

    if vectors > keep {
        index.truncate(keep);
        index.save(vector_path)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(tmp: &TempDir, dims: usize) -> DocumentStore {
        let cfg = StorageConfig {
            metadata_path: tmp.path().join("meta.sqlite"),
            vector_path: tmp.path().join("vectors.idx"),
        };
        DocumentStore::open(&cfg, dims).await.unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_add_keeps_stores_aligned() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        let appended = store
            .add(
                &texts(&["alpha", "beta"]),
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "wiki",
            )
            .await
            .unwrap();

        assert_eq!(appended, 2);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.total_vectors, 2);
    }

    #[tokio::test]
    async fn test_length_mismatch_rejected_before_mutation() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        let err = store
            .add(&texts(&["alpha"]), &[vec![1.0, 0.0], vec![0.0, 1.0]], "wiki")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LengthMismatch { .. }));

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_vectors, 0);
    }

    #[tokio::test]
    async fn test_bad_dimension_rolls_back_batch() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        let err = store
            .add(
                &texts(&["alpha", "beta"]),
                &[vec![1.0, 0.0], vec![0.0, 1.0, 2.0]],
                "wiki",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Neither the good nor the bad entry survives.
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_vectors, 0);
    }

    #[tokio::test]
    async fn test_readd_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        let contents = texts(&["alpha", "beta"]);
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];

        store.add(&contents, &vectors, "wiki").await.unwrap();
        let second = store.add(&contents, &vectors, "wiki").await.unwrap();

        assert_eq!(second, 0);
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.total_vectors, 2);
    }

    #[tokio::test]
    async fn test_same_content_different_source_not_deduped() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        store
            .add(&texts(&["alpha"]), &[vec![1.0, 0.0]], "wiki")
            .await
            .unwrap();
        store
            .add(&texts(&["alpha"]), &[vec![1.0, 0.0]], "blog")
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 2);
        assert_eq!(stats.per_source_counts["wiki"], 1);
        assert_eq!(stats.per_source_counts["blog"], 1);
    }

    #[tokio::test]
    async fn test_record_by_slot() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        store
            .add(
                &texts(&["alpha", "beta"]),
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "wiki",
            )
            .await
            .unwrap();

        let rec = store.record_by_slot(1).await.unwrap().unwrap();
        assert_eq!(rec.content, "beta");
        assert_eq!(rec.slot_index, 1);
        assert!(rec.chunk_id.starts_with("wiki_1_"));

        assert!(store.record_by_slot(99).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_clear_resets_both_stores() {
        let tmp = TempDir::new().unwrap();
        let store = open_store(&tmp, 2).await;

        store
            .add(&texts(&["alpha"]), &[vec![1.0, 0.0]], "wiki")
            .await
            .unwrap();
        store.clear().await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_vectors, 0);
        assert!(!tmp.path().join("vectors.idx").exists());
    }

    #[tokio::test]
    async fn test_reopen_restores_state() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open_store(&tmp, 2).await;
            store
                .add(&texts(&["alpha"]), &[vec![1.0, 0.0]], "wiki")
                .await
                .unwrap();
            store.close().await;
        }

        let store = open_store(&tmp, 2).await;
        assert_eq!(store.count().await, 1);
        let hits = store.search_raw(&[1.0, 0.0], 1).await.unwrap();
        assert_eq!(hits[0].0, 0);
    }

    #[tokio::test]
    async fn test_reconcile_truncates_diverged_metadata() {
        let tmp = TempDir::new().unwrap();
        {
            let store = open_store(&tmp, 2).await;
            store
                .add(
                    &texts(&["alpha", "beta"]),
                    &[vec![1.0, 0.0], vec![0.0, 1.0]],
                    "wiki",
                )
                .await
                .unwrap();
            store.close().await;
        }

        // Simulate a crash that lost the vector file but kept the metadata.
        std::fs::remove_file(tmp.path().join("vectors.idx")).unwrap();

        let store = open_store(&tmp, 2).await;
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.total_vectors, 0);
    }
}
