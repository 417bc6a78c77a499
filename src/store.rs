//! Vector index and metadata store, persisted together in SQLite.
//!
//! Every document id in `chunks` has exactly one row in `documents` and
//! vice versa. [`DocumentStore::commit_document`] keeps that true by
//! writing the metadata record and all of its chunks in one transaction,
//! behind a single-writer lock, so concurrent ingestions cannot interleave
//! and a crash leaves either the whole document or none of it.
//!
//! Nearest-neighbour search is brute-force cosine similarity over the
//! stored `f32` BLOBs.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, Metadata, MetadataRecord, RetrievalResult};

/// A chunk ready to be written: text, per-chunk metadata and its vector.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
}

/// Counts of rows that break the document/chunk symmetry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    /// Metadata records with no chunks in the index.
    pub orphaned_records: usize,
    /// Document ids present in the index with no metadata record.
    pub orphaned_chunks: usize,
    /// Records whose `chunk_count` differs from the stored chunks.
    pub count_mismatches: usize,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        *self == ConsistencyReport::default()
    }
}

pub struct DocumentStore {
    pool: SqlitePool,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl DocumentStore {
    /// Opens the index at `path`, falling back to a fresh empty index if the
    /// existing file cannot be loaded. The unreadable file is moved aside to
    /// `<path>.corrupt-<timestamp>` rather than deleted.
    pub async fn open(path: &Path) -> Result<Self> {
        match Self::open_strict(path).await {
            Ok(store) => Ok(store),
            Err(e) if path.exists() => {
                let aside = quarantine(path)?;
                tracing::warn!(
                    error = %e,
                    moved_to = %aside.display(),
                    "failed to load index, starting with an empty one"
                );
                Self::open_strict(path).await
            }
            Err(e) => Err(e),
        }
    }

    /// Opens the index at `path`, failing if it cannot be loaded.
    pub async fn open_strict(path: &Path) -> Result<Self> {
        let pool = db::connect(path)
            .await
            .with_context(|| format!("Failed to open index at {}", path.display()))?;
        if let Err(e) = migrate::run_migrations(&pool).await {
            pool.close().await;
            return Err(e.context(format!("Failed to initialize index at {}", path.display())));
        }
        Ok(Self {
            pool,
            path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one metadata record and all of its chunks atomically.
    pub async fn commit_document(
        &self,
        record: &MetadataRecord,
        chunks: &[IndexedChunk],
    ) -> Result<()> {
        if chunks.is_empty() {
            bail!("document {} has no chunks", record.document_id);
        }
        if record.chunk_count != chunks.len() {
            bail!(
                "document {} declares {} chunks but {} were supplied",
                record.document_id,
                record.chunk_count,
                chunks.len()
            );
        }
        if let Some(c) = chunks
            .iter()
            .find(|c| c.chunk.document_id != record.document_id)
        {
            bail!(
                "chunk {} belongs to {}, not {}",
                c.chunk.id,
                c.chunk.document_id,
                record.document_id
            );
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO documents (id, source, metadata_json, ingested_at, chunk_count) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.document_id)
        .bind(&record.source)
        .bind(serde_json::to_string(&record.metadata)?)
        .bind(record.ingested_at.to_rfc3339())
        .bind(record.chunk_count as i64)
        .execute(&mut *tx)
        .await?;

        for c in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, text, hash, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&c.chunk.id)
            .bind(&c.chunk.document_id)
            .bind(c.chunk.chunk_index)
            .bind(&c.chunk.text)
            .bind(&c.chunk.hash)
            .bind(serde_json::to_string(&c.metadata)?)
            .bind(vec_to_blob(&c.embedding))
            .bind(c.embedding.len() as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(
            document_id = %record.document_id,
            chunks = chunks.len(),
            "committed document"
        );
        Ok(())
    }

    /// Number of metadata records (one per ingested document).
    pub async fn document_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    pub async fn get_record(&self, document_id: &str) -> Result<Option<MetadataRecord>> {
        let row = sqlx::query(
            "SELECT id, source, metadata_json, ingested_at, chunk_count FROM documents WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| record_from_row(&r)).transpose()
    }

    /// All metadata records, newest first.
    pub async fn list_records(&self) -> Result<Vec<MetadataRecord>> {
        let rows = sqlx::query(
            "SELECT id, source, metadata_json, ingested_at, chunk_count FROM documents ORDER BY ingested_at DESC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// The `k` stored chunks most similar to `query_vec`, best first.
    pub async fn nearest(&self, query_vec: &[f32], k: usize) -> Result<Vec<RetrievalResult>> {
        let rows = sqlx::query("SELECT text, metadata_json, embedding, dims FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut skipped = 0usize;
        let mut results: Vec<RetrievalResult> = Vec::with_capacity(rows.len());
        for row in &rows {
            let dims: i64 = row.get("dims");
            if dims != query_vec.len() as i64 {
                skipped += 1;
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            results.push(RetrievalResult {
                content: row.get("text"),
                metadata: parse_metadata(&metadata_json),
                score: cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64,
            });
        }
        if skipped > 0 {
            tracing::warn!(
                skipped,
                query_dims = query_vec.len(),
                "skipped chunks embedded with different dimensions"
            );
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k);
        Ok(results)
    }

    /// Checks the document/chunk symmetry invariant.
    pub async fn check_consistency(&self) -> Result<ConsistencyReport> {
        let orphaned_records: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents d WHERE NOT EXISTS (SELECT 1 FROM chunks c WHERE c.document_id = d.id)",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphaned_chunks: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT c.document_id) FROM chunks c WHERE NOT EXISTS (SELECT 1 FROM documents d WHERE d.id = c.document_id)",
        )
        .fetch_one(&self.pool)
        .await?;
        let count_mismatches: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents d WHERE d.chunk_count != (SELECT COUNT(*) FROM chunks c WHERE c.document_id = d.id)",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(ConsistencyReport {
            orphaned_records: orphaned_records as usize,
            orphaned_chunks: orphaned_chunks as usize,
            count_mismatches: count_mismatches as usize,
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<MetadataRecord> {
    let ingested_at: String = row.get("ingested_at");
    let metadata_json: String = row.get("metadata_json");
    let chunk_count: i64 = row.get("chunk_count");
    Ok(MetadataRecord {
        document_id: row.get("id"),
        source: row.get("source"),
        metadata: parse_metadata(&metadata_json),
        ingested_at: DateTime::parse_from_rfc3339(&ingested_at)
            .with_context(|| format!("Invalid ingested_at timestamp: {}", ingested_at))?
            .with_timezone(&Utc),
        chunk_count: chunk_count as usize,
    })
}

fn parse_metadata(json: &str) -> Metadata {
    serde_json::from_str(json).unwrap_or_default()
}

/// Renames the database (and its WAL side files) out of the way.
fn quarantine(path: &Path) -> Result<PathBuf> {
    let suffix = format!("corrupt-{}", Utc::now().format("%Y%m%d%H%M%S"));
    let aside = PathBuf::from(format!("{}.{}", path.display(), suffix));
    std::fs::rename(path, &aside)
        .with_context(|| format!("Failed to move unreadable index {}", path.display()))?;
    for side in ["-wal", "-shm"] {
        let side_path = PathBuf::from(format!("{}{}", path.display(), side));
        if side_path.exists() {
            let _ = std::fs::rename(&side_path, format!("{}{}", aside.display(), side));
        }
    }
    Ok(aside)
}
