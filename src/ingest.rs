//! Ingestion pipeline.
//!
//! Turns a file, an uploaded byte buffer or a batch of CRM case records into
//! committed documents: parse → merge metadata → chunk → embed → one
//! transactional write of the metadata record and its chunks.
//!
//! A single file is one unit of work and aborts on its first failure. A
//! batch of case records is processed record by record; failures are
//! collected in [`BatchIngestReport::failures`] and the rest of the batch
//! continues.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

use crate::chunk::chunk_text;
use crate::config::ChunkingConfig;
use crate::embedding::{embed_in_batches, Embedder};
use crate::extract::extract_file;
use crate::models::{CaseRecord, Metadata, MetadataRecord};
use crate::store::{DocumentStore, IndexedChunk};

/// Origin tag for documents built from CRM case records.
pub const SALESFORCE_SOURCE: &str = "salesforce";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestFailure {
    /// Position of the record in the submitted batch.
    pub index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchIngestReport {
    pub document_ids: Vec<String>,
    pub failures: Vec<IngestFailure>,
}

/// Result of storing and ingesting an uploaded file.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub document_id: String,
    pub stored_path: PathBuf,
}

pub struct IngestionPipeline {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingConfig,
    batch_size: usize,
    uploads_dir: PathBuf,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<DocumentStore>,
        embedder: Arc<dyn Embedder>,
        chunking: ChunkingConfig,
        batch_size: usize,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            store,
            embedder,
            chunking,
            batch_size,
            uploads_dir,
        }
    }

    /// Parses, chunks, embeds and commits one file. Returns the new
    /// document id. Nothing is written if any step fails.
    pub async fn ingest_file(&self, path: &Path, metadata: Metadata) -> Result<String> {
        let owned = path.to_path_buf();
        let (format, text) = tokio::task::spawn_blocking(move || extract_file(&owned))
            .await
            .context("Extraction task failed")??;

        let source = path.display().to_string();
        let mut defaults = Metadata::new();
        defaults.insert("source".into(), Value::String(source.clone()));
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            defaults.insert("file_name".into(), Value::String(name.to_string()));
        }
        defaults.insert(
            "content_type".into(),
            Value::String(format.content_type().to_string()),
        );

        let record = self.commit_text(&source, &text, defaults, metadata).await?;
        tracing::info!(
            document_id = %record.document_id,
            path = %path.display(),
            format = ?format,
            chunks = record.chunk_count,
            "ingested file"
        );
        Ok(record.document_id)
    }

    /// Stores uploaded bytes under the uploads directory, then ingests the
    /// stored copy. The stored file is kept even if ingestion fails.
    pub async fn ingest_upload(
        &self,
        file_name: &str,
        bytes: &[u8],
        metadata: Metadata,
    ) -> Result<UploadReceipt> {
        tokio::fs::create_dir_all(&self.uploads_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.uploads_dir.display()))?;
        let stored_path =
            write_new_file(&self.uploads_dir, &stored_file_name(file_name, Local::now()), bytes)
                .await?;

        let document_id = self.ingest_file(&stored_path, metadata).await?;
        Ok(UploadReceipt {
            document_id,
            stored_path,
        })
    }

    /// Ingests each case record as its own document.
    pub async fn ingest_structured_records(&self, records: &[CaseRecord]) -> BatchIngestReport {
        let mut report = BatchIngestReport::default();

        for (index, case) in records.iter().enumerate() {
            match self.ingest_case(case).await {
                Ok(id) => report.document_ids.push(id),
                Err(e) => {
                    tracing::warn!(index, error = %e, "case record ingestion failed");
                    report.failures.push(IngestFailure {
                        index,
                        message: format!("{:#}", e),
                    });
                }
            }
        }

        tracing::info!(
            ingested = report.document_ids.len(),
            failed = report.failures.len(),
            "ingested case records"
        );
        report
    }

    async fn ingest_case(&self, case: &CaseRecord) -> Result<String> {
        let text = render_case(case);
        let mut caller = Metadata::new();
        caller.insert("case_id".into(), Value::String(case.case_id()));
        for (key, value) in [
            ("case_number", &case.case_number),
            ("subject", &case.subject),
            ("status", &case.status),
        ] {
            caller.insert(
                key.into(),
                value.clone().map(Value::String).unwrap_or(Value::Null),
            );
        }

        let mut defaults = Metadata::new();
        defaults.insert("source".into(), Value::String(SALESFORCE_SOURCE.into()));

        let record = self
            .commit_text(SALESFORCE_SOURCE, &text, defaults, caller)
            .await?;
        Ok(record.document_id)
    }

    async fn commit_text(
        &self,
        source: &str,
        text: &str,
        defaults: Metadata,
        caller: Metadata,
    ) -> Result<MetadataRecord> {
        let ingested_at = Utc::now();
        let document_id = make_document_id(source, ingested_at);
        let metadata = merge_metadata(defaults, caller, &document_id, ingested_at);

        let chunks = chunk_text(&document_id, text, &self.chunking);
        if chunks.is_empty() {
            anyhow::bail!("document contains no text");
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = embed_in_batches(self.embedder.as_ref(), &texts, self.batch_size).await?;

        let chunk_count = chunks.len();
        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, embedding)| {
                let mut chunk_metadata = metadata.clone();
                chunk_metadata.insert("chunk_index".into(), Value::from(chunk.chunk_index));
                chunk_metadata.insert("chunk_count".into(), Value::from(chunk_count));
                IndexedChunk {
                    chunk,
                    metadata: chunk_metadata,
                    embedding,
                }
            })
            .collect();

        let record = MetadataRecord {
            document_id,
            source: source.to_string(),
            metadata,
            ingested_at,
            chunk_count,
        };
        self.store.commit_document(&record, &indexed).await?;
        Ok(record)
    }
}

/// Fresh identifier for one ingestion event. Two ingestions of the same
/// source never share an id, even within the same instant.
pub fn make_document_id(source: &str, ingested_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}", source, ingested_at.to_rfc3339()).as_bytes());
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex[..32].to_string()
}

/// Caller fields override the computed defaults, except `document_id` and
/// `ingestion_time`, which are always the pipeline's own.
pub fn merge_metadata(
    defaults: Metadata,
    caller: Metadata,
    document_id: &str,
    ingested_at: DateTime<Utc>,
) -> Metadata {
    let mut merged = defaults;
    merged.extend(caller);
    merged.insert("document_id".into(), Value::String(document_id.to_string()));
    merged.insert(
        "ingestion_time".into(),
        Value::String(ingested_at.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    merged
}

/// Text form of a case record that gets chunked and embedded.
pub fn render_case(case: &CaseRecord) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_else(|| "N/A".to_string());
    let mut text = format!(
        "Case Number: {}\nSubject: {}\nDescription: {}\nStatus: {}\n",
        field(&case.case_number),
        field(&case.subject),
        field(&case.description),
        field(&case.status),
    );
    if let Some(bodies) = case.comment_bodies() {
        text.push_str("Comments:\n");
        for body in bodies {
            text.push_str("- ");
            text.push_str(&body);
            text.push('\n');
        }
    }
    text
}

/// `<YYYYmmdd_HHMMSS>_<name>` with spaces replaced by underscores. Any
/// directory part of the client-supplied name is dropped.
pub fn stored_file_name(original: &str, now: DateTime<Local>) -> String {
    let base = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload");
    format!("{}_{}", now.format("%Y%m%d_%H%M%S"), base.replace(' ', "_"))
}

/// Attempts before giving up on finding a free upload name.
const MAX_NAME_ATTEMPTS: usize = 1000;

/// Writes `bytes` to a file in `dir` that did not exist before. On a name
/// clash `_1`, `_2`, ... is inserted before the extension.
async fn write_new_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let path = dir.join(numbered_name(name, attempt));
        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to store upload at {}", path.display()))
            }
        };
        file.write_all(bytes)
            .await
            .with_context(|| format!("Failed to store upload at {}", path.display()))?;
        file.flush().await?;
        return Ok(path);
    }
    anyhow::bail!("no free upload name for {} in {}", name, dir.display())
}

fn numbered_name(name: &str, n: usize) -> String {
    if n == 0 {
        return name.to_string();
    }
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}_{}.{}", stem, n, ext),
        _ => format!("{}_{}", name, n),
    }
}
