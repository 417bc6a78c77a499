//! Append-only query log, one JSON Lines file per calendar day.
//!
//! Entries go to `queries_<YYYYmmdd>.jsonl` under the configured directory,
//! named for the local calendar day of the entry's own timestamp (the same
//! clock upload file names use). Timestamps inside entries stay UTC. Appends are
//! serialized by a mutex so concurrent requests never interleave lines.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::{QueryLogEntry, Source};

const FILE_PREFIX: &str = "queries_";
const FILE_SUFFIX: &str = ".jsonl";

pub struct QueryLogger {
    dir: PathBuf,
    latency_target_secs: f64,
    write_lock: Mutex<()>,
}

impl QueryLogger {
    pub fn new(dir: PathBuf, latency_target_secs: f64) -> Self {
        Self {
            dir,
            latency_target_secs,
            write_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one entry and returns it.
    pub async fn log_query(
        &self,
        query: &str,
        answer: &str,
        sources: &[Source],
        processing_time: f64,
        is_error: bool,
        feedback: Option<String>,
    ) -> Result<QueryLogEntry> {
        let entry = QueryLogEntry {
            query: query.to_string(),
            answer: answer.to_string(),
            sources: sources.to_vec(),
            processing_time,
            timestamp: Utc::now(),
            is_error,
            feedback,
            latency_within_target: processing_time < self.latency_target_secs,
        };
        self.append(&entry).await?;
        Ok(entry)
    }

    async fn append(&self, entry: &QueryLogEntry) -> Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let path = self.partition_path(entry.timestamp);

        let _guard = self.write_lock.lock().await;
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    pub fn partition_path(&self, at: DateTime<Utc>) -> PathBuf {
        let day = at.with_timezone(&Local).format("%Y%m%d");
        self.dir
            .join(format!("{}{}{}", FILE_PREFIX, day, FILE_SUFFIX))
    }

    /// Up to `limit` entries: newest day file first, file order within a day.
    pub async fn get_query_logs(&self, limit: usize) -> Result<Vec<QueryLogEntry>> {
        let mut entries = Vec::new();
        if limit == 0 || !self.dir.exists() {
            return Ok(entries);
        }

        let mut files = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX) {
                files.push(entry.path());
            }
        }
        files.sort();
        files.reverse();

        'files: for path in files {
            let content = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            for (lineno, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<QueryLogEntry>(line) {
                    Ok(entry) => {
                        entries.push(entry);
                        if entries.len() >= limit {
                            break 'files;
                        }
                    }
                    Err(e) => tracing::warn!(
                        file = %path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping malformed query log line"
                    ),
                }
            }
        }

        Ok(entries)
    }
}
