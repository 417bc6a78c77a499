//! Query-time retrieval: embed the question, rank stored chunks.

use anyhow::{bail, Result};
use std::sync::Arc;

use crate::embedding::{embed_query, Embedder};
use crate::models::RetrievalResult;
use crate::store::DocumentStore;

pub struct Retriever {
    store: Arc<DocumentStore>,
    embedder: Arc<dyn Embedder>,
}

impl Retriever {
    pub fn new(store: Arc<DocumentStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Returns up to `k` chunks most similar to `query`, best first.
    ///
    /// A blank query yields no results without calling the embedder, and so
    /// does an empty index. `k` must be at least 1.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalResult>> {
        if k == 0 {
            bail!("k must be at least 1");
        }
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        if self.store.chunk_count().await? == 0 {
            return Ok(Vec::new());
        }

        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let results = self.store.nearest(&query_vec, k).await?;
        tracing::debug!(k, returned = results.len(), "similarity search");
        Ok(results)
    }
}
