//! Application context.
//!
//! [`App`] owns every long-lived service (store, backends, pipeline, query
//! processor, logger) and is built once at startup, then shared by
//! reference with HTTP handlers and CLI commands.

use anyhow::Result;
use std::sync::Arc;

use crate::answer::AnswerSynthesizer;
use crate::config::Config;
use crate::embedding::{create_embedder, DisabledEmbedder, Embedder};
use crate::generation::{create_generator, DisabledGenerator, Generator};
use crate::ingest::IngestionPipeline;
use crate::query::QueryProcessor;
use crate::query_log::QueryLogger;
use crate::search::Retriever;
use crate::store::DocumentStore;

pub struct App {
    pub config: Config,
    pub store: Arc<DocumentStore>,
    pub pipeline: IngestionPipeline,
    pub processor: QueryProcessor,
    pub logger: Arc<QueryLogger>,
    embedding_configured: bool,
    generation_configured: bool,
}

impl App {
    /// Builds the backends named in `config`.
    ///
    /// A backend that cannot be constructed (usually a missing
    /// `OPENAI_API_KEY`) is replaced by its disabled variant with a warning,
    /// so the service still starts and reports it via `/health`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let (embedder, embedding_ok): (Arc<dyn Embedder>, bool) =
            match create_embedder(&config.embedding) {
                Ok(e) => (e, config.embedding.is_enabled()),
                Err(e) => {
                    tracing::warn!(error = %e, "embedding backend unavailable, continuing without it");
                    (Arc::new(DisabledEmbedder), false)
                }
            };
        let (generator, generation_ok): (Arc<dyn Generator>, bool) =
            match create_generator(&config.generation) {
                Ok(g) => (g, config.generation.is_enabled()),
                Err(e) => {
                    tracing::warn!(error = %e, "generation backend unavailable, continuing without it");
                    (Arc::new(DisabledGenerator), false)
                }
            };

        let mut app = Self::with_backends(config, embedder, generator).await?;
        app.embedding_configured = embedding_ok;
        app.generation_configured = generation_ok;
        Ok(app)
    }

    /// Builds the context around caller-supplied backends.
    pub async fn with_backends(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let store = Arc::new(DocumentStore::open(&config.data.index_path()).await?);
        let logger = Arc::new(QueryLogger::new(
            config.data.query_logs_dir(),
            config.query_log.latency_target_secs,
        ));

        let pipeline = IngestionPipeline::new(
            store.clone(),
            embedder.clone(),
            config.chunking.clone(),
            config.embedding.batch_size,
            config.data.uploads_dir(),
        );
        let processor = QueryProcessor::new(
            Retriever::new(store.clone(), embedder),
            AnswerSynthesizer::new(generator, config.generation.temperature),
            logger.clone(),
        );

        tracing::debug!(root = %config.data.root.display(), "application context ready");
        Ok(Self {
            config,
            store,
            pipeline,
            processor,
            logger,
            embedding_configured: true,
            generation_configured: true,
        })
    }

    pub fn embedding_configured(&self) -> bool {
        self.embedding_configured
    }

    pub fn generation_configured(&self) -> bool {
        self.generation_configured
    }

    pub async fn close(&self) {
        self.store.close().await;
    }
}
