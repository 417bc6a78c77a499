//! Question answering end to end: retrieve → synthesize → log.
//!
//! Every call to [`QueryProcessor::process_query`] writes exactly one query
//! log entry, whether it produced an answer, the fallback, or an error.
//! Log writes are best-effort and never change the outcome.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::answer::AnswerSynthesizer;
use crate::models::Source;
use crate::query_log::QueryLogger;
use crate::search::Retriever;

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `None` when sources were not requested.
    pub sources: Option<Vec<Source>>,
    pub processing_time: f64,
    pub timestamp: DateTime<Utc>,
}

impl QueryOutcome {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

pub struct QueryProcessor {
    retriever: Retriever,
    synthesizer: AnswerSynthesizer,
    logger: Arc<QueryLogger>,
}

impl QueryProcessor {
    pub fn new(retriever: Retriever, synthesizer: AnswerSynthesizer, logger: Arc<QueryLogger>) -> Self {
        Self {
            retriever,
            synthesizer,
            logger,
        }
    }

    pub async fn process_query(
        &self,
        query: &str,
        max_results: usize,
        include_sources: bool,
    ) -> QueryOutcome {
        let start = Instant::now();

        let retrieved = match self.retriever.similarity_search(query, max_results).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "retrieval failed");
                let message = format!("Error processing query: {:#}", e);
                return self.fail(query, message, start).await;
            }
        };

        match self.synthesizer.generate_response(query, &retrieved).await {
            Ok(synthesis) => {
                let processing_time = start.elapsed().as_secs_f64();
                self.log(query, &synthesis.answer, &synthesis.sources, processing_time, false)
                    .await;
                tracing::info!(
                    retrieved = retrieved.len(),
                    processing_time,
                    "answered query"
                );
                QueryOutcome {
                    query: query.to_string(),
                    answer: Some(synthesis.answer),
                    error: None,
                    sources: include_sources.then_some(synthesis.sources),
                    processing_time,
                    timestamp: Utc::now(),
                }
            }
            Err(failure) => self.fail(query, failure.message, start).await,
        }
    }

    async fn fail(&self, query: &str, message: String, start: Instant) -> QueryOutcome {
        let processing_time = start.elapsed().as_secs_f64();
        self.log(query, &message, &[], processing_time, true).await;
        QueryOutcome {
            query: query.to_string(),
            answer: None,
            error: Some(message),
            sources: None,
            processing_time,
            timestamp: Utc::now(),
        }
    }

    async fn log(
        &self,
        query: &str,
        answer: &str,
        sources: &[Source],
        processing_time: f64,
        is_error: bool,
    ) {
        if let Err(e) = self
            .logger
            .log_query(query, answer, sources, processing_time, is_error, None)
            .await
        {
            tracing::warn!(error = %e, "failed to write query log entry");
        }
    }
}
