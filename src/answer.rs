//! Answer synthesis: retrieved chunks + question → prompt → generated answer.

use std::sync::Arc;
use std::time::Instant;

use crate::generation::Generator;
use crate::models::{RetrievalResult, Source};

/// Returned verbatim when nothing relevant was retrieved. The prompt also
/// instructs the model to use it when the context is insufficient.
pub const FALLBACK_ANSWER: &str =
    "I don't have enough information to answer this question based on the available knowledge base.";

#[derive(Debug, Clone)]
pub struct Synthesis {
    pub answer: String,
    pub sources: Vec<Source>,
    /// Seconds.
    pub processing_time: f64,
}

/// A generation failure, with the time spent before it happened.
#[derive(Debug, Clone)]
pub struct SynthesisFailure {
    pub message: String,
    pub processing_time: f64,
}

pub struct AnswerSynthesizer {
    generator: Arc<dyn Generator>,
    temperature: f32,
}

impl AnswerSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, temperature: f32) -> Self {
        Self {
            generator,
            temperature,
        }
    }

    pub async fn generate_response(
        &self,
        query: &str,
        retrieved: &[RetrievalResult],
    ) -> Result<Synthesis, SynthesisFailure> {
        let start = Instant::now();

        if retrieved.is_empty() {
            return Ok(Synthesis {
                answer: FALLBACK_ANSWER.to_string(),
                sources: Vec::new(),
                processing_time: start.elapsed().as_secs_f64(),
            });
        }

        let prompt = build_prompt(query, retrieved);
        match self.generator.generate(&prompt, self.temperature).await {
            Ok(answer) => Ok(Synthesis {
                answer,
                sources: retrieved.iter().map(Source::from).collect(),
                processing_time: start.elapsed().as_secs_f64(),
            }),
            Err(e) => {
                tracing::warn!(model = self.generator.model_name(), error = %e, "generation failed");
                Err(SynthesisFailure {
                    message: format!("Error generating response: {}", e),
                    processing_time: start.elapsed().as_secs_f64(),
                })
            }
        }
    }
}

pub fn build_prompt(question: &str, retrieved: &[RetrievalResult]) -> String {
    let context = retrieved
        .iter()
        .map(|r| r.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    format!(
        "You are AskAccess, an AI assistant for Access Group employees and customers.\n\
         Answer the question based only on the following context:\n\n\
         {context}\n\n\
         Question: {question}\n\n\
         Provide a concise and accurate answer. If the context doesn't contain the information \
         needed to answer the question, say \"{FALLBACK_ANSWER}\""
    )
}
