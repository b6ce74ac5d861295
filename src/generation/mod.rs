// Generation module
// Second half of the ask pipeline: the confidence gate decides whether to
// answer at all, then the primary model generates with a fallback model
// behind it.


pub mod history;
pub mod prompts;

use std::sync::Arc;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{Config, GenerationConfig};
use crate::database::sqlite::models::ConversationTurn;
use crate::models::{ChatMessage, OllamaClient};
use crate::retrieval::RetrievalResult;

pub use history::ConversationHistory;
pub use prompts::{REFUSAL_MESSAGE, StudentLevel, build_messages};

/// Which model, if any, produced an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    /// The configured generation model
    Primary,
    /// The configured fallback model, used after a primary failure
    Fallback,
    /// No model ran; the confidence gate refused
    None,
}

impl GeneratorKind {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            GeneratorKind::Primary => "primary",
            GeneratorKind::Fallback => "fallback",
            GeneratorKind::None => "none",
        }
    }
}

impl std::fmt::Display for GeneratorKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A generated (or refused) answer with its provenance
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub generator: GeneratorKind,
    /// The base confidence the gate decided on
    pub confidence: f32,
}

/// Answer generator with a confidence gate and a fallback model
///
/// Refuses with a fixed message when the retrieval confidence is below
/// the threshold (strict less-than: equality answers). Otherwise the
/// primary model runs; any primary failure, including blank output,
/// routes the same messages to the fallback model. Only when both fail
/// does the call error.
pub struct HybridGenerator {
    ollama_client: Arc<OllamaClient>,
    generation_model: String,
    fallback_model: String,
    config: GenerationConfig,
}

impl HybridGenerator {
    #[inline]
    pub fn new(ollama_client: Arc<OllamaClient>, config: &Config) -> Self {
        Self {
            ollama_client,
            generation_model: config.ollama.generation_model.clone(),
            fallback_model: config.ollama.fallback_model.clone(),
            config: config.generation.clone(),
        }
    }

    /// Produce an answer for a question given its retrieval result
    ///
    /// # Arguments
    /// * `retrieval` - Context and confidence from the retrieval pass
    /// * `question` - The student's question
    /// * `level` - Student level used for prompt adaptation
    /// * `history` - Prior turns for this student, oldest first
    pub fn generate(
        &self,
        retrieval: &RetrievalResult,
        question: &str,
        level: StudentLevel,
        history: &[ConversationTurn],
    ) -> Result<GeneratedAnswer> {
        let confidence = retrieval.base_confidence;

        if confidence < self.config.confidence_threshold {
            debug!(
                "Refusing to answer: confidence {:.3} below threshold {:.3}",
                confidence, self.config.confidence_threshold
            );
            return Ok(GeneratedAnswer {
                answer: REFUSAL_MESSAGE.to_string(),
                generator: GeneratorKind::None,
                confidence,
            });
        }

        let messages = build_messages(&retrieval.context, question, level, history);

        match self.generate_primary(&messages) {
            Ok(answer) => Ok(GeneratedAnswer {
                answer,
                generator: GeneratorKind::Primary,
                confidence,
            }),
            Err(primary_error) => {
                warn!(
                    "Primary model '{}' failed, trying fallback '{}': {:#}",
                    self.generation_model, self.fallback_model, primary_error
                );
                let answer = self.generate_fallback(&messages).map_err(|fallback_error| {
                    fallback_error.context(format!(
                        "Both generators failed; primary error: {:#}",
                        primary_error
                    ))
                })?;
                Ok(GeneratedAnswer {
                    answer,
                    generator: GeneratorKind::Fallback,
                    confidence,
                })
            }
        }
    }

    fn generate_primary(&self, messages: &[ChatMessage]) -> Result<String> {
        let answer = self.ollama_client.chat(
            &self.generation_model,
            messages,
            self.config.temperature,
            self.config.max_tokens,
        )?;
        ensure!(
            !answer.trim().is_empty(),
            "Model '{}' returned empty output",
            self.generation_model
        );
        Ok(answer)
    }

    fn generate_fallback(&self, messages: &[ChatMessage]) -> Result<String> {
        self.ollama_client.chat(
            &self.fallback_model,
            messages,
            self.config.fallback_temperature,
            self.config.fallback_max_tokens,
        )
    }
}
